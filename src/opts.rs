#[cfg(feature = "cli")]
use clap::ValueEnum;

/// How decoded audio reaches the audio engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(ValueEnum))]
pub enum PlaybackMode {
    /// A background thread decodes ahead into a ring buffer; the audio callback only copies.
    #[default]
    Buffered,

    /// Read and decode one packet inside every audio callback.
    ///
    /// Only suitable when the file is on low-latency (ideally cached) storage.
    Direct,
}

/// Options that control playback.
///
/// This is *library-level configuration*; `alac-play` maps its flags into it, and embedders or
/// tests build it directly.
#[derive(Debug, Clone)]
pub struct PlaybackOpts {
    /// Where decoding happens relative to the audio callback.
    pub mode: PlaybackMode,

    /// Sample frames requested per audio callback.
    ///
    /// In `Direct` mode each callback consumes one packet, so this should match the codec's
    /// frame length (4096 for typical ALAC files) or audio is truncated or padded.
    pub buffer_frames: u32,

    /// Decode-ahead capacity in seconds (`Buffered` mode only).
    pub ring_seconds: f32,

    /// Overrides the codec's frame length as the per-packet decode hint.
    pub frames_per_packet_hint: Option<u32>,
}

impl Default for PlaybackOpts {
    fn default() -> Self {
        Self {
            mode: PlaybackMode::default(),
            buffer_frames: 4096,
            ring_seconds: 2.0,
            frames_per_packet_hint: None,
        }
    }
}

impl PlaybackOpts {
    /// Ring buffer capacity in interleaved samples for the given stream shape.
    ///
    /// Never smaller than two callbacks' worth of audio.
    pub fn ring_capacity_samples(&self, sample_rate: u32, channels: u32) -> usize {
        let seconds = f64::from(self.ring_seconds.max(0.0));
        let frames = (seconds * f64::from(sample_rate)).ceil() as usize;
        let floor = 2 * self.buffer_frames as usize;
        frames.max(floor) * channels as usize
    }
}
