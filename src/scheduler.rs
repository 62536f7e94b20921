//! Direct playback scheduler: one packet per audio-engine invocation.
//!
//! Each call to [`PlaybackScheduler::render`] reads and decodes exactly one packet and writes it
//! into the engine's buffer. This is the simplest way to drive the pipeline, but the file read
//! happens inside the callback, so it only keeps up when the file is on low-latency storage.
//! `decode_ahead` moves the read and decode off the callback thread.

use std::io::{Read, Seek};

use tracing::{error, info};

use crate::Error;
use crate::codec::Codec;
use crate::pipeline::{Cursor, PacketPipeline};

/// What the audio engine should do after an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// More audio follows.
    Continue,

    /// Every frame has been played. Not an error.
    Complete,

    /// Playback failed and the stream must stop.
    Abort,
}

/// Scheduler lifecycle.
///
/// `Completed` and `Aborted` are terminal. A scheduler only exists once the index is built and
/// the codec is open, so it starts in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Ready,
    Streaming,
    Completed,
    Aborted,
}

/// A sample type the audio engine accepts, converted from decoded 16-bit PCM.
pub trait OutputSample: Copy {
    /// The zero-signal value.
    const SILENCE: Self;

    fn from_pcm16(sample: i16) -> Self;
}

impl OutputSample for i16 {
    const SILENCE: Self = 0;

    fn from_pcm16(sample: i16) -> Self {
        sample
    }
}

impl OutputSample for u16 {
    const SILENCE: Self = 1 << 15;

    fn from_pcm16(sample: i16) -> Self {
        (sample as u16) ^ (1 << 15)
    }
}

impl OutputSample for f32 {
    const SILENCE: Self = 0.0;

    fn from_pcm16(sample: i16) -> Self {
        f32::from(sample) / 32_768.0
    }
}

/// Copy decoded PCM into `out`, then pad the rest of `out` with silence.
///
/// Returns the number of samples copied.
pub fn copy_or_pad<S: OutputSample>(pcm: &[i16], out: &mut [S]) -> usize {
    let n = pcm.len().min(out.len());
    for (slot, &sample) in out.iter_mut().zip(&pcm[..n]) {
        *slot = S::from_pcm16(sample);
    }
    out[n..].fill(S::SILENCE);
    n
}

/// Drives a [`PacketPipeline`] from the audio callback, one packet per invocation.
pub struct PlaybackScheduler<R, C> {
    pipeline: PacketPipeline<R, C>,
    state: SchedulerState,
    error: Option<Error>,
}

impl<R, C> PlaybackScheduler<R, C>
where
    R: Read + Seek,
    C: Codec,
{
    pub fn new(pipeline: PacketPipeline<R, C>) -> Self {
        Self {
            pipeline,
            state: SchedulerState::Ready,
            error: None,
        }
    }

    /// Service one audio-engine invocation.
    ///
    /// `out` holds the requested sample frames, interleaved. It is always fully written: with
    /// the next packet's audio (truncated or padded with silence to fit), or with silence once
    /// the stream has completed or aborted.
    pub fn render<S: OutputSample>(&mut self, out: &mut [S]) -> StreamStatus {
        match self.state {
            SchedulerState::Completed => {
                out.fill(S::SILENCE);
                return StreamStatus::Complete;
            }
            SchedulerState::Aborted => {
                out.fill(S::SILENCE);
                return StreamStatus::Abort;
            }
            SchedulerState::Ready | SchedulerState::Streaming => {}
        }

        match self.pipeline.next_packet() {
            Ok(Some(pcm)) => {
                copy_or_pad(pcm, out);
                self.state = SchedulerState::Streaming;
                StreamStatus::Continue
            }
            Ok(None) => {
                out.fill(S::SILENCE);
                self.state = SchedulerState::Completed;
                info!(frames = self.pipeline.cursor().frame_index, "stream complete");
                self.pipeline.close();
                StreamStatus::Complete
            }
            Err(err) => {
                out.fill(S::SILENCE);
                self.state = SchedulerState::Aborted;
                error!(
                    error = %err,
                    frame = self.pipeline.cursor().frame_index,
                    "stream aborted"
                );
                self.error = Some(err);
                self.pipeline.close();
                StreamStatus::Abort
            }
        }
    }
}

impl<R, C> PlaybackScheduler<R, C> {
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn cursor(&self) -> &Cursor {
        self.pipeline.cursor()
    }

    pub fn pipeline(&self) -> &PacketPipeline<R, C> {
        &self.pipeline
    }

    /// The error that aborted the stream, if any. Taking it leaves the state `Aborted`.
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_truncates_long_packets() {
        let mut out = [0i16; 4];
        assert_eq!(copy_or_pad(&[1, 2, 3, 4, 5, 6], &mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn copy_pads_short_packets_with_silence() {
        let mut out = [7u16; 4];
        assert_eq!(copy_or_pad(&[0, -1], &mut out), 2);
        assert_eq!(out, [0x8000, 0x7FFF, 0x8000, 0x8000]);
    }

    #[test]
    fn float_conversion_stays_in_range() {
        assert_eq!(f32::from_pcm16(i16::MIN), -1.0);
        assert!(f32::from_pcm16(i16::MAX) < 1.0);
        assert_eq!(f32::from_pcm16(0), f32::SILENCE);
    }
}
