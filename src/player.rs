//! High-level API for playing an ALAC file.
//!
//! [`Player`] does all the fallible setup once, up front: it parses the container, opens the
//! codec from the magic cookie and builds the frame index. Any problem with the file surfaces
//! here, before an audio device is touched. The player is then turned into whichever driver the
//! caller wants:
//! - [`Player::into_scheduler`] for `Direct` playback from the audio callback
//! - [`Player::spawn_decode_ahead`] for `Buffered` playback through a ring buffer
//! - [`Player::render_to_wav`] for offline rendering

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use serde::Serialize;
use tracing::{info, warn};

use crate::alac::AlacCodec;
use crate::codec::Codec;
use crate::container;
use crate::decode_ahead::{self, PlayoutConsumer, ProducerHandle};
use crate::locator::{BITS_PER_SAMPLE, FrameLocator, Track};
use crate::opts::{PlaybackMode, PlaybackOpts};
use crate::pipeline::PacketPipeline;
use crate::scheduler::PlaybackScheduler;
use crate::wav;

/// Summary of an opened track, as printed by `alac-play --probe`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackInfo {
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
    pub total_frames: u32,
    pub total_units: u64,
    pub duration_secs: f64,
    pub chunk_count: usize,
    pub max_packet_bytes: u32,
    pub frames_per_packet: u32,
    pub mode: &'static str,
}

/// An opened, validated track ready to be played.
pub struct Player<R = BufReader<File>, C = AlacCodec> {
    locator: Arc<FrameLocator>,
    reader: R,
    codec: C,
    frames_per_packet: u32,
    opts: PlaybackOpts,
}

impl Player<BufReader<File>, AlacCodec> {
    /// Open an `.m4a`/`.mp4` file containing an ALAC track.
    pub fn open(path: impl AsRef<Path>, opts: PlaybackOpts) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Self::from_reader(BufReader::new(file), opts)
            .with_context(|| format!("failed to load {}", path.display()))
    }
}

impl<R, C> Player<R, C>
where
    R: Read + Seek,
    C: Codec,
{
    /// Open a track from any seekable byte stream, using codec `C`.
    pub fn from_reader(mut reader: R, opts: PlaybackOpts) -> Result<Self> {
        let meta = container::read_metadata(&mut reader).context("failed to read container")?;
        reader.seek(SeekFrom::Start(0))?;

        let codec = C::open(&meta.magic_cookie).context("failed to open codec")?;
        let locator = FrameLocator::from_metadata(&meta, codec.max_output_frame_bytes())
            .context("failed to build frame index")?;

        let track = *locator.track();
        ensure!(track.channels > 0, "track has no audio channels");
        let frames_per_packet = match opts.frames_per_packet_hint {
            Some(hint) => hint,
            None => codec.max_output_frame_bytes() / (track.channels * track.bytes_per_sample),
        };
        ensure!(frames_per_packet > 0, "frames per packet must be positive");

        if opts.mode == PlaybackMode::Direct && opts.buffer_frames != frames_per_packet {
            warn!(
                buffer_frames = opts.buffer_frames,
                frames_per_packet,
                "direct mode buffer does not match the packet size; audio will be truncated or padded"
            );
        }

        info!(
            sample_rate = track.sample_rate,
            channels = track.channels,
            frames = track.total_frames,
            duration_secs = track.duration_secs(),
            "opened track"
        );

        Ok(Self {
            locator: Arc::new(locator),
            reader,
            codec,
            frames_per_packet,
            opts,
        })
    }

    pub fn track(&self) -> &Track {
        self.locator.track()
    }

    pub fn opts(&self) -> &PlaybackOpts {
        &self.opts
    }

    pub fn frames_per_packet(&self) -> u32 {
        self.frames_per_packet
    }

    pub fn track_info(&self) -> TrackInfo {
        let track = self.locator.track();
        TrackInfo {
            sample_rate: track.sample_rate,
            channels: track.channels,
            bits_per_sample: BITS_PER_SAMPLE,
            total_frames: track.total_frames,
            total_units: track.total_units,
            duration_secs: track.duration_secs(),
            chunk_count: self.locator.chunk_count(),
            max_packet_bytes: self.locator.max_packet_size(),
            frames_per_packet: self.frames_per_packet,
            mode: match self.opts.mode {
                PlaybackMode::Buffered => "buffered",
                PlaybackMode::Direct => "direct",
            },
        }
    }

    /// Position the reader at the first chunk and hand everything to a [`PacketPipeline`].
    pub fn into_pipeline(self) -> Result<PacketPipeline<R, C>> {
        let pipeline = PacketPipeline::new(self.locator, self.reader, self.codec, self.frames_per_packet)
            .context("failed to start packet pipeline")?;
        Ok(pipeline)
    }

    /// Build the `Direct` mode driver.
    pub fn into_scheduler(self) -> Result<PlaybackScheduler<R, C>> {
        Ok(PlaybackScheduler::new(self.into_pipeline()?))
    }

    /// Start the `Buffered` mode decoder thread.
    pub fn spawn_decode_ahead(self) -> Result<(PlayoutConsumer, ProducerHandle)>
    where
        R: Send + 'static,
        C: Send + 'static,
    {
        let track = *self.locator.track();
        let capacity = self.opts.ring_capacity_samples(track.sample_rate, track.channels);
        let pipeline = self.into_pipeline()?;
        decode_ahead::spawn(pipeline, capacity).context("failed to start decode-ahead thread")
    }

    /// Decode the whole track into `writer` as 16-bit WAV. Returns the frames written.
    pub fn render_to_wav<W: Write + Seek>(self, writer: W) -> Result<u64> {
        let mut pipeline = self.into_pipeline()?;
        wav::render_to_wav(&mut pipeline, writer)
    }

    /// Decode the whole track into a WAV file at `path`.
    pub fn render_file_to_wav(self, path: impl AsRef<Path>) -> Result<u64> {
        let mut pipeline = self.into_pipeline()?;
        wav::render_file_to_wav(&mut pipeline, path)
    }
}
