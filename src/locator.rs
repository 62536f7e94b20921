//! Frame location: byte size, file offset and duration of every compressed frame.
//!
//! Everything here is immutable once built. [`FrameLocator`] is `Send + Sync` and its lookups
//! are pure, so it can be shared with other threads without locking.

use serde::Serialize;
use tracing::warn;

use crate::container::ContainerMetadata;
use crate::run_index::RunLengthIndex;
use crate::{Error, Result};

/// Fixed output sample width in bits.
pub const BITS_PER_SAMPLE: u32 = 16;

/// Per-track playback facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Track {
    /// Timescale of the sample tables; for audio tracks this is the sample rate.
    pub sample_rate: u32,

    /// Number of compressed frames (packets).
    pub total_frames: u32,

    /// Sum of all frame durations, in timescale units.
    pub total_units: u64,

    /// Output bytes per sample per channel.
    pub bytes_per_sample: u32,

    /// Largest decoded frame the codec can produce, in bytes.
    pub max_decoded_frame_bytes: u32,

    /// Interleaved channel count.
    pub channels: u32,
}

impl Track {
    /// Track duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.total_units as f64 / f64::from(self.sample_rate)
    }
}

/// Packet sizes: one value for all packets, or one per packet. Never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSizes {
    Uniform(u32),
    PerSample(Vec<u32>),
}

/// Chunk offsets plus packet sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTable {
    pub chunk_offsets: Vec<u64>,
    pub sample_sizes: SampleSizes,
}

impl ChunkTable {
    /// Size of the largest packet; used to size the reusable packet buffer.
    pub fn max_packet_size(&self) -> u32 {
        match &self.sample_sizes {
            SampleSizes::Uniform(size) => *size,
            SampleSizes::PerSample(sizes) => sizes.iter().copied().max().unwrap_or(0),
        }
    }
}

/// Resolves per-frame facts from the sample tables.
#[derive(Debug, Clone)]
pub struct FrameLocator {
    track: Track,
    chunks: ChunkTable,

    // Boundary table: 0-based first chunk → packets per chunk.
    packets_per_chunk: RunLengthIndex,

    // Run table: frame count → frame duration.
    durations: RunLengthIndex,
}

impl FrameLocator {
    /// Assemble a locator from already-built tables, checking that they describe the same
    /// number of frames.
    pub fn new(
        track: Track,
        chunks: ChunkTable,
        packets_per_chunk: RunLengthIndex,
        durations: RunLengthIndex,
    ) -> Result<Self> {
        if track.total_frames == 0 {
            return Err(Error::invalid_table("sample size", "track has no frames"));
        }

        let total = u64::from(track.total_frames);

        if durations.total_run_length() != total {
            return Err(Error::invalid_table(
                "time-to-sample",
                format!(
                    "runs cover {} frames, track has {total}",
                    durations.total_run_length()
                ),
            ));
        }

        if durations.weighted_total() != track.total_units {
            return Err(Error::invalid_table(
                "time-to-sample",
                format!(
                    "frame durations sum to {} units, track has {}",
                    durations.weighted_total(),
                    track.total_units
                ),
            ));
        }

        if let SampleSizes::PerSample(sizes) = &chunks.sample_sizes {
            if sizes.len() as u64 != total {
                return Err(Error::invalid_table(
                    "sample size",
                    format!("{} sizes for {total} frames", sizes.len()),
                ));
            }
        }

        let chunk_count = u32::try_from(chunks.chunk_offsets.len())
            .map_err(|_| Error::invalid_table("chunk offset", "too many chunks"))?;
        let packets: u64 = packets_per_chunk
            .boundary_spans(chunk_count)
            .map(|(entry, span)| u64::from(entry.value) * u64::from(span))
            .sum();
        if packets != total {
            return Err(Error::invalid_table(
                "sample-to-chunk",
                format!("{chunk_count} chunks hold {packets} frames, track has {total}"),
            ));
        }

        Ok(Self {
            track,
            chunks,
            packets_per_chunk,
            durations,
        })
    }

    /// Build the locator straight from container metadata.
    ///
    /// `max_decoded_frame_bytes` comes from the opened codec.
    pub fn from_metadata(meta: &ContainerMetadata, max_decoded_frame_bytes: u32) -> Result<Self> {
        let durations =
            RunLengthIndex::build_from_pairs("time-to-sample", meta.sample_durations.iter().copied())?;

        // stsc chunk numbers are 1-based.
        let mut boundaries = Vec::with_capacity(meta.samples_per_chunk.len());
        for &(first_chunk, samples) in &meta.samples_per_chunk {
            let start = first_chunk.checked_sub(1).ok_or_else(|| {
                Error::invalid_table("sample-to-chunk", "first chunk numbers start at 1")
            })?;
            boundaries.push((start, samples));
        }
        let packets_per_chunk = RunLengthIndex::build_from_boundaries("sample-to-chunk", boundaries)?;

        // The media header's duration may include edit padding; the frame durations are what
        // actually plays.
        let total_units = durations.weighted_total();
        if total_units != meta.duration {
            warn!(
                header = meta.duration,
                frames = total_units,
                "media duration disagrees with frame durations"
            );
        }

        let track = Track {
            sample_rate: meta.timescale,
            total_frames: meta.sample_count,
            total_units,
            bytes_per_sample: BITS_PER_SAMPLE / 8,
            max_decoded_frame_bytes,
            channels: u32::from(meta.channels),
        };

        let chunks = ChunkTable {
            chunk_offsets: meta.chunk_offsets.clone(),
            sample_sizes: meta.sample_sizes.clone(),
        };

        Self::new(track, chunks, packets_per_chunk, durations)
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn chunks(&self) -> &ChunkTable {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.chunk_offsets.len()
    }

    /// Byte offset of chunk `chunk_index` in the file.
    pub fn chunk_offset(&self, chunk_index: u32) -> Result<u64> {
        self.chunks
            .chunk_offsets
            .get(chunk_index as usize)
            .copied()
            .ok_or_else(|| {
                Error::out_of_range(
                    "chunk offset",
                    u64::from(chunk_index),
                    self.chunks.chunk_offsets.len(),
                )
            })
    }

    /// Compressed size of frame `frame_index`, in bytes.
    pub fn packet_size(&self, frame_index: u32) -> Result<u32> {
        match &self.chunks.sample_sizes {
            SampleSizes::Uniform(size) if frame_index < self.track.total_frames => Ok(*size),
            SampleSizes::Uniform(_) => Err(Error::out_of_range(
                "sample size",
                u64::from(frame_index),
                self.track.total_frames as usize,
            )),
            SampleSizes::PerSample(sizes) => sizes
                .get(frame_index as usize)
                .copied()
                .ok_or_else(|| Error::out_of_range("sample size", u64::from(frame_index), sizes.len())),
        }
    }

    /// Playback duration of frame `frame_index`, in timescale units.
    pub fn frame_duration(&self, frame_index: u32) -> u32 {
        self.durations.lookup_by_consumption(frame_index)
    }

    /// Number of frames stored in chunk `chunk_index`.
    pub fn packets_in_chunk(&self, chunk_index: u32) -> u32 {
        self.packets_per_chunk.lookup_first_match(chunk_index)
    }

    pub fn max_packet_size(&self) -> u32 {
        self.chunks.max_packet_size()
    }

    /// Sum of all frame durations, in timescale units.
    pub fn total_units(&self) -> u64 {
        self.durations.weighted_total()
    }
}
