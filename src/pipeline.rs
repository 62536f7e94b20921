//! The sequential decode pipeline: locate → read → decode, one packet per step.
//!
//! `PacketPipeline` owns the only mutable traversal state (the [`Cursor`]) together with the
//! packet source, the codec and two reusable buffers. The buffers are sized once at
//! construction, so stepping the pipeline performs no allocation of its own.

use std::io::{Read, Seek};
use std::sync::Arc;

use crate::codec::Codec;
use crate::locator::FrameLocator;
use crate::source::PacketSource;
use crate::{Error, Result};

/// Playback position.
///
/// Advances monotonically; there is no way to rewind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Index of the next compressed frame to decode.
    pub frame_index: u32,

    /// Chunk that holds `frame_index`.
    pub current_chunk: u32,

    /// File offset of the next packet.
    pub byte_offset: u64,

    /// Frames of `current_chunk` not yet read.
    pub frames_left_in_chunk: u32,
}

/// Locator + packet source + codec, stepped one packet at a time.
pub struct PacketPipeline<R, C> {
    locator: Arc<FrameLocator>,
    source: PacketSource<R>,
    codec: C,
    cursor: Cursor,
    frames_per_packet: u32,
    packet_buf: Vec<u8>,
    pcm_buf: Vec<i16>,
}

impl<R, C> PacketPipeline<R, C>
where
    R: Read + Seek,
    C: Codec,
{
    /// Position `reader` at the first chunk and allocate the packet and PCM buffers.
    ///
    /// `frames_per_packet` is passed to the codec as its per-packet decode hint.
    pub fn new(locator: Arc<FrameLocator>, reader: R, codec: C, frames_per_packet: u32) -> Result<Self> {
        let channels = locator.track().channels;
        if !(1..=2).contains(&channels) {
            return Err(Error::Container(format!(
                "{channels} channels; only mono and stereo are supported"
            )));
        }

        let source = PacketSource::open(reader, &locator.chunks().chunk_offsets)?;

        let pcm_len = codec.max_output_frame_bytes() as usize / 2;
        let needed = frames_per_packet
            .checked_mul(channels)
            .and_then(|n| usize::try_from(n).ok());
        if !needed.is_some_and(|n| n <= pcm_len) {
            return Err(Error::Init(format!(
                "decoder output of {pcm_len} samples cannot hold {frames_per_packet} frames"
            )));
        }

        let cursor = Cursor {
            frame_index: 0,
            current_chunk: 0,
            byte_offset: source.position(),
            frames_left_in_chunk: locator.packets_in_chunk(0),
        };

        Ok(Self {
            packet_buf: vec![0; locator.max_packet_size() as usize],
            pcm_buf: vec![0; pcm_len],
            locator,
            source,
            codec,
            cursor,
            frames_per_packet,
        })
    }

    /// Decode the next packet.
    ///
    /// Returns `Ok(None)` once every frame has been decoded. The returned slice is interleaved
    /// PCM and stays valid until the next call.
    pub fn next_packet(&mut self) -> Result<Option<&[i16]>> {
        let frame = self.cursor.frame_index;
        if frame >= self.locator.track().total_frames {
            return Ok(None);
        }

        // Chunks may be followed by unrelated data; jump to the next chunk's offset.
        while self.cursor.frames_left_in_chunk == 0 {
            let next = self.cursor.current_chunk + 1;
            let offset = self.locator.chunk_offset(next)?;
            self.source.skip_to(offset)?;
            self.cursor.current_chunk = next;
            self.cursor.frames_left_in_chunk = self.locator.packets_in_chunk(next);
        }

        let size = self.locator.packet_size(frame)? as usize;
        let packet = &mut self.packet_buf[..size];
        self.source.read_exactly(packet)?;

        let channels = self.locator.track().channels;
        let frames = self.codec.decode(
            &self.packet_buf[..size],
            self.frames_per_packet,
            channels,
            &mut self.pcm_buf,
        )?;

        self.cursor.frame_index += 1;
        self.cursor.frames_left_in_chunk -= 1;
        self.cursor.byte_offset = self.source.position();

        Ok(Some(&self.pcm_buf[..frames * channels as usize]))
    }

    /// Release the codec. Further `next_packet` calls fail with the codec's error.
    pub fn close(&mut self) {
        self.codec.close();
    }
}

impl<R, C> PacketPipeline<R, C> {
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn locator(&self) -> &FrameLocator {
        &self.locator
    }

    pub fn channels(&self) -> u32 {
        self.locator.track().channels
    }

    pub fn frames_per_packet(&self) -> u32 {
        self.frames_per_packet
    }

    /// Whether every frame has been decoded.
    pub fn is_exhausted(&self) -> bool {
        self.cursor.frame_index >= self.locator.track().total_frames
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn source(&self) -> &PacketSource<R> {
        &self.source
    }
}
