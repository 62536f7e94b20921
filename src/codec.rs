//! Boundary to the compressed-audio decoder.
//!
//! The scheduler only needs four capabilities from a decoder: open from a magic cookie, report
//! the largest decoded frame, decode one packet, and close. [`Codec`] captures exactly that so
//! the playback pipeline does not depend on a specific decoder implementation.

use crate::{Error, Result};

/// A stateful packet decoder.
///
/// Decoded output is interleaved signed 16-bit PCM, one sample per channel per frame.
pub trait Codec {
    /// Initialize from the codec's magic cookie.
    ///
    /// Fails with [`Error::Init`] on malformed or unrecognized cookie bytes.
    fn open(cookie: &[u8]) -> Result<Self>
    where
        Self: Sized;

    /// Largest decoded frame in bytes. Queried once after `open` to size reusable buffers.
    fn max_output_frame_bytes(&self) -> u32;

    /// Decode one compressed packet into `out`, returning the number of sample frames written.
    ///
    /// `out` must hold at least `max_output_frame_bytes() / 2` samples. Fails with
    /// [`Error::Decode`] on corrupt packet data.
    fn decode(
        &mut self,
        packet: &[u8],
        frames_per_packet: u32,
        channels: u32,
        out: &mut [i16],
    ) -> Result<usize>;

    /// Release decoder resources. Safe to call more than once.
    fn close(&mut self);
}

/// Length of the fixed part of an ALAC magic cookie (`ALACSpecificConfig`).
pub const ALAC_CONFIG_LEN: usize = 24;

/// Largest frame length accepted from a cookie. Encoders use 4096.
pub const MAX_FRAME_LENGTH: u32 = 65_536;

/// Decoded `ALACSpecificConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlacConfig {
    /// Sample frames per packet.
    pub frame_length: u32,
    pub compatible_version: u8,
    pub bit_depth: u8,
    pub rice_history_mult: u8,
    pub rice_initial_history: u8,
    pub rice_limit: u8,
    pub num_channels: u8,
    pub max_run: u16,

    /// Largest compressed packet, or 0 if unknown.
    pub max_frame_bytes: u32,
    pub avg_bit_rate: u32,
    pub sample_rate: u32,
}

impl AlacConfig {
    /// Parse the big-endian cookie. Trailing bytes (a channel layout box) are ignored.
    pub fn parse(cookie: &[u8]) -> Result<Self> {
        let c = cookie.get(..ALAC_CONFIG_LEN).ok_or_else(|| {
            Error::Init(format!(
                "magic cookie is {} bytes, need at least {ALAC_CONFIG_LEN}",
                cookie.len()
            ))
        })?;

        let be32 = |at: usize| u32::from_be_bytes([c[at], c[at + 1], c[at + 2], c[at + 3]]);
        let config = Self {
            frame_length: be32(0),
            compatible_version: c[4],
            bit_depth: c[5],
            rice_history_mult: c[6],
            rice_initial_history: c[7],
            rice_limit: c[8],
            num_channels: c[9],
            max_run: u16::from_be_bytes([c[10], c[11]]),
            max_frame_bytes: be32(12),
            avg_bit_rate: be32(16),
            sample_rate: be32(20),
        };

        if config.frame_length == 0 {
            return Err(Error::Init("frame length is zero".into()));
        }
        if config.frame_length > MAX_FRAME_LENGTH {
            return Err(Error::Init(format!(
                "frame length {} exceeds {MAX_FRAME_LENGTH}",
                config.frame_length
            )));
        }
        if config.num_channels == 0 {
            return Err(Error::Init("channel count is zero".into()));
        }
        if !matches!(config.bit_depth, 16 | 20 | 24 | 32) {
            return Err(Error::Init(format!("unsupported bit depth {}", config.bit_depth)));
        }

        if config.checked_output_frame_bytes().is_none() {
            return Err(Error::Init("decoded frame size overflows".into()));
        }

        Ok(config)
    }

    fn checked_output_frame_bytes(&self) -> Option<u32> {
        self.frame_length
            .checked_mul(u32::from(self.num_channels))?
            .checked_mul(2)
    }

    /// Size of one decoded packet as interleaved 16-bit PCM.
    pub fn max_output_frame_bytes(&self) -> u32 {
        self.checked_output_frame_bytes().unwrap_or(u32::MAX)
    }
}
