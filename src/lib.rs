//! `alac-play`: frame-accurate playback of Apple Lossless audio stored in MP4 containers.
//!
//! This crate provides:
//! - MP4 sample-table parsing and a run-length frame index
//! - A forward-only packet reader and an ALAC codec boundary (backed by Symphonia)
//! - Two playback drivers: `Direct` (decode inside the audio callback) and `Buffered`
//!   (decode ahead on a background thread into a lock-free ring)
//! - Offline rendering to WAV
//!
//! Most consumers should start with [`Player`].

// High-level API (most consumers should start here).
pub mod opts;
pub mod player;

// Container parsing and frame indexing.
pub mod container;
pub mod locator;
pub mod run_index;

// Reading and decoding packets.
pub mod alac;
pub mod codec;
pub mod pipeline;
pub mod source;

// Playback drivers and offline output.
pub mod decode_ahead;
pub mod scheduler;
pub mod wav;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

mod error;

pub use error::{Error, Result};
pub use opts::{PlaybackMode, PlaybackOpts};
pub use player::{Player, TrackInfo};
pub use scheduler::{OutputSample, StreamStatus};
