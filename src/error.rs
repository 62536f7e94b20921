use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// alac-play's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// alac-play's crate-wide error type.
///
/// The variants follow how a failure should be handled rather than where it came from:
/// - `Container` and `Init` are configuration errors, reported once before playback starts.
/// - `InvalidTable`, `IndexOutOfRange` and `UnsupportedLayout` mean the container is corrupt
///   or laid out in a way we cannot stream sequentially.
/// - `ShortRead` and `Decode` end the current stream. There is no retry and no packet skipping.
///
/// This is intentionally decoupled from `anyhow` so downstream libraries aren't forced to
/// adopt `anyhow` in their own public APIs.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid {table} table: {reason}")]
    InvalidTable { table: &'static str, reason: String },

    #[error("{table} index {index} out of range (len {len})")]
    IndexOutOfRange {
        table: &'static str,
        index: u64,
        len: usize,
    },

    #[error("short read at offset {offset}: expected {expected} bytes, got {got}")]
    ShortRead {
        offset: u64,
        expected: usize,
        got: usize,
        #[source]
        source: Option<io::Error>,
    },

    #[error("unsupported media layout: {0}")]
    UnsupportedLayout(String),

    #[error("codec init failed: {0}")]
    Init(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("container: {0}")]
    Container(String),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn invalid_table(table: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidTable {
            table,
            reason: reason.into(),
        }
    }

    pub(crate) fn out_of_range(table: &'static str, index: u64, len: usize) -> Self {
        Self::IndexOutOfRange { table, index, len }
    }

    /// Whether this error ends a stream that was already playing, as opposed to one that
    /// should have been caught before playback began.
    pub fn is_stream_fatal(&self) -> bool {
        matches!(self, Self::ShortRead { .. } | Self::Decode(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_read_and_decode_are_stream_fatal() {
        let short = Error::ShortRead {
            offset: 10,
            expected: 4,
            got: 1,
            source: None,
        };
        assert!(short.is_stream_fatal());
        assert!(Error::Decode("bad frame".into()).is_stream_fatal());
        assert!(!Error::Init("bad cookie".into()).is_stream_fatal());
        assert!(!Error::out_of_range("chunk offset", 3, 2).is_stream_fatal());
    }

    #[test]
    fn display_includes_table_context() {
        let err = Error::out_of_range("sample size", 7, 5);
        assert_eq!(err.to_string(), "sample size index 7 out of range (len 5)");

        let err = Error::invalid_table("time-to-sample", "zero-length run at entry 1");
        assert_eq!(
            err.to_string(),
            "invalid time-to-sample table: zero-length run at entry 1"
        );
    }

    #[test]
    fn anyhow_errors_keep_their_context_chain() {
        let inner = anyhow::anyhow!("disk gone");
        let err: Error = inner.context("opening track").into();
        assert_eq!(err.to_string(), "opening track: disk gone");
    }
}
