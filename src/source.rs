//! Forward-only packet reader over the container's media data.

use std::io::{self, Read, Seek, SeekFrom};

use tracing::debug;

use crate::{Error, Result};

/// Sequential reader that hands out packets one at a time.
///
/// The stream is positioned once, at the first chunk, when the source is opened. After that it
/// only moves forward: by reading packets, or by skipping the gap up to the next chunk.
pub struct PacketSource<R> {
    inner: R,
    position: u64,
    packets_read: u64,
}

impl<R> PacketSource<R>
where
    R: Read + Seek,
{
    /// Seek to the first chunk.
    ///
    /// Chunk offsets must be strictly increasing; anything else means packets are not stored in
    /// playback order and fails with [`Error::UnsupportedLayout`].
    pub fn open(mut inner: R, chunk_offsets: &[u64]) -> Result<Self> {
        if let Some(i) = chunk_offsets.windows(2).position(|w| w[0] >= w[1]) {
            return Err(Error::UnsupportedLayout(format!(
                "chunk {} at offset {} does not follow chunk {} at offset {}",
                i + 1,
                chunk_offsets[i + 1],
                i,
                chunk_offsets[i]
            )));
        }

        let first = chunk_offsets.first().copied().ok_or_else(|| {
            Error::out_of_range("chunk offset", 0, 0)
        })?;
        inner.seek(SeekFrom::Start(first))?;
        debug!(offset = first, chunks = chunk_offsets.len(), "packet source positioned");

        Ok(Self {
            inner,
            position: first,
            packets_read: 0,
        })
    }

    /// Fill `buf` with the next `buf.len()` bytes.
    ///
    /// Fails with [`Error::ShortRead`] if the stream ends or errors first. The position is left
    /// past whatever was read, so a failed source should not be used again.
    pub fn read_exactly(&mut self, buf: &mut [u8]) -> Result<()> {
        let start = self.position;
        let mut got = 0;
        while got < buf.len() {
            match self.inner.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.position += got as u64;
                    return Err(Error::ShortRead {
                        offset: start,
                        expected: buf.len(),
                        got,
                        source: Some(e),
                    });
                }
            }
        }

        self.position += got as u64;
        if got < buf.len() {
            return Err(Error::ShortRead {
                offset: start,
                expected: buf.len(),
                got,
                source: None,
            });
        }

        self.packets_read += 1;
        Ok(())
    }

    /// Move forward to `offset`, skipping any bytes in between.
    ///
    /// An offset behind the current position fails with [`Error::UnsupportedLayout`].
    pub fn skip_to(&mut self, offset: u64) -> Result<()> {
        if offset < self.position {
            return Err(Error::UnsupportedLayout(format!(
                "chunk at offset {offset} starts before the current read position {}",
                self.position
            )));
        }
        if offset > self.position {
            self.inner.seek(SeekFrom::Start(offset))?;
            self.position = offset;
        }
        Ok(())
    }

    /// Current byte offset in the file.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of packets read completely so far.
    pub fn packets_read(&self) -> u64 {
        self.packets_read
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
