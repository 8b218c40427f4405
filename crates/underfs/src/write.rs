//! Buffered write stream over a store descriptor.
//!
//! Bytes accumulate in a fixed-capacity buffer and are committed to the
//! store one full buffer at a time, at the stream's commit offset. The store
//! sees the same sequence of committed bytes no matter how the caller chunks
//! its writes.

use std::io;

use cfs_ufs_store::{Errno, Fd, OwnedHandle};

use crate::error::UfsError;

/// Sequential, buffered writer for one store file.
///
/// Exclusive access per instance is enforced by `&mut self`; wrap the stream
/// in a `Mutex` to share it.
#[derive(Debug)]
pub struct BufferedWriteStream {
    handle: Option<OwnedHandle>,
    fd: Fd,
    path: String,
    buffer: Vec<u8>,
    capacity: usize,
    /// Store offset of the first byte in `buffer`.
    commit_offset: u64,
    closed: bool,
    /// Set once a commit or flush has failed; the stream accepts no more data.
    broken: bool,
}

impl BufferedWriteStream {
    /// Wrap an open descriptor.
    ///
    /// # Arguments
    /// * `handle` - Writable descriptor, owned by the stream from now on
    /// * `offset` - Store offset of the first byte written
    /// * `buffer_size` - Bytes held before a commit
    pub fn new(handle: OwnedHandle, offset: u64, buffer_size: usize) -> Self {
        let capacity: usize = buffer_size.max(1);
        Self {
            fd: handle.fd(),
            path: handle.path().to_string(),
            handle: Some(handle),
            buffer: Vec::with_capacity(capacity),
            capacity,
            commit_offset: offset,
            closed: false,
            broken: false,
        }
    }

    /// Append one byte, committing if the buffer becomes full.
    ///
    /// # Errors
    /// `StreamClosed` after close; commit errors otherwise.
    pub fn write_byte(&mut self, byte: u8) -> Result<(), UfsError> {
        self.ensure_writable()?;
        self.buffer.push(byte);
        if self.buffer.len() == self.capacity {
            self.commit()?;
        }
        Ok(())
    }

    /// Append `data`, committing each time the buffer fills.
    ///
    /// At most one partially filled buffer is held when this returns.
    ///
    /// # Errors
    /// `StreamClosed` after close; commit errors otherwise.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), UfsError> {
        self.ensure_writable()?;
        let mut remaining: &[u8] = data;
        while !remaining.is_empty() {
            let room: usize = self.capacity - self.buffer.len();
            let take: usize = room.min(remaining.len());
            self.buffer.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            if self.buffer.len() == self.capacity {
                self.commit()?;
            }
        }
        Ok(())
    }

    /// Append `len` bytes of `data` starting at `offset`.
    ///
    /// # Errors
    /// A `Store` error with `EINVAL` when the range falls outside `data`.
    pub fn write_range(&mut self, data: &[u8], offset: usize, len: usize) -> Result<(), UfsError> {
        let end: usize = offset.checked_add(len).unwrap_or(usize::MAX);
        match data.get(offset..end) {
            Some(slice) => self.write_bytes(slice),
            None => Err(UfsError::Store {
                path: self.path.clone(),
                code: Errno::EINVAL,
            }),
        }
    }

    /// Commit buffered bytes and ask the store to make them durable.
    ///
    /// # Errors
    /// `StreamClosed` after close, `ShortWrite` or `FlushFailed` on store
    /// failure.
    pub fn flush(&mut self) -> Result<(), UfsError> {
        self.ensure_writable()?;
        self.commit_and_flush()
    }

    /// Flush, then release the buffer and the descriptor.
    ///
    /// The descriptor is closed even when the flush fails. A close failure
    /// is attached to the flush failure rather than replacing it. A broken
    /// stream is not flushed again; if it still holds bytes, close reports
    /// `StreamBroken`. Closing an already closed stream does nothing.
    pub fn close(&mut self) -> Result<(), UfsError> {
        if self.closed {
            return Ok(());
        }
        tracing::debug!(fd = self.fd.0, path = %self.path, "closing write stream");

        let flushed: Result<(), UfsError> = if !self.broken {
            self.commit_and_flush()
        } else if !self.buffer.is_empty() {
            tracing::warn!(
                fd = self.fd.0,
                path = %self.path,
                lost = self.buffer.len(),
                "closing broken stream with uncommitted bytes"
            );
            Err(UfsError::StreamBroken {
                path: self.path.clone(),
            })
        } else {
            Ok(())
        };

        self.buffer = Vec::new();
        self.closed = true;
        let released: Result<(), UfsError> = match self.handle.take() {
            Some(handle) => handle.close().map_err(|code| UfsError::CloseFailed {
                fd: self.fd.0,
                code,
            }),
            None => Ok(()),
        };

        let result: Result<(), UfsError> = UfsError::combine(flushed, released);
        if let Err(e) = &result {
            tracing::error!(fd = self.fd.0, path = %self.path, "close failed: {}", e);
        }
        result
    }

    /// Store offset at which the next commit lands.
    pub fn commit_offset(&self) -> u64 {
        self.commit_offset
    }

    /// Total bytes accepted so far, committed or not.
    pub fn position(&self) -> u64 {
        self.commit_offset + self.buffer.len() as u64
    }

    /// Bytes waiting in the buffer.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_writable(&self) -> Result<(), UfsError> {
        if self.closed {
            return Err(UfsError::StreamClosed {
                path: self.path.clone(),
            });
        }
        if self.broken {
            return Err(UfsError::StreamBroken {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    fn commit_and_flush(&mut self) -> Result<(), UfsError> {
        self.commit()?;
        let handle: &OwnedHandle = self.live_handle()?;
        if let Err(code) = handle.flush() {
            self.broken = true;
            return Err(UfsError::FlushFailed { fd: self.fd.0, code });
        }
        Ok(())
    }

    /// Write the whole buffer at the commit offset in one store call.
    fn commit(&mut self) -> Result<(), UfsError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let expected: usize = self.buffer.len();
        let handle: &OwnedHandle = self.live_handle()?;
        let written: Result<usize, Errno> = handle.write(&self.buffer, self.commit_offset);
        tracing::trace!(
            fd = self.fd.0,
            offset = self.commit_offset,
            len = expected,
            "commit"
        );

        match written {
            Ok(actual) if actual == expected => {
                self.commit_offset += expected as u64;
                self.buffer.clear();
                Ok(())
            }
            Ok(actual) => {
                self.broken = true;
                Err(UfsError::ShortWrite {
                    fd: self.fd.0,
                    expected,
                    actual,
                })
            }
            Err(code) => {
                self.broken = true;
                Err(UfsError::from_errno(code, &self.path))
            }
        }
    }

    fn live_handle(&self) -> Result<&OwnedHandle, UfsError> {
        self.handle.as_ref().ok_or_else(|| UfsError::StreamClosed {
            path: self.path.clone(),
        })
    }
}

impl io::Write for BufferedWriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        BufferedWriteStream::flush(self)?;
        Ok(())
    }
}

impl Drop for BufferedWriteStream {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                tracing::warn!(path = %self.path, "Dropping unclosed write stream: {}", e);
            }
        }
    }
}
