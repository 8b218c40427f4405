//! Buffered read stream over a store descriptor.
//!
//! Reads are served from a read-ahead buffer refilled with one large store
//! read at the file cursor. Seeking elsewhere invalidates the buffer; seeking
//! to the current position keeps it.

use std::io::{self, SeekFrom};

use cfs_ufs_store::{Errno, Fd, OwnedHandle, Stat};

use crate::buffer_pool::PooledBuffer;
use crate::error::UfsError;

/// Sequential, buffered reader for one store file.
#[derive(Debug)]
pub struct BufferedReadStream {
    handle: Option<OwnedHandle>,
    fd: Fd,
    path: String,
    buffer: Option<PooledBuffer>,
    /// Store offset of the next byte returned to the caller.
    file_offset: u64,
    /// Next unread index in `buffer`.
    buffer_offset: usize,
    /// Valid bytes in `buffer`.
    buffer_len: usize,
    closed: bool,
}

impl BufferedReadStream {
    /// Wrap an open descriptor.
    ///
    /// # Arguments
    /// * `handle` - Readable descriptor, owned by the stream from now on
    /// * `buffer` - Read-ahead buffer; its length is the store read size
    pub fn new(handle: OwnedHandle, buffer: PooledBuffer) -> Self {
        Self {
            fd: handle.fd(),
            path: handle.path().to_string(),
            handle: Some(handle),
            buffer: Some(buffer),
            file_offset: 0,
            buffer_offset: 0,
            buffer_len: 0,
            closed: false,
        }
    }

    /// Read one byte.
    ///
    /// # Returns
    /// `None` at end of file.
    pub fn read_byte(&mut self) -> Result<Option<u8>, UfsError> {
        if !self.fill()? {
            return Ok(None);
        }
        let byte: u8 = self.buffered()[self.buffer_offset];
        self.advance(1);
        Ok(Some(byte))
    }

    /// Read up to `buf.len()` bytes from the buffered window.
    ///
    /// Returns at most what is left in the current window, so a single call
    /// never spans two store reads.
    ///
    /// # Returns
    /// Number of bytes copied, or `None` at end of file.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, UfsError> {
        if buf.is_empty() {
            self.ensure_open()?;
            return Ok(Some(0));
        }
        if !self.fill()? {
            return Ok(None);
        }
        let available: &[u8] = &self.buffered()[self.buffer_offset..self.buffer_len];
        let n: usize = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.advance(n);
        Ok(Some(n))
    }

    /// Read up to `len` bytes into `buf[offset..]`.
    ///
    /// # Errors
    /// A `Store` error with `EINVAL` when the range falls outside `buf`.
    pub fn read_into(
        &mut self,
        buf: &mut [u8],
        offset: usize,
        len: usize,
    ) -> Result<Option<usize>, UfsError> {
        let end: usize = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > buf.len() {
            return Err(UfsError::Store {
                path: self.path.clone(),
                code: Errno::EINVAL,
            });
        }
        self.read(&mut buf[offset..end])
    }

    /// Move the cursor to `pos`.
    ///
    /// Seeking to the current position keeps the buffered window; any other
    /// target discards it so the next read fetches at the new offset.
    pub fn seek(&mut self, pos: u64) -> Result<(), UfsError> {
        self.ensure_open()?;
        if pos == self.file_offset {
            return Ok(());
        }
        tracing::trace!(fd = self.fd.0, from = self.file_offset, to = pos, "seek");
        self.file_offset = pos;
        self.buffer_offset = 0;
        self.buffer_len = 0;
        Ok(())
    }

    /// Current read position.
    pub fn pos(&self) -> u64 {
        self.file_offset
    }

    /// Mark and reset are not supported.
    pub fn mark_supported(&self) -> bool {
        false
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the descriptor and return the buffer to its pool.
    ///
    /// The buffer is returned even when the store close fails. Closing an
    /// already closed stream does nothing.
    pub fn close(&mut self) -> Result<(), UfsError> {
        if self.closed {
            return Ok(());
        }
        tracing::debug!(fd = self.fd.0, path = %self.path, "closing read stream");
        self.closed = true;
        self.buffer = None;
        self.buffer_offset = 0;
        self.buffer_len = 0;

        match self.handle.take() {
            Some(handle) => handle.close().map_err(|code| {
                tracing::error!(fd = self.fd.0, path = %self.path, "close failed: {}", code);
                UfsError::CloseFailed { fd: self.fd.0, code }
            }),
            None => Ok(()),
        }
    }

    fn ensure_open(&self) -> Result<(), UfsError> {
        if self.closed {
            return Err(UfsError::StreamClosed {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    /// Refill the window if it is exhausted.
    ///
    /// # Returns
    /// `true` if unread bytes are available, `false` at end of file.
    fn fill(&mut self) -> Result<bool, UfsError> {
        self.ensure_open()?;
        if self.buffer_offset < self.buffer_len {
            return Ok(true);
        }

        let (handle, buffer) = match (self.handle.as_ref(), self.buffer.as_mut()) {
            (Some(handle), Some(buffer)) => (handle, buffer),
            _ => {
                return Err(UfsError::StreamClosed {
                    path: self.path.clone(),
                })
            }
        };
        let n: usize = handle
            .read(buffer, self.file_offset)
            .map_err(|code| UfsError::from_errno(code, &self.path))?;
        tracing::trace!(fd = self.fd.0, offset = self.file_offset, len = n, "fill");
        if n > buffer.len() {
            tracing::error!(
                fd = self.fd.0,
                reported = n,
                capacity = buffer.len(),
                "store reported more bytes than requested"
            );
            return Err(UfsError::Store {
                path: self.path.clone(),
                code: Errno::EIO,
            });
        }

        self.buffer_offset = 0;
        self.buffer_len = n;
        Ok(n > 0)
    }

    fn buffered(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }

    fn advance(&mut self, n: usize) {
        self.buffer_offset += n;
        self.file_offset += n as u64;
    }

    /// Length of the file as the store currently reports it.
    fn file_len(&self) -> Result<u64, UfsError> {
        let handle: &OwnedHandle = self.handle.as_ref().ok_or_else(|| UfsError::StreamClosed {
            path: self.path.clone(),
        })?;
        let stat: Stat = handle
            .client()
            .get_attr(&self.path)
            .map_err(|code| UfsError::from_errno(code, &self.path))?;
        Ok(stat.size)
    }
}

impl io::Read for BufferedReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(BufferedReadStream::read(self, buf)?.unwrap_or(0))
    }
}

impl io::Seek for BufferedReadStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target: Option<u64> = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.file_offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.file_len()?.checked_add_signed(delta),
        };
        let target: u64 = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        BufferedReadStream::seek(self, target)?;
        Ok(target)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.file_offset)
    }
}

impl Drop for BufferedReadStream {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                tracing::warn!(path = %self.path, "Dropping unclosed read stream: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cfs_ufs_store::{CallCounts, FaultPlan, MemoryStoreClient, OpenFlags, StoreClient};

    use crate::buffer_pool::{BufferPool, BufferPoolConfig};

    fn open_stream(
        store: &Arc<MemoryStoreClient>,
        pool: &BufferPool,
        path: &str,
        buffer_size: usize,
    ) -> BufferedReadStream {
        let client: Arc<dyn StoreClient> = store.clone();
        let handle: OwnedHandle = OwnedHandle::open(client, path, OpenFlags::RDONLY, 0).unwrap();
        BufferedReadStream::new(handle, pool.acquire(buffer_size))
    }

    #[test]
    fn test_overreported_read_is_an_error() {
        let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
        store.put_file("/f", b"abcdef");
        let pool: BufferPool = BufferPool::default();
        let mut stream: BufferedReadStream = open_stream(&store, &pool, "/f", 4);
        store.set_faults(FaultPlan {
            read_overreport: Some(3),
            ..Default::default()
        });

        let mut buf: [u8; 8] = [0; 8];
        let err: UfsError = stream.read(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            UfsError::Store {
                code: Errno::EIO,
                ..
            }
        ));
        stream.close().unwrap();
    }

    #[test]
    fn test_read_bytes_until_eof() {
        let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
        store.put_file("/f", b"abc");
        let pool: BufferPool = BufferPool::default();
        let mut stream: BufferedReadStream = open_stream(&store, &pool, "/f", 2);

        assert_eq!(stream.read_byte().unwrap(), Some(b'a'));
        assert_eq!(stream.read_byte().unwrap(), Some(b'b'));
        assert_eq!(stream.read_byte().unwrap(), Some(b'c'));
        assert_eq!(stream.read_byte().unwrap(), None);
        assert_eq!(stream.read_byte().unwrap(), None);
        assert_eq!(stream.pos(), 3);
    }

    #[test]
    fn test_high_bytes_are_unsigned() {
        let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
        store.put_file("/f", &[0xFF, 0x80]);
        let pool: BufferPool = BufferPool::default();
        let mut stream: BufferedReadStream = open_stream(&store, &pool, "/f", 8);

        assert_eq!(stream.read_byte().unwrap(), Some(255));
        assert_eq!(stream.read_byte().unwrap(), Some(128));
    }

    #[test]
    fn test_read_never_spans_windows() {
        let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
        store.put_file("/f", b"0123456789");
        let pool: BufferPool = BufferPool::default();
        let mut stream: BufferedReadStream = open_stream(&store, &pool, "/f", 4);

        let mut buf: [u8; 16] = [0; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), Some(4));
        assert_eq!(&buf[..4], b"0123");
        assert_eq!(stream.read(&mut buf[..2]).unwrap(), Some(2));
        assert_eq!(&buf[..2], b"45");
        assert_eq!(stream.read(&mut buf).unwrap(), Some(2));
        assert_eq!(stream.read(&mut buf).unwrap(), Some(2));
        assert_eq!(stream.read(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_seek_to_current_position_keeps_window() {
        let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
        store.put_file("/f", b"0123456789");
        let pool: BufferPool = BufferPool::default();
        let mut stream: BufferedReadStream = open_stream(&store, &pool, "/f", 8);

        stream.read_byte().unwrap();
        stream.seek(1).unwrap();
        stream.read_byte().unwrap();
        assert_eq!(store.calls().reads, 1);

        stream.seek(7).unwrap();
        assert_eq!(stream.read_byte().unwrap(), Some(b'7'));
        let calls: CallCounts = store.calls();
        assert_eq!(calls.read_log, vec![(0, 8), (7, 8)]);
    }

    #[test]
    fn test_read_into_range() {
        let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
        store.put_file("/f", b"xyz");
        let pool: BufferPool = BufferPool::default();
        let mut stream: BufferedReadStream = open_stream(&store, &pool, "/f", 8);

        let mut buf: [u8; 6] = [0; 6];
        assert_eq!(stream.read_into(&mut buf, 2, 3).unwrap(), Some(3));
        assert_eq!(&buf, b"\0\0xyz\0");
        assert!(stream.read_into(&mut buf, 5, 3).is_err());
    }

    #[test]
    fn test_close_returns_buffer_even_on_failure() {
        let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
        store.put_file("/f", b"data");
        let pool: BufferPool = BufferPool::new(BufferPoolConfig::with_max_idle(4));
        let mut stream: BufferedReadStream = open_stream(&store, &pool, "/f", 8);
        store.set_faults(FaultPlan {
            close_error: Some(Errno::EIO),
            ..Default::default()
        });

        let err: UfsError = stream.close().unwrap_err();
        assert!(matches!(err, UfsError::CloseFailed { .. }));
        assert_eq!(pool.stats().idle_buffers, 1);
        assert_eq!(pool.stats().in_use_buffers, 0);

        stream.close().unwrap();
        assert!(matches!(
            stream.read_byte().unwrap_err(),
            UfsError::StreamClosed { .. }
        ));
        assert!(!stream.mark_supported());
    }

    #[test]
    fn test_io_seek_from_end() {
        use std::io::{Read, Seek};

        let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
        store.put_file("/f", b"hello world");
        let pool: BufferPool = BufferPool::default();
        let mut stream: BufferedReadStream = open_stream(&store, &pool, "/f", 4);

        let pos: u64 = Seek::seek(&mut stream, SeekFrom::End(-5)).unwrap();
        assert_eq!(pos, 6);
        let mut out: String = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "world");

        assert!(Seek::seek(&mut stream, SeekFrom::Current(-100)).is_err());
    }
}
