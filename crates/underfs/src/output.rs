//! Output streams returned by `create`.
//!
//! A direct stream writes the target file in place. An atomic stream writes
//! a uniquely named sibling and renames it onto the target on close, so
//! readers never observe a partially written file.

use std::fmt;
use std::io;
use std::sync::Arc;

use cfs_ufs_store::{Errno, StoreClient};

use crate::error::UfsError;
use crate::write::BufferedWriteStream;

/// Sibling path used while an atomic create is in progress.
///
/// # Arguments
/// * `path` - Final store path
pub fn temporary_path(path: &str) -> String {
    format!("{}.{}.tmp", path, uuid::Uuid::new_v4().simple())
}

// ============================================================================
// Atomic Write Stream
// ============================================================================

/// Write stream that publishes its file on close.
///
/// Dropping the stream without closing it abandons the write and removes
/// the temporary file.
pub struct AtomicWriteStream {
    inner: BufferedWriteStream,
    client: Arc<dyn StoreClient>,
    temporary_path: String,
    final_path: String,
    finished: bool,
}

impl AtomicWriteStream {
    /// Wrap a stream already writing `temporary_path`.
    ///
    /// # Arguments
    /// * `inner` - Stream writing the temporary file
    /// * `client` - Store client used to rename or remove the temporary file
    /// * `temporary_path` - Path `inner` writes to
    /// * `final_path` - Path the file is published under
    pub fn new(
        inner: BufferedWriteStream,
        client: Arc<dyn StoreClient>,
        temporary_path: impl Into<String>,
        final_path: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            client,
            temporary_path: temporary_path.into(),
            final_path: final_path.into(),
            finished: false,
        }
    }

    pub fn temporary_path(&self) -> &str {
        &self.temporary_path
    }

    pub fn final_path(&self) -> &str {
        &self.final_path
    }

    /// Close the temporary file and rename it onto the final path,
    /// replacing any existing file there.
    ///
    /// On failure the temporary file is removed and the final path is left
    /// as it was.
    pub fn close(&mut self) -> Result<(), UfsError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if let Err(e) = self.inner.close() {
            return Err(self.discard(e));
        }
        match self.publish() {
            Ok(()) => {
                tracing::debug!(from = %self.temporary_path, to = %self.final_path, "published");
                Ok(())
            }
            Err(e) => Err(self.discard(e)),
        }
    }

    /// Close and remove the temporary file without publishing it.
    pub fn abort(&mut self) -> Result<(), UfsError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let closed: Result<(), UfsError> = self.inner.close();
        let removed: Result<(), UfsError> = self.remove_temporary();
        UfsError::combine(closed, removed)
    }

    fn publish(&self) -> Result<(), UfsError> {
        match self.client.rename(&self.temporary_path, &self.final_path) {
            Ok(()) => return Ok(()),
            Err(Errno::EEXIST) => {}
            Err(code) => return Err(UfsError::from_errno(code, &self.final_path)),
        }
        self.client
            .unlink(&self.final_path)
            .map_err(|code| UfsError::from_errno(code, &self.final_path))?;
        self.client
            .rename(&self.temporary_path, &self.final_path)
            .map_err(|code| UfsError::from_errno(code, &self.final_path))
    }

    /// Remove the temporary file after `err`, attaching any removal failure.
    fn discard(&self, err: UfsError) -> UfsError {
        match self.remove_temporary() {
            Ok(()) => err,
            Err(cleanup) => err.with_cleanup(cleanup),
        }
    }

    fn remove_temporary(&self) -> Result<(), UfsError> {
        match self.client.unlink(&self.temporary_path) {
            Ok(()) | Err(Errno::ENOENT) => Ok(()),
            Err(code) => Err(UfsError::from_errno(code, &self.temporary_path)),
        }
    }
}

impl fmt::Debug for AtomicWriteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicWriteStream")
            .field("inner", &self.inner)
            .field("temporary_path", &self.temporary_path)
            .field("final_path", &self.final_path)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for AtomicWriteStream {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.abort() {
                tracing::warn!(path = %self.temporary_path, "Failed to abandon atomic write: {}", e);
            }
        }
    }
}

// ============================================================================
// Output Stream
// ============================================================================

/// Stream returned by `create`.
#[derive(Debug)]
pub enum UfsOutputStream {
    Direct(BufferedWriteStream),
    Atomic(AtomicWriteStream),
}

impl UfsOutputStream {
    fn stream(&mut self) -> &mut BufferedWriteStream {
        match self {
            UfsOutputStream::Direct(stream) => stream,
            UfsOutputStream::Atomic(atomic) => &mut atomic.inner,
        }
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<(), UfsError> {
        self.stream().write_byte(byte)
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), UfsError> {
        self.stream().write_bytes(data)
    }

    pub fn flush(&mut self) -> Result<(), UfsError> {
        self.stream().flush()
    }

    /// Close the stream; an atomic stream also publishes its file.
    pub fn close(&mut self) -> Result<(), UfsError> {
        match self {
            UfsOutputStream::Direct(stream) => stream.close(),
            UfsOutputStream::Atomic(atomic) => atomic.close(),
        }
    }

    /// Total bytes accepted so far.
    pub fn position(&self) -> u64 {
        match self {
            UfsOutputStream::Direct(stream) => stream.position(),
            UfsOutputStream::Atomic(atomic) => atomic.inner.position(),
        }
    }

    /// Path the data will be visible under once the stream is closed.
    pub fn path(&self) -> &str {
        match self {
            UfsOutputStream::Direct(stream) => stream.path(),
            UfsOutputStream::Atomic(atomic) => &atomic.final_path,
        }
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, UfsOutputStream::Atomic(_))
    }
}

impl io::Write for UfsOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        UfsOutputStream::flush(self)?;
        Ok(())
    }
}
