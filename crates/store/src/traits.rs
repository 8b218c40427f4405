//! Store client interface.

use std::sync::Arc;

use crate::error::{Errno, StoreError};
use crate::session::StoreSettings;
use crate::types::{Dirent, Fd, OpenFlags, Stat};

/// Handle-based operations exposed by the native CubeFS client.
///
/// Every call blocks the caller until the store answers. Failures are the
/// negated errno the native client returned; interpreting them (and attaching
/// a path) is left to the caller.
pub trait StoreClient: Send + Sync {
    /// Open a file or directory and return its descriptor.
    fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<Fd, Errno>;

    /// Read up to `buf.len()` bytes at `offset`. Zero means end of file.
    fn read(&self, fd: Fd, buf: &mut [u8], offset: u64) -> Result<usize, Errno>;

    /// Write `buf` at `offset` and return the number of bytes accepted.
    fn write(&self, fd: Fd, buf: &[u8], offset: u64) -> Result<usize, Errno>;

    /// Durability barrier for everything written through `fd`.
    fn flush(&self, fd: Fd) -> Result<(), Errno>;

    /// Release a descriptor. The descriptor is invalid afterwards either way.
    fn close(&self, fd: Fd) -> Result<(), Errno>;

    /// Look up attributes by path.
    fn get_attr(&self, path: &str) -> Result<Stat, Errno>;

    /// Create a directory and any missing ancestors.
    fn mkdirs(&self, path: &str, mode: u32) -> Result<(), Errno>;

    /// Remove a file. Directories yield `EISDIR`.
    fn unlink(&self, path: &str) -> Result<(), Errno>;

    /// Remove an empty directory.
    fn rmdir(&self, path: &str) -> Result<(), Errno>;

    /// Rename `from` to `to`.
    fn rename(&self, from: &str, to: &str) -> Result<(), Errno>;

    /// Return the next batch of at most `max_entries` entries of an open
    /// directory. An empty batch means the listing is exhausted.
    fn readdir(&self, fd: Fd, max_entries: usize) -> Result<Vec<Dirent>, Errno>;

    /// Resolve attributes for a batch of inodes under an open directory.
    ///
    /// May return fewer stats than requested.
    fn batch_get_attr(&self, fd: Fd, inodes: &[u64]) -> Result<Vec<Stat>, Errno>;

    /// Change permission bits of an open file.
    fn fchmod(&self, fd: Fd, mode: u32) -> Result<(), Errno>;

    /// Tear down the client. No descriptor may be used afterwards.
    fn shutdown(&self);
}

/// Factory that starts a native client for a volume.
pub trait StoreConnector: Send + Sync {
    /// Start a client with the given settings.
    ///
    /// # Arguments
    /// * `settings` - Validated client settings
    fn connect(&self, settings: &StoreSettings) -> Result<Arc<dyn StoreClient>, StoreError>;
}

impl<F> StoreConnector for F
where
    F: Fn(&StoreSettings) -> Result<Arc<dyn StoreClient>, StoreError> + Send + Sync,
{
    fn connect(&self, settings: &StoreSettings) -> Result<Arc<dyn StoreClient>, StoreError> {
        (self)(settings)
    }
}
