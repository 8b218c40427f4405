//! Owned store descriptors.

use std::fmt;
use std::sync::Arc;

use crate::error::Errno;
use crate::traits::StoreClient;
use crate::types::{Dirent, Fd, OpenFlags, Stat};

/// RAII owner of a store descriptor.
///
/// Move-only. The descriptor is closed by `close` or, failing that, on drop,
/// so every exit path releases it exactly once.
pub struct OwnedHandle {
    client: Arc<dyn StoreClient>,
    fd: Fd,
    path: String,
    open: bool,
}

impl OwnedHandle {
    /// Open `path` and take ownership of the resulting descriptor.
    ///
    /// # Arguments
    /// * `client` - Store client issuing the descriptor
    /// * `path` - Store path to open
    /// * `flags` - Open flags
    /// * `mode` - Permission bits used if the file is created
    pub fn open(
        client: Arc<dyn StoreClient>,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<Self, Errno> {
        let fd: Fd = client.open(path, flags, mode)?;
        Ok(Self {
            client,
            fd,
            path: path.to_string(),
            open: true,
        })
    }

    /// Raw descriptor, for logging and error context.
    pub fn fd(&self) -> Fd {
        self.fd
    }

    /// Path the descriptor was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Client that issued the descriptor.
    pub fn client(&self) -> &Arc<dyn StoreClient> {
        &self.client
    }

    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
        self.client.read(self.fd, buf, offset)
    }

    pub fn write(&self, buf: &[u8], offset: u64) -> Result<usize, Errno> {
        self.client.write(self.fd, buf, offset)
    }

    pub fn flush(&self) -> Result<(), Errno> {
        self.client.flush(self.fd)
    }

    pub fn readdir(&self, max_entries: usize) -> Result<Vec<Dirent>, Errno> {
        self.client.readdir(self.fd, max_entries)
    }

    pub fn batch_get_attr(&self, inodes: &[u64]) -> Result<Vec<Stat>, Errno> {
        self.client.batch_get_attr(self.fd, inodes)
    }

    pub fn fchmod(&self, mode: u32) -> Result<(), Errno> {
        self.client.fchmod(self.fd, mode)
    }

    /// Close the descriptor and report the store's answer.
    pub fn close(mut self) -> Result<(), Errno> {
        self.open = false;
        self.client.close(self.fd)
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.client.close(self.fd) {
                log::warn!("Failed to close fd {} for {}: {}", self.fd.0, self.path, e);
            }
        }
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedHandle")
            .field("fd", &self.fd)
            .field("path", &self.path)
            .field("open", &self.open)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStoreClient;

    #[test]
    fn test_drop_closes_descriptor() {
        let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
        store.put_file("/a.txt", b"abc");

        let handle: OwnedHandle =
            OwnedHandle::open(store.clone(), "/a.txt", OpenFlags::RDONLY, 0).unwrap();
        assert_eq!(store.open_descriptors(), 1);
        drop(handle);
        assert_eq!(store.open_descriptors(), 0);
        assert_eq!(store.calls().closes, 1);
    }

    #[test]
    fn test_explicit_close_is_not_repeated_on_drop() {
        let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
        store.put_file("/a.txt", b"abc");

        let handle: OwnedHandle =
            OwnedHandle::open(store.clone(), "/a.txt", OpenFlags::RDONLY, 0).unwrap();
        handle.close().unwrap();
        assert_eq!(store.calls().closes, 1);
    }

    #[test]
    fn test_open_failure_yields_errno() {
        let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
        let result: Result<OwnedHandle, Errno> =
            OwnedHandle::open(store.clone(), "/missing", OpenFlags::RDONLY, 0);
        assert_eq!(result.unwrap_err(), Errno::ENOENT);
        assert_eq!(store.open_descriptors(), 0);
    }
}
