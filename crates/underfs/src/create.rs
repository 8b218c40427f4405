//! File creation with on-demand parent directories.
//!
//! The store refuses to create a file whose parent is missing. Rather than
//! probing first, create opens optimistically and builds the parent tree
//! only when the open reports "no such entry".

use std::sync::Arc;

use cfs_ufs_common::parent_path;
use cfs_ufs_store::{Errno, OpenFlags, OwnedHandle, StoreClient};

use crate::error::UfsError;
use crate::options::{CreateRetryPolicy, UfsOptions};
use crate::write::BufferedWriteStream;

/// Flags used to open a file for creation.
///
/// Truncation makes re-creating an existing path start from an empty file.
const CREATE_FLAGS: OpenFlags = OpenFlags(OpenFlags::WRONLY.0 | OpenFlags::CREAT.0 | OpenFlags::TRUNC.0);

/// Opens files for writing, creating missing parent directories.
#[derive(Clone)]
pub struct CreateCoordinator {
    client: Arc<dyn StoreClient>,
    retry: CreateRetryPolicy,
    dir_mode: u32,
    buffer_size: usize,
}

impl CreateCoordinator {
    /// Create a coordinator.
    ///
    /// # Arguments
    /// * `client` - Store client
    /// * `options` - Supplies the retry policy, parent directory mode and
    ///   the effective write buffer size
    pub fn new(client: Arc<dyn StoreClient>, options: &UfsOptions) -> Self {
        Self {
            client,
            retry: options.create_retry,
            dir_mode: options.default_dir_mode,
            buffer_size: options.effective_write_buffer_size(),
        }
    }

    /// Open `path` for writing from offset 0, creating the parent tree if
    /// the store reports it missing.
    ///
    /// Each open that fails with "no such entry" is followed by a best-effort
    /// `mkdirs` of the parent and another open. The loop ends when an open
    /// succeeds, when an open fails for any other reason, or when a
    /// configured attempt ceiling is reached.
    ///
    /// # Arguments
    /// * `path` - Normalized store path
    /// * `mode` - Permission bits for the new file
    ///
    /// # Errors
    /// - `NotFound` if the attempt ceiling is reached
    /// - `Path` if `path` has no parent to create
    /// - The mapped store error for any other open failure
    pub fn create_exclusive(&self, path: &str, mode: u32) -> Result<BufferedWriteStream, UfsError> {
        let mut attempts: u32 = 0;
        let handle: OwnedHandle = 'open: loop {
            attempts += 1;
            let code: Errno = match OwnedHandle::open(self.client.clone(), path, CREATE_FLAGS, mode) {
                Ok(handle) => break 'open handle,
                Err(code) => code,
            };
            if code != Errno::ENOENT {
                return Err(UfsError::from_errno(code, path));
            }
            if !self.retry.allows(attempts) {
                tracing::warn!(path, attempts, "giving up create, parent still missing");
                return Err(UfsError::NotFound {
                    path: path.to_string(),
                });
            }

            let parent: String = parent_path(path)?;
            tracing::debug!(path, parent = %parent, attempts, "parent missing, creating it");
            if let Err(e) = self.client.mkdirs(&parent, self.dir_mode) {
                tracing::debug!(parent = %parent, "ignoring mkdirs failure: {}", e);
            }
        };

        tracing::debug!(fd = handle.fd().0, path, "created");
        Ok(BufferedWriteStream::new(handle, 0, self.buffer_size))
    }
}
