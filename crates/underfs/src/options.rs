//! Configuration options for the under-filesystem adapter.
//!
//! This module provides buffer sizing, retry policies and per-call options
//! for create, mkdirs, delete and open.

use std::time::Duration;

use backon::ConstantBuilder;
use serde::Deserialize;

use cfs_ufs_common::{
    BLOCK_SIZE, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, DEFAULT_READ_BUFFER_SIZE,
    DEFAULT_WRITE_BUFFER_SIZE, LIST_BATCH_SIZE, MAX_RETRY_TIMES, MIN_WRITE_BUFFER_SIZE,
    RETRY_BACKOFF_MS,
};

use crate::buffer_pool::BufferPoolConfig;
use crate::error::UfsError;

/// Configuration options for the adapter.
///
/// # Example
///
/// ```ignore
/// let options = UfsOptions::default()
///     .with_write_buffer_size(8 * 1024 * 1024)
///     .with_create_retry(CreateRetryPolicy::bounded(50));
///
/// let ufs = CubeFsUnderFileSystem::new(session, options)?;
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct UfsOptions {
    /// Requested write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Store-imposed minimum write buffer size; requests below are raised.
    pub min_write_buffer_size: usize,
    /// Read-ahead buffer size in bytes.
    pub read_buffer_size: usize,
    /// Directory entries requested per readdir round trip.
    pub list_batch_size: usize,
    /// Block size reported in file statuses.
    pub block_size: u64,
    /// Retry policy for create when the parent is missing.
    pub create_retry: CreateRetryPolicy,
    /// Retry policy for whole metadata operations (delete, mkdirs).
    pub metadata_retry: MetadataRetryPolicy,
    /// Read buffer pool configuration.
    pub pool: BufferPoolConfig,
    /// Permission bits for files created without an explicit mode.
    pub default_file_mode: u32,
    /// Permission bits for directories created without an explicit mode.
    pub default_dir_mode: u32,
}

impl Default for UfsOptions {
    fn default() -> Self {
        Self {
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            min_write_buffer_size: MIN_WRITE_BUFFER_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            list_batch_size: LIST_BATCH_SIZE,
            block_size: BLOCK_SIZE,
            create_retry: CreateRetryPolicy::default(),
            metadata_retry: MetadataRetryPolicy::default(),
            pool: BufferPoolConfig::default(),
            default_file_mode: DEFAULT_FILE_MODE,
            default_dir_mode: DEFAULT_DIR_MODE,
        }
    }
}

impl UfsOptions {
    /// Set the requested write buffer size.
    ///
    /// # Arguments
    /// * `size` - Buffer size in bytes
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Set the store's minimum write buffer size.
    ///
    /// # Arguments
    /// * `size` - Minimum buffer size in bytes
    pub fn with_min_write_buffer_size(mut self, size: usize) -> Self {
        self.min_write_buffer_size = size;
        self
    }

    /// Set the read-ahead buffer size.
    ///
    /// # Arguments
    /// * `size` - Buffer size in bytes
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the number of entries requested per readdir.
    ///
    /// # Arguments
    /// * `batch_size` - Entries per round trip
    pub fn with_list_batch_size(mut self, batch_size: usize) -> Self {
        self.list_batch_size = batch_size;
        self
    }

    /// Set the block size reported in file statuses.
    ///
    /// # Arguments
    /// * `block_size` - Block size in bytes
    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the create retry policy.
    ///
    /// # Arguments
    /// * `policy` - Policy applied when create finds no parent
    pub fn with_create_retry(mut self, policy: CreateRetryPolicy) -> Self {
        self.create_retry = policy;
        self
    }

    /// Set the metadata retry policy.
    ///
    /// # Arguments
    /// * `policy` - Policy applied to delete and mkdirs
    pub fn with_metadata_retry(mut self, policy: MetadataRetryPolicy) -> Self {
        self.metadata_retry = policy;
        self
    }

    /// Set the read buffer pool configuration.
    ///
    /// # Arguments
    /// * `pool` - Pool configuration
    pub fn with_pool_config(mut self, pool: BufferPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the default permission bits for new files and directories.
    ///
    /// # Arguments
    /// * `file_mode` - Mode for files
    /// * `dir_mode` - Mode for directories
    pub fn with_default_modes(mut self, file_mode: u32, dir_mode: u32) -> Self {
        self.default_file_mode = file_mode;
        self.default_dir_mode = dir_mode;
        self
    }

    /// Write buffer size actually used by new write streams.
    ///
    /// # Returns
    /// `max(write_buffer_size, min_write_buffer_size)`.
    pub fn effective_write_buffer_size(&self) -> usize {
        self.write_buffer_size.max(self.min_write_buffer_size)
    }

    /// Check that every size is usable.
    ///
    /// # Errors
    /// Returns `UfsError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<(), UfsError> {
        let invalid = |message: &str| UfsError::InvalidConfig {
            message: message.to_string(),
        };
        if self.effective_write_buffer_size() == 0 {
            return Err(invalid("write buffer size must be positive"));
        }
        if self.read_buffer_size == 0 {
            return Err(invalid("read buffer size must be positive"));
        }
        if self.list_batch_size == 0 {
            return Err(invalid("list batch size must be positive"));
        }
        if self.metadata_retry.max_attempts == 0 {
            return Err(invalid("metadata retry needs at least one attempt"));
        }
        if self.create_retry.max_attempts == Some(0) {
            return Err(invalid("create retry needs at least one attempt"));
        }
        Ok(())
    }
}

// ============================================================================
// Retry Policies
// ============================================================================

/// Retry policy for create when the parent directory is missing.
///
/// Each attempt that fails with "no such entry" creates the parent tree and
/// tries again. With no ceiling the loop ends only on success or on a
/// different error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CreateRetryPolicy {
    /// Attempt ceiling. `None` retries until the open succeeds.
    pub max_attempts: Option<u32>,
}

impl CreateRetryPolicy {
    /// Retry until success or a non-missing-parent error.
    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    /// Give up after `max_attempts` opens.
    ///
    /// # Arguments
    /// * `max_attempts` - Total opens allowed, including the first
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
        }
    }

    /// Whether another open may follow `attempts` failed ones.
    pub fn allows(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }
}

/// Retry policy for whole metadata operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetadataRetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed pause between attempts in milliseconds.
    pub backoff_ms: u64,
}

impl Default for MetadataRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY_TIMES,
            backoff_ms: RETRY_BACKOFF_MS,
        }
    }
}

impl MetadataRetryPolicy {
    /// Create a policy.
    ///
    /// # Arguments
    /// * `max_attempts` - Total attempts, including the first
    /// * `backoff_ms` - Pause between attempts in milliseconds
    pub fn new(max_attempts: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff_ms,
        }
    }

    /// Backoff schedule for one operation.
    ///
    /// `max_attempts` counts the first call, so the schedule allows
    /// `max_attempts - 1` retries spaced `backoff_ms` apart.
    pub fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(Duration::from_millis(self.backoff_ms))
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }
}

// ============================================================================
// Per-call Options
// ============================================================================

/// Options for `create`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Permission bits; the adapter default is used when unset.
    pub mode: Option<u32>,
    /// Write to a temporary sibling and rename onto the target on close.
    pub ensure_atomic: bool,
}

impl CreateOptions {
    /// Set the permission bits.
    ///
    /// # Arguments
    /// * `mode` - Permission bits for the new file
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Request atomic visibility of the finished file.
    pub fn atomic(mut self) -> Self {
        self.ensure_atomic = true;
        self
    }
}

/// Options for `mkdirs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MkdirsOptions {
    /// Create missing ancestors. When false, a missing parent makes the
    /// call return `false`.
    pub create_parent: bool,
    /// Permission bits; the adapter default is used when unset.
    pub mode: Option<u32>,
}

impl Default for MkdirsOptions {
    fn default() -> Self {
        Self {
            create_parent: true,
            mode: None,
        }
    }
}

impl MkdirsOptions {
    /// Require the parent to exist already.
    pub fn without_parents(mut self) -> Self {
        self.create_parent = false;
        self
    }

    /// Set the permission bits.
    ///
    /// # Arguments
    /// * `mode` - Permission bits for the new directories
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Options for `delete_directory`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete contents as well. When false, a non-empty directory is an
    /// error.
    pub recursive: bool,
}

impl DeleteOptions {
    /// Delete the directory and everything under it.
    pub fn recursive() -> Self {
        Self { recursive: true }
    }
}

/// Options for `open`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Initial read position.
    pub offset: u64,
}

impl OpenOptions {
    /// Start reading at `offset`.
    ///
    /// # Arguments
    /// * `offset` - Byte offset of the first read
    pub fn at_offset(offset: u64) -> Self {
        Self { offset }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[test]
    fn test_defaults() {
        let options: UfsOptions = UfsOptions::default();
        assert_eq!(options.write_buffer_size, 4 * 1024 * 1024);
        assert_eq!(options.read_buffer_size, 4 * 1024 * 1024);
        assert_eq!(options.list_batch_size, 100);
        assert_eq!(options.block_size, 128 * 1024 * 1024);
        assert_eq!(options.create_retry.max_attempts, None);
        assert_eq!(options.metadata_retry, MetadataRetryPolicy::new(10, 100));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_effective_write_buffer_size_respects_minimum() {
        let small: UfsOptions = UfsOptions::default().with_write_buffer_size(1024);
        assert_eq!(small.effective_write_buffer_size(), 64 * 1024);

        let large: UfsOptions = UfsOptions::default().with_write_buffer_size(8 << 20);
        assert_eq!(large.effective_write_buffer_size(), 8 << 20);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let options: UfsOptions = UfsOptions::default().with_list_batch_size(0);
        let err: UfsError = options.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: list batch size must be positive"
        );

        let options: UfsOptions = UfsOptions::default().with_read_buffer_size(0);
        assert!(options.validate().is_err());

        let options: UfsOptions =
            UfsOptions::default().with_create_retry(CreateRetryPolicy::bounded(0));
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_create_retry_allows() {
        let unbounded: CreateRetryPolicy = CreateRetryPolicy::unbounded();
        assert!(unbounded.allows(u32::MAX - 1));

        let bounded: CreateRetryPolicy = CreateRetryPolicy::bounded(3);
        assert!(bounded.allows(2));
        assert!(!bounded.allows(3));
    }

    #[test]
    fn test_metadata_backoff_schedule() {
        let delays: Vec<Duration> = MetadataRetryPolicy::new(3, 25).backoff().build().collect();
        assert_eq!(delays, vec![Duration::from_millis(25); 2]);

        let single: usize = MetadataRetryPolicy::new(1, 25).backoff().build().count();
        assert_eq!(single, 0);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let json: &str = r#"{
            "write_buffer_size": 1048576,
            "metadata_retry": { "max_attempts": 3 },
            "create_retry": { "max_attempts": 20 }
        }"#;
        let options: UfsOptions = serde_json::from_str(json).unwrap();

        assert_eq!(options.write_buffer_size, 1 << 20);
        assert_eq!(options.read_buffer_size, 4 * 1024 * 1024);
        assert_eq!(options.metadata_retry.max_attempts, 3);
        assert_eq!(options.metadata_retry.backoff_ms, 100);
        assert_eq!(options.create_retry, CreateRetryPolicy::bounded(20));
    }

    #[test]
    fn test_per_call_option_builders() {
        let create: CreateOptions = CreateOptions::default().with_mode(0o600).atomic();
        assert_eq!(create.mode, Some(0o600));
        assert!(create.ensure_atomic);

        let mkdirs: MkdirsOptions = MkdirsOptions::default();
        assert!(mkdirs.create_parent);
        assert!(!mkdirs.without_parents().create_parent);

        assert!(DeleteOptions::recursive().recursive);
        assert!(!DeleteOptions::default().recursive);
        assert_eq!(OpenOptions::at_offset(7).offset, 7);
    }
}
