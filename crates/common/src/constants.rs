//! Shared constants used across the cfs-ufs crates.

/// URI scheme prefix for CubeFS paths.
pub const CUBEFS_SCHEME: &str = "cubefs://";

/// Under filesystem type reported to the enclosing framework.
pub const UNDER_FS_TYPE: &str = "cubefs";

/// Default write buffer size (4MB).
/// Writes are committed to the store one full buffer at a time.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Smallest write buffer the store accepts (64KB).
/// Configured write buffers below this are raised to it.
pub const MIN_WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Default read-ahead buffer size (4MB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Number of directory entries requested per readdir round trip.
pub const LIST_BATCH_SIZE: usize = 100;

/// Block size reported for every file (128MB).
pub const BLOCK_SIZE: u64 = 128 << 20;

/// Attempt ceiling for whole-operation metadata calls (delete, mkdirs).
pub const MAX_RETRY_TIMES: u32 = 10;

/// Fixed backoff between metadata retry attempts in milliseconds.
pub const RETRY_BACKOFF_MS: u64 = 100;

/// Permission bits used when a caller does not supply a file mode.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Permission bits used when a caller does not supply a directory mode.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Default number of idle read buffers kept for reuse.
pub const DEFAULT_MAX_IDLE_BUFFERS: usize = 16;
