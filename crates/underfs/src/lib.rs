//! CubeFS under-filesystem adapter.
//!
//! This crate adapts the handle-based CubeFS client into the stream and
//! metadata interface of a higher-level storage framework. Small, frequent
//! byte-level calls are turned into large, infrequent store operations, and
//! directory listings are paginated with batched attribute lookups.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: Facade (CubeFsUnderFileSystem: create/open/list/mkdirs/delete/rename)
//! Layer 2: Engines (BufferedWriteStream, BufferedReadStream,
//!          DirectoryEnumerator, CreateCoordinator)
//! Layer 1: Primitives (StoreSession, OwnedHandle, BufferPool)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let session = Arc::new(StoreSession::new(settings, connector)?);
//! let ufs = CubeFsUnderFileSystem::new(session, UfsOptions::default())?;
//!
//! let mut out = ufs.create("cubefs://vol/logs/app.log", CreateOptions::default())?;
//! out.write_bytes(b"hello")?;
//! out.close()?;
//!
//! for status in ufs.list_status("/logs")? {
//!     println!("{} {}", status.name(), status.is_file());
//! }
//! ```

pub mod buffer_pool;
pub mod create;
pub mod error;
pub mod listing;
pub mod options;
pub mod output;
pub mod read;
pub mod status;
pub mod under_fs;
pub mod write;

pub use buffer_pool::{BufferPool, BufferPoolConfig, BufferPoolStats, PooledBuffer};
pub use create::CreateCoordinator;
pub use error::UfsError;
pub use listing::DirectoryEnumerator;
pub use options::{
    CreateOptions, CreateRetryPolicy, DeleteOptions, MetadataRetryPolicy, MkdirsOptions,
    OpenOptions, UfsOptions,
};
pub use output::{AtomicWriteStream, UfsOutputStream};
pub use read::BufferedReadStream;
pub use status::{ProcessIdentity, UfsDirectoryStatus, UfsFileStatus, UfsStatus};
pub use under_fs::CubeFsUnderFileSystem;
pub use write::BufferedWriteStream;
