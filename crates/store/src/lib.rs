//! Store client contract for the CubeFS under-filesystem adapter.
//!
//! The native CubeFS client is a narrow, blocking, descriptor-based service.
//! This crate gives it a Rust shape without hiding what it is:
//!
//! - **`StoreClient`** - the operation set (open/read/write/flush/close,
//!   getattr, mkdirs, unlink, rmdir, rename, readdir, batch getattr)
//! - **`Stat` / `Dirent`** - native records with explicit little-endian codecs
//! - **`OwnedHandle`** - move-only descriptor owner that closes on drop
//! - **`StoreSession`** - lazily started, explicitly torn down shared client
//! - **`MemoryStoreClient`** - in-memory implementation with fault injection

mod error;
mod handle;
pub mod memory;
mod session;
mod traits;
mod types;

pub use error::{Errno, StoreError};
pub use handle::OwnedHandle;
pub use memory::{CallCounts, FaultPlan, MemoryStoreClient};
pub use session::{StoreSession, StoreSettings};
pub use traits::{StoreClient, StoreConnector};
pub use types::{
    decode_dirents, decode_stats, Dirent, Fd, OpenFlags, Stat, DIRENT_NAME_CAPACITY, DT_DIR,
    DT_REG, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG,
};
