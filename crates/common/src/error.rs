//! Shared error types used across cfs-ufs crates.

use thiserror::Error;

/// Path-related errors shared across crates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Path is empty or malformed.
    #[error("Invalid path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: String,
    },

    /// Path is the root and has no parent directory.
    #[error("Path has no parent: {path}")]
    NoParent {
        /// The path that was checked.
        path: String,
    },
}
