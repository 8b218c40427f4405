//! Error types for the under-filesystem adapter.

use cfs_ufs_common::PathError;
use cfs_ufs_store::{Errno, StoreError};
use thiserror::Error;

/// Errors that can occur during adapter operations.
#[derive(Error, Debug)]
pub enum UfsError {
    /// The store has no entry at the path.
    #[error("No such file or directory: {path}")]
    NotFound { path: String },

    /// An entry already exists at the path.
    #[error("Already exists: {path}")]
    AlreadyExists { path: String },

    /// A file operation was attempted on a directory.
    #[error("Is a directory: {path}")]
    IsDirectory { path: String },

    /// Non-recursive delete of a directory that still has entries.
    #[error("Directory: {path} is not empty")]
    DirectoryNotEmpty { path: String },

    /// The store accepted fewer bytes than were committed.
    #[error("Write failed on fd {fd}: store accepted {actual} of {expected} bytes")]
    ShortWrite {
        fd: i32,
        expected: usize,
        actual: usize,
    },

    /// The store's durability barrier reported a failure.
    #[error("Flush failed on fd {fd}: {code}")]
    FlushFailed { fd: i32, code: Errno },

    /// Releasing a descriptor failed.
    #[error("Close failed, fd = {fd}: {code}")]
    CloseFailed { fd: i32, code: Errno },

    /// Directory enumeration failed while reading entries.
    #[error("readdir failed for {path}, code={code}")]
    ReaddirFailed { path: String, code: Errno },

    /// Directory enumeration failed while resolving entry attributes.
    #[error("batch getattr failed for {path}, code={code}")]
    BatchGetAttrFailed { path: String, code: Errno },

    /// A store error without a more specific meaning.
    #[error("Store error for {path}: {code}")]
    Store { path: String, code: Errno },

    /// A primary failure followed by a failure while cleaning up after it.
    ///
    /// Displays the primary error followed by the cleanup failure; the
    /// cleanup failure is also the `source`.
    #[error("{primary} (cleanup also failed: {cleanup})")]
    CleanupFailed {
        primary: Box<UfsError>,
        #[source]
        cleanup: Box<UfsError>,
    },

    /// The stream was used after `close`.
    #[error("Stream is closed: {path}")]
    StreamClosed { path: String },

    /// The stream was used after an earlier commit failed.
    #[error("Stream is unusable after an earlier write failure: {path}")]
    StreamBroken { path: String },

    /// The store reported a mode that is neither a file nor a directory.
    #[error("Unknown file type for {path}: mode {mode:o}")]
    UnknownFileType { path: String, mode: u32 },

    /// Adapter options failed validation.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Session or native record error.
    #[error(transparent)]
    Session(#[from] StoreError),

    /// Path could not be resolved.
    #[error(transparent)]
    Path(#[from] PathError),
}

impl UfsError {
    /// Map a store errno to a typed error for `path`.
    ///
    /// # Arguments
    /// * `code` - Negative status returned by the store
    /// * `path` - Store path the call was made for
    pub fn from_errno(code: Errno, path: &str) -> Self {
        let path: String = path.to_string();
        match code {
            Errno::ENOENT => UfsError::NotFound { path },
            Errno::EEXIST => UfsError::AlreadyExists { path },
            Errno::EISDIR => UfsError::IsDirectory { path },
            Errno::ENOTEMPTY => UfsError::DirectoryNotEmpty { path },
            _ => UfsError::Store { path, code },
        }
    }

    /// Whether this error means the entry does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            UfsError::NotFound { .. } => true,
            UfsError::CleanupFailed { primary, .. } => primary.is_not_found(),
            _ => false,
        }
    }

    /// Attach a failure that happened while cleaning up after `self`.
    ///
    /// # Arguments
    /// * `cleanup` - The cleanup failure
    pub fn with_cleanup(self, cleanup: UfsError) -> Self {
        UfsError::CleanupFailed {
            primary: Box::new(self),
            cleanup: Box::new(cleanup),
        }
    }

    /// Combine the outcome of an operation with the outcome of its cleanup.
    ///
    /// The operation's error wins; a cleanup error is attached to it, or
    /// returned alone if the operation succeeded.
    pub fn combine(primary: Result<(), UfsError>, cleanup: Result<(), UfsError>) -> Result<(), UfsError> {
        match (primary, cleanup) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(c)) => Err(c),
            (Err(e), Err(c)) => Err(e.with_cleanup(c)),
        }
    }
}

impl From<UfsError> for std::io::Error {
    fn from(err: UfsError) -> Self {
        use std::io::ErrorKind;

        let kind: ErrorKind = match &err {
            UfsError::NotFound { .. } => ErrorKind::NotFound,
            UfsError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            UfsError::ShortWrite { .. } => ErrorKind::WriteZero,
            UfsError::Path(_) | UfsError::InvalidConfig { .. } => ErrorKind::InvalidInput,
            UfsError::CleanupFailed { primary, .. } => match primary.as_ref() {
                UfsError::NotFound { .. } => ErrorKind::NotFound,
                UfsError::ShortWrite { .. } => ErrorKind::WriteZero,
                _ => ErrorKind::Other,
            },
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
