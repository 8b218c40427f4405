//! File and directory statuses produced for the enclosing framework.

use cfs_ufs_common::{approximate_content_hash, file_name};
use cfs_ufs_store::Stat;

use crate::error::UfsError;

/// Owner and group reported for every entry.
///
/// The store does not expose user names, so entries are reported as owned
/// by the user running this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub owner: String,
    pub group: String,
}

impl ProcessIdentity {
    /// Identity of the current process user.
    pub fn current() -> Self {
        let user: String = whoami::username();
        Self {
            owner: user.clone(),
            group: user,
        }
    }

    /// Fixed identity, mainly for tests.
    ///
    /// # Arguments
    /// * `owner` - Reported owner name
    /// * `group` - Reported group name
    pub fn new(owner: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            group: group.into(),
        }
    }
}

/// Status of a regular file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UfsFileStatus {
    /// Full store path.
    pub path: String,
    /// Final path component.
    pub name: String,
    /// Coarse fingerprint of size and modification time.
    pub content_hash: String,
    /// Length in bytes.
    pub length: u64,
    /// Modification time in milliseconds since the epoch.
    pub last_modified_ms: i64,
    pub owner: String,
    pub group: String,
    /// Permission bits only.
    pub mode: u32,
    /// Block size reported to the framework.
    pub block_size: u64,
}

/// Status of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UfsDirectoryStatus {
    /// Full store path.
    pub path: String,
    /// Final path component.
    pub name: String,
    pub owner: String,
    pub group: String,
    /// Permission bits only.
    pub mode: u32,
    /// Modification time in milliseconds since the epoch.
    pub last_modified_ms: i64,
}

/// Status of a store entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UfsStatus {
    File(UfsFileStatus),
    Directory(UfsDirectoryStatus),
}

impl UfsStatus {
    /// Classify a stat record.
    ///
    /// # Arguments
    /// * `path` - Full store path of the entry
    /// * `stat` - Attributes returned by the store
    /// * `identity` - Owner and group to report
    /// * `block_size` - Block size to report for files
    ///
    /// # Returns
    /// `None` for entries that are neither regular files nor directories.
    pub fn from_stat(
        path: &str,
        stat: &Stat,
        identity: &ProcessIdentity,
        block_size: u64,
    ) -> Option<Self> {
        if stat.is_dir() {
            Some(UfsStatus::Directory(UfsDirectoryStatus::from_stat(
                path, stat, identity,
            )))
        } else if stat.is_file() {
            Some(UfsStatus::File(UfsFileStatus::from_stat(
                path, stat, identity, block_size,
            )))
        } else {
            None
        }
    }

    /// Like `from_stat`, but an unsupported entry type is an error.
    ///
    /// # Errors
    /// `UfsError::UnknownFileType` for symlinks and other special entries.
    pub fn try_from_stat(
        path: &str,
        stat: &Stat,
        identity: &ProcessIdentity,
        block_size: u64,
    ) -> Result<Self, UfsError> {
        Self::from_stat(path, stat, identity, block_size).ok_or_else(|| {
            UfsError::UnknownFileType {
                path: path.to_string(),
                mode: stat.mode,
            }
        })
    }

    pub fn path(&self) -> &str {
        match self {
            UfsStatus::File(f) => &f.path,
            UfsStatus::Directory(d) => &d.path,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            UfsStatus::File(f) => &f.name,
            UfsStatus::Directory(d) => &d.name,
        }
    }

    pub fn mode(&self) -> u32 {
        match self {
            UfsStatus::File(f) => f.mode,
            UfsStatus::Directory(d) => d.mode,
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            UfsStatus::File(f) => &f.owner,
            UfsStatus::Directory(d) => &d.owner,
        }
    }

    pub fn last_modified_ms(&self) -> i64 {
        match self {
            UfsStatus::File(f) => f.last_modified_ms,
            UfsStatus::Directory(d) => d.last_modified_ms,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, UfsStatus::File(_))
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, UfsStatus::Directory(_))
    }

    pub fn as_file(&self) -> Option<&UfsFileStatus> {
        match self {
            UfsStatus::File(f) => Some(f),
            UfsStatus::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&UfsDirectoryStatus> {
        match self {
            UfsStatus::Directory(d) => Some(d),
            UfsStatus::File(_) => None,
        }
    }
}

impl UfsFileStatus {
    /// Build a file status from store attributes.
    pub fn from_stat(path: &str, stat: &Stat, identity: &ProcessIdentity, block_size: u64) -> Self {
        let last_modified_ms: i64 = stat.mtime_ms();
        Self {
            path: path.to_string(),
            name: file_name(path).to_string(),
            content_hash: approximate_content_hash(stat.size, last_modified_ms),
            length: stat.size,
            last_modified_ms,
            owner: identity.owner.clone(),
            group: identity.group.clone(),
            mode: stat.permissions(),
            block_size,
        }
    }
}

impl UfsDirectoryStatus {
    /// Build a directory status from store attributes.
    pub fn from_stat(path: &str, stat: &Stat, identity: &ProcessIdentity) -> Self {
        Self {
            path: path.to_string(),
            name: file_name(path).to_string(),
            owner: identity.owner.clone(),
            group: identity.group.clone(),
            mode: stat.permissions(),
            last_modified_ms: stat.mtime_ms(),
        }
    }
}
