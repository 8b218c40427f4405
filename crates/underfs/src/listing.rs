//! Paginated directory enumeration.
//!
//! A listing opens the directory once and alternates two round trips per
//! batch: `readdir` for up to `batch_size` entries, then one `batch_get_attr`
//! for the inodes of that batch. A batch shorter than requested ends the
//! listing.
//!
//! ```text
//!   Idle ──open──▶ AwaitingBatch ──readdir(n>0)──▶ Resolving
//!    │                 ▲   │                          │
//!    │ (regular file)  │   └─readdir(0)──▶ Done       │
//!    ▼                 └──── full batch ◀─────────────┤
//!   Done                                   short batch└──▶ Done
//!
//!   any store error ──▶ Failed
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use cfs_ufs_common::join_path;
use cfs_ufs_store::{Dirent, Errno, OpenFlags, OwnedHandle, Stat, StoreClient};

use crate::error::UfsError;
use crate::status::{ProcessIdentity, UfsStatus};

/// Mode used to open directories for listing.
const DIR_OPEN_MODE: u32 = 0o777;

enum ListState {
    Idle,
    AwaitingBatch(OwnedHandle),
    Resolving {
        handle: OwnedHandle,
        entries: Vec<Dirent>,
    },
    Done,
    Failed,
}

/// Lazy listing of one directory.
///
/// Yields one `Ok` status per file or subdirectory, or a single `Err` after
/// which the iterator is exhausted. Create a new enumerator to list again.
pub struct DirectoryEnumerator {
    client: Arc<dyn StoreClient>,
    path: String,
    batch_size: usize,
    identity: ProcessIdentity,
    block_size: u64,
    state: ListState,
    ready: VecDeque<UfsStatus>,
}

impl DirectoryEnumerator {
    /// Create an enumerator. No store call is made until the first `next`.
    ///
    /// # Arguments
    /// * `client` - Store client
    /// * `path` - Normalized directory path
    /// * `batch_size` - Entries requested per readdir
    /// * `identity` - Owner and group reported on each status
    /// * `block_size` - Block size reported on file statuses
    pub fn new(
        client: Arc<dyn StoreClient>,
        path: impl Into<String>,
        batch_size: usize,
        identity: ProcessIdentity,
        block_size: u64,
    ) -> Self {
        Self {
            client,
            path: path.into(),
            batch_size: batch_size.max(1),
            identity,
            block_size,
            state: ListState::Idle,
            ready: VecDeque::new(),
        }
    }

    /// Drain the listing into a vector.
    ///
    /// # Errors
    /// The first error the enumeration hits.
    pub fn list(self) -> Result<Vec<UfsStatus>, UfsError> {
        self.collect()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Open the directory, or finish at once if the path is a regular file.
    fn start(&self) -> Result<Option<OwnedHandle>, UfsError> {
        match self.client.get_attr(&self.path) {
            Ok(stat) if stat.is_file() => return Ok(None),
            Ok(_) => {}
            Err(code) => return Err(UfsError::from_errno(code, &self.path)),
        }
        let handle: OwnedHandle = OwnedHandle::open(
            self.client.clone(),
            &self.path,
            OpenFlags::RDONLY,
            DIR_OPEN_MODE,
        )
        .map_err(|code| UfsError::from_errno(code, &self.path))?;
        tracing::debug!(fd = handle.fd().0, path = %self.path, "listing directory");
        Ok(Some(handle))
    }

    /// Turn one resolved batch into statuses, in the order the store
    /// returned the attributes.
    fn classify(&mut self, entries: &[Dirent], stats: &[Stat]) {
        let names: HashMap<u64, String> = entries.iter().map(|e| (e.ino, e.name())).collect();
        for stat in stats {
            let name: &String = match names.get(&stat.ino) {
                Some(name) => name,
                None => {
                    tracing::warn!(path = %self.path, ino = stat.ino, "attribute for unrequested inode");
                    continue;
                }
            };
            let child: String = join_path(&self.path, name);
            match UfsStatus::from_stat(&child, stat, &self.identity, self.block_size) {
                Some(status) => self.ready.push_back(status),
                None => tracing::debug!(path = %child, mode = stat.mode, "skipping special entry"),
            }
        }
    }

    /// Close `handle` after `err`, attaching any close failure.
    fn fail(&mut self, handle: OwnedHandle, err: UfsError) -> UfsError {
        self.state = ListState::Failed;
        let fd: i32 = handle.fd().0;
        match handle.close() {
            Ok(()) => err,
            Err(code) => err.with_cleanup(UfsError::CloseFailed { fd, code }),
        }
    }

    /// Close `handle` after the last batch.
    fn finish(&mut self, handle: OwnedHandle) -> Result<(), UfsError> {
        self.state = ListState::Done;
        let fd: i32 = handle.fd().0;
        handle.close().map_err(|code: Errno| UfsError::CloseFailed { fd, code })
    }

    /// Run one state transition.
    ///
    /// # Returns
    /// An error to yield, if the transition failed.
    fn step(&mut self) -> Option<UfsError> {
        match std::mem::replace(&mut self.state, ListState::Failed) {
            ListState::Idle => match self.start() {
                Ok(Some(handle)) => self.state = ListState::AwaitingBatch(handle),
                Ok(None) => self.state = ListState::Done,
                Err(e) => return Some(e),
            },
            ListState::AwaitingBatch(handle) => match handle.readdir(self.batch_size) {
                Ok(entries) if entries.is_empty() => return self.finish(handle).err(),
                Ok(entries) => self.state = ListState::Resolving { handle, entries },
                Err(code) => {
                    let err: UfsError = UfsError::ReaddirFailed {
                        path: self.path.clone(),
                        code,
                    };
                    return Some(self.fail(handle, err));
                }
            },
            ListState::Resolving { handle, entries } => {
                let inodes: Vec<u64> = entries.iter().map(|e| e.ino).collect();
                match handle.batch_get_attr(&inodes) {
                    Ok(stats) => {
                        if stats.len() < inodes.len() {
                            tracing::debug!(
                                path = %self.path,
                                requested = inodes.len(),
                                returned = stats.len(),
                                "partial attribute batch"
                            );
                        }
                        self.classify(&entries, &stats);
                        if entries.len() < self.batch_size {
                            return self.finish(handle).err();
                        }
                        self.state = ListState::AwaitingBatch(handle);
                    }
                    Err(code) => {
                        let err: UfsError = UfsError::BatchGetAttrFailed {
                            path: self.path.clone(),
                            code,
                        };
                        return Some(self.fail(handle, err));
                    }
                }
            }
            ListState::Done => self.state = ListState::Done,
            ListState::Failed => {}
        }
        None
    }

    fn is_finished(&self) -> bool {
        matches!(self.state, ListState::Done | ListState::Failed)
    }
}

impl Iterator for DirectoryEnumerator {
    type Item = Result<UfsStatus, UfsError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(status) = self.ready.pop_front() {
                return Some(Ok(status));
            }
            if self.is_finished() {
                return None;
            }
            if let Some(err) = self.step() {
                self.ready.clear();
                self.state = ListState::Failed;
                return Some(Err(err));
            }
        }
    }
}
