//! In-memory store client.
//!
//! Implements the full `StoreClient` contract over an inode tree held in
//! memory. It records every call and can inject faults, which makes it the
//! backing store for the adapter's tests and for embedders that want to test
//! against the same contract without a cluster.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Errno, StoreError};
use crate::traits::StoreClient;
use crate::types::{
    decode_dirents, decode_stats, Dirent, Fd, OpenFlags, Stat, DT_DIR, DT_REG, S_IFDIR, S_IFMT,
    S_IFREG,
};

/// Inode id of the volume root.
pub const ROOT_INO: u64 = 1;

/// Block size reported in stats.
const STAT_BLOCK_SIZE: u32 = 4096;

// ============================================================================
// Faults and call accounting
// ============================================================================

/// Faults to inject into subsequent calls.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Cap on bytes accepted per write; the store reports the capped count.
    pub short_write: Option<usize>,
    /// Extra bytes added to the count every read reports.
    pub read_overreport: Option<usize>,
    /// Error returned by every flush.
    pub flush_error: Option<Errno>,
    /// Error returned by every close (the descriptor is still released).
    pub close_error: Option<Errno>,
    /// Error returned by every readdir.
    pub readdir_error: Option<Errno>,
    /// Error returned by every batch attribute lookup.
    pub batch_error: Option<Errno>,
    /// Cap on stats returned per batch attribute lookup.
    pub batch_limit: Option<usize>,
    /// Number of upcoming mkdirs calls that fail with `EIO`.
    pub failing_mkdirs: u32,
    /// Number of upcoming unlink calls that fail with `EIO`.
    pub failing_unlinks: u32,
    /// When set, mkdirs succeeds without creating anything.
    pub mkdirs_is_noop: bool,
}

/// Record of calls made against the store.
#[derive(Debug, Clone, Default)]
pub struct CallCounts {
    pub opens: usize,
    pub reads: usize,
    pub writes: usize,
    pub flushes: usize,
    pub closes: usize,
    pub readdirs: usize,
    pub batch_get_attrs: usize,
    pub mkdirs: usize,
    pub unlinks: usize,
    pub rmdirs: usize,
    pub renames: usize,
    /// `(offset, len)` of every read request.
    pub read_log: Vec<(u64, usize)>,
    /// `(offset, len)` of every write request.
    pub write_log: Vec<(u64, usize)>,
    /// Number of entries returned by each readdir.
    pub readdir_sizes: Vec<usize>,
    /// Paths passed to mkdirs, in order.
    pub mkdirs_paths: Vec<String>,
}

// ============================================================================
// Inode tree
// ============================================================================

#[derive(Debug)]
enum NodeKind {
    Dir { children: BTreeMap<String, u64> },
    File { data: Vec<u8> },
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    mode: u32,
    atime: (i64, u32),
    mtime: (i64, u32),
    ctime: (i64, u32),
}

impl Node {
    fn dir(mode: u32) -> Self {
        let now: (i64, u32) = now();
        Self {
            kind: NodeKind::Dir {
                children: BTreeMap::new(),
            },
            mode: S_IFDIR | (mode & !S_IFMT),
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    fn file(mode: u32) -> Self {
        let now: (i64, u32) = now();
        Self {
            kind: NodeKind::File { data: Vec::new() },
            mode: S_IFREG | (mode & !S_IFMT),
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir { .. })
    }

    fn touch(&mut self) {
        let now: (i64, u32) = now();
        self.mtime = now;
        self.ctime = now;
    }

    fn stat(&self, ino: u64) -> Stat {
        let (size, nlink): (u64, u32) = match &self.kind {
            NodeKind::File { data } => (data.len() as u64, 1),
            NodeKind::Dir { children } => (0, 2 + children.len() as u32),
        };
        Stat {
            ino,
            size,
            blocks: size.div_ceil(512),
            atime: self.atime.0,
            mtime: self.mtime.0,
            ctime: self.ctime.0,
            atime_nsec: self.atime.1,
            mtime_nsec: self.mtime.1,
            ctime_nsec: self.ctime.1,
            mode: self.mode,
            nlink,
            blk_size: STAT_BLOCK_SIZE,
            uid: 0,
            gid: 0,
        }
    }
}

fn now() -> (i64, u32) {
    let elapsed: std::time::Duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (elapsed.as_secs() as i64, elapsed.subsec_nanos())
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c: &&str| !c.is_empty()).collect()
}

#[derive(Debug)]
struct OpenFile {
    ino: u64,
    flags: OpenFlags,
    /// Last name returned by readdir on this descriptor.
    readdir_cursor: Option<String>,
}

#[derive(Debug)]
struct Inner {
    nodes: HashMap<u64, Node>,
    next_ino: u64,
    fds: HashMap<i32, OpenFile>,
    next_fd: i32,
    faults: FaultPlan,
    calls: CallCounts,
    shut_down: bool,
}

impl Inner {
    fn new() -> Self {
        let mut nodes: HashMap<u64, Node> = HashMap::new();
        nodes.insert(ROOT_INO, Node::dir(0o755));
        Self {
            nodes,
            next_ino: ROOT_INO + 1,
            fds: HashMap::new(),
            next_fd: 3,
            faults: FaultPlan::default(),
            calls: CallCounts::default(),
            shut_down: false,
        }
    }

    fn check_running(&self) -> Result<(), Errno> {
        if self.shut_down {
            Err(Errno::EIO)
        } else {
            Ok(())
        }
    }

    fn lookup(&self, path: &str) -> Result<u64, Errno> {
        let mut ino: u64 = ROOT_INO;
        for name in components(path) {
            let node: &Node = self.nodes.get(&ino).ok_or(Errno::ENOENT)?;
            match &node.kind {
                NodeKind::Dir { children } => {
                    ino = *children.get(name).ok_or(Errno::ENOENT)?;
                }
                NodeKind::File { .. } => return Err(Errno::ENOTDIR),
            }
        }
        Ok(ino)
    }

    /// Resolve the parent directory inode and the final name of `path`.
    fn lookup_parent<'p>(&self, path: &'p str) -> Result<(u64, &'p str), Errno> {
        let parts: Vec<&'p str> = components(path);
        let (name, dirs): (&&'p str, &[&'p str]) = parts.split_last().ok_or(Errno::EINVAL)?;
        let parent: u64 = self.lookup(&dirs.join("/"))?;
        if !self.nodes.get(&parent).is_some_and(Node::is_dir) {
            return Err(Errno::ENOTDIR);
        }
        Ok((parent, *name))
    }

    fn children_mut(&mut self, dir: u64) -> Result<&mut BTreeMap<String, u64>, Errno> {
        match self.nodes.get_mut(&dir).map(|n: &mut Node| &mut n.kind) {
            Some(NodeKind::Dir { children }) => Ok(children),
            Some(NodeKind::File { .. }) => Err(Errno::ENOTDIR),
            None => Err(Errno::ENOENT),
        }
    }

    fn insert_child(&mut self, parent: u64, name: &str, node: Node) -> Result<u64, Errno> {
        let ino: u64 = self.next_ino;
        self.children_mut(parent)?.insert(name.to_string(), ino);
        self.next_ino += 1;
        self.nodes.insert(ino, node);
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.touch();
        }
        Ok(ino)
    }

    fn open_file(&self, fd: Fd) -> Result<&OpenFile, Errno> {
        self.fds.get(&fd.0).ok_or(Errno::EBADF)
    }

    fn mkdirs(&mut self, path: &str, mode: u32) -> Result<(), Errno> {
        let mut ino: u64 = ROOT_INO;
        let mut created: bool = false;
        for name in components(path) {
            let existing: Option<u64> = self.children_mut(ino)?.get(name).copied();
            ino = match existing {
                Some(child) => child,
                None => {
                    created = true;
                    self.insert_child(ino, name, Node::dir(mode))?
                }
            };
        }
        match (created, self.nodes.get(&ino).is_some_and(Node::is_dir)) {
            (true, _) => Ok(()),
            (false, true) => Err(Errno::EEXIST),
            (false, false) => Err(Errno::ENOTDIR),
        }
    }

    /// Whether walking `path` from the root passes through inode `ino`.
    fn path_passes_through(&self, ino: u64, path: &str) -> bool {
        let mut current: u64 = ROOT_INO;
        if current == ino {
            return true;
        }
        for name in components(path) {
            let next: Option<u64> = match self.nodes.get(&current).map(|n: &Node| &n.kind) {
                Some(NodeKind::Dir { children }) => children.get(name).copied(),
                _ => None,
            };
            match next {
                Some(child) if child == ino => return true,
                Some(child) => current = child,
                None => return false,
            }
        }
        false
    }
}

// ============================================================================
// Memory Store Client
// ============================================================================

/// In-memory `StoreClient` with call accounting and fault injection.
#[derive(Debug)]
pub struct MemoryStoreClient {
    inner: Mutex<Inner>,
}

impl Default for MemoryStoreClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreClient {
    /// Create an empty volume containing only the root directory.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create (or replace) a file with the given content, creating parents.
    ///
    /// # Arguments
    /// * `path` - Store path of the file
    /// * `data` - File content
    pub fn put_file(&self, path: &str, data: &[u8]) {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        let parts: Vec<&str> = components(path);
        if let Some((_, dirs)) = parts.split_last() {
            let _ = inner.mkdirs(&dirs.join("/"), 0o755);
        }
        let (parent, name) = match inner.lookup_parent(path) {
            Ok(found) => found,
            Err(_) => return,
        };
        let existing: Option<u64> = inner
            .children_mut(parent)
            .ok()
            .and_then(|c: &mut BTreeMap<String, u64>| c.get(name).copied());
        let ino: u64 = match existing {
            Some(ino) => ino,
            None => match inner.insert_child(parent, name, Node::file(0o644)) {
                Ok(ino) => ino,
                Err(_) => return,
            },
        };
        if let Some(node) = inner.nodes.get_mut(&ino) {
            node.kind = NodeKind::File {
                data: data.to_vec(),
            };
            node.touch();
        }
    }

    /// Create a directory tree (no error if it exists).
    pub fn put_dir(&self, path: &str) {
        let _ = self.lock().mkdirs(path, 0o755);
    }

    /// Content of a regular file, if it exists.
    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        let inner: MutexGuard<'_, Inner> = self.lock();
        let ino: u64 = inner.lookup(path).ok()?;
        match &inner.nodes.get(&ino)?.kind {
            NodeKind::File { data } => Some(data.clone()),
            NodeKind::Dir { .. } => None,
        }
    }

    /// Whether a path exists.
    pub fn contains(&self, path: &str) -> bool {
        self.lock().lookup(path).is_ok()
    }

    /// Replace the fault plan.
    pub fn set_faults(&self, faults: FaultPlan) {
        self.lock().faults = faults;
    }

    /// Snapshot of the calls made so far.
    pub fn calls(&self) -> CallCounts {
        self.lock().calls.clone()
    }

    /// Reset call accounting.
    pub fn reset_calls(&self) {
        self.lock().calls = CallCounts::default();
    }

    /// Number of descriptors currently open.
    pub fn open_descriptors(&self) -> usize {
        self.lock().fds.len()
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }
}

impl StoreClient for MemoryStoreClient {
    fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<Fd, Errno> {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        inner.check_running()?;
        inner.calls.opens += 1;

        let ino: u64 = match inner.lookup(path) {
            Ok(ino) => {
                if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                    return Err(Errno::EEXIST);
                }
                let node: &mut Node = inner.nodes.get_mut(&ino).ok_or(Errno::ENOENT)?;
                if node.is_dir() && flags.is_writable() {
                    return Err(Errno::EISDIR);
                }
                if flags.contains(OpenFlags::TRUNC) && flags.is_writable() {
                    node.kind = NodeKind::File { data: Vec::new() };
                    node.touch();
                }
                ino
            }
            Err(Errno::ENOENT) if flags.contains(OpenFlags::CREAT) => {
                let (parent, name) = inner.lookup_parent(path)?;
                inner.insert_child(parent, name, Node::file(mode))?
            }
            Err(e) => return Err(e),
        };

        let fd: i32 = inner.next_fd;
        inner.next_fd += 1;
        inner.fds.insert(
            fd,
            OpenFile {
                ino,
                flags,
                readdir_cursor: None,
            },
        );
        Ok(Fd(fd))
    }

    fn read(&self, fd: Fd, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        inner.check_running()?;
        inner.calls.reads += 1;
        inner.calls.read_log.push((offset, buf.len()));

        let ino: u64 = inner.open_file(fd)?.ino;
        match &inner.nodes.get(&ino).ok_or(Errno::ENOENT)?.kind {
            NodeKind::File { data } => {
                let start: usize = (offset as usize).min(data.len());
                let n: usize = buf.len().min(data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                Ok(n + inner.faults.read_overreport.unwrap_or(0))
            }
            NodeKind::Dir { .. } => Err(Errno::EISDIR),
        }
    }

    fn write(&self, fd: Fd, buf: &[u8], offset: u64) -> Result<usize, Errno> {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        inner.check_running()?;
        inner.calls.writes += 1;
        inner.calls.write_log.push((offset, buf.len()));

        let open: &OpenFile = inner.open_file(fd)?;
        if !open.flags.is_writable() {
            return Err(Errno::EBADF);
        }
        let ino: u64 = open.ino;
        let accepted: usize = inner
            .faults
            .short_write
            .map_or(buf.len(), |cap: usize| buf.len().min(cap));

        let node: &mut Node = inner.nodes.get_mut(&ino).ok_or(Errno::ENOENT)?;
        match &mut node.kind {
            NodeKind::File { data } => {
                let start: usize = offset as usize;
                let end: usize = start + accepted;
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(&buf[..accepted]);
            }
            NodeKind::Dir { .. } => return Err(Errno::EISDIR),
        }
        node.touch();
        Ok(accepted)
    }

    fn flush(&self, fd: Fd) -> Result<(), Errno> {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        inner.check_running()?;
        inner.calls.flushes += 1;
        inner.open_file(fd)?;
        match inner.faults.flush_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn close(&self, fd: Fd) -> Result<(), Errno> {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        inner.calls.closes += 1;
        inner.fds.remove(&fd.0).ok_or(Errno::EBADF)?;
        match inner.faults.close_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn get_attr(&self, path: &str) -> Result<Stat, Errno> {
        let inner: MutexGuard<'_, Inner> = self.lock();
        inner.check_running()?;
        let ino: u64 = inner.lookup(path)?;
        inner
            .nodes
            .get(&ino)
            .map(|n: &Node| n.stat(ino))
            .ok_or(Errno::ENOENT)
    }

    fn mkdirs(&self, path: &str, mode: u32) -> Result<(), Errno> {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        inner.check_running()?;
        inner.calls.mkdirs += 1;
        inner.calls.mkdirs_paths.push(path.to_string());
        if inner.faults.failing_mkdirs > 0 {
            inner.faults.failing_mkdirs -= 1;
            return Err(Errno::EIO);
        }
        if inner.faults.mkdirs_is_noop {
            return Ok(());
        }
        inner.mkdirs(path, mode)
    }

    fn unlink(&self, path: &str) -> Result<(), Errno> {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        inner.check_running()?;
        inner.calls.unlinks += 1;
        if inner.faults.failing_unlinks > 0 {
            inner.faults.failing_unlinks -= 1;
            return Err(Errno::EIO);
        }
        let ino: u64 = inner.lookup(path)?;
        if inner.nodes.get(&ino).is_some_and(Node::is_dir) {
            return Err(Errno::EISDIR);
        }
        let (parent, name) = inner.lookup_parent(path)?;
        inner.children_mut(parent)?.remove(name);
        inner.nodes.remove(&ino);
        Ok(())
    }

    fn rmdir(&self, path: &str) -> Result<(), Errno> {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        inner.check_running()?;
        inner.calls.rmdirs += 1;
        let ino: u64 = inner.lookup(path)?;
        if ino == ROOT_INO {
            return Err(Errno::EPERM);
        }
        match &inner.nodes.get(&ino).ok_or(Errno::ENOENT)?.kind {
            NodeKind::Dir { children } if !children.is_empty() => return Err(Errno::ENOTEMPTY),
            NodeKind::Dir { .. } => {}
            NodeKind::File { .. } => return Err(Errno::ENOTDIR),
        }
        let (parent, name) = inner.lookup_parent(path)?;
        inner.children_mut(parent)?.remove(name);
        inner.nodes.remove(&ino);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), Errno> {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        inner.check_running()?;
        inner.calls.renames += 1;
        let ino: u64 = inner.lookup(from)?;
        if ino == ROOT_INO {
            return Err(Errno::EINVAL);
        }
        if inner.lookup(to).is_ok() {
            return Err(Errno::EEXIST);
        }
        let (to_parent, to_name) = inner.lookup_parent(to)?;
        if inner.path_passes_through(ino, to) {
            return Err(Errno::EINVAL);
        }
        let (from_parent, from_name) = inner.lookup_parent(from)?;
        inner.children_mut(from_parent)?.remove(from_name);
        inner.children_mut(to_parent)?.insert(to_name.to_string(), ino);
        if let Some(node) = inner.nodes.get_mut(&ino) {
            node.ctime = now();
        }
        Ok(())
    }

    fn readdir(&self, fd: Fd, max_entries: usize) -> Result<Vec<Dirent>, Errno> {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        inner.check_running()?;
        inner.calls.readdirs += 1;
        if let Some(e) = inner.faults.readdir_error {
            return Err(e);
        }

        let (ino, cursor): (u64, Option<String>) = {
            let open: &OpenFile = inner.open_file(fd)?;
            (open.ino, open.readdir_cursor.clone())
        };
        let entries: Vec<Dirent> = match &inner.nodes.get(&ino).ok_or(Errno::ENOENT)?.kind {
            NodeKind::Dir { children } => {
                let lower: Bound<&str> = match &cursor {
                    Some(last) => Bound::Excluded(last.as_str()),
                    None => Bound::Unbounded,
                };
                children
                    .range::<str, _>((lower, Bound::Unbounded))
                    .take(max_entries)
                    .map(|(name, child): (&String, &u64)| {
                        let d_type: u8 = match inner.nodes.get(child) {
                            Some(n) if n.is_dir() => DT_DIR,
                            _ => DT_REG,
                        };
                        Dirent::new(*child, name, d_type)
                    })
                    .collect()
            }
            NodeKind::File { .. } => return Err(Errno::ENOTDIR),
        };

        if let Some(last) = entries.last() {
            let name: String = last.name();
            if let Some(open) = inner.fds.get_mut(&fd.0) {
                open.readdir_cursor = Some(name);
            }
        }
        inner.calls.readdir_sizes.push(entries.len());
        let buf: Vec<u8> = entries.iter().flat_map(|d: &Dirent| d.encode()).collect();
        unpack(decode_dirents, &buf, entries.len())
    }

    fn batch_get_attr(&self, fd: Fd, inodes: &[u64]) -> Result<Vec<Stat>, Errno> {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        inner.check_running()?;
        inner.calls.batch_get_attrs += 1;
        inner.open_file(fd)?;
        if let Some(e) = inner.faults.batch_error {
            return Err(e);
        }
        let limit: usize = inner.faults.batch_limit.unwrap_or(usize::MAX);
        let stats: Vec<Stat> = inodes
            .iter()
            .filter_map(|ino: &u64| inner.nodes.get(ino).map(|n: &Node| n.stat(*ino)))
            .take(limit)
            .collect();
        let buf: Vec<u8> = stats.iter().flat_map(|st: &Stat| st.encode()).collect();
        unpack(decode_stats, &buf, stats.len())
    }

    fn fchmod(&self, fd: Fd, mode: u32) -> Result<(), Errno> {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        inner.check_running()?;
        let ino: u64 = inner.open_file(fd)?.ino;
        let node: &mut Node = inner.nodes.get_mut(&ino).ok_or(Errno::ENOENT)?;
        node.mode = (node.mode & S_IFMT) | (mode & !S_IFMT);
        node.ctime = now();
        Ok(())
    }

    fn shutdown(&self) {
        let mut inner: MutexGuard<'_, Inner> = self.lock();
        if !inner.fds.is_empty() {
            log::warn!(
                "Shutting down store with {} descriptors still open",
                inner.fds.len()
            );
        }
        inner.shut_down = true;
    }
}

/// Read packed records back the way a native batch call hands them over:
/// a record buffer plus an `int` count that may carry an errno.
fn unpack<T>(
    decode: fn(&[u8], usize) -> Result<Vec<T>, StoreError>,
    buf: &[u8],
    reported: usize,
) -> Result<Vec<T>, Errno> {
    let count: u64 = Errno::check(reported as i64)?;
    decode(buf, count as usize).map_err(|e: StoreError| {
        log::error!("Malformed record buffer: {}", e);
        Errno::EIO
    })
}
