//! CubeFS under-filesystem facade.
//!
//! Exposes the stream, listing and metadata operations the enclosing storage
//! framework expects, on top of one shared store session.
//!
//! # Path handling
//!
//! Every entry point accepts either a full `cubefs://volume/a/b` URI or a
//! store path such as `/a/b`; both are reduced to the normalized store path
//! before any store call.
//!
//! # Missing entries
//!
//! Query-style operations (`exists`, `is_file`, `delete_*`, `rename_*`,
//! `mkdirs`) answer `false` for a missing entry. Operations that must return
//! something about the entry (`get_status`, `open`, `list_status` on a
//! missing path) fail with `UfsError::NotFound`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use backon::BlockingRetryable;
use cfs_ufs_common::{format_path, parent_path, UNDER_FS_TYPE};
use cfs_ufs_store::{Errno, OpenFlags, OwnedHandle, Stat, StoreClient, StoreSession};

use crate::buffer_pool::BufferPool;
use crate::create::CreateCoordinator;
use crate::error::UfsError;
use crate::listing::DirectoryEnumerator;
use crate::options::{CreateOptions, DeleteOptions, MkdirsOptions, OpenOptions, UfsOptions};
use crate::output::{temporary_path, AtomicWriteStream, UfsOutputStream};
use crate::read::BufferedReadStream;
use crate::status::{ProcessIdentity, UfsDirectoryStatus, UfsFileStatus, UfsStatus};
use crate::write::BufferedWriteStream;

/// Under filesystem backed by a CubeFS volume.
pub struct CubeFsUnderFileSystem {
    session: Arc<StoreSession>,
    options: UfsOptions,
    pool: BufferPool,
    identity: ProcessIdentity,
}

impl CubeFsUnderFileSystem {
    /// Create the facade. The store client starts on first use.
    ///
    /// # Arguments
    /// * `session` - Session owning the store client
    /// * `options` - Buffer sizes and retry policies
    ///
    /// # Errors
    /// Returns `UfsError::InvalidConfig` if `options` fail validation.
    pub fn new(session: Arc<StoreSession>, options: UfsOptions) -> Result<Self, UfsError> {
        options.validate()?;
        let pool: BufferPool = BufferPool::new(options.pool.clone());
        Ok(Self {
            session,
            options,
            pool,
            identity: ProcessIdentity::current(),
        })
    }

    /// Report a fixed owner and group instead of the process user.
    ///
    /// # Arguments
    /// * `identity` - Owner and group for every status
    pub fn with_identity(mut self, identity: ProcessIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn options(&self) -> &UfsOptions {
        &self.options
    }

    pub fn session(&self) -> &Arc<StoreSession> {
        &self.session
    }

    /// Pool the read streams draw their buffers from.
    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    fn client(&self) -> Result<Arc<dyn StoreClient>, UfsError> {
        Ok(self.session.client()?)
    }

    // ========================================================================
    // Streams
    // ========================================================================

    /// Create (or truncate) a file and return a stream writing it.
    ///
    /// Missing parent directories are created. With `ensure_atomic` the data
    /// goes to a temporary sibling that is renamed onto `path` on close.
    ///
    /// # Arguments
    /// * `path` - Store path or URI of the file
    /// * `options` - Mode and atomicity
    pub fn create(&self, path: &str, options: CreateOptions) -> Result<UfsOutputStream, UfsError> {
        let path: String = format_path(path);
        let mode: u32 = options.mode.unwrap_or(self.options.default_file_mode);
        let client: Arc<dyn StoreClient> = self.client()?;
        let coordinator: CreateCoordinator = CreateCoordinator::new(client.clone(), &self.options);

        if !options.ensure_atomic {
            tracing::debug!(path = %path, mode, "create");
            return Ok(UfsOutputStream::Direct(
                coordinator.create_exclusive(&path, mode)?,
            ));
        }

        let temporary: String = temporary_path(&path);
        tracing::debug!(path = %path, temporary = %temporary, mode, "create atomic");
        let stream: BufferedWriteStream = coordinator.create_exclusive(&temporary, mode)?;
        Ok(UfsOutputStream::Atomic(AtomicWriteStream::new(
            stream, client, temporary, path,
        )))
    }

    /// Open a file for buffered reading.
    ///
    /// # Arguments
    /// * `path` - Store path or URI of the file
    /// * `options` - Initial read position
    pub fn open(&self, path: &str, options: OpenOptions) -> Result<BufferedReadStream, UfsError> {
        let path: String = format_path(path);
        let client: Arc<dyn StoreClient> = self.client()?;
        let handle: OwnedHandle = OwnedHandle::open(client, &path, OpenFlags::RDONLY, 0)
            .map_err(|code| UfsError::from_errno(code, &path))?;
        tracing::debug!(fd = handle.fd().0, path = %path, offset = options.offset, "open");

        let mut stream: BufferedReadStream =
            BufferedReadStream::new(handle, self.pool.acquire(self.options.read_buffer_size));
        stream.seek(options.offset)?;
        Ok(stream)
    }

    // ========================================================================
    // Status
    // ========================================================================

    fn stat(&self, path: &str) -> Result<Stat, UfsError> {
        self.client()?
            .get_attr(path)
            .map_err(|code| UfsError::from_errno(code, path))
    }

    /// Stat `path`, mapping a missing entry to `None`.
    fn try_stat(&self, path: &str) -> Result<Option<Stat>, UfsError> {
        match self.client()?.get_attr(path) {
            Ok(stat) => Ok(Some(stat)),
            Err(Errno::ENOENT) => Ok(None),
            Err(code) => Err(UfsError::from_errno(code, path)),
        }
    }

    /// Status of a file or directory.
    ///
    /// # Errors
    /// `NotFound` for a missing entry, `UnknownFileType` for symlinks and
    /// other special entries.
    pub fn get_status(&self, path: &str) -> Result<UfsStatus, UfsError> {
        let path: String = format_path(path);
        let stat: Stat = self.stat(&path)?;
        UfsStatus::try_from_stat(&path, &stat, &self.identity, self.options.block_size)
    }

    /// Status of a regular file.
    ///
    /// # Errors
    /// `IsDirectory` if `path` is a directory.
    pub fn get_file_status(&self, path: &str) -> Result<UfsFileStatus, UfsError> {
        match self.get_status(path)? {
            UfsStatus::File(file) => Ok(file),
            UfsStatus::Directory(dir) => Err(UfsError::IsDirectory { path: dir.path }),
        }
    }

    /// Status of a directory.
    ///
    /// # Errors
    /// A `Store` error with `ENOTDIR` if `path` is a file.
    pub fn get_directory_status(&self, path: &str) -> Result<UfsDirectoryStatus, UfsError> {
        match self.get_status(path)? {
            UfsStatus::Directory(dir) => Ok(dir),
            UfsStatus::File(file) => Err(UfsError::Store {
                path: file.path,
                code: Errno::ENOTDIR,
            }),
        }
    }

    pub fn exists(&self, path: &str) -> Result<bool, UfsError> {
        Ok(self.try_stat(&format_path(path))?.is_some())
    }

    pub fn is_file(&self, path: &str) -> Result<bool, UfsError> {
        Ok(self
            .try_stat(&format_path(path))?
            .is_some_and(|stat| stat.is_file()))
    }

    pub fn is_directory(&self, path: &str) -> Result<bool, UfsError> {
        Ok(self
            .try_stat(&format_path(path))?
            .is_some_and(|stat| stat.is_dir()))
    }

    /// Lazily enumerate the entries of a directory.
    ///
    /// A regular file yields no entries.
    pub fn list_status_iter(&self, path: &str) -> Result<DirectoryEnumerator, UfsError> {
        Ok(DirectoryEnumerator::new(
            self.client()?,
            format_path(path),
            self.options.list_batch_size,
            self.identity.clone(),
            self.options.block_size,
        ))
    }

    /// All entries of a directory; empty for a regular file.
    ///
    /// # Errors
    /// `NotFound` for a missing path; enumeration errors otherwise.
    pub fn list_status(&self, path: &str) -> Result<Vec<UfsStatus>, UfsError> {
        self.list_status_iter(path)?.list()
    }

    // ========================================================================
    // Metadata Mutations
    // ========================================================================

    /// Create a directory.
    ///
    /// # Returns
    /// `true` if the directory was created; `false` if it already existed,
    /// its parent is missing and `create_parent` is off, or every attempt
    /// failed.
    pub fn mkdirs(&self, path: &str, options: MkdirsOptions) -> Result<bool, UfsError> {
        let path: String = format_path(path);
        if self.exists(&path)? {
            return Ok(false);
        }
        if !options.create_parent && !self.is_directory(&parent_path(&path)?)? {
            tracing::debug!(path = %path, "parent missing and create_parent is off");
            return Ok(false);
        }

        let client: Arc<dyn StoreClient> = self.client()?;
        let mode: u32 = options.mode.unwrap_or(self.options.default_dir_mode);
        let created: Result<(), Errno> = (|| client.mkdirs(&path, mode))
            .retry(self.options.metadata_retry.backoff())
            .sleep(thread::sleep)
            .when(|code: &Errno| *code != Errno::EEXIST)
            .notify(|code: &Errno, after: Duration| {
                tracing::warn!(path = %path, "mkdirs failed: {}, retrying in {:?}", code, after)
            })
            .call();

        match created {
            Ok(()) => Ok(true),
            Err(Errno::EEXIST) => Ok(false),
            Err(code) => {
                tracing::warn!(path = %path, "giving up mkdirs: {}", code);
                Ok(false)
            }
        }
    }

    /// Delete a regular file.
    ///
    /// # Returns
    /// `true` once deleted; `false` if `path` is missing, is a directory, or
    /// every attempt failed.
    pub fn delete_file(&self, path: &str) -> Result<bool, UfsError> {
        let path: String = format_path(path);
        let client: Arc<dyn StoreClient> = self.client()?;
        let deleted: Result<(), Errno> = (|| client.unlink(&path))
            .retry(self.options.metadata_retry.backoff())
            .sleep(thread::sleep)
            .when(|code: &Errno| !matches!(*code, Errno::ENOENT | Errno::EISDIR))
            .notify(|code: &Errno, after: Duration| {
                tracing::warn!(path = %path, "delete failed: {}, retrying in {:?}", code, after)
            })
            .call();

        match deleted {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT) | Err(Errno::EISDIR) => Ok(false),
            Err(code) => {
                tracing::warn!(path = %path, "giving up delete: {}", code);
                Ok(false)
            }
        }
    }

    /// Delete a directory.
    ///
    /// A path that turns out to be a file is deleted as well.
    ///
    /// # Returns
    /// `true` once deleted; `false` if the path (or a child) disappeared
    /// first.
    ///
    /// # Errors
    /// `DirectoryNotEmpty` for a non-empty directory without `recursive`.
    pub fn delete_directory(&self, path: &str, options: DeleteOptions) -> Result<bool, UfsError> {
        let path: String = format_path(path);
        let client: Arc<dyn StoreClient> = self.client()?;
        self.delete_tree(&client, &path, options)
    }

    fn delete_tree(
        &self,
        client: &Arc<dyn StoreClient>,
        path: &str,
        options: DeleteOptions,
    ) -> Result<bool, UfsError> {
        match client.unlink(path) {
            Ok(()) => return Ok(true),
            Err(Errno::ENOENT) => return Ok(false),
            Err(Errno::EISDIR) => {}
            Err(code) => return Err(UfsError::from_errno(code, path)),
        }

        let children: Vec<UfsStatus> = match self.list_status(path) {
            Ok(children) => children,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        if !options.recursive && !children.is_empty() {
            return Err(UfsError::DirectoryNotEmpty {
                path: path.to_string(),
            });
        }
        for child in &children {
            if !self.delete_tree(client, child.path(), options)? {
                tracing::debug!(path = %child.path(), "child vanished during delete");
                return Ok(false);
            }
        }

        match client.rmdir(path) {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT) => Ok(false),
            Err(code) => Err(UfsError::from_errno(code, path)),
        }
    }

    /// Rename a regular file.
    ///
    /// # Returns
    /// `false` if `src` is not a file, or if the store reports `src` missing
    /// or `dst` taken.
    pub fn rename_file(&self, src: &str, dst: &str) -> Result<bool, UfsError> {
        if !self.is_file(src)? {
            return Ok(false);
        }
        self.rename(src, dst)
    }

    /// Rename a directory.
    ///
    /// # Returns
    /// `false` if `src` is not a directory, or if the store reports `src`
    /// missing or `dst` taken.
    pub fn rename_directory(&self, src: &str, dst: &str) -> Result<bool, UfsError> {
        if !self.is_directory(src)? {
            return Ok(false);
        }
        self.rename(src, dst)
    }

    fn rename(&self, src: &str, dst: &str) -> Result<bool, UfsError> {
        let src: String = format_path(src);
        let dst: String = format_path(dst);
        match self.client()?.rename(&src, &dst) {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT) | Err(Errno::EEXIST) => Ok(false),
            Err(code) => Err(UfsError::from_errno(code, &src)),
        }
    }

    /// Change permission bits.
    ///
    /// # Arguments
    /// * `path` - Store path or URI
    /// * `mode` - New permission bits
    pub fn set_mode(&self, path: &str, mode: u32) -> Result<(), UfsError> {
        let path: String = format_path(path);
        let handle: OwnedHandle = OwnedHandle::open(self.client()?, &path, OpenFlags::RDONLY, 0)
            .map_err(|code| UfsError::from_errno(code, &path))?;
        let fd: i32 = handle.fd().0;

        let changed: Result<(), UfsError> = handle
            .fchmod(mode)
            .map_err(|code| UfsError::from_errno(code, &path));
        let closed: Result<(), UfsError> = handle
            .close()
            .map_err(|code| UfsError::CloseFailed { fd, code });
        UfsError::combine(changed, closed)
    }

    /// Ownership is not tracked by the store; accepted and ignored.
    pub fn set_owner(&self, path: &str, user: Option<&str>, group: Option<&str>) -> Result<(), UfsError> {
        tracing::debug!(path, ?user, ?group, "set_owner is not supported, ignoring");
        Ok(())
    }

    // ========================================================================
    // Capabilities
    // ========================================================================

    pub fn supports_flush(&self) -> bool {
        true
    }

    /// Block size reported for every file.
    pub fn get_block_size_byte(&self, _path: &str) -> u64 {
        self.options.block_size
    }

    pub fn under_fs_type(&self) -> &'static str {
        UNDER_FS_TYPE
    }

    /// Tear down the store session. Later calls are no-ops; other
    /// operations fail with `SessionClosed` afterwards.
    pub fn close(&self) {
        self.pool.clear();
        self.session.shutdown();
    }
}

impl std::fmt::Debug for CubeFsUnderFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CubeFsUnderFileSystem")
            .field("session", &self.session)
            .field("options", &self.options)
            .field("pool", &self.pool)
            .finish()
    }
}
