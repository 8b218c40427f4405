//! Native store records and flags.
//!
//! `Stat` and `Dirent` mirror the fixed-layout structures the native client
//! fills in (`cfs_stat_info`, `cfs_dirent`). They are decoded from explicit
//! little-endian byte layouts rather than by reinterpreting memory.

use std::ops::BitOr;

use crate::error::StoreError;

/// File type mask within `mode`.
pub const S_IFMT: u32 = 0o170000;
/// Directory type bits.
pub const S_IFDIR: u32 = 0o040000;
/// Regular file type bits.
pub const S_IFREG: u32 = 0o100000;
/// Symbolic link type bits.
pub const S_IFLNK: u32 = 0o120000;

/// Dirent type for a directory.
pub const DT_DIR: u8 = 4;
/// Dirent type for a regular file.
pub const DT_REG: u8 = 8;

/// Capacity of the name field in a native dirent.
pub const DIRENT_NAME_CAPACITY: usize = 256;

/// Descriptor issued by the store for an open file or directory.
///
/// Only meaningful to the session that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fd(pub i32);

/// Flags passed to `StoreClient::open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags(0o0);
    pub const WRONLY: OpenFlags = OpenFlags(0o1);
    pub const RDWR: OpenFlags = OpenFlags(0o2);
    pub const CREAT: OpenFlags = OpenFlags(0o100);
    pub const EXCL: OpenFlags = OpenFlags(0o200);
    pub const TRUNC: OpenFlags = OpenFlags(0o1000);

    /// Check whether every bit of `other` is set.
    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the descriptor may be written.
    pub fn is_writable(self) -> bool {
        self.0 & 0o3 != 0
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

// ============================================================================
// Stat
// ============================================================================

/// Inode attributes as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub atime_nsec: u32,
    pub mtime_nsec: u32,
    pub ctime_nsec: u32,
    /// File type and permission bits.
    pub mode: u32,
    pub nlink: u32,
    pub blk_size: u32,
    pub uid: u32,
    pub gid: u32,
}

impl Stat {
    /// Size of the encoded record in bytes.
    pub const ENCODED_LEN: usize = 80;

    /// Whether the mode describes a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Whether the mode describes a regular file.
    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// Permission bits without the file type.
    pub fn permissions(&self) -> u32 {
        self.mode & !S_IFMT
    }

    /// Modification time in milliseconds since epoch.
    pub fn mtime_ms(&self) -> i64 {
        self.mtime * 1000 + (self.mtime_nsec / 1_000_000) as i64
    }

    /// Decode a record from its little-endian wire layout.
    ///
    /// # Arguments
    /// * `bytes` - At least `ENCODED_LEN` bytes; extra bytes are ignored
    ///
    /// # Errors
    /// Returns `StoreError::MalformedRecord` if the buffer is too short.
    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(StoreError::MalformedRecord {
                record: "stat",
                message: format!(
                    "expected {} bytes, got {}",
                    Self::ENCODED_LEN,
                    bytes.len()
                ),
            });
        }

        let mut reader: RecordReader<'_> = RecordReader::new(bytes);
        Ok(Self {
            ino: reader.u64(),
            size: reader.u64(),
            blocks: reader.u64(),
            atime: reader.i64(),
            mtime: reader.i64(),
            ctime: reader.i64(),
            atime_nsec: reader.u32(),
            mtime_nsec: reader.u32(),
            ctime_nsec: reader.u32(),
            mode: reader.u32(),
            nlink: reader.u32(),
            blk_size: reader.u32(),
            uid: reader.u32(),
            gid: reader.u32(),
        })
    }

    /// Encode the record into its little-endian wire layout.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out: [u8; Self::ENCODED_LEN] = [0u8; Self::ENCODED_LEN];
        let mut pos: usize = 0;
        for field in [self.ino, self.size, self.blocks] {
            out[pos..pos + 8].copy_from_slice(&field.to_le_bytes());
            pos += 8;
        }
        for field in [self.atime, self.mtime, self.ctime] {
            out[pos..pos + 8].copy_from_slice(&field.to_le_bytes());
            pos += 8;
        }
        for field in [
            self.atime_nsec,
            self.mtime_nsec,
            self.ctime_nsec,
            self.mode,
            self.nlink,
            self.blk_size,
            self.uid,
            self.gid,
        ] {
            out[pos..pos + 4].copy_from_slice(&field.to_le_bytes());
            pos += 4;
        }
        out
    }
}

/// Decode `count` consecutive stat records from a native batch buffer.
///
/// # Arguments
/// * `buf` - Buffer holding packed records
/// * `count` - Number of records the native call reported
pub fn decode_stats(buf: &[u8], count: usize) -> Result<Vec<Stat>, StoreError> {
    (0..count)
        .map(|i: usize| {
            let start: usize = i * Stat::ENCODED_LEN;
            let record: &[u8] = buf.get(start..).unwrap_or(&[]);
            Stat::decode(record)
        })
        .collect()
}

// ============================================================================
// Dirent
// ============================================================================

/// A single directory entry as returned by readdir.
#[derive(Clone, PartialEq, Eq)]
pub struct Dirent {
    pub ino: u64,
    /// Name bytes; only the first `name_len` are meaningful.
    pub name: [u8; DIRENT_NAME_CAPACITY],
    pub d_type: u8,
    pub name_len: u32,
}

impl Dirent {
    /// Size of the encoded record in bytes (includes 3 bytes of padding).
    pub const ENCODED_LEN: usize = 272;

    /// Build an entry from a name.
    ///
    /// Names longer than the native field are truncated at a byte boundary.
    ///
    /// # Arguments
    /// * `ino` - Inode id of the entry
    /// * `name` - Entry name
    /// * `d_type` - `DT_DIR`, `DT_REG` or another native type
    pub fn new(ino: u64, name: &str, d_type: u8) -> Self {
        let mut buf: [u8; DIRENT_NAME_CAPACITY] = [0u8; DIRENT_NAME_CAPACITY];
        let len: usize = name.len().min(DIRENT_NAME_CAPACITY);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            ino,
            name: buf,
            d_type,
            name_len: len as u32,
        }
    }

    /// Decode the entry name as UTF-8 up to `name_len`.
    pub fn name(&self) -> String {
        let len: usize = (self.name_len as usize).min(DIRENT_NAME_CAPACITY);
        String::from_utf8_lossy(&self.name[..len]).into_owned()
    }

    /// Decode an entry from its little-endian wire layout.
    ///
    /// # Errors
    /// Returns `StoreError::MalformedRecord` if the buffer is too short or the
    /// name length exceeds the name field.
    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(StoreError::MalformedRecord {
                record: "dirent",
                message: format!(
                    "expected {} bytes, got {}",
                    Self::ENCODED_LEN,
                    bytes.len()
                ),
            });
        }

        let mut reader: RecordReader<'_> = RecordReader::new(bytes);
        let ino: u64 = reader.u64();
        let mut name: [u8; DIRENT_NAME_CAPACITY] = [0u8; DIRENT_NAME_CAPACITY];
        name.copy_from_slice(reader.take(DIRENT_NAME_CAPACITY));
        let d_type: u8 = reader.take(1)[0];
        reader.take(3);
        let name_len: u32 = reader.u32();

        if name_len as usize > DIRENT_NAME_CAPACITY {
            return Err(StoreError::MalformedRecord {
                record: "dirent",
                message: format!("name length {} exceeds {}", name_len, DIRENT_NAME_CAPACITY),
            });
        }

        Ok(Self {
            ino,
            name,
            d_type,
            name_len,
        })
    }

    /// Encode the entry into its little-endian wire layout.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out: [u8; Self::ENCODED_LEN] = [0u8; Self::ENCODED_LEN];
        out[..8].copy_from_slice(&self.ino.to_le_bytes());
        out[8..8 + DIRENT_NAME_CAPACITY].copy_from_slice(&self.name);
        out[264] = self.d_type;
        out[268..272].copy_from_slice(&self.name_len.to_le_bytes());
        out
    }
}

impl std::fmt::Debug for Dirent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dirent")
            .field("ino", &self.ino)
            .field("name", &self.name())
            .field("d_type", &self.d_type)
            .finish()
    }
}

/// Decode `count` consecutive dirent records from a native readdir buffer.
///
/// # Arguments
/// * `buf` - Buffer holding packed records
/// * `count` - Number of records the native call reported
pub fn decode_dirents(buf: &[u8], count: usize) -> Result<Vec<Dirent>, StoreError> {
    (0..count)
        .map(|i: usize| {
            let start: usize = i * Dirent::ENCODED_LEN;
            let record: &[u8] = buf.get(start..).unwrap_or(&[]);
            Dirent::decode(record)
        })
        .collect()
}

/// Sequential little-endian field reader over a length-checked record.
struct RecordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice: &'a [u8] = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        slice
    }

    fn u64(&mut self) -> u64 {
        let mut raw: [u8; 8] = [0u8; 8];
        raw.copy_from_slice(self.take(8));
        u64::from_le_bytes(raw)
    }

    fn i64(&mut self) -> i64 {
        let mut raw: [u8; 8] = [0u8; 8];
        raw.copy_from_slice(self.take(8));
        i64::from_le_bytes(raw)
    }

    fn u32(&mut self) -> u32 {
        let mut raw: [u8; 4] = [0u8; 4];
        raw.copy_from_slice(self.take(4));
        u32::from_le_bytes(raw)
    }
}
