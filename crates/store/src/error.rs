//! Error types for store operations.

use std::fmt;

use thiserror::Error;

/// Negative status code returned by the native store.
///
/// The store reports failures the way the kernel does: a negated POSIX errno.
/// Codes outside the named set are still carried verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    pub const EPERM: Errno = Errno(-1);
    pub const ENOENT: Errno = Errno(-2);
    pub const EIO: Errno = Errno(-5);
    pub const EBADF: Errno = Errno(-9);
    pub const EEXIST: Errno = Errno(-17);
    pub const ENOTDIR: Errno = Errno(-20);
    pub const EISDIR: Errno = Errno(-21);
    pub const EINVAL: Errno = Errno(-22);
    pub const ENOTEMPTY: Errno = Errno(-39);

    /// Raw negative code.
    pub fn code(self) -> i32 {
        self.0
    }

    /// Symbolic name for the known codes.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Errno::EPERM => Some("EPERM"),
            Errno::ENOENT => Some("ENOENT"),
            Errno::EIO => Some("EIO"),
            Errno::EBADF => Some("EBADF"),
            Errno::EEXIST => Some("EEXIST"),
            Errno::ENOTDIR => Some("ENOTDIR"),
            Errno::EISDIR => Some("EISDIR"),
            Errno::EINVAL => Some("EINVAL"),
            Errno::ENOTEMPTY => Some("ENOTEMPTY"),
            _ => None,
        }
    }

    /// Split a native `int` return into a non-negative value or an errno.
    ///
    /// # Arguments
    /// * `ret` - Value returned by the native call
    pub fn check(ret: i64) -> Result<u64, Errno> {
        if ret < 0 {
            Err(Errno(ret as i32))
        } else {
            Ok(ret as u64)
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "code {}", self.0),
        }
    }
}

impl std::error::Error for Errno {}

/// Errors raised by the store layer itself (sessions and native records).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Invalid or incomplete client settings.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The native client refused to start.
    #[error("CubeFS initialize failed for cubefs://{volume}, code={code}")]
    ConnectFailed { volume: String, code: Errno },

    /// The session was shut down; its client must not be used any more.
    #[error("Store session is closed")]
    SessionClosed,

    /// A fixed-layout native record could not be decoded.
    #[error("Malformed {record} record: {message}")]
    MalformedRecord {
        record: &'static str,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_display() {
        assert_eq!(Errno::ENOENT.to_string(), "ENOENT (-2)");
        assert_eq!(Errno(-1000).to_string(), "code -1000");
    }

    #[test]
    fn test_errno_check() {
        assert_eq!(Errno::check(42), Ok(42));
        assert_eq!(Errno::check(0), Ok(0));
        assert_eq!(Errno::check(-17), Err(Errno::EEXIST));
    }

    #[test]
    fn test_store_error_messages() {
        let err: StoreError = StoreError::ConnectFailed {
            volume: "vol1".into(),
            code: Errno::EIO,
        };
        assert_eq!(
            err.to_string(),
            "CubeFS initialize failed for cubefs://vol1, code=EIO (-5)"
        );
    }
}
