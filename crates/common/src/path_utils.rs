//! Path normalization utilities for store paths.
//!
//! Store paths are always POSIX-style, absolute and scheme-free. Callers may
//! hand in framework URIs such as `cubefs://volume/dir/file`; everything here
//! works on strings so host path conventions never leak in.

use crate::error::PathError;

/// Lexical path normalization without store access.
///
/// Removes empty and `.` components and resolves `..` components lexically.
/// `..` at the root stays at the root.
///
/// # Arguments
/// * `path` - Path to normalize
///
/// # Returns
/// Absolute path with a single leading `/` and no trailing `/`.
pub fn lexical_normalize(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            _ => components.push(component),
        }
    }

    format!("/{}", components.join("/"))
}

/// Convert a framework URI or plain path to a store path.
///
/// Strips `scheme://authority` if present, then normalizes lexically.
///
/// # Arguments
/// * `uri` - URI like `cubefs://volume/a/b` or path like `/a/b`
///
/// # Returns
/// The store path, e.g. `/a/b`.
pub fn format_path(uri: &str) -> String {
    let without_scheme: &str = match uri.find("://") {
        Some(idx) => {
            let rest: &str = &uri[idx + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "/",
            }
        }
        None => uri,
    };
    lexical_normalize(without_scheme)
}

/// Get the parent of a store path.
///
/// # Arguments
/// * `path` - Path or URI to take the parent of
///
/// # Returns
/// The normalized parent path.
///
/// # Errors
/// Returns `PathError::NoParent` for the root.
pub fn parent_path(path: &str) -> Result<String, PathError> {
    let normalized: String = format_path(path);
    if normalized == "/" {
        return Err(PathError::NoParent {
            path: path.to_string(),
        });
    }

    match normalized.rfind('/') {
        Some(0) => Ok("/".to_string()),
        Some(idx) => Ok(normalized[..idx].to_string()),
        None => Err(PathError::InvalidPath {
            path: path.to_string(),
        }),
    }
}

/// Join a directory path and a child entry name.
///
/// # Arguments
/// * `parent` - Directory path (store path or URI)
/// * `name` - Entry name within the directory
pub fn join_path(parent: &str, name: &str) -> String {
    let base: String = format_path(parent);
    if base == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Get the final component of a path (empty for the root).
///
/// # Arguments
/// * `path` - Normalized store path
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(lexical_normalize("/a/./b/../c/"), "/a/c");
        assert_eq!(lexical_normalize("a//b"), "/a/b");
        assert_eq!(lexical_normalize("/../.."), "/");
        assert_eq!(lexical_normalize(""), "/");
    }

    #[test]
    fn test_format_path_strips_scheme_and_volume() {
        assert_eq!(format_path("cubefs://vol1/dir/file.txt"), "/dir/file.txt");
        assert_eq!(format_path("cubefs://vol1"), "/");
        assert_eq!(format_path("cubefs://vol1/"), "/");
        assert_eq!(format_path("/plain/path"), "/plain/path");
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/a/b/c").unwrap(), "/a/b");
        assert_eq!(parent_path("/a").unwrap(), "/");
        assert_eq!(parent_path("cubefs://vol/a/b").unwrap(), "/a");
    }

    #[test]
    fn test_parent_of_root_is_error() {
        let result: Result<String, PathError> = parent_path("/");
        assert!(matches!(result, Err(PathError::NoParent { .. })));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a/b", "c"), "/a/b/c");
        assert_eq!(join_path("cubefs://vol/a/", "c"), "/a/c");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/a/b/c.txt"), "c.txt");
        assert_eq!(file_name("/a"), "a");
        assert_eq!(file_name("/"), "");
    }
}
