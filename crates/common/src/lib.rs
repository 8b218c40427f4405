//! Shared types and utilities for the CubeFS under-filesystem adapter.
//!
//! This crate provides common functionality used across the cfs-ufs crates:
//! - Store path normalization (scheme stripping, parent/child resolution)
//! - Coarse content fingerprints for change detection
//! - Shared constants and error types

pub mod constants;
pub mod error;
pub mod hash;
pub mod path_utils;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::PathError;
pub use hash::{approximate_content_hash, hash_bytes};
pub use path_utils::{file_name, format_path, join_path, lexical_normalize, parent_path};
