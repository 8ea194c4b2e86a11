//! Watched directory module.
//!
//! This module provides everything the hub knows about its directory:
//! - Change notifications for the subtree ([`watcher`])
//! - A nested listing of the subtree ([`tree`])
//! - Single-file reads with path validation ([`content`])
//!
//! # Security
//!
//! Paths supplied by viewers are validated against the watched root. Parent
//! directory components are rejected outright and symlinks that resolve
//! outside the root are refused.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod content;
pub mod tree;
pub mod watcher;

pub use content::read_file;
pub use tree::{list_tree, FileTree, TreeNode};
pub use watcher::{ChangeKind, FileChanged, FileWatcher, WatchError};

/// Errors from the listing and read operations.
#[derive(Debug, Error)]
pub enum FileError {
    /// No path was given.
    #[error("path is empty")]
    EmptyPath,

    /// The path tries to leave the watched root.
    #[error("path traversal detected: {0}")]
    PathTraversal(String),

    /// The path does not exist.
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),

    /// The path is not a directory.
    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The path is not a regular file.
    #[error("path is not a file: {0}")]
    NotAFile(PathBuf),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileError {
    /// Classifies an I/O error raised for `path`.
    pub(crate) fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FileError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => FileError::PermissionDenied(path.to_path_buf()),
            _ => FileError::Io(err),
        }
    }
}
