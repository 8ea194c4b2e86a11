//! Filesystem change notifications for the watched root.
//!
//! Every create, modify, rename or remove reported by the platform watcher
//! becomes one [`FileChanged`] per affected path. Nothing is filtered by
//! name, coalesced or debounced; an editor saving through a temp file yields
//! one event per step it takes.

use std::path::{Component, Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of the change event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Errors that can occur while setting up a watch.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The watch root does not exist.
    #[error("watch root does not exist: {0}")]
    RootMissing(PathBuf),

    /// The watch root is not a directory.
    #[error("watch root is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The platform watcher could not be created or attached.
    #[error("failed to watch {path}: {reason}")]
    Setup {
        /// Path being watched.
        path: PathBuf,
        /// Underlying error.
        reason: String,
    },
}

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A file or directory appeared.
    Created,
    /// Contents or metadata changed.
    Modified,
    /// The path was renamed, from or to.
    Renamed,
    /// A file or directory went away.
    Removed,
    /// The platform could not tell.
    Unknown,
}

/// A change to one path under the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChanged {
    /// Path relative to the watched root, `/`-separated.
    pub path: String,
    /// Kind of change.
    pub kind: ChangeKind,
}

/// A live watch on a directory subtree.
///
/// Dropping the watcher stops the notifications and closes the event channel.
pub struct FileWatcher {
    /// Canonical root being watched.
    root: PathBuf,
    /// The platform watcher; kept alive for the duration of the watch.
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Starts watching `root`.
    ///
    /// Returns the watcher and the receiving end of its change events.
    pub fn watch(
        root: &Path,
        recursive: bool,
    ) -> Result<(Self, mpsc::Receiver<FileChanged>), WatchError> {
        let root = canonical_root(root)?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let event_root = root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    for change in changes_from_event(&event_root, &event) {
                        tracing::trace!(path = %change.path, kind = ?change.kind, "File changed");
                        if tx.blocking_send(change).is_err() {
                            tracing::debug!("File watch channel closed");
                            return;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Watcher error");
                }
            }
        })
        .map_err(|e| WatchError::Setup {
            path: root.clone(),
            reason: e.to_string(),
        })?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&root, mode).map_err(|e| WatchError::Setup {
            path: root.clone(),
            reason: e.to_string(),
        })?;

        tracing::info!(root = %root.display(), recursive, "Watching directory");

        Ok((
            FileWatcher {
                root,
                _watcher: watcher,
            },
            rx,
        ))
    }

    /// Returns the canonical root being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf, WatchError> {
    let metadata = std::fs::metadata(root).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => WatchError::RootMissing(root.to_path_buf()),
        _ => WatchError::Setup {
            path: root.to_path_buf(),
            reason: e.to_string(),
        },
    })?;
    if !metadata.is_dir() {
        return Err(WatchError::NotADirectory(root.to_path_buf()));
    }

    std::fs::canonicalize(root).map_err(|e| WatchError::Setup {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Maps one platform event to the changes it reports.
fn changes_from_event(root: &Path, event: &notify::Event) -> Vec<FileChanged> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        // The paired rename event repeats the From and To events already sent.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => return Vec::new(),
        EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Renamed,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Removed,
        EventKind::Any => ChangeKind::Unknown,
        EventKind::Access(_) | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .iter()
        .map(|path| FileChanged {
            path: relative_path(root, path),
            kind,
        })
        .collect()
}

/// Formats `path` relative to `root` with `/` separators.
///
/// The root itself is reported as `.`; a path outside the root is reported
/// as given.
pub(crate) fn relative_path(root: &Path, path: &Path) -> String {
    let Ok(relative) = path.strip_prefix(root) else {
        return path.to_string_lossy().to_string();
    };

    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}
