//! # Termhub Daemon Library
//!
//! This crate provides the hub that shares one interactive shell and one
//! watched directory with any number of remote viewers.
//!
//! ## Overview
//!
//! The daemon runs on the machine whose shell is being shared. It provides:
//!
//! - **Shell Session**: One shell attached to a pseudo-terminal, with
//!   serialized input and chunked output
//! - **Directory Watch**: Change notifications for the watched root, plus
//!   listing and single-file reads
//! - **Viewer Registry**: The set of connected viewers, safe for concurrent
//!   add, remove and snapshot
//! - **Broadcast Router**: Shell output and file changes to every viewer,
//!   viewer input to the shell
//! - **Host**: HTTP and WebSocket endpoints viewers connect to
//!
//! ## Architecture
//!
//! ```text
//!  viewers ──input───▶ ┌──────────────────┐ ──write───▶ Shell Session
//!                      │ Broadcast Router │ ◀──output── Shell Session
//!  viewers ◀──frames── └────────┬─────────┘ ◀──changes─ File Watcher
//!                               │ snapshot
//!                      ┌────────▼─────────┐
//!                      │ Viewer Registry  │
//!                      └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use daemon::network::{bind, serve, AppState};
//! use daemon::{Config, HubOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let listener = bind(config.bind_addr()?).await?;
//!
//!     let hub = Arc::new(HubOrchestrator::new(config));
//!     hub.start().await?;
//!
//!     // Serves viewers until the hub stops.
//!     serve(listener, AppState::new(Arc::clone(&hub))).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: PTY-backed shell session
//! - [`files`]: Directory watch, listing and file reads
//! - [`viewers`]: Viewer handles and the registry
//! - [`router`]: Fan-out and input routing loops
//! - [`orchestrator`]: Session lifecycle
//! - [`network`]: HTTP and WebSocket host

pub mod config;
pub mod files;
pub mod network;
pub mod orchestrator;
pub mod router;
pub mod session;
pub mod viewers;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export session types for convenience
pub use session::{
    SessionError, SessionId, SessionStatus, ShellExit, ShellInput, ShellOptions, ShellOutput,
    ShellSession, ShellWriter,
};

// Re-export files types for convenience
pub use files::{
    list_tree, read_file, ChangeKind, FileChanged, FileError, FileTree, FileWatcher, TreeNode,
    WatchError,
};

// Re-export viewer types for convenience
pub use viewers::{DeliveryError, RegistryError, Viewer, ViewerId, ViewerRegistry};

// Re-export router types for convenience
pub use router::{BroadcastRouter, FanOutEnd, FanOutReport, ViewerExit};

// Re-export orchestrator types for convenience
pub use orchestrator::{HubEvent, HubOrchestrator, HubRouter, OrchestratorState, ViewerLink};

// Re-export network types for convenience
pub use network::{AppState, ServerError};
