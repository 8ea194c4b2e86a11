//! Shell session module.
//!
//! This module provides the PTY-backed shell the hub shares between all
//! viewers, and the [`ShellWriter`] seam the router writes input through.

use std::future::Future;

use bytes::Bytes;

pub mod pty;

pub use pty::{
    SessionError, SessionId, SessionStatus, ShellExit, ShellInput, ShellOptions, ShellOutput,
    ShellSession,
};

/// Sink for bytes destined to the shell's input.
///
/// Implementations must keep each payload contiguous: two concurrent calls may
/// land in either order but never interleave their bytes.
pub trait ShellWriter: Send + Sync + 'static {
    /// Writes `data` to the shell, resolving once it has been delivered.
    fn write(&self, data: Bytes) -> impl Future<Output = Result<(), SessionError>> + Send;
}
