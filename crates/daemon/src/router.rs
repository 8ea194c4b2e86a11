//! Broadcast router tying the shell, the watcher and the viewers together.
//!
//! The router runs three kinds of loops, each in its own task:
//!
//! - **shell fan-out**: every output chunk goes to every viewer registered
//!   at the moment the chunk is processed;
//! - **file fan-out**: every change becomes a `file:refresh:<path>` frame for
//!   every registered viewer;
//! - **viewer input**: one loop per viewer forwards `terminal:write:`
//!   payloads to the shell and drops anything else.
//!
//! Each event source has a single consumer and each event is delivered to all
//! viewers before the next one is read, so every viewer sees a source's
//! events in order. A viewer whose delivery fails is unregistered; the others
//! are not affected. All loops stop when the shutdown token is cancelled.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use protocol::{InboundCommand, InboundFrame, OutboundFrame, ProtocolError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::files::FileChanged;
use crate::session::{ShellExit, ShellOutput, ShellWriter};
use crate::viewers::{RegistryError, Viewer, ViewerId, ViewerRegistry};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Viewers the frame was queued for.
    pub delivered: usize,
    /// Viewers that failed and were unregistered.
    pub dropped: usize,
}

/// Why a fan-out loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanOutEnd {
    /// The shell's output ended.
    ShellExited(ShellExit),
    /// The watcher's event channel closed.
    WatchClosed,
    /// Shutdown was requested.
    Cancelled,
}

/// Why a viewer's input loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerExit {
    /// The viewer closed the channel or it went away.
    Closed,
    /// The channel delivered something that could not be decoded.
    DecodeFailed(String),
    /// Shutdown was requested.
    Cancelled,
}

/// Routes events between the shell, the watcher and the viewers.
pub struct BroadcastRouter<W: ShellWriter> {
    /// Registered viewers.
    registry: Arc<ViewerRegistry>,
    /// Destination for viewer input.
    shell: Arc<W>,
    /// Observed by every loop between iterations.
    shutdown: CancellationToken,
}

impl<W: ShellWriter> BroadcastRouter<W> {
    /// Creates a new router.
    pub fn new(registry: Arc<ViewerRegistry>, shell: Arc<W>, shutdown: CancellationToken) -> Self {
        Self {
            registry,
            shell,
            shutdown,
        }
    }

    /// Returns the viewer registry.
    pub fn registry(&self) -> &Arc<ViewerRegistry> {
        &self.registry
    }

    /// Returns the shutdown token the loops observe.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Creates and registers a viewer with the given queue capacity.
    ///
    /// Returns the handle and the receiver its connection must drain.
    pub fn connect_viewer(
        &self,
        capacity: usize,
    ) -> Result<(Viewer, mpsc::Receiver<OutboundFrame>), RegistryError> {
        let (viewer, rx) = Viewer::with_capacity(capacity);
        self.registry.register(viewer.clone())?;
        info!(viewer_id = %viewer.id(), viewers = self.registry.len(), "Viewer connected");
        Ok((viewer, rx))
    }

    /// Delivers `frame` to every currently registered viewer.
    ///
    /// Works on a snapshot, so no registry lock is held while delivering.
    pub fn broadcast(&self, frame: OutboundFrame) -> FanOutReport {
        let mut report = FanOutReport::default();

        for viewer in self.registry.snapshot() {
            match viewer.deliver(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        viewer_id = %viewer.id(),
                        frame = frame.label(),
                        error = %e,
                        "Dropping viewer after failed delivery"
                    );
                    self.registry.unregister(viewer.id());
                    report.dropped += 1;
                }
            }
        }

        trace!(
            frame = frame.label(),
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast frame"
        );
        report
    }

    /// Forwards shell output to the viewers until it ends or shutdown.
    pub async fn fan_out_shell_output(&self, mut output: ShellOutput) -> FanOutEnd {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!("Shell fan-out stopping: shutdown");
                    return FanOutEnd::Cancelled;
                }
                next = output.next_chunk() => match next {
                    Ok(chunk) => {
                        self.broadcast(OutboundFrame::Output(chunk));
                    }
                    Err(exit) => {
                        info!(reason = %exit, "Shell output ended");
                        return FanOutEnd::ShellExited(exit);
                    }
                },
            }
        }
    }

    /// Announces file changes to the viewers until the watch ends or shutdown.
    pub async fn fan_out_file_events(&self, mut events: mpsc::Receiver<FileChanged>) -> FanOutEnd {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!("File fan-out stopping: shutdown");
                    return FanOutEnd::Cancelled;
                }
                next = events.recv() => match next {
                    Some(change) => {
                        debug!(path = %change.path, kind = ?change.kind, "Announcing file change");
                        self.broadcast(OutboundFrame::FileRefresh(change.path));
                    }
                    None => {
                        warn!("File watch ended");
                        return FanOutEnd::WatchClosed;
                    }
                },
            }
        }
    }

    /// Reads one viewer's messages until the channel ends, then unregisters
    /// the viewer.
    ///
    /// `terminal:write:` payloads are written to the shell; write failures
    /// are logged and the loop keeps going. Anything else is dropped.
    pub async fn route_viewer_input<S>(&self, viewer_id: &ViewerId, mut inbound: S) -> ViewerExit
    where
        S: Stream<Item = Result<InboundFrame, ProtocolError>> + Unpin,
    {
        let exit = loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break ViewerExit::Cancelled,
                next = inbound.next() => next,
            };

            match next {
                None | Some(Ok(InboundFrame::Close)) => break ViewerExit::Closed,
                Some(Ok(InboundFrame::Control)) => continue,
                Some(Ok(InboundFrame::Data(raw))) => match InboundCommand::parse(&raw) {
                    InboundCommand::WriteToShell(data) => {
                        let len = data.len();
                        let result = tokio::select! {
                            biased;
                            _ = self.shutdown.cancelled() => break ViewerExit::Cancelled,
                            result = self.shell.write(data) => result,
                        };
                        match result {
                            Ok(()) => trace!(viewer_id = %viewer_id, bytes = len, "Forwarded input to shell"),
                            Err(e) => warn!(viewer_id = %viewer_id, error = %e, "Shell write failed"),
                        }
                    }
                    InboundCommand::Unrecognized => {
                        trace!(viewer_id = %viewer_id, bytes = raw.len(), "Ignoring unrecognized message");
                    }
                },
                Some(Err(e)) => {
                    debug!(viewer_id = %viewer_id, error = %e, "Viewer channel failed");
                    break ViewerExit::DecodeFailed(e.to_string());
                }
            }
        };

        self.registry.unregister(viewer_id);
        info!(viewer_id = %viewer_id, reason = ?exit, viewers = self.registry.len(), "Viewer disconnected");
        exit
    }
}
