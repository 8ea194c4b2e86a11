//! Registry of connected viewers.
//!
//! The registry is the only shared mutable state of the hub. It is safe to
//! register, unregister and snapshot from any number of tasks at once.
//! Broadcasting never happens under the registry's locks: callers take a
//! [`ViewerRegistry::snapshot`] and deliver to the copy, so a slow viewer
//! cannot hold up anyone joining or leaving.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use protocol::OutboundFrame;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique identifier for a viewer.
pub type ViewerId = String;

/// Default capacity of a viewer's outbound queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Errors delivering a frame to a single viewer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The viewer's queue is full; it stopped keeping up with the hub.
    #[error("viewer {0} is not keeping up")]
    Backpressured(ViewerId),

    /// The viewer's connection is gone.
    #[error("viewer {0} disconnected")]
    Closed(ViewerId),
}

/// Errors from registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The hub has stopped and no longer accepts viewers.
    #[error("hub is stopped and not accepting viewers")]
    Closed,
}

/// A handle to one connected viewer.
///
/// Cloning is cheap; every clone feeds the same outbound queue.
#[derive(Debug, Clone)]
pub struct Viewer {
    /// Unique viewer identifier.
    id: ViewerId,
    /// Sender for frames to this viewer.
    tx: mpsc::Sender<OutboundFrame>,
}

impl Viewer {
    /// Creates a new viewer with a fresh identity.
    ///
    /// Returns the handle and the receiver the connection drains.
    pub fn new() -> (Self, mpsc::Receiver<OutboundFrame>) {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new viewer with a specific queue capacity.
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let viewer = Viewer {
            id: Uuid::new_v4().to_string(),
            tx,
        };
        (viewer, rx)
    }

    /// Returns the viewer ID.
    pub fn id(&self) -> &ViewerId {
        &self.id
    }

    /// Queues a frame for the viewer without waiting.
    pub fn deliver(&self, frame: OutboundFrame) -> Result<(), DeliveryError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(DeliveryError::Backpressured(self.id.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed(self.id.clone())),
        }
    }

    /// Checks if the viewer's connection has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Concurrent set of connected viewers keyed by identity.
#[derive(Debug, Default)]
pub struct ViewerRegistry {
    /// Map of viewer ID to viewer handle.
    viewers: DashMap<ViewerId, Viewer>,
    /// Set once the hub stops; refuses further registrations.
    closed: AtomicBool,
}

impl ViewerRegistry {
    /// Creates an empty, open registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a viewer.
    ///
    /// Fails once the registry has been closed. A registration racing with
    /// [`close`](Self::close) never survives it.
    pub fn register(&self, viewer: Viewer) -> Result<(), RegistryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::Closed);
        }

        let id = viewer.id().clone();
        self.viewers.insert(id.clone(), viewer);

        if self.closed.load(Ordering::SeqCst) {
            self.viewers.remove(&id);
            return Err(RegistryError::Closed);
        }

        tracing::debug!(viewer_id = %id, viewers = self.viewers.len(), "Registered viewer");
        Ok(())
    }

    /// Removes a viewer.
    ///
    /// Returns whether the viewer was present. Removing an unknown or already
    /// removed viewer is a no-op.
    pub fn unregister(&self, viewer_id: &ViewerId) -> bool {
        let removed = self.viewers.remove(viewer_id).is_some();
        if removed {
            tracing::debug!(viewer_id = %viewer_id, viewers = self.viewers.len(), "Unregistered viewer");
        }
        removed
    }

    /// Returns a point-in-time copy of the registered viewers.
    pub fn snapshot(&self) -> Vec<Viewer> {
        self.viewers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Returns whether a viewer is currently registered.
    pub fn contains(&self, viewer_id: &ViewerId) -> bool {
        self.viewers.contains_key(viewer_id)
    }

    /// Returns the number of registered viewers.
    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    /// Returns whether no viewer is registered.
    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }

    /// Refuses new viewers and drops every registered one.
    ///
    /// Dropping the handles closes each viewer's outbound queue, which ends
    /// the connection's writer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let count = self.viewers.len();
        self.viewers.clear();
        tracing::debug!(viewers = count, "Viewer registry closed");
    }

    /// Returns whether the registry has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
