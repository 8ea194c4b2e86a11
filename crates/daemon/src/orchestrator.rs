//! Hub orchestrator wiring the shell, the watcher and the viewers together.
//!
//! The orchestrator owns the session lifecycle:
//!
//! ```text
//! Stopped --start()--> Starting --both adapters live--> Running --stop() / shell exit--> Stopped
//! ```
//!
//! A hub runs at most once. Starting spawns the shell and the watch; if
//! either fails the other is released and the hub returns to `Stopped`
//! without serving. Stopping cancels every loop, closes the viewer registry
//! and kills the shell.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use protocol::OutboundFrame;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::files::FileWatcher;
use crate::router::{BroadcastRouter, FanOutEnd, ViewerExit};
use crate::session::{ShellExit, ShellInput, ShellSession};
use crate::viewers::{Viewer, ViewerId, ViewerRegistry};

/// Capacity of the hub event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The router type the hub runs with a real shell behind it.
pub type HubRouter = BroadcastRouter<ShellInput>;

/// Hub lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Not serving. Initial and final state.
    Stopped,
    /// Spawning the shell and the watch.
    Starting,
    /// Both adapters are live and the router is running.
    Running,
}

impl OrchestratorState {
    /// Lowercase name used in health reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorState::Stopped => "stopped",
            OrchestratorState::Starting => "starting",
            OrchestratorState::Running => "running",
        }
    }
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// Lifecycle state changed.
    StateChanged(OrchestratorState),
    /// A viewer was registered.
    ViewerConnected { viewer_id: ViewerId },
    /// A viewer's input loop ended.
    ViewerDisconnected { viewer_id: ViewerId, reason: String },
    /// The shell went away; the hub is stopping.
    SessionEnded { reason: String },
}

/// A freshly registered viewer and the router serving it.
pub struct ViewerLink {
    /// Router whose input loop the connection must run.
    pub router: Arc<HubRouter>,
    /// The registered viewer.
    pub viewer: Viewer,
    /// Frames to write to the viewer's channel, in order.
    pub outbound: mpsc::Receiver<OutboundFrame>,
}

/// Orchestrator owning the hub's one shell session.
pub struct HubOrchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: RwLock<OrchestratorState>,
    /// Set by the first `start`; a hub never starts twice.
    started: AtomicBool,
    /// Registered viewers.
    registry: Arc<ViewerRegistry>,
    /// Router; present while running.
    router: RwLock<Option<Arc<HubRouter>>>,
    /// The shell session; present while running.
    session: Mutex<Option<ShellSession>>,
    /// The directory watch; present while running.
    watcher: Mutex<Option<FileWatcher>>,
    /// Cancelled when the hub stops; every loop observes it.
    shutdown_token: CancellationToken,
    /// Cancelled once teardown has completed.
    stopped_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<HubEvent>,
}

impl HubOrchestrator {
    /// Creates a hub that has not been started.
    pub fn new(config: Config) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            state: RwLock::new(OrchestratorState::Stopped),
            started: AtomicBool::new(false),
            registry: Arc::new(ViewerRegistry::new()),
            router: RwLock::new(None),
            session: Mutex::new(None),
            watcher: Mutex::new(None),
            shutdown_token: CancellationToken::new(),
            stopped_token: CancellationToken::new(),
            event_tx,
        }
    }

    /// Returns the configuration the hub was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for hub events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.event_tx.subscribe()
    }

    /// Returns the viewer registry.
    pub fn registry(&self) -> &Arc<ViewerRegistry> {
        &self.registry
    }

    /// Returns the router while the hub is running.
    pub async fn router(&self) -> Option<Arc<HubRouter>> {
        self.router.read().await.clone()
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Returns the shell's process ID while the hub is running.
    pub async fn shell_pid(&self) -> Option<u32> {
        self.session.lock().await.as_ref().and_then(|s| s.pid())
    }

    /// Starts the hub: spawns the shell and the watch, then the router loops.
    ///
    /// Fails if the hub has already been started, or if either adapter
    /// cannot be set up; in the latter case nothing is left running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Hub is already running");
            }
            if self.started.swap(true, Ordering::SeqCst) {
                anyhow::bail!("Hub has already been stopped and cannot be restarted");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(HubEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting hub...");

        let (session, output) = match ShellSession::spawn(&self.config.session.shell_options()) {
            Ok(spawned) => spawned,
            Err(e) => {
                self.release().await;
                return Err(e).context("Failed to start shell session");
            }
        };

        let (watcher, events) =
            match FileWatcher::watch(&self.config.watch.root, self.config.watch.recursive) {
                Ok(watch) => watch,
                Err(e) => {
                    Self::terminate_session(session).await;
                    self.release().await;
                    return Err(e).context("Failed to watch directory");
                }
            };

        let router = Arc::new(BroadcastRouter::new(
            Arc::clone(&self.registry),
            Arc::new(session.input()),
            self.shutdown_token.clone(),
        ));

        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Starting {
                // stop() ran while the adapters were being set up.
                drop(state);
                drop(watcher);
                Self::terminate_session(session).await;
                anyhow::bail!("Hub was stopped during startup");
            }

            *self.router.write().await = Some(Arc::clone(&router));
            *self.session.lock().await = Some(session);
            *self.watcher.lock().await = Some(watcher);
            *state = OrchestratorState::Running;
        }

        let file_router = Arc::clone(&router);
        tokio::spawn(async move {
            match file_router.fan_out_file_events(events).await {
                FanOutEnd::Cancelled => debug!("File fan-out stopped"),
                end => warn!(?end, "File watch ended while the hub was running"),
            }
        });

        let hub = Arc::clone(self);
        tokio::spawn(async move {
            match router.fan_out_shell_output(output).await {
                FanOutEnd::ShellExited(exit) => hub.end_session(exit).await,
                end => debug!(?end, "Shell fan-out stopped"),
            }
        });

        self.emit_event(HubEvent::StateChanged(OrchestratorState::Running));
        info!(
            root = %self.config.watch.root.display(),
            "Hub started"
        );
        Ok(())
    }

    /// Stops the hub and releases the shell, the watch and every viewer.
    ///
    /// Calling this on a stopped hub is a no-op.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            *state = OrchestratorState::Stopped;
        }

        info!("Stopping hub...");
        self.release().await;
        info!("Hub stopped");
        Ok(())
    }

    /// Waits until the hub has stopped and released its resources.
    pub async fn wait_stopped(&self) {
        self.stopped_token.cancelled().await;
    }

    /// Registers a new viewer.
    ///
    /// Returns `None` unless the hub is running.
    pub async fn connect_viewer(&self) -> Option<ViewerLink> {
        if self.state().await != OrchestratorState::Running {
            return None;
        }
        let router = self.router().await?;

        match router.connect_viewer(self.config.viewer.channel_capacity) {
            Ok((viewer, outbound)) => {
                self.emit_event(HubEvent::ViewerConnected {
                    viewer_id: viewer.id().clone(),
                });
                Some(ViewerLink {
                    router,
                    viewer,
                    outbound,
                })
            }
            Err(e) => {
                debug!(error = %e, "Refusing viewer");
                None
            }
        }
    }

    /// Records that a viewer's input loop has ended.
    pub fn viewer_disconnected(&self, viewer_id: &ViewerId, exit: &ViewerExit) {
        self.emit_event(HubEvent::ViewerDisconnected {
            viewer_id: viewer_id.clone(),
            reason: format!("{:?}", exit),
        });
    }

    /// Tells every viewer the shell is gone, then stops the hub.
    async fn end_session(&self, exit: ShellExit) {
        let reason = exit.to_string();
        warn!(reason = %reason, "Shell session ended");

        if let Some(router) = self.router().await {
            let report = router.broadcast(OutboundFrame::SessionEnded(reason.clone()));
            debug!(delivered = report.delivered, "Announced end of session");
        }
        self.emit_event(HubEvent::SessionEnded { reason });

        if let Err(e) = self.stop().await {
            warn!(error = %e, "Failed to stop hub after session end");
        }
    }

    /// Tears everything down and marks the hub stopped.
    async fn release(&self) {
        self.shutdown_token.cancel();
        self.registry.close();

        self.watcher.lock().await.take();
        self.router.write().await.take();
        if let Some(session) = self.session.lock().await.take() {
            Self::terminate_session(session).await;
        }

        *self.state.write().await = OrchestratorState::Stopped;
        self.emit_event(HubEvent::StateChanged(OrchestratorState::Stopped));
        self.stopped_token.cancel();
    }

    /// Kills and reaps the shell off the async runtime.
    async fn terminate_session(session: ShellSession) {
        let session_id = session.id().clone();
        match tokio::task::spawn_blocking(move || session.terminate()).await {
            Ok(Ok(status)) => debug!(session_id = %session_id, ?status, "Released shell session"),
            Ok(Err(e)) => warn!(session_id = %session_id, error = %e, "Failed to terminate shell"),
            Err(e) => warn!(session_id = %session_id, error = %e, "Shell teardown task failed"),
        }
    }

    /// Emits a hub event.
    fn emit_event(&self, event: HubEvent) {
        let _ = self.event_tx.send(event);
    }
}
