//! PTY-backed shell session.
//!
//! This module owns the one interactive shell the hub shares. The shell runs
//! attached to a pseudo-terminal so it behaves as if a user were typing into
//! a real terminal (prompts, job control, line editing).
//!
//! Input and output each run on a dedicated OS thread because the PTY handles
//! are blocking:
//!
//! - the writer thread drains a queue of write requests, one `write_all` per
//!   request, so payloads from different viewers never interleave;
//! - the reader thread turns the PTY output into a sequence of chunks that
//!   ends with a [`ShellExit`].

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use bytes::Bytes;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::ShellWriter;

/// Unique identifier for a session.
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Failed to spawn the shell or open the PTY.
    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),

    /// The session has already been terminated.
    #[error("session already terminated: {0}")]
    AlreadyTerminated(SessionId),

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to kill or reap the shell.
    #[error("failed to kill session: {0}")]
    KillFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Session is running.
    Running,
    /// Session has exited with a code.
    Exited(i32),
    /// Session was already reaped earlier.
    Terminated,
}

/// Why the shell output sequence ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellExit {
    /// The PTY reported end of file.
    Eof,
    /// Reading from the PTY failed.
    ReadFailed(String),
}

impl std::fmt::Display for ShellExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShellExit::Eof => write!(f, "shell exited"),
            ShellExit::ReadFailed(e) => write!(f, "shell output failed: {}", e),
        }
    }
}

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Capacity of the output chunk channel.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the input request queue.
const INPUT_QUEUE_CAPACITY: usize = 256;

/// Options for spawning the shell.
#[derive(Debug, Clone)]
pub struct ShellOptions {
    /// Shell command. If None, uses $SHELL or /bin/sh.
    pub shell: Option<String>,
    /// Extra arguments passed to the shell.
    pub args: Vec<String>,
    /// Working directory for the shell.
    pub cwd: Option<String>,
    /// Additional environment variables.
    pub env: Vec<(String, String)>,
    /// Terminal width in columns.
    pub cols: u16,
    /// Terminal height in rows.
    pub rows: u16,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            shell: None,
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            cols: 80,
            rows: 24,
        }
    }
}

struct WriteRequest {
    data: Bytes,
    done: oneshot::Sender<std::io::Result<()>>,
}

/// Cloneable handle for writing into the shell's input.
///
/// All clones feed the same queue, which a single writer thread drains in
/// order. A write resolves once its bytes have been flushed to the PTY.
#[derive(Clone)]
pub struct ShellInput {
    session_id: SessionId,
    tx: mpsc::Sender<WriteRequest>,
    running: Arc<AtomicBool>,
}

impl ShellInput {
    /// Queues `data` for the shell and waits for the write to complete.
    pub async fn write(&self, data: Bytes) -> Result<(), SessionError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(SessionError::AlreadyTerminated(self.session_id.clone()));
        }

        let (done, result) = oneshot::channel();
        self.tx
            .send(WriteRequest { data, done })
            .await
            .map_err(|_| SessionError::AlreadyTerminated(self.session_id.clone()))?;

        match result.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::WriteFailed(e.to_string())),
            Err(_) => Err(SessionError::AlreadyTerminated(self.session_id.clone())),
        }
    }
}

impl ShellWriter for ShellInput {
    async fn write(&self, data: Bytes) -> Result<(), SessionError> {
        ShellInput::write(self, data).await
    }
}

/// The shell's output: a finite sequence of chunks followed by the reason it
/// ended. Not restartable.
pub struct ShellOutput {
    rx: mpsc::Receiver<Result<Bytes, ShellExit>>,
    finished: bool,
}

impl ShellOutput {
    /// Wraps a channel of output events.
    ///
    /// The producer sends `Ok(chunk)` for every read and a final `Err(exit)`.
    /// A channel closed without an exit reason counts as [`ShellExit::Eof`].
    pub fn new(rx: mpsc::Receiver<Result<Bytes, ShellExit>>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }

    /// Returns the next output chunk, or the reason the output ended.
    ///
    /// Once an exit has been returned, every further call returns `Eof`.
    pub async fn next_chunk(&mut self) -> Result<Bytes, ShellExit> {
        if self.finished {
            return Err(ShellExit::Eof);
        }
        match self.rx.recv().await {
            Some(Ok(chunk)) => Ok(chunk),
            Some(Err(exit)) => {
                self.finished = true;
                Err(exit)
            }
            None => {
                self.finished = true;
                Err(ShellExit::Eof)
            }
        }
    }
}

/// A shell process attached to a pseudo-terminal.
pub struct ShellSession {
    /// Unique session identifier.
    id: SessionId,

    /// The PTY master handle. Taken on terminate.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,

    /// The child process. Taken once reaped.
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,

    /// Input handle shared with the router.
    input: ShellInput,

    /// Flag indicating if the session is still running.
    running: Arc<AtomicBool>,

    /// Process ID.
    pid: Option<u32>,
}

impl ShellSession {
    /// Spawns the shell on a new PTY.
    ///
    /// Returns the session together with its output sequence. The reader and
    /// writer threads are running when this returns.
    pub fn spawn(options: &ShellOptions) -> Result<(Self, ShellOutput), SessionError> {
        let id = Uuid::new_v4().to_string();
        let shell_cmd = detect_shell(options.shell.clone());

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&shell_cmd);
        cmd.args(&options.args);
        if let Some(ref dir) = options.cwd {
            cmd.cwd(dir);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(format!("{}: {}", shell_cmd, e)))?;
        // Only the child keeps the slave side open, so EOF follows its exit.
        drop(pair.slave);

        let pid = child.process_id();
        let running = Arc::new(AtomicBool::new(true));

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        spawn_reader(id.clone(), reader, output_tx, Arc::clone(&running))?;

        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        spawn_writer(id.clone(), writer, input_rx)?;

        tracing::info!(
            session_id = %id,
            shell = %shell_cmd,
            pid = ?pid,
            cols = options.cols,
            rows = options.rows,
            "Spawned shell session"
        );

        let session = ShellSession {
            input: ShellInput {
                session_id: id.clone(),
                tx: input_tx,
                running: Arc::clone(&running),
            },
            id,
            master: Mutex::new(Some(pair.master)),
            child: Mutex::new(Some(child)),
            running,
            pid,
        };

        Ok((session, ShellOutput::new(output_rx)))
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the process ID of the shell, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns whether the session is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns a handle for writing into the shell.
    pub fn input(&self) -> ShellInput {
        self.input.clone()
    }

    /// Writes data to the shell's input.
    pub async fn write(&self, data: Bytes) -> Result<(), SessionError> {
        self.input.write(data).await
    }

    /// Checks whether the shell has exited without waiting.
    pub fn try_wait(&self) -> Result<Option<SessionStatus>, SessionError> {
        let mut guard = self.child.lock().unwrap_or_else(|e| e.into_inner());
        let Some(child) = guard.as_mut() else {
            return Ok(Some(SessionStatus::Terminated));
        };

        match child.try_wait()? {
            Some(status) => {
                self.running.store(false, Ordering::SeqCst);
                Ok(Some(SessionStatus::Exited(status.exit_code() as i32)))
            }
            None => Ok(None),
        }
    }

    /// Kills the shell if needed, reaps it and releases the PTY.
    ///
    /// Safe to call more than once; later calls return
    /// [`SessionStatus::Terminated`].
    pub fn terminate(&self) -> Result<SessionStatus, SessionError> {
        self.running.store(false, Ordering::SeqCst);

        let child = self
            .child
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        // Released first so the reader thread sees EOF even if the kill fails.
        let master = self
            .master
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(master);

        let Some(mut child) = child else {
            return Ok(SessionStatus::Terminated);
        };

        if child.try_wait()?.is_none() {
            child
                .kill()
                .map_err(|e| SessionError::KillFailed(e.to_string()))?;
        }
        let status = child
            .wait()
            .map_err(|e| SessionError::KillFailed(e.to_string()))?;
        let session_status = SessionStatus::Exited(status.exit_code() as i32);

        tracing::info!(
            session_id = %self.id,
            status = ?session_status,
            "Shell session terminated"
        );

        Ok(session_status)
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            tracing::warn!(session_id = %self.id, error = %e, "Failed to release shell session");
        }
    }
}

fn spawn_reader(
    session_id: SessionId,
    mut reader: Box<dyn Read + Send>,
    output_tx: mpsc::Sender<Result<Bytes, ShellExit>>,
    running: Arc<AtomicBool>,
) -> Result<(), SessionError> {
    thread::Builder::new()
        .name("pty-reader".to_string())
        .spawn(move || {
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            let exit = loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break ShellExit::Eof,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buffer[..n]);
                        if output_tx.blocking_send(Ok(chunk)).is_err() {
                            tracing::debug!(session_id = %session_id, "Output consumer gone");
                            running.store(false, Ordering::SeqCst);
                            return;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) if is_hangup(&e) => break ShellExit::Eof,
                    Err(e) => break ShellExit::ReadFailed(e.to_string()),
                }
            };

            running.store(false, Ordering::SeqCst);
            tracing::info!(session_id = %session_id, reason = %exit, "PTY output ended");
            let _ = output_tx.blocking_send(Err(exit));
        })?;
    Ok(())
}

fn spawn_writer(
    session_id: SessionId,
    mut writer: Box<dyn Write + Send>,
    mut input_rx: mpsc::Receiver<WriteRequest>,
) -> Result<(), SessionError> {
    thread::Builder::new()
        .name("pty-writer".to_string())
        .spawn(move || {
            while let Some(request) = input_rx.blocking_recv() {
                let result = writer
                    .write_all(&request.data)
                    .and_then(|()| writer.flush());
                if let Err(ref e) = result {
                    tracing::warn!(session_id = %session_id, error = %e, "PTY write failed");
                }
                let _ = request.done.send(result);
            }
            tracing::debug!(session_id = %session_id, "PTY writer stopped");
        })?;
    Ok(())
}

/// Linux reports a PTY whose slave side has closed as EIO rather than EOF.
fn is_hangup(err: &std::io::Error) -> bool {
    const EIO: i32 = 5;
    cfg!(target_os = "linux") && err.raw_os_error() == Some(EIO)
}

/// Detects the shell to use.
///
/// Returns the shell in this order of preference:
/// 1. The provided shell if Some
/// 2. The $SHELL environment variable
/// 3. /bin/sh as fallback
pub(crate) fn detect_shell(shell: Option<String>) -> String {
    if let Some(s) = shell {
        return s;
    }

    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}
