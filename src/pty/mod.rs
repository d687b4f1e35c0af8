//! PTY session management with event-driven broadcasting.
//!
//! This module provides pseudo-terminal (PTY) session handling with a
//! pub/sub architecture. A session owns one spawned shell, pumps its output
//! to subscribers, and translates control operations (input, resize,
//! terminate) into process-level operations.
//!
//! # Architecture
//!
//! ```text
//! PtySession (owns I/O, broadcasts events)
//!  ├── master_pty: MasterPty (for resizing)
//!  ├── writer: Write (for input)
//!  ├── killer: ChildKiller (for terminate)
//!  ├── surface: Arc<Mutex<TerminalSurface>> (shadow screen)
//!  └── event_tx: broadcast::Sender<PtyEvent> (output + lifecycle)
//! ```
//!
//! The session pump thread feeds every PTY byte to both the shadow
//! surface (for point-in-time snapshots) and the broadcast channel (for
//! live subscribers). On EOF it releases the master-side handles, reaps
//! the child, and broadcasts [`PtyEvent::Exited`] exactly once; after
//! that the session is terminal and `write_input`/`resize` become no-ops
//! rather than errors.
//!
//! # Input Buffering
//!
//! Callers that must never block on the PTY submit input through the
//! session's command channel ([`PtySession::input_sender`]); a background
//! task drains it in order. Direct [`PtySession::write_input`] is also
//! available for callers that can tolerate the brief writer lock.
//!
//! # Thread Safety
//!
//! Shared state is wrapped in `Arc<Mutex<..>>` for concurrent access from
//! the session pump thread, the command processor task, and callers
//! holding the session behind an `Arc`.

// Rust guideline compliant 2026-02

pub mod events;
pub mod spawn;

pub use events::PtyEvent;
pub use spawn::{default_shell, PtySpawnConfig};

use anyhow::{Context, Result};
use portable_pty::{ChildKiller, MasterPty, PtySize};
use std::{
    io::Write,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::constants::{BROADCAST_CHANNEL_CAPACITY, PTY_COMMAND_CHANNEL_CAPACITY};
use crate::surface::TerminalSurface;

/// Commands sent to a PTY session through its buffered command channel.
#[derive(Debug, Clone)]
pub enum PtyCommand {
    /// Write bytes to the shell's input stream.
    Input(Vec<u8>),
}

/// Lifecycle state of a PTY session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Created but not yet spawned.
    Starting,
    /// Shell process is running.
    Running,
    /// Shell process exited with the given code (`None` if signaled).
    Exited(Option<i32>),
    /// Spawn or I/O setup failed.
    Failed(String),
}

/// Shared mutable state for PTY I/O.
///
/// Accessed from the command processor task, the session pump thread, and
/// the session's own methods. All fields live under one mutex.
pub(crate) struct SharedPtyState {
    /// Master PTY for resizing operations. Released by the session pump
    /// on exit so the kernel can finalize the PTY session.
    pub(crate) master_pty: Option<Box<dyn MasterPty + Send>>,
    /// Writer for sending input to the PTY.
    pub(crate) writer: Option<Box<dyn Write + Send>>,
    /// Current PTY dimensions (rows, cols).
    pub(crate) dimensions: (u16, u16),
    /// Child process id, for the resize fallback signal.
    pub(crate) child_pid: Option<u32>,
    /// Lifecycle state.
    pub(crate) state: SessionState,
}

impl std::fmt::Debug for SharedPtyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPtyState")
            .field("has_master_pty", &self.master_pty.is_some())
            .field("has_writer", &self.writer.is_some())
            .field("dimensions", &self.dimensions)
            .field("state", &self.state)
            .finish()
    }
}

/// Encapsulates all state for a single PTY session.
///
/// Each session manages:
/// - a pseudo-terminal running one shell process,
/// - a shadow [`TerminalSurface`] fed with the same bytes as subscribers,
/// - a broadcast channel distributing [`PtyEvent`]s,
/// - a buffered input command channel.
///
/// Exactly one of [`PtyEvent::Exited`] / [`PtyEvent::Failed`] is emitted
/// per session, at most once. `terminate()` is idempotent and safe to call
/// after the process has already exited.
pub struct PtySession {
    shared: Arc<Mutex<SharedPtyState>>,

    /// Shadow terminal fed by the session pump.
    surface: Arc<Mutex<TerminalSurface>>,

    /// Broadcast sender for session events.
    event_tx: broadcast::Sender<PtyEvent>,

    /// Buffered input channel (sender side, cloneable for clients).
    command_tx: mpsc::Sender<PtyCommand>,

    /// Command receiver, consumed by the command processor on spawn.
    command_rx: Option<mpsc::Receiver<PtyCommand>>,

    /// Kill handle for the child, taken by the first `terminate()`.
    killer: Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>,

    /// Set once the child has exited; gates writes and resizes.
    terminated: Arc<AtomicBool>,

    /// Guards the one-shot terminal event (exit or failure).
    terminal_emitted: Arc<AtomicBool>,

    /// Session pump thread handle (output + exit handling).
    pump_thread: Mutex<Option<thread::JoinHandle<()>>>,

    /// Command processor task handle.
    command_processor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("state", &self.state())
            .field("dimensions", &self.dimensions())
            .finish_non_exhaustive()
    }
}

impl PtySession {
    /// Creates a new, not-yet-spawned PTY session with the given geometry.
    #[must_use]
    pub fn new(rows: u16, cols: u16) -> Self {
        Self::with_scrollback(rows, cols, crate::constants::DEFAULT_SCROLLBACK_LINES)
    }

    /// Creates a session whose shadow surface keeps `scrollback` lines.
    #[must_use]
    pub fn with_scrollback(rows: u16, cols: u16, scrollback: usize) -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(PTY_COMMAND_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Mutex::new(SharedPtyState {
                master_pty: None,
                writer: None,
                dimensions: (rows, cols),
                child_pid: None,
                state: SessionState::Starting,
            })),
            surface: Arc::new(Mutex::new(TerminalSurface::with_scrollback(
                rows, cols, scrollback,
            ))),
            event_tx,
            command_tx,
            command_rx: Some(command_rx),
            killer: Mutex::new(None),
            terminated: Arc::new(AtomicBool::new(false)),
            terminal_emitted: Arc::new(AtomicBool::new(false)),
            pump_thread: Mutex::new(None),
            command_processor: Mutex::new(None),
        }
    }

    /// Spawn a shell in this PTY session.
    ///
    /// On success the session transitions to [`SessionState::Running`] with
    /// the session pump and command processor started. On failure the
    /// session transitions to [`SessionState::Failed`], a
    /// [`PtyEvent::Failed`] event is broadcast, and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if PTY creation, shell spawn, or writer setup fails.
    pub fn spawn(&mut self, config: PtySpawnConfig) -> Result<()> {
        match self.spawn_inner(&config) {
            Ok(()) => Ok(()),
            Err(e) => {
                let message = format!("{e:#}");
                self.shared
                    .lock()
                    .expect("shared lock poisoned")
                    .state = SessionState::Failed(message.clone());
                self.terminated.store(true, Ordering::SeqCst);
                if !self.terminal_emitted.swap(true, Ordering::SeqCst) {
                    let _ = self.event_tx.send(PtyEvent::failed(message));
                }
                Err(e)
            }
        }
    }

    fn spawn_inner(&mut self, config: &PtySpawnConfig) -> Result<()> {
        let (rows, cols) = self.dimensions();
        let pair = spawn::open_pty(rows, cols)?;

        let cmd = spawn::build_command(config);
        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn shell '{}'", config.shell))?;

        // The slave handle must not outlive spawn: a lingering slave fd in
        // this process keeps master reads from returning EOF on exit.
        drop(pair.slave);

        let killer = child.clone_killer();
        let child_pid = child.process_id();

        let writer = pair
            .master
            .take_writer()
            .context("Failed to take PTY writer")?;
        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;

        {
            let mut shared = self.shared.lock().expect("shared lock poisoned");
            shared.master_pty = Some(pair.master);
            shared.writer = Some(writer);
            shared.child_pid = child_pid;
            shared.state = SessionState::Running;
        }
        *self.killer.lock().expect("killer lock poisoned") = Some(killer);

        *self.pump_thread.lock().expect("pump_thread lock poisoned") =
            Some(spawn::spawn_session_pump(spawn::SessionPump {
                reader,
                child,
                surface: Arc::clone(&self.surface),
                shared: Arc::clone(&self.shared),
                event_tx: self.event_tx.clone(),
                terminated: Arc::clone(&self.terminated),
                terminal_emitted: Arc::clone(&self.terminal_emitted),
            }));

        self.spawn_command_processor();
        Ok(())
    }

    /// Spawn the buffered-input processor task.
    ///
    /// Requires a Tokio runtime context; without one the command channel is
    /// left in place and only direct `write_input` works.
    fn spawn_command_processor(&mut self) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                log::debug!(
                    "PTY command processor not spawned - no Tokio runtime context. \
                     Direct write_input() still works."
                );
                return;
            }
        };

        let Some(mut rx) = self.command_rx.take() else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let terminated = Arc::clone(&self.terminated);

        let handle = runtime.spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    PtyCommand::Input(data) => {
                        if terminated.load(Ordering::SeqCst) {
                            continue;
                        }
                        if let Err(e) = write_to_shared(&shared, &data) {
                            log::warn!("Failed to write PTY input: {e}");
                        }
                    }
                }
            }
        });
        *self
            .command_processor
            .lock()
            .expect("command_processor lock poisoned") = Some(handle);
    }

    // =========================================================================
    // Event Broadcasting
    // =========================================================================

    /// Subscribe to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PtyEvent> {
        self.event_tx.subscribe()
    }

    /// Get a clone of the buffered input sender.
    ///
    /// Input submitted here is applied in order by a background task; the
    /// caller never blocks on the PTY writer.
    #[must_use]
    pub fn input_sender(&self) -> mpsc::Sender<PtyCommand> {
        self.command_tx.clone()
    }

    // =========================================================================
    // PTY I/O
    // =========================================================================

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared
            .lock()
            .expect("shared lock poisoned")
            .state
            .clone()
    }

    /// Current PTY dimensions (rows, cols).
    #[must_use]
    pub fn dimensions(&self) -> (u16, u16) {
        self.shared
            .lock()
            .expect("shared lock poisoned")
            .dimensions
    }

    /// The shadow terminal surface fed by this session's output.
    #[must_use]
    pub fn surface(&self) -> Arc<Mutex<TerminalSurface>> {
        Arc::clone(&self.surface)
    }

    /// Write input bytes directly to the PTY.
    ///
    /// A no-op (not an error) once the process has exited.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    pub fn write_input(&self, input: &[u8]) -> Result<()> {
        if self.terminated.load(Ordering::SeqCst) {
            return Ok(());
        }
        write_to_shared(&self.shared, input)
    }

    /// Write a string to the PTY.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_input_str(&self, input: &str) -> Result<()> {
        self.write_input(input.as_bytes())
    }

    /// Resize the PTY to new dimensions.
    ///
    /// A no-op once the process has exited. Never returns an error to the
    /// caller: when the native resize fails on Unix, a `SIGWINCH` is sent
    /// to the child as a best-effort fallback.
    ///
    /// The shadow surface is resized *before* the PTY so that redraw output
    /// for the new size is parsed against the correct dimensions.
    pub fn resize(&self, rows: u16, cols: u16) {
        if self.terminated.load(Ordering::SeqCst) {
            return;
        }

        {
            let mut surface = self.surface.lock().expect("surface lock poisoned");
            surface.set_size(rows, cols);
        }

        let fallback_pid = {
            let mut shared = self.shared.lock().expect("shared lock poisoned");
            shared.dimensions = (rows, cols);

            match &shared.master_pty {
                Some(master_pty) => match master_pty.resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                }) {
                    Ok(()) => None,
                    Err(e) => {
                        log::warn!("Failed to resize PTY: {e}");
                        shared.child_pid
                    }
                },
                None => None,
            }
        };

        if let Some(pid) = fallback_pid {
            notify_winch(pid);
        }

        let _ = self.event_tx.send(PtyEvent::resized(rows, cols));
    }

    /// Request termination of the shell process.
    ///
    /// Idempotent: only the first call sends the kill; later calls and
    /// calls after natural exit are no-ops. The session pump reaps the
    /// child and emits the single [`PtyEvent::Exited`].
    pub fn terminate(&self) {
        let killer = self.killer.lock().expect("killer lock poisoned").take();
        if let Some(mut killer) = killer {
            log::info!("Terminating PTY child process");
            if let Err(e) = killer.kill() {
                // Already-exited children report an error here; harmless.
                log::debug!("PTY kill returned: {e}");
            }
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Write bytes through the shared writer, if present.
fn write_to_shared(shared: &Arc<Mutex<SharedPtyState>>, input: &[u8]) -> Result<()> {
    let mut shared = shared.lock().expect("shared lock poisoned");
    if let Some(writer) = &mut shared.writer {
        writer.write_all(input)?;
        writer.flush()?;
    }
    Ok(())
}

/// Best-effort window-change notification when the native resize fails.
#[cfg(unix)]
fn notify_winch(pid: u32) {
    // SAFETY: sending SIGWINCH to a pid we spawned; at worst the pid is
    // stale and kill() returns ESRCH, which we ignore.
    let rc = unsafe { libc::kill(pid as i32, libc::SIGWINCH) };
    if rc != 0 {
        log::debug!("SIGWINCH fallback for pid {pid} returned {rc}");
    }
}

#[cfg(not(unix))]
fn notify_winch(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_starting() {
        let session = PtySession::new(24, 80);
        assert_eq!(session.state(), SessionState::Starting);
        assert_eq!(session.dimensions(), (24, 80));
    }

    #[test]
    fn test_write_before_spawn_is_noop() {
        let session = PtySession::new(24, 80);
        // No writer yet: must not error.
        session.write_input(b"ls\n").unwrap();
        session.write_input_str("ls\n").unwrap();
    }

    #[test]
    fn test_terminate_before_spawn_is_noop() {
        let session = PtySession::new(24, 80);
        session.terminate();
        session.terminate();
    }

    #[test]
    fn test_resize_before_spawn_updates_dimensions() {
        let session = PtySession::new(24, 80);
        session.resize(40, 120);
        assert_eq!(session.dimensions(), (40, 120));
        let surface = session.surface();
        assert_eq!(surface.lock().unwrap().size(), (40, 120));
    }

    #[test]
    fn test_resize_broadcasts_event() {
        let session = PtySession::new(24, 80);
        let mut rx = session.subscribe();
        session.resize(30, 90);
        match rx.try_recv() {
            Ok(PtyEvent::Resized { rows, cols }) => {
                assert_eq!((rows, cols), (30, 90));
            }
            other => panic!("Expected Resized event, got {other:?}"),
        }
    }

    #[test]
    fn test_spawn_failure_emits_failed_once_and_sets_state() {
        let mut session = PtySession::new(24, 80);
        let mut rx = session.subscribe();

        let config = PtySpawnConfig {
            shell: "/definitely/not/a/shell".to_string(),
            args: vec![],
            cwd: std::env::temp_dir(),
            env: crate::config::TerminalEnv::default(),
            extra_env: std::collections::HashMap::new(),
        };
        assert!(session.spawn(config).is_err());

        assert!(matches!(session.state(), SessionState::Failed(_)));
        match rx.try_recv() {
            Ok(PtyEvent::Failed { message }) => {
                assert!(message.contains("/definitely/not/a/shell"));
            }
            other => panic!("Expected Failed event, got {other:?}"),
        }
        // Exactly one terminal event.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_after_failed_spawn_writes_and_resizes_are_noops() {
        let mut session = PtySession::new(24, 80);
        let config = PtySpawnConfig {
            shell: "/definitely/not/a/shell".to_string(),
            args: vec![],
            cwd: std::env::temp_dir(),
            env: crate::config::TerminalEnv::default(),
            extra_env: std::collections::HashMap::new(),
        };
        let _ = session.spawn(config);

        session.write_input(b"ignored\n").unwrap();
        let dims_before = session.dimensions();
        session.resize(50, 150);
        assert_eq!(session.dimensions(), dims_before, "resize after terminal state is a no-op");
    }
}
