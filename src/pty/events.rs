//! PTY session events for pub/sub broadcasting.
//!
//! This module defines events that PTY sessions broadcast to connected
//! clients. Events are sent via `tokio::sync::broadcast` channels, enabling
//! true pub/sub where the session emits without knowing about subscribers.
//!
//! # Event Types
//!
//! - [`PtyEvent::Output`] - Raw terminal output bytes
//! - [`PtyEvent::Resized`] - PTY dimensions changed
//! - [`PtyEvent::Exited`] - Process in the PTY terminated
//! - [`PtyEvent::Failed`] - Session failed before or outside normal exit
//!
//! At most one of `Exited` / `Failed` is ever emitted per session, and at
//! most once; after either, the session is terminal.

// Rust guideline compliant 2026-01

/// Events broadcast by PTY sessions to connected clients.
///
/// Sessions emit events without knowing who is subscribed. Each client
/// receives events independently via its own broadcast receiver.
#[derive(Debug, Clone)]
pub enum PtyEvent {
    /// Raw output bytes from the PTY.
    ///
    /// Order is preserved per originating stream; stdout and stderr are
    /// merged by the PTY device itself before they reach the reader.
    Output(Vec<u8>),

    /// PTY was resized to new dimensions.
    Resized {
        /// New height in rows.
        rows: u16,
        /// New width in columns.
        cols: u16,
    },

    /// Process running in the PTY exited.
    ///
    /// After this event the session is terminal: writes and resizes
    /// become no-ops.
    Exited {
        /// Exit code if available (`None` if killed by signal).
        exit_code: Option<i32>,
    },

    /// The session failed outside the normal exit path.
    Failed {
        /// Human-readable failure description.
        message: String,
    },
}

impl PtyEvent {
    /// Create an output event from bytes.
    #[must_use]
    pub fn output(data: impl Into<Vec<u8>>) -> Self {
        Self::Output(data.into())
    }

    /// Create a resized event.
    #[must_use]
    pub fn resized(rows: u16, cols: u16) -> Self {
        Self::Resized { rows, cols }
    }

    /// Create a process exited event.
    #[must_use]
    pub fn exited(exit_code: Option<i32>) -> Self {
        Self::Exited { exit_code }
    }

    /// Create a failure event.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Check if this is an output event.
    #[must_use]
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Output(_))
    }

    /// Check if this event terminates the session (exit or failure).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited { .. } | Self::Failed { .. })
    }
}
