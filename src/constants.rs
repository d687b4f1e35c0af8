//! Application-wide constants for shellmate.
//!
//! This module centralizes all magic numbers and configuration constants
//! to improve maintainability and discoverability. Constants are grouped
//! by domain with documentation explaining their purpose.
//!
//! # Categories
//!
//! - **Timeouts**: Network and startup timing
//! - **Channels**: Buffer capacities for event and command channels
//! - **Terminal**: Default geometry and buffer sizing
//! - **Endpoints**: Default local ports and URLs

// Rust guideline compliant 2025-01

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// Delay before the kick-start newline is written to a freshly spawned shell.
///
/// An interactive shell waits silently for input after startup; writing a
/// newline after this delay forces it to print its first prompt so the
/// connected terminal is not blank.
pub const PROMPT_KICK_DELAY: Duration = Duration::from_millis(100);

/// Debounce window for terminal geometry changes.
///
/// Continuous window resizing produces a burst of geometry events. Resizes
/// are coalesced to the latest geometry and applied no more often than this.
/// Intermediate geometries may be dropped; the final one never is.
pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(50);

/// HTTP connect timeout for the inference server.
///
/// Applies only to connection establishment. There is deliberately no
/// overall request timeout: a streaming completion can legitimately run
/// for minutes.
pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Request timeout for non-streaming inference calls (model listing).
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Channels
// ============================================================================

/// Broadcast channel capacity for PTY and timeline events.
///
/// This determines how many events can be buffered before slow receivers
/// start missing events. Set high enough to handle bursts of output.
pub const BROADCAST_CHANNEL_CAPACITY: usize = 1024;

/// Capacity for PTY input command channels.
///
/// Input is buffered here so callers never block on a momentarily
/// unwritable PTY; the command processor drains it in order.
pub const PTY_COMMAND_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Terminal
// ============================================================================

/// Default terminal height in rows.
pub const DEFAULT_ROWS: u16 = 24;

/// Default terminal width in columns.
pub const DEFAULT_COLS: u16 = 80;

/// Scrollback lines retained by the shadow terminal surface.
pub const DEFAULT_SCROLLBACK_LINES: usize = 1000;

/// Read buffer size for the PTY output pump.
pub const PTY_READ_BUFFER_SIZE: usize = 4096;

// ============================================================================
// Endpoints
// ============================================================================

/// Default port for the WebSocket endpoints (localhost-only).
pub const DEFAULT_PORT: u16 = 8080;

/// Default base URL of the local Ollama inference server.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default model requested when the caller does not name one.
pub const DEFAULT_MODEL: &str = "llama3.2";
