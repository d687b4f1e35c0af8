//! Shellmate - terminal companion daemon.
//!
//! This crate pairs an interactive shell terminal with a local LLM
//! assistant. It bridges client terminals to spawned shells over a
//! localhost WebSocket and runs streaming completions against a local
//! Ollama server, with both halves sharing one conversation timeline.
//!
//! # Architecture
//!
//! Two independent data paths meet in the middle:
//!
//! - **Terminal path**: client terminal ⇄ WebSocket ⇄ [`pty::PtySession`]
//!   ⇄ shell. Raw bytes travel as binary frames; control events (resize)
//!   travel as JSON envelopes, out-of-band from the byte stream.
//! - **Assistant path**: client UI ⇄ WebSocket ⇄
//!   [`assistant::CompletionSession`] ⇄ Ollama. Streamed fragments mutate
//!   the in-flight timeline entry in place.
//!
//! The [`timeline::Timeline`] is the only shared state. The assistant can
//! read the terminal's rendered text (a point-in-time snapshot from the
//! [`surface::TerminalSurface`]) and write a derived command back into the
//! terminal as ordinary input.
//!
//! # Modules
//!
//! - [`pty`] - Shell process and PTY session lifecycle
//! - [`bridge`] - WebSocket server and channel wiring
//! - [`assistant`] - Completion session, Ollama client, answer parsing
//! - [`timeline`] - Shared conversation log
//! - [`surface`] - Shadow terminal state
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod assistant;
pub mod bridge;
pub mod config;
pub mod constants;
pub mod env;
pub mod pty;
pub mod surface;
pub mod timeline;

// Re-export commonly used types
pub use assistant::{CompletionSession, OllamaClient};
pub use bridge::Bridge;
pub use config::Config;
pub use pty::{PtyEvent, PtySession};
pub use surface::TerminalSurface;
pub use timeline::{Exchange, Timeline};
