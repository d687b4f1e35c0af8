//! Completion session: one streaming request/response cycle at a time.
//!
//! The session owns the interaction between the timeline and the inference
//! server. `ask()` appends a user exchange plus a placeholder assistant
//! exchange, then a background task streams fragments into the placeholder.
//! The accumulator never loses a fragment; the timeline entry is replaced
//! wholesale with the accumulator's current join after each fragment, so
//! the UI-visible text is last-writer-wins while the underlying data is
//! append-only.
//!
//! # State machine
//!
//! ```text
//! Idle -> Requesting -> Streaming -> {finalized | stopped | failed} -> Idle
//! ```
//!
//! `ask()` is only legal from `Idle`; a concurrent call fails with
//! [`SessionBusy`] and has no side effect. `stop()` cancels the in-flight
//! transfer within one read-chunk boundary and is idempotent, including
//! after natural completion. Every terminal path finalizes the placeholder
//! exchange — it is never left at the placeholder text.

// Rust guideline compliant 2026-02

pub mod ollama;
pub mod think;

pub use ollama::{GenerateChunk, GenerateStream, ModelInfo, OllamaClient};
pub use think::{split_reasoning, ThinkSplit};

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::timeline::{ExchangeKind, Role, Timeline};

/// Placeholder text for the in-flight assistant exchange.
pub const THINKING_PLACEHOLDER: &str = "Thinking…";

/// Notice text used when a generation is cancelled.
pub const STOPPED_NOTICE: &str = "Generation stopped.";

/// Where the session is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// No request in flight.
    Idle,
    /// Request issued, no fragment received yet.
    Requesting,
    /// Fragments are arriving.
    Streaming,
}

/// How the most recent request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Stream completed normally.
    Finalized,
    /// Cancelled by `stop()`.
    Stopped,
    /// Transport-level failure.
    Failed,
}

/// Error returned when `ask()` is called while a request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBusy;

impl std::fmt::Display for SessionBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a completion request is already in flight")
    }
}

impl std::error::Error for SessionBusy {}

#[derive(Debug)]
struct SessionInner {
    state: CompletionState,
    cancel: Option<CancellationToken>,
    last_outcome: Option<CompletionOutcome>,
    last_reasoning: Option<String>,
}

/// Manages one streaming completion cycle at a time against the timeline.
#[derive(Debug, Clone)]
pub struct CompletionSession {
    timeline: Arc<Timeline>,
    client: OllamaClient,
    default_model: String,
    inner: Arc<Mutex<SessionInner>>,
}

impl CompletionSession {
    /// Create a session writing into `timeline` via `client`.
    #[must_use]
    pub fn new(timeline: Arc<Timeline>, client: OllamaClient, default_model: String) -> Self {
        Self {
            timeline,
            client,
            default_model,
            inner: Arc::new(Mutex::new(SessionInner {
                state: CompletionState::Idle,
                cancel: None,
                last_outcome: None,
                last_reasoning: None,
            })),
        }
    }

    /// The timeline this session writes into.
    #[must_use]
    pub fn timeline(&self) -> Arc<Timeline> {
        Arc::clone(&self.timeline)
    }

    /// The inference client.
    #[must_use]
    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    /// Current request-cycle state.
    #[must_use]
    pub fn state(&self) -> CompletionState {
        self.inner.lock().expect("session lock poisoned").state
    }

    /// How the most recent request ended, if any has ended.
    #[must_use]
    pub fn last_outcome(&self) -> Option<CompletionOutcome> {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .last_outcome
    }

    /// Reasoning segment retained from the most recent finalized answer.
    #[must_use]
    pub fn last_reasoning(&self) -> Option<String> {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .last_reasoning
            .clone()
    }

    /// Issue a streaming completion request.
    ///
    /// Appends a user exchange and a placeholder assistant exchange, then
    /// streams the response into the placeholder from a background task.
    /// Returns the placeholder's exchange id.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionBusy`] (synchronously, with no side effect) if a
    /// request is already in flight.
    pub fn ask(&self, prompt: &str, model: Option<&str>) -> Result<u64, SessionBusy> {
        let token = {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            if inner.state != CompletionState::Idle {
                return Err(SessionBusy);
            }
            let token = CancellationToken::new();
            inner.state = CompletionState::Requesting;
            inner.cancel = Some(token.clone());
            inner.last_outcome = None;
            inner.last_reasoning = None;
            token
        };

        self.timeline
            .append(Role::User, prompt, ExchangeKind::Normal);
        let exchange_id =
            self.timeline
                .append(Role::Assistant, THINKING_PLACEHOLDER, ExchangeKind::Normal);

        let session = self.clone();
        let model = model.unwrap_or(&self.default_model).to_string();
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            session.run_stream(token, exchange_id, model, prompt).await;
        });

        Ok(exchange_id)
    }

    /// Ask about what is currently on the terminal screen.
    ///
    /// # Errors
    ///
    /// Returns [`SessionBusy`] if a request is already in flight.
    pub fn ask_about_screen(
        &self,
        screen_text: &str,
        model: Option<&str>,
    ) -> Result<u64, SessionBusy> {
        self.ask(&explain_prompt(screen_text), model)
    }

    /// Cancel the in-flight request, if any.
    ///
    /// Idempotent: extra calls, and calls after natural completion, are
    /// no-ops. Cancellation takes effect within one read-chunk boundary.
    pub fn stop(&self) {
        let inner = self.inner.lock().expect("session lock poisoned");
        if let Some(token) = &inner.cancel {
            token.cancel();
        }
    }

    async fn run_stream(
        &self,
        token: CancellationToken,
        exchange_id: u64,
        model: String,
        prompt: String,
    ) {
        let request = tokio::select! {
            () = token.cancelled() => {
                self.finalize_stopped(exchange_id, "");
                return;
            }
            result = self.client.generate(&model, &prompt) => result,
        };

        let mut stream = match request {
            Ok(stream) => stream,
            Err(e) => {
                self.finalize_failed(exchange_id, &e);
                return;
            }
        };
        self.set_state(CompletionState::Streaming);

        let mut acc = String::new();
        loop {
            let chunk = tokio::select! {
                () = token.cancelled() => {
                    self.finalize_stopped(exchange_id, &acc);
                    return;
                }
                chunk = stream.next_chunk() => chunk,
            };

            match chunk {
                Some(Ok(chunk)) => {
                    if let Some(fragment) = chunk.response {
                        acc.push_str(&fragment);
                        if let Err(e) = self.timeline.mutate_tail(exchange_id, acc.clone()) {
                            log::warn!("in-flight exchange no longer tail: {e}");
                        }
                    }
                    if chunk.done {
                        break;
                    }
                }
                Some(Err(e)) => {
                    self.finalize_failed(exchange_id, &e);
                    return;
                }
                None => break,
            }
        }

        self.finalize_complete(exchange_id, &acc);
    }

    fn set_state(&self, state: CompletionState) {
        self.inner.lock().expect("session lock poisoned").state = state;
    }

    fn finalize_complete(&self, exchange_id: u64, acc: &str) {
        let split = split_reasoning(acc);
        if let Err(e) = self
            .timeline
            .finalize_tail(exchange_id, split.visible.clone(), ExchangeKind::Normal)
        {
            log::warn!("failed to finalize exchange {exchange_id}: {e}");
        }
        self.enter_idle(CompletionOutcome::Finalized, Some(split.reasoning));
    }

    fn finalize_stopped(&self, exchange_id: u64, acc: &str) {
        let split = split_reasoning(acc);
        let text = if split.visible.is_empty() {
            STOPPED_NOTICE.to_string()
        } else {
            format!("{}\n\n{STOPPED_NOTICE}", split.visible)
        };
        if let Err(e) = self
            .timeline
            .finalize_tail(exchange_id, text, ExchangeKind::Tip)
        {
            log::warn!("failed to finalize stopped exchange {exchange_id}: {e}");
        }
        self.enter_idle(CompletionOutcome::Stopped, Some(split.reasoning));
    }

    fn finalize_failed(&self, exchange_id: u64, error: &anyhow::Error) {
        log::warn!("completion request failed: {error:#}");
        let text = format!("Request failed: {error:#}");
        if let Err(e) = self
            .timeline
            .finalize_tail(exchange_id, text, ExchangeKind::Error)
        {
            log::warn!("failed to finalize failed exchange {exchange_id}: {e}");
        }
        self.enter_idle(CompletionOutcome::Failed, None);
    }

    fn enter_idle(&self, outcome: CompletionOutcome, reasoning: Option<String>) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner.state = CompletionState::Idle;
        inner.cancel = None;
        inner.last_outcome = Some(outcome);
        inner.last_reasoning = reasoning.filter(|r| !r.is_empty());
    }
}

/// Build a prompt asking the model to explain the current terminal screen.
#[must_use]
pub fn explain_prompt(screen_text: &str) -> String {
    format!(
        "Explain what is happening in this terminal output and what the \
         problem is, if any:\n```\n{screen_text}\n```"
    )
}

/// Extract a runnable command from a visible answer segment.
///
/// Takes the first non-empty line of the first fenced code block, with a
/// leading `$ ` prompt marker stripped. Reasoning segments must be split
/// off before calling this; deliberation never drives the terminal.
#[must_use]
pub fn extract_command(visible: &str) -> Option<String> {
    let mut in_fence = false;
    for line in visible.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            if in_fence {
                // First fence closed without content.
                return None;
            }
            in_fence = true;
            continue;
        }
        if in_fence && !trimmed.is_empty() {
            let command = trimmed.strip_prefix("$ ").unwrap_or(trimmed);
            return Some(command.to_string());
        }
    }
    None
}
