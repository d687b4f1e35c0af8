//! Conversation timeline: an ordered, tail-mutable log of exchanges.
//!
//! The timeline is the only state shared between the terminal path and the
//! assistant path. Entries are append-only except for the most recently
//! appended one, which the completion session mutates in place while a
//! response streams in.
//!
//! Identifier assignment (`len + 1`) happens under the timeline's interior
//! mutex, so concurrent appends can never observe the same length and ids
//! are always unique and dense. Tail mutation is guarded by an explicit
//! staleness check: mutating anything but the current last entry fails
//! with [`StaleTarget`] instead of silently clobbering history.
//!
//! Mutations are broadcast as [`TimelineUpdate`]s so transports can stream
//! the conversation to clients without polling.

// Rust guideline compliant 2026-02

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::constants::BROADCAST_CHANNEL_CAPACITY;

/// Who produced an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human at the terminal.
    User,
    /// The language model.
    Assistant,
    /// The daemon itself (notices, banners).
    System,
}

/// How an exchange should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Ordinary conversation content.
    Normal,
    /// A system-level notice (e.g. a stopped generation).
    Tip,
    /// An error notice.
    Error,
}

/// One entry in the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    /// Monotonic identifier, 1-based.
    pub id: u64,
    /// Who produced the entry.
    pub role: Role,
    /// Entry text. Mutable only while this is the tail entry.
    pub text: String,
    /// Presentation kind.
    pub kind: ExchangeKind,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Timeline mutations, broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum TimelineUpdate {
    /// A new exchange was appended.
    Appended(Exchange),
    /// The tail exchange's text (and possibly kind) changed.
    TailUpdated {
        /// Identifier of the mutated exchange.
        id: u64,
        /// Full replacement text.
        text: String,
        /// Presentation kind after the mutation.
        kind: ExchangeKind,
    },
}

/// Error returned when a tail mutation targets a non-tail entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleTarget {
    /// The id the caller asked to mutate.
    pub requested: u64,
    /// The id of the actual tail entry, if any.
    pub current: Option<u64>,
}

impl std::fmt::Display for StaleTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.current {
            Some(current) => write!(
                f,
                "exchange {} is not the tail entry (tail is {})",
                self.requested, current
            ),
            None => write!(f, "exchange {} is not the tail entry (timeline is empty)", self.requested),
        }
    }
}

impl std::error::Error for StaleTarget {}

/// The ordered, tail-mutable exchange log.
#[derive(Debug)]
pub struct Timeline {
    entries: Mutex<Vec<Exchange>>,
    update_tx: broadcast::Sender<TimelineUpdate>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    /// Create an empty timeline.
    #[must_use]
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(Vec::new()),
            update_tx,
        }
    }

    /// Append an exchange, returning its assigned id.
    ///
    /// The id is one greater than the length observed under the lock, so
    /// concurrent appends always get distinct, dense ids.
    pub fn append(&self, role: Role, text: impl Into<String>, kind: ExchangeKind) -> u64 {
        let exchange = {
            let mut entries = self.entries.lock().expect("timeline lock poisoned");
            let exchange = Exchange {
                id: entries.len() as u64 + 1,
                role,
                text: text.into(),
                kind,
                created_at: Utc::now(),
            };
            entries.push(exchange.clone());
            exchange
        };
        let id = exchange.id;
        let _ = self.update_tx.send(TimelineUpdate::Appended(exchange));
        id
    }

    /// Replace the tail exchange's text.
    ///
    /// # Errors
    ///
    /// Returns [`StaleTarget`] if `id` is not the identifier of the current
    /// last entry. The timeline is left unchanged in that case.
    pub fn mutate_tail(&self, id: u64, text: impl Into<String>) -> Result<(), StaleTarget> {
        self.mutate_tail_inner(id, text.into(), None)
    }

    /// Replace the tail exchange's text and presentation kind.
    ///
    /// Used when finalizing an in-flight entry into a system-level notice
    /// (stopped or failed), which must stay distinguishable from assistant
    /// content.
    ///
    /// # Errors
    ///
    /// Returns [`StaleTarget`] if `id` is not the current tail entry.
    pub fn finalize_tail(
        &self,
        id: u64,
        text: impl Into<String>,
        kind: ExchangeKind,
    ) -> Result<(), StaleTarget> {
        self.mutate_tail_inner(id, text.into(), Some(kind))
    }

    fn mutate_tail_inner(
        &self,
        id: u64,
        text: String,
        kind: Option<ExchangeKind>,
    ) -> Result<(), StaleTarget> {
        let update = {
            let mut entries = self.entries.lock().expect("timeline lock poisoned");
            let Some(last) = entries.last_mut() else {
                return Err(StaleTarget {
                    requested: id,
                    current: None,
                });
            };
            if last.id != id {
                return Err(StaleTarget {
                    requested: id,
                    current: Some(last.id),
                });
            }
            last.text = text;
            if let Some(kind) = kind {
                last.kind = kind;
            }
            TimelineUpdate::TailUpdated {
                id,
                text: last.text.clone(),
                kind: last.kind,
            }
        };
        let _ = self.update_tx.send(update);
        Ok(())
    }

    /// Subscribe to timeline updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TimelineUpdate> {
        self.update_tx.subscribe()
    }

    /// A point-in-time copy of all entries.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Exchange> {
        self.entries
            .lock()
            .expect("timeline lock poisoned")
            .clone()
    }

    /// Look up an exchange by id.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Exchange> {
        let entries = self.entries.lock().expect("timeline lock poisoned");
        // Ids are dense and 1-based, but scan defensively anyway.
        entries.iter().find(|e| e.id == id).cloned()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("timeline lock poisoned").len()
    }

    /// Whether the timeline is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
