//! Reasoning-segment extraction from completed answers.
//!
//! Some local models wrap internal deliberation in `<think>...</think>`
//! markers before the user-facing answer. The visible segment is what
//! callers act on (display, command extraction); the reasoning segment is
//! retained for optional display only.
//!
//! Policy for an unmatched opening marker: the entire remainder is
//! reasoning and the visible segment is empty. A model that opened a
//! deliberation block and never closed it produced no user-facing answer;
//! surfacing half-finished deliberation as the answer would be worse than
//! surfacing nothing.

// Rust guideline compliant 2026-01

/// Opening marker for a reasoning segment.
pub const THINK_OPEN: &str = "<think>";

/// Closing marker for a reasoning segment.
pub const THINK_CLOSE: &str = "</think>";

/// An answer split into reasoning and visible segments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThinkSplit {
    /// Internal deliberation, excluded from any downstream action.
    pub reasoning: String,
    /// The user-facing answer.
    pub visible: String,
}

/// Split an accumulated answer into reasoning and visible segments.
///
/// Only the first `<think>` block is treated as a marker pair; text before
/// the opening marker stays visible. With no markers the whole text is
/// visible; with an unclosed opening marker everything after it is
/// reasoning. Both segments are whitespace-trimmed.
#[must_use]
pub fn split_reasoning(text: &str) -> ThinkSplit {
    let Some(open) = text.find(THINK_OPEN) else {
        return ThinkSplit {
            reasoning: String::new(),
            visible: text.trim().to_string(),
        };
    };

    let before = &text[..open];
    let after = &text[open + THINK_OPEN.len()..];

    match after.find(THINK_CLOSE) {
        Some(close) => {
            let reasoning = &after[..close];
            let rest = &after[close + THINK_CLOSE.len()..];
            ThinkSplit {
                reasoning: reasoning.trim().to_string(),
                visible: format!("{before}{rest}").trim().to_string(),
            }
        }
        None => ThinkSplit {
            reasoning: after.trim().to_string(),
            visible: before.trim().to_string(),
        },
    }
}
