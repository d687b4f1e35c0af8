//! Control-frame envelope for the terminal WebSocket channel.
//!
//! Framing contract: **binary frames carry raw terminal bytes** in both
//! directions, **text frames carry JSON control envelopes**. Control events
//! are therefore distinguished from shell I/O by frame type, not by
//! inspecting byte content.
//!
//! One documented fallback exists for plain-text clients: a text frame
//! that does not parse as a control envelope is treated as raw input
//! bytes. The JSON attempt is only made when the frame even looks like an
//! envelope (leading `{`), so ordinary typed input is never parsed.

// Rust guideline compliant 2026-02

use serde::{Deserialize, Serialize};

/// Terminal geometry carried in resize envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dims {
    /// Width in columns.
    pub cols: u16,
    /// Height in rows.
    pub rows: u16,
}

/// Control envelopes accepted on the terminal channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// The client terminal changed geometry.
    Resize {
        /// New geometry.
        dims: Dims,
    },
}

/// Classified inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundText {
    /// A parsed control envelope.
    Control(ControlFrame),
    /// Raw input for the shell (fallback path).
    Input(String),
}

/// Classify an inbound text frame.
///
/// Frames that look like an envelope (leading `{`) are tried as JSON
/// control frames; on parse failure they fall back to raw input rather
/// than being rejected, so shell input that happens to contain braces
/// still reaches the shell.
#[must_use]
pub fn parse_text_frame(text: &str) -> InboundText {
    if text.trim_start().starts_with('{') {
        if let Ok(frame) = serde_json::from_str::<ControlFrame>(text) {
            return InboundText::Control(frame);
        }
    }
    InboundText::Input(text.to_string())
}

/// Normalize client input line endings for the shell.
///
/// Terminal emulators emit `\r` for the Enter key; the shell expects `\n`.
#[must_use]
pub fn normalize_input(text: &str) -> String {
    if text == "\r" {
        "\n".to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resize_envelope() {
        let frame = parse_text_frame(r#"{"type":"resize","dims":{"cols":100,"rows":40}}"#);
        assert_eq!(
            frame,
            InboundText::Control(ControlFrame::Resize {
                dims: Dims {
                    cols: 100,
                    rows: 40
                }
            })
        );
    }

    #[test]
    fn test_plain_text_is_input() {
        let frame = parse_text_frame("ls -la\n");
        assert_eq!(frame, InboundText::Input("ls -la\n".to_string()));
    }

    #[test]
    fn test_unknown_json_falls_back_to_input() {
        // Braces alone don't make a control frame.
        let text = r#"{"not": "a control frame"}"#;
        assert_eq!(
            parse_text_frame(text),
            InboundText::Input(text.to_string())
        );
    }

    #[test]
    fn test_malformed_json_falls_back_to_input() {
        let text = "{oops";
        assert_eq!(
            parse_text_frame(text),
            InboundText::Input(text.to_string())
        );
    }

    #[test]
    fn test_leading_whitespace_envelope_still_parses() {
        let frame = parse_text_frame("  {\"type\":\"resize\",\"dims\":{\"cols\":80,\"rows\":24}}");
        assert!(matches!(frame, InboundText::Control(_)));
    }

    #[test]
    fn test_resize_envelope_round_trips() {
        let frame = ControlFrame::Resize {
            dims: Dims { cols: 80, rows: 24 },
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"resize\""));
        let parsed: ControlFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_normalize_carriage_return() {
        assert_eq!(normalize_input("\r"), "\n");
    }

    #[test]
    fn test_normalize_leaves_other_input_alone() {
        assert_eq!(normalize_input("echo hi\n"), "echo hi\n");
        assert_eq!(normalize_input("\x03"), "\x03");
        assert_eq!(normalize_input("a\rb"), "a\rb");
    }
}
