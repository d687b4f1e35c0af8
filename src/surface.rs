//! Shadow terminal surface.
//!
//! The daemon keeps a vt100 parser fed with the same bytes the connected
//! terminal renders, so it always has a parsed copy of what the user sees.
//! The surface backs two capabilities:
//!
//! - point-in-time text snapshots for the assistant ("what is on screen
//!   right now"), and
//! - formatted ANSI replay for clients that connect after output has
//!   already scrolled past.
//!
//! The surface never touches the PTY itself; it only consumes output bytes
//! and geometry changes.

// Rust guideline compliant 2026-01

use crate::constants::DEFAULT_SCROLLBACK_LINES;

/// Parsed view of the terminal contents.
///
/// Wraps a [`vt100::Parser`] with the operations the rest of the crate
/// needs. Feeding and resizing require `&mut self`; the PTY session wraps
/// the surface in `Arc<Mutex<..>>` so the reader thread and snapshot
/// requests can share it.
pub struct TerminalSurface {
    parser: vt100::Parser,
}

impl std::fmt::Debug for TerminalSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (rows, cols) = self.size();
        f.debug_struct("TerminalSurface")
            .field("rows", &rows)
            .field("cols", &cols)
            .finish_non_exhaustive()
    }
}

impl TerminalSurface {
    /// Create a surface with the given geometry and default scrollback.
    #[must_use]
    pub fn new(rows: u16, cols: u16) -> Self {
        Self::with_scrollback(rows, cols, DEFAULT_SCROLLBACK_LINES)
    }

    /// Create a surface with explicit scrollback depth.
    #[must_use]
    pub fn with_scrollback(rows: u16, cols: u16, scrollback: usize) -> Self {
        Self {
            parser: vt100::Parser::new(rows.max(1), cols.max(1), scrollback),
        }
    }

    /// Feed output bytes into the surface.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.parser.process(bytes);
    }

    /// Resize the surface.
    pub fn set_size(&mut self, rows: u16, cols: u16) {
        self.parser.screen_mut().set_size(rows.max(1), cols.max(1));
    }

    /// Current geometry as `(rows, cols)`.
    #[must_use]
    pub fn size(&self) -> (u16, u16) {
        self.parser.screen().size()
    }

    /// Cursor position as `(row, col)`.
    #[must_use]
    pub fn cursor(&self) -> (u16, u16) {
        self.parser.screen().cursor_position()
    }

    /// Plain text of the currently visible screen, trailing whitespace
    /// trimmed per line.
    #[must_use]
    pub fn visible_text(&self) -> String {
        self.parser.screen().contents()
    }

    /// Plain text of the full buffer: scrollback followed by the visible
    /// screen.
    ///
    /// Walks the scrollback one line at a time: at offset `n` the first
    /// visible row is the `n`-th line above the live screen, so decreasing
    /// offsets enumerate scrollback lines oldest-first without overlap.
    #[must_use]
    pub fn full_text(&mut self) -> String {
        let saved = self.parser.screen().scrollback();

        self.parser.screen_mut().set_scrollback(usize::MAX);
        let total = self.parser.screen().scrollback();
        let (_rows, cols) = self.parser.screen().size();

        let mut lines: Vec<String> = Vec::new();
        for offset in (1..=total).rev() {
            self.parser.screen_mut().set_scrollback(offset);
            if let Some(row) = self.parser.screen().rows(0, cols).next() {
                lines.push(row);
            }
        }

        self.parser.screen_mut().set_scrollback(0);
        lines.extend(self.parser.screen().rows(0, cols));

        self.parser.screen_mut().set_scrollback(saved);

        // Drop trailing blank rows below the last output.
        while lines.last().is_some_and(|line| line.trim().is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }

    /// Formatted ANSI snapshot of the visible screen.
    ///
    /// Suitable for replaying into a fresh terminal so it shows the same
    /// content, colors, and cursor position.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.parser.screen().contents_formatted()
    }
}
