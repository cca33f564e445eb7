//! Human-facing rendering of instance status.
//!
//! Renders [`Status`](crate::instance::Status) snapshots as plain text with
//! optional ANSI color, for demo output and log sinks.

use std::io::IsTerminal;

use crate::instance::Status;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta / dark pink
pub const RESET_COLOR: &str = "\x1b[0m";

/// Formatter color mode for status output.
///
/// Controls whether ANSI color codes are included in formatted output:
/// - [`FormatterMode::Auto`]: Automatically detects TTY capability via `stderr.is_terminal()`
/// - [`FormatterMode::Colored`]: Always include color codes (for forced color output)
/// - [`FormatterMode::Plain`]: Never include color codes (for logs/files)
///
/// # Examples
/// ```
/// use trellis::telemetry::FormatterMode;
///
/// // Auto-detect based on TTY
/// let mode = FormatterMode::auto_detect();
///
/// // Force plain output for logging
/// let mode = FormatterMode::Plain;
/// # let _ = mode;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatterMode {
    /// Auto-detect TTY capability (checks `stderr.is_terminal()`)
    #[default]
    Auto,
    /// Always include ANSI color codes
    Colored,
    /// Never include ANSI color codes
    Plain,
}

impl FormatterMode {
    /// Auto-detect formatter mode based on stderr TTY capability.
    pub fn auto_detect() -> Self {
        if std::io::stderr().is_terminal() {
            FormatterMode::Colored
        } else {
            FormatterMode::Plain
        }
    }

    /// Returns true if this mode should use colored output.
    ///
    /// For `Auto` mode, performs TTY detection on each call.
    pub fn is_colored(&self) -> bool {
        match self {
            FormatterMode::Auto => std::io::stderr().is_terminal(),
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
        }
    }
}

/// Rendered output for a status item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct StatusRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl StatusRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

/// Plain text formatter with optional ANSI color codes.
pub struct StatusFormatter {
    mode: FormatterMode,
}

impl StatusFormatter {
    /// Create a new formatter with auto-detected color mode.
    pub fn new() -> Self {
        Self {
            mode: FormatterMode::Auto,
        }
    }

    /// Create a new formatter with explicit color mode.
    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }

    fn color<'a>(&self, ansi_code: &'a str) -> &'a str {
        if self.mode.is_colored() {
            ansi_code
        } else {
            ""
        }
    }

    fn reset(&self) -> &str {
        if self.mode.is_colored() {
            RESET_COLOR
        } else {
            ""
        }
    }

    /// Render one status snapshot: path, phase, and the most recent trail
    /// entries (`trail_depth` of them; 0 omits the trail).
    pub fn render_status(&self, status: &Status, trail_depth: usize) -> StatusRender {
        let path = if status.path.is_empty() {
            "(destroyed)".to_string()
        } else {
            status.path.join("/")
        };

        let mut lines = Vec::new();
        lines.push(format!(
            "{}{path}{} [{:?}]\n",
            self.color(CONTEXT_COLOR),
            self.reset(),
            status.phase
        ));
        for entry in status.trail.iter().take(trail_depth) {
            lines.push(format!(
                "{}  {} {}{}\n",
                self.color(LINE_COLOR),
                entry.when.format("%H:%M:%S%.3f"),
                entry.expr,
                self.reset()
            ));
        }

        StatusRender {
            context: status.path.last().cloned(),
            lines,
        }
    }
}

impl Default for StatusFormatter {
    fn default() -> Self {
        Self::new()
    }
}
