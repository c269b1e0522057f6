//! Vendor-specific log line parsers (C1).
//!
//! Each parser is a pure function: one text line in, `Option<Detection>`
//! out. No I/O, no shared state — the tailer owns the only side effects.

pub mod clamav;
pub mod trendmicro;

use crate::domain::Detection;

/// Shared contract implemented by every engine's log parser.
pub trait LineParser: Send + Sync {
    /// Parse one complete line (no trailing newline). Returns `None` for
    /// any line that isn't a decisive detection.
    fn parse(&self, line: &str) -> Option<Detection>;
}
