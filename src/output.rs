//! Output cleaning for LLM-friendly command output.

use regex::Regex;
use std::sync::LazyLock;

/// Regex matching ANSI escape sequences (CSI sequences, OSC sequences, etc.).
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    // Matches:
    // - CSI sequences: \x1b[ ... final_byte  (parameters can include 0-9;?<=>!)
    //   Covers standard ANSI, DEC private modes, and Kitty keyboard protocol
    // - OSC sequences: \x1b] ... ST          (e.g., terminal title)
    // - Simple escapes: \x1b followed by a single character
    // - Backspace sequences: char \x08 (used by some programs for bold/overstrike)
    Regex::new(
        r"\x1b\[[0-9;?<=>!]*[a-zA-Z~]|\x1b\][^\x07]*\x07|\x1b[()][0-9A-B]|\x1b[a-zA-Z]|.\x08",
    )
    .expect("invalid ANSI regex")
});

/// Strip ANSI escape codes from a string.
///
/// PTY output contains terminal formatting (colors, cursor movement, etc.)
/// that is meaningless to an LLM. This function removes it, leaving only
/// the visible text content.
#[must_use]
pub fn strip_ansi(s: &str) -> String {
    ANSI_ESCAPE.replace_all(s, "").to_string()
}
