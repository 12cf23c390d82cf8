//! Crash-signature classification over Godot's output stream
//!
//! Crash detection is best-effort pattern matching: an ordered list of
//! predicates evaluated per line, first match wins. Extend by appending to
//! the list; earlier entries take precedence for classification.

use regex::Regex;
use std::sync::LazyLock;

/// Line Godot prints once its internal WebSocket server is listening.
/// The supervisor polls for this substring during `wait_for_ready`.
pub const DEFAULT_READY_MARKER: &str = "STATE_OPEN";

static CRASH_SIGNATURES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // GDScript runtime error
        r"SCRIPT ERROR:.*",
        // Godot engine error
        r"ERROR:.*",
        // Fatal engine error
        r"FATAL:.*",
        // Windows crash handler
        r"CrashHandlerException:.*",
        // Native crash
        r"Segmentation fault",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("crash signature pattern must compile"))
    .collect()
});

/// Whether a single output line matches a known crash signature
pub fn is_crash_line(line: &str) -> bool {
    CRASH_SIGNATURES.iter().any(|re| re.is_match(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_error_matches() {
        assert!(is_crash_line(
            "SCRIPT ERROR: Invalid call. Nonexistent function 'foo' in base 'Node2D'."
        ));
    }

    #[test]
    fn test_engine_error_matches() {
        assert!(is_crash_line("ERROR: Condition \"!is_inside_tree()\" is true."));
        assert!(is_crash_line("FATAL: Index p_index = 3 is out of bounds."));
    }

    #[test]
    fn test_native_crashes_match() {
        assert!(is_crash_line("CrashHandlerException: Program crashed with signal 11"));
        assert!(is_crash_line("Segmentation fault (core dumped)"));
    }

    #[test]
    fn test_ordinary_output_does_not_match() {
        assert!(!is_crash_line("Godot Engine v4.2.stable.official"));
        assert!(!is_crash_line("[AI] WebSocket server STATE_OPEN on port 9090"));
        assert!(!is_crash_line("Wave 3 started"));
    }
}
