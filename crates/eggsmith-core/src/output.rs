//! Line hygiene for streamed command output.

use regex::Regex;
use std::sync::OnceLock;

fn ansi_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\x1B(?:[@-Z\\\-_]|\[[0-?]*[ -/]*[@-~])").ok())
        .as_ref()
}

/// Remove ANSI/VT100 escape sequences.
pub fn strip_ansi(line: &str) -> String {
    match ansi_pattern() {
        Some(pattern) => pattern.replace_all(line, "").into_owned(),
        None => line.to_string(),
    }
}

/// Noise produced by the toolchain that carries no information for the operator.
pub const DEFAULT_SUPPRESSED: &[&str] = &[
    "remote: Enumerating objects:",
    "remote: Counting objects:",
    "remote: Compressing objects:",
    "remote: Total",
    "Receiving objects:",
    "Resolving deltas:",
    "checking keyring",
    "checking package integrity",
    "loading package files",
    "checking for file conflicts",
    ":: Processing package changes",
    ":: Running post-transaction hooks",
];

/// Cleans raw output lines before they reach the sink.
#[derive(Debug, Clone)]
pub struct OutputFilter {
    strip_ansi: bool,
    suppress: Vec<String>,
}

impl Default for OutputFilter {
    fn default() -> Self {
        Self {
            strip_ansi: true,
            suppress: DEFAULT_SUPPRESSED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl OutputFilter {
    pub fn new(strip_ansi: bool, suppress: Vec<String>) -> Self {
        Self {
            strip_ansi,
            suppress,
        }
    }

    /// Pass lines through untouched.
    pub fn passthrough() -> Self {
        Self::new(false, Vec::new())
    }

    /// Returns `None` when the line should be dropped.
    pub fn clean(&self, raw: &str) -> Option<String> {
        let line = raw.trim_end_matches(['\r', '\n']);
        let line = if self.strip_ansi {
            strip_ansi(line)
        } else {
            line.to_string()
        };
        if self
            .suppress
            .iter()
            .any(|needle| !needle.is_empty() && line.contains(needle.as_str()))
        {
            return None;
        }
        Some(line)
    }
}
