//! Filtering of the VM's console output.

use regex::bytes::Regex;

use crate::error::{Error, Result};

/// CSI sequences, both the 8-bit form and `ESC [`, matched on raw bytes.
pub const ANSI_ESCAPE_PATTERN: &str = r"(?-u:\x9B|\x1B\[)[0-?]*[ -/]*[@-~]";

/// Turns raw console lines into printable text.
#[derive(Debug, Clone)]
pub struct LineFilter {
    ansi: Regex,
}

impl LineFilter {
    pub fn new() -> Result<Self> {
        let ansi = Regex::new(ANSI_ESCAPE_PATTERN)
            .map_err(|e| Error::config(format!("invalid escape pattern: {e}")))?;
        Ok(Self { ansi })
    }

    /// Strip escape sequences and surrounding whitespace.
    ///
    /// `None` when nothing printable is left.
    pub fn clean(&self, raw: &[u8]) -> Option<String> {
        let stripped = self.ansi.replace_all(raw, &b""[..]);
        let text = String::from_utf8_lossy(&stripped);
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}
