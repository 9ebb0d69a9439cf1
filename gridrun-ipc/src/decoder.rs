//! Decoder for the script stdout protocol
//!
//! A script writes zero or more `PROGRESS:{json}` lines interleaved with
//! other output, and exactly one JSON document once every progress line is
//! removed. Stdout arrives in arbitrary chunks, so [`LineDecoder`] buffers an
//! incomplete trailing line until its newline (or end of stream) arrives.

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::IpcError;

/// Marker token that prefixes a progress payload
pub const PROGRESS_MARKER: &str = "PROGRESS:";

/// Upper bound on raw output echoed back in diagnostics
pub const MAX_DIAGNOSTIC_CHARS: usize = 500;

/// Splits a byte stream into complete lines
#[derive(Debug, Default)]
pub struct LineDecoder {
    partial: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes, without terminators
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            lines.push(Self::take_line(&mut self.partial));
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);

        lines
    }

    /// Flush the unterminated tail at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(Self::take_line(&mut self.partial))
        }
    }

    fn take_line(buf: &mut Vec<u8>) -> String {
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        let line = String::from_utf8_lossy(buf).into_owned();
        buf.clear();
        line
    }
}

/// A classified stdout line
#[derive(Debug, Clone, PartialEq)]
pub enum StdoutLine {
    /// Progress marker followed by valid JSON
    Progress(JsonValue),
    /// Progress marker followed by something that is not JSON
    MalformedProgress(String),
    /// Any other line; part of the final result
    Output(String),
}

/// Classify one complete stdout line
pub fn classify_line(line: &str) -> StdoutLine {
    match line.trim_start().strip_prefix(PROGRESS_MARKER) {
        Some(payload) => match serde_json::from_str(payload.trim()) {
            Ok(value) => StdoutLine::Progress(value),
            Err(_) => StdoutLine::MalformedProgress(payload.to_string()),
        },
        None => StdoutLine::Output(line.to_string()),
    }
}

/// Accumulates the non-progress part of a script's stdout
#[derive(Debug, Default)]
pub struct ScriptOutput {
    text: String,
}

impl ScriptOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a line: progress payloads are returned, everything else is kept.
    ///
    /// Malformed progress lines are dropped with a warning; they never leak
    /// into the final result.
    pub fn accept(&mut self, line: &str) -> Option<JsonValue> {
        match classify_line(line) {
            StdoutLine::Progress(value) => Some(value),
            StdoutLine::MalformedProgress(raw) => {
                warn!(
                    "Dropping malformed progress payload: {}",
                    truncate_diagnostic(&raw, MAX_DIAGNOSTIC_CHARS)
                );
                None
            }
            StdoutLine::Output(text) => {
                self.text.push_str(&text);
                self.text.push('\n');
                None
            }
        }
    }

    /// Parse the stripped output as the final JSON result
    pub fn into_result(self) -> Result<JsonValue, IpcError> {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            return Err(IpcError::MalformedOutput {
                reason: "script produced no result".to_string(),
                output: String::new(),
            });
        }

        serde_json::from_str(trimmed).map_err(|e| IpcError::MalformedOutput {
            reason: e.to_string(),
            output: truncate_diagnostic(trimmed, MAX_DIAGNOSTIC_CHARS),
        })
    }
}

/// Keep at most `max` leading characters
pub fn truncate_diagnostic(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}... [{} more chars]", head, total - max)
}

/// Keep at most `max` trailing characters; tracebacks end with the cause
pub fn tail_diagnostic(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text.to_string();
    }
    let tail: String = text.chars().skip(total - max).collect();
    format!("[{} earlier chars] ...{}", total - max, tail)
}
