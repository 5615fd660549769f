//! Streaming ingest
//!
//! Turns the provider's server-sent-event byte stream into a growing content
//! buffer, and runs the decode, redact and layout pipeline over that buffer on
//! every tick.

use serde::Deserialize;

use crate::grid::Grid;
use crate::layout::layout;
use crate::models::{ModelResponse, StreamSnapshot};
use crate::partial::decode_embedded_object;
use crate::redact::redact_response;

/// Holds back an incomplete multi-byte UTF-8 sequence until the rest of it
/// arrives in a later chunk
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    /// Appends bytes and returns all text that is now complete.
    ///
    /// Invalid sequences become U+FFFD.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // truncated sequence at the end, wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flushes whatever is left, lossily
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Splits text into lines, carrying an unterminated last line over to the
/// next push
#[derive(Debug, Default)]
pub struct LineCarry {
    partial: String,
}

impl LineCarry {
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.partial.push_str(text);
        let mut lines = Vec::new();
        while let Some(end) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=end).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.partial);
        (!rest.trim().is_empty()).then(|| rest.trim_end_matches('\r').to_string())
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    total_tokens: Option<u64>,
}

/// What one `data:` payload contributed
#[derive(Debug, Default, PartialEq, Eq)]
struct ChunkDeltaText {
    content: Option<String>,
    total_tokens: Option<u64>,
}

// Returns None for lines that carry nothing: comments, other fields, [DONE]
// and malformed payloads
fn parse_data_line(line: &str) -> Option<ChunkDeltaText> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => Some(ChunkDeltaText {
            content: chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta)
                .and_then(|delta| delta.content),
            total_tokens: chunk.usage.and_then(|usage| usage.total_tokens),
        }),
        Err(e) => {
            let preview: String = data.chars().take(100).collect();
            tracing::warn!(error = %e, chunk = %preview, "skipping malformed stream chunk");
            None
        }
    }
}

/// Rough token count used when the provider reports none: half the
/// character count, rounded up
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(2)
}

/// Decodes a (possibly truncated) buffer into a response, skipping any prose
/// before the first `{`
pub fn decode_response(text: &str) -> Option<ModelResponse> {
    decode_embedded_object(text).and_then(ModelResponse::from_value)
}

/// Result of running the pipeline once over the current buffer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tick {
    /// The decoded tree, unredacted
    pub response: Option<ModelResponse>,
    /// The tree with tool results and conclusions replaced by markers
    pub redacted: Option<ModelResponse>,
    /// Layout of the redacted tree, `None` when there is nothing to render
    pub grid: Option<Grid>,
}

/// Accumulates streamed completion text for one analysis
#[derive(Debug, Default)]
pub struct StreamIngest {
    utf8: Utf8Carry,
    lines: LineCarry,
    content: String,
    reported_tokens: Option<u64>,
    iteration: u64,
}

impl StreamIngest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network chunk; returns the new iteration count
    pub fn push_bytes(&mut self, bytes: &[u8]) -> u64 {
        self.iteration += 1;
        let text = self.utf8.push(bytes);
        for line in self.lines.push(&text) {
            self.apply_line(&line);
        }
        self.iteration
    }

    /// Flushes carried bytes and any unterminated last line
    pub fn finish(&mut self) {
        let text = self.utf8.finish();
        for line in self.lines.push(&text) {
            self.apply_line(&line);
        }
        if let Some(line) = self.lines.finish() {
            self.apply_line(&line);
        }
    }

    fn apply_line(&mut self, line: &str) {
        if let Some(delta) = parse_data_line(line) {
            if let Some(content) = delta.content {
                self.content.push_str(&content);
            }
            if let Some(tokens) = delta.total_tokens.filter(|t| *t > 0) {
                self.reported_tokens = Some(tokens);
            }
        }
    }

    /// The model output accumulated so far
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Provider-reported token total, or an estimate from the content
    pub fn tokens(&self) -> u64 {
        self.reported_tokens
            .unwrap_or_else(|| estimate_tokens(&self.content))
    }

    /// Runs decode, redact and layout over the current buffer
    pub fn tick(&self) -> Tick {
        let Some(response) = decode_response(&self.content) else {
            tracing::trace!(
                iteration = self.iteration,
                chars = self.content.len(),
                "buffer not decodable yet"
            );
            return Tick::default();
        };
        let redacted = redact_response(&response);
        let grid = layout(&redacted.reasoning);
        tracing::debug!(
            iteration = self.iteration,
            roots = redacted.reasoning.len(),
            rows = grid.as_ref().map_or(0, Grid::row_count),
            "stream tick"
        );
        Tick {
            response: Some(response),
            redacted: Some(redacted),
            grid,
        }
    }

    /// Snapshot record for the store
    pub fn snapshot(&self, redacted: Option<ModelResponse>, is_streaming: bool) -> StreamSnapshot {
        StreamSnapshot {
            content: redacted,
            iteration_count: self.iteration,
            is_streaming,
            raw_chars: self.content.chars().count(),
        }
    }
}
