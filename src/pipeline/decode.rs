//! Incremental frame decoders (text chunks -> frames).
//!
//! Both decoders are pure: no I/O, no knowledge of retries, providers or cancellation.
//! Feeding a stream in any number of pieces yields exactly the frames that feeding it in
//! one piece would, provided `flush_remainder()` is called once the stream ends.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::FrameDecoder;

/// Buffer size (in characters) past which an undelimited SSE buffer is trimmed.
pub const SSE_MAX_BUFFER_CHARS: usize = 1_048_576;
/// Characters kept after a trim.
pub const SSE_TRIM_KEEP_CHARS: usize = 65_536;
/// Bytes an unterminated NDJSON line may reach before it is dropped.
pub const NDJSON_MAX_LINE_BYTES: usize = 1_048_576;

/// One event-stream block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSseEvent {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
}

/// Incremental `text/event-stream` parser.
///
/// Blocks are separated by a blank line (`\n\n`, `\r\n\r\n` and the mixed forms). Inside a
/// block: `:`-prefixed lines are comments, `data` may repeat (joined with `\n`), `event`,
/// `id` and `retry` are single-valued. The last seen `id` is remembered and applied to
/// later blocks that omit one.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    /// Byte offset before which the buffer is known to hold no boundary.
    scan_from: usize,
    last_event_id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete event it closed, in order.
    pub fn feed(&mut self, chunk: &str) -> Vec<ParsedSseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some((block_end, next_start)) = find_boundary(&self.buffer, self.scan_from) {
            let block: String = self.buffer[..block_end].to_string();
            self.buffer.drain(..next_start);
            self.scan_from = 0;
            if let Some(ev) = self.parse_block(&block) {
                events.push(ev);
            }
        }

        // A partial terminator ("\n" or "\n\r") may still sit at the tail.
        self.scan_from = self.buffer.len().saturating_sub(2);
        while !self.buffer.is_char_boundary(self.scan_from) {
            self.scan_from -= 1;
        }

        self.enforce_cap();
        events
    }

    /// Parse whatever is left once the underlying stream has ended, then clear the buffer.
    pub fn flush_remainder(&mut self) -> Vec<ParsedSseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.scan_from = 0;
        let block = rest.trim_end_matches(['\r', '\n']);
        if block.is_empty() {
            return Vec::new();
        }
        self.parse_block(block).into_iter().collect()
    }

    /// The most recent `id` field seen on this stream.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Characters currently buffered (exposed for diagnostics and tests).
    pub fn buffered_len(&self) -> usize {
        self.buffer.chars().count()
    }

    fn enforce_cap(&mut self) {
        // Byte length bounds char count from above, so the cheap check comes first.
        if self.buffer.len() <= SSE_MAX_BUFFER_CHARS {
            return;
        }
        let chars = self.buffer.chars().count();
        if chars <= SSE_MAX_BUFFER_CHARS {
            return;
        }
        let skip = chars - SSE_TRIM_KEEP_CHARS;
        let cut = self
            .buffer
            .char_indices()
            .nth(skip)
            .map(|(i, _)| i)
            .unwrap_or(self.buffer.len());
        warn!(
            buffered_chars = chars,
            kept_chars = SSE_TRIM_KEEP_CHARS,
            "SSE buffer exceeded cap without a block boundary; discarding oldest data"
        );
        self.buffer.drain(..cut);
        self.scan_from = 0;
    }

    fn parse_block(&mut self, block: &str) -> Option<ParsedSseEvent> {
        let mut data_lines: Vec<&str> = Vec::new();
        let mut event: Option<String> = None;
        let mut id: Option<String> = None;
        let mut retry: Option<u64> = None;

        for raw_line in block.split('\n') {
            let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.find(':') {
                Some(idx) => {
                    let value = &line[idx + 1..];
                    (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
                }
                None => (line, ""),
            };
            match field {
                "data" => data_lines.push(value),
                "event" => event = Some(value.to_string()),
                "id" => {
                    id = Some(value.to_string());
                    self.last_event_id = Some(value.to_string());
                }
                "retry" => retry = value.trim().parse().ok(),
                other => debug!(field = other, "ignoring unknown SSE field"),
            }
        }

        if data_lines.is_empty() && id.is_none() && event.is_none() {
            return None;
        }

        Some(ParsedSseEvent {
            data: data_lines.join("\n"),
            event,
            id: id.or_else(|| self.last_event_id.clone()),
            retry,
        })
    }
}

/// Locate the first blank-line boundary at or after `from`.
///
/// Returns `(end_of_block, start_of_next_block)` as byte offsets.
fn find_boundary(buf: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = buf.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            let mut j = i + 1;
            if j < bytes.len() && bytes[j] == b'\r' {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'\n' {
                let end = if i > 0 && bytes[i - 1] == b'\r' { i - 1 } else { i };
                return Some((end, j + 1));
            }
        }
        i += 1;
    }
    None
}

impl FrameDecoder for SseParser {
    type Frame = ParsedSseEvent;

    fn feed(&mut self, chunk: &str) -> Vec<ParsedSseEvent> {
        SseParser::feed(self, chunk)
    }

    fn flush_remainder(&mut self) -> Vec<ParsedSseEvent> {
        SseParser::flush_remainder(self)
    }
}

/// NDJSON / JSONL decoder (one JSON object per line).
///
/// Malformed lines are skipped: the local backends that speak this format are not strict
/// about it, and one bad record must not end the stream.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: String,
    /// Inside an oversized line whose head was already dropped.
    discarding: bool,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<Value> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();
        while let Some(idx) = self.buffer.find('\n') {
            let line: String = self.buffer[..idx].to_string();
            self.buffer.drain(..=idx);
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if let Some(v) = parse_line(&line) {
                out.push(v);
            }
        }
        if self.buffer.len() > NDJSON_MAX_LINE_BYTES {
            warn!(
                buffered_bytes = self.buffer.len(),
                "NDJSON line exceeded cap without a newline; dropping it"
            );
            self.buffer.clear();
            self.discarding = true;
        }
        out
    }

    pub fn flush_remainder(&mut self) -> Vec<Value> {
        let rest = std::mem::take(&mut self.buffer);
        if std::mem::take(&mut self.discarding) {
            return Vec::new();
        }
        parse_line(&rest).into_iter().collect()
    }

    /// Bytes currently buffered.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_line(line: &str) -> Option<Value> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(error = %e, "skipping malformed NDJSON line");
            None
        }
    }
}

impl FrameDecoder for NdjsonDecoder {
    type Frame = Value;

    fn feed(&mut self, chunk: &str) -> Vec<Value> {
        NdjsonDecoder::feed(self, chunk)
    }

    fn flush_remainder(&mut self) -> Vec<Value> {
        NdjsonDecoder::flush_remainder(self)
    }
}
