//! Server-Sent Events parsing shared by every streaming adapter.
//!
//! Generalized from the teacher's `llm::sse::SSEParser`: same buffer-and-
//! split-on-blank-line approach, but malformed event blocks are counted
//! instead of merely logged, and a newline-delimited-JSON variant is added
//! for Ollama-style backends that never speak SSE at all.

use tracing::warn;

/// One parsed `event:`/`data:` block. Fields other than `data` are rarely
/// used by the adapters here but are kept since providers occasionally set
/// `id` for resumption.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

/// Incremental SSE parser: feed it raw bytes as they arrive over the wire,
/// get back whatever complete events were newly completed.
pub struct SseParser {
    buffer: String,
    malformed_count: u32,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            malformed_count: 0,
        }
    }

    pub fn malformed_count(&self) -> u32 {
        self.malformed_count
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let text = String::from_utf8_lossy(chunk);
        self.buffer.push_str(&text);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);
            if block.trim().is_empty() {
                continue;
            }
            if let Some(event) = Self::parse_block(&block) {
                events.push(event);
            } else {
                self.malformed_count += 1;
                warn!("skipping malformed SSE block");
            }
        }
        events
    }

    /// The last, possibly-incomplete line in the wire stream — a truncated
    /// final block is never silently dropped; the caller decides whether to
    /// treat it as an error or ignore it once the connection closes.
    pub fn take_incomplete_tail(&mut self) -> Option<String> {
        if self.buffer.trim().is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    fn parse_block(block: &str) -> Option<SseEvent> {
        let mut event_type = None;
        let mut data_lines = Vec::new();
        let mut saw_field = false;

        for line in block.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            saw_field = true;
            match line.split_once(':') {
                Some(("event", v)) => event_type = Some(v.trim_start().to_string()),
                Some(("data", v)) => data_lines.push(v.trim_start().to_string()),
                Some((_, _)) => {}
                None => data_lines.push(line.to_string()),
            }
        }

        if !saw_field {
            return None;
        }
        Some(SseEvent {
            event_type,
            data: data_lines.join("\n"),
        })
    }
}

/// Ollama and a few other local-first backends emit one JSON object per
/// line instead of SSE framing. Same incremental-buffer shape, split on
/// `\n` instead of `\n\n`.
pub struct NdjsonParser {
    buffer: String,
    malformed_count: u32,
}

impl Default for NdjsonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl NdjsonParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            malformed_count: 0,
        }
    }

    pub fn malformed_count(&self) -> u32 {
        self.malformed_count
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<serde_json::Value> {
        let text = String::from_utf8_lossy(chunk);
        self.buffer.push_str(&text);

        let mut values = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim().to_string();
            self.buffer.drain(..pos + 1);
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(v) => values.push(v),
                Err(_) => {
                    self.malformed_count += 1;
                    warn!("skipping malformed NDJSON line");
                }
            }
        }
        values
    }
}

/// `[DONE]` is OpenAI's and Groq's sentinel terminator on the SSE `data`
/// field, sent as a literal string rather than a JSON object.
pub const SSE_DONE_SENTINEL: &str = "[DONE]";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_data_event() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: {\"x\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"x\":1}");
    }

    #[test]
    fn carries_incomplete_final_block_in_buffer() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: partial");
        assert!(events.is_empty());
        assert_eq!(parser.take_incomplete_tail(), Some("data: partial".to_string()));
    }

    #[test]
    fn recognizes_done_sentinel() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: [DONE]\n\n");
        assert_eq!(events[0].data, SSE_DONE_SENTINEL);
    }

    #[test]
    fn ndjson_splits_on_newlines_and_counts_malformed_lines() {
        let mut parser = NdjsonParser::new();
        let values = parser.push(b"{\"a\":1}\nnot json\n{\"b\":2}\n");
        assert_eq!(values.len(), 2);
        assert_eq!(parser.malformed_count(), 1);
    }
}
