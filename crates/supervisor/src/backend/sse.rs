//! Server-sent-event frame parsing for streaming completion endpoints
//!
//! The parser is fed raw body bytes as they arrive and yields the `content`
//! field of each `data:` frame. Frames that are not valid JSON or lack a
//! `content` string are dropped: partial frames and keep-alive noise at stream
//! boundaries are expected, not failures.

use serde::Deserialize;
use tracing::trace;

/// Marker prefixing every payload line
pub const DATA_MARKER: &str = "data:";

/// Sentinel some servers send after the last frame
pub const DONE_SENTINEL: &str = "[DONE]";

/// Something extracted from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// Text to forward
    Content(String),

    /// Server signalled the end of generation
    Done,
}

#[derive(Debug, Deserialize)]
struct CompletionFrame {
    content: Option<String>,
    #[serde(default)]
    stop: bool,
}

/// Incremental line-oriented frame parser
#[derive(Debug, Default)]
pub struct SseFrameParser {
    buffer: Vec<u8>,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a body chunk and collect every complete frame it finishes
    pub fn push(&mut self, bytes: &[u8]) -> Vec<FrameEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Parse whatever is left once the body has ended
    pub fn finish(&mut self) -> Option<FrameEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }
}

fn parse_line(raw: &[u8]) -> Option<FrameEvent> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(_) => {
            trace!("Skipping non-UTF-8 event line");
            return None;
        }
    };

    let payload = line.strip_prefix(DATA_MARKER)?.trim_start();
    if payload == DONE_SENTINEL {
        return Some(FrameEvent::Done);
    }

    match serde_json::from_str::<CompletionFrame>(payload) {
        Ok(CompletionFrame { stop: true, content }) => match content {
            Some(text) if !text.is_empty() => Some(FrameEvent::Content(text)),
            _ => Some(FrameEvent::Done),
        },
        Ok(CompletionFrame {
            content: Some(text),
            ..
        }) if !text.is_empty() => Some(FrameEvent::Content(text)),
        Ok(_) => None,
        Err(e) => {
            trace!("Skipping malformed event frame: {}", e);
            None
        }
    }
}
