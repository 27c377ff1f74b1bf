//! Server-sent-events framing.
//!
//! A pure state machine over byte chunks: feed it whatever the transport
//! hands you, get back complete events. Adapters layer their own event
//! dispatch on top; this module knows nothing about any provider.

/// One complete SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, when present.
    pub event: Option<String>,
    /// The joined `data:` lines.
    pub data: String,
}

/// Incremental SSE parser.
///
/// Lines may arrive split across chunks; the framer buffers partial lines
/// and accumulates `event:`/`data:` fields until the blank-line terminator.
#[derive(Debug, Default)]
pub struct SseFramer {
    line_buf: String,
    event: Option<String>,
    data: String,
}

impl SseFramer {
    /// Create an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns every event completed by it.
    ///
    /// Invalid UTF-8 boundaries are handled by lossy decoding; SSE payloads
    /// are JSON and a provider emitting broken UTF-8 mid-token will surface
    /// as a JSON parse failure at the dispatch layer instead.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.line_buf.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();

        while let Some(pos) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.push_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush any trailing event after the transport closes.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.line_buf.is_empty() {
            let line = std::mem::take(&mut self.line_buf);
            self.push_line(line.trim_end_matches(['\n', '\r']));
        }
        self.take_event()
    }

    fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_event();
        }
        if let Some(rest) = line.strip_prefix("event:") {
            self.event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(rest.trim_start());
        }
        // Comment lines (":keepalive") and unknown fields are ignored.
        None
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event_single_chunk() {
        let mut framer = SseFramer::new();
        let events = framer.push(b"event: message_start\ndata: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn event_split_across_chunks() {
        let mut framer = SseFramer::new();
        assert!(framer.push(b"data: {\"te").is_empty());
        assert!(framer.push(b"xt\":\"hi\"}").is_empty());
        let events = framer.push(b"\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"text\":\"hi\"}");
    }

    #[test]
    fn multiple_events_one_chunk() {
        let mut framer = SseFramer::new();
        let events = framer.push(b"data: one\n\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two");
    }

    #[test]
    fn multiline_data_joins_with_newline() {
        let mut framer = SseFramer::new();
        let events = framer.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn comments_and_crlf_are_tolerated() {
        let mut framer = SseFramer::new();
        let events = framer.push(b": keepalive\r\ndata: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut framer = SseFramer::new();
        assert!(framer.push(b"data: tail").is_empty());
        let event = framer.finish().unwrap();
        assert_eq!(event.data, "tail");
        assert!(framer.finish().is_none());
    }
}
