//! Incremental parser for upstream Server-Sent Events bodies.
//!
//! Network reads do not respect event boundaries: one read may carry half
//! an event, several events, or split a multi-byte UTF-8 sequence. The
//! parser keeps raw bytes until a blank line closes an event.

use super::error::ProviderError;

/// Largest incomplete event the parser will hold before giving up.
pub const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// A single SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: Option<String>,
    pub id: Option<String>,
}

impl SseEvent {
    /// True for the OpenAI-style `[DONE]` terminator.
    pub fn is_done(&self) -> bool {
        self.data.as_deref().map(str::trim) == Some("[DONE]")
    }
}

#[derive(Debug)]
pub struct SseParser {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a boundary
    scanned: usize,
    max_pending: usize,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_limit(MAX_PENDING_BYTES)
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_pending,
        }
    }

    /// Feed bytes and return every event completed by them.
    ///
    /// Fails once an unterminated event grows past the parser's limit.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, ProviderError> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        // A separator may straddle the previous read.
        let mut from = self.scanned.saturating_sub(3);
        while let Some((end, sep_len)) = find_event_boundary(&self.buffer, from) {
            let block: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
            from = 0;
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_pending {
            let pending = self.buffer.len();
            self.buffer.clear();
            self.scanned = 0;
            return Err(ProviderError::UnexpectedFailure(format!(
                "provider stream event exceeded {} bytes ({} buffered)",
                self.max_pending, pending
            )));
        }
        Ok(events)
    }

    /// Flush a trailing event the upstream closed without a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        self.scanned = 0;
        let block = std::mem::take(&mut self.buffer);
        parse_block(&String::from_utf8_lossy(&block))
    }

    /// Bytes buffered but not yet part of a complete event.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Position of the first blank line at or after `from`, and the length of
/// the separator.
fn find_event_boundary(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i < buffer.len() {
        if buffer[i..].starts_with(b"\r\n\r\n") {
            return Some((i, 4));
        }
        if buffer[i..].starts_with(b"\n\n") {
            return Some((i, 2));
        }
        i += 1;
    }
    None
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event.event = Some(value.to_string()),
            "data" => match event.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => event.data = Some(value.to_string()),
            },
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    if event.data.is_some() || event.event.is_some() {
        Some(event)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: hello\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.as_deref(), Some("hello"));
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_event_split_across_reads() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"a\":").unwrap().is_empty());
        assert!(parser.feed(b"1}\n").unwrap().is_empty());
        let events = parser.feed(b"\ndata: [DONE]\n\n").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data.as_deref(), Some("{\"a\":1}"));
        assert!(events[1].is_done());
    }

    #[test]
    fn test_multibyte_character_split_across_reads() {
        let mut parser = SseParser::new();
        let bytes = "data: héllo\n\n".as_bytes();
        // split inside the two-byte 'é'
        let split = 8;
        assert!(parser.feed(&bytes[..split]).unwrap().is_empty());
        let events = parser.feed(&bytes[split..]).unwrap();
        assert_eq!(events[0].data.as_deref(), Some("héllo"));
    }

    #[test]
    fn test_crlf_and_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keep-alive\r\n\r\nevent: message\r\ndata: hi\r\n\r\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data.as_deref(), Some("hi"));
    }

    #[test]
    fn test_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: line1\ndata: line2\n\n").unwrap();
        assert_eq!(events[0].data.as_deref(), Some("line1\nline2"));
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: tail").unwrap().is_empty());
        assert_eq!(
            parser.finish().and_then(|e| e.data),
            Some("tail".to_string())
        );
        assert!(parser.finish().is_none());
    }

    #[test]
    fn test_separator_split_across_reads() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: a\r\n").unwrap().is_empty());
        assert!(parser.feed(b"\r").unwrap().is_empty());
        let events = parser.feed(b"\ndata: b\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.as_deref(), Some("a"));
        assert_eq!(parser.feed(b"\n").unwrap()[0].data.as_deref(), Some("b"));
    }

    #[test]
    fn test_unterminated_event_over_limit_fails() {
        let mut parser = SseParser::with_limit(16);
        assert!(parser.feed(b"data: 0123456").unwrap().is_empty());
        let err = parser.feed(b"789abcdef").unwrap_err();
        assert!(matches!(err, ProviderError::UnexpectedFailure(_)));
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_complete_events_do_not_count_against_limit() {
        let mut parser = SseParser::with_limit(16);
        let events = parser
            .feed(b"data: first-event\n\ndata: second-event\n\n")
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(parser.pending(), 0);
    }
}
