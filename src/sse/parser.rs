//! Incremental `text/event-stream` parser.
//!
//! Bytes are buffered until a full line is available; lines may end in LF,
//! CRLF or a lone CR. A blank line dispatches the pending record.

use std::str::Utf8Error;

use bytes::{Buf, BytesMut};

const LF: u8 = b'\n';
const CR: u8 = b'\r';
const BOM: &str = "\u{feff}";
const DEFAULT_EVENT: &str = "message";

/// One dispatched event-stream record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedEvent {
    /// `event` field, `message` when absent.
    pub name: String,
    /// `data` lines joined with `\n`.
    pub data: String,
}

/// Stateful parser fed with raw body chunks.
#[derive(Debug, Default)]
pub struct EventParser {
    buffer: BytesMut,
    started: bool,
    event: String,
    data: String,
    has_data: bool,
}

impl EventParser {
    /// Creates a parser positioned at the start of a stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every record completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<ParsedEvent>, Utf8Error> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((line_end, next_start)) = find_eol(&self.buffer) {
            let line = self.buffer.split_to(line_end);
            self.buffer.advance(next_start - line_end);

            let mut line = std::str::from_utf8(&line)?;
            if !self.started {
                self.started = true;
                line = line.strip_prefix(BOM).unwrap_or(line);
            }
            if let Some(event) = self.apply_line(line) {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn apply_line(&mut self, line: &str) -> Option<ParsedEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = value.to_string(),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            // `id` and `retry` are ignored; every reconnect starts a fresh
            // stream on a freshly selected endpoint.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<ParsedEvent> {
        let event = std::mem::take(&mut self.event);
        if !self.has_data {
            return None;
        }
        self.has_data = false;

        let name = if event.is_empty() {
            DEFAULT_EVENT.to_string()
        } else {
            event
        };
        Some(ParsedEvent {
            name,
            data: std::mem::take(&mut self.data),
        })
    }
}

/// Returns `(line_end, next_line_start)`, or `None` when more bytes are
/// needed. A trailing CR waits for the next chunk in case it starts with LF.
fn find_eol(bytes: &[u8]) -> Option<(usize, usize)> {
    let pos = memchr::memchr2(CR, LF, bytes)?;
    if bytes[pos] == LF {
        return Some((pos, pos + 1));
    }
    match bytes.get(pos + 1) {
        None => None,
        Some(&LF) => Some((pos, pos + 2)),
        Some(_) => Some((pos, pos + 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::{EventParser, ParsedEvent};

    fn event(name: &str, data: &str) -> ParsedEvent {
        ParsedEvent {
            name: name.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn parses_named_event() {
        let mut parser = EventParser::new();
        let events = parser
            .feed(b"event: put\ndata: {\"flag\":true}\n\n")
            .expect("parse");
        assert_eq!(events, vec![event("put", "{\"flag\":true}")]);
    }

    #[test]
    fn defaults_name_to_message() {
        let mut parser = EventParser::new();
        let events = parser.feed(b"data: hello\n\n").expect("parse");
        assert_eq!(events, vec![event("message", "hello")]);
    }

    #[test]
    fn joins_multiline_data() {
        let mut parser = EventParser::new();
        let events = parser
            .feed(b"event: patch\ndata: line one\ndata:line two\ndata\n\n")
            .expect("parse");
        assert_eq!(events, vec![event("patch", "line one\nline two\n")]);
    }

    #[test]
    fn handles_split_chunks_and_crlf() {
        let mut parser = EventParser::new();
        assert!(parser.feed(b"event: del").expect("parse").is_empty());
        assert!(parser.feed(b"ete\r").expect("parse").is_empty());
        assert!(parser.feed(b"\ndata: {}\r\n").expect("parse").is_empty());
        let events = parser.feed(b"\r\n").expect("parse");
        assert_eq!(events, vec![event("delete", "{}")]);
    }

    #[test]
    fn accepts_lone_cr_line_endings() {
        let mut parser = EventParser::new();
        let events = parser.feed(b"event: ping\rdata: x\r\r ").expect("parse");
        assert_eq!(events, vec![event("ping", "x")]);
    }

    #[test]
    fn ignores_comments_and_unknown_fields() {
        let mut parser = EventParser::new();
        let events = parser
            .feed(b": heartbeat\nretry: 5000\nfoo: bar\n\nevent: ping\ndata: \n\n")
            .expect("parse");
        assert_eq!(events, vec![event("ping", "")]);
    }

    #[test]
    fn records_without_data_are_dropped() {
        let mut parser = EventParser::new();
        let events = parser.feed(b"event: put\n\ndata: after\n\n").expect("parse");
        assert_eq!(events, vec![event("message", "after")]);
    }

    #[test]
    fn id_lines_do_not_affect_records() {
        let mut parser = EventParser::new();
        let events = parser
            .feed(b"id: 7\ndata: a\n\nid: 8\n\ndata: b\n\n")
            .expect("parse");
        assert_eq!(events, vec![event("message", "a"), event("message", "b")]);
    }

    #[test]
    fn strips_leading_bom() {
        let mut parser = EventParser::new();
        let events = parser
            .feed("\u{feff}data: x\n\n".as_bytes())
            .expect("parse");
        assert_eq!(events, vec![event("message", "x")]);
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut parser = EventParser::new();
        assert!(parser.feed(b"data: \xff\xfe\n\n").is_err());
    }
}
