//! Incremental `text/event-stream` decoder.
//!
//! Feed raw body chunks as they arrive; complete frames come out. Chunk
//! boundaries may fall anywhere, including inside a UTF-8 sequence or between
//! `\r` and `\n`.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; `None` means the default `message` type.
    pub event: Option<String>,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseFrame {
    Event(SseEvent),
    /// A `:` line. The server uses these for heartbeats.
    Comment(String),
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    has_data: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk and return every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if let Some(comment) = line.strip_prefix(':') {
            return Some(SseFrame::Comment(comment.trim_start().to_string()));
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                self.data.push(value.to_string());
                self.has_data = true;
            }
            "event" => self.event = Some(value.to_string()),
            // id and retry are accepted and ignored; reconnect timing is fixed.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if !std::mem::take(&mut self.has_data) {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame::Event(SseEvent { event, data }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> SseFrame {
        SseFrame::Event(SseEvent { event: None, data: s.to_string() })
    }

    #[test]
    fn test_signal_and_heartbeat() {
        let mut dec = SseDecoder::new();
        let frames = dec.feed(b": heartbeat\n\ndata: {\"entity\":\"todos\"}\n\n");
        assert_eq!(frames, vec![SseFrame::Comment("heartbeat".into()), data(r#"{"entity":"todos"}"#)]);
    }

    #[test]
    fn test_split_across_chunks_and_crlf() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"data: {\"ent").is_empty());
        assert!(dec.feed(b"ity\":\"people\"}\r").is_empty());
        assert!(dec.feed(b"\n").is_empty());
        assert_eq!(dec.feed(b"\r\n"), vec![data(r#"{"entity":"people"}"#)]);
    }

    #[test]
    fn test_multiline_data_and_event_name() {
        let mut dec = SseDecoder::new();
        let frames = dec.feed(b"event: change\ndata: a\ndata: b\nid: 7\n\n");
        assert_eq!(
            frames,
            vec![SseFrame::Event(SseEvent { event: Some("change".into()), data: "a\nb".into() })]
        );
    }

    #[test]
    fn test_blank_lines_without_data_emit_nothing() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"\n\nevent: x\n\n").is_empty());
        assert_eq!(dec.feed(b"data:\n\n"), vec![data("")]);
    }
}
