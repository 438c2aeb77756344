//! Event transport: SSE framing for [`StreamEvent`]s and an incremental
//! decoder that survives arbitrary network fragmentation.
//!
//! Each event travels as one server-sent-events record:
//!
//! ```text
//! data: {"type":"markdown","content":"## Salads\n"}\n
//! \n
//! ```
//!
//! The JSON payload is always serialised on a single line (newlines inside
//! strings are escaped), so a record is exactly one `data:` line followed by
//! a blank line. The decoder reads only that shape. Lines may end in `\n`,
//! `\r\n` or a lone `\r`. `:` keep-alive comments and any other field are
//! skipped, and a record still open when the bytes stop is never dispatched.

use crate::event::StreamEvent;
use crate::lines::LineBuffer;

/// Serialise an event to its single-line JSON payload.
pub fn encode_payload(event: &StreamEvent) -> String {
    // StreamEvent holds only strings; serialisation cannot fail.
    serde_json::to_string(event).unwrap_or_else(|_| {
        r#"{"type":"error","error":"event serialisation failed"}"#.to_string()
    })
}

/// Serialise an event to a complete SSE record (`data: …\n\n`).
pub fn encode_frame(event: &StreamEvent) -> String {
    format!("data: {}\n\n", encode_payload(event))
}

/// Parse one SSE `data` payload back into an event.
pub fn decode_event(payload: &str) -> Result<StreamEvent, serde_json::Error> {
    serde_json::from_str(payload)
}

// ── UTF-8 ────────────────────────────────────────────────────────────────

/// Incremental UTF-8 decoder.
///
/// A multi-byte character split across two chunks is held back until the
/// rest of it arrives; genuinely invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` (plus any held tail) and append the text to `out`.
    pub fn decode(&mut self, bytes: &[u8], out: &mut String) {
        self.pending.extend_from_slice(bytes);
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(text) => {
                    out.push_str(text);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.pending[consumed..consumed + valid])
                    {
                        out.push_str(text);
                    }
                    consumed += valid;
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed += bad;
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => break,
                    }
                }
            }
        }
        self.pending.drain(..consumed);
    }

    /// Number of bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

// ── SSE ──────────────────────────────────────────────────────────────────

/// Incremental SSE decoder: bytes in, complete `data` payloads out.
#[derive(Debug, Default)]
pub struct SseDecoder {
    utf8: Utf8Decoder,
    lines: LineBuffer,
    data: Option<String>,
    scratch: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the payloads of every record it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.scratch.clear();
        self.utf8.decode(bytes, &mut self.scratch);
        self.lines.push_str(&self.scratch);
        self.drain_lines()
    }

    /// Discard all buffered state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = self.lines.next_line() {
            if line.is_empty() {
                if let Some(data) = self.data.take() {
                    out.push(data);
                }
            } else {
                self.field_line(&line);
            }
        }
        out
    }

    fn field_line(&mut self, line: &str) {
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data = Some(value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DishRecord;

    #[test]
    fn frame_round_trips_through_decoder() {
        let ev = StreamEvent::markdown("line one\nline two");
        let frame = encode_frame(&ev);
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
        assert_eq!(frame.matches('\n').count(), 2, "payload must stay on one line");

        let mut dec = SseDecoder::new();
        let payloads = dec.push(frame.as_bytes());
        assert_eq!(payloads.len(), 1);
        assert_eq!(decode_event(&payloads[0]).unwrap(), ev);
    }

    #[test]
    fn utf8_split_inside_character_is_held() {
        let bytes = "菜".as_bytes();
        assert_eq!(bytes.len(), 3);
        let mut dec = Utf8Decoder::new();
        let mut out = String::new();
        dec.decode(&bytes[..1], &mut out);
        assert_eq!(out, "");
        assert_eq!(dec.pending_len(), 1);
        dec.decode(&bytes[1..2], &mut out);
        assert_eq!(out, "");
        dec.decode(&bytes[2..], &mut out);
        assert_eq!(out, "菜");
        assert_eq!(dec.pending_len(), 0);
    }

    #[test]
    fn invalid_bytes_become_replacement_char() {
        let mut dec = Utf8Decoder::new();
        let mut out = String::new();
        dec.decode(b"a\xffb", &mut out);
        assert_eq!(out, "a\u{FFFD}b");

        let mut out = String::new();
        dec.decode(&"é".as_bytes()[..1], &mut out);
        assert_eq!(out, "");
        assert_eq!(dec.pending_len(), 1);
    }

    #[test]
    fn comments_and_other_fields_are_ignored() {
        let mut dec = SseDecoder::new();
        let input = ": keep-alive\n\nevent: message\nid: 7\ndata: {\"type\":\"done\"}\n\n";
        let payloads = dec.push(input.as_bytes());
        assert_eq!(payloads, vec![r#"{"type":"done"}"#.to_string()]);
    }

    #[test]
    fn crlf_and_lone_cr_terminators_are_accepted() {
        let mut dec = SseDecoder::new();
        let payloads = dec.push(b"data: a\r\n\r\ndata:b\r\rdata: c\n\n");
        assert_eq!(payloads, vec!["a", "b", "c"]);
    }

    #[test]
    fn cr_split_from_its_lf_is_one_terminator() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: x\r").is_empty());
        assert_eq!(dec.push(b"\n\r"), vec!["x"]);
        assert!(dec.push(b"\ndata: y\r").is_empty());
        assert_eq!(dec.push(b"\r"), vec!["y"]);
    }

    #[test]
    fn unterminated_record_is_held() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: {\"type\":\"done\"}\n").is_empty());
        dec.reset();
        assert!(dec.push(b"\n").is_empty());
    }

    #[test]
    fn byte_at_a_time_feed_matches_whole_feed() {
        let events = vec![
            StreamEvent::markdown("## 沙拉 Salads\n"),
            StreamEvent::MarkdownDone,
            StreamEvent::Dish {
                dish: DishRecord {
                    name_zh: "凯撒沙拉".into(),
                    ..Default::default()
                },
            },
            StreamEvent::Done,
        ];
        let wire: String = events.iter().map(encode_frame).collect();

        let mut whole = SseDecoder::new();
        let expected = whole.push(wire.as_bytes());

        let mut piecewise = SseDecoder::new();
        let mut got = Vec::new();
        for b in wire.as_bytes() {
            got.extend(piecewise.push(std::slice::from_ref(b)));
        }
        assert_eq!(got, expected);
        let decoded: Vec<StreamEvent> = got.iter().map(|p| decode_event(p).unwrap()).collect();
        assert_eq!(decoded, events);
    }
}
