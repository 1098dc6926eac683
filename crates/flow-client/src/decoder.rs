//! Incremental reconstruction of `{event, data}` records from a run response.
//!
//! The flow service frames its streamed records in one of two ways: JSON
//! objects separated by newlines, or JSON objects concatenated back to back.
//! `EventReconstructor` accepts raw body chunks as they arrive and hands out
//! every record that is complete, keeping any trailing fragment buffered for
//! the next chunk. Frames that fail to parse are dropped; decoding never fails.

use serde_json::Value;
use tracing::trace;

use crate::event::StreamEvent;

/// How records are delimited in a response body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Framing {
    /// Decide from the start of the body: a single-line first object followed
    /// by a newline selects `NewlineDelimited`, as does a broken first line
    /// followed by a complete record line. A first object that ends mid-line
    /// or spans lines selects `BraceMatched`.
    #[default]
    Auto,
    /// Concatenated objects matched by brace depth. Yields every object that
    /// parses; missing `event`/`data` default to empty values.
    BraceMatched,
    /// One object per line (an SSE `data:` prefix is tolerated). Yields only
    /// records with a string `event` and an object `data`.
    NewlineDelimited,
}

/// Strategy that extracts complete records from the shared buffer.
trait Framer: Send {
    /// Moves every complete record out of `buf` into `out`. What remains in
    /// `buf` afterwards is empty or an incomplete trailing fragment.
    fn drain(&mut self, buf: &mut Vec<u8>, out: &mut Vec<StreamEvent>);

    /// Called once the body has ended.
    fn finish(&mut self, buf: &mut Vec<u8>, out: &mut Vec<StreamEvent>) {
        self.drain(buf, out);
        if !buf.is_empty() {
            trace!(event = "decoder.fragment_dropped", bytes = buf.len() as u64);
            buf.clear();
        }
    }
}

fn framer_for(framing: Framing) -> Option<Box<dyn Framer>> {
    match framing {
        Framing::Auto => None,
        Framing::BraceMatched => Some(Box::new(BraceFramer::default())),
        Framing::NewlineDelimited => Some(Box::new(LineFramer::default())),
    }
}

/// Turns an incrementally arriving body into complete `StreamEvent`s.
///
/// One reconstructor serves exactly one response; it owns the parse buffer.
pub struct EventReconstructor {
    framing: Framing,
    framer: Option<Box<dyn Framer>>,
    buf: Vec<u8>,
}

impl EventReconstructor {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            framer: framer_for(framing),
            buf: Vec::new(),
        }
    }

    /// Framing in effect; `Auto` until a decision has been made.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Number of bytes held back waiting for more input.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Appends a body chunk and returns the records it completed, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        if self.framer.is_none()
            && let Some(decided) = detect_framing(&self.buf, false)
        {
            self.decide(decided);
        }
        if let Some(framer) = self.framer.as_mut() {
            framer.drain(&mut self.buf, &mut out);
        }
        out
    }

    /// Flushes the end of the body. A truncated trailing fragment is dropped.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if self.framer.is_none() {
            self.decide(detect_framing(&self.buf, true).unwrap_or(Framing::BraceMatched));
        }
        if let Some(framer) = self.framer.as_mut() {
            framer.finish(&mut self.buf, &mut out);
        }
        out
    }

    fn decide(&mut self, framing: Framing) {
        trace!(event = "decoder.framing_detected", framing = ?framing);
        self.framing = framing;
        self.framer = framer_for(framing);
    }
}

/// Picks a framing from the start of the body. Returns `None` while the
/// buffered bytes cannot tell yet; `at_eof` means no more bytes will come.
fn detect_framing(buf: &[u8], at_eof: bool) -> Option<Framing> {
    let start = buf.iter().position(|b| *b == b'{')?;
    let object_end = BraceScan::default().find_end(&buf[start..]).map(|len| start + len);
    let line_end = buf[start..]
        .iter()
        .position(|b| *b == b'\n')
        .map(|i| start + i);

    if let Some(end) = object_end
        && line_end.is_none_or(|nl| end <= nl)
    {
        return match buf[end..]
            .iter()
            .copied()
            .find(|b| !matches!(*b, b' ' | b'\t' | b'\r'))
        {
            Some(b'\n') => Some(Framing::NewlineDelimited),
            None if !at_eof => None,
            _ => Some(Framing::BraceMatched),
        };
    }

    // The first object runs past its line: either a pretty-printed object or a
    // broken first line in a line-per-record body.
    let nl = line_end?;
    if has_record_line(&buf[nl + 1..], at_eof) {
        Some(Framing::NewlineDelimited)
    } else if object_end.is_some() {
        Some(Framing::BraceMatched)
    } else {
        None
    }
}

/// Whether any complete line of `rest` is a record on its own.
fn has_record_line(rest: &[u8], at_eof: bool) -> bool {
    let mut lines: Vec<&[u8]> = rest.split(|b| *b == b'\n').collect();
    if !at_eof {
        lines.pop();
    }
    lines.into_iter().any(|line| {
        let line = line_payload(line);
        line.starts_with(b"{")
            && serde_json::from_slice::<Value>(line)
                .ok()
                .and_then(StreamEvent::from_tagged)
                .is_some()
    })
}

/// A line with surrounding whitespace and any SSE `data:` prefix removed.
fn line_payload(line: &[u8]) -> &[u8] {
    let line = line.trim_ascii();
    match line.strip_prefix(b"data:") {
        Some(rest) => rest.trim_ascii(),
        None => line,
    }
}

/// Resumable brace-depth scanner over a buffer that starts with `{`.
#[derive(Default)]
struct BraceScan {
    pos: usize,
    depth: u32,
    in_string: bool,
    escaped: bool,
}

impl BraceScan {
    /// Continues scanning from where the previous call stopped. Returns the
    /// exclusive end of the object once its closing brace is seen.
    fn find_end(&mut self, buf: &[u8]) -> Option<usize> {
        while self.pos < buf.len() {
            let c = buf[self.pos];
            self.pos += 1;
            if self.escaped {
                self.escaped = false;
                continue;
            }
            if self.in_string {
                match c {
                    b'\\' => self.escaped = true,
                    b'"' => self.in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(self.pos);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

#[derive(Default)]
struct BraceFramer {
    scan: BraceScan,
}

impl Framer for BraceFramer {
    fn drain(&mut self, buf: &mut Vec<u8>, out: &mut Vec<StreamEvent>) {
        loop {
            if self.scan.pos == 0 {
                match buf.iter().position(|b| *b == b'{') {
                    Some(start) => {
                        buf.drain(..start);
                    }
                    None => {
                        buf.clear();
                        return;
                    }
                }
            }
            let Some(end) = self.scan.find_end(buf) else {
                return;
            };
            self.scan = BraceScan::default();
            let span: Vec<u8> = buf.drain(..end).collect();
            match serde_json::from_slice::<Value>(&span) {
                Ok(record) => out.push(StreamEvent::from_lenient(record)),
                Err(e) => {
                    trace!(event = "decoder.frame_dropped", framing = "brace", bytes = span.len() as u64, error = %e);
                }
            }
        }
    }
}

/// Remembers how far the buffer was already searched for a newline.
#[derive(Default)]
struct LineFramer {
    scanned: usize,
}

impl LineFramer {
    fn decode_line(line: &[u8], out: &mut Vec<StreamEvent>) {
        let line = line_payload(line);
        if line.is_empty() {
            return;
        }
        match serde_json::from_slice::<Value>(line) {
            Ok(record) => match StreamEvent::from_tagged(record) {
                Some(event) => out.push(event),
                None => {
                    trace!(event = "decoder.frame_dropped", framing = "lines", reason = "missing event or data");
                }
            },
            Err(e) => {
                trace!(event = "decoder.frame_dropped", framing = "lines", bytes = line.len() as u64, error = %e);
            }
        }
    }
}

impl Framer for LineFramer {
    fn drain(&mut self, buf: &mut Vec<u8>, out: &mut Vec<StreamEvent>) {
        while let Some(offset) = buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let newline = self.scanned + offset;
            let line: Vec<u8> = buf.drain(..=newline).collect();
            self.scanned = 0;
            Self::decode_line(&line[..newline], out);
        }
        self.scanned = buf.len();
    }

    fn finish(&mut self, buf: &mut Vec<u8>, out: &mut Vec<StreamEvent>) {
        self.drain(buf, out);
        // The body ended, so the last line is complete; a truncated object
        // simply fails to parse.
        Self::decode_line(buf, out);
        buf.clear();
        self.scanned = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> StreamEvent {
        StreamEvent::from_lenient(value)
    }

    fn decode_whole(framing: Framing, body: &[u8]) -> Vec<StreamEvent> {
        let mut decoder = EventReconstructor::new(framing);
        let mut events = decoder.push_chunk(body);
        events.extend(decoder.finish());
        events
    }

    fn decode_in_pieces(framing: Framing, body: &[u8], cuts: &[usize]) -> Vec<StreamEvent> {
        let mut decoder = EventReconstructor::new(framing);
        let mut events = Vec::new();
        let mut prev = 0;
        for &cut in cuts {
            events.extend(decoder.push_chunk(&body[prev..cut]));
            prev = cut;
        }
        events.extend(decoder.push_chunk(&body[prev..]));
        events.extend(decoder.finish());
        events
    }

    /// Every single split point and every byte-at-a-time feed must agree with
    /// decoding the whole body at once.
    fn assert_chunking_invariant(framing: Framing, body: &[u8]) {
        let expected = decode_whole(framing, body);
        for cut in 0..=body.len() {
            assert_eq!(
                decode_in_pieces(framing, body, &[cut]),
                expected,
                "split at byte {cut}"
            );
        }
        let every_byte: Vec<usize> = (1..body.len()).collect();
        assert_eq!(decode_in_pieces(framing, body, &every_byte), expected);
    }

    const TWO_LINES: &[u8] = b"{\"event\":\"token\",\"data\":{\"chunk\":\"Hi\"}}\n{\"event\":\"end\",\"data\":{\"result\":{\"outputs\":[]}}}\n";

    #[test]
    fn newline_delimited_two_line_payload() {
        let events = decode_whole(Framing::NewlineDelimited, TWO_LINES);
        assert_eq!(
            events,
            vec![
                event(json!({"event":"token","data":{"chunk":"Hi"}})),
                event(json!({"event":"end","data":{"result":{"outputs":[]}}})),
            ]
        );
    }

    #[test]
    fn newline_delimited_is_chunking_invariant() {
        let body = "{\"event\":\"token\",\"data\":{\"chunk\":\"h\u{e9}llo \u{1f600}\"}}\r\n\n{\"event\":\"add_message\",\"data\":{\"text\":\"a\\\"b}\"}}\n{\"event\":\"end\",\"data\":{}}\n";
        assert_eq!(decode_whole(Framing::NewlineDelimited, body.as_bytes()).len(), 3);
        assert_chunking_invariant(Framing::NewlineDelimited, body.as_bytes());
    }

    #[test]
    fn brace_matched_is_chunking_invariant_with_escaped_braces_in_strings() {
        let body = br#"  {"event":"token","data":{"chunk":"{\"}"}}{"event":"token","data":{"chunk":"\\"}}{"event":"end","data":{"result":{"text":"}}{{"}}}"#;
        let events = decode_whole(Framing::BraceMatched, body);
        assert_eq!(
            events,
            vec![
                event(json!({"event":"token","data":{"chunk":"{\"}"}})),
                event(json!({"event":"token","data":{"chunk":"\\"}})),
                event(json!({"event":"end","data":{"result":{"text":"}}{{"}}})),
            ]
        );
        assert_chunking_invariant(Framing::BraceMatched, body);
    }

    #[test]
    fn brace_matched_skips_noise_between_objects() {
        let body = b"keepalive\n{\"event\":\"token\",\"data\":{\"chunk\":\"a\"}} ping {\"event\":\"end\",\"data\":{}}";
        let events = decode_whole(Framing::BraceMatched, body);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].token_chunk(), Some("a"));
        assert!(events[1].is("end"));
    }

    #[test]
    fn brace_matched_yields_untagged_objects() {
        let events = decode_whole(Framing::BraceMatched, br#"{"status":"queued"}"#);
        assert_eq!(events, vec![event(json!({}))]);
        assert_eq!(events[0].event, "");
    }

    #[test]
    fn malformed_frame_between_valid_frames_is_dropped() {
        let lines = b"{\"event\":\"token\",\"data\":{\"chunk\":\"a\"}}\n{\"event\": oops}\nnot json at all\n{\"event\":\"token\",\"data\":{\"chunk\":\"b\"}}\n";
        let events = decode_whole(Framing::NewlineDelimited, lines);
        let chunks: Vec<_> = events.iter().filter_map(|e| e.token_chunk()).collect();
        assert_eq!(chunks, vec!["a", "b"]);

        let braced = b"{\"event\":\"token\",\"data\":{\"chunk\":\"a\"}}{\"event\": oops}{\"event\":\"token\",\"data\":{\"chunk\":\"b\"}}";
        let events = decode_whole(Framing::BraceMatched, braced);
        let chunks: Vec<_> = events.iter().filter_map(|e| e.token_chunk()).collect();
        assert_eq!(chunks, vec!["a", "b"]);
    }

    #[test]
    fn newline_delimited_requires_event_and_data() {
        let body = b"{\"event\":\"token\"}\n{\"data\":{}}\n{\"event\":\"end\",\"data\":{}}\n";
        let events = decode_whole(Framing::NewlineDelimited, body);
        assert_eq!(events, vec![event(json!({"event":"end","data":{}}))]);
    }

    #[test]
    fn newline_delimited_accepts_sse_data_prefix() {
        let body = b"event: message\ndata: {\"event\":\"token\",\"data\":{\"chunk\":\"x\"}}\n\ndata: [DONE]\n";
        let events = decode_whole(Framing::NewlineDelimited, body);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token_chunk(), Some("x"));
    }

    #[test]
    fn incomplete_line_waits_for_more_input() {
        let mut decoder = EventReconstructor::new(Framing::NewlineDelimited);
        assert!(decoder.push_chunk(b"{\"event\":\"token\",\"data\":{\"chu").is_empty());
        assert!(decoder.buffered_len() > 0);
        let events = decoder.push_chunk(b"nk\":\"z\"}}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn truncated_trailing_fragment_is_dropped_without_error() {
        let body = b"{\"event\":\"token\",\"data\":{\"chunk\":\"a\"}}\n{\"event\":\"tok";
        assert_eq!(decode_whole(Framing::NewlineDelimited, body).len(), 1);
        let body = b"{\"event\":\"token\",\"data\":{\"chunk\":\"a\"}}{\"event\":\"tok";
        assert_eq!(decode_whole(Framing::BraceMatched, body).len(), 1);
        assert_eq!(decode_whole(Framing::Auto, body).len(), 1);
    }

    #[test]
    fn last_line_without_newline_is_flushed_at_end() {
        let body = b"{\"event\":\"end\",\"data\":{}}";
        assert_eq!(decode_whole(Framing::NewlineDelimited, body).len(), 1);
    }

    #[test]
    fn auto_selects_newline_framing_for_line_per_object_bodies() {
        let mut decoder = EventReconstructor::new(Framing::Auto);
        let events = decoder.push_chunk(TWO_LINES);
        assert_eq!(decoder.framing(), Framing::NewlineDelimited);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn auto_selects_brace_framing_for_concatenated_and_pretty_printed_bodies() {
        let mut decoder = EventReconstructor::new(Framing::Auto);
        let events = decoder.push_chunk(b"{\"event\":\"token\",\"data\":{}}{\"event\":\"end\",\"data\":{}}");
        assert_eq!(decoder.framing(), Framing::BraceMatched);
        assert_eq!(events.len(), 2);

        let pretty = b"{\n  \"event\": \"token\",\n  \"data\": {\"chunk\": \"p\"}\n}\n";
        let mut decoder = EventReconstructor::new(Framing::Auto);
        let events = decoder.push_chunk(pretty);
        assert_eq!(decoder.framing(), Framing::BraceMatched);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token_chunk(), Some("p"));
    }

    #[test]
    fn auto_waits_until_the_byte_after_the_first_object_is_known() {
        let mut decoder = EventReconstructor::new(Framing::Auto);
        assert!(decoder.push_chunk(b"{\"event\":\"end\",\"data\":{}}  ").is_empty());
        assert_eq!(decoder.framing(), Framing::Auto);
        assert_eq!(decoder.finish().len(), 1);
    }

    const BROKEN_FIRST_LINE: &[u8] = b"{\"event\":\n{\"event\":\"token\",\"data\":{\"chunk\":\"a\"}}\n{\"event\":\"end\",\"data\":{}}\n";

    #[test]
    fn auto_recovers_from_a_broken_first_line() {
        let mut decoder = EventReconstructor::new(Framing::Auto);
        let live = decoder.push_chunk(BROKEN_FIRST_LINE);
        assert_eq!(decoder.framing(), Framing::NewlineDelimited);
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].token_chunk(), Some("a"));
        assert!(live[1].is("end"));
        assert!(decoder.finish().is_empty());
        assert_eq!(
            decode_whole(Framing::Auto, BROKEN_FIRST_LINE),
            decode_whole(Framing::NewlineDelimited, BROKEN_FIRST_LINE)
        );
    }

    #[test]
    fn auto_yields_records_after_a_broken_first_line_before_the_body_ends() {
        let mut decoder = EventReconstructor::new(Framing::Auto);
        assert!(decoder.push_chunk(b"{\"event\":\n").is_empty());
        let events = decoder.push_chunk(b"{\"event\":\"token\",\"data\":{\"chunk\":\"a\"}}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn auto_decides_at_end_of_body_when_the_last_line_is_unterminated() {
        let body = b"{\"event\":\n{\"event\":\"end\",\"data\":{}}";
        let events = decode_whole(Framing::Auto, body);
        assert_eq!(events, vec![event(json!({"event":"end","data":{}}))]);
    }

    #[test]
    fn auto_is_chunking_invariant() {
        assert_chunking_invariant(Framing::Auto, TWO_LINES);
        assert_chunking_invariant(
            Framing::Auto,
            br#"{"event":"token","data":{"chunk":"\"{"}}{"event":"end","data":{}}"#,
        );
        assert_chunking_invariant(Framing::Auto, BROKEN_FIRST_LINE);
    }
}
