//! # Backend Frame Decoder
//!
//! Turns the raw byte stream read from the backend into discrete
//! [`Envelope`]s. The backend mixes two framing disciplines on one socket:
//!
//! 1. **Synchronous marker replies** (e.g. the login acknowledgement) that may
//!    arrive without a trailing newline. These are detected by a fixed
//!    pattern anywhere in the buffered bytes and win over line splitting.
//! 2. **Newline-terminated lines**, each either a JSON document or free text.
//!
//! A buffered structured JSON document (object or array) is also emitted as
//! soon as it is complete, newline or not.
//!
//! A marker reply whose line has not been terminated yet is held back and
//! keeps absorbing bytes until a newline arrives or the owner calls
//! [`FrameDecoder::flush`] after the backend has gone quiet.
//!
//! Decoding never fails: anything that is not JSON is forwarded as text.

use bridge_protocol::Envelope;
use serde_json::Value;

/// Pattern announcing a successful login, possibly followed by `TOKEN:<value>`.
pub const LOGIN_MARKER: &str = "Login successful";

/// Prefix of the session token embedded in the login acknowledgement.
pub const TOKEN_PREFIX: &str = "TOKEN:";

// ─── Synchronous Markers ────────────────────────────────────────

/// A backend reply recognized by a fixed pattern rather than by a newline.
pub trait SyncMarker: Send + Sync {
    /// Bytes whose presence anywhere in the buffer identifies the reply.
    fn pattern(&self) -> &[u8];

    /// Builds the envelope for the segment containing the pattern.
    ///
    /// The segment spans from the start of the line holding the pattern to
    /// the next newline, or to wherever the reply stood when it was flushed.
    fn reply(&self, segment: &str) -> Envelope;
}

/// The login acknowledgement: `Login successful! ... TOKEN:<value>`.
pub struct LoginAck;

impl SyncMarker for LoginAck {
    fn pattern(&self) -> &[u8] {
        LOGIN_MARKER.as_bytes()
    }

    fn reply(&self, segment: &str) -> Envelope {
        Envelope::Server {
            message: Value::String(segment.to_string()),
            response: segment.trim().to_string(),
            status: Some("success".to_string()),
            token: extract_token(segment),
        }
    }
}

/// Returns the non-whitespace run following `TOKEN:`, if any.
pub fn extract_token(text: &str) -> Option<String> {
    let start = text.find(TOKEN_PREFIX)? + TOKEN_PREFIX.len();
    let token: String = text[start..]
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    (!token.is_empty()).then_some(token)
}

// ─── Decoder ────────────────────────────────────────────────────

/// Per-session decode buffer plus the marker rules applied to it.
///
/// After every [`feed`](FrameDecoder::feed) the buffer holds only the
/// trailing fragment of a message that has not finished arriving.
pub struct FrameDecoder {
    buffer: Vec<u8>,
    markers: Vec<Box<dyn SyncMarker>>,
    held: Option<HeldReply>,
}

/// A marker reply still waiting for the end of its line.
struct HeldReply {
    marker: usize,
    segment: Vec<u8>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// A decoder recognizing the login acknowledgement.
    pub fn new() -> Self {
        Self::with_markers(vec![Box::new(LoginAck)])
    }

    pub fn with_markers(markers: Vec<Box<dyn SyncMarker>>) -> Self {
        Self {
            buffer: Vec::new(),
            markers,
            held: None,
        }
    }

    /// Bytes received but not yet attributed to a complete message.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Whether a marker reply is waiting for its line to end.
    pub fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    /// Emits the held marker reply as it stands, if any.
    pub fn flush(&mut self) -> Option<Envelope> {
        let held = self.held.take()?;
        Some(self.reply(held.marker, &held.segment))
    }

    /// Appends `chunk` and returns every message it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Envelope> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            if self.held.is_some() {
                if self.extend_held(&mut out) {
                    continue;
                }
                break;
            }
            if self.take_marker(&mut out) {
                continue;
            }
            if let Some(envelope) = self.take_document() {
                out.push(envelope);
                break;
            }
            match self.buffer.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                    out.extend(decode_line(&line));
                }
                None => break,
            }
        }
        out
    }

    /// Consumes the earliest marker reply in the buffer, if any.
    ///
    /// Complete lines that precede the marker's line are emitted first so
    /// arrival order is preserved.
    fn take_marker(&mut self, out: &mut Vec<Envelope>) -> bool {
        let found = self
            .markers
            .iter()
            .enumerate()
            .filter_map(|(idx, marker)| find(&self.buffer, marker.pattern()).map(|at| (idx, at)))
            .min_by_key(|&(_, at)| at);
        let Some((idx, at)) = found else {
            return false;
        };

        let line_start = self.buffer[..at]
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |p| p + 1);
        let head: Vec<u8> = self.buffer.drain(..line_start).collect();
        out.extend(head.split(|&b| b == b'\n').filter_map(decode_line));

        let at = at - line_start;
        let end = self.buffer[at..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(self.buffer.len(), |p| at + p + 1);
        let segment: Vec<u8> = self.buffer.drain(..end).collect();
        if segment.ends_with(b"\n") {
            out.push(self.reply(idx, &segment));
        } else {
            self.held = Some(HeldReply {
                marker: idx,
                segment,
            });
        }
        true
    }

    /// Moves buffered bytes into the held reply up to the first newline.
    /// Returns `true` once the reply is complete and has been emitted.
    fn extend_held(&mut self, out: &mut Vec<Envelope>) -> bool {
        let Some(held) = self.held.as_mut() else {
            return false;
        };
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                held.segment.extend(self.buffer.drain(..=pos));
                if let Some(envelope) = self.flush() {
                    out.push(envelope);
                }
                true
            }
            None => {
                held.segment.append(&mut self.buffer);
                false
            }
        }
    }

    fn reply(&self, marker: usize, segment: &[u8]) -> Envelope {
        let text = String::from_utf8_lossy(segment);
        self.markers[marker].reply(text.trim_end_matches(['\r', '\n']))
    }

    /// Emits the whole buffer if it is one complete JSON object or array.
    fn take_document(&mut self) -> Option<Envelope> {
        let text = std::str::from_utf8(&self.buffer).ok()?;
        let body = text.trim();
        if !(body.starts_with('{') || body.starts_with('[')) {
            return None;
        }
        let value: Value = serde_json::from_str(body).ok()?;
        let envelope = Envelope::json(value, body);
        self.buffer.clear();
        Some(envelope)
    }
}

/// One complete line: JSON when it parses, trimmed text otherwise.
/// Blank lines produce nothing.
fn decode_line(raw: &[u8]) -> Option<Envelope> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    if line.is_empty() {
        return None;
    }
    Some(match serde_json::from_str::<Value>(line) {
        Ok(value) => Envelope::json(value, line),
        Err(_) => Envelope::text(line),
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
