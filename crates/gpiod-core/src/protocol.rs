//! Pipe command protocol: decoding requests, encoding results, and framing.
//!
//! A request is a JSON object with exactly one of three keys:
//!
//! ```text
//! {"input": 0}                 query input 0
//! {"output": {"1": true}}      drive output 1 high
//! {"relay": {"0": false}}      release relay 0
//! ```
//!
//! A result is written back bare (`true`, `false`) or, when the request
//! could not be served, as `{"error": {"kind": ..., "message": ...}}`.
//! Every result on the wire is followed by a newline.
//!
//! Inbound bytes are a stream of concatenated JSON values; [`FrameDecoder`]
//! splits it, keeping an incomplete trailing value until the rest arrives.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level keys that select a command.
pub const COMMAND_KEYS: [&str; 3] = ["input", "output", "relay"];

/// A decoded pipe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    QueryInput { index: u8 },
    SetOutput { index: u8, state: bool },
    SetRelay { index: u8, state: bool },
}

/// Why a request could not be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("message of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge { size: usize, limit: usize },
}

impl ProtocolError {
    /// The `kind` reported to clients.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Malformed(_) => ErrorKind::MalformedMessage,
            ProtocolError::UnknownCommand(_) => ErrorKind::UnknownCommand,
            ProtocolError::TooLarge { .. } => ErrorKind::MessageTooLarge,
        }
    }
}

impl Command {
    /// Decode a request from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::Malformed(format!("invalid JSON: {e}")))?;
        Self::from_value(&value)
    }

    /// Decode a request from an already parsed JSON value.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let object = value.as_object().ok_or_else(|| {
            ProtocolError::Malformed(format!("expected a JSON object, got {}", type_name(value)))
        })?;

        let mut selected = object
            .iter()
            .filter(|(key, _)| COMMAND_KEYS.contains(&key.as_str()));
        let Some((key, body)) = selected.next() else {
            return Err(unknown_command(object));
        };
        if let Some((other, _)) = selected.next() {
            return Err(ProtocolError::Malformed(format!(
                "keys {key:?} and {other:?} are mutually exclusive"
            )));
        }
        if object.len() > 1 {
            let extra: Vec<&str> = object
                .keys()
                .map(String::as_str)
                .filter(|k| *k != key.as_str())
                .collect();
            return Err(ProtocolError::Malformed(format!(
                "unexpected keys alongside {key:?}: {extra:?}"
            )));
        }

        match key.as_str() {
            "input" => Ok(Command::QueryInput {
                index: pin_index(body, "input")?,
            }),
            "output" => {
                let (index, state) = pin_assignment(body, "output")?;
                Ok(Command::SetOutput { index, state })
            }
            _ => {
                let (index, state) = pin_assignment(body, "relay")?;
                Ok(Command::SetRelay { index, state })
            }
        }
    }

    /// Encode the request in its wire form, as a client would send it.
    pub fn to_value(&self) -> Value {
        match *self {
            Command::QueryInput { index } => serde_json::json!({ "input": index }),
            Command::SetOutput { index, state } => {
                serde_json::json!({ "output": { (index.to_string()): state } })
            }
            Command::SetRelay { index, state } => {
                serde_json::json!({ "relay": { (index.to_string()): state } })
            }
        }
    }
}

fn unknown_command(object: &Map<String, Value>) -> ProtocolError {
    if object.is_empty() {
        ProtocolError::UnknownCommand(format!("empty object, expected one of {COMMAND_KEYS:?}"))
    } else {
        let keys: Vec<&str> = object.keys().map(String::as_str).collect();
        ProtocolError::UnknownCommand(format!("{keys:?}, expected one of {COMMAND_KEYS:?}"))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A pin index given as a JSON integer or a numeric string.
fn pin_index(value: &Value, field: &str) -> Result<u8, ProtocolError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) => parse_index_str(s),
        _ => None,
    };
    parsed.ok_or_else(|| {
        ProtocolError::Malformed(format!(
            "{field}: pin index must be an integer in 0..=255, got {value}"
        ))
    })
}

fn parse_index_str(s: &str) -> Option<u8> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// A single-entry `{"<pin>": <bool>}` mapping.
fn pin_assignment(value: &Value, field: &str) -> Result<(u8, bool), ProtocolError> {
    let map = value.as_object().ok_or_else(|| {
        ProtocolError::Malformed(format!(
            "{field}: expected {{\"<pin>\": <bool>}}, got {}",
            type_name(value)
        ))
    })?;
    if map.len() != 1 {
        return Err(ProtocolError::Malformed(format!(
            "{field}: expected exactly one pin, got {}",
            map.len()
        )));
    }
    let Some((pin, state)) = map.iter().next() else {
        return Err(ProtocolError::Malformed(format!("{field}: no pin given")));
    };
    let index = parse_index_str(pin).ok_or_else(|| {
        ProtocolError::Malformed(format!(
            "{field}: pin index must be a numeric string in 0..=255, got {pin:?}"
        ))
    })?;
    let state = state.as_bool().ok_or_else(|| {
        ProtocolError::Malformed(format!(
            "{field}: state for pin {pin} must be a boolean, got {state}"
        ))
    })?;
    Ok((index, state))
}

// ── Results ─────────────────────────────────────────────────────────────

/// Error categories reported on the outbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedMessage,
    UnknownCommand,
    MessageTooLarge,
    HardwareFault,
}

/// Body of an error result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// The outcome of one request, as written to the outbound channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    /// Bare boolean result.
    State(bool),
    /// Structured error standing in for a result.
    Error { error: ErrorBody },
}

impl Reply {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Reply::Error {
            error: ErrorBody {
                kind,
                message: message.into(),
            },
        }
    }

    /// Serialized form followed by a newline.
    pub fn to_line(&self) -> Vec<u8> {
        // Serializing a bool or a struct of strings cannot fail.
        let mut line = serde_json::to_vec(self).unwrap_or_else(|_| b"null".to_vec());
        line.push(b'\n');
        line
    }
}

impl From<ProtocolError> for Reply {
    fn from(err: ProtocolError) -> Self {
        Reply::error(err.kind(), err.to_string())
    }
}

// ── Framing ─────────────────────────────────────────────────────────────

/// Splits a byte stream into JSON values.
///
/// Values may follow one another directly or be separated by whitespace.
/// Each rejected message yields exactly one error frame:
///
/// - after a syntax error, input is dropped up to and including the next
///   newline, even if that newline arrives in a later push;
/// - a value longer than `limit` is rejected; when it is still incomplete
///   its remainder is dropped through the closing bracket, tracked across
///   pushes without buffering it.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    limit: usize,
    discard: Option<Discard>,
}

impl FrameDecoder {
    /// Create a decoder that refuses values larger than `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
            discard: None,
        }
    }

    /// Bytes received but not yet part of a complete value.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Whether input is being dropped for an already rejected message.
    pub fn is_discarding(&self) -> bool {
        self.discard.is_some()
    }

    /// Append `bytes` and return every frame that is now complete, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<Value, ProtocolError>> {
        let mut frames = Vec::new();

        let bytes = match self.discard.as_mut() {
            None => bytes,
            Some(discard) => match discard.advance(bytes) {
                None => return frames,
                Some(consumed) => {
                    self.discard = None;
                    &bytes[consumed..]
                }
            },
        };
        self.buffer.extend_from_slice(bytes);
        self.drain_frames(&mut frames);

        while self.discard.is_none() && self.buffer.len() > self.limit {
            frames.push(Err(ProtocolError::TooLarge {
                size: self.buffer.len(),
                limit: self.limit,
            }));
            let pending = std::mem::take(&mut self.buffer);
            let mut discard = Discard::Value(ValueSkip::default());
            match discard.advance(&pending) {
                None => self.discard = Some(discard),
                Some(consumed) => {
                    self.buffer.extend_from_slice(&pending[consumed..]);
                    self.drain_frames(&mut frames);
                }
            }
        }

        frames
    }

    fn drain_frames(&mut self, frames: &mut Vec<Result<Value, ProtocolError>>) {
        let mut offset = 0;
        while offset < self.buffer.len() {
            let rest = &self.buffer[offset..];
            let mut stream = serde_json::Deserializer::from_slice(rest).into_iter::<Value>();
            match stream.next() {
                None => {
                    offset = self.buffer.len();
                }
                Some(Ok(value)) => {
                    let consumed = stream.byte_offset();
                    let leading = rest.iter().take_while(|b| b.is_ascii_whitespace()).count();
                    let size = consumed - leading;
                    offset += consumed;
                    if size > self.limit {
                        frames.push(Err(ProtocolError::TooLarge {
                            size,
                            limit: self.limit,
                        }));
                    } else {
                        frames.push(Ok(value));
                    }
                }
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(e)) => {
                    frames.push(Err(ProtocolError::Malformed(format!("invalid JSON: {e}"))));
                    match rest.iter().position(|&b| b == b'\n') {
                        Some(nl) => offset += nl + 1,
                        None => {
                            offset = self.buffer.len();
                            self.discard = Some(Discard::Line);
                            break;
                        }
                    }
                }
            }
        }
        self.buffer.drain(..offset);
    }
}

/// What is being dropped after a rejection.
#[derive(Debug)]
enum Discard {
    /// The rest of a malformed line.
    Line,
    /// The rest of an oversized value.
    Value(ValueSkip),
}

impl Discard {
    /// Consume `bytes` until the rejected message ends; returns how many
    /// bytes belonged to it, or `None` when all of them did.
    fn advance(&mut self, bytes: &[u8]) -> Option<usize> {
        match self {
            Discard::Line => bytes.iter().position(|&b| b == b'\n').map(|nl| nl + 1),
            Discard::Value(skip) => skip.advance(bytes),
        }
    }
}

/// Tracks nesting and string state of a JSON value without keeping it.
#[derive(Debug, Default)]
struct ValueSkip {
    started: bool,
    scalar: bool,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl ValueSkip {
    fn advance(&mut self, bytes: &[u8]) -> Option<usize> {
        for (i, &b) in bytes.iter().enumerate() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                continue;
            }

            if !self.started {
                if b.is_ascii_whitespace() {
                    continue;
                }
                self.started = true;
                match b {
                    b'{' | b'[' => self.depth = 1,
                    b'"' => self.in_string = true,
                    _ => self.scalar = true,
                }
                continue;
            }

            if self.scalar {
                if b.is_ascii_whitespace() {
                    return Some(i + 1);
                }
                if matches!(b, b'{' | b'[' | b'"') {
                    return Some(i);
                }
                continue;
            }

            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode(s: &str) -> Result<Command, ProtocolError> {
        Command::from_slice(s.as_bytes())
    }

    #[test]
    fn test_decode_input() {
        assert_eq!(decode(r#"{"input": 0}"#), Ok(Command::QueryInput { index: 0 }));
        assert_eq!(decode(r#"{"input": "3"}"#), Ok(Command::QueryInput { index: 3 }));
    }

    #[test]
    fn test_decode_output_and_relay() {
        assert_eq!(
            decode(r#"{"output": {"1": true}}"#),
            Ok(Command::SetOutput {
                index: 1,
                state: true
            })
        );
        assert_eq!(
            decode(r#"{"relay": {"0": false}}"#),
            Ok(Command::SetRelay {
                index: 0,
                state: false
            })
        );
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = decode("{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedMessage);
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(decode("true"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode("[1]"), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_decode_unknown_command() {
        let err = decode(r#"{"blink": 3}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownCommand);
        assert!(err.to_string().contains("blink"));
        assert_eq!(decode("{}").unwrap_err().kind(), ErrorKind::UnknownCommand);
    }

    #[test]
    fn test_decode_rejects_two_commands() {
        let err = decode(r#"{"input": 0, "relay": {"0": true}}"#).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_decode_rejects_extra_keys() {
        let err = decode(r#"{"input": 0, "id": 7}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedMessage);
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn test_decode_rejects_bad_index() {
        for body in [
            r#"{"input": -1}"#,
            r#"{"input": 256}"#,
            r#"{"input": 1.5}"#,
            r#"{"input": "one"}"#,
            r#"{"input": null}"#,
            r#"{"output": {"x": true}}"#,
            r#"{"output": {"-1": true}}"#,
        ] {
            assert!(
                matches!(decode(body), Err(ProtocolError::Malformed(_))),
                "{body} should be malformed"
            );
        }
    }

    #[test]
    fn test_decode_rejects_bad_assignment() {
        for body in [
            r#"{"output": 1}"#,
            r#"{"output": {}}"#,
            r#"{"output": {"1": true, "2": false}}"#,
            r#"{"relay": {"1": 1}}"#,
            r#"{"relay": {"1": "true"}}"#,
        ] {
            assert!(
                matches!(decode(body), Err(ProtocolError::Malformed(_))),
                "{body} should be malformed"
            );
        }
    }

    #[test]
    fn test_command_wire_form_decodes_back() {
        let cmd = Command::SetRelay {
            index: 4,
            state: true,
        };
        assert_eq!(cmd.to_value(), serde_json::json!({"relay": {"4": true}}));
        assert_eq!(Command::from_value(&cmd.to_value()), Ok(cmd));
    }

    #[test]
    fn test_reply_encoding() {
        assert_eq!(Reply::State(true).to_line(), b"true\n");
        assert_eq!(Reply::State(false).to_line(), b"false\n");

        let reply = Reply::from(ProtocolError::UnknownCommand("x".to_string()));
        let line = String::from_utf8(reply.to_line()).unwrap();
        assert_eq!(
            line,
            "{\"error\":{\"kind\":\"unknown_command\",\"message\":\"unknown command: x\"}}\n"
        );
    }

    // ── Framing ─────────────────────────────────────────────────────

    #[test]
    fn test_frames_concatenated_values() {
        let mut decoder = FrameDecoder::new(1024);
        let frames = decoder.push(br#"{"input": 0}{"input": 1}"#);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], Ok(serde_json::json!({"input": 1})));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_frames_newline_delimited_values() {
        let mut decoder = FrameDecoder::new(1024);
        let frames = decoder.push(b"{\"input\": 0}\n{\"relay\": {\"0\": true}}\n\n");
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(Result::is_ok));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_frames_partial_value_waits_for_rest() {
        let mut decoder = FrameDecoder::new(1024);
        assert!(decoder.push(br#"{"output": {"1""#).is_empty());
        assert!(decoder.pending() > 0);

        let frames = decoder.push(br#": true}}"#);
        assert_eq!(frames, vec![Ok(serde_json::json!({"output": {"1": true}}))]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_frames_syntax_error_resyncs_at_newline() {
        let mut decoder = FrameDecoder::new(1024);
        let frames = decoder.push(b"{not json}\n{\"input\": 2}\n");
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(ProtocolError::Malformed(_))));
        assert_eq!(frames[1], Ok(serde_json::json!({"input": 2})));
    }

    #[test]
    fn test_frames_syntax_error_discards_rest_of_line() {
        let mut decoder = FrameDecoder::new(1024);
        let frames = decoder.push(b"{not json");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_err());
        assert_eq!(decoder.pending(), 0);
        assert!(decoder.is_discarding());

        // The tail of the same line arrives later and stays silent.
        assert!(decoder.push(br#", "relay": {"0": true}}"#).is_empty());

        let frames = decoder.push(b"\n{\"input\": 0}");
        assert_eq!(frames, vec![Ok(serde_json::json!({"input": 0}))]);
        assert!(!decoder.is_discarding());
    }

    #[test]
    fn test_frames_oversized_value_is_rejected() {
        let mut decoder = FrameDecoder::new(16);
        let frames = decoder.push(br#"{"input": "000000000000000000000"#);
        assert_eq!(
            frames,
            vec![Err(ProtocolError::TooLarge { size: 32, limit: 16 })]
        );
        assert_eq!(decoder.pending(), 0);

        let frames = decoder.push(br#"00"}{"input": 1}"#);
        assert_eq!(frames, vec![Ok(serde_json::json!({"input": 1}))]);
    }

    #[test]
    fn test_frames_oversized_value_never_runs_nested_command() {
        let mut message = br#"{"pad": [""#.to_vec();
        message.extend(std::iter::repeat_n(b'x', 40));
        message.extend_from_slice(br#"", {"relay": {"0": true}}, "\"]}"]}"#);
        message.extend_from_slice(b"\n{\"input\": 3}\n");

        let mut decoder = FrameDecoder::new(32);
        let mut frames = Vec::new();
        for chunk in message.chunks(32) {
            frames.extend(decoder.push(chunk));
        }

        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(ProtocolError::TooLarge { limit: 32, .. })));
        assert_eq!(frames[1], Ok(serde_json::json!({"input": 3})));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_frames_oversized_value_rejected_once_per_byte_split() {
        let mut message = br#"{"output": {"1": [[["#.to_vec();
        message.extend(std::iter::repeat_n(b'7', 100));
        message.extend_from_slice(b"]]]}}{\"input\": 0}");

        for chunk_size in [1, 5, 16, 64, message.len()] {
            let mut decoder = FrameDecoder::new(24);
            let mut frames = Vec::new();
            for chunk in message.chunks(chunk_size) {
                frames.extend(decoder.push(chunk));
            }
            assert_eq!(frames.len(), 2, "chunk size {chunk_size}");
            assert!(frames[0].is_err());
            assert_eq!(frames[1], Ok(serde_json::json!({"input": 0})));
        }
    }
}
