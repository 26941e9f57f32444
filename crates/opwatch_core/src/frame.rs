use serde_json::{json, Map, Value};

/// Kind of a decoded protocol event, taken from the frame's `event:` line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Incremental answer content.
    Delta,
    /// Terminal success carrying the authoritative result.
    Result,
    /// Terminal application-level failure.
    Error,
    /// Default kind for frames without an `event:` line.
    Message,
    /// Any other application-defined kind.
    Other(String),
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "delta" => EventKind::Delta,
            "result" => EventKind::Result,
            "error" => EventKind::Error,
            "" | "message" => EventKind::Message,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Delta => "delta",
            EventKind::Result => "result",
            EventKind::Error => "error",
            EventKind::Message => "message",
            EventKind::Other(name) => name,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Result | EventKind::Error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolEvent {
    pub kind: EventKind,
    pub payload: Value,
}

impl ProtocolEvent {
    /// String field of an object payload, if present.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}

/// Incremental decoder for blank-line separated event frames.
///
/// Chunks may split frames, lines, and `\r\n` pairs at any position; the
/// decoded events only depend on the concatenated input.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    pending_cr: bool,
    /// Prefix of `buffer` already searched for a frame terminator.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every frame it completed, in order.
    pub fn push(&mut self, chunk: &str) -> Vec<ProtocolEvent> {
        self.append_normalized(chunk);

        let mut events = Vec::new();
        // A terminator may straddle the previously scanned end.
        let mut from = if self.buffer[..self.scanned].ends_with('\n') {
            self.scanned - 1
        } else {
            self.scanned
        };
        while let Some(offset) = self.buffer[from..].find("\n\n") {
            let end = from + offset;
            let frame: String = self.buffer.drain(..end + 2).collect();
            if let Some(event) = decode_frame(&frame[..end]) {
                events.push(event);
            }
            from = 0;
        }
        self.scanned = self.buffer.len();
        events
    }

    /// Decodes whatever is left as if it had been terminated.
    pub fn finish(&mut self) -> Option<ProtocolEvent> {
        if std::mem::take(&mut self.pending_cr) {
            self.buffer.push('\r');
        }
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buffer);
        decode_frame(rest.trim_end_matches('\n'))
    }

    pub fn has_pending(&self) -> bool {
        self.pending_cr || !self.buffer.trim().is_empty()
    }

    fn append_normalized(&mut self, chunk: &str) {
        for c in chunk.chars() {
            if std::mem::take(&mut self.pending_cr) && c != '\n' {
                self.buffer.push('\r');
            }
            if c == '\r' {
                self.pending_cr = true;
            } else {
                self.buffer.push(c);
            }
        }
    }
}

fn decode_frame(frame: &str) -> Option<ProtocolEvent> {
    let mut kind: Option<&str> = None;
    let mut data: Option<String> = None;

    for line in frame.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => kind = Some(value.trim()),
            "data" => match data.as_mut() {
                Some(buf) => {
                    buf.push('\n');
                    buf.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            // id, retry and unknown fields carry nothing we use
            _ => {}
        }
    }

    if kind.is_none() && data.is_none() {
        return None;
    }

    Some(ProtocolEvent {
        kind: EventKind::from_name(kind.unwrap_or("message")),
        payload: parse_payload(data.as_deref().unwrap_or("")),
    })
}

fn parse_payload(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "text": raw }))
}
