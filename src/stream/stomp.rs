// Minimal STOMP 1.2 framing used by the replay backend's websocket endpoint

use crate::errors::ReplayError;

const FRAME_TERMINATOR: char = '\0';

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, content_type: &str, body: String) -> Self {
        self.headers
            .push(("content-type".to_string(), content_type.to_string()));
        self.headers
            .push(("content-length".to_string(), body.len().to_string()));
        self.body = body;
        self
    }

    /// First value of header `name`. STOMP gives the first occurrence precedence.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn encode(&self) -> String {
        // CONNECT headers are sent verbatim for compatibility with 1.0 brokers
        let escape = self.command != "CONNECT";
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(FRAME_TERMINATOR);
        out
    }
}

/// Split a websocket text message into STOMP frames. Bare end-of-line heart-beats are skipped.
pub fn parse_frames(text: &str) -> Result<Vec<Frame>, ReplayError> {
    text.split(FRAME_TERMINATOR)
        .map(|chunk| chunk.trim_start_matches(['\r', '\n']))
        .filter(|chunk| !chunk.is_empty())
        .map(parse_frame)
        .collect()
}

fn parse_frame(raw: &str) -> Result<Frame, ReplayError> {
    let (head, body) = raw
        .split_once("\r\n\r\n")
        .or_else(|| raw.split_once("\n\n"))
        .unwrap_or((raw, ""));

    let mut lines = head.lines();
    let command = lines
        .next()
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .ok_or_else(|| ReplayError::Transport {
            reason: "STOMP frame without a command".to_string(),
        })?;

    let escaped = command != "CONNECTED";
    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line.split_once(':').ok_or_else(|| ReplayError::Transport {
            reason: format!("malformed STOMP header line: {line}"),
        })?;
        if escaped {
            headers.push((unescape_header(name), unescape_header(value)));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    Ok(Frame {
        command: command.to_string(),
        headers,
        body: body.to_string(),
    })
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
