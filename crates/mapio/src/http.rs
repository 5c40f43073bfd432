//! Minimal HTTP/1.1 request-head parsing and `Connection: close` responses.
//!
//! Only what the map endpoint needs: a request line, headers until the blank line,
//! no request bodies, one response per connection.

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::line::LineReader;

pub const MAX_HEADERS: usize = 100;

#[derive(Debug)]
pub enum HttpError {
    /// Transport failure or EOF in the middle of the request head.
    Io(std::io::Error),
    BadRequestLine,
    BadHeader,
    TooManyHeaders,
    LineTooLong,
}

impl HttpError {
    /// Status to answer with before closing, if the peer is still worth answering.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Io(_) => None,
            HttpError::BadRequestLine | HttpError::BadHeader => Some(400),
            HttpError::TooManyHeaders | HttpError::LineTooLong => Some(431),
        }
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::Io(e) => write!(f, "io error: {e}"),
            HttpError::BadRequestLine => write!(f, "malformed request line"),
            HttpError::BadHeader => write!(f, "malformed header line"),
            HttpError::TooManyHeaders => write!(f, "too many headers (max {MAX_HEADERS})"),
            HttpError::LineTooLong => write!(f, "request line or header too long"),
        }
    }
}

impl std::error::Error for HttpError {}

impl From<std::io::Error> for HttpError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::InvalidData {
            HttpError::LineTooLong
        } else {
            HttpError::Io(e)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingRequestLine,
    AwaitingHeaders,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// First header with this name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `Upgrade: websocket`, compared case-insensitively against each listed token.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .map(|v| {
                v.split(',')
                    .any(|t| t.trim().eq_ignore_ascii_case("websocket"))
            })
            .unwrap_or(false)
    }
}

/// Line-fed request head parser.
#[derive(Debug)]
pub struct RequestParser {
    phase: Phase,
    method: String,
    target: String,
    version: String,
    headers: Vec<(String, String)>,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingRequestLine,
            method: String::new(),
            target: String::new(),
            version: String::new(),
            headers: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Feed one line (without its line terminator).
    ///
    /// Returns `Ok(Some(request))` once the blank line ending the head arrives.
    pub fn feed(&mut self, line: &[u8]) -> Result<Option<Request>, HttpError> {
        match self.phase {
            Phase::AwaitingRequestLine => {
                // Tolerate stray blank lines before the request line (RFC 7230 3.5).
                if line.is_empty() {
                    return Ok(None);
                }
                let s = std::str::from_utf8(line).map_err(|_| HttpError::BadRequestLine)?;
                let mut it = s.split_ascii_whitespace();
                let (Some(method), Some(target), Some(version), None) =
                    (it.next(), it.next(), it.next(), it.next())
                else {
                    return Err(HttpError::BadRequestLine);
                };
                if !version.starts_with("HTTP/") || !target.starts_with('/') {
                    return Err(HttpError::BadRequestLine);
                }
                self.method = method.to_string();
                self.target = target.to_string();
                self.version = version.to_string();
                self.phase = Phase::AwaitingHeaders;
                Ok(None)
            }
            Phase::AwaitingHeaders => {
                if line.is_empty() {
                    self.phase = Phase::Complete;
                    let (path, query) = split_target(&self.target);
                    return Ok(Some(Request {
                        method: std::mem::take(&mut self.method),
                        path,
                        query,
                        version: std::mem::take(&mut self.version),
                        headers: std::mem::take(&mut self.headers),
                    }));
                }
                if self.headers.len() >= MAX_HEADERS {
                    return Err(HttpError::TooManyHeaders);
                }
                let s = std::str::from_utf8(line).map_err(|_| HttpError::BadHeader)?;
                let (name, value) = s.split_once(':').ok_or(HttpError::BadHeader)?;
                let name = name.trim();
                if name.is_empty() || name.contains(char::is_whitespace) {
                    return Err(HttpError::BadHeader);
                }
                self.headers
                    .push((name.to_string(), value.trim().to_string()));
                Ok(None)
            }
            Phase::Complete => Err(HttpError::BadRequestLine),
        }
    }
}

/// Read a request head.
///
/// Returns `Ok(None)` if the peer closed before sending anything.
pub async fn read_request<R: AsyncRead + Unpin>(
    lr: &mut LineReader<R>,
) -> Result<Option<Request>, HttpError> {
    let mut parser = RequestParser::new();
    loop {
        let Some(line) = lr.read_line().await? else {
            if parser.phase() == Phase::AwaitingRequestLine {
                return Ok(None);
            }
            return Err(HttpError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "eof in request head",
            )));
        };
        if let Some(req) = parser.feed(&line)? {
            return Ok(Some(req));
        }
    }
}

fn split_target(target: &str) -> (String, Vec<(String, String)>) {
    let (path, qs) = match target.split_once('?') {
        Some((p, q)) => (p, q),
        None => (target, ""),
    };
    let query = qs
        .split('&')
        .filter(|kv| !kv.is_empty())
        .map(|kv| match kv.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(kv), String::new()),
        })
        .collect();
    (percent_decode(path), query)
}

/// Decode `%XX` escapes and `+` as space. Invalid escapes are kept literally.
pub fn percent_decode(s: &str) -> String {
    fn hex(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let b = s.as_bytes();
    let mut out = Vec::with_capacity(b.len());
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < b.len() => {
                match (hex(b[i + 1]), hex(b[i + 2])) {
                    (Some(h), Some(l)) => {
                        out.push((h << 4) | l);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            x => {
                out.push(x);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn reason(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        426 => "Upgrade Required",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_body(status: u16, content_type: &str, body: impl Into<Bytes>) -> Self {
        Self::new(status)
            .header("Content-Type", content_type)
            .body(body)
    }

    pub fn json(status: u16, body: impl Into<Bytes>) -> Self {
        Self::with_body(status, "application/json", body).header("Cache-Control", "no-store")
    }

    pub fn html(body: impl Into<Bytes>) -> Self {
        Self::with_body(200, "text/html; charset=utf-8", body)
    }

    /// Plain-text error page: the status line's reason phrase, or `detail` if given.
    pub fn error(status: u16, detail: &str) -> Self {
        let text = if detail.is_empty() {
            reason(status)
        } else {
            detail
        };
        Self::with_body(
            status,
            "text/plain; charset=utf-8",
            format!("{text}\n").into_bytes(),
        )
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialized status line and headers. `Content-Length` and `Connection: close`
    /// are added for responses that carry a body.
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut s = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        for (k, v) in &self.headers {
            s.push_str(k);
            s.push_str(": ");
            s.push_str(v);
            s.push_str("\r\n");
        }
        if let Some(body) = &self.body {
            s.push_str(&format!("Content-Length: {}\r\n", body.len()));
            s.push_str("Connection: close\r\n");
        }
        s.push_str("\r\n");
        s.into_bytes()
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.head_bytes()).await?;
        if let Some(body) = &self.body {
            if !body.is_empty() {
                w.write_all(body).await?;
            }
        }
        w.flush().await
    }
}
