//! RFC 6455 opening handshake (server side).

use base64::Engine;
use sha1::Digest;

use crate::http::{Request, Response};

pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const WS_VERSION: &str = "13";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    NotGet,
    MissingKey,
    /// Key did not base64-decode to a 16-byte nonce.
    BadKey,
    UnsupportedVersion(String),
}

impl HandshakeError {
    pub fn status(&self) -> u16 {
        match self {
            HandshakeError::NotGet => 405,
            HandshakeError::MissingKey | HandshakeError::BadKey => 400,
            HandshakeError::UnsupportedVersion(_) => 426,
        }
    }

    pub fn response(&self) -> Response {
        let r = Response::error(self.status(), &self.to_string());
        match self {
            HandshakeError::UnsupportedVersion(_) => r.header("Sec-WebSocket-Version", WS_VERSION),
            _ => r,
        }
    }
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeError::NotGet => write!(f, "websocket upgrade requires GET"),
            HandshakeError::MissingKey => write!(f, "missing Sec-WebSocket-Key"),
            HandshakeError::BadKey => write!(f, "invalid Sec-WebSocket-Key"),
            HandshakeError::UnsupportedVersion(v) => {
                write!(f, "unsupported Sec-WebSocket-Version: {v}")
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// `base64(SHA1(key + GUID))`
pub fn accept_key(key: &str) -> String {
    let mut h = sha1::Sha1::new();
    h.update(key.trim().as_bytes());
    h.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(h.finalize())
}

/// Validate an upgrade request and build the `101 Switching Protocols` reply.
pub fn upgrade_response(req: &Request) -> Result<Response, HandshakeError> {
    if req.method != "GET" {
        return Err(HandshakeError::NotGet);
    }
    if let Some(v) = req.header("sec-websocket-version") {
        if v.trim() != WS_VERSION {
            return Err(HandshakeError::UnsupportedVersion(v.trim().to_string()));
        }
    }
    let key = req
        .header("sec-websocket-key")
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(HandshakeError::MissingKey)?;
    let nonce = base64::engine::general_purpose::STANDARD
        .decode(key)
        .map_err(|_| HandshakeError::BadKey)?;
    if nonce.len() != 16 {
        return Err(HandshakeError::BadKey);
    }

    Ok(Response::new(101)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Accept", &accept_key(key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(headers: &[(&str, &str)]) -> Request {
        Request {
            method: "GET".to_string(),
            path: "/".to_string(),
            query: Vec::new(),
            version: "HTTP/1.1".to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn rfc6455_sample_key() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn builds_switching_protocols() {
        let r = upgrade_response(&req(&[
            ("Upgrade", "websocket"),
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("Sec-WebSocket-Version", "13"),
        ]))
        .unwrap();
        let head = String::from_utf8(r.head_bytes()).unwrap();
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(!head.contains("Content-Length"));
    }

    #[test]
    fn rejects_missing_and_short_keys() {
        assert_eq!(
            upgrade_response(&req(&[("Upgrade", "websocket")])).unwrap_err(),
            HandshakeError::MissingKey
        );
        let err = upgrade_response(&req(&[("Sec-WebSocket-Key", "c2hvcnQ=")])).unwrap_err();
        assert_eq!(err, HandshakeError::BadKey);
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn rejects_old_versions_with_426() {
        let err = upgrade_response(&req(&[
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("Sec-WebSocket-Version", "8"),
        ]))
        .unwrap_err();
        let head = String::from_utf8(err.response().head_bytes()).unwrap();
        assert!(head.starts_with("HTTP/1.1 426 "));
        assert!(head.contains("Sec-WebSocket-Version: 13\r\n"));
    }
}
