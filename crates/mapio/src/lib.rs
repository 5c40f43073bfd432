//! `mapio`: tiny "NIH" HTTP + WebSocket IO for the map service.
//!
//! This crate intentionally avoids hyper/tungstenite and implements just what we need:
//! - CRLF/LF line framing for the HTTP request head (`line`),
//! - request parsing and plain `Connection: close` responses (`http`),
//! - the RFC 6455 opening handshake (`handshake`),
//! - WebSocket frame decode/encode with masking and fragment reassembly (`ws`).
//!
//! Server-to-client frames are never masked. No extensions, no TLS.

pub mod handshake;
pub mod http;
pub mod line;
pub mod ws;
