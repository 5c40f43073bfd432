//! WebSocket framing (RFC 6455 section 5).
//!
//! `WsReader` buffers like `line::LineReader`: it decodes whole frames out of a
//! `BytesMut` and only touches the socket when the buffer holds a partial frame.
//! `WsWriter` writes header and payload as separate parts, never concatenating.

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Close status for a normal shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// Unmasked payload.
    pub payload: Bytes,
}

/// A complete application or control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

fn invalid(msg: &'static str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

/// XOR `buf` with the 4-byte mask key, starting at key index 0.
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b ^= mask[i % 4];
    }
}

/// Append a frame header: FIN/opcode byte, mask bit + 7/16/64-bit length, optional key.
pub fn put_header(dst: &mut BytesMut, fin: bool, opcode: Opcode, len: usize, mask: Option<[u8; 4]>) {
    let b0 = (if fin { 0x80 } else { 0x00 }) | opcode.as_u8();
    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    dst.put_u8(b0);
    if len <= 125 {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }
    if let Some(m) = mask {
        dst.put_slice(&m);
    }
}

/// Encode a single unmasked final frame (server to client).
pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(payload.len() + 10);
    put_header(&mut out, true, opcode, payload.len(), None);
    out.put_slice(payload);
    out
}

/// Encode a masked frame, as a client would send it.
pub fn encode_masked_frame(fin: bool, opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> BytesMut {
    let mut out = BytesMut::with_capacity(payload.len() + 14);
    put_header(&mut out, fin, opcode, payload.len(), Some(mask));
    let start = out.len();
    out.put_slice(payload);
    apply_mask(&mut out[start..], mask);
    out
}

/// Decode one frame from the front of `buf`, consuming it.
///
/// Returns `Ok(None)` if `buf` does not yet hold a complete frame.
pub fn decode_frame(buf: &mut BytesMut, max_frame_len: usize) -> std::io::Result<Option<Frame>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let b0 = buf[0];
    let b1 = buf[1];
    if b0 & 0x70 != 0 {
        return Err(invalid("reserved bits set without extension"));
    }
    let fin = b0 & 0x80 != 0;
    let opcode = Opcode::from_u8(b0 & 0x0F).ok_or_else(|| invalid("unknown opcode"))?;
    let masked = b1 & 0x80 != 0;

    let (len, mut hdr_len) = match b1 & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(b), 10)
        }
        n => (n as u64, 2),
    };

    if opcode.is_control() && (!fin || len > 125) {
        return Err(invalid("fragmented or oversized control frame"));
    }
    if len > max_frame_len as u64 {
        return Err(invalid("frame too large"));
    }
    let len = len as usize;

    let mask = if masked {
        if buf.len() < hdr_len + 4 {
            return Ok(None);
        }
        let m = [buf[hdr_len], buf[hdr_len + 1], buf[hdr_len + 2], buf[hdr_len + 3]];
        hdr_len += 4;
        Some(m)
    } else {
        None
    };

    if buf.len() < hdr_len + len {
        return Ok(None);
    }

    buf.advance(hdr_len);
    let mut payload = buf.split_to(len);
    if let Some(m) = mask {
        apply_mask(&mut payload, m);
    }
    Ok(Some(Frame {
        fin,
        opcode,
        payload: payload.freeze(),
    }))
}

#[derive(Debug)]
pub struct WsReader<R> {
    inner: R,
    buf: BytesMut,
    max_frame_len: usize,
    // Data message being reassembled from continuation frames.
    partial: Option<(Opcode, BytesMut)>,
}

impl<R> WsReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_buffer(inner, BytesMut::with_capacity(8 * 1024))
    }

    /// Start from bytes already read off the stream (e.g. right after the handshake).
    pub fn with_buffer(inner: R, buf: BytesMut) -> Self {
        Self {
            inner,
            buf,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            partial: None,
        }
    }

    /// Cap for a single frame and for a reassembled message.
    pub fn max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max.max(125);
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> WsReader<R> {
    /// Read one raw frame.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` for a frame,
    /// - `Ok(None)` on clean EOF with no buffered data.
    pub async fn read_frame(&mut self) -> std::io::Result<Option<Frame>> {
        loop {
            if let Some(f) = decode_frame(&mut self.buf, self.max_frame_len)? {
                return Ok(Some(f));
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof while reading frame",
                ));
            }
        }
    }

    /// Read the next complete message, reassembling fragmented data messages.
    ///
    /// Control frames may arrive between fragments and are returned as they come.
    /// A close frame yields `Message::Close`; the caller should stop reading.
    pub async fn read_message(&mut self) -> std::io::Result<Option<Message>> {
        loop {
            let Some(frame) = self.read_frame().await? else {
                return Ok(None);
            };
            match frame.opcode {
                Opcode::Close => return Ok(Some(Message::Close)),
                Opcode::Ping => return Ok(Some(Message::Ping(frame.payload))),
                Opcode::Pong => return Ok(Some(Message::Pong(frame.payload))),
                Opcode::Text | Opcode::Binary => {
                    if self.partial.is_some() {
                        return Err(invalid("new data frame inside fragmented message"));
                    }
                    if frame.fin {
                        return finish(frame.opcode, frame.payload).map(Some);
                    }
                    self.partial = Some((frame.opcode, BytesMut::from(&frame.payload[..])));
                }
                Opcode::Continuation => {
                    let Some((op, mut acc)) = self.partial.take() else {
                        return Err(invalid("continuation without a started message"));
                    };
                    if acc.len() + frame.payload.len() > self.max_frame_len {
                        return Err(invalid("message too large"));
                    }
                    acc.extend_from_slice(&frame.payload);
                    if frame.fin {
                        return finish(op, acc.freeze()).map(Some);
                    }
                    self.partial = Some((op, acc));
                }
            }
        }
    }
}

fn finish(op: Opcode, payload: Bytes) -> std::io::Result<Message> {
    match op {
        Opcode::Text => String::from_utf8(payload.to_vec())
            .map(Message::Text)
            .map_err(|_| invalid("text message is not utf-8")),
        _ => Ok(Message::Binary(payload)),
    }
}

#[derive(Debug)]
pub struct WsWriter<W> {
    inner: W,
}

impl<W> WsWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> WsWriter<W> {
    /// Write one unmasked final frame and flush it.
    ///
    /// The header goes out as its own part so large payloads are never copied.
    pub async fn write_frame(&mut self, opcode: Opcode, payload: &[u8]) -> std::io::Result<()> {
        let mut hdr = BytesMut::with_capacity(10);
        put_header(&mut hdr, true, opcode, payload.len(), None);
        self.inner.write_all(&hdr).await?;
        if !payload.is_empty() {
            self.inner.write_all(payload).await?;
        }
        self.inner.flush().await
    }

    pub async fn write_text(&mut self, text: &str) -> std::io::Result<()> {
        self.write_frame(Opcode::Text, text.as_bytes()).await
    }

    pub async fn write_ping(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.write_frame(Opcode::Ping, payload).await
    }

    pub async fn write_pong(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.write_frame(Opcode::Pong, payload).await
    }

    pub async fn write_close(&mut self, code: u16) -> std::io::Result<()> {
        self.write_frame(Opcode::Close, &code.to_be_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Frame {
        let mut buf = BytesMut::from(bytes);
        let f = decode_frame(&mut buf, usize::MAX).unwrap().unwrap();
        assert!(buf.is_empty());
        f
    }

    #[test]
    fn text_round_trips_across_length_boundaries() {
        for n in [0usize, 1, 125, 126, 127, 65535, 65536, 70000] {
            let text = "é".repeat(n / 2) + &"x".repeat(n % 2);
            let enc = encode_frame(Opcode::Text, text.as_bytes());
            let f = decode_all(&enc);
            assert!(f.fin);
            assert_eq!(f.opcode, Opcode::Text);
            assert_eq!(std::str::from_utf8(&f.payload).unwrap(), text);
        }
    }

    #[test]
    fn length_field_widths() {
        assert_eq!(encode_frame(Opcode::Text, &[0; 125])[1], 125);
        let e = encode_frame(Opcode::Text, &[0; 126]);
        assert_eq!(&e[1..4], &[126, 0, 126]);
        let e = encode_frame(Opcode::Text, &vec![0; 65536]);
        assert_eq!(&e[1..10], &[127, 0, 0, 0, 0, 0, 1, 0, 0]);
        assert_eq!(e[0], 0x81);
    }

    #[test]
    fn server_frames_are_unmasked() {
        let e = encode_frame(Opcode::Text, b"hi");
        assert_eq!(&e[..], &[0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn unmasks_client_frames() {
        // RFC 6455 5.7: masked "Hello".
        let bytes = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let f = decode_all(&bytes);
        assert_eq!(&f.payload[..], b"Hello");
        let re = encode_masked_frame(true, Opcode::Text, b"Hello", [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(&re[..], &bytes);
    }

    #[test]
    fn partial_input_waits() {
        let enc = encode_masked_frame(true, Opcode::Text, &[b'a'; 300], [1, 2, 3, 4]);
        for cut in [1, 2, 3, 5, 8, 100] {
            let mut buf = BytesMut::from(&enc[..cut]);
            assert!(decode_frame(&mut buf, usize::MAX).unwrap().is_none());
            assert_eq!(buf.len(), cut);
        }
    }

    #[test]
    fn rejects_oversized_and_bad_control_frames() {
        let mut buf = encode_frame(Opcode::Text, &[0; 200]);
        assert!(decode_frame(&mut buf, 100).is_err());

        let mut buf = BytesMut::from(&[0x09u8, 0x00][..]); // ping without FIN
        assert!(decode_frame(&mut buf, 100).is_err());

        let mut buf = BytesMut::from(&[0x83u8, 0x00][..]); // reserved opcode
        assert!(decode_frame(&mut buf, 100).is_err());
    }

    #[tokio::test]
    async fn reassembles_fragments_around_ping() {
        let m = [9, 8, 7, 6];
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode_masked_frame(false, Opcode::Text, b"{\"type\":", m));
        wire.extend_from_slice(&encode_masked_frame(true, Opcode::Ping, b"p", m));
        wire.extend_from_slice(&encode_masked_frame(
            true,
            Opcode::Continuation,
            b"\"subscribe\"}",
            m,
        ));
        wire.extend_from_slice(&encode_masked_frame(true, Opcode::Close, &[0x03, 0xe8], m));

        let mut r = WsReader::new(&wire[..]);
        assert_eq!(
            r.read_message().await.unwrap(),
            Some(Message::Ping(Bytes::from_static(b"p")))
        );
        assert_eq!(
            r.read_message().await.unwrap(),
            Some(Message::Text("{\"type\":\"subscribe\"}".to_string()))
        );
        assert_eq!(r.read_message().await.unwrap(), Some(Message::Close));
        assert_eq!(r.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn writer_output_reads_back() {
        let (a, b) = tokio::io::duplex(1 << 20);
        let text = "z".repeat(70_000);
        let t2 = text.clone();
        tokio::spawn(async move {
            let mut w = WsWriter::new(b);
            w.write_text(&t2).await.unwrap();
            w.write_ping(b"").await.unwrap();
            w.write_close(CLOSE_NORMAL).await.unwrap();
        });

        let mut r = WsReader::new(a);
        assert_eq!(r.read_message().await.unwrap(), Some(Message::Text(text)));
        assert_eq!(
            r.read_message().await.unwrap(),
            Some(Message::Ping(Bytes::new()))
        );
        assert_eq!(r.read_message().await.unwrap(), Some(Message::Close));
    }

    #[tokio::test]
    async fn truncated_frame_is_eof_error() {
        let enc = encode_frame(Opcode::Text, b"hello");
        let mut r = WsReader::new(&enc[..4]);
        let err = r.read_message().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
