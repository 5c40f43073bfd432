use bytes::Bytes;
use bytes::BytesMut;
use memchr::memchr;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

/// Default cap for a single request or header line.
pub const MAX_LINE_LEN: usize = 8 * 1024;

/// Buffered line reader for HTTP request heads and other line protocols.
///
/// Bytes read past the last returned line stay buffered; `into_parts` hands them
/// to whatever protocol takes over the stream (the WebSocket frame reader).
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buf: BytesMut,
    max_line_len: usize,
}

impl<R> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4 * 1024),
            max_line_len: MAX_LINE_LEN,
        }
    }

    pub fn max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = max.max(1);
        self
    }

    pub fn into_parts(self) -> (R, BytesMut) {
        (self.inner, self.buf)
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Read one line, stripping trailing `\n` and optional `\r`.
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` for a line (may be empty),
    /// - `Ok(None)` on clean EOF with no buffered data.
    ///
    /// A line longer than `max_line_len` fails with `InvalidData`.
    pub async fn read_line(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            if let Some(i) = memchr(b'\n', &self.buf) {
                if i > self.max_line_len {
                    return Err(line_too_long());
                }
                let raw = self.buf.split_to(i + 1).freeze();
                return Ok(Some(trim_crlf(raw)));
            }

            if self.buf.len() > self.max_line_len {
                return Err(line_too_long());
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof while reading line",
                ));
            }
        }
    }
}

fn line_too_long() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, "line too long")
}

fn trim_crlf(mut b: Bytes) -> Bytes {
    let mut end = b.len();
    if end > 0 && b[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && b[end - 1] == b'\r' {
        end -= 1;
    }
    b.truncate(end);
    b
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_crlf_and_lf() {
        let (a, b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut b = b;
            b.write_all(b"GET / HTTP/1.1\r\nHost: x\n\r\n").await.unwrap();
        });

        let mut lr = LineReader::new(a);
        let l1 = lr.read_line().await.unwrap().unwrap();
        let l2 = lr.read_line().await.unwrap().unwrap();
        let l3 = lr.read_line().await.unwrap().unwrap();
        assert_eq!(&l1[..], b"GET / HTTP/1.1");
        assert_eq!(&l2[..], b"Host: x");
        assert!(l3.is_empty());
    }

    #[tokio::test]
    async fn keeps_bytes_after_last_line() {
        let (a, mut b) = tokio::io::duplex(64);
        b.write_all(b"end\r\n\x81\x00").await.unwrap();

        let mut lr = LineReader::new(a);
        let l = lr.read_line().await.unwrap().unwrap();
        assert_eq!(&l[..], b"end");
        let (_inner, rest) = lr.into_parts();
        assert_eq!(&rest[..], &[0x81, 0x00]);
    }

    #[tokio::test]
    async fn rejects_overlong_line() {
        let (a, mut b) = tokio::io::duplex(256);
        b.write_all(&[b'a'; 40]).await.unwrap();
        b.write_all(b"\n").await.unwrap();

        let mut lr = LineReader::new(a).max_line_len(16);
        let err = lr.read_line().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn clean_eof_is_none() {
        let (a, b) = tokio::io::duplex(8);
        drop(b);
        let mut lr = LineReader::new(a);
        assert!(lr.read_line().await.unwrap().is_none());
    }
}
