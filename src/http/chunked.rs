//! Chunked transfer-coding.
//!
//! # Responsibilities
//! - Decode a chunked body into plain bytes, one chunk at a time
//! - Encode request bodies of unknown length as chunks
//!
//! # Design Decisions
//! - Chunk extensions (`;name=value`) are accepted and ignored
//! - Trailer headers after the terminating chunk are not supported; the
//!   line after `0` must be empty

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::http::buffered::BufferedConnectionStream;

/// Decoder state for one chunked body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedDecoder {
    /// Bytes left in the current chunk. Zero means a chunk header comes next.
    remaining: u64,
    finished: bool,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the terminating chunk and its trailing line were consumed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read decoded body bytes into `buf`.
    ///
    /// Returns 0 at end of body and keeps returning 0 afterwards. A 0 can also
    /// be returned for the terminating chunk itself.
    pub async fn read(
        &mut self,
        stream: &mut BufferedConnectionStream,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if self.finished {
            return Ok(0);
        }

        if self.remaining == 0 {
            let line = stream.read_line(cancel).await?;
            self.remaining = parse_chunk_size(&line)?;
            tracing::trace!(chunk_size = self.remaining, "Chunk header");
        }

        let mut produced = 0;
        if self.remaining > 0 {
            let want = (buf.len() as u64).min(self.remaining) as usize;
            if want == 0 {
                return Ok(0);
            }
            produced = stream.read(&mut buf[..want], cancel).await?;
            if produced == 0 {
                return Err(Error::UnexpectedEndOfStream);
            }
            self.remaining -= produced as u64;
            if self.remaining > 0 {
                return Ok(produced);
            }
        } else {
            self.finished = true;
        }

        let trailer = stream.read_line(cancel).await?;
        if !trailer.is_empty() {
            return Err(Error::MalformedChunkTrailer(trailer));
        }
        Ok(produced)
    }
}

/// Parse a chunk-size line: hex digits, optionally followed by extensions.
fn parse_chunk_size(line: &str) -> Result<u64> {
    let size = line.split(';').next().unwrap_or_default().trim();
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::MalformedChunkHeader(line.to_owned()));
    }
    u64::from_str_radix(size, 16).map_err(|_| Error::MalformedChunkHeader(line.to_owned()))
}

/// Writes a body as a sequence of chunks.
pub struct ChunkedEncoder<'a> {
    stream: &'a mut BufferedConnectionStream,
}

impl<'a> ChunkedEncoder<'a> {
    pub fn new(stream: &'a mut BufferedConnectionStream) -> Self {
        Self { stream }
    }

    /// Emit `data` as one chunk. Empty input writes nothing, since a
    /// zero-length chunk would end the body.
    pub async fn write(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let header = format!("{:x}\r\n", data.len());
        self.stream.write_all(header.as_bytes(), cancel).await?;
        self.stream.write_all(data, cancel).await?;
        self.stream.write_all(b"\r\n", cancel).await
    }

    /// Emit the terminating chunk and flush.
    pub async fn end_of_body(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.stream.write_all(b"0\r\n\r\n", cancel).await?;
        self.stream.flush(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;

    fn stream(input: &[u8]) -> BufferedConnectionStream {
        BufferedConnectionStream::new(Box::new(MockTransport::new(input)))
    }

    async fn decode_all(input: &[u8], buf_size: usize) -> Result<Vec<u8>> {
        let cancel = CancellationToken::new();
        let mut s = stream(input);
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();
        let mut buf = vec![0u8; buf_size];
        while !decoder.is_finished() {
            let n = decoder.read(&mut s, &mut buf, &cancel).await?;
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    #[test]
    fn chunk_sizes() {
        let cases = [
            ("0", Some(0)),
            ("a", Some(10)),
            ("1F", Some(31)),
            (" 5 ", Some(5)),
            ("5;name=value", Some(5)),
            ("", None),
            ("xyz", None),
            ("-1", None),
            (";ext", None),
        ];
        for (line, expected) in cases {
            let parsed = parse_chunk_size(line).ok();
            assert_eq!(parsed, expected, "line {:?}", line);
        }
    }

    #[tokio::test]
    async fn decodes_multiple_chunks() {
        let body = decode_all(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n", 64)
            .await
            .unwrap();
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn small_buffers_split_chunks() {
        let body = decode_all(b"b\r\nhello world\r\n0\r\n\r\n", 3).await.unwrap();
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn finished_decoder_keeps_returning_zero() {
        let cancel = CancellationToken::new();
        let mut s = stream(b"0\r\n\r\n");
        let mut decoder = ChunkedDecoder::new();
        let mut buf = [0u8; 8];
        assert_eq!(decoder.read(&mut s, &mut buf, &cancel).await.unwrap(), 0);
        assert!(decoder.is_finished());
        assert_eq!(decoder.read(&mut s, &mut buf, &cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bad_hex_fails_before_data() {
        let err = decode_all(b"zz\r\nhello\r\n", 64).await.unwrap_err();
        assert!(matches!(err, Error::MalformedChunkHeader(line) if line == "zz"));
    }

    #[tokio::test]
    async fn truncated_chunk_is_unexpected_eof() {
        let err = decode_all(b"a\r\nhel", 64).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedEndOfStream));
    }

    #[tokio::test]
    async fn non_blank_trailer_is_rejected() {
        let err = decode_all(b"5\r\nhelloX\r\n0\r\n\r\n", 64).await.unwrap_err();
        assert!(matches!(err, Error::MalformedChunkTrailer(t) if t == "X"));
    }

    async fn encode(pieces: &[Vec<u8>]) -> Vec<u8> {
        let cancel = CancellationToken::new();
        let transport = MockTransport::new(b"");
        let written = transport.written();
        let mut s = BufferedConnectionStream::new(Box::new(transport));
        let mut encoder = ChunkedEncoder::new(&mut s);
        for piece in pieces {
            encoder.write(piece, &cancel).await.unwrap();
        }
        encoder.end_of_body(&cancel).await.unwrap();
        let wire = written.lock().unwrap().clone();
        wire
    }

    #[tokio::test]
    async fn encoded_writes_decode_to_their_concatenation() {
        let wire = encode(&[b"abc".to_vec(), Vec::new(), b"defghijklmnopq".to_vec(), b"r".to_vec()]).await;
        assert!(wire.starts_with(b"3\r\nabc\r\ne\r\n"));
        assert!(wire.ends_with(b"0\r\n\r\n"));
        assert_eq!(decode_all(&wire, 5).await.unwrap(), b"abcdefghijklmnopqr");
    }

    #[tokio::test]
    async fn decoding_stops_exactly_at_the_terminator() {
        let cancel = CancellationToken::new();
        let inputs: Vec<Vec<Vec<u8>>> = vec![
            vec![vec![b'x']],
            vec![vec![0x5a; 0x10]],
            vec![vec![0xa5; 0x1000]],
            vec![vec![1], vec![2; 0x10], vec![3; 0x1000]],
        ];

        for pieces in inputs {
            let expected = pieces.concat();
            let mut wire = encode(&pieces).await;
            wire.extend_from_slice(b"NEXT");

            let mut s = BufferedConnectionStream::new(Box::new(MockTransport::new(&wire).max_read(7)));
            let mut decoder = ChunkedDecoder::new();
            let mut body = Vec::new();
            let mut buf = [0u8; 64];
            while !decoder.is_finished() {
                let n = decoder.read(&mut s, &mut buf, &cancel).await.unwrap();
                body.extend_from_slice(&buf[..n]);
            }
            assert_eq!(body, expected, "{} bytes", expected.len());

            let mut rest = Vec::new();
            loop {
                let n = s.read(&mut buf, &cancel).await.unwrap();
                if n == 0 {
                    break;
                }
                rest.extend_from_slice(&buf[..n]);
            }
            assert_eq!(rest, b"NEXT", "{} bytes", expected.len());
        }
    }
}
