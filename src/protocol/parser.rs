//! RESP protocol parser.
//!
//! Streaming parser over a growable buffer. A frame is only consumed from
//! the buffer once it has parsed completely, so partial reads can resume on
//! the next socket read without losing bytes.

use super::frame::Frame;
use super::markers;
use crate::error::ProtocolError;
use crate::{MAX_ARGUMENTS, MAX_BULK_SIZE, MAX_INLINE_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr;

/// RESP protocol parser with streaming support.
///
/// Limits: bulk strings up to 512 MiB, arrays up to 1M elements, inline
/// commands up to 64 KiB. Exceeding any limit is a protocol error and the
/// connection is expected to be closed.
#[derive(Debug, Default)]
pub struct RespParser {
    buffer: BytesMut,
}

impl RespParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the parser buffer.
    #[inline]
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns true if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns the number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the parser buffer.
    #[inline]
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Try to parse a complete frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was parsed
    /// - `Ok(None)` if more data is needed
    /// - `Err(e)` if the data is malformed
    pub fn parse(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let first = self.buffer[0];
        if !is_resp_marker(first) {
            return self.parse_inline();
        }

        let mut pos = 0;
        match parse_at(&self.buffer, &mut pos) {
            Ok(frame) => {
                self.buffer.advance(pos);
                Ok(Some(frame))
            }
            Err(ProtocolError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Parse an inline command (plain text, space-separated).
    fn parse_inline(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let line_end = match find_crlf(&self.buffer) {
            Some(pos) => pos,
            None => {
                if self.buffer.len() > MAX_INLINE_SIZE {
                    return Err(ProtocolError::LineTooLong {
                        len: self.buffer.len(),
                        max: MAX_INLINE_SIZE,
                    });
                }
                return Ok(None);
            }
        };

        let line = self.buffer.split_to(line_end);
        self.buffer.advance(2);

        let args: Vec<Frame> = line
            .as_ref()
            .split(|&b| b == b' ' || b == b'\t')
            .filter(|part| !part.is_empty())
            .map(|part| Frame::Bulk(Bytes::copy_from_slice(part)))
            .collect();

        if args.is_empty() {
            return Ok(None);
        }
        Ok(Some(Frame::Array(args)))
    }
}

/// Parse one frame starting at `*pos`, advancing `*pos` past it on success.
///
/// On `Incomplete` the cursor position is meaningless and the caller must
/// retry from the start once more data has arrived.
fn parse_at(buf: &[u8], pos: &mut usize) -> Result<Frame, ProtocolError> {
    let marker = *buf.get(*pos).ok_or(ProtocolError::Incomplete)?;
    *pos += 1;

    match marker {
        markers::SIMPLE_STRING => {
            let line = read_line(buf, pos)?;
            let s = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
            Ok(Frame::Simple(s.to_string()))
        }
        markers::ERROR => {
            let line = read_line(buf, pos)?;
            let s = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
            Ok(Frame::Error(s.to_string()))
        }
        markers::INTEGER => {
            let n = read_integer(buf, pos)?;
            Ok(Frame::Integer(n))
        }
        markers::BULK_STRING => {
            let len = read_integer(buf, pos)?;
            if len < 0 {
                return Ok(Frame::Null);
            }
            let len = len as usize;
            if len > MAX_BULK_SIZE {
                return Err(ProtocolError::BulkTooLarge {
                    len,
                    max: MAX_BULK_SIZE,
                });
            }
            if buf.len() < *pos + len + 2 {
                return Err(ProtocolError::Incomplete);
            }
            let data = Bytes::copy_from_slice(&buf[*pos..*pos + len]);
            *pos += len;
            if &buf[*pos..*pos + 2] != b"\r\n" {
                return Err(ProtocolError::MissingCrlf);
            }
            *pos += 2;
            Ok(Frame::Bulk(data))
        }
        markers::ARRAY => {
            let len = read_integer(buf, pos)?;
            if len < 0 {
                return Ok(Frame::NullArray);
            }
            let len = len as usize;
            if len > MAX_ARGUMENTS {
                return Err(ProtocolError::TooManyElements {
                    count: len,
                    max: MAX_ARGUMENTS,
                });
            }
            let mut frames = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                frames.push(parse_at(buf, pos)?);
            }
            Ok(Frame::Array(frames))
        }
        _ => Err(ProtocolError::InvalidTypeMarker(marker)),
    }
}

/// Read a CRLF-terminated line at `*pos`, advancing past the terminator.
fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8], ProtocolError> {
    match find_crlf(&buf[*pos..]) {
        Some(offset) => {
            let line = &buf[*pos..*pos + offset];
            *pos += offset + 2;
            Ok(line)
        }
        None => Err(ProtocolError::Incomplete),
    }
}

/// Read an integer line at `*pos`.
fn read_integer(buf: &[u8], pos: &mut usize) -> Result<i64, ProtocolError> {
    let line = read_line(buf, pos)?;
    let s = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(s.parse()?)
}

/// Check if a byte is a RESP marker handled by the array-of-bulks grammar.
#[inline]
fn is_resp_marker(b: u8) -> bool {
    matches!(
        b,
        markers::SIMPLE_STRING
            | markers::ERROR
            | markers::INTEGER
            | markers::BULK_STRING
            | markers::ARRAY
            | markers::MAP
    )
}

/// Find CRLF in a byte slice.
///
/// memchr does the heavy lifting on `\r`; the following byte is then checked
/// for `\n`. A lone `\r` is skipped and the search continues.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    let mut offset = 0;
    while offset + 1 < buf.len() + 1 {
        match memchr(b'\r', &buf[offset..]) {
            Some(rel) => {
                let abs = offset + rel;
                if abs + 1 < buf.len() && buf[abs + 1] == b'\n' {
                    return Some(abs);
                }
                offset = abs + 1;
            }
            None => return None,
        }
    }
    None
}

/// Parse a single frame from a byte slice (for tests and one-shot parsing).
pub fn parse_frame(data: &[u8]) -> Result<Frame, ProtocolError> {
    let mut parser = RespParser::new();
    parser.extend(data);
    parser.parse()?.ok_or(ProtocolError::Incomplete)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_string() {
        let mut parser = RespParser::new();
        parser.extend(b"+OK\r\n");
        assert_eq!(
            parser.parse().unwrap().unwrap(),
            Frame::Simple("OK".to_string())
        );
        assert!(parser.is_empty());
    }

    #[test]
    fn test_parse_error() {
        let mut parser = RespParser::new();
        parser.extend(b"-ERR unknown command\r\n");
        assert_eq!(
            parser.parse().unwrap().unwrap(),
            Frame::Error("ERR unknown command".to_string())
        );
    }

    #[test]
    fn test_parse_integer() {
        let mut parser = RespParser::new();
        parser.extend(b":42\r\n:-1\r\n");
        assert_eq!(parser.parse().unwrap().unwrap(), Frame::Integer(42));
        assert_eq!(parser.parse().unwrap().unwrap(), Frame::Integer(-1));
    }

    #[test]
    fn test_parse_bulk_string() {
        let mut parser = RespParser::new();
        parser.extend(b"$5\r\nhello\r\n");
        assert_eq!(
            parser.parse().unwrap().unwrap(),
            Frame::Bulk(Bytes::from("hello"))
        );
    }

    #[test]
    fn test_parse_null_bulk() {
        let mut parser = RespParser::new();
        parser.extend(b"$-1\r\n");
        assert_eq!(parser.parse().unwrap().unwrap(), Frame::Null);
    }

    #[test]
    fn test_parse_null_array() {
        let mut parser = RespParser::new();
        parser.extend(b"*-1\r\n");
        assert_eq!(parser.parse().unwrap().unwrap(), Frame::NullArray);
    }

    #[test]
    fn test_parse_command_array() {
        let mut parser = RespParser::new();
        parser.extend(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n");

        match parser.parse().unwrap().unwrap() {
            Frame::Array(arr) => {
                assert_eq!(arr.len(), 3);
                assert_eq!(arr[0], Frame::Bulk(Bytes::from("SET")));
                assert_eq!(arr[1], Frame::Bulk(Bytes::from("key")));
                assert_eq!(arr[2], Frame::Bulk(Bytes::from("value")));
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_incomplete_bulk() {
        let mut parser = RespParser::new();
        parser.extend(b"$5\r\nhel");
        assert!(parser.parse().unwrap().is_none());

        parser.extend(b"lo\r\n");
        assert_eq!(
            parser.parse().unwrap().unwrap(),
            Frame::Bulk(Bytes::from("hello"))
        );
    }

    #[test]
    fn test_parse_streaming_array() {
        let mut parser = RespParser::new();

        parser.extend(b"*2\r\n");
        assert!(parser.parse().unwrap().is_none());

        parser.extend(b"$3\r\nfoo\r\n");
        assert!(parser.parse().unwrap().is_none());

        parser.extend(b"$3\r\nbar\r\n");
        match parser.parse().unwrap().unwrap() {
            Frame::Array(arr) => assert_eq!(arr.len(), 2),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_inline_command() {
        let mut parser = RespParser::new();
        parser.extend(b"SET key value\r\n");

        match parser.parse().unwrap().unwrap() {
            Frame::Array(arr) => {
                assert_eq!(arr.len(), 3);
                assert_eq!(arr[0], Frame::Bulk(Bytes::from("SET")));
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_pipelined_frames() {
        let mut parser = RespParser::new();
        parser.extend(b"+OK\r\n:42\r\n");

        assert_eq!(
            parser.parse().unwrap().unwrap(),
            Frame::Simple("OK".to_string())
        );
        assert_eq!(parser.parse().unwrap().unwrap(), Frame::Integer(42));
        assert!(parser.parse().unwrap().is_none());
    }

    #[test]
    fn test_bulk_too_large() {
        let mut parser = RespParser::new();
        let huge = MAX_BULK_SIZE + 1;
        parser.extend(format!("${huge}\r\n").as_bytes());
        assert!(matches!(
            parser.parse(),
            Err(ProtocolError::BulkTooLarge { .. })
        ));
    }

    #[test]
    fn test_array_too_large() {
        let mut parser = RespParser::new();
        let huge = MAX_ARGUMENTS + 1;
        parser.extend(format!("*{huge}\r\n").as_bytes());
        assert!(matches!(
            parser.parse(),
            Err(ProtocolError::TooManyElements { .. })
        ));
    }

    #[test]
    fn test_invalid_marker() {
        // '&' is not a marker and not a plausible inline command start, but
        // inline parsing accepts any non-marker byte, so it parses as text.
        let mut parser = RespParser::new();
        parser.extend(b"&bogus\r\n");
        assert!(parser.parse().unwrap().is_some());
    }

    #[test]
    fn test_find_crlf_edge_cases() {
        assert_eq!(find_crlf(b""), None);
        assert_eq!(find_crlf(b"\r"), None);
        assert_eq!(find_crlf(b"\n"), None);
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"hello\r\nworld"), Some(5));
        assert_eq!(find_crlf(b"hello\rworld"), None);
        assert_eq!(find_crlf(b"\r \r\n"), Some(2));
    }
}

/// Property-based tests using proptest.
#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Parser should never panic on arbitrary input.
        #[test]
        fn parser_never_panics(data: Vec<u8>) {
            let mut parser = RespParser::new();
            parser.extend(&data);
            let _ = parser.parse();
        }

        /// Bulk strings should round-trip through serialize + parse.
        #[test]
        fn bulk_string_roundtrip(data in prop::collection::vec(any::<u8>(), 0..1000)) {
            let frame = Frame::Bulk(Bytes::from(data.clone()));
            let encoded = frame.to_vec();
            let parsed = parse_frame(&encoded).unwrap();
            prop_assert_eq!(parsed, Frame::Bulk(Bytes::from(data)));
        }

        /// Integers should round-trip.
        #[test]
        fn integer_roundtrip(n in any::<i64>()) {
            let encoded = format!(":{n}\r\n");
            let parsed = parse_frame(encoded.as_bytes()).unwrap();
            prop_assert_eq!(parsed, Frame::Integer(n));
        }

        /// Command arrays of bulk strings round-trip.
        #[test]
        fn command_array_roundtrip(args in prop::collection::vec(
            prop::collection::vec(any::<u8>(), 0..100), 1..10)
        ) {
            let frame = Frame::Array(
                args.iter().map(|a| Frame::Bulk(Bytes::from(a.clone()))).collect()
            );
            let encoded = frame.to_vec();
            let parsed = parse_frame(&encoded).unwrap();
            prop_assert_eq!(parsed, frame);
        }
    }
}
