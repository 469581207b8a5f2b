//! RESP frame types.
//!
//! A [`Frame`] is a complete RESP message, either received from a client or
//! about to be written back. Frames are cheap to clone (`Bytes` payloads)
//! and serialize directly into a write buffer so each reply hits the socket
//! as one contiguous chunk.

use super::responses;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// A RESP frame representing a complete protocol message.
#[derive(Clone, PartialEq)]
pub enum Frame {
    /// Simple string (no newlines allowed)
    Simple(String),

    /// Error message
    Error(String),

    /// 64-bit signed integer
    Integer(i64),

    /// Bulk string (binary-safe)
    Bulk(Bytes),

    /// Null bulk string (`$-1`)
    Null,

    /// Null array (`*-1`), used for aborted EXEC and timed-out blocking pops
    NullArray,

    /// Array of frames
    Array(Vec<Frame>),

    /// RESP3 map (`%<n>`), only emitted for `HELLO 3`
    Map(Vec<(Frame, Frame)>),
}

impl Frame {
    /// Create a simple string frame.
    #[inline]
    pub fn simple(s: impl Into<String>) -> Self {
        Self::Simple(s.into())
    }

    /// Create an error frame.
    #[inline]
    pub fn error(s: impl Into<String>) -> Self {
        Self::Error(s.into())
    }

    /// Create a bulk string frame.
    #[inline]
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::Bulk(data.into())
    }

    /// Create an array frame.
    #[inline]
    pub fn array(frames: Vec<Frame>) -> Self {
        Self::Array(frames)
    }

    /// Create an OK response.
    #[inline]
    pub fn ok() -> Self {
        Self::Simple("OK".to_string())
    }

    /// Create a QUEUED response (for transactions).
    #[inline]
    pub fn queued() -> Self {
        Self::Simple("QUEUED".to_string())
    }

    /// Check if this is an error frame.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Try to get the frame as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Simple(s) | Self::Error(s) => Some(s),
            Self::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Try to get the frame as an array.
    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Convert the frame payload to owned `Bytes`, when it carries one.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            Self::Bulk(b) => Some(b.clone()),
            Self::Simple(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            _ => None,
        }
    }

    /// Serialize the frame into `buf`.
    pub fn serialize(&self, buf: &mut BytesMut) {
        match self {
            Self::Simple(s) => match s.as_str() {
                "OK" => buf.put_slice(responses::OK),
                "PONG" => buf.put_slice(responses::PONG),
                "QUEUED" => buf.put_slice(responses::QUEUED),
                _ => {
                    buf.put_u8(b'+');
                    buf.put_slice(s.as_bytes());
                    buf.put_slice(b"\r\n");
                }
            },
            Self::Error(s) => {
                buf.put_u8(b'-');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            Self::Integer(n) => {
                if let Some(static_resp) = responses::integer(*n) {
                    buf.put_slice(static_resp);
                } else {
                    buf.put_u8(b':');
                    buf.put_slice(n.to_string().as_bytes());
                    buf.put_slice(b"\r\n");
                }
            }
            Self::Bulk(data) => {
                if data.is_empty() {
                    buf.put_slice(responses::EMPTY_BULK);
                } else {
                    buf.put_u8(b'$');
                    buf.put_slice(data.len().to_string().as_bytes());
                    buf.put_slice(b"\r\n");
                    buf.put_slice(data);
                    buf.put_slice(b"\r\n");
                }
            }
            Self::Null => buf.put_slice(responses::NULL_BULK),
            Self::NullArray => buf.put_slice(responses::NULL_ARRAY),
            Self::Array(frames) => {
                if frames.is_empty() {
                    buf.put_slice(responses::EMPTY_ARRAY);
                } else {
                    buf.put_u8(b'*');
                    buf.put_slice(frames.len().to_string().as_bytes());
                    buf.put_slice(b"\r\n");
                    for frame in frames {
                        frame.serialize(buf);
                    }
                }
            }
            Self::Map(pairs) => {
                buf.put_u8(b'%');
                buf.put_slice(pairs.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for (k, v) in pairs {
                    k.serialize(buf);
                    v.serialize(buf);
                }
            }
        }
    }

    /// Convert to a `Vec<u8>` for convenience.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(64);
        self.serialize(&mut buf);
        buf.to_vec()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(s) => write!(f, "Simple({s:?})"),
            Self::Error(s) => write!(f, "Error({s:?})"),
            Self::Integer(n) => write!(f, "Integer({n})"),
            Self::Bulk(b) => {
                if let Ok(s) = std::str::from_utf8(b) {
                    write!(f, "Bulk({s:?})")
                } else {
                    write!(f, "Bulk({b:?})")
                }
            }
            Self::Null => write!(f, "Null"),
            Self::NullArray => write!(f, "NullArray"),
            Self::Array(arr) => f.debug_list().entries(arr.iter()).finish(),
            Self::Map(pairs) => f.debug_map().entries(pairs.iter().map(|(k, v)| (k, v))).finish(),
        }
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Self::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Self::Bulk(Bytes::from(s))
    }
}

impl From<Bytes> for Frame {
    fn from(b: Bytes) -> Self {
        Self::Bulk(b)
    }
}

impl From<i64> for Frame {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}
