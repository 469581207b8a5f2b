//! Redis Serialization Protocol (RESP) implementation.
//!
//! Commands arrive as RESP arrays of bulk strings; replies are serialized
//! from [`Frame`] values. The parser is streaming and bounded so a client
//! cannot force unbounded allocation with a single frame.

mod frame;
mod parser;
pub mod responses;

pub use frame::Frame;
pub use parser::{parse_frame, RespParser};

/// CRLF terminator bytes.
pub const CRLF: &[u8] = b"\r\n";

/// Type markers for RESP.
pub mod markers {
    /// Simple string: +
    pub const SIMPLE_STRING: u8 = b'+';
    /// Error: -
    pub const ERROR: u8 = b'-';
    /// Integer: :
    pub const INTEGER: u8 = b':';
    /// Bulk string: $
    pub const BULK_STRING: u8 = b'$';
    /// Array: *
    pub const ARRAY: u8 = b'*';
    /// RESP3 map: %
    pub const MAP: u8 = b'%';
}
