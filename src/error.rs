//! Error types for custos.
//!
//! Every failure that can be expressed inline on the wire renders to a RESP
//! error string via [`Error::to_resp_error`]; framing failures close the
//! connection instead.

use std::io;
use std::net::AddrParseError;
use std::num::{ParseFloatError, ParseIntError};
use thiserror::Error;

/// Result type alias for custos operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for custos.
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol parsing errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Command execution errors
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Authentication errors
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Connection errors
    #[error("connection error: {0}")]
    Connection(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),

    /// Address parsing error
    #[error("address parse error: {0}")]
    AddrParse(#[from] AddrParseError),
}

/// Protocol-level errors during RESP parsing.
///
/// These indicate a malformed or oversized frame; the connection that
/// produced one is closed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Invalid RESP data type marker
    #[error("invalid type marker: {0:?}")]
    InvalidTypeMarker(u8),

    /// Invalid UTF-8 in simple string
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Line too long (exceeds inline limit)
    #[error("line too long: {len} bytes (max: {max})")]
    LineTooLong {
        /// Actual line length in bytes
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Bulk string too large
    #[error("bulk string too large: {len} bytes (max: {max})")]
    BulkTooLarge {
        /// Actual bulk string length in bytes
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Too many array elements
    #[error("too many array elements: {count} (max: {max})")]
    TooManyElements {
        /// Actual element count
        count: usize,
        /// Maximum allowed count
        max: usize,
    },

    /// Missing CRLF terminator
    #[error("missing CRLF terminator")]
    MissingCrlf,

    /// Incomplete frame - need more data
    #[error("incomplete frame, need more data")]
    Incomplete,
}

/// Command execution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// Wrong number of arguments
    #[error("ERR wrong number of arguments for '{command}' command")]
    WrongArity {
        /// Command name that received wrong arity
        command: String,
    },

    /// Wrong type for operation
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Syntax error
    #[error("ERR syntax error")]
    SyntaxError,

    /// Not an integer
    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    /// Not a float
    #[error("ERR value is not a valid float")]
    NotFloat,

    /// Negative count where a positive one is required
    #[error("ERR value is out of range, must be positive")]
    MustBePositive,

    /// Score range bound is not a float
    #[error("ERR min or max is not a float")]
    NotScoreBound,

    /// Invalid cursor
    #[error("ERR invalid cursor")]
    InvalidCursor,

    /// No such key
    #[error("ERR no such key")]
    NoSuchKey,

    /// Invalid expire time
    #[error("ERR invalid expire time")]
    InvalidExpireTime,

    /// Index out of bounds
    #[error("ERR index out of range")]
    IndexOutOfRange,

    /// Database index out of range
    #[error("ERR DB index is out of range")]
    DbIndexOutOfRange,

    /// Nested MULTI call
    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    /// EXEC without MULTI
    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    /// DISCARD without MULTI
    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    /// WATCH inside MULTI
    #[error("ERR WATCH inside MULTI is not allowed")]
    WatchInsideMulti,

    /// Invalid stream ID
    #[error("ERR Invalid stream ID specified as stream command argument")]
    StreamInvalidId,

    /// Stream ID is equal or smaller than the target stream top item
    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    /// Consumer group already exists
    #[error("BUSYGROUP Consumer Group name already exists")]
    BusyGroup,

    /// Consumer group does not exist
    #[error("NOGROUP No such consumer group '{group}' for key name '{key}'")]
    NoGroup {
        /// Group name
        group: String,
        /// Stream key
        key: String,
    },

    /// JSON path could not be parsed or resolved
    #[error("ERR path '{0}' does not exist")]
    JsonPathNotFound(String),

    /// Snapshot save failed (surfaced by SAVE)
    #[error("ERR save failed")]
    SaveFailed,

    /// Command not allowed in subscriber mode
    #[error(
        "ERR Can't execute '{0}': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT are allowed in this context"
    )]
    SubscriberMode(String),
}

/// Storage-level errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Persistence error
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Corrupted data
    #[error("corrupted data: {0}")]
    Corrupted(String),

    /// Checksum mismatch
    #[error("checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Expected checksum value
        expected: u64,
        /// Actual computed checksum
        actual: u64,
    },

    /// Version mismatch
    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Authentication errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Invalid password
    #[error("WRONGPASS invalid username-password pair or user is disabled.")]
    WrongPassword,

    /// Authentication required
    #[error("NOAUTH Authentication required.")]
    AuthRequired,

    /// AUTH sent while no password is configured
    #[error("ERR Client sent AUTH, but no password is set.")]
    NoPasswordSet,
}

impl Error {
    /// Converts the error to a RESP error response string.
    ///
    /// Command and auth errors already carry their wire tag; everything else
    /// is reported under the generic `ERR` tag.
    #[must_use]
    pub fn to_resp_error(&self) -> String {
        match self {
            Error::Command(e) => e.to_string(),
            Error::Auth(e) => e.to_string(),
            Error::Protocol(e) => format!("ERR protocol error: {e}"),
            Error::Storage(e) => format!("ERR {e}"),
            Error::Io(e) => format!("ERR I/O error: {e}"),
            Error::Connection(e) => format!("ERR connection error: {e}"),
            Error::Config(e) => format!("ERR configuration error: {e}"),
            Error::Internal(e) => format!("ERR internal error: {e}"),
            Error::AddrParse(e) => format!("ERR address parse error: {e}"),
        }
    }

    /// Returns true if this is a client error rather than a server fault.
    #[inline]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::Command(_) | Error::Auth(_)
        )
    }
}

impl From<ParseIntError> for ProtocolError {
    fn from(e: ParseIntError) -> Self {
        ProtocolError::InvalidInteger(e.to_string())
    }
}

impl From<ParseFloatError> for ProtocolError {
    fn from(e: ParseFloatError) -> Self {
        ProtocolError::InvalidInteger(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrongtype_wire_format() {
        let err = Error::Command(CommandError::WrongType);
        assert_eq!(
            err.to_resp_error(),
            "WRONGTYPE Operation against a key holding the wrong kind of value"
        );
    }

    #[test]
    fn test_arity_error_display() {
        let err = Error::Command(CommandError::WrongArity {
            command: "get".to_string(),
        });
        assert_eq!(
            err.to_resp_error(),
            "ERR wrong number of arguments for 'get' command"
        );
    }

    #[test]
    fn test_stream_ordering_error() {
        let err = Error::Command(CommandError::StreamIdTooSmall);
        assert!(err.to_resp_error().starts_with("ERR The ID specified in XADD"));
    }

    #[test]
    fn test_auth_errors_carry_tags() {
        assert!(Error::Auth(AuthError::AuthRequired)
            .to_resp_error()
            .starts_with("NOAUTH"));
        assert!(Error::Auth(AuthError::WrongPassword)
            .to_resp_error()
            .starts_with("WRONGPASS"));
    }

    #[test]
    fn test_nogroup_error() {
        let err = Error::Command(CommandError::NoGroup {
            group: "g".into(),
            key: "s".into(),
        });
        assert!(err.to_resp_error().starts_with("NOGROUP"));
    }
}
