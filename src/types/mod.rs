//! Core custos types.
//!
//! The typed value model: binary-safe keys, the tagged value enum, and the
//! per-type collection implementations.

mod key;
mod list;
mod set;
pub mod json;
pub mod sorted_set;
mod stream;
mod value;

pub use key::Key;
pub use list::{CustosList, InsertWhere};
pub use set::CustosSet;
pub use sorted_set::{ScoreBound, SortedSet, SortedSetEntry};
pub use stream::{
    AddError, Consumer, ConsumerGroup, PendingEntry, Stream, StreamEntry, StreamId, StreamIdArg,
};
pub use value::{CustosValue, StoredValue};

use bytes::Bytes;
use std::collections::HashMap;

/// Type alias for hash values (field -> value mapping).
pub type CustosHash = HashMap<Bytes, Bytes>;

/// Database index type.
pub type DbIndex = u16;

/// Number of logical databases.
pub const DB_COUNT: DbIndex = 16;

/// Score type for sorted sets (IEEE 754 double).
pub type Score = f64;

/// Timestamp in milliseconds since Unix epoch.
pub type Timestamp = i64;

/// Get the current wall-clock time in milliseconds.
#[inline]
#[must_use]
pub fn current_timestamp_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Expiration time representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// No expiration
    #[default]
    Never,
    /// Expire at a specific timestamp (milliseconds since epoch)
    At(Timestamp),
}

impl Expiry {
    /// Create expiry from a TTL in seconds. A TTL of 0 expires immediately.
    #[must_use]
    pub fn from_seconds(seconds: i64) -> Self {
        Self::from_millis(seconds.saturating_mul(1000))
    }

    /// Create expiry from a TTL in milliseconds. A TTL of 0 expires immediately.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self::At(current_timestamp_ms().saturating_add(millis.max(0)))
    }

    /// Create expiry from a Unix timestamp in seconds.
    #[must_use]
    pub fn at_seconds(timestamp: i64) -> Self {
        Self::At(timestamp.saturating_mul(1000))
    }

    /// Create expiry from a Unix timestamp in milliseconds.
    #[must_use]
    pub fn at_millis(timestamp: i64) -> Self {
        Self::At(timestamp)
    }

    /// Check if this expiry has passed.
    #[inline]
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self {
            Self::Never => false,
            Self::At(ts) => current_timestamp_ms() >= *ts,
        }
    }

    /// Remaining TTL in milliseconds, or None when there is no expiry.
    #[must_use]
    pub fn ttl_millis(&self) -> Option<i64> {
        match self {
            Self::Never => None,
            Self::At(ts) => Some(ts.saturating_sub(current_timestamp_ms()).max(0)),
        }
    }

    /// Remaining TTL in seconds, or None when there is no expiry.
    #[must_use]
    pub fn ttl_seconds(&self) -> Option<i64> {
        self.ttl_millis().map(|ms| ms / 1000)
    }
}

/// The type tag of a stored value, as reported by the TYPE command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// String type
    String = 0,
    /// List type
    List = 1,
    /// Set type
    Set = 2,
    /// Hash type
    Hash = 3,
    /// Sorted set type
    ZSet = 4,
    /// Stream type
    Stream = 5,
    /// JSON document type
    Json = 6,
}

impl ValueType {
    /// The type name as used by the TYPE command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::List => "list",
            Self::Set => "set",
            Self::Hash => "hash",
            Self::ZSet => "zset",
            Self::Stream => "stream",
            Self::Json => "ReJSON-RL",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
