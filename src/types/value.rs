//! The polymorphic stored value.

use super::{CustosHash, CustosList, CustosSet, Expiry, SortedSet, Stream, ValueType};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;

/// A value that can hold any of the supported data types.
///
/// Collections sit behind `Arc<RwLock<..>>` so handlers can mutate them in
/// place while the keyspace map only stores a cheap handle. JSON documents
/// are immutable roots: a mutation deep-copies, edits, and swaps the `Arc`,
/// so a concurrent reader can never observe a partially applied update.
#[derive(Debug, Clone)]
pub enum CustosValue {
    /// String value (binary-safe bytes)
    String(Bytes),

    /// List value
    List(Arc<RwLock<CustosList>>),

    /// Set value
    Set(Arc<RwLock<CustosSet>>),

    /// Hash value (field -> value mapping)
    Hash(Arc<RwLock<CustosHash>>),

    /// Sorted set value
    ZSet(Arc<RwLock<SortedSet>>),

    /// Stream value (append-only log plus consumer groups)
    Stream(Arc<RwLock<Stream>>),

    /// JSON document
    Json(Arc<serde_json::Value>),
}

impl CustosValue {
    /// Create a new string value.
    #[inline]
    pub fn string(data: impl Into<Bytes>) -> Self {
        Self::String(data.into())
    }

    /// Create a new empty list.
    #[inline]
    pub fn new_list() -> Self {
        Self::List(Arc::new(RwLock::new(CustosList::new())))
    }

    /// Create a new empty set.
    #[inline]
    pub fn new_set() -> Self {
        Self::Set(Arc::new(RwLock::new(CustosSet::new())))
    }

    /// Create a new empty hash.
    #[inline]
    pub fn new_hash() -> Self {
        Self::Hash(Arc::new(RwLock::new(CustosHash::new())))
    }

    /// Create a new empty sorted set.
    #[inline]
    pub fn new_zset() -> Self {
        Self::ZSet(Arc::new(RwLock::new(SortedSet::new())))
    }

    /// Create a new empty stream.
    #[inline]
    pub fn new_stream() -> Self {
        Self::Stream(Arc::new(RwLock::new(Stream::new())))
    }

    /// Create a JSON value from a parsed document.
    #[inline]
    pub fn json(doc: serde_json::Value) -> Self {
        Self::Json(Arc::new(doc))
    }

    /// Returns the type of this value.
    #[inline]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::List(_) => ValueType::List,
            Self::Set(_) => ValueType::Set,
            Self::Hash(_) => ValueType::Hash,
            Self::ZSet(_) => ValueType::ZSet,
            Self::Stream(_) => ValueType::Stream,
            Self::Json(_) => ValueType::Json,
        }
    }

    /// Try to get a reference to the string payload.
    #[inline]
    pub fn as_string(&self) -> Option<&Bytes> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get a handle to the list payload.
    #[inline]
    pub fn as_list(&self) -> Option<&Arc<RwLock<CustosList>>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Try to get a handle to the set payload.
    #[inline]
    pub fn as_set(&self) -> Option<&Arc<RwLock<CustosSet>>> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get a handle to the hash payload.
    #[inline]
    pub fn as_hash(&self) -> Option<&Arc<RwLock<CustosHash>>> {
        match self {
            Self::Hash(h) => Some(h),
            _ => None,
        }
    }

    /// Try to get a handle to the sorted set payload.
    #[inline]
    pub fn as_zset(&self) -> Option<&Arc<RwLock<SortedSet>>> {
        match self {
            Self::ZSet(z) => Some(z),
            _ => None,
        }
    }

    /// Try to get a handle to the stream payload.
    #[inline]
    pub fn as_stream(&self) -> Option<&Arc<RwLock<Stream>>> {
        match self {
            Self::Stream(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get the JSON document root.
    #[inline]
    pub fn as_json(&self) -> Option<&Arc<serde_json::Value>> {
        match self {
            Self::Json(j) => Some(j),
            _ => None,
        }
    }

    /// Number of elements; byte length for strings.
    pub fn len(&self) -> usize {
        match self {
            Self::String(s) => s.len(),
            Self::List(l) => l.read().len(),
            Self::Set(s) => s.read().len(),
            Self::Hash(h) => h.read().len(),
            Self::ZSet(z) => z.read().len(),
            Self::Stream(st) => st.read().len(),
            Self::Json(_) => 1,
        }
    }

    /// Returns true if this value is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A collection value that has lost its last element disappears from
    /// the keyspace. Strings and JSON documents persist even when empty;
    /// a stream survives while it still owns consumer groups.
    pub fn is_gone(&self) -> bool {
        match self {
            Self::List(l) => l.read().is_empty(),
            Self::Set(s) => s.read().is_empty(),
            Self::Hash(h) => h.read().is_empty(),
            Self::ZSet(z) => z.read().is_empty(),
            Self::Stream(st) => {
                let guard = st.read();
                guard.is_empty() && guard.group_count() == 0
            }
            Self::String(_) | Self::Json(_) => false,
        }
    }
}

impl From<&str> for CustosValue {
    fn from(s: &str) -> Self {
        Self::String(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for CustosValue {
    fn from(s: String) -> Self {
        Self::String(Bytes::from(s))
    }
}

impl From<Bytes> for CustosValue {
    fn from(b: Bytes) -> Self {
        Self::String(b)
    }
}

impl From<i64> for CustosValue {
    fn from(n: i64) -> Self {
        Self::String(Bytes::from(n.to_string()))
    }
}

/// A stored value with its expiration record.
#[derive(Debug, Clone)]
pub struct StoredValue {
    /// The actual value
    pub value: CustosValue,
    /// Optional expiration time
    pub expiry: Expiry,
}

impl StoredValue {
    /// Create a new stored value with no expiration.
    #[inline]
    pub fn new(value: CustosValue) -> Self {
        Self {
            value,
            expiry: Expiry::Never,
        }
    }

    /// Create a new stored value with expiration.
    #[inline]
    pub fn with_expiry(value: CustosValue, expiry: Expiry) -> Self {
        Self { value, expiry }
    }

    /// Check if this value has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expiry.is_expired()
    }
}
