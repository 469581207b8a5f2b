//! Storage engine.
//!
//! In-memory keyspace over 16 logical databases, with lazy expiration,
//! per-key version counters for optimistic transactions, and a background
//! expiry sampler.

mod db;
mod expiry;

pub use db::{
    Database, Db, DbStats, Fingerprint, GroupDump, KeyDump, ServerAuth, ServerStats,
    SharedServerAuth, SharedServerStats, ValuePayload,
};
pub use expiry::ExpiryManager;
