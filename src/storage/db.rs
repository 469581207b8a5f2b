//! Keyspace implementation.
//!
//! A [`Db`] is one logical database: a sharded map from keys to stored
//! values, an expiration index, and a version index. The version index
//! holds a per-key counter bumped inside every write path (including
//! deletion and expiry removal) and is never pruned, so a WATCH fingerprint
//! taken before a delete/recreate cycle can never collide with the state
//! after it.
//!
//! [`Database`] owns the 16 databases plus the server-wide shared pieces:
//! auth configuration, the pub/sub hub, and persistence statistics.

use crate::error::{CommandError, Error, Result};
use crate::server::pubsub::{PubSubHub, SharedPubSubHub};
use crate::types::{
    current_timestamp_ms, CustosValue, DbIndex, Expiry, Key, StoredValue, StreamId, Timestamp,
    ValueType, DB_COUNT,
};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared server authentication configuration.
#[derive(Debug, Default)]
pub struct ServerAuth {
    /// The required password (None = no auth required)
    requirepass: RwLock<Option<String>>,
}

impl ServerAuth {
    /// Create a new ServerAuth with an optional password.
    pub fn new(requirepass: Option<String>) -> Self {
        Self {
            requirepass: RwLock::new(requirepass),
        }
    }

    /// Check if authentication is required.
    pub fn is_auth_required(&self) -> bool {
        self.requirepass.read().is_some()
    }

    /// Validate a password in constant time.
    pub fn validate_password(&self, password: &str) -> bool {
        use subtle::ConstantTimeEq;
        match self.requirepass.read().as_ref() {
            None => true,
            Some(required) => password.as_bytes().ct_eq(required.as_bytes()).into(),
        }
    }

    /// Get the required password (for CONFIG GET).
    pub fn get_requirepass(&self) -> Option<String> {
        self.requirepass.read().clone()
    }

    /// Set the required password (for CONFIG SET).
    pub fn set_requirepass(&self, password: Option<String>) {
        *self.requirepass.write() = password;
    }
}

/// Shared server auth reference.
pub type SharedServerAuth = Arc<ServerAuth>;

/// Server-wide statistics shared between the databases, the dispatcher and
/// the persistence tasks.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Currently connected clients
    pub connected_clients: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,
    /// Write operations since the last completed snapshot
    pub dirty: AtomicU64,
    /// Last snapshot save time (Unix seconds)
    pub last_save_time: AtomicU64,
    /// Background snapshot in progress
    pub bgsave_in_progress: AtomicBool,
    /// AOF rewrite in progress
    pub aof_rewrite_in_progress: AtomicBool,
}

impl ServerStats {
    /// Record a data modification (for snapshot change tracking).
    #[inline]
    pub fn record_modification(&self) {
        self.dirty.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a snapshot save completed.
    pub fn save_completed(&self) {
        self.bgsave_in_progress.store(false, Ordering::Relaxed);
        self.dirty.store(0, Ordering::Relaxed);
        self.last_save_time.store(
            (current_timestamp_ms() / 1000) as u64,
            Ordering::Relaxed,
        );
    }

    /// Increment connection counters.
    pub fn connection_opened(&self) {
        self.connected_clients.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the connected-client counter.
    pub fn connection_closed(&self) {
        self.connected_clients.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Shared server statistics reference.
pub type SharedServerStats = Arc<ServerStats>;

/// WATCH fingerprint: `(db epoch, key version)`.
///
/// The epoch bumps on whole-database mutations (FLUSHDB, SWAPDB), the
/// version on per-key writes, so EXEC fails whenever any write touched the
/// watched key between WATCH and EXEC.
pub type Fingerprint = (u64, u64);

/// Per-database statistics.
#[derive(Debug, Default)]
pub struct DbStats {
    /// Lookups that found a live key
    pub hits: AtomicU64,
    /// Lookups that missed
    pub misses: AtomicU64,
    /// Keys removed by expiration
    pub expired_keys: AtomicU64,
}

/// A single logical database (one of 16).
#[derive(Debug)]
pub struct Db {
    /// Main key-value store
    data: DashMap<Key, StoredValue>,

    /// Keys with expiration times, for efficient expiry sampling
    expires: DashMap<Key, Timestamp>,

    /// Per-key write counters; retained after deletion
    versions: DashMap<Key, u64>,

    /// Whole-database mutation counter (FLUSHDB, SWAPDB)
    epoch: AtomicU64,

    /// Atomic window: commands hold this shared, EXEC and multi-db
    /// commands hold it exclusive
    guard: tokio::sync::RwLock<()>,

    /// Statistics
    stats: DbStats,

    /// Server-wide statistics, for snapshot change tracking
    server_stats: SharedServerStats,
}

impl Db {
    /// Create a new empty database.
    pub fn new(server_stats: SharedServerStats) -> Self {
        Self {
            data: DashMap::new(),
            expires: DashMap::new(),
            versions: DashMap::new(),
            epoch: AtomicU64::new(0),
            guard: tokio::sync::RwLock::new(()),
            stats: DbStats::default(),
            server_stats,
        }
    }

    /// The atomic-window guard for this database.
    #[inline]
    pub fn guard(&self) -> &tokio::sync::RwLock<()> {
        &self.guard
    }

    /// Count of live (non-expired) keys.
    pub fn len(&self) -> usize {
        let now = current_timestamp_ms();
        let expired = self
            .expires
            .iter()
            .filter(|entry| *entry.value() <= now)
            .count();
        self.data.len().saturating_sub(expired)
    }

    /// Check if the database holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bump_version(&self, key: &Key) {
        *self.versions.entry(key.clone()).or_insert(0) += 1;
        self.server_stats.record_modification();
    }

    /// The WATCH fingerprint of a key in its current state.
    pub fn fingerprint(&self, key: &Key) -> Fingerprint {
        (
            self.epoch.load(Ordering::Acquire),
            self.versions.get(key).map(|v| *v).unwrap_or(0),
        )
    }

    /// Get a value by key. Expired keys are deleted on sight and reported
    /// as absent.
    pub fn get(&self, key: &Key) -> Option<CustosValue> {
        let entry = self.data.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.remove_expired(key);
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Get a value, checking its type tag.
    pub fn get_typed(&self, key: &Key, expected: ValueType) -> Result<Option<CustosValue>> {
        match self.get(key) {
            Some(value) if value.value_type() == expected => Ok(Some(value)),
            Some(_) => Err(Error::Command(CommandError::WrongType)),
            None => Ok(None),
        }
    }

    /// Get a string value.
    pub fn get_string(&self, key: &Key) -> Result<Option<Bytes>> {
        match self.get(key) {
            Some(CustosValue::String(s)) => Ok(Some(s)),
            Some(_) => Err(Error::Command(CommandError::WrongType)),
            None => Ok(None),
        }
    }

    /// Store a value with string-write semantics: any prior expiration is
    /// cleared (plain SET clears TTL).
    pub fn set(&self, key: Key, value: CustosValue) {
        self.set_with_expiry(key, value, Expiry::Never);
    }

    /// Store a value with an explicit expiration record.
    pub fn set_with_expiry(&self, key: Key, value: CustosValue, expiry: Expiry) {
        match expiry {
            Expiry::Never => {
                self.expires.remove(&key);
            }
            Expiry::At(ts) => {
                self.expires.insert(key.clone(), ts);
            }
        }
        self.bump_version(&key);
        self.data.insert(key, StoredValue::with_expiry(value, expiry));
    }

    /// Write back a collection value after an in-place mutation.
    ///
    /// Preserves any existing expiration, bumps the key version, and
    /// applies the last-element-removed rule: a collection that has become
    /// empty disappears from the keyspace.
    pub fn store(&self, key: Key, value: CustosValue) {
        if value.is_gone() {
            self.delete(&key);
            return;
        }

        self.bump_version(&key);
        match self.data.get_mut(&key) {
            Some(mut entry) => {
                entry.value = value;
            }
            None => {
                self.data.insert(key, StoredValue::new(value));
            }
        }
    }

    /// Delete a key. Returns true when it existed.
    pub fn delete(&self, key: &Key) -> bool {
        self.expires.remove(key);
        let existed = self.data.remove(key).is_some();
        if existed {
            self.bump_version(key);
        }
        existed
    }

    /// Remove a key found expired. Counts toward the expired statistic and,
    /// like any removal, bumps the version.
    fn remove_expired(&self, key: &Key) {
        if self.delete(key) {
            self.stats.expired_keys.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Check if a key exists (and is not expired).
    pub fn exists(&self, key: &Key) -> bool {
        match self.data.get(key) {
            Some(entry) if entry.is_expired() => {
                drop(entry);
                self.remove_expired(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// The type tag of a key's value.
    pub fn key_type(&self, key: &Key) -> Option<ValueType> {
        self.get(key).map(|v| v.value_type())
    }

    /// Install or replace an expiration record. Returns false when the key
    /// does not exist.
    pub fn expire(&self, key: &Key, expiry: Expiry) -> bool {
        let Some(mut entry) = self.data.get_mut(key) else {
            return false;
        };
        if entry.is_expired() {
            return false;
        }

        entry.expiry = expiry;
        drop(entry);

        match expiry {
            Expiry::Never => {
                self.expires.remove(key);
            }
            Expiry::At(ts) => {
                self.expires.insert(key.clone(), ts);
            }
        }
        self.bump_version(key);
        true
    }

    /// Remove the expiration record (PERSIST). Returns true when a record
    /// was removed.
    pub fn persist(&self, key: &Key) -> bool {
        let Some(mut entry) = self.data.get_mut(key) else {
            return false;
        };
        if entry.is_expired() || entry.expiry == Expiry::Never {
            return false;
        }
        entry.expiry = Expiry::Never;
        drop(entry);
        self.expires.remove(key);
        self.bump_version(key);
        true
    }

    /// TTL in seconds: -2 when absent, -1 when persistent.
    pub fn ttl(&self, key: &Key) -> i64 {
        self.pttl_raw(key).map(|ms| {
            if ms < 0 {
                ms
            } else {
                ms / 1000
            }
        })
        .unwrap_or(-2)
    }

    /// TTL in milliseconds: -2 when absent, -1 when persistent.
    pub fn pttl(&self, key: &Key) -> i64 {
        self.pttl_raw(key).unwrap_or(-2)
    }

    fn pttl_raw(&self, key: &Key) -> Option<i64> {
        let entry = self.data.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.remove_expired(key);
            return None;
        }
        Some(entry.expiry.ttl_millis().unwrap_or(-1))
    }

    /// The raw expiration instant of a key, when it has one.
    pub fn expire_at(&self, key: &Key) -> Option<Timestamp> {
        self.expires.get(key).map(|ts| *ts)
    }

    /// All live keys matching a glob pattern (KEYS).
    pub fn keys(&self, pattern: &[u8]) -> Vec<Key> {
        let now = current_timestamp_ms();
        self.data
            .iter()
            .filter(|entry| match entry.value().expiry {
                Expiry::At(ts) => ts > now,
                Expiry::Never => true,
            })
            .filter(|entry| entry.key().matches_pattern(pattern))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Cursor scan (SCAN). The cursor is a position into the sharded map's
    /// iteration order; keys may be revisited under concurrent mutation but
    /// every key that persists through the scan is eventually returned.
    pub fn scan(&self, cursor: usize, pattern: Option<&[u8]>, count: usize) -> (usize, Vec<Key>) {
        let now = current_timestamp_ms();
        // The command layer rejects COUNT 0; a zero here must still not
        // produce an empty page with a non-zero cursor forever.
        let count = count.max(1);

        let mut keys = Vec::new();
        let mut next_cursor = 0;

        for (idx, entry) in self.data.iter().enumerate() {
            if idx < cursor {
                continue;
            }
            match entry.value().expiry {
                Expiry::At(ts) if ts <= now => continue,
                _ => {}
            }
            let matched = pattern
                .map(|p| entry.key().matches_pattern(p))
                .unwrap_or(true);
            if matched {
                keys.push(entry.key().clone());
            }
            if keys.len() >= count {
                next_cursor = idx + 1;
                break;
            }
        }

        if keys.len() < count {
            next_cursor = 0;
        }
        (next_cursor, keys)
    }

    /// A uniformly random live key (RANDOMKEY).
    pub fn random_key(&self) -> Option<Key> {
        let mut rng = rand::thread_rng();
        let now = current_timestamp_ms();

        // A handful of attempts so a database full of expired keys does not
        // spin forever.
        for _ in 0..8 {
            let entry = self.data.iter().choose(&mut rng)?;
            match entry.value().expiry {
                Expiry::At(ts) if ts <= now => continue,
                _ => return Some(entry.key().clone()),
            }
        }
        None
    }

    /// Delete all keys (FLUSHDB).
    pub fn flush(&self) {
        self.data.clear();
        self.expires.clear();
        self.versions.clear();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.server_stats.record_modification();
    }

    /// Bump the epoch. Called when the database is swapped to a different
    /// index, which invalidates every outstanding fingerprint against it.
    pub fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Sample and purge expired keys (background housekeeping).
    ///
    /// Returns `(sampled, removed)`.
    pub fn expire_cycle(&self, max_keys: usize) -> (usize, usize) {
        let now = current_timestamp_ms();

        let mut sampled = 0;
        let mut victims = Vec::new();
        for entry in self.expires.iter() {
            if sampled >= max_keys {
                break;
            }
            sampled += 1;
            if *entry.value() <= now {
                victims.push(entry.key().clone());
            }
        }

        let mut removed = 0;
        for key in victims {
            // Re-check under the entry: a write may have replaced the
            // expiration since sampling.
            let still_expired = self
                .expires
                .get(&key)
                .map(|ts| *ts <= now)
                .unwrap_or(false);
            if still_expired {
                self.remove_expired(&key);
                removed += 1;
            }
        }
        (sampled, removed)
    }

    /// Take a key's full entry out of the database (MOVE source side).
    pub fn take_entry(&self, key: &Key) -> Option<StoredValue> {
        let (_, stored) = self.data.remove(key)?;
        self.expires.remove(key);
        self.bump_version(key);
        if stored.is_expired() {
            self.stats.expired_keys.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Some(stored)
    }

    /// Insert a full entry (MOVE destination side). Preserves the entry's
    /// expiration record.
    pub fn put_entry(&self, key: Key, stored: StoredValue) {
        match stored.expiry {
            Expiry::At(ts) => {
                self.expires.insert(key.clone(), ts);
            }
            Expiry::Never => {
                self.expires.remove(&key);
            }
        }
        self.bump_version(&key);
        self.data.insert(key, stored);
    }

    /// Database statistics.
    pub fn stats(&self) -> &DbStats {
        &self.stats
    }

    /// Dump every live key for persistence (snapshot save, AOF rewrite).
    pub fn dump(&self) -> Vec<KeyDump> {
        let now = current_timestamp_ms();
        let mut out = Vec::with_capacity(self.data.len());

        for entry in self.data.iter() {
            let expire_at = match entry.value().expiry {
                Expiry::At(ts) if ts <= now => continue,
                Expiry::At(ts) => Some(ts),
                Expiry::Never => None,
            };

            let payload = match &entry.value().value {
                CustosValue::String(s) => ValuePayload::String(s.clone()),
                CustosValue::List(l) => ValuePayload::List(l.read().iter().cloned().collect()),
                CustosValue::Set(s) => ValuePayload::Set(s.read().members()),
                CustosValue::Hash(h) => ValuePayload::Hash(
                    h.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                ),
                CustosValue::ZSet(z) => ValuePayload::ZSet(
                    z.read().iter().map(|e| (e.member, e.score)).collect(),
                ),
                CustosValue::Stream(st) => {
                    let guard = st.read();
                    ValuePayload::Stream {
                        entries: guard.range(StreamId::MIN, StreamId::MAX, None),
                        last_id: guard.last_id(),
                        entries_added: guard.entries_added(),
                        groups: guard
                            .groups()
                            .map(|(name, group)| GroupDump {
                                name: name.clone(),
                                last_delivered: group.last_delivered,
                                consumers: group
                                    .consumers
                                    .iter()
                                    .map(|(n, c)| (n.clone(), c.pending))
                                    .collect(),
                                pending: group
                                    .pending
                                    .iter()
                                    .map(|(id, p)| {
                                        (*id, p.consumer.clone(), p.delivery_time_ms, p.delivery_count)
                                    })
                                    .collect(),
                            })
                            .collect(),
                    }
                }
                CustosValue::Json(doc) => ValuePayload::Json(doc.to_string()),
            };

            out.push(KeyDump {
                key: entry.key().clone(),
                expire_at,
                payload,
            });
        }
        out
    }
}

/// One key's worth of dumped state.
#[derive(Debug, Clone)]
pub struct KeyDump {
    /// The key
    pub key: Key,
    /// Absolute expiration instant, if any
    pub expire_at: Option<Timestamp>,
    /// The value payload
    pub payload: ValuePayload,
}

/// Dumped value payload, by type.
#[derive(Debug, Clone)]
pub enum ValuePayload {
    /// String bytes
    String(Bytes),
    /// List elements, front to back
    List(Vec<Bytes>),
    /// Set members
    Set(Vec<Bytes>),
    /// Hash fields
    Hash(Vec<(Bytes, Bytes)>),
    /// Sorted-set members with scores, in order
    ZSet(Vec<(Bytes, f64)>),
    /// Stream entries plus bookkeeping
    Stream {
        /// Live entries in ID order
        entries: Vec<crate::types::StreamEntry>,
        /// Last assigned ID
        last_id: StreamId,
        /// Total entries ever added
        entries_added: u64,
        /// Consumer groups
        groups: Vec<GroupDump>,
    },
    /// JSON document, serialized
    Json(String),
}

/// A dumped consumer group.
#[derive(Debug, Clone)]
pub struct GroupDump {
    /// Group name
    pub name: Bytes,
    /// Last delivered ID
    pub last_delivered: StreamId,
    /// Consumers: (name, pending count)
    pub consumers: Vec<(Bytes, u64)>,
    /// Pending entries: (id, consumer, delivery time ms, delivery count)
    pub pending: Vec<(StreamId, Bytes, i64, u64)>,
}

/// The database manager holding all 16 logical databases.
#[derive(Debug)]
pub struct Database {
    /// The databases; the slot array is swappable for SWAPDB
    dbs: RwLock<[Arc<Db>; DB_COUNT as usize]>,
    /// Shared pub/sub hub
    pubsub: SharedPubSubHub,
    /// Shared authentication configuration
    server_auth: SharedServerAuth,
    /// Server-wide statistics
    server_stats: SharedServerStats,
}

impl Database {
    /// Create a new database manager without authentication.
    pub fn new() -> Self {
        Self::with_password(None)
    }

    /// Create a new database manager with an optional password.
    pub fn with_password(requirepass: Option<String>) -> Self {
        let server_stats = Arc::new(ServerStats::default());
        let dbs = std::array::from_fn(|_| Arc::new(Db::new(server_stats.clone())));

        Self {
            dbs: RwLock::new(dbs),
            pubsub: Arc::new(PubSubHub::new()),
            server_auth: Arc::new(ServerAuth::new(requirepass)),
            server_stats,
        }
    }

    /// Get a database by index.
    pub fn get_db(&self, index: DbIndex) -> Result<Arc<Db>> {
        if index >= DB_COUNT {
            return Err(Error::Command(CommandError::DbIndexOutOfRange));
        }
        Ok(self.dbs.read()[index as usize].clone())
    }

    /// The pub/sub hub.
    #[inline]
    pub fn pubsub(&self) -> &SharedPubSubHub {
        &self.pubsub
    }

    /// The authentication configuration.
    #[inline]
    pub fn server_auth(&self) -> &SharedServerAuth {
        &self.server_auth
    }

    /// The server statistics.
    #[inline]
    pub fn server_stats(&self) -> &SharedServerStats {
        &self.server_stats
    }

    /// Exchange two databases in place (SWAPDB). Callers must already hold
    /// both databases' guards exclusively, in increasing index order.
    pub fn swap_dbs(&self, a: DbIndex, b: DbIndex) -> Result<()> {
        if a >= DB_COUNT || b >= DB_COUNT {
            return Err(Error::Command(CommandError::DbIndexOutOfRange));
        }
        let mut dbs = self.dbs.write();
        dbs[a as usize].bump_epoch();
        dbs[b as usize].bump_epoch();
        dbs.swap(a as usize, b as usize);
        self.server_stats.record_modification();
        Ok(())
    }

    /// Total live keys across all databases.
    pub fn total_keys(&self) -> usize {
        let dbs = self.dbs.read();
        dbs.iter().map(|db| db.len()).sum()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
