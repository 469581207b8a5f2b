//! Per-connection client state.

use super::pubsub::PubSubMessage;
use crate::storage::Fingerprint;
use crate::types::{DbIndex, Key};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use tokio::sync::broadcast;

/// A queued command awaiting EXEC.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    /// Command name (uppercase)
    pub name: String,
    /// Command arguments
    pub args: Vec<Bytes>,
}

/// Pub/sub subscription state: receivers keyed by channel and by pattern.
#[derive(Debug, Default)]
pub struct PubSubState {
    /// Subscribed channels with their receivers
    pub channel_receivers: HashMap<Bytes, broadcast::Receiver<PubSubMessage>>,
    /// Subscribed patterns with their receivers
    pub pattern_receivers: HashMap<Bytes, broadcast::Receiver<PubSubMessage>>,
}

impl PubSubState {
    /// Total subscription count.
    pub fn subscription_count(&self) -> usize {
        self.channel_receivers.len() + self.pattern_receivers.len()
    }
}

/// Per-connection state: selected database, authentication, transaction
/// context, and subscriber state.
#[derive(Debug)]
pub struct ClientState {
    /// Connection ID
    id: u64,
    /// Peer address, for slowlog and MONITOR lines
    addr: String,
    /// Selected database index
    db_index: AtomicU16,
    /// Client name (CLIENT SETNAME)
    name: RwLock<Option<String>>,
    /// Authenticated flag
    authenticated: AtomicBool,
    /// RESP protocol version negotiated via HELLO
    protocol: AtomicU8,
    /// In a MULTI block
    in_transaction: AtomicBool,
    /// Commands queued for EXEC
    transaction_queue: RwLock<Vec<QueuedCommand>>,
    /// WATCH snapshots: (db, key) -> fingerprint at WATCH time
    watched: RwLock<HashMap<(DbIndex, Key), Fingerprint>>,
    /// Connection close requested
    closed: AtomicBool,
    /// Pub/sub receivers
    pubsub: RwLock<PubSubState>,
    /// In subscriber mode (at least one subscription)
    in_pubsub_mode: AtomicBool,
}

impl ClientState {
    /// Create a new client state.
    pub fn new(id: u64, addr: String) -> Self {
        Self {
            id,
            addr,
            db_index: AtomicU16::new(0),
            name: RwLock::new(None),
            authenticated: AtomicBool::new(false),
            protocol: AtomicU8::new(2),
            in_transaction: AtomicBool::new(false),
            transaction_queue: RwLock::new(Vec::new()),
            watched: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            pubsub: RwLock::new(PubSubState::default()),
            in_pubsub_mode: AtomicBool::new(false),
        }
    }

    /// The connection ID.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The peer address.
    #[inline]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The selected database index.
    #[inline]
    pub fn db_index(&self) -> DbIndex {
        self.db_index.load(Ordering::Relaxed)
    }

    /// Select a database.
    #[inline]
    pub fn set_db_index(&self, index: DbIndex) {
        self.db_index.store(index, Ordering::Relaxed);
    }

    /// The client name, if set.
    pub fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    /// Set the client name.
    pub fn set_name(&self, name: String) {
        *self.name.write() = Some(name);
    }

    /// Check authentication.
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    /// Set authentication.
    #[inline]
    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::Relaxed);
    }

    /// Negotiated RESP protocol version (2 or 3).
    #[inline]
    pub fn protocol(&self) -> u8 {
        self.protocol.load(Ordering::Relaxed)
    }

    /// Record the negotiated RESP protocol version.
    #[inline]
    pub fn set_protocol(&self, version: u8) {
        self.protocol.store(version, Ordering::Relaxed);
    }

    /// Whether close was requested.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Request close.
    #[inline]
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    // Transactions

    /// In a MULTI block?
    #[inline]
    pub fn is_in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Relaxed)
    }

    /// Enter a MULTI block.
    pub fn start_transaction(&self) {
        self.in_transaction.store(true, Ordering::Relaxed);
        self.transaction_queue.write().clear();
    }

    /// Queue a command for EXEC.
    pub fn queue_command(&self, name: String, args: Vec<Bytes>) {
        self.transaction_queue
            .write()
            .push(QueuedCommand { name, args });
    }

    /// Take the queue (EXEC) and leave the Queuing state.
    pub fn take_queued_commands(&self) -> Vec<QueuedCommand> {
        self.in_transaction.store(false, Ordering::Relaxed);
        std::mem::take(&mut *self.transaction_queue.write())
    }

    /// Discard the transaction: clears the queue, the Queuing state and all
    /// watches.
    pub fn discard_transaction(&self) {
        self.in_transaction.store(false, Ordering::Relaxed);
        self.transaction_queue.write().clear();
        self.unwatch_all();
    }

    /// Record a WATCH snapshot. The first fingerprint taken for a key wins;
    /// re-watching must not refresh a stale snapshot.
    pub fn watch_key(&self, db: DbIndex, key: Key, fingerprint: Fingerprint) {
        self.watched.write().entry((db, key)).or_insert(fingerprint);
    }

    /// All WATCH snapshots.
    pub fn watched_keys(&self) -> Vec<((DbIndex, Key), Fingerprint)> {
        self.watched
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Clear all watches (UNWATCH, EXEC, DISCARD).
    pub fn unwatch_all(&self) {
        self.watched.write().clear();
    }

    // Pub/sub

    /// In subscriber mode?
    #[inline]
    pub fn is_in_pubsub_mode(&self) -> bool {
        self.in_pubsub_mode.load(Ordering::Relaxed)
    }

    /// Store a channel subscription. Returns the new subscription count.
    pub fn subscribe_channel(
        &self,
        channel: Bytes,
        receiver: broadcast::Receiver<PubSubMessage>,
    ) -> usize {
        let mut state = self.pubsub.write();
        state.channel_receivers.insert(channel, receiver);
        self.in_pubsub_mode.store(true, Ordering::Relaxed);
        state.subscription_count()
    }

    /// Store a pattern subscription. Returns the new subscription count.
    pub fn subscribe_pattern(
        &self,
        pattern: Bytes,
        receiver: broadcast::Receiver<PubSubMessage>,
    ) -> usize {
        let mut state = self.pubsub.write();
        state.pattern_receivers.insert(pattern, receiver);
        self.in_pubsub_mode.store(true, Ordering::Relaxed);
        state.subscription_count()
    }

    /// Take the pub/sub state for the connection's subscriber loop.
    pub fn take_pubsub_state(&self) -> PubSubState {
        std::mem::take(&mut *self.pubsub.write())
    }

    /// Restore the pub/sub state after the subscriber loop exits.
    pub fn restore_pubsub_state(&self, state: PubSubState) {
        let has_subs = state.subscription_count() > 0;
        *self.pubsub.write() = state;
        self.in_pubsub_mode.store(has_subs, Ordering::Relaxed);
    }
}
