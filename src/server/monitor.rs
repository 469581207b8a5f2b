//! MONITOR fan-out and the slowlog.

use crate::types::{current_timestamp_ms, DbIndex};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Bounded backlog per MONITOR subscriber; a monitor that cannot keep up
/// loses the overwritten lines.
const MONITOR_CAPACITY: usize = 4096;

/// Fan-out hub for MONITOR subscribers.
#[derive(Debug)]
pub struct MonitorHub {
    sender: broadcast::Sender<Bytes>,
}

impl MonitorHub {
    /// Create a new hub.
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(MONITOR_CAPACITY).0,
        }
    }

    /// Subscribe to the command feed.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.sender.subscribe()
    }

    /// Number of active monitors.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Fan out one executed command. A no-op without subscribers.
    pub fn broadcast(&self, db: DbIndex, addr: &str, name: &str, args: &[Bytes]) {
        if self.sender.receiver_count() == 0 {
            return;
        }

        let now_ms = current_timestamp_ms();
        let mut line = format!(
            "{}.{:06} [{} {}] \"{}\"",
            now_ms / 1000,
            (now_ms % 1000) * 1000,
            db,
            addr,
            name
        );
        for arg in args {
            line.push_str(" \"");
            line.push_str(&String::from_utf8_lossy(arg));
            line.push('"');
        }

        let _ = self.sender.send(Bytes::from(line));
    }
}

impl Default for MonitorHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared monitor hub type.
pub type SharedMonitorHub = Arc<MonitorHub>;

/// One slowlog entry.
#[derive(Debug, Clone)]
pub struct SlowLogEntry {
    /// Monotonically increasing entry ID
    pub id: i64,
    /// Unix timestamp (seconds) of command completion
    pub timestamp: i64,
    /// Execution duration in microseconds
    pub duration_us: i64,
    /// The full command tuple
    pub command: Vec<Bytes>,
    /// Peer address of the issuing client
    pub client_addr: String,
}

/// Ring buffer of slow commands.
#[derive(Debug)]
pub struct SlowLog {
    entries: Mutex<VecDeque<SlowLogEntry>>,
    max_len: AtomicUsize,
    /// Threshold in microseconds; negative disables logging entirely
    threshold_us: AtomicI64,
    next_id: AtomicU64,
}

impl SlowLog {
    /// Create a new slowlog.
    pub fn new(max_len: usize, threshold_us: i64) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_len: AtomicUsize::new(max_len),
            threshold_us: AtomicI64::new(threshold_us),
            next_id: AtomicU64::new(1),
        }
    }

    /// The current threshold in microseconds.
    #[inline]
    pub fn threshold_us(&self) -> i64 {
        self.threshold_us.load(Ordering::Relaxed)
    }

    /// Change the threshold (CONFIG SET slowlog-log-slower-than).
    pub fn set_threshold_us(&self, threshold: i64) {
        self.threshold_us.store(threshold, Ordering::Relaxed);
    }

    /// Change the maximum length, truncating the oldest entries if needed
    /// (CONFIG SET slowlog-max-len).
    pub fn set_max_len(&self, max_len: usize) {
        self.max_len.store(max_len, Ordering::Relaxed);
        let mut entries = self.entries.lock();
        while entries.len() > max_len {
            entries.pop_front();
        }
    }

    /// Record a command if it exceeded the threshold.
    pub fn record(&self, duration_us: i64, command: Vec<Bytes>, client_addr: String) {
        let threshold = self.threshold_us.load(Ordering::Relaxed);
        if threshold < 0 || duration_us < threshold {
            return;
        }

        let entry = SlowLogEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) as i64,
            timestamp: current_timestamp_ms() / 1000,
            duration_us,
            command,
            client_addr,
        };

        let max_len = self.max_len.load(Ordering::Relaxed);
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        while entries.len() > max_len {
            entries.pop_front();
        }
    }

    /// Newest-first entries, up to `count` (negative = all).
    pub fn get(&self, count: i64) -> Vec<SlowLogEntry> {
        let entries = self.entries.lock();
        let wanted = if count < 0 {
            entries.len()
        } else {
            (count as usize).min(entries.len())
        };
        entries.iter().rev().take(wanted).cloned().collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop all entries (SLOWLOG RESET).
    pub fn reset(&self) {
        self.entries.lock().clear();
    }
}

/// Shared slowlog type.
pub type SharedSlowLog = Arc<SlowLog>;
