//! Server metrics.
//!
//! Atomic counters for traffic and command volume, plus a once-a-second
//! sampler that derives instantaneous rates from the deltas.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Server-wide performance counters.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Total bytes read from clients
    pub bytes_in: AtomicU64,
    /// Total bytes written to clients
    pub bytes_out: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total connections accepted
    pub connections_accepted: AtomicU64,
    /// Connections rejected at the accept gate
    pub connections_rejected: AtomicU64,
    /// Protocol parse errors
    pub parse_errors: AtomicU64,
    /// Command errors returned to clients
    pub command_errors: AtomicU64,

    /// Sampled commands/sec, updated once per second
    ops_per_sec: AtomicU64,
    /// Sampled inbound bytes/sec
    bytes_in_per_sec: AtomicU64,
    /// Sampled outbound bytes/sec
    bytes_out_per_sec: AtomicU64,
}

impl ServerMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one executed command with its traffic.
    #[inline]
    pub fn record_command(&self, bytes_in: u64, bytes_out: u64) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
    }

    /// Record a command that returned an error.
    #[inline]
    pub fn record_error(&self) {
        self.command_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Instantaneous commands per second.
    #[inline]
    pub fn ops_per_sec(&self) -> u64 {
        self.ops_per_sec.load(Ordering::Relaxed)
    }

    /// Instantaneous inbound bytes per second.
    #[inline]
    pub fn bytes_in_per_sec(&self) -> u64 {
        self.bytes_in_per_sec.load(Ordering::Relaxed)
    }

    /// Instantaneous outbound bytes per second.
    #[inline]
    pub fn bytes_out_per_sec(&self) -> u64 {
        self.bytes_out_per_sec.load(Ordering::Relaxed)
    }

    /// Spawn the once-a-second rate sampler. The task runs until the
    /// returned handle is aborted.
    pub fn start_sampler(self: Arc<Self>) -> JoinHandle<()> {
        let metrics = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let mut last_commands = metrics.commands_processed.load(Ordering::Relaxed);
            let mut last_in = metrics.bytes_in.load(Ordering::Relaxed);
            let mut last_out = metrics.bytes_out.load(Ordering::Relaxed);

            loop {
                interval.tick().await;

                let commands = metrics.commands_processed.load(Ordering::Relaxed);
                let bytes_in = metrics.bytes_in.load(Ordering::Relaxed);
                let bytes_out = metrics.bytes_out.load(Ordering::Relaxed);

                metrics
                    .ops_per_sec
                    .store(commands.saturating_sub(last_commands), Ordering::Relaxed);
                metrics
                    .bytes_in_per_sec
                    .store(bytes_in.saturating_sub(last_in), Ordering::Relaxed);
                metrics
                    .bytes_out_per_sec
                    .store(bytes_out.saturating_sub(last_out), Ordering::Relaxed);

                last_commands = commands;
                last_in = bytes_in;
                last_out = bytes_out;
            }
        })
    }
}

/// Format a byte count for the INFO command.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}{}", UNITS[0])
    } else {
        format!("{value:.2}{}", UNITS[unit])
    }
}
