//! Background expiration manager.
//!
//! Lazy expiration on access is sufficient for correctness; this task keeps
//! memory in check by sampling keys with TTLs on a fixed cycle and purging
//! the expired ones, repeating the cycle immediately while the expired
//! fraction stays high.

use super::Database;
use crate::types::DB_COUNT;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, info};

/// Configuration for the expiry manager.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// How often to run the expiry cycle
    pub cycle_interval: Duration,
    /// Maximum keys to sample per database per cycle
    pub keys_per_cycle: usize,
    /// Expired fraction above which the cycle repeats immediately
    pub aggressive_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_millis(100),
            keys_per_cycle: 20,
            aggressive_threshold: 0.25,
        }
    }
}

/// Background expiration manager.
#[derive(Debug)]
pub struct ExpiryManager {
    database: Arc<Database>,
    config: ExpiryConfig,
    running: AtomicBool,
    shutdown: Notify,
}

impl ExpiryManager {
    /// Create a new expiry manager.
    pub fn new(database: Arc<Database>) -> Self {
        Self::with_config(database, ExpiryConfig::default())
    }

    /// Create a new expiry manager with custom configuration.
    pub fn with_config(database: Arc<Database>, config: ExpiryConfig) -> Self {
        Self {
            database,
            config,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Start the background expiry task.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Signal the expiry manager to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    async fn run(&self) {
        info!("expiry manager started");
        let mut interval = time::interval(self.config.cycle_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle();
                }
                _ = self.shutdown.notified() => break,
            }
        }
        info!("expiry manager stopped");
    }

    /// One pass over all databases. Repeats while any database keeps
    /// yielding a high expired fraction, up to a bounded number of rounds.
    fn run_cycle(&self) {
        const MAX_ROUNDS: usize = 16;

        for _ in 0..MAX_ROUNDS {
            let mut total_sampled = 0usize;
            let mut total_removed = 0usize;

            for index in 0..DB_COUNT {
                if let Ok(db) = self.database.get_db(index) {
                    let (sampled, removed) = db.expire_cycle(self.config.keys_per_cycle);
                    total_sampled += sampled;
                    total_removed += removed;
                }
            }

            if total_removed > 0 {
                debug!(
                    sampled = total_sampled,
                    removed = total_removed,
                    "expiry cycle"
                );
            }

            let fraction = if total_sampled == 0 {
                0.0
            } else {
                total_removed as f64 / total_sampled as f64
            };
            if fraction < self.config.aggressive_threshold {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CustosValue, Expiry, Key};

    #[tokio::test]
    async fn test_cycle_purges_expired() {
        let database = Arc::new(Database::new());
        let db = database.get_db(0).unwrap();
        for i in 0..5 {
            db.set_with_expiry(
                Key::from(format!("k{i}")),
                CustosValue::string("v"),
                Expiry::At(1),
            );
        }
        db.set(Key::from("live"), CustosValue::string("v"));

        let manager = ExpiryManager::new(database);
        manager.run_cycle();

        assert_eq!(db.len(), 1);
        assert!(db.exists(&Key::from("live")));
    }
}
