//! TCP server and connection management.

pub mod config;
mod connection;
pub mod metrics;
pub mod monitor;
pub mod pubsub;
mod state;

pub use config::{AppendFsync, Config, RuntimeConfig};
pub use connection::Connection;
pub use metrics::ServerMetrics;
pub use monitor::{MonitorHub, SharedMonitorHub, SharedSlowLog, SlowLog};
pub use pubsub::{PubSubHub, SharedPubSubHub};
pub use state::{ClientState, PubSubState, QueuedCommand};

use crate::commands::{CommandExecutor, ParsedCommand};
use crate::persistence::{self, AofReader, AofService, SnapshotSaver};
use crate::storage::{Database, ExpiryManager};
use crate::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, warn};

/// The server: accept loop, shared subsystems, and background tasks.
#[derive(Debug)]
pub struct Server {
    config: Config,
    database: Arc<Database>,
    executor: Arc<CommandExecutor>,
    expiry_manager: Arc<ExpiryManager>,
    aof: Arc<AofService>,
    metrics: Arc<ServerMetrics>,
    running: AtomicBool,
    shutdown: Arc<Notify>,
    connection_count: AtomicU64,
    next_connection_id: AtomicU64,
    connection_semaphore: Arc<Semaphore>,
}

impl Server {
    /// Create a new server from a startup configuration.
    pub fn new(config: Config) -> Self {
        let database = Arc::new(Database::with_password(config.requirepass.clone()));
        let runtime_config = Arc::new(RuntimeConfig::from_config(&config));
        let monitor = Arc::new(MonitorHub::new());
        let slowlog = Arc::new(SlowLog::new(
            config.slowlog_max_len,
            config.slowlog_log_slower_than,
        ));
        let aof = Arc::new(AofService::new(
            config.aof_path(),
            config.appendonly,
            config.appendfsync,
        ));
        let metrics = Arc::new(ServerMetrics::new());
        let executor = Arc::new(CommandExecutor::new(
            database.clone(),
            monitor,
            slowlog,
            runtime_config,
            aof.clone(),
            metrics.clone(),
        ));
        let expiry_manager = Arc::new(ExpiryManager::new(database.clone()));
        let connection_semaphore = Arc::new(Semaphore::new(config.max_clients));

        Self {
            config,
            database,
            executor,
            expiry_manager,
            aof,
            metrics,
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            connection_count: AtomicU64::new(0),
            next_connection_id: AtomicU64::new(0),
            connection_semaphore,
        }
    }

    /// The command executor (the dispatcher entry point adapters use).
    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    /// The database manager.
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// The startup configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load persisted state: the AOF wins when enabled and non-empty,
    /// otherwise the snapshot is used.
    async fn load_persistence(&self) -> Result<()> {
        let aof_path = self.config.aof_path();
        let aof_usable = self.config.appendonly
            && aof_path.exists()
            && std::fs::metadata(&aof_path).map(|m| m.len() > 0).unwrap_or(false);

        if aof_usable {
            info!("replaying AOF {}", aof_path.display());
            let started = Instant::now();
            let mut reader = AofReader::open(&aof_path)?;

            // A synthetic pre-authenticated client carries the SELECT state
            // across the replay.
            let replay_client = Arc::new(ClientState::new(0, "aof-replay".to_string()));
            replay_client.set_authenticated(true);

            self.aof.set_suppressed(true);
            let mut replayed = 0u64;
            while let Some(args) = reader.next_command()? {
                if args.is_empty() {
                    continue;
                }
                let name = String::from_utf8_lossy(&args[0]).to_uppercase();
                let cmd = ParsedCommand::from_parts(name, args[1..].to_vec());
                if let Err(e) = self.executor.execute(cmd, replay_client.clone()).await {
                    warn!("AOF replay: command failed: {e}");
                }
                replayed += 1;
            }
            self.aof.set_suppressed(false);

            info!(
                commands = replayed,
                "AOF loaded in {:.3}s",
                started.elapsed().as_secs_f64()
            );
            return Ok(());
        }

        let snapshot_path = self.config.snapshot_path();
        if snapshot_path.exists() {
            let started = Instant::now();
            match persistence::load_if_present(&snapshot_path, &self.database) {
                Ok(Some(result)) => {
                    info!(
                        keys = result.keys_loaded,
                        expired = result.keys_expired,
                        "DB loaded from disk: {:.3}s",
                        started.elapsed().as_secs_f64()
                    );
                }
                Ok(None) => {}
                Err(e) => error!("failed to load snapshot: {e}"),
            }
        }
        Ok(())
    }

    /// Run the server until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.load_persistence().await?;

        let addr: SocketAddr = format!("{}:{}", self.config.bind, self.config.port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!("ready to accept connections on {addr}");

        self.running.store(true, Ordering::SeqCst);

        let expiry_handle = self.expiry_manager.clone().start();
        let sampler_handle = self.metrics.clone().start_sampler();
        let fsync_handle = self.spawn_aof_fsync_task();
        let save_handle = self.spawn_periodic_save_task();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => Self::accept(&self, socket, peer_addr),
                        Err(e) => error!("accept failed: {e}"),
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        // Graceful shutdown: stop accepting, drain connections, flush
        // persistence, then exit.
        self.running.store(false, Ordering::SeqCst);
        let drain_deadline = Instant::now() + Duration::from_secs(30);
        while self.connection_count.load(Ordering::Relaxed) > 0 {
            if Instant::now() > drain_deadline {
                warn!(
                    "shutdown drain timeout, {} connections still active",
                    self.connection_count.load(Ordering::Relaxed)
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.expiry_manager.stop();
        expiry_handle.await.ok();
        sampler_handle.abort();
        fsync_handle.abort();
        save_handle.abort();

        self.aof.fsync();

        let snapshot_path = self.config.snapshot_path();
        let database = self.database.clone();
        match tokio::task::spawn_blocking(move || SnapshotSaver::save(&snapshot_path, &database))
            .await
        {
            Ok(Ok(result)) => {
                self.database.server_stats().save_completed();
                info!(keys = result.keys_saved, "final snapshot saved");
            }
            Ok(Err(e)) => error!("final snapshot failed: {e}"),
            Err(e) => error!("final snapshot task panicked: {e}"),
        }

        info!("custos is now ready to exit, bye bye...");
        Ok(())
    }

    /// Admit one connection, or reject it at the accept gate when the
    /// client cap is reached.
    fn accept(server: &Arc<Self>, socket: tokio::net::TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = socket.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY: {e}");
        }

        let permit = match server.connection_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("max clients reached, rejecting {peer_addr}");
                server
                    .metrics
                    .connections_rejected
                    .fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let conn_id = server.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        server.connection_count.fetch_add(1, Ordering::Relaxed);
        server
            .metrics
            .connections_accepted
            .fetch_add(1, Ordering::Relaxed);
        server.database.server_stats().connection_opened();

        let server = server.clone();
        tokio::spawn(async move {
            let _permit = permit;

            let mut connection = Connection::new(
                socket,
                peer_addr,
                conn_id,
                server.executor.clone(),
                server.metrics.clone(),
                server.config.timeout,
            );

            if let Err(e) = connection.run().await {
                error!("connection error from {peer_addr}: {e}");
            }

            server.connection_count.fetch_sub(1, Ordering::Relaxed);
            server.database.server_stats().connection_closed();
        });
    }

    /// The `everysec` fsync task. Harmless when the policy is `always` or
    /// `no`: fsync on an already-clean file is a no-op.
    fn spawn_aof_fsync_task(&self) -> tokio::task::JoinHandle<()> {
        let aof = self.aof.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if aof.is_enabled() {
                    aof.fsync();
                }
            }
        })
    }

    /// Periodic snapshot task driven by the configured interval; skipped
    /// entirely when disabled or while a background save is running.
    fn spawn_periodic_save_task(&self) -> tokio::task::JoinHandle<()> {
        let database = self.database.clone();
        let path = self.config.snapshot_path();
        let interval_duration = self.config.save_interval;

        tokio::spawn(async move {
            let Some(interval_duration) = interval_duration else {
                return;
            };
            let mut interval = tokio::time::interval(interval_duration);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it.
            interval.tick().await;

            loop {
                interval.tick().await;

                let stats = database.server_stats();
                if stats.bgsave_in_progress.swap(true, Ordering::SeqCst) {
                    continue;
                }
                if stats.dirty.load(Ordering::Relaxed) == 0 {
                    stats.bgsave_in_progress.store(false, Ordering::SeqCst);
                    continue;
                }

                info!("periodic save triggered");
                let db_for_save = database.clone();
                let save_path = path.clone();
                let result = tokio::task::spawn_blocking(move || {
                    SnapshotSaver::save(&save_path, &db_for_save)
                })
                .await;

                match result {
                    Ok(Ok(save)) => {
                        database.server_stats().save_completed();
                        info!(keys = save.keys_saved, "periodic save complete");
                    }
                    Ok(Err(e)) => {
                        database
                            .server_stats()
                            .bgsave_in_progress
                            .store(false, Ordering::SeqCst);
                        error!("periodic save failed: {e}");
                    }
                    Err(e) => {
                        database
                            .server_stats()
                            .bgsave_in_progress
                            .store(false, Ordering::SeqCst);
                        error!("periodic save task panicked: {e}");
                    }
                }
            }
        })
    }

    /// Signal the server to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Is the accept loop running?
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current connection count.
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}
