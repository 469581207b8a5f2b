//! Command executor.
//!
//! The dispatcher behind every connection (and any adapter that speaks to
//! the keyspace). Gate order for each command: authentication, the
//! transaction queue, then execution; afterwards the slowlog timer is
//! recorded, the command is fanned out to MONITOR subscribers, and write
//! commands are appended to the AOF.
//!
//! Commands that need whole-server context (SELECT, MOVE, SWAPDB,
//! FLUSHALL, persistence, CONFIG, INFO, pub/sub, AUTH/HELLO, EXEC) are
//! handled here; everything else dispatches through the registry under the
//! database's atomic guard.

use super::registry::CommandRegistry;
use super::{blocking, ParsedCommand};
use crate::error::{AuthError, CommandError, Error};
use crate::persistence::{AofService, SnapshotSaver};
use crate::protocol::Frame;
use crate::server::config::{AppendFsync, RuntimeConfig};
use crate::server::metrics::{format_bytes, ServerMetrics};
use crate::server::monitor::{SharedMonitorHub, SharedSlowLog};
use crate::server::ClientState;
use crate::storage::Database;
use crate::types::{DbIndex, Key, DB_COUNT};
use crate::Result;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace};

/// Commands that execute directly while the connection is Queuing.
const TRANSACTION_COMMANDS: &[&str] = &["EXEC", "DISCARD", "MULTI", "WATCH"];

/// Commands allowed before authentication.
const PRE_AUTH_COMMANDS: &[&str] = &["AUTH", "HELLO", "PING", "QUIT"];

/// Commands handled by the executor rather than the registry.
const EXECUTOR_COMMANDS: &[&str] = &[
    "AUTH",
    "HELLO",
    "SELECT",
    "MOVE",
    "SWAPDB",
    "FLUSHALL",
    "SAVE",
    "BGSAVE",
    "BGREWRITEAOF",
    "INFO",
    "CONFIG",
    "SLOWLOG",
    "PUBLISH",
    "PUBSUB",
    "EXEC",
];

/// The command executor.
pub struct CommandExecutor {
    registry: CommandRegistry,
    database: Arc<Database>,
    monitor: SharedMonitorHub,
    slowlog: SharedSlowLog,
    config: Arc<RuntimeConfig>,
    aof: Arc<AofService>,
    metrics: Arc<ServerMetrics>,
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("commands", &self.registry.len())
            .finish()
    }
}

impl CommandExecutor {
    /// Create a new executor.
    pub fn new(
        database: Arc<Database>,
        monitor: SharedMonitorHub,
        slowlog: SharedSlowLog,
        config: Arc<RuntimeConfig>,
        aof: Arc<AofService>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            registry: CommandRegistry::new(),
            database,
            monitor,
            slowlog,
            config,
            aof,
            metrics,
        }
    }

    /// The database manager.
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// The monitor hub.
    pub fn monitor(&self) -> &SharedMonitorHub {
        &self.monitor
    }

    /// The AOF subsystem.
    pub fn aof(&self) -> &Arc<AofService> {
        &self.aof
    }

    /// The runtime configuration.
    pub fn config(&self) -> &Arc<RuntimeConfig> {
        &self.config
    }

    /// Execute one command for a client, applying the dispatcher gates.
    pub async fn execute(&self, cmd: ParsedCommand, client: Arc<ClientState>) -> Result<Frame> {
        trace!(command = %cmd.name, args = cmd.arg_count(), "executing");

        // Gate 1: authentication.
        if self.database.server_auth().is_auth_required()
            && !client.is_authenticated()
            && !PRE_AUTH_COMMANDS.contains(&cmd.name.as_str())
        {
            return Err(AuthError::AuthRequired.into());
        }

        // Gate 2 (subscriber mode) is enforced by the connection loop.

        // Gate 3: transaction queue.
        if client.is_in_transaction() && !TRANSACTION_COMMANDS.contains(&cmd.name.as_str()) {
            if !self.command_exists(&cmd.name) {
                return Err(CommandError::UnknownCommand(cmd.name.clone()).into());
            }
            client.queue_command(cmd.name.clone(), cmd.args.clone());
            return Ok(Frame::queued());
        }

        // Gate 4: timed execution.
        let start = Instant::now();
        let db_index = client.db_index();
        let result = self.dispatch(&cmd, &client).await;
        let duration_us = start.elapsed().as_micros() as i64;

        let mut command_tuple = Vec::with_capacity(cmd.args.len() + 1);
        command_tuple.push(Bytes::from(cmd.name.clone()));
        command_tuple.extend(cmd.args.iter().cloned());
        self.slowlog
            .record(duration_us, command_tuple, client.addr().to_string());

        // Gate 5: MONITOR fan-out.
        self.monitor
            .broadcast(db_index, client.addr(), &cmd.name, &cmd.args);

        // Gate 6: AOF append for successful writes. EXEC logs its queued
        // writes itself.
        if let Ok(frame) = &result {
            if !frame.is_error() && cmd.name != "EXEC" && self.is_write_command(&cmd.name) {
                self.aof.append(db_index, &cmd.name, &cmd.args);
            }
        }
        if result.is_err() {
            self.metrics.record_error();
        }

        result
    }

    fn command_exists(&self, name: &str) -> bool {
        self.registry.get(name).is_some() || EXECUTOR_COMMANDS.contains(&name)
    }

    fn is_write_command(&self, name: &str) -> bool {
        match self.registry.get(name) {
            Some(command) => command.flags.is_write(),
            None => matches!(name, "FLUSHALL" | "MOVE" | "SWAPDB"),
        }
    }

    async fn dispatch(&self, cmd: &ParsedCommand, client: &Arc<ClientState>) -> Result<Frame> {
        match cmd.name.as_str() {
            "AUTH" => self.handle_auth(cmd, client),
            "HELLO" => self.handle_hello(cmd, client),
            "SELECT" => self.handle_select(cmd, client),
            "MOVE" => self.handle_move(cmd, client).await,
            "SWAPDB" => self.handle_swapdb(cmd).await,
            "FLUSHALL" => self.handle_flushall().await,
            "SAVE" => self.handle_save().await,
            "BGSAVE" => self.handle_bgsave(),
            "BGREWRITEAOF" => self.handle_bgrewriteaof(),
            "INFO" => self.handle_info(cmd),
            "CONFIG" => self.handle_config(cmd),
            "SLOWLOG" => self.handle_slowlog(cmd),
            "PUBLISH" => self.handle_publish(cmd),
            "PUBSUB" => self.handle_pubsub(cmd),
            "EXEC" => self.execute_transaction(client).await,
            _ => {
                let command = self
                    .registry
                    .get(&cmd.name)
                    .ok_or_else(|| CommandError::UnknownCommand(cmd.name.clone()))?;
                self.check_arity(cmd, command)?;

                let db = self.database.get_db(client.db_index())?;
                if command.flags.is_blocking() {
                    // A parked blocking pop must not hold the atomic window.
                    (command.handler)(cmd.clone(), db, client.clone()).await
                } else {
                    let _pass = db.guard().read().await;
                    (command.handler)(cmd.clone(), db.clone(), client.clone()).await
                }
            }
        }
    }

    fn check_arity(&self, cmd: &ParsedCommand, command: &super::registry::Command) -> Result<()> {
        let argc = cmd.arg_count() as i32;
        if argc < command.min_args || (command.max_args >= 0 && argc > command.max_args) {
            return Err(CommandError::WrongArity {
                command: cmd.name.to_lowercase(),
            }
            .into());
        }
        Ok(())
    }

    /// EXEC: validate every WATCH fingerprint, then run the queue under an
    /// exclusive window over all databases so no concurrent reader can see
    /// a half-applied transaction.
    async fn execute_transaction(&self, client: &Arc<ClientState>) -> Result<Frame> {
        if !client.is_in_transaction() {
            return Err(CommandError::ExecWithoutMulti.into());
        }

        let queued = client.take_queued_commands();
        let watches = client.watched_keys();
        client.unwatch_all();

        // Exclusive guards in increasing index order.
        let dbs: Vec<_> = (0..DB_COUNT)
            .filter_map(|i| self.database.get_db(i).ok())
            .collect();
        let mut guards = Vec::with_capacity(dbs.len());
        for db in &dbs {
            guards.push(db.guard().write().await);
        }

        // Fingerprint validation: any watched key written since WATCH
        // aborts the transaction with a null array.
        for ((db_index, key), snapshot) in watches {
            let db = self.database.get_db(db_index)?;
            if db.fingerprint(&key) != snapshot {
                debug!(key = %key, "EXEC aborted: watched key modified");
                return Ok(Frame::NullArray);
            }
        }

        let mut results = Vec::with_capacity(queued.len());
        for queued_cmd in queued {
            let cmd = ParsedCommand::from_parts(queued_cmd.name, queued_cmd.args);
            let db_index = client.db_index();
            let result = self.run_queued(&cmd, client).await;
            match result {
                Ok(frame) => {
                    if !frame.is_error() && self.is_write_command(&cmd.name) {
                        self.aof.append(db_index, &cmd.name, &cmd.args);
                    }
                    results.push(frame);
                }
                Err(e) => results.push(Frame::error(e.to_resp_error())),
            }
        }

        drop(guards);
        Ok(Frame::Array(results))
    }

    /// Run one queued command while the exclusive window is already held.
    async fn run_queued(&self, cmd: &ParsedCommand, client: &Arc<ClientState>) -> Result<Frame> {
        match cmd.name.as_str() {
            // Guard-taking specials run against already-held guards.
            "SELECT" => self.handle_select(cmd, client),
            "MOVE" => self.move_between_dbs(cmd, client),
            "SWAPDB" => self.swap_dbs_inner(cmd),
            "FLUSHALL" => self.flushall_inner(),
            "AUTH" => self.handle_auth(cmd, client),
            "HELLO" => self.handle_hello(cmd, client),
            "SAVE" => self.handle_save().await,
            "BGSAVE" => self.handle_bgsave(),
            "BGREWRITEAOF" => self.handle_bgrewriteaof(),
            "INFO" => self.handle_info(cmd),
            "CONFIG" => self.handle_config(cmd),
            "SLOWLOG" => self.handle_slowlog(cmd),
            "PUBLISH" => self.handle_publish(cmd),
            "PUBSUB" => self.handle_pubsub(cmd),
            // Blocking pops never park inside a transaction; they try once.
            "BLPOP" | "BRPOP" => {
                cmd.require_args(2)?;
                let db = self.database.get_db(client.db_index())?;
                let keys: Vec<Key> = cmd.args[..cmd.args.len() - 1]
                    .iter()
                    .map(|b| Key::from(b.clone()))
                    .collect();
                let front = cmd.name == "BLPOP";
                Ok(blocking::try_pop(&db, &keys, front)?.unwrap_or(Frame::NullArray))
            }
            _ => {
                let command = self
                    .registry
                    .get(&cmd.name)
                    .ok_or_else(|| CommandError::UnknownCommand(cmd.name.clone()))?;
                self.check_arity(cmd, command)?;
                let db = self.database.get_db(client.db_index())?;
                (command.handler)(cmd.clone(), db, client.clone()).await
            }
        }
    }

    fn handle_auth(&self, cmd: &ParsedCommand, client: &Arc<ClientState>) -> Result<Frame> {
        if cmd.args.is_empty() || cmd.args.len() > 2 {
            return Err(CommandError::WrongArity {
                command: "auth".to_string(),
            }
            .into());
        }

        let auth = self.database.server_auth();
        if !auth.is_auth_required() {
            return Err(AuthError::NoPasswordSet.into());
        }

        // AUTH password | AUTH username password (the username is ignored;
        // there is a single shared password).
        let password = if cmd.args.len() == 2 {
            cmd.get_str(1)?
        } else {
            cmd.get_str(0)?
        };

        if auth.validate_password(password) {
            client.set_authenticated(true);
            Ok(Frame::ok())
        } else {
            Err(AuthError::WrongPassword.into())
        }
    }

    fn handle_hello(&self, cmd: &ParsedCommand, client: &Arc<ClientState>) -> Result<Frame> {
        let mut proto: u8 = client.protocol();
        let mut i = 0;

        if let Some(first) = cmd.args.first() {
            // The first argument may be the protocol version.
            if let Ok(s) = std::str::from_utf8(first) {
                if let Ok(version) = s.parse::<u8>() {
                    if version != 2 && version != 3 {
                        return Ok(Frame::error(
                            "NOPROTO unsupported protocol version".to_string(),
                        ));
                    }
                    proto = version;
                    i = 1;
                }
            }
        }

        while i < cmd.args.len() {
            match cmd.get_str(i)?.to_uppercase().as_str() {
                "AUTH" => {
                    if i + 2 >= cmd.args.len() {
                        return Err(CommandError::SyntaxError.into());
                    }
                    let password = cmd.get_str(i + 2)?;
                    if !self.database.server_auth().validate_password(password) {
                        return Err(AuthError::WrongPassword.into());
                    }
                    client.set_authenticated(true);
                    i += 3;
                }
                "SETNAME" => {
                    let name = cmd.get_str(i + 1)?;
                    client.set_name(name.to_string());
                    i += 2;
                }
                _ => return Err(CommandError::SyntaxError.into()),
            }
        }

        if self.database.server_auth().is_auth_required() && !client.is_authenticated() {
            return Err(AuthError::AuthRequired.into());
        }

        client.set_protocol(proto);

        let pairs = vec![
            (Frame::bulk("server"), Frame::bulk("custos")),
            (Frame::bulk("version"), Frame::bulk(crate::VERSION)),
            (Frame::bulk("proto"), Frame::Integer(i64::from(proto))),
            (Frame::bulk("id"), Frame::Integer(client.id() as i64)),
            (Frame::bulk("mode"), Frame::bulk("standalone")),
            (Frame::bulk("role"), Frame::bulk("master")),
            (Frame::bulk("modules"), Frame::Array(vec![])),
        ];

        if proto == 3 {
            Ok(Frame::Map(pairs))
        } else {
            let mut flat = Vec::with_capacity(pairs.len() * 2);
            for (k, v) in pairs {
                flat.push(k);
                flat.push(v);
            }
            Ok(Frame::Array(flat))
        }
    }

    fn handle_select(&self, cmd: &ParsedCommand, client: &Arc<ClientState>) -> Result<Frame> {
        cmd.require_exact_args(1)?;
        let index = cmd.get_i64(0)?;
        if index < 0 || index >= i64::from(DB_COUNT) {
            return Err(CommandError::DbIndexOutOfRange.into());
        }
        client.set_db_index(index as DbIndex);
        Ok(Frame::ok())
    }

    async fn handle_move(&self, cmd: &ParsedCommand, client: &Arc<ClientState>) -> Result<Frame> {
        cmd.require_exact_args(2)?;
        let dst_index = cmd.get_i64(1)?;
        if dst_index < 0 || dst_index >= i64::from(DB_COUNT) {
            return Err(CommandError::DbIndexOutOfRange.into());
        }
        let src_index = client.db_index();
        let dst_index = dst_index as DbIndex;
        if src_index == dst_index {
            return Err(Error::Command(CommandError::SyntaxError));
        }

        // Exclusive guards in increasing index order.
        let lo = src_index.min(dst_index);
        let hi = src_index.max(dst_index);
        let lo_db = self.database.get_db(lo)?;
        let hi_db = self.database.get_db(hi)?;
        let _g1 = lo_db.guard().write().await;
        let _g2 = hi_db.guard().write().await;

        self.move_between_dbs(cmd, client)
    }

    /// MOVE body; callers hold both guards.
    fn move_between_dbs(&self, cmd: &ParsedCommand, client: &Arc<ClientState>) -> Result<Frame> {
        cmd.require_exact_args(2)?;
        let key = Key::from(cmd.args[0].clone());
        let dst_index = cmd.get_i64(1)?;
        if dst_index < 0 || dst_index >= i64::from(DB_COUNT) {
            return Err(CommandError::DbIndexOutOfRange.into());
        }

        let src_db = self.database.get_db(client.db_index())?;
        let dst_db = self.database.get_db(dst_index as DbIndex)?;

        if !src_db.exists(&key) || dst_db.exists(&key) {
            return Ok(Frame::Integer(0));
        }

        match src_db.take_entry(&key) {
            Some(stored) => {
                dst_db.put_entry(key, stored);
                Ok(Frame::Integer(1))
            }
            None => Ok(Frame::Integer(0)),
        }
    }

    async fn handle_swapdb(&self, cmd: &ParsedCommand) -> Result<Frame> {
        cmd.require_exact_args(2)?;
        let a = cmd.get_i64(0)?;
        let b = cmd.get_i64(1)?;
        if a < 0 || a >= i64::from(DB_COUNT) || b < 0 || b >= i64::from(DB_COUNT) {
            return Err(CommandError::DbIndexOutOfRange.into());
        }
        if a == b {
            return Ok(Frame::ok());
        }

        let lo = (a.min(b)) as DbIndex;
        let hi = (a.max(b)) as DbIndex;
        let lo_db = self.database.get_db(lo)?;
        let hi_db = self.database.get_db(hi)?;
        let _g1 = lo_db.guard().write().await;
        let _g2 = hi_db.guard().write().await;

        self.database.swap_dbs(lo, hi)?;
        Ok(Frame::ok())
    }

    /// SWAPDB body for queued execution; guards already held.
    fn swap_dbs_inner(&self, cmd: &ParsedCommand) -> Result<Frame> {
        cmd.require_exact_args(2)?;
        let a = cmd.get_i64(0)?;
        let b = cmd.get_i64(1)?;
        if a < 0 || a >= i64::from(DB_COUNT) || b < 0 || b >= i64::from(DB_COUNT) {
            return Err(CommandError::DbIndexOutOfRange.into());
        }
        if a != b {
            self.database.swap_dbs(a as DbIndex, b as DbIndex)?;
        }
        Ok(Frame::ok())
    }

    async fn handle_flushall(&self) -> Result<Frame> {
        let dbs: Vec<_> = (0..DB_COUNT)
            .filter_map(|i| self.database.get_db(i).ok())
            .collect();
        let mut guards = Vec::with_capacity(dbs.len());
        for db in &dbs {
            guards.push(db.guard().write().await);
        }
        for db in &dbs {
            db.flush();
        }
        Ok(Frame::ok())
    }

    /// FLUSHALL body for queued execution; guards already held.
    fn flushall_inner(&self) -> Result<Frame> {
        for i in 0..DB_COUNT {
            if let Ok(db) = self.database.get_db(i) {
                db.flush();
            }
        }
        Ok(Frame::ok())
    }

    fn snapshot_path(&self) -> PathBuf {
        let dir = self.config.get("dir").unwrap_or_else(|| ".".to_string());
        let name = self
            .config
            .get("dbfilename")
            .unwrap_or_else(|| "dump.cdb".to_string());
        PathBuf::from(dir).join(name)
    }

    async fn handle_save(&self) -> Result<Frame> {
        let path = self.snapshot_path();
        let database = self.database.clone();

        let result =
            tokio::task::spawn_blocking(move || SnapshotSaver::save(&path, &database)).await;

        match result {
            Ok(Ok(save)) => {
                self.database.server_stats().save_completed();
                info!(
                    keys = save.keys_saved,
                    bytes = save.bytes_written,
                    "DB saved on disk"
                );
                Ok(Frame::ok())
            }
            Ok(Err(e)) => {
                error!("SAVE failed: {e}");
                Err(CommandError::SaveFailed.into())
            }
            Err(e) => {
                error!("SAVE task panicked: {e}");
                Err(CommandError::SaveFailed.into())
            }
        }
    }

    fn handle_bgsave(&self) -> Result<Frame> {
        let stats = self.database.server_stats().clone();
        if stats.bgsave_in_progress.swap(true, Ordering::SeqCst) {
            return Ok(Frame::simple("Background saving already in progress"));
        }

        let path = self.snapshot_path();
        let database = self.database.clone();
        tokio::spawn(async move {
            let stats_inner = database.server_stats().clone();
            let db_for_save = database.clone();
            let result =
                tokio::task::spawn_blocking(move || SnapshotSaver::save(&path, &db_for_save)).await;
            match result {
                Ok(Ok(save)) => {
                    stats_inner.save_completed();
                    info!(keys = save.keys_saved, "Background saving terminated with success");
                }
                Ok(Err(e)) => {
                    stats_inner.bgsave_in_progress.store(false, Ordering::SeqCst);
                    error!("Background saving terminated with error: {e}");
                }
                Err(e) => {
                    stats_inner.bgsave_in_progress.store(false, Ordering::SeqCst);
                    error!("Background save task panicked: {e}");
                }
            }
        });

        Ok(Frame::simple("Background saving started"))
    }

    fn handle_bgrewriteaof(&self) -> Result<Frame> {
        let stats = self.database.server_stats().clone();
        if stats.aof_rewrite_in_progress.swap(true, Ordering::SeqCst) {
            return Ok(Frame::simple("Background append only file rewriting already in progress"));
        }

        let database = self.database.clone();
        let aof = self.aof.clone();
        tokio::spawn(async move {
            let stats_inner = database.server_stats().clone();
            let result = tokio::task::spawn_blocking(move || aof.rewrite(&database)).await;
            stats_inner
                .aof_rewrite_in_progress
                .store(false, Ordering::SeqCst);
            match result {
                Ok(Ok(())) => info!("Background AOF rewrite finished successfully"),
                Ok(Err(e)) => error!("Background AOF rewrite failed: {e}"),
                Err(e) => error!("AOF rewrite task panicked: {e}"),
            }
        });

        Ok(Frame::simple("Background append only file rewriting started"))
    }

    fn handle_info(&self, cmd: &ParsedCommand) -> Result<Frame> {
        let section = cmd
            .args
            .first()
            .and_then(|s| std::str::from_utf8(s).ok())
            .map(|s| s.to_ascii_lowercase());
        let all = section.is_none() || section.as_deref() == Some("all");
        let stats = self.database.server_stats();
        let mut info = String::new();

        if all || section.as_deref() == Some("server") {
            info.push_str("# Server\r\n");
            info.push_str(&format!("custos_version:{}\r\n", crate::VERSION));
            info.push_str("custos_mode:standalone\r\n");
            info.push_str(&format!("os:{}\r\n", std::env::consts::OS));
            info.push_str(&format!("arch_bits:{}\r\n", usize::BITS));
            info.push_str("\r\n");
        }

        if all || section.as_deref() == Some("clients") {
            info.push_str("# Clients\r\n");
            info.push_str(&format!(
                "connected_clients:{}\r\n",
                stats.connected_clients.load(Ordering::Relaxed)
            ));
            info.push_str("\r\n");
        }

        if all || section.as_deref() == Some("persistence") {
            info.push_str("# Persistence\r\n");
            info.push_str(&format!(
                "rdb_changes_since_last_save:{}\r\n",
                stats.dirty.load(Ordering::Relaxed)
            ));
            info.push_str(&format!(
                "rdb_bgsave_in_progress:{}\r\n",
                u8::from(stats.bgsave_in_progress.load(Ordering::Relaxed))
            ));
            info.push_str(&format!(
                "rdb_last_save_time:{}\r\n",
                stats.last_save_time.load(Ordering::Relaxed)
            ));
            info.push_str(&format!(
                "aof_enabled:{}\r\n",
                u8::from(self.aof.is_enabled())
            ));
            info.push_str(&format!(
                "aof_rewrite_in_progress:{}\r\n",
                u8::from(stats.aof_rewrite_in_progress.load(Ordering::Relaxed))
            ));
            info.push_str("\r\n");
        }

        if all || section.as_deref() == Some("stats") {
            info.push_str("# Stats\r\n");
            info.push_str(&format!(
                "total_connections_received:{}\r\n",
                stats.total_connections.load(Ordering::Relaxed)
            ));
            info.push_str(&format!(
                "total_commands_processed:{}\r\n",
                self.metrics.commands_processed.load(Ordering::Relaxed)
            ));
            info.push_str(&format!(
                "instantaneous_ops_per_sec:{}\r\n",
                self.metrics.ops_per_sec()
            ));
            info.push_str(&format!(
                "total_net_input_bytes:{}\r\n",
                self.metrics.bytes_in.load(Ordering::Relaxed)
            ));
            info.push_str(&format!(
                "total_net_output_bytes:{}\r\n",
                self.metrics.bytes_out.load(Ordering::Relaxed)
            ));
            info.push_str(&format!(
                "total_net_input_bytes_human:{}\r\n",
                format_bytes(self.metrics.bytes_in.load(Ordering::Relaxed))
            ));
            info.push_str("\r\n");
        }

        if all || section.as_deref() == Some("keyspace") {
            info.push_str("# Keyspace\r\n");
            for index in 0..DB_COUNT {
                if let Ok(db) = self.database.get_db(index) {
                    let keys = db.len();
                    if keys > 0 {
                        info.push_str(&format!("db{index}:keys={keys}\r\n"));
                    }
                }
            }
            info.push_str("\r\n");
        }

        Ok(Frame::Bulk(info.into()))
    }

    fn handle_config(&self, cmd: &ParsedCommand) -> Result<Frame> {
        cmd.require_args(1)?;
        match cmd.get_str(0)?.to_uppercase().as_str() {
            "GET" => {
                cmd.require_exact_args(2)?;
                let pattern = cmd.get_str(1)?;
                let mut frames = Vec::new();
                for (name, value) in self.config.matching(pattern) {
                    frames.push(Frame::bulk(name));
                    frames.push(Frame::bulk(value));
                }
                Ok(Frame::Array(frames))
            }
            "SET" => {
                cmd.require_exact_args(3)?;
                let name = cmd.get_str(1)?.to_ascii_lowercase();
                let value = cmd.get_str(2)?;
                let normalized = self.config.set(&name, value).map_err(Error::Config)?;
                self.apply_config(&name, &normalized);
                Ok(Frame::ok())
            }
            sub => Err(CommandError::UnknownCommand(format!("CONFIG {sub}")).into()),
        }
    }

    /// Push a changed parameter into its subsystem.
    fn apply_config(&self, name: &str, value: &str) {
        match name {
            "requirepass" => {
                let password = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
                self.database.server_auth().set_requirepass(password);
            }
            "appendonly" => self.aof.set_enabled(value == "yes"),
            "appendfsync" => {
                if let Some(policy) = AppendFsync::parse(value) {
                    self.aof.set_fsync_policy(policy);
                }
            }
            "slowlog-max-len" => {
                if let Ok(len) = value.parse() {
                    self.slowlog.set_max_len(len);
                }
            }
            "slowlog-log-slower-than" => {
                if let Ok(threshold) = value.parse() {
                    self.slowlog.set_threshold_us(threshold);
                }
            }
            _ => {}
        }
    }

    fn handle_slowlog(&self, cmd: &ParsedCommand) -> Result<Frame> {
        cmd.require_args(1)?;
        match cmd.get_str(0)?.to_uppercase().as_str() {
            "GET" => {
                let count = match cmd.args.get(1) {
                    Some(_) => cmd.get_i64(1)?,
                    None => 10,
                };
                let frames = self
                    .slowlog
                    .get(count)
                    .into_iter()
                    .map(|entry| {
                        Frame::Array(vec![
                            Frame::Integer(entry.id),
                            Frame::Integer(entry.timestamp),
                            Frame::Integer(entry.duration_us),
                            Frame::Array(entry.command.into_iter().map(Frame::Bulk).collect()),
                            Frame::bulk(entry.client_addr),
                        ])
                    })
                    .collect();
                Ok(Frame::Array(frames))
            }
            "RESET" => {
                self.slowlog.reset();
                Ok(Frame::ok())
            }
            "LEN" => Ok(Frame::Integer(self.slowlog.len() as i64)),
            sub => Err(CommandError::UnknownCommand(format!("SLOWLOG {sub}")).into()),
        }
    }

    fn handle_publish(&self, cmd: &ParsedCommand) -> Result<Frame> {
        cmd.require_exact_args(2)?;
        let count = self
            .database
            .pubsub()
            .publish(cmd.args[0].clone(), cmd.args[1].clone());
        Ok(Frame::Integer(count as i64))
    }

    fn handle_pubsub(&self, cmd: &ParsedCommand) -> Result<Frame> {
        cmd.require_args(1)?;
        let pubsub = self.database.pubsub();
        match cmd.get_str(0)?.to_uppercase().as_str() {
            "CHANNELS" => {
                let pattern = cmd.args.get(1).map(|b| b.as_ref());
                let channels = pubsub.channels(pattern);
                Ok(Frame::Array(
                    channels.into_iter().map(Frame::Bulk).collect(),
                ))
            }
            "NUMSUB" => {
                let mut frames = Vec::new();
                for channel in cmd.args.iter().skip(1) {
                    frames.push(Frame::Bulk(channel.clone()));
                    frames.push(Frame::Integer(pubsub.numsub(channel) as i64));
                }
                Ok(Frame::Array(frames))
            }
            "NUMPAT" => Ok(Frame::Integer(pubsub.numpat() as i64)),
            sub => Err(CommandError::UnknownCommand(format!("PUBSUB {sub}")).into()),
        }
    }
}
