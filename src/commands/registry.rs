//! Command registry: name -> handler, arity and flags.

use super::{CommandFlags, ParsedCommand};
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::Result;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for async command handlers.
pub type CommandHandler = fn(
    ParsedCommand,
    Arc<Db>,
    Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>>;

/// Command definition.
#[derive(Clone)]
pub struct Command {
    /// Command name
    pub name: &'static str,
    /// Minimum argument count (excluding the name)
    pub min_args: i32,
    /// Maximum argument count (-1 for unlimited)
    pub max_args: i32,
    /// Command flags
    pub flags: CommandFlags,
    /// Handler function
    pub handler: CommandHandler,
}

impl Command {
    /// Create a new command definition.
    pub const fn new(
        name: &'static str,
        min_args: i32,
        max_args: i32,
        flags: CommandFlags,
        handler: CommandHandler,
    ) -> Self {
        Self {
            name,
            min_args,
            max_args,
            flags,
            handler,
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Registry of all directly dispatched commands. Commands that need
/// whole-server context (SELECT, MOVE, SWAPDB, persistence, pub/sub,
/// CONFIG, INFO, auth) are handled by the executor instead.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: HashMap<&'static str, Command>,
}

impl CommandRegistry {
    /// Create a new registry with all built-in commands.
    pub fn new() -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
        };
        registry.register_all();
        registry
    }

    /// Register a command.
    fn register(&mut self, cmd: Command) {
        self.commands.insert(cmd.name, cmd);
    }

    /// Look up a command by (already uppercased) name.
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True when no commands are registered.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn register_all(&mut self) {
        self.register_string_commands();
        self.register_key_commands();
        self.register_list_commands();
        self.register_hash_commands();
        self.register_set_commands();
        self.register_sorted_set_commands();
        self.register_stream_commands();
        self.register_json_commands();
        self.register_transaction_commands();
        self.register_connection_commands();
    }

    fn register_string_commands(&mut self) {
        use super::strings::*;
        let w = CommandFlags::write();
        let r = CommandFlags::readonly();

        self.register(Command::new("SET", 2, -1, w, cmd_set));
        self.register(Command::new("GET", 1, 1, r, cmd_get));
        self.register(Command::new("GETSET", 2, 2, w, cmd_getset));
        self.register(Command::new("SETNX", 2, 2, w, cmd_setnx));
        self.register(Command::new("SETEX", 3, 3, w, cmd_setex));
        self.register(Command::new("PSETEX", 3, 3, w, cmd_psetex));
        self.register(Command::new("MSET", 2, -1, w, cmd_mset));
        self.register(Command::new("MGET", 1, -1, r, cmd_mget));
        self.register(Command::new("APPEND", 2, 2, w, cmd_append));
        self.register(Command::new("GETRANGE", 3, 3, r, cmd_getrange));
        self.register(Command::new("SUBSTR", 3, 3, r, cmd_getrange));
        self.register(Command::new("SETRANGE", 3, 3, w, cmd_setrange));
        self.register(Command::new("STRLEN", 1, 1, r, cmd_strlen));
        self.register(Command::new("INCR", 1, 1, w, cmd_incr));
        self.register(Command::new("DECR", 1, 1, w, cmd_decr));
        self.register(Command::new("INCRBY", 2, 2, w, cmd_incrby));
        self.register(Command::new("DECRBY", 2, 2, w, cmd_decrby));
        self.register(Command::new("INCRBYFLOAT", 2, 2, w, cmd_incrbyfloat));
    }

    fn register_key_commands(&mut self) {
        use super::keys::*;
        let w = CommandFlags::write();
        let r = CommandFlags::readonly();

        self.register(Command::new("DEL", 1, -1, w, cmd_del));
        self.register(Command::new("EXISTS", 1, -1, r, cmd_exists));
        self.register(Command::new("KEYS", 1, 1, r, cmd_keys));
        self.register(Command::new("SCAN", 1, 5, r, cmd_scan));
        self.register(Command::new("TYPE", 1, 1, r, cmd_type));
        self.register(Command::new("TTL", 1, 1, r, cmd_ttl));
        self.register(Command::new("PTTL", 1, 1, r, cmd_pttl));
        self.register(Command::new("EXPIRE", 2, 2, w, cmd_expire));
        self.register(Command::new("PEXPIRE", 2, 2, w, cmd_pexpire));
        self.register(Command::new("EXPIREAT", 2, 2, w, cmd_expireat));
        self.register(Command::new("PEXPIREAT", 2, 2, w, cmd_pexpireat));
        self.register(Command::new("PERSIST", 1, 1, w, cmd_persist));
        self.register(Command::new("RANDOMKEY", 0, 0, r, cmd_randomkey));
        self.register(Command::new("RENAME", 2, 2, w, cmd_rename));
        self.register(Command::new("RENAMENX", 2, 2, w, cmd_renamenx));
        self.register(Command::new("DBSIZE", 0, 0, CommandFlags::no_keys(), cmd_dbsize));
        self.register(Command::new("FLUSHDB", 0, 1, w, cmd_flushdb));
    }

    fn register_list_commands(&mut self) {
        use super::blocking::*;
        use super::lists::*;
        let w = CommandFlags::write();
        let r = CommandFlags::readonly();

        self.register(Command::new("LPUSH", 2, -1, w, cmd_lpush));
        self.register(Command::new("RPUSH", 2, -1, w, cmd_rpush));
        self.register(Command::new("LPOP", 1, 2, w, cmd_lpop));
        self.register(Command::new("RPOP", 1, 2, w, cmd_rpop));
        self.register(Command::new("LLEN", 1, 1, r, cmd_llen));
        self.register(Command::new("LRANGE", 3, 3, r, cmd_lrange));
        self.register(Command::new("LINDEX", 2, 2, r, cmd_lindex));
        self.register(Command::new("LSET", 3, 3, w, cmd_lset));
        self.register(Command::new("LTRIM", 3, 3, w, cmd_ltrim));
        self.register(Command::new("LINSERT", 4, 4, w, cmd_linsert));
        self.register(Command::new("LREM", 3, 3, w, cmd_lrem));
        self.register(Command::new("BLPOP", 2, -1, CommandFlags::blocking(), cmd_blpop));
        self.register(Command::new("BRPOP", 2, -1, CommandFlags::blocking(), cmd_brpop));
    }

    fn register_hash_commands(&mut self) {
        use super::hashes::*;
        let w = CommandFlags::write();
        let r = CommandFlags::readonly();

        self.register(Command::new("HSET", 3, -1, w, cmd_hset));
        self.register(Command::new("HMSET", 3, -1, w, cmd_hmset));
        self.register(Command::new("HGET", 2, 2, r, cmd_hget));
        self.register(Command::new("HMGET", 2, -1, r, cmd_hmget));
        self.register(Command::new("HSETNX", 3, 3, w, cmd_hsetnx));
        self.register(Command::new("HDEL", 2, -1, w, cmd_hdel));
        self.register(Command::new("HEXISTS", 2, 2, r, cmd_hexists));
        self.register(Command::new("HLEN", 1, 1, r, cmd_hlen));
        self.register(Command::new("HSTRLEN", 2, 2, r, cmd_hstrlen));
        self.register(Command::new("HKEYS", 1, 1, r, cmd_hkeys));
        self.register(Command::new("HVALS", 1, 1, r, cmd_hvals));
        self.register(Command::new("HGETALL", 1, 1, r, cmd_hgetall));
        self.register(Command::new("HINCRBY", 3, 3, w, cmd_hincrby));
        self.register(Command::new("HINCRBYFLOAT", 3, 3, w, cmd_hincrbyfloat));
        self.register(Command::new("HSCAN", 2, 6, r, cmd_hscan));
        self.register(Command::new("HRANDFIELD", 1, 3, r, cmd_hrandfield));
    }

    fn register_set_commands(&mut self) {
        use super::sets::*;
        let w = CommandFlags::write();
        let r = CommandFlags::readonly();

        self.register(Command::new("SADD", 2, -1, w, cmd_sadd));
        self.register(Command::new("SREM", 2, -1, w, cmd_srem));
        self.register(Command::new("SISMEMBER", 2, 2, r, cmd_sismember));
        self.register(Command::new("SMEMBERS", 1, 1, r, cmd_smembers));
        self.register(Command::new("SCARD", 1, 1, r, cmd_scard));
        self.register(Command::new("SPOP", 1, 2, w, cmd_spop));
        self.register(Command::new("SRANDMEMBER", 1, 2, r, cmd_srandmember));
        self.register(Command::new("SMOVE", 3, 3, w, cmd_smove));
        self.register(Command::new("SINTER", 1, -1, r, cmd_set_algebra));
        self.register(Command::new("SUNION", 1, -1, r, cmd_set_algebra));
        self.register(Command::new("SDIFF", 1, -1, r, cmd_set_algebra));
        self.register(Command::new("SINTERSTORE", 2, -1, w, cmd_set_algebra_store));
        self.register(Command::new("SUNIONSTORE", 2, -1, w, cmd_set_algebra_store));
        self.register(Command::new("SDIFFSTORE", 2, -1, w, cmd_set_algebra_store));
    }

    fn register_sorted_set_commands(&mut self) {
        use super::sorted_sets::*;
        let w = CommandFlags::write();
        let r = CommandFlags::readonly();

        self.register(Command::new("ZADD", 3, -1, w, cmd_zadd));
        self.register(Command::new("ZREM", 2, -1, w, cmd_zrem));
        self.register(Command::new("ZSCORE", 2, 2, r, cmd_zscore));
        self.register(Command::new("ZCARD", 1, 1, r, cmd_zcard));
        self.register(Command::new("ZINCRBY", 3, 3, w, cmd_zincrby));
        self.register(Command::new("ZRANK", 2, 2, r, cmd_zrank));
        self.register(Command::new("ZREVRANK", 2, 2, r, cmd_zrevrank));
        self.register(Command::new("ZRANGE", 3, 4, r, cmd_zrange));
        self.register(Command::new("ZREVRANGE", 3, 4, r, cmd_zrevrange));
        self.register(Command::new("ZRANGEBYSCORE", 3, 4, r, cmd_zrangebyscore));
        self.register(Command::new("ZREVRANGEBYSCORE", 3, 4, r, cmd_zrevrangebyscore));
        self.register(Command::new("ZCOUNT", 3, 3, r, cmd_zcount));
    }

    fn register_stream_commands(&mut self) {
        use super::streams::*;
        let w = CommandFlags::write();
        let r = CommandFlags::readonly();

        self.register(Command::new("XADD", 4, -1, w, cmd_xadd));
        self.register(Command::new("XLEN", 1, 1, r, cmd_xlen));
        self.register(Command::new("XRANGE", 3, 5, r, cmd_xrange));
        self.register(Command::new("XREVRANGE", 3, 5, r, cmd_xrevrange));
        self.register(Command::new("XREAD", 3, -1, r, cmd_xread));
        self.register(Command::new("XTRIM", 3, 4, w, cmd_xtrim));
        self.register(Command::new("XDEL", 2, -1, w, cmd_xdel));
        self.register(Command::new("XGROUP", 2, 5, w, cmd_xgroup));
        self.register(Command::new("XINFO", 1, 3, r, cmd_xinfo));
    }

    fn register_json_commands(&mut self) {
        use super::json_cmds::*;
        let w = CommandFlags::write();
        let r = CommandFlags::readonly();

        self.register(Command::new("JSON.SET", 3, 4, w, cmd_json_set));
        self.register(Command::new("JSON.GET", 1, -1, r, cmd_json_get));
        self.register(Command::new("JSON.MGET", 2, -1, r, cmd_json_mget));
        self.register(Command::new("JSON.DEL", 1, 2, w, cmd_json_del));
        self.register(Command::new("JSON.FORGET", 1, 2, w, cmd_json_del));
        self.register(Command::new("JSON.TYPE", 1, 2, r, cmd_json_type));
        self.register(Command::new("JSON.NUMINCRBY", 3, 3, w, cmd_json_numincrby));
        self.register(Command::new("JSON.NUMMULTBY", 3, 3, w, cmd_json_nummultby));
        self.register(Command::new("JSON.STRAPPEND", 2, 3, w, cmd_json_strappend));
        self.register(Command::new("JSON.STRLEN", 1, 2, r, cmd_json_strlen));
        self.register(Command::new("JSON.ARRAPPEND", 3, -1, w, cmd_json_arrappend));
        self.register(Command::new("JSON.ARRLEN", 1, 2, r, cmd_json_arrlen));
        self.register(Command::new("JSON.ARRPOP", 1, 3, w, cmd_json_arrpop));
        self.register(Command::new("JSON.ARRINDEX", 3, 5, r, cmd_json_arrindex));
        self.register(Command::new("JSON.ARRINSERT", 4, -1, w, cmd_json_arrinsert));
        self.register(Command::new("JSON.ARRTRIM", 4, 4, w, cmd_json_arrtrim));
        self.register(Command::new("JSON.OBJKEYS", 1, 2, r, cmd_json_objkeys));
        self.register(Command::new("JSON.OBJLEN", 1, 2, r, cmd_json_objlen));
        self.register(Command::new("JSON.RESP", 1, 2, r, cmd_json_resp));
    }

    fn register_transaction_commands(&mut self) {
        use super::transactions::*;
        let n = CommandFlags::no_keys();

        self.register(Command::new("MULTI", 0, 0, n, cmd_multi));
        self.register(Command::new("DISCARD", 0, 0, n, cmd_discard));
        self.register(Command::new("WATCH", 1, -1, CommandFlags::readonly(), cmd_watch));
        self.register(Command::new("UNWATCH", 0, 0, n, cmd_unwatch));
    }

    fn register_connection_commands(&mut self) {
        use super::connection_cmds::*;
        let n = CommandFlags::no_keys();

        self.register(Command::new("PING", 0, 1, n, cmd_ping));
        self.register(Command::new("ECHO", 1, 1, n, cmd_echo));
        self.register(Command::new("CLIENT", 1, 3, n, cmd_client));
    }
}
