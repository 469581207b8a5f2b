//! Key management command handlers.

use super::ParsedCommand;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{current_timestamp_ms, Expiry, Key};
use crate::Result;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// DEL key [key ...]
pub fn cmd_del(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let removed = cmd
            .args
            .iter()
            .filter(|arg| db.delete(&Key::from((*arg).clone())))
            .count();
        Ok(Frame::Integer(removed as i64))
    })
}

/// EXISTS key [key ...] - counts repeated keys repeatedly
pub fn cmd_exists(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let count = cmd
            .args
            .iter()
            .filter(|arg| db.exists(&Key::from((*arg).clone())))
            .count();
        Ok(Frame::Integer(count as i64))
    })
}

/// KEYS pattern
pub fn cmd_keys(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let keys = db.keys(&cmd.args[0]);
        Ok(Frame::Array(
            keys.into_iter().map(|k| Frame::Bulk(k.to_bytes())).collect(),
        ))
    })
}

/// SCAN cursor [MATCH pattern] [COUNT count]
pub fn cmd_scan(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let cursor: usize = cmd
            .get_str(0)?
            .parse()
            .map_err(|_| CommandError::InvalidCursor)?;

        let mut pattern: Option<Bytes> = None;
        let mut count = 10usize;

        let mut i = 1;
        while i < cmd.args.len() {
            match cmd.get_str(i)?.to_uppercase().as_str() {
                "MATCH" => {
                    pattern = Some(
                        cmd.args
                            .get(i + 1)
                            .ok_or(CommandError::SyntaxError)?
                            .clone(),
                    );
                    i += 2;
                }
                "COUNT" => {
                    count = cmd.get_u64(i + 1)? as usize;
                    if count == 0 {
                        return Err(CommandError::SyntaxError.into());
                    }
                    i += 2;
                }
                _ => return Err(CommandError::SyntaxError.into()),
            }
        }

        let (next_cursor, keys) = db.scan(cursor, pattern.as_deref(), count);
        Ok(Frame::Array(vec![
            Frame::Bulk(Bytes::from(next_cursor.to_string())),
            Frame::Array(keys.into_iter().map(|k| Frame::Bulk(k.to_bytes())).collect()),
        ]))
    })
}

/// TYPE key
pub fn cmd_type(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        match db.key_type(&key) {
            Some(value_type) => Ok(Frame::simple(value_type.as_str())),
            None => Ok(Frame::simple("none")),
        }
    })
}

/// TTL key
pub fn cmd_ttl(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        Ok(Frame::Integer(db.ttl(&key)))
    })
}

/// PTTL key
pub fn cmd_pttl(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        Ok(Frame::Integer(db.pttl(&key)))
    })
}

/// Shared EXPIRE/PEXPIRE/EXPIREAT/PEXPIREAT implementation.
fn set_expiry(db: &Db, key: &Key, expiry: Expiry) -> Frame {
    // An expiration already in the past deletes the key outright.
    if let Expiry::At(ts) = expiry {
        if ts <= current_timestamp_ms() {
            return if db.delete(key) {
                Frame::Integer(1)
            } else {
                Frame::Integer(0)
            };
        }
    }
    Frame::Integer(i64::from(db.expire(key, expiry)))
}

/// EXPIRE key seconds
pub fn cmd_expire(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let seconds = cmd.get_i64(1)?;
        Ok(set_expiry(&db, &key, Expiry::from_seconds(seconds)))
    })
}

/// PEXPIRE key milliseconds
pub fn cmd_pexpire(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let millis = cmd.get_i64(1)?;
        Ok(set_expiry(&db, &key, Expiry::from_millis(millis)))
    })
}

/// EXPIREAT key unix-seconds
pub fn cmd_expireat(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let timestamp = cmd.get_i64(1)?;
        Ok(set_expiry(&db, &key, Expiry::at_seconds(timestamp)))
    })
}

/// PEXPIREAT key unix-milliseconds
pub fn cmd_pexpireat(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let timestamp = cmd.get_i64(1)?;
        Ok(set_expiry(&db, &key, Expiry::at_millis(timestamp)))
    })
}

/// PERSIST key
pub fn cmd_persist(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        Ok(Frame::Integer(i64::from(db.persist(&key))))
    })
}

/// RANDOMKEY
pub fn cmd_randomkey(
    _cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        match db.random_key() {
            Some(key) => Ok(Frame::Bulk(key.to_bytes())),
            None => Ok(Frame::Null),
        }
    })
}

/// RENAME key newkey
pub fn cmd_rename(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let src = Key::from(cmd.args[0].clone());
        let dst = Key::from(cmd.args[1].clone());

        let stored = db.take_entry(&src).ok_or(CommandError::NoSuchKey)?;
        db.put_entry(dst, stored);
        Ok(Frame::ok())
    })
}

/// RENAMENX key newkey
pub fn cmd_renamenx(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let src = Key::from(cmd.args[0].clone());
        let dst = Key::from(cmd.args[1].clone());

        if !db.exists(&src) {
            return Err(CommandError::NoSuchKey.into());
        }
        if db.exists(&dst) {
            return Ok(Frame::Integer(0));
        }

        let stored = db.take_entry(&src).ok_or(CommandError::NoSuchKey)?;
        db.put_entry(dst, stored);
        Ok(Frame::Integer(1))
    })
}

/// DBSIZE
pub fn cmd_dbsize(
    _cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { Ok(Frame::Integer(db.len() as i64)) })
}

/// FLUSHDB
pub fn cmd_flushdb(
    _cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        db.flush();
        Ok(Frame::ok())
    })
}
