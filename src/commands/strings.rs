//! String command handlers.

use super::ParsedCommand;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{CustosValue, Expiry, Key};
use crate::Result;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// SET key value [EX seconds | PX milliseconds] [NX | XX]
pub fn cmd_set(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(2)?;
        let key = Key::from(cmd.args[0].clone());
        let value = cmd.args[1].clone();

        let mut expiry = Expiry::Never;
        let mut nx = false;
        let mut xx = false;

        let mut i = 2;
        while i < cmd.args.len() {
            let opt = cmd.get_str(i)?.to_uppercase();
            match opt.as_str() {
                "EX" => {
                    let seconds = cmd.get_i64(i + 1)?;
                    if seconds <= 0 {
                        return Err(CommandError::InvalidExpireTime.into());
                    }
                    expiry = Expiry::from_seconds(seconds);
                    i += 2;
                }
                "PX" => {
                    let millis = cmd.get_i64(i + 1)?;
                    if millis <= 0 {
                        return Err(CommandError::InvalidExpireTime.into());
                    }
                    expiry = Expiry::from_millis(millis);
                    i += 2;
                }
                "NX" => {
                    nx = true;
                    i += 1;
                }
                "XX" => {
                    xx = true;
                    i += 1;
                }
                _ => return Err(CommandError::SyntaxError.into()),
            }
        }

        if (nx && db.exists(&key)) || (xx && !db.exists(&key)) {
            return Ok(Frame::Null);
        }

        db.set_with_expiry(key, CustosValue::String(value), expiry);
        Ok(Frame::ok())
    })
}

/// GET key
pub fn cmd_get(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        match db.get_string(&key)? {
            Some(value) => Ok(Frame::Bulk(value)),
            None => Ok(Frame::Null),
        }
    })
}

/// GETSET key value
pub fn cmd_getset(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let old = db.get_string(&key)?;
        db.set(key, CustosValue::String(cmd.args[1].clone()));
        match old {
            Some(value) => Ok(Frame::Bulk(value)),
            None => Ok(Frame::Null),
        }
    })
}

/// SETNX key value
pub fn cmd_setnx(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        if db.exists(&key) {
            return Ok(Frame::Integer(0));
        }
        db.set(key, CustosValue::String(cmd.args[1].clone()));
        Ok(Frame::Integer(1))
    })
}

/// SETEX key seconds value
pub fn cmd_setex(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let seconds = cmd.get_i64(1)?;
        if seconds <= 0 {
            return Err(CommandError::InvalidExpireTime.into());
        }
        db.set_with_expiry(
            key,
            CustosValue::String(cmd.args[2].clone()),
            Expiry::from_seconds(seconds),
        );
        Ok(Frame::ok())
    })
}

/// PSETEX key milliseconds value
pub fn cmd_psetex(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let millis = cmd.get_i64(1)?;
        if millis <= 0 {
            return Err(CommandError::InvalidExpireTime.into());
        }
        db.set_with_expiry(
            key,
            CustosValue::String(cmd.args[2].clone()),
            Expiry::from_millis(millis),
        );
        Ok(Frame::ok())
    })
}

/// MSET key value [key value ...]
pub fn cmd_mset(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        if cmd.args.is_empty() || cmd.args.len() % 2 != 0 {
            return Err(CommandError::WrongArity {
                command: cmd.name.clone(),
            }
            .into());
        }
        for pair in cmd.args.chunks(2) {
            db.set(
                Key::from(pair[0].clone()),
                CustosValue::String(pair[1].clone()),
            );
        }
        Ok(Frame::ok())
    })
}

/// MGET key [key ...]
pub fn cmd_mget(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let frames = cmd
            .args
            .iter()
            .map(|arg| {
                let key = Key::from(arg.clone());
                match db.get(&key) {
                    Some(CustosValue::String(s)) => Frame::Bulk(s),
                    // Wrong-typed and absent keys both read as null.
                    _ => Frame::Null,
                }
            })
            .collect();
        Ok(Frame::Array(frames))
    })
}

/// APPEND key value
pub fn cmd_append(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let suffix = &cmd.args[1];

        let new_value = match db.get_string(&key)? {
            Some(existing) => {
                let mut combined = Vec::with_capacity(existing.len() + suffix.len());
                combined.extend_from_slice(&existing);
                combined.extend_from_slice(suffix);
                Bytes::from(combined)
            }
            None => suffix.clone(),
        };

        let len = new_value.len();
        db.store(key, CustosValue::String(new_value));
        Ok(Frame::Integer(len as i64))
    })
}

/// GETRANGE key start end (SUBSTR alias), inclusive with negative indices
pub fn cmd_getrange(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let start = cmd.get_i64(1)?;
        let end = cmd.get_i64(2)?;

        let Some(value) = db.get_string(&key)? else {
            return Ok(Frame::Bulk(Bytes::new()));
        };

        let len = value.len() as i64;
        let start = (if start < 0 { len + start } else { start }).max(0);
        let end = (if end < 0 { len + end } else { end }).min(len - 1);

        if len == 0 || start > end {
            return Ok(Frame::Bulk(Bytes::new()));
        }
        Ok(Frame::Bulk(value.slice(start as usize..=end as usize)))
    })
}

/// SETRANGE key offset value
pub fn cmd_setrange(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let offset = cmd.get_i64(1)?;
        if offset < 0 {
            return Err(CommandError::IndexOutOfRange.into());
        }
        let offset = offset as usize;
        let patch = &cmd.args[2];

        let mut buf = db
            .get_string(&key)?
            .map(|b| b.to_vec())
            .unwrap_or_default();
        if buf.len() < offset + patch.len() {
            buf.resize(offset + patch.len(), 0);
        }
        buf[offset..offset + patch.len()].copy_from_slice(patch);

        let len = buf.len();
        db.store(key, CustosValue::String(Bytes::from(buf)));
        Ok(Frame::Integer(len as i64))
    })
}

/// STRLEN key
pub fn cmd_strlen(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let len = db.get_string(&key)?.map(|v| v.len()).unwrap_or(0);
        Ok(Frame::Integer(len as i64))
    })
}

/// Shared INCR/DECR/INCRBY/DECRBY implementation.
fn incr_by(db: &Db, key: Key, delta: i64) -> Result<Frame> {
    let current: i64 = match db.get_string(&key)? {
        Some(value) => std::str::from_utf8(&value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(CommandError::NotInteger)?,
        None => 0,
    };

    let next = current
        .checked_add(delta)
        .ok_or(CommandError::NotInteger)?;
    db.store(key, CustosValue::String(Bytes::from(next.to_string())));
    Ok(Frame::Integer(next))
}

/// INCR key
pub fn cmd_incr(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { incr_by(&db, Key::from(cmd.args[0].clone()), 1) })
}

/// DECR key
pub fn cmd_decr(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { incr_by(&db, Key::from(cmd.args[0].clone()), -1) })
}

/// INCRBY key increment
pub fn cmd_incrby(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let delta = cmd.get_i64(1)?;
        incr_by(&db, Key::from(cmd.args[0].clone()), delta)
    })
}

/// DECRBY key decrement
pub fn cmd_decrby(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let delta = cmd.get_i64(1)?;
        incr_by(
            &db,
            Key::from(cmd.args[0].clone()),
            delta.checked_neg().ok_or(CommandError::NotInteger)?,
        )
    })
}

/// INCRBYFLOAT key increment
pub fn cmd_incrbyfloat(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let delta = cmd.get_f64(1)?;

        let current: f64 = match db.get_string(&key)? {
            Some(value) => std::str::from_utf8(&value)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(CommandError::NotFloat)?,
            None => 0.0,
        };

        let next = current + delta;
        if next.is_nan() || next.is_infinite() {
            return Err(CommandError::NotFloat.into());
        }

        let formatted = format_float(next);
        db.store(key, CustosValue::String(Bytes::from(formatted.clone())));
        Ok(Frame::Bulk(Bytes::from(formatted)))
    })
}

/// Format a float the way Redis does: no trailing zeros, no exponent for
/// reasonable magnitudes.
pub(crate) fn format_float(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e17 {
        format!("{}", value as i64)
    } else {
        let mut s = format!("{value:.17}");
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        s
    }
}
