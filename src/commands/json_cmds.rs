//! JSON document command handlers.
//!
//! Documents are addressed by path (`$`/`.` root, dot fields, bracketed
//! indices). Every mutation clones the stored root, edits the copy, and
//! swaps it in, so a concurrent reader sees either the old or the new
//! document, never a torn one.

use super::ParsedCommand;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::json::{self, PathSeg};
use crate::types::{CustosValue, Key};
use crate::Result;
use bytes::Bytes;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

fn get_doc(db: &Db, key: &Key) -> Result<Option<Arc<Value>>> {
    match db.get(key) {
        Some(CustosValue::Json(doc)) => Ok(Some(doc)),
        Some(_) => Err(CommandError::WrongType.into()),
        None => Ok(None),
    }
}

fn parse_path_arg(cmd: &ParsedCommand, index: usize) -> Result<Vec<PathSeg>> {
    let raw = match cmd.args.get(index) {
        Some(_) => cmd.get_str(index)?,
        None => "$",
    };
    json::parse_path(raw)
        .ok_or_else(|| CommandError::JsonPathNotFound(raw.to_string()).into())
}

fn path_error(cmd: &ParsedCommand, index: usize) -> crate::Error {
    let raw = cmd
        .get_str(index)
        .unwrap_or("$")
        .to_string();
    CommandError::JsonPathNotFound(raw).into()
}

fn json_bulk(value: &Value) -> Frame {
    Frame::Bulk(Bytes::from(value.to_string()))
}

/// JSON.SET key path value [NX | XX]
pub fn cmd_json_set(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(3)?;
        let key = Key::from(cmd.args[0].clone());
        let path = parse_path_arg(&cmd, 1)?;
        let new_value: Value = serde_json::from_slice(&cmd.args[2])
            .map_err(|_| CommandError::SyntaxError)?;

        let mut nx = false;
        let mut xx = false;
        if let Some(flag) = cmd.args.get(3) {
            if flag.eq_ignore_ascii_case(b"NX") {
                nx = true;
            } else if flag.eq_ignore_ascii_case(b"XX") {
                xx = true;
            } else {
                return Err(CommandError::SyntaxError.into());
            }
        }

        let existing = get_doc(&db, &key)?;

        let exists_at_path = match &existing {
            Some(doc) => json::resolve(doc, &path).is_some(),
            None => false,
        };
        if (nx && exists_at_path) || (xx && !exists_at_path) {
            return Ok(Frame::Null);
        }

        match existing {
            Some(doc) => {
                let mut root = (*doc).clone();
                if !json::set_path(&mut root, &path, new_value) {
                    return Err(path_error(&cmd, 1));
                }
                db.store(key, CustosValue::json(root));
            }
            None => {
                // A new key must be written at the root.
                if !path.is_empty() {
                    return Err(CommandError::NoSuchKey.into());
                }
                db.store(key, CustosValue::json(new_value));
            }
        }
        Ok(Frame::ok())
    })
}

/// JSON.GET key [path ...]
pub fn cmd_json_get(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(1)?;
        let key = Key::from(cmd.args[0].clone());
        let Some(doc) = get_doc(&db, &key)? else {
            return Ok(Frame::Null);
        };

        if cmd.args.len() <= 2 {
            let path = parse_path_arg(&cmd, 1)?;
            return match json::resolve(&doc, &path) {
                Some(value) => Ok(json_bulk(value)),
                None => Err(path_error(&cmd, 1)),
            };
        }

        // Multiple paths: an object keyed by path string.
        let mut result = serde_json::Map::new();
        for i in 1..cmd.args.len() {
            let raw = cmd.get_str(i)?;
            let path = json::parse_path(raw)
                .ok_or_else(|| CommandError::JsonPathNotFound(raw.to_string()))?;
            if let Some(value) = json::resolve(&doc, &path) {
                result.insert(raw.to_string(), value.clone());
            }
        }
        Ok(json_bulk(&Value::Object(result)))
    })
}

/// JSON.MGET key [key ...] path
pub fn cmd_json_mget(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(2)?;
        let path_idx = cmd.args.len() - 1;
        let path = parse_path_arg(&cmd, path_idx)?;

        let frames = cmd.args[..path_idx]
            .iter()
            .map(|raw_key| {
                let key = Key::from(raw_key.clone());
                match get_doc(&db, &key) {
                    Ok(Some(doc)) => json::resolve(&doc, &path)
                        .map(json_bulk)
                        .unwrap_or(Frame::Null),
                    _ => Frame::Null,
                }
            })
            .collect();
        Ok(Frame::Array(frames))
    })
}

/// JSON.DEL key [path] (JSON.FORGET alias)
pub fn cmd_json_del(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(1)?;
        let key = Key::from(cmd.args[0].clone());
        let path = parse_path_arg(&cmd, 1)?;

        let Some(doc) = get_doc(&db, &key)? else {
            return Ok(Frame::Integer(0));
        };

        if path.is_empty() {
            db.delete(&key);
            return Ok(Frame::Integer(1));
        }

        let mut root = (*doc).clone();
        let removed = json::delete_path(&mut root, &path);
        if removed {
            db.store(key, CustosValue::json(root));
        }
        Ok(Frame::Integer(i64::from(removed)))
    })
}

/// JSON.TYPE key [path]
pub fn cmd_json_type(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(1)?;
        let key = Key::from(cmd.args[0].clone());
        let path = parse_path_arg(&cmd, 1)?;

        let Some(doc) = get_doc(&db, &key)? else {
            return Ok(Frame::Null);
        };
        Ok(match json::resolve(&doc, &path) {
            Some(value) => Frame::bulk(json::type_name(value)),
            None => Frame::Null,
        })
    })
}

fn numeric_mutation(
    cmd: ParsedCommand,
    db: Arc<Db>,
    multiply: bool,
) -> Result<Frame> {
    cmd.require_exact_args(3)?;
    let key = Key::from(cmd.args[0].clone());
    let path = parse_path_arg(&cmd, 1)?;
    let operand = cmd.get_f64(2)?;

    let Some(doc) = get_doc(&db, &key)? else {
        return Err(CommandError::NoSuchKey.into());
    };

    let mut root = (*doc).clone();
    let target = json::resolve_mut(&mut root, &path).ok_or_else(|| path_error(&cmd, 1))?;

    let current = target
        .as_f64()
        .ok_or_else(|| CommandError::JsonPathNotFound(cmd.get_str(1).unwrap_or("$").to_string()))?;
    let next = if multiply {
        current * operand
    } else {
        current + operand
    };
    if next.is_nan() || next.is_infinite() {
        return Err(CommandError::NotFloat.into());
    }

    *target = if next.fract() == 0.0 && next.abs() < 9e15 {
        Value::from(next as i64)
    } else {
        serde_json::Number::from_f64(next)
            .map(Value::Number)
            .ok_or(CommandError::NotFloat)?
    };

    let reply = target.to_string();
    db.store(key, CustosValue::json(root));
    Ok(Frame::Bulk(Bytes::from(reply)))
}

/// JSON.NUMINCRBY key path number
pub fn cmd_json_numincrby(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { numeric_mutation(cmd, db, false) })
}

/// JSON.NUMMULTBY key path number
pub fn cmd_json_nummultby(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { numeric_mutation(cmd, db, true) })
}

/// JSON.STRAPPEND key [path] json-string
pub fn cmd_json_strappend(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(2)?;
        let key = Key::from(cmd.args[0].clone());
        let (path, value_idx) = if cmd.args.len() >= 3 {
            (parse_path_arg(&cmd, 1)?, 2)
        } else {
            (Vec::new(), 1)
        };

        let suffix: Value = serde_json::from_slice(&cmd.args[value_idx])
            .map_err(|_| CommandError::SyntaxError)?;
        let Value::String(suffix) = suffix else {
            return Err(CommandError::SyntaxError.into());
        };

        let Some(doc) = get_doc(&db, &key)? else {
            return Err(CommandError::NoSuchKey.into());
        };

        let mut root = (*doc).clone();
        let target = json::resolve_mut(&mut root, &path).ok_or_else(|| path_error(&cmd, 1))?;
        let Value::String(s) = target else {
            return Err(CommandError::WrongType.into());
        };
        s.push_str(&suffix);
        let len = s.chars().count();

        db.store(key, CustosValue::json(root));
        Ok(Frame::Integer(len as i64))
    })
}

/// JSON.STRLEN key [path]
pub fn cmd_json_strlen(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(1)?;
        let key = Key::from(cmd.args[0].clone());
        let path = parse_path_arg(&cmd, 1)?;

        let Some(doc) = get_doc(&db, &key)? else {
            return Ok(Frame::Null);
        };
        match json::resolve(&doc, &path) {
            Some(Value::String(s)) => Ok(Frame::Integer(s.chars().count() as i64)),
            Some(_) => Err(CommandError::WrongType.into()),
            None => Err(path_error(&cmd, 1)),
        }
    })
}

/// JSON.ARRAPPEND key path value [value ...]
pub fn cmd_json_arrappend(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(3)?;
        let key = Key::from(cmd.args[0].clone());
        let path = parse_path_arg(&cmd, 1)?;

        let mut values = Vec::with_capacity(cmd.args.len() - 2);
        for raw in &cmd.args[2..] {
            values.push(serde_json::from_slice(raw).map_err(|_| CommandError::SyntaxError)?);
        }

        let Some(doc) = get_doc(&db, &key)? else {
            return Err(CommandError::NoSuchKey.into());
        };

        let mut root = (*doc).clone();
        let target = json::resolve_mut(&mut root, &path).ok_or_else(|| path_error(&cmd, 1))?;
        let Value::Array(arr) = target else {
            return Err(CommandError::WrongType.into());
        };
        arr.extend(values);
        let len = arr.len();

        db.store(key, CustosValue::json(root));
        Ok(Frame::Integer(len as i64))
    })
}

/// JSON.ARRLEN key [path]
pub fn cmd_json_arrlen(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(1)?;
        let key = Key::from(cmd.args[0].clone());
        let path = parse_path_arg(&cmd, 1)?;

        let Some(doc) = get_doc(&db, &key)? else {
            return Ok(Frame::Null);
        };
        match json::resolve(&doc, &path) {
            Some(Value::Array(arr)) => Ok(Frame::Integer(arr.len() as i64)),
            Some(_) => Err(CommandError::WrongType.into()),
            None => Err(path_error(&cmd, 1)),
        }
    })
}

/// JSON.ARRPOP key [path [index]]
pub fn cmd_json_arrpop(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(1)?;
        let key = Key::from(cmd.args[0].clone());
        let path = parse_path_arg(&cmd, 1)?;
        let index = match cmd.args.get(2) {
            Some(_) => cmd.get_i64(2)?,
            None => -1,
        };

        let Some(doc) = get_doc(&db, &key)? else {
            return Ok(Frame::Null);
        };

        let mut root = (*doc).clone();
        let target = json::resolve_mut(&mut root, &path).ok_or_else(|| path_error(&cmd, 1))?;
        let Value::Array(arr) = target else {
            return Err(CommandError::WrongType.into());
        };
        if arr.is_empty() {
            return Ok(Frame::Null);
        }

        let len = arr.len() as i64;
        let idx = (if index < 0 { len + index } else { index }).clamp(0, len - 1) as usize;
        let popped = arr.remove(idx);

        db.store(key, CustosValue::json(root));
        Ok(json_bulk(&popped))
    })
}

/// JSON.ARRINDEX key path value [start [stop]]
pub fn cmd_json_arrindex(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(3)?;
        let key = Key::from(cmd.args[0].clone());
        let path = parse_path_arg(&cmd, 1)?;
        let needle: Value =
            serde_json::from_slice(&cmd.args[2]).map_err(|_| CommandError::SyntaxError)?;
        let start = match cmd.args.get(3) {
            Some(_) => cmd.get_i64(3)?,
            None => 0,
        };
        let stop = match cmd.args.get(4) {
            Some(_) => cmd.get_i64(4)?,
            None => 0,
        };

        let Some(doc) = get_doc(&db, &key)? else {
            return Err(CommandError::NoSuchKey.into());
        };
        match json::resolve(&doc, &path) {
            Some(Value::Array(arr)) => {
                let len = arr.len() as i64;
                let start = (if start < 0 { len + start } else { start }).max(0) as usize;
                // A stop of 0 means "to the end".
                let stop = if stop <= 0 {
                    (if stop < 0 { len + stop } else { len - 1 }).max(0) as usize
                } else {
                    (stop as usize).min(arr.len().saturating_sub(1))
                };

                for (i, item) in arr.iter().enumerate().take(stop + 1).skip(start) {
                    if item == &needle {
                        return Ok(Frame::Integer(i as i64));
                    }
                }
                Ok(Frame::Integer(-1))
            }
            Some(_) => Err(CommandError::WrongType.into()),
            None => Err(path_error(&cmd, 1)),
        }
    })
}

/// JSON.ARRINSERT key path index value [value ...]
pub fn cmd_json_arrinsert(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(4)?;
        let key = Key::from(cmd.args[0].clone());
        let path = parse_path_arg(&cmd, 1)?;
        let index = cmd.get_i64(2)?;

        let mut values = Vec::with_capacity(cmd.args.len() - 3);
        for raw in &cmd.args[3..] {
            values.push(serde_json::from_slice::<Value>(raw).map_err(|_| CommandError::SyntaxError)?);
        }

        let Some(doc) = get_doc(&db, &key)? else {
            return Err(CommandError::NoSuchKey.into());
        };

        let mut root = (*doc).clone();
        let target = json::resolve_mut(&mut root, &path).ok_or_else(|| path_error(&cmd, 1))?;
        let Value::Array(arr) = target else {
            return Err(CommandError::WrongType.into());
        };

        let len = arr.len() as i64;
        let at = if index < 0 { len + index } else { index };
        if at < 0 || at > len {
            return Err(CommandError::IndexOutOfRange.into());
        }
        for (offset, value) in values.into_iter().enumerate() {
            arr.insert(at as usize + offset, value);
        }
        let new_len = arr.len();

        db.store(key, CustosValue::json(root));
        Ok(Frame::Integer(new_len as i64))
    })
}

/// JSON.ARRTRIM key path start stop
pub fn cmd_json_arrtrim(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_exact_args(4)?;
        let key = Key::from(cmd.args[0].clone());
        let path = parse_path_arg(&cmd, 1)?;
        let start = cmd.get_i64(2)?;
        let stop = cmd.get_i64(3)?;

        let Some(doc) = get_doc(&db, &key)? else {
            return Err(CommandError::NoSuchKey.into());
        };

        let mut root = (*doc).clone();
        let target = json::resolve_mut(&mut root, &path).ok_or_else(|| path_error(&cmd, 1))?;
        let Value::Array(arr) = target else {
            return Err(CommandError::WrongType.into());
        };

        let len = arr.len() as i64;
        let start = (if start < 0 { len + start } else { start }).max(0);
        let stop = (if stop < 0 { len + stop } else { stop }).min(len - 1);

        if len == 0 || start > stop {
            arr.clear();
        } else {
            arr.truncate(stop as usize + 1);
            arr.drain(..start as usize);
        }
        let new_len = arr.len();

        db.store(key, CustosValue::json(root));
        Ok(Frame::Integer(new_len as i64))
    })
}

/// JSON.OBJKEYS key [path]
pub fn cmd_json_objkeys(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(1)?;
        let key = Key::from(cmd.args[0].clone());
        let path = parse_path_arg(&cmd, 1)?;

        let Some(doc) = get_doc(&db, &key)? else {
            return Ok(Frame::Null);
        };
        match json::resolve(&doc, &path) {
            Some(Value::Object(obj)) => Ok(Frame::Array(
                obj.keys()
                    .map(|k| Frame::Bulk(Bytes::from(k.clone())))
                    .collect(),
            )),
            Some(_) => Err(CommandError::WrongType.into()),
            None => Err(path_error(&cmd, 1)),
        }
    })
}

/// JSON.OBJLEN key [path]
pub fn cmd_json_objlen(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(1)?;
        let key = Key::from(cmd.args[0].clone());
        let path = parse_path_arg(&cmd, 1)?;

        let Some(doc) = get_doc(&db, &key)? else {
            return Ok(Frame::Null);
        };
        match json::resolve(&doc, &path) {
            Some(Value::Object(obj)) => Ok(Frame::Integer(obj.len() as i64)),
            Some(_) => Err(CommandError::WrongType.into()),
            None => Err(path_error(&cmd, 1)),
        }
    })
}

/// JSON.RESP key [path] - render a document as RESP structures
pub fn cmd_json_resp(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(1)?;
        let key = Key::from(cmd.args[0].clone());
        let path = parse_path_arg(&cmd, 1)?;

        let Some(doc) = get_doc(&db, &key)? else {
            return Ok(Frame::Null);
        };
        match json::resolve(&doc, &path) {
            Some(value) => Ok(to_resp(value)),
            None => Err(path_error(&cmd, 1)),
        }
    })
}

/// RESP rendering: null -> Null, booleans and numbers per RedisJSON
/// conventions, arrays prefixed with `[`, objects with `{`.
fn to_resp(value: &Value) -> Frame {
    match value {
        Value::Null => Frame::Null,
        Value::Bool(b) => Frame::simple(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Frame::Integer(i)
            } else {
                Frame::Bulk(Bytes::from(n.to_string()))
            }
        }
        Value::String(s) => Frame::Bulk(Bytes::from(s.clone())),
        Value::Array(arr) => {
            let mut frames = Vec::with_capacity(arr.len() + 1);
            frames.push(Frame::simple("["));
            frames.extend(arr.iter().map(to_resp));
            Frame::Array(frames)
        }
        Value::Object(obj) => {
            let mut frames = Vec::with_capacity(obj.len() * 2 + 1);
            frames.push(Frame::simple("{"));
            for (k, v) in obj {
                frames.push(Frame::Bulk(Bytes::from(k.clone())));
                frames.push(to_resp(v));
            }
            Frame::Array(frames)
        }
    }
}
