//! Hash command handlers.

use super::strings::format_float;
use super::ParsedCommand;
use crate::error::CommandError;
use crate::pattern::glob_match;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{CustosValue, Key};
use crate::Result;
use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

fn get_or_create_hash(db: &Db, key: &Key) -> Result<CustosValue> {
    match db.get(key) {
        Some(value @ CustosValue::Hash(_)) => Ok(value),
        Some(_) => Err(CommandError::WrongType.into()),
        None => Ok(CustosValue::new_hash()),
    }
}

fn get_hash(db: &Db, key: &Key) -> Result<Option<CustosValue>> {
    match db.get(key) {
        Some(value @ CustosValue::Hash(_)) => Ok(Some(value)),
        Some(_) => Err(CommandError::WrongType.into()),
        None => Ok(None),
    }
}

/// HSET key field value [field value ...]
pub fn cmd_hset(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        if cmd.args.len() < 3 || cmd.args.len() % 2 == 0 {
            return Err(CommandError::WrongArity {
                command: cmd.name.clone(),
            }
            .into());
        }

        let key = Key::from(cmd.args[0].clone());
        let value = get_or_create_hash(&db, &key)?;

        let added = {
            let hash = value.as_hash().expect("created as hash");
            let mut hash = hash.write();
            let mut added = 0;
            for pair in cmd.args[1..].chunks(2) {
                if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                    added += 1;
                }
            }
            added
        };

        db.store(key, value);
        Ok(Frame::Integer(added))
    })
}

/// HMSET key field value [field value ...] - legacy form, replies +OK
pub fn cmd_hmset(
    cmd: ParsedCommand,
    db: Arc<Db>,
    client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd_hset(cmd, db, client).await?;
        Ok(Frame::ok())
    })
}

/// HGET key field
pub fn cmd_hget(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let Some(value) = get_hash(&db, &key)? else {
            return Ok(Frame::Null);
        };
        let field = value
            .as_hash()
            .expect("checked as hash")
            .read()
            .get(&cmd.args[1])
            .cloned();
        Ok(field.map(Frame::Bulk).unwrap_or(Frame::Null))
    })
}

/// HMGET key field [field ...]
pub fn cmd_hmget(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let value = get_hash(&db, &key)?;

        let frames = match value {
            Some(value) => {
                let hash = value.as_hash().expect("checked as hash");
                let hash = hash.read();
                cmd.args[1..]
                    .iter()
                    .map(|f| hash.get(f).cloned().map(Frame::Bulk).unwrap_or(Frame::Null))
                    .collect()
            }
            None => vec![Frame::Null; cmd.args.len() - 1],
        };
        Ok(Frame::Array(frames))
    })
}

/// HSETNX key field value
pub fn cmd_hsetnx(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let value = get_or_create_hash(&db, &key)?;

        let inserted = {
            let hash = value.as_hash().expect("created as hash");
            let mut hash = hash.write();
            if hash.contains_key(&cmd.args[1]) {
                false
            } else {
                hash.insert(cmd.args[1].clone(), cmd.args[2].clone());
                true
            }
        };

        if inserted {
            db.store(key, value);
        }
        Ok(Frame::Integer(i64::from(inserted)))
    })
}

/// HDEL key field [field ...]
pub fn cmd_hdel(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let Some(value) = get_hash(&db, &key)? else {
            return Ok(Frame::Integer(0));
        };

        let removed = {
            let hash = value.as_hash().expect("checked as hash");
            let mut hash = hash.write();
            cmd.args[1..]
                .iter()
                .filter(|f| hash.remove(*f).is_some())
                .count()
        };

        db.store(key, value);
        Ok(Frame::Integer(removed as i64))
    })
}

/// HEXISTS key field
pub fn cmd_hexists(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let exists = match get_hash(&db, &key)? {
            Some(value) => value
                .as_hash()
                .expect("checked as hash")
                .read()
                .contains_key(&cmd.args[1]),
            None => false,
        };
        Ok(Frame::Integer(i64::from(exists)))
    })
}

/// HLEN key
pub fn cmd_hlen(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let len = match get_hash(&db, &key)? {
            Some(value) => value.as_hash().expect("checked as hash").read().len(),
            None => 0,
        };
        Ok(Frame::Integer(len as i64))
    })
}

/// HSTRLEN key field
pub fn cmd_hstrlen(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let len = match get_hash(&db, &key)? {
            Some(value) => value
                .as_hash()
                .expect("checked as hash")
                .read()
                .get(&cmd.args[1])
                .map(|v| v.len())
                .unwrap_or(0),
            None => 0,
        };
        Ok(Frame::Integer(len as i64))
    })
}

/// HKEYS key
pub fn cmd_hkeys(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let frames = match get_hash(&db, &key)? {
            Some(value) => value
                .as_hash()
                .expect("checked as hash")
                .read()
                .keys()
                .cloned()
                .map(Frame::Bulk)
                .collect(),
            None => vec![],
        };
        Ok(Frame::Array(frames))
    })
}

/// HVALS key
pub fn cmd_hvals(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let frames = match get_hash(&db, &key)? {
            Some(value) => value
                .as_hash()
                .expect("checked as hash")
                .read()
                .values()
                .cloned()
                .map(Frame::Bulk)
                .collect(),
            None => vec![],
        };
        Ok(Frame::Array(frames))
    })
}

/// HGETALL key
pub fn cmd_hgetall(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let frames = match get_hash(&db, &key)? {
            Some(value) => {
                let hash = value.as_hash().expect("checked as hash");
                let hash = hash.read();
                let mut frames = Vec::with_capacity(hash.len() * 2);
                for (field, val) in hash.iter() {
                    frames.push(Frame::Bulk(field.clone()));
                    frames.push(Frame::Bulk(val.clone()));
                }
                frames
            }
            None => vec![],
        };
        Ok(Frame::Array(frames))
    })
}

/// HINCRBY key field increment
pub fn cmd_hincrby(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let delta = cmd.get_i64(2)?;
        let value = get_or_create_hash(&db, &key)?;

        let next = {
            let hash = value.as_hash().expect("created as hash");
            let mut hash = hash.write();
            let current: i64 = match hash.get(&cmd.args[1]) {
                Some(raw) => std::str::from_utf8(raw)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(CommandError::NotInteger)?,
                None => 0,
            };
            let next = current.checked_add(delta).ok_or(CommandError::NotInteger)?;
            hash.insert(cmd.args[1].clone(), Bytes::from(next.to_string()));
            next
        };

        db.store(key, value);
        Ok(Frame::Integer(next))
    })
}

/// HINCRBYFLOAT key field increment
pub fn cmd_hincrbyfloat(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let delta = cmd.get_f64(2)?;
        let value = get_or_create_hash(&db, &key)?;

        let formatted = {
            let hash = value.as_hash().expect("created as hash");
            let mut hash = hash.write();
            let current: f64 = match hash.get(&cmd.args[1]) {
                Some(raw) => std::str::from_utf8(raw)
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
            hash.insert(cmd.args[1].clone(), Bytes::from(formatted.clone()));
            formatted
        };

        db.store(key, value);
        Ok(Frame::Bulk(Bytes::from(formatted)))
    })
}

/// HSCAN key cursor [MATCH pattern] [COUNT count]
pub fn cmd_hscan(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let cursor: usize = cmd
            .get_str(1)?
            .parse()
            .map_err(|_| CommandError::InvalidCursor)?;

        let mut pattern: Option<Bytes> = None;
        let mut count = 10usize;
        let mut i = 2;
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

        let Some(value) = get_hash(&db, &key)? else {
            return Ok(Frame::Array(vec![
                Frame::Bulk(Bytes::from("0")),
                Frame::Array(vec![]),
            ]));
        };

        let (next_cursor, page) = {
            let hash = value.as_hash().expect("checked as hash");
            let hash = hash.read();
            let mut page = Vec::new();
            let mut next_cursor = 0usize;

            for (idx, (field, val)) in hash.iter().enumerate() {
                if idx < cursor {
                    continue;
                }
                let matched = pattern
                    .as_deref()
                    .map(|p| glob_match(p, field))
                    .unwrap_or(true);
                if matched {
                    page.push(Frame::Bulk(field.clone()));
                    page.push(Frame::Bulk(val.clone()));
                }
                if page.len() / 2 >= count {
                    next_cursor = idx + 1;
                    break;
                }
            }
            if page.len() / 2 < count {
                next_cursor = 0;
            }
            (next_cursor, page)
        };

        Ok(Frame::Array(vec![
            Frame::Bulk(Bytes::from(next_cursor.to_string())),
            Frame::Array(page),
        ]))
    })
}

/// HRANDFIELD key [count [WITHVALUES]]
pub fn cmd_hrandfield(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let count = match cmd.args.get(1) {
            Some(_) => Some(cmd.get_i64(1)?),
            None => None,
        };
        let with_values = match cmd.args.get(2) {
            Some(_) => {
                if !cmd.get_str(2)?.eq_ignore_ascii_case("WITHVALUES") {
                    return Err(CommandError::SyntaxError.into());
                }
                true
            }
            None => false,
        };

        let Some(value) = get_hash(&db, &key)? else {
            return Ok(match count {
                Some(_) => Frame::Array(vec![]),
                None => Frame::Null,
            });
        };

        let hash = value.as_hash().expect("checked as hash");
        let hash = hash.read();
        let mut rng = rand::thread_rng();

        let picked: Vec<(Bytes, Bytes)> = match count {
            None => hash
                .iter()
                .choose(&mut rng)
                .map(|(f, v)| vec![(f.clone(), v.clone())])
                .unwrap_or_default(),
            Some(n) if n >= 0 => hash
                .iter()
                .choose_multiple(&mut rng, (n as usize).min(hash.len()))
                .into_iter()
                .map(|(f, v)| (f.clone(), v.clone()))
                .collect(),
            // Negative count: duplicates permitted.
            Some(n) => (0..n.unsigned_abs() as usize)
                .filter_map(|_| hash.iter().choose(&mut rng))
                .map(|(f, v)| (f.clone(), v.clone()))
                .collect(),
        };

        if count.is_none() {
            return Ok(picked
                .into_iter()
                .next()
                .map(|(f, _)| Frame::Bulk(f))
                .unwrap_or(Frame::Null));
        }

        let mut frames = Vec::new();
        for (field, val) in picked {
            frames.push(Frame::Bulk(field));
            if with_values {
                frames.push(Frame::Bulk(val));
            }
        }
        Ok(Frame::Array(frames))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ServerStats;

    fn setup() -> (Arc<Db>, Arc<ClientState>) {
        (
            Arc::new(Db::new(Arc::new(ServerStats::default()))),
            Arc::new(ClientState::new(1, "test".into())),
        )
    }

    fn cmd(name: &str, args: &[&str]) -> ParsedCommand {
        ParsedCommand::from_parts(
            name.into(),
            args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect(),
        )
    }

    #[tokio::test]
    async fn test_hset_returns_new_fields() {
        let (db, client) = setup();
        let reply = cmd_hset(
            cmd("HSET", &["h", "f1", "v1", "f2", "v2"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::Integer(2));

        // Updating an existing field adds nothing.
        let reply = cmd_hset(
            cmd("HSET", &["h", "f1", "changed", "f3", "v3"]),
            db,
            client,
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::Integer(1));
    }

    #[tokio::test]
    async fn test_hget_hmget() {
        let (db, client) = setup();
        cmd_hset(cmd("HSET", &["h", "a", "1", "b", "2"]), db.clone(), client.clone())
            .await
            .unwrap();

        let reply = cmd_hget(cmd("HGET", &["h", "a"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("1")));

        let reply = cmd_hmget(cmd("HMGET", &["h", "a", "missing", "b"]), db, client)
            .await
            .unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![
                Frame::Bulk(Bytes::from("1")),
                Frame::Null,
                Frame::Bulk(Bytes::from("2")),
            ])
        );
    }

    #[tokio::test]
    async fn test_hsetnx() {
        let (db, client) = setup();
        let reply = cmd_hsetnx(cmd("HSETNX", &["h", "f", "v"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(1));

        let reply = cmd_hsetnx(cmd("HSETNX", &["h", "f", "other"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(0));

        let reply = cmd_hget(cmd("HGET", &["h", "f"]), db, client).await.unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("v")));
    }

    #[tokio::test]
    async fn test_hdel_removes_key_when_empty() {
        let (db, client) = setup();
        cmd_hset(cmd("HSET", &["h", "f", "v"]), db.clone(), client.clone())
            .await
            .unwrap();
        let reply = cmd_hdel(cmd("HDEL", &["h", "f", "ghost"]), db.clone(), client)
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(1));
        assert!(!db.exists(&Key::from("h")));
    }

    #[tokio::test]
    async fn test_hincrby() {
        let (db, client) = setup();
        let reply = cmd_hincrby(cmd("HINCRBY", &["h", "n", "5"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(5));

        let reply = cmd_hincrby(cmd("HINCRBY", &["h", "n", "-2"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(3));

        // Non-integer field errors.
        cmd_hset(cmd("HSET", &["h", "s", "abc"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert!(cmd_hincrby(cmd("HINCRBY", &["h", "s", "1"]), db, client)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_hincrbyfloat() {
        let (db, client) = setup();
        let reply = cmd_hincrbyfloat(cmd("HINCRBYFLOAT", &["h", "f", "1.5"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("1.5")));
        let reply = cmd_hincrbyfloat(cmd("HINCRBYFLOAT", &["h", "f", "0.5"]), db, client)
            .await
            .unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("2")));
    }

    #[tokio::test]
    async fn test_hlen_hkeys_hvals_hgetall() {
        let (db, client) = setup();
        cmd_hset(cmd("HSET", &["h", "a", "1", "b", "2"]), db.clone(), client.clone())
            .await
            .unwrap();

        let reply = cmd_hlen(cmd("HLEN", &["h"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(2));

        let reply = cmd_hkeys(cmd("HKEYS", &["h"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 2);

        let reply = cmd_hvals(cmd("HVALS", &["h"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 2);

        let reply = cmd_hgetall(cmd("HGETALL", &["h"]), db, client).await.unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_hscan_with_match() {
        let (db, client) = setup();
        cmd_hset(
            cmd("HSET", &["h", "field:1", "a", "field:2", "b", "other", "c"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();

        let reply = cmd_hscan(
            cmd("HSCAN", &["h", "0", "MATCH", "field:*", "COUNT", "100"]),
            db,
            client,
        )
        .await
        .unwrap();
        let Frame::Array(parts) = reply else { panic!() };
        let Frame::Array(page) = &parts[1] else { panic!() };
        assert_eq!(page.len(), 4);
    }

    #[tokio::test]
    async fn test_hscan_honors_small_count() {
        let (db, client) = setup();
        cmd_hset(
            cmd("HSET", &["h", "a", "1", "b", "2", "c", "3"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();

        // An explicit COUNT 1 yields exactly one pair and a continuation
        // cursor, not a padded page.
        let reply = cmd_hscan(cmd("HSCAN", &["h", "0", "COUNT", "1"]), db.clone(), client.clone())
            .await
            .unwrap();
        let Frame::Array(parts) = reply else { panic!() };
        let Frame::Bulk(cursor) = &parts[0] else { panic!() };
        let Frame::Array(page) = &parts[1] else { panic!() };
        assert_eq!(page.len(), 2);
        assert_ne!(cursor.as_ref(), b"0");

        // COUNT 0 is a syntax error, same as SCAN.
        assert!(cmd_hscan(cmd("HSCAN", &["h", "0", "COUNT", "0"]), db, client)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_hrandfield_counts() {
        let (db, client) = setup();
        cmd_hset(cmd("HSET", &["h", "a", "1"]), db.clone(), client.clone())
            .await
            .unwrap();

        let reply = cmd_hrandfield(cmd("HRANDFIELD", &["h"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("a")));

        // Negative count repeats members.
        let reply = cmd_hrandfield(cmd("HRANDFIELD", &["h", "-4"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 4);

        let reply = cmd_hrandfield(cmd("HRANDFIELD", &["h", "2", "WITHVALUES"]), db, client)
            .await
            .unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 2);
    }
}
