//! List command handlers.

use super::ParsedCommand;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{CustosValue, InsertWhere, Key};
use crate::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Fetch an existing list value or a fresh empty one. Errors on wrong type.
fn get_or_create_list(db: &Db, key: &Key) -> Result<CustosValue> {
    match db.get(key) {
        Some(value @ CustosValue::List(_)) => Ok(value),
        Some(_) => Err(CommandError::WrongType.into()),
        None => Ok(CustosValue::new_list()),
    }
}

/// Fetch an existing list value; absent keys yield None, wrong types error.
fn get_list(db: &Db, key: &Key) -> Result<Option<CustosValue>> {
    match db.get(key) {
        Some(value @ CustosValue::List(_)) => Ok(Some(value)),
        Some(_) => Err(CommandError::WrongType.into()),
        None => Ok(None),
    }
}

/// LPUSH key element [element ...]
pub fn cmd_lpush(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let value = get_or_create_list(&db, &key)?;

        let len = {
            let list = value.as_list().expect("created as list");
            let mut list = list.write();
            for arg in cmd.args.iter().skip(1) {
                list.push_front(arg.clone());
            }
            list.len()
        };

        db.store(key, value);
        Ok(Frame::Integer(len as i64))
    })
}

/// RPUSH key element [element ...]
pub fn cmd_rpush(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let value = get_or_create_list(&db, &key)?;

        let len = {
            let list = value.as_list().expect("created as list");
            let mut list = list.write();
            for arg in cmd.args.iter().skip(1) {
                list.push_back(arg.clone());
            }
            list.len()
        };

        db.store(key, value);
        Ok(Frame::Integer(len as i64))
    })
}

fn pop(cmd: &ParsedCommand, db: &Db, front: bool) -> Result<Frame> {
    let key = Key::from(cmd.args[0].clone());
    let count = match cmd.args.get(1) {
        Some(_) => {
            let n = cmd.get_i64(1)?;
            if n < 0 {
                return Err(CommandError::MustBePositive.into());
            }
            Some(n as usize)
        }
        None => None,
    };

    let Some(value) = get_list(db, &key)? else {
        return Ok(match count {
            Some(_) => Frame::NullArray,
            None => Frame::Null,
        });
    };

    let popped: Vec<_> = {
        let list = value.as_list().expect("checked as list");
        let mut list = list.write();
        let wanted = count.unwrap_or(1);
        (0..wanted)
            .filter_map(|_| if front { list.pop_front() } else { list.pop_back() })
            .collect()
    };

    db.store(key, value);

    match count {
        None => Ok(popped
            .into_iter()
            .next()
            .map(Frame::Bulk)
            .unwrap_or(Frame::Null)),
        Some(_) if popped.is_empty() => Ok(Frame::NullArray),
        Some(_) => Ok(Frame::Array(popped.into_iter().map(Frame::Bulk).collect())),
    }
}

/// LPOP key [count]
pub fn cmd_lpop(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { pop(&cmd, &db, true) })
}

/// RPOP key [count]
pub fn cmd_rpop(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { pop(&cmd, &db, false) })
}

/// LLEN key
pub fn cmd_llen(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let len = match get_list(&db, &key)? {
            Some(value) => value.as_list().expect("checked as list").read().len(),
            None => 0,
        };
        Ok(Frame::Integer(len as i64))
    })
}

/// LRANGE key start stop
pub fn cmd_lrange(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let start = cmd.get_i64(1)?;
        let stop = cmd.get_i64(2)?;

        let Some(value) = get_list(&db, &key)? else {
            return Ok(Frame::Array(vec![]));
        };

        let elements = value.as_list().expect("checked as list").read().range(start, stop);
        Ok(Frame::Array(elements.into_iter().map(Frame::Bulk).collect()))
    })
}

/// LINDEX key index
pub fn cmd_lindex(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let index = cmd.get_i64(1)?;

        let Some(value) = get_list(&db, &key)? else {
            return Ok(Frame::Null);
        };

        let element = value
            .as_list()
            .expect("checked as list")
            .read()
            .get(index)
            .cloned();
        Ok(element.map(Frame::Bulk).unwrap_or(Frame::Null))
    })
}

/// LSET key index element
pub fn cmd_lset(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let index = cmd.get_i64(1)?;

        let Some(value) = get_list(&db, &key)? else {
            return Err(CommandError::NoSuchKey.into());
        };

        let updated = value
            .as_list()
            .expect("checked as list")
            .write()
            .set(index, cmd.args[2].clone());
        if !updated {
            return Err(CommandError::IndexOutOfRange.into());
        }

        db.store(key, value);
        Ok(Frame::ok())
    })
}

/// LTRIM key start stop
pub fn cmd_ltrim(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let start = cmd.get_i64(1)?;
        let stop = cmd.get_i64(2)?;

        let Some(value) = get_list(&db, &key)? else {
            return Ok(Frame::ok());
        };

        value.as_list().expect("checked as list").write().trim(start, stop);
        db.store(key, value);
        Ok(Frame::ok())
    })
}

/// LINSERT key BEFORE|AFTER pivot element
pub fn cmd_linsert(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let wher = match cmd.get_str(1)?.to_uppercase().as_str() {
            "BEFORE" => InsertWhere::Before,
            "AFTER" => InsertWhere::After,
            _ => return Err(CommandError::SyntaxError.into()),
        };

        let Some(value) = get_list(&db, &key)? else {
            return Ok(Frame::Integer(0));
        };

        let result = value
            .as_list()
            .expect("checked as list")
            .write()
            .insert(wher, &cmd.args[2], cmd.args[3].clone());

        if result > 0 {
            db.store(key, value);
        }
        Ok(Frame::Integer(result))
    })
}

/// LREM key count element
pub fn cmd_lrem(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let count = cmd.get_i64(1)?;

        let Some(value) = get_list(&db, &key)? else {
            return Ok(Frame::Integer(0));
        };

        let removed = value
            .as_list()
            .expect("checked as list")
            .write()
            .remove(count, &cmd.args[2]);

        db.store(key, value);
        Ok(Frame::Integer(removed as i64))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ServerStats;
    use bytes::Bytes;

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
    async fn test_push_pop() {
        let (db, client) = setup();
        let reply = cmd_rpush(cmd("RPUSH", &["l", "a", "b"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(2));

        let reply = cmd_lpush(cmd("LPUSH", &["l", "z"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(3));

        let reply = cmd_lpop(cmd("LPOP", &["l"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("z")));

        let reply = cmd_rpop(cmd("RPOP", &["l"]), db, client).await.unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("b")));
    }

    #[tokio::test]
    async fn test_pop_missing() {
        let (db, client) = setup();
        let reply = cmd_lpop(cmd("LPOP", &["nope"]), db, client).await.unwrap();
        assert_eq!(reply, Frame::Null);
    }

    #[tokio::test]
    async fn test_pop_last_removes_key() {
        let (db, client) = setup();
        cmd_rpush(cmd("RPUSH", &["l", "only"]), db.clone(), client.clone())
            .await
            .unwrap();
        cmd_lpop(cmd("LPOP", &["l"]), db.clone(), client).await.unwrap();
        assert!(!db.exists(&Key::from("l")));
    }

    #[tokio::test]
    async fn test_lrange_bounds() {
        let (db, client) = setup();
        cmd_rpush(cmd("RPUSH", &["l", "a", "b", "c"]), db.clone(), client.clone())
            .await
            .unwrap();

        let reply = cmd_lrange(cmd("LRANGE", &["l", "0", "-1"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![
                Frame::Bulk(Bytes::from("a")),
                Frame::Bulk(Bytes::from("b")),
                Frame::Bulk(Bytes::from("c")),
            ])
        );

        let reply = cmd_lrange(cmd("LRANGE", &["l", "5", "10"]), db, client)
            .await
            .unwrap();
        assert_eq!(reply, Frame::Array(vec![]));
    }

    #[tokio::test]
    async fn test_lset_out_of_range() {
        let (db, client) = setup();
        cmd_rpush(cmd("RPUSH", &["l", "a"]), db.clone(), client.clone())
            .await
            .unwrap();

        assert!(cmd_lset(cmd("LSET", &["l", "5", "x"]), db.clone(), client.clone())
            .await
            .is_err());
        assert!(cmd_lset(cmd("LSET", &["missing", "0", "x"]), db.clone(), client.clone())
            .await
            .is_err());

        cmd_lset(cmd("LSET", &["l", "0", "x"]), db.clone(), client.clone())
            .await
            .unwrap();
        let reply = cmd_lindex(cmd("LINDEX", &["l", "0"]), db, client).await.unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("x")));
    }

    #[tokio::test]
    async fn test_linsert() {
        let (db, client) = setup();
        cmd_rpush(cmd("RPUSH", &["l", "a", "c"]), db.clone(), client.clone())
            .await
            .unwrap();

        let reply = cmd_linsert(
            cmd("LINSERT", &["l", "BEFORE", "c", "b"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::Integer(3));

        // Missing pivot -> -1.
        let reply = cmd_linsert(
            cmd("LINSERT", &["l", "AFTER", "zz", "x"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::Integer(-1));

        // Absent key -> 0.
        let reply = cmd_linsert(cmd("LINSERT", &["nope", "BEFORE", "a", "x"]), db, client)
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(0));
    }

    #[tokio::test]
    async fn test_ltrim() {
        let (db, client) = setup();
        cmd_rpush(
            cmd("RPUSH", &["l", "a", "b", "c", "d"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();

        cmd_ltrim(cmd("LTRIM", &["l", "1", "2"]), db.clone(), client.clone())
            .await
            .unwrap();
        let reply = cmd_lrange(cmd("LRANGE", &["l", "0", "-1"]), db.clone(), client)
            .await
            .unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![Frame::Bulk(Bytes::from("b")), Frame::Bulk(Bytes::from("c"))])
        );
    }

    #[tokio::test]
    async fn test_lrem() {
        let (db, client) = setup();
        cmd_rpush(
            cmd("RPUSH", &["l", "a", "b", "a", "a"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();

        let reply = cmd_lrem(cmd("LREM", &["l", "2", "a"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(2));

        let reply = cmd_llen(cmd("LLEN", &["l"]), db, client).await.unwrap();
        assert_eq!(reply, Frame::Integer(2));
    }

    #[tokio::test]
    async fn test_wrongtype() {
        let (db, client) = setup();
        db.set(Key::from("s"), CustosValue::string("x"));
        assert!(cmd_lpush(cmd("LPUSH", &["s", "a"]), db.clone(), client.clone())
            .await
            .is_err());
        assert!(cmd_llen(cmd("LLEN", &["s"]), db, client).await.is_err());
    }
}
