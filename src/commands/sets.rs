//! Set command handlers.

use super::ParsedCommand;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{CustosSet, CustosValue, Key};
use crate::Result;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

fn get_or_create_set(db: &Db, key: &Key) -> Result<CustosValue> {
    match db.get(key) {
        Some(value @ CustosValue::Set(_)) => Ok(value),
        Some(_) => Err(CommandError::WrongType.into()),
        None => Ok(CustosValue::new_set()),
    }
}

fn get_set(db: &Db, key: &Key) -> Result<Option<CustosValue>> {
    match db.get(key) {
        Some(value @ CustosValue::Set(_)) => Ok(Some(value)),
        Some(_) => Err(CommandError::WrongType.into()),
        None => Ok(None),
    }
}

/// Snapshot a set's members; absent keys read as the empty set.
fn snapshot(db: &Db, key: &Key) -> Result<CustosSet> {
    Ok(match get_set(db, key)? {
        Some(value) => value.as_set().expect("checked as set").read().clone(),
        None => CustosSet::new(),
    })
}

/// SADD key member [member ...]
pub fn cmd_sadd(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let value = get_or_create_set(&db, &key)?;

        let added = {
            let set = value.as_set().expect("created as set");
            let mut set = set.write();
            cmd.args[1..]
                .iter()
                .filter(|m| set.add((*m).clone()))
                .count()
        };

        db.store(key, value);
        Ok(Frame::Integer(added as i64))
    })
}

/// SREM key member [member ...]
pub fn cmd_srem(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let Some(value) = get_set(&db, &key)? else {
            return Ok(Frame::Integer(0));
        };

        let removed = {
            let set = value.as_set().expect("checked as set");
            let mut set = set.write();
            cmd.args[1..].iter().filter(|m| set.remove(m)).count()
        };

        db.store(key, value);
        Ok(Frame::Integer(removed as i64))
    })
}

/// SISMEMBER key member
pub fn cmd_sismember(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let member = match get_set(&db, &key)? {
            Some(value) => value
                .as_set()
                .expect("checked as set")
                .read()
                .contains(&cmd.args[1]),
            None => false,
        };
        Ok(Frame::Integer(i64::from(member)))
    })
}

/// SMEMBERS key
pub fn cmd_smembers(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let members = match get_set(&db, &key)? {
            Some(value) => value.as_set().expect("checked as set").read().members(),
            None => vec![],
        };
        Ok(Frame::Array(members.into_iter().map(Frame::Bulk).collect()))
    })
}

/// SCARD key
pub fn cmd_scard(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let len = match get_set(&db, &key)? {
            Some(value) => value.as_set().expect("checked as set").read().len(),
            None => 0,
        };
        Ok(Frame::Integer(len as i64))
    })
}

/// SPOP key [count]
pub fn cmd_spop(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
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

        let Some(value) = get_set(&db, &key)? else {
            return Ok(match count {
                Some(_) => Frame::Array(vec![]),
                None => Frame::Null,
            });
        };

        let popped = {
            let set = value.as_set().expect("checked as set");
            set.write().pop_random(count.unwrap_or(1))
        };

        db.store(key, value);

        match count {
            None => Ok(popped
                .into_iter()
                .next()
                .map(Frame::Bulk)
                .unwrap_or(Frame::Null)),
            Some(_) => Ok(Frame::Array(popped.into_iter().map(Frame::Bulk).collect())),
        }
    })
}

/// SRANDMEMBER key [count]
pub fn cmd_srandmember(
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

        let Some(value) = get_set(&db, &key)? else {
            return Ok(match count {
                Some(_) => Frame::Array(vec![]),
                None => Frame::Null,
            });
        };

        let members = value
            .as_set()
            .expect("checked as set")
            .read()
            .random_members(count.unwrap_or(1));

        match count {
            None => Ok(members
                .into_iter()
                .next()
                .map(Frame::Bulk)
                .unwrap_or(Frame::Null)),
            Some(_) => Ok(Frame::Array(members.into_iter().map(Frame::Bulk).collect())),
        }
    })
}

/// SMOVE source destination member
pub fn cmd_smove(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let src_key = Key::from(cmd.args[0].clone());
        let dst_key = Key::from(cmd.args[1].clone());
        let member = cmd.args[2].clone();

        let Some(src) = get_set(&db, &src_key)? else {
            // Destination type is still validated when the source is absent.
            get_set(&db, &dst_key)?;
            return Ok(Frame::Integer(0));
        };
        let dst = get_or_create_set(&db, &dst_key)?;

        let moved = {
            let removed = src.as_set().expect("checked as set").write().remove(&member);
            if removed {
                dst.as_set().expect("created as set").write().add(member);
            }
            removed
        };

        if moved {
            db.store(src_key, src);
            db.store(dst_key, dst);
        }
        Ok(Frame::Integer(i64::from(moved)))
    })
}

fn algebra(cmd: &ParsedCommand, db: &Db, keys: &[Bytes]) -> Result<Vec<Bytes>> {
    let first = snapshot(db, &Key::from(keys[0].clone()))?;
    let rest: Vec<CustosSet> = keys[1..]
        .iter()
        .map(|k| snapshot(db, &Key::from(k.clone())))
        .collect::<Result<_>>()?;
    let rest_refs: Vec<&CustosSet> = rest.iter().collect();

    Ok(match cmd.name.as_str() {
        "SINTER" | "SINTERSTORE" => first.intersect(&rest_refs),
        "SUNION" | "SUNIONSTORE" => first.union(&rest_refs),
        _ => first.difference(&rest_refs),
    })
}

/// SINTER / SUNION / SDIFF key [key ...]
pub fn cmd_set_algebra(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let members = algebra(&cmd, &db, &cmd.args)?;
        Ok(Frame::Array(members.into_iter().map(Frame::Bulk).collect()))
    })
}

/// SINTERSTORE / SUNIONSTORE / SDIFFSTORE destination key [key ...]
///
/// The destination is replaced outright (prior value and expiration both
/// dropped); an empty result deletes it.
pub fn cmd_set_algebra_store(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let dest = Key::from(cmd.args[0].clone());
        let members = algebra(&cmd, &db, &cmd.args[1..])?;
        let count = members.len();

        if members.is_empty() {
            db.delete(&dest);
        } else {
            let value = CustosValue::new_set();
            {
                let set = value.as_set().expect("created as set");
                let mut set = set.write();
                for member in members {
                    set.add(member);
                }
            }
            db.set(dest, value);
        }
        Ok(Frame::Integer(count as i64))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ServerStats;
    use crate::types::Expiry;

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

    fn sorted_members(frame: Frame) -> Vec<Bytes> {
        let Frame::Array(frames) = frame else { panic!() };
        let mut members: Vec<Bytes> = frames.into_iter().map(|f| f.to_bytes().unwrap()).collect();
        members.sort();
        members
    }

    #[tokio::test]
    async fn test_sadd_idempotent() {
        let (db, client) = setup();
        let reply = cmd_sadd(cmd("SADD", &["s", "a", "b", "a"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(2));

        // Re-adding an existing member returns 0 and changes nothing.
        let reply = cmd_sadd(cmd("SADD", &["s", "a"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(0));

        let reply = cmd_scard(cmd("SCARD", &["s"]), db, client).await.unwrap();
        assert_eq!(reply, Frame::Integer(2));
    }

    #[tokio::test]
    async fn test_srem_removes_key_when_empty() {
        let (db, client) = setup();
        cmd_sadd(cmd("SADD", &["s", "a"]), db.clone(), client.clone())
            .await
            .unwrap();
        cmd_srem(cmd("SREM", &["s", "a"]), db.clone(), client).await.unwrap();
        assert!(!db.exists(&Key::from("s")));
    }

    #[tokio::test]
    async fn test_spop_removes() {
        let (db, client) = setup();
        cmd_sadd(cmd("SADD", &["s", "a", "b", "c"]), db.clone(), client.clone())
            .await
            .unwrap();

        let reply = cmd_spop(cmd("SPOP", &["s", "2"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 2);

        let reply = cmd_scard(cmd("SCARD", &["s"]), db, client).await.unwrap();
        assert_eq!(reply, Frame::Integer(1));
    }

    #[tokio::test]
    async fn test_algebra() {
        let (db, client) = setup();
        cmd_sadd(cmd("SADD", &["x", "a", "b", "c"]), db.clone(), client.clone())
            .await
            .unwrap();
        cmd_sadd(cmd("SADD", &["y", "b", "c", "d"]), db.clone(), client.clone())
            .await
            .unwrap();

        let reply = cmd_set_algebra(cmd("SINTER", &["x", "y"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(sorted_members(reply), vec![Bytes::from("b"), Bytes::from("c")]);

        let reply = cmd_set_algebra(cmd("SUNION", &["x", "y"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(sorted_members(reply).len(), 4);

        let reply = cmd_set_algebra(cmd("SDIFF", &["x", "y"]), db, client)
            .await
            .unwrap();
        assert_eq!(sorted_members(reply), vec![Bytes::from("a")]);
    }

    #[tokio::test]
    async fn test_sinterstore() {
        let (db, client) = setup();
        cmd_sadd(cmd("SADD", &["x", "a", "b", "c"]), db.clone(), client.clone())
            .await
            .unwrap();
        cmd_sadd(cmd("SADD", &["y", "b", "c", "d"]), db.clone(), client.clone())
            .await
            .unwrap();

        let reply = cmd_set_algebra_store(
            cmd("SINTERSTORE", &["z", "x", "y"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::Integer(2));

        let reply = cmd_smembers(cmd("SMEMBERS", &["z"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(sorted_members(reply), vec![Bytes::from("b"), Bytes::from("c")]);

        assert_eq!(db.key_type(&Key::from("z")).unwrap().as_str(), "set");
    }

    #[tokio::test]
    async fn test_store_drops_prior_value_and_ttl() {
        let (db, client) = setup();
        db.set(Key::from("dest"), CustosValue::string("old"));
        db.expire(&Key::from("dest"), Expiry::from_seconds(100));

        cmd_sadd(cmd("SADD", &["x", "a"]), db.clone(), client.clone())
            .await
            .unwrap();
        cmd_set_algebra_store(cmd("SUNIONSTORE", &["dest", "x"]), db.clone(), client.clone())
            .await
            .unwrap();

        assert_eq!(db.key_type(&Key::from("dest")).unwrap().as_str(), "set");
        assert_eq!(db.ttl(&Key::from("dest")), -1);

        // Empty result deletes the destination.
        cmd_set_algebra_store(cmd("SINTERSTORE", &["dest", "x", "empty"]), db.clone(), client)
            .await
            .unwrap();
        assert!(!db.exists(&Key::from("dest")));
    }

    #[tokio::test]
    async fn test_smove() {
        let (db, client) = setup();
        cmd_sadd(cmd("SADD", &["src", "m"]), db.clone(), client.clone())
            .await
            .unwrap();

        let reply = cmd_smove(cmd("SMOVE", &["src", "dst", "m"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(1));
        assert!(!db.exists(&Key::from("src")));

        let reply = cmd_sismember(cmd("SISMEMBER", &["dst", "m"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(1));

        let reply = cmd_smove(cmd("SMOVE", &["src", "dst", "nope"]), db, client)
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(0));
    }
}
