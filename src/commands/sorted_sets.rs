//! Sorted-set command handlers.

use super::strings::format_float;
use super::ParsedCommand;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{CustosValue, Key, ScoreBound, SortedSetEntry};
use crate::Result;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

fn get_or_create_zset(db: &Db, key: &Key) -> Result<CustosValue> {
    match db.get(key) {
        Some(value @ CustosValue::ZSet(_)) => Ok(value),
        Some(_) => Err(CommandError::WrongType.into()),
        None => Ok(CustosValue::new_zset()),
    }
}

fn get_zset(db: &Db, key: &Key) -> Result<Option<CustosValue>> {
    match db.get(key) {
        Some(value @ CustosValue::ZSet(_)) => Ok(Some(value)),
        Some(_) => Err(CommandError::WrongType.into()),
        None => Ok(None),
    }
}

fn entries_to_frames(entries: Vec<SortedSetEntry>, with_scores: bool) -> Frame {
    let mut frames = Vec::with_capacity(entries.len() * if with_scores { 2 } else { 1 });
    for entry in entries {
        frames.push(Frame::Bulk(entry.member));
        if with_scores {
            frames.push(Frame::Bulk(Bytes::from(format_float(entry.score))));
        }
    }
    Frame::Array(frames)
}

fn parse_bound(cmd: &ParsedCommand, index: usize) -> Result<ScoreBound> {
    ScoreBound::parse(cmd.get_str(index)?)
        .ok_or_else(|| CommandError::NotScoreBound.into())
}

/// ZADD key score member [score member ...]
pub fn cmd_zadd(
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

        // Validate every score before touching the set; a bad pair must not
        // leave a partial update behind.
        let mut pairs = Vec::with_capacity((cmd.args.len() - 1) / 2);
        for (i, chunk) in cmd.args[1..].chunks(2).enumerate() {
            let score = cmd.get_f64(1 + i * 2)?;
            pairs.push((chunk[1].clone(), score));
        }

        let value = get_or_create_zset(&db, &key)?;
        let added = {
            let zset = value.as_zset().expect("created as zset");
            let mut zset = zset.write();
            pairs
                .into_iter()
                .filter(|(member, score)| zset.add(member.clone(), *score))
                .count()
        };

        db.store(key, value);
        Ok(Frame::Integer(added as i64))
    })
}

/// ZREM key member [member ...]
pub fn cmd_zrem(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let Some(value) = get_zset(&db, &key)? else {
            return Ok(Frame::Integer(0));
        };

        let removed = {
            let zset = value.as_zset().expect("checked as zset");
            let mut zset = zset.write();
            cmd.args[1..].iter().filter(|m| zset.remove(m)).count()
        };

        db.store(key, value);
        Ok(Frame::Integer(removed as i64))
    })
}

/// ZSCORE key member
pub fn cmd_zscore(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let score = match get_zset(&db, &key)? {
            Some(value) => value.as_zset().expect("checked as zset").read().score(&cmd.args[1]),
            None => None,
        };
        Ok(score
            .map(|s| Frame::Bulk(Bytes::from(format_float(s))))
            .unwrap_or(Frame::Null))
    })
}

/// ZCARD key
pub fn cmd_zcard(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let len = match get_zset(&db, &key)? {
            Some(value) => value.as_zset().expect("checked as zset").read().len(),
            None => 0,
        };
        Ok(Frame::Integer(len as i64))
    })
}

/// ZINCRBY key increment member
pub fn cmd_zincrby(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let delta = cmd.get_f64(1)?;
        let value = get_or_create_zset(&db, &key)?;

        let score = {
            let zset = value.as_zset().expect("created as zset");
            let mut zset = zset.write();
            let next = zset.score(&cmd.args[2]).unwrap_or(0.0) + delta;
            // Adding opposite infinities produces NaN; reject before writing.
            if next.is_nan() {
                return Err(CommandError::NotFloat.into());
            }
            zset.add(cmd.args[2].clone(), next);
            next
        };

        db.store(key, value);
        Ok(Frame::Bulk(Bytes::from(format_float(score))))
    })
}

fn rank_frame(rank: Option<usize>) -> Frame {
    rank.map(|r| Frame::Integer(r as i64)).unwrap_or(Frame::Null)
}

/// ZRANK key member
pub fn cmd_zrank(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let rank = match get_zset(&db, &key)? {
            Some(value) => value.as_zset().expect("checked as zset").read().rank(&cmd.args[1]),
            None => None,
        };
        Ok(rank_frame(rank))
    })
}

/// ZREVRANK key member
pub fn cmd_zrevrank(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let rank = match get_zset(&db, &key)? {
            Some(value) => value
                .as_zset()
                .expect("checked as zset")
                .read()
                .rev_rank(&cmd.args[1]),
            None => None,
        };
        Ok(rank_frame(rank))
    })
}

fn with_scores_flag(cmd: &ParsedCommand, index: usize) -> Result<bool> {
    match cmd.args.get(index) {
        Some(_) => {
            if cmd.get_str(index)?.eq_ignore_ascii_case("WITHSCORES") {
                Ok(true)
            } else {
                Err(CommandError::SyntaxError.into())
            }
        }
        None => Ok(false),
    }
}

/// ZRANGE key start stop [WITHSCORES]
pub fn cmd_zrange(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let start = cmd.get_i64(1)?;
        let stop = cmd.get_i64(2)?;
        let with_scores = with_scores_flag(&cmd, 3)?;

        let entries = match get_zset(&db, &key)? {
            Some(value) => value.as_zset().expect("checked as zset").read().range(start, stop),
            None => vec![],
        };
        Ok(entries_to_frames(entries, with_scores))
    })
}

/// ZREVRANGE key start stop [WITHSCORES]
pub fn cmd_zrevrange(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let start = cmd.get_i64(1)?;
        let stop = cmd.get_i64(2)?;
        let with_scores = with_scores_flag(&cmd, 3)?;

        let entries = match get_zset(&db, &key)? {
            Some(value) => value
                .as_zset()
                .expect("checked as zset")
                .read()
                .rev_range(start, stop),
            None => vec![],
        };
        Ok(entries_to_frames(entries, with_scores))
    })
}

/// ZRANGEBYSCORE key min max [WITHSCORES]
pub fn cmd_zrangebyscore(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let min = parse_bound(&cmd, 1)?;
        let max = parse_bound(&cmd, 2)?;
        let with_scores = with_scores_flag(&cmd, 3)?;

        let entries = match get_zset(&db, &key)? {
            Some(value) => value
                .as_zset()
                .expect("checked as zset")
                .read()
                .range_by_score(min, max),
            None => vec![],
        };
        Ok(entries_to_frames(entries, with_scores))
    })
}

/// ZREVRANGEBYSCORE key max min [WITHSCORES]
pub fn cmd_zrevrangebyscore(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let max = parse_bound(&cmd, 1)?;
        let min = parse_bound(&cmd, 2)?;
        let with_scores = with_scores_flag(&cmd, 3)?;

        let mut entries = match get_zset(&db, &key)? {
            Some(value) => value
                .as_zset()
                .expect("checked as zset")
                .read()
                .range_by_score(min, max),
            None => vec![],
        };
        entries.reverse();
        Ok(entries_to_frames(entries, with_scores))
    })
}

/// ZCOUNT key min max
pub fn cmd_zcount(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let min = parse_bound(&cmd, 1)?;
        let max = parse_bound(&cmd, 2)?;

        let count = match get_zset(&db, &key)? {
            Some(value) => value
                .as_zset()
                .expect("checked as zset")
                .read()
                .count_by_score(min, max),
            None => 0,
        };
        Ok(Frame::Integer(count as i64))
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
    async fn test_zadd_counts_new_only() {
        let (db, client) = setup();
        let reply = cmd_zadd(
            cmd("ZADD", &["z", "1", "a", "2", "b"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::Integer(2));

        // Updating a member counts as zero additions.
        let reply = cmd_zadd(cmd("ZADD", &["z", "5", "a"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(0));

        let reply = cmd_zscore(cmd("ZSCORE", &["z", "a"]), db, client).await.unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("5")));
    }

    #[tokio::test]
    async fn test_zadd_rejects_nan() {
        let (db, client) = setup();
        assert!(cmd_zadd(cmd("ZADD", &["z", "nan", "a"]), db, client)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_zrange_tie_break() {
        let (db, client) = setup();
        cmd_zadd(
            cmd("ZADD", &["s", "1", "b", "1", "a", "2", "c"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();

        let reply = cmd_zrange(cmd("ZRANGE", &["s", "0", "-1", "WITHSCORES"]), db, client)
            .await
            .unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![
                Frame::Bulk(Bytes::from("a")),
                Frame::Bulk(Bytes::from("1")),
                Frame::Bulk(Bytes::from("b")),
                Frame::Bulk(Bytes::from("1")),
                Frame::Bulk(Bytes::from("c")),
                Frame::Bulk(Bytes::from("2")),
            ])
        );
    }

    #[tokio::test]
    async fn test_zrevrange() {
        let (db, client) = setup();
        cmd_zadd(
            cmd("ZADD", &["z", "1", "a", "2", "b", "3", "c"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();

        let reply = cmd_zrevrange(cmd("ZREVRANGE", &["z", "0", "1"]), db, client)
            .await
            .unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![Frame::Bulk(Bytes::from("c")), Frame::Bulk(Bytes::from("b"))])
        );
    }

    #[tokio::test]
    async fn test_zrangebyscore_exclusive() {
        let (db, client) = setup();
        cmd_zadd(
            cmd("ZADD", &["z", "1", "a", "2", "b", "3", "c"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();

        let reply = cmd_zrangebyscore(cmd("ZRANGEBYSCORE", &["z", "(1", "3"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![Frame::Bulk(Bytes::from("b")), Frame::Bulk(Bytes::from("c"))])
        );

        let reply = cmd_zrangebyscore(
            cmd("ZRANGEBYSCORE", &["z", "-inf", "+inf"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 3);

        let reply = cmd_zrevrangebyscore(cmd("ZREVRANGEBYSCORE", &["z", "+inf", "2"]), db, client)
            .await
            .unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![Frame::Bulk(Bytes::from("c")), Frame::Bulk(Bytes::from("b"))])
        );
    }

    #[tokio::test]
    async fn test_zrank() {
        let (db, client) = setup();
        cmd_zadd(
            cmd("ZADD", &["z", "1", "a", "2", "b"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();

        let reply = cmd_zrank(cmd("ZRANK", &["z", "b"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(1));

        let reply = cmd_zrevrank(cmd("ZREVRANK", &["z", "b"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(0));

        let reply = cmd_zrank(cmd("ZRANK", &["z", "missing"]), db, client)
            .await
            .unwrap();
        assert_eq!(reply, Frame::Null);
    }

    #[tokio::test]
    async fn test_zcount() {
        let (db, client) = setup();
        cmd_zadd(
            cmd("ZADD", &["z", "1", "a", "2", "b", "3", "c"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();

        let reply = cmd_zcount(cmd("ZCOUNT", &["z", "2", "3"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(2));

        assert!(cmd_zcount(cmd("ZCOUNT", &["z", "abc", "3"]), db, client)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_zrem_removes_key_when_empty() {
        let (db, client) = setup();
        cmd_zadd(cmd("ZADD", &["z", "1", "a"]), db.clone(), client.clone())
            .await
            .unwrap();
        let reply = cmd_zrem(cmd("ZREM", &["z", "a", "ghost"]), db.clone(), client)
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(1));
        assert!(!db.exists(&Key::from("z")));
    }

    #[tokio::test]
    async fn test_zincrby() {
        let (db, client) = setup();
        let reply = cmd_zincrby(cmd("ZINCRBY", &["z", "2.5", "m"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("2.5")));

        let reply = cmd_zincrby(cmd("ZINCRBY", &["z", "1.5", "m"]), db, client)
            .await
            .unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("4")));
    }
}
