//! Stream command handlers.

use super::ParsedCommand;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{CustosValue, Key, Stream, StreamEntry, StreamId, StreamIdArg};
use crate::Result;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

fn get_stream(db: &Db, key: &Key) -> Result<Option<CustosValue>> {
    match db.get(key) {
        Some(value @ CustosValue::Stream(_)) => Ok(Some(value)),
        Some(_) => Err(CommandError::WrongType.into()),
        None => Ok(None),
    }
}

fn entry_frame(entry: StreamEntry) -> Frame {
    let mut fields = Vec::with_capacity(entry.fields.len() * 2);
    for (field, value) in entry.fields {
        fields.push(Frame::Bulk(field));
        fields.push(Frame::Bulk(value));
    }
    Frame::Array(vec![
        Frame::Bulk(Bytes::from(entry.id.to_string())),
        Frame::Array(fields),
    ])
}

fn entries_frame(entries: Vec<StreamEntry>) -> Frame {
    Frame::Array(entries.into_iter().map(entry_frame).collect())
}

fn parse_id(cmd: &ParsedCommand, index: usize) -> Result<StreamIdArg> {
    StreamIdArg::parse(cmd.get_str(index)?).ok_or_else(|| CommandError::StreamInvalidId.into())
}

/// XADD key [MAXLEN [~|=] count] id field value [field value ...]
pub fn cmd_xadd(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(4)?;
        let key = Key::from(cmd.args[0].clone());

        let mut i = 1;
        let mut maxlen: Option<(usize, bool)> = None;

        if cmd.get_str(i)?.eq_ignore_ascii_case("MAXLEN") {
            i += 1;
            let mut approximate = false;
            match cmd.get_str(i)? {
                "~" => {
                    approximate = true;
                    i += 1;
                }
                "=" => {
                    i += 1;
                }
                _ => {}
            }
            let limit = cmd.get_u64(i)? as usize;
            maxlen = Some((limit, approximate));
            i += 1;
        }

        let id = parse_id(&cmd, i)?;
        i += 1;

        // MAXLEN is also accepted after the ID.
        if maxlen.is_none()
            && cmd
                .args
                .get(i)
                .map(|a| a.eq_ignore_ascii_case(b"MAXLEN"))
                .unwrap_or(false)
        {
            i += 1;
            let mut approximate = false;
            match cmd.get_str(i)? {
                "~" => {
                    approximate = true;
                    i += 1;
                }
                "=" => {
                    i += 1;
                }
                _ => {}
            }
            let limit = cmd.get_u64(i)? as usize;
            maxlen = Some((limit, approximate));
            i += 1;
        }

        let remaining = &cmd.args[i..];
        if remaining.is_empty() || remaining.len() % 2 != 0 {
            return Err(CommandError::WrongArity {
                command: cmd.name.clone(),
            }
            .into());
        }
        let fields: Vec<(Bytes, Bytes)> = remaining
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();

        let value = match get_stream(&db, &key)? {
            Some(value) => value,
            None => CustosValue::new_stream(),
        };

        let new_id = {
            let stream = value.as_stream().expect("checked as stream");
            let mut stream = stream.write();
            let new_id = stream
                .add(id, fields)
                .map_err(|_| CommandError::StreamIdTooSmall)?;
            if let Some((limit, approximate)) = maxlen {
                stream.trim_maxlen(limit, approximate);
            }
            new_id
        };

        db.store(key, value);
        Ok(Frame::Bulk(Bytes::from(new_id.to_string())))
    })
}

/// XLEN key
pub fn cmd_xlen(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let len = match get_stream(&db, &key)? {
            Some(value) => value.as_stream().expect("checked as stream").read().len(),
            None => 0,
        };
        Ok(Frame::Integer(len as i64))
    })
}

fn range_args(cmd: &ParsedCommand) -> Result<(StreamIdArg, StreamIdArg, Option<usize>)> {
    let start = parse_id(cmd, 1)?;
    let end = parse_id(cmd, 2)?;

    let count = match cmd.args.get(3) {
        Some(_) => {
            if !cmd.get_str(3)?.eq_ignore_ascii_case("COUNT") {
                return Err(CommandError::SyntaxError.into());
            }
            Some(cmd.get_u64(4)? as usize)
        }
        None => None,
    };
    Ok((start, end, count))
}

/// XRANGE key start end [COUNT count]
pub fn cmd_xrange(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let (start, end, count) = range_args(&cmd)?;

        let Some(value) = get_stream(&db, &key)? else {
            return Ok(Frame::Array(vec![]));
        };

        let entries = {
            let stream = value.as_stream().expect("checked as stream");
            let stream = stream.read();
            let last = stream.last_id();
            let start = start
                .resolve_range(last, false)
                .ok_or(CommandError::StreamInvalidId)?;
            let end = end
                .resolve_range(last, true)
                .ok_or(CommandError::StreamInvalidId)?;
            stream.range(start, end, count)
        };
        Ok(entries_frame(entries))
    })
}

/// XREVRANGE key end start [COUNT count]
pub fn cmd_xrevrange(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());
        let (end, start, count) = range_args(&cmd)?;

        let Some(value) = get_stream(&db, &key)? else {
            return Ok(Frame::Array(vec![]));
        };

        let entries = {
            let stream = value.as_stream().expect("checked as stream");
            let stream = stream.read();
            let last = stream.last_id();
            let start = start
                .resolve_range(last, false)
                .ok_or(CommandError::StreamInvalidId)?;
            let end = end
                .resolve_range(last, true)
                .ok_or(CommandError::StreamInvalidId)?;
            stream.rev_range(start, end, count)
        };
        Ok(entries_frame(entries))
    })
}

/// XREAD [COUNT count] STREAMS key [key ...] id [id ...]
pub fn cmd_xread(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(3)?;

        let mut i = 0;
        let mut count: Option<usize> = None;

        if cmd.get_str(i)?.eq_ignore_ascii_case("COUNT") {
            count = Some(cmd.get_u64(i + 1)? as usize);
            i += 2;
        }

        if !cmd.get_str(i)?.eq_ignore_ascii_case("STREAMS") {
            return Err(CommandError::SyntaxError.into());
        }
        i += 1;

        let rest = &cmd.args[i..];
        if rest.is_empty() || rest.len() % 2 != 0 {
            return Err(CommandError::SyntaxError.into());
        }
        let half = rest.len() / 2;

        let mut results = Vec::new();
        for k in 0..half {
            let key = Key::from(rest[k].clone());
            let id_arg = StreamIdArg::parse(
                std::str::from_utf8(&rest[half + k]).map_err(|_| CommandError::StreamInvalidId)?,
            )
            .ok_or(CommandError::StreamInvalidId)?;

            let Some(value) = get_stream(&db, &key)? else {
                continue;
            };

            let entries = {
                let stream = value.as_stream().expect("checked as stream");
                let stream = stream.read();
                let after = match id_arg {
                    // `$` asks for entries published after this call; with no
                    // blocking there are none yet.
                    StreamIdArg::Last => stream.last_id(),
                    other => other
                        .resolve_range(stream.last_id(), false)
                        .ok_or(CommandError::StreamInvalidId)?,
                };
                stream.read_after(after, count)
            };

            if !entries.is_empty() {
                results.push(Frame::Array(vec![
                    Frame::Bulk(key.to_bytes()),
                    entries_frame(entries),
                ]));
            }
        }

        if results.is_empty() {
            Ok(Frame::NullArray)
        } else {
            Ok(Frame::Array(results))
        }
    })
}

/// XTRIM key MAXLEN [~|=] count
pub fn cmd_xtrim(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(3)?;
        let key = Key::from(cmd.args[0].clone());

        if !cmd.get_str(1)?.eq_ignore_ascii_case("MAXLEN") {
            return Err(CommandError::SyntaxError.into());
        }

        let mut i = 2;
        let mut approximate = false;
        match cmd.get_str(i)? {
            "~" => {
                approximate = true;
                i += 1;
            }
            "=" => {
                i += 1;
            }
            _ => {}
        }
        let limit = cmd.get_u64(i)? as usize;

        let Some(value) = get_stream(&db, &key)? else {
            return Ok(Frame::Integer(0));
        };

        let removed = value
            .as_stream()
            .expect("checked as stream")
            .write()
            .trim_maxlen(limit, approximate);

        db.store(key, value);
        Ok(Frame::Integer(removed as i64))
    })
}

/// XDEL key id [id ...]
pub fn cmd_xdel(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(cmd.args[0].clone());

        let mut ids = Vec::with_capacity(cmd.args.len() - 1);
        for i in 1..cmd.args.len() {
            match parse_id(&cmd, i)? {
                StreamIdArg::Exact(id) => ids.push(id),
                StreamIdArg::Partial(ms) => ids.push(StreamId::new(ms, 0)),
                _ => return Err(CommandError::StreamInvalidId.into()),
            }
        }

        let Some(value) = get_stream(&db, &key)? else {
            return Ok(Frame::Integer(0));
        };

        let removed = value
            .as_stream()
            .expect("checked as stream")
            .write()
            .delete(&ids);

        db.store(key, value);
        Ok(Frame::Integer(removed as i64))
    })
}

/// XGROUP CREATE|DESTROY|CREATECONSUMER|DELCONSUMER|SETID ...
pub fn cmd_xgroup(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(2)?;
        let sub = cmd.get_str(0)?.to_uppercase();
        let key = Key::from(cmd.args[1].clone());

        match sub.as_str() {
            "CREATE" => {
                cmd.require_args(4)?;
                let group = cmd.args[2].clone();
                let mkstream = cmd
                    .args
                    .get(4)
                    .map(|a| a.eq_ignore_ascii_case(b"MKSTREAM"))
                    .unwrap_or(false);

                let value = match get_stream(&db, &key)? {
                    Some(value) => value,
                    None if mkstream => CustosValue::new_stream(),
                    None => {
                        return Err(CommandError::NoGroup {
                            group: String::from_utf8_lossy(&group).into_owned(),
                            key: key.to_string(),
                        }
                        .into())
                    }
                };

                let created = {
                    let stream = value.as_stream().expect("checked as stream");
                    let mut stream = stream.write();
                    let start = match parse_id(&cmd, 3)? {
                        StreamIdArg::Last => stream.last_id(),
                        StreamIdArg::Exact(id) => id,
                        StreamIdArg::Partial(ms) => StreamId::new(ms, 0),
                        _ => return Err(CommandError::StreamInvalidId.into()),
                    };
                    stream.create_group(group, start)
                };

                if !created {
                    return Err(CommandError::BusyGroup.into());
                }
                db.store(key, value);
                Ok(Frame::ok())
            }
            "DESTROY" => {
                cmd.require_exact_args(3)?;
                let Some(value) = get_stream(&db, &key)? else {
                    return Ok(Frame::Integer(0));
                };
                let destroyed = value
                    .as_stream()
                    .expect("checked as stream")
                    .write()
                    .destroy_group(&cmd.args[2]);
                db.store(key, value);
                Ok(Frame::Integer(i64::from(destroyed)))
            }
            "CREATECONSUMER" => {
                cmd.require_exact_args(4)?;
                let group = cmd.args[2].clone();
                let Some(value) = get_stream(&db, &key)? else {
                    return Err(CommandError::NoGroup {
                        group: String::from_utf8_lossy(&group).into_owned(),
                        key: key.to_string(),
                    }
                    .into());
                };

                let created = value
                    .as_stream()
                    .expect("checked as stream")
                    .write()
                    .create_consumer(&group, cmd.args[3].clone());

                match created {
                    Some(created) => {
                        db.store(key, value);
                        Ok(Frame::Integer(i64::from(created)))
                    }
                    None => Err(CommandError::NoGroup {
                        group: String::from_utf8_lossy(&group).into_owned(),
                        key: key.to_string(),
                    }
                    .into()),
                }
            }
            "DELCONSUMER" => {
                cmd.require_exact_args(4)?;
                let group = cmd.args[2].clone();
                let Some(value) = get_stream(&db, &key)? else {
                    return Err(CommandError::NoGroup {
                        group: String::from_utf8_lossy(&group).into_owned(),
                        key: key.to_string(),
                    }
                    .into());
                };

                let stream = value.as_stream().expect("checked as stream");
                let result = stream.write().delete_consumer(&group, &cmd.args[3]);
                match result {
                    Some(pending) => {
                        drop(stream);
                        db.store(key, value);
                        Ok(Frame::Integer(pending as i64))
                    }
                    None => {
                        // Either the group or the consumer is missing; a
                        // missing consumer deletes nothing.
                        let has_group = stream.read().group(&cmd.args[2]).is_some();
                        if has_group {
                            Ok(Frame::Integer(0))
                        } else {
                            Err(CommandError::NoGroup {
                                group: String::from_utf8_lossy(&group).into_owned(),
                                key: key.to_string(),
                            }
                            .into())
                        }
                    }
                }
            }
            "SETID" => {
                cmd.require_exact_args(4)?;
                let group = cmd.args[2].clone();
                let Some(value) = get_stream(&db, &key)? else {
                    return Err(CommandError::NoGroup {
                        group: String::from_utf8_lossy(&group).into_owned(),
                        key: key.to_string(),
                    }
                    .into());
                };

                {
                    let stream = value.as_stream().expect("checked as stream");
                    let mut stream = stream.write();
                    let id = match parse_id(&cmd, 3)? {
                        StreamIdArg::Last => stream.last_id(),
                        StreamIdArg::Exact(id) => id,
                        StreamIdArg::Partial(ms) => StreamId::new(ms, 0),
                        _ => return Err(CommandError::StreamInvalidId.into()),
                    };
                    let Some(group) = stream.group_mut(&group) else {
                        return Err(CommandError::NoGroup {
                            group: String::from_utf8_lossy(&cmd.args[2]).into_owned(),
                            key: key.to_string(),
                        }
                        .into());
                    };
                    group.last_delivered = id;
                }

                db.store(key, value);
                Ok(Frame::ok())
            }
            _ => Err(CommandError::SyntaxError.into()),
        }
    })
}

/// XINFO STREAM|GROUPS|CONSUMERS|HELP ...
pub fn cmd_xinfo(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(1)?;
        let sub = cmd.get_str(0)?.to_uppercase();

        if sub == "HELP" {
            return Ok(Frame::Array(vec![
                Frame::simple("XINFO STREAM <key>"),
                Frame::simple("XINFO GROUPS <key>"),
                Frame::simple("XINFO CONSUMERS <key> <group>"),
                Frame::simple("XINFO HELP"),
            ]));
        }

        cmd.require_args(2)?;
        let key = Key::from(cmd.args[1].clone());
        let Some(value) = get_stream(&db, &key)? else {
            return Err(CommandError::NoSuchKey.into());
        };
        let stream_lock = value.as_stream().expect("checked as stream");
        let stream = stream_lock.read();

        match sub.as_str() {
            "STREAM" => Ok(info_stream(&stream)),
            "GROUPS" => {
                let frames = stream
                    .groups()
                    .map(|(name, group)| {
                        Frame::Array(vec![
                            Frame::bulk("name"),
                            Frame::Bulk(name.clone()),
                            Frame::bulk("consumers"),
                            Frame::Integer(group.consumers.len() as i64),
                            Frame::bulk("pending"),
                            Frame::Integer(group.pending.len() as i64),
                            Frame::bulk("last-delivered-id"),
                            Frame::Bulk(Bytes::from(group.last_delivered.to_string())),
                        ])
                    })
                    .collect();
                Ok(Frame::Array(frames))
            }
            "CONSUMERS" => {
                cmd.require_exact_args(3)?;
                let Some(group) = stream.group(&cmd.args[2]) else {
                    return Err(CommandError::NoGroup {
                        group: String::from_utf8_lossy(&cmd.args[2]).into_owned(),
                        key: key.to_string(),
                    }
                    .into());
                };
                let frames = group
                    .consumers
                    .iter()
                    .map(|(name, consumer)| {
                        Frame::Array(vec![
                            Frame::bulk("name"),
                            Frame::Bulk(name.clone()),
                            Frame::bulk("pending"),
                            Frame::Integer(consumer.pending as i64),
                            Frame::bulk("seen-time"),
                            Frame::Integer(consumer.seen_time_ms),
                        ])
                    })
                    .collect();
                Ok(Frame::Array(frames))
            }
            _ => Err(CommandError::SyntaxError.into()),
        }
    })
}

fn info_stream(stream: &Stream) -> Frame {
    let first = stream
        .first_id()
        .map(|id| Frame::Bulk(Bytes::from(id.to_string())))
        .unwrap_or(Frame::Null);

    Frame::Array(vec![
        Frame::bulk("length"),
        Frame::Integer(stream.len() as i64),
        Frame::bulk("last-generated-id"),
        Frame::Bulk(Bytes::from(stream.last_id().to_string())),
        Frame::bulk("entries-added"),
        Frame::Integer(stream.entries_added() as i64),
        Frame::bulk("groups"),
        Frame::Integer(stream.group_count() as i64),
        Frame::bulk("first-entry"),
        first,
    ])
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
    async fn test_xadd_explicit_and_duplicate() {
        let (db, client) = setup();
        let reply = cmd_xadd(cmd("XADD", &["s", "1-1", "k", "v"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("1-1")));

        let err = cmd_xadd(cmd("XADD", &["s", "1-1", "k", "v"]), db.clone(), client.clone())
            .await
            .unwrap_err();
        assert!(err
            .to_resp_error()
            .starts_with("ERR The ID specified in XADD is equal or smaller"));

        let reply = cmd_xadd(cmd("XADD", &["s", "*", "k", "v2"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert!(matches!(reply, Frame::Bulk(_)));

        let reply = cmd_xlen(cmd("XLEN", &["s"]), db, client).await.unwrap();
        assert_eq!(reply, Frame::Integer(2));
    }

    #[tokio::test]
    async fn test_xadd_maxlen() {
        let (db, client) = setup();
        for i in 1..=10 {
            cmd_xadd(
                cmd("XADD", &["s", &format!("{i}-0"), "k", "v"]),
                db.clone(),
                client.clone(),
            )
            .await
            .unwrap();
        }

        cmd_xadd(
            cmd("XADD", &["s", "MAXLEN", "=", "5", "11-0", "k", "v"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();

        let reply = cmd_xlen(cmd("XLEN", &["s"]), db, client).await.unwrap();
        assert_eq!(reply, Frame::Integer(5));
    }

    #[tokio::test]
    async fn test_xrange() {
        let (db, client) = setup();
        for i in 1..=5 {
            cmd_xadd(
                cmd("XADD", &["s", &format!("{i}-0"), "n", &i.to_string()]),
                db.clone(),
                client.clone(),
            )
            .await
            .unwrap();
        }

        let reply = cmd_xrange(cmd("XRANGE", &["s", "2-0", "4-0"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 3);

        let reply = cmd_xrange(cmd("XRANGE", &["s", "-", "+", "COUNT", "2"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 2);

        let reply = cmd_xrevrange(cmd("XREVRANGE", &["s", "+", "-"]), db, client)
            .await
            .unwrap();
        let entries = reply.as_array().unwrap();
        assert_eq!(entries.len(), 5);
        // Newest first.
        let Frame::Array(first) = &entries[0] else { panic!() };
        assert_eq!(first[0], Frame::Bulk(Bytes::from("5-0")));
    }

    #[tokio::test]
    async fn test_xread() {
        let (db, client) = setup();
        for i in 1..=3 {
            cmd_xadd(
                cmd("XADD", &["s", &format!("{i}-0"), "n", &i.to_string()]),
                db.clone(),
                client.clone(),
            )
            .await
            .unwrap();
        }

        let reply = cmd_xread(cmd("XREAD", &["STREAMS", "s", "1-0"]), db.clone(), client.clone())
            .await
            .unwrap();
        let Frame::Array(streams) = reply else { panic!() };
        let Frame::Array(stream_result) = &streams[0] else { panic!() };
        assert_eq!(stream_result[0], Frame::Bulk(Bytes::from("s")));
        let Frame::Array(entries) = &stream_result[1] else { panic!() };
        assert_eq!(entries.len(), 2);

        // `$` means strictly after the current last entry: nothing yet.
        let reply = cmd_xread(cmd("XREAD", &["STREAMS", "s", "$"]), db, client)
            .await
            .unwrap();
        assert_eq!(reply, Frame::NullArray);
    }

    #[tokio::test]
    async fn test_xdel_xtrim() {
        let (db, client) = setup();
        for i in 1..=5 {
            cmd_xadd(
                cmd("XADD", &["s", &format!("{i}-0"), "k", "v"]),
                db.clone(),
                client.clone(),
            )
            .await
            .unwrap();
        }

        let reply = cmd_xdel(cmd("XDEL", &["s", "2-0", "9-9"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(1));

        let reply = cmd_xtrim(cmd("XTRIM", &["s", "MAXLEN", "2"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(2));

        let reply = cmd_xlen(cmd("XLEN", &["s"]), db, client).await.unwrap();
        assert_eq!(reply, Frame::Integer(2));
    }

    #[tokio::test]
    async fn test_xgroup_lifecycle() {
        let (db, client) = setup();

        // MKSTREAM creates the missing stream.
        let reply = cmd_xgroup(
            cmd("XGROUP", &["CREATE", "s", "g", "$", "MKSTREAM"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::ok());

        // Duplicate name.
        let err = cmd_xgroup(cmd("XGROUP", &["CREATE", "s", "g", "$"]), db.clone(), client.clone())
            .await
            .unwrap_err();
        assert!(err.to_resp_error().starts_with("BUSYGROUP"));

        let reply = cmd_xgroup(
            cmd("XGROUP", &["CREATECONSUMER", "s", "g", "c1"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::Integer(1));

        let reply = cmd_xgroup(
            cmd("XGROUP", &["DELCONSUMER", "s", "g", "c1"]),
            db.clone(),
            client.clone(),
        )
        .await
        .unwrap();
        assert_eq!(reply, Frame::Integer(0));

        let reply = cmd_xgroup(cmd("XGROUP", &["SETID", "s", "g", "5-0"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::ok());

        let reply = cmd_xgroup(cmd("XGROUP", &["DESTROY", "s", "g"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(1));

        // Group gone -> NOGROUP for consumer ops.
        let err = cmd_xgroup(
            cmd("XGROUP", &["CREATECONSUMER", "s", "g", "c1"]),
            db,
            client,
        )
        .await
        .unwrap_err();
        assert!(err.to_resp_error().starts_with("NOGROUP"));
    }

    #[tokio::test]
    async fn test_xinfo() {
        let (db, client) = setup();
        cmd_xadd(cmd("XADD", &["s", "1-0", "k", "v"]), db.clone(), client.clone())
            .await
            .unwrap();
        cmd_xgroup(cmd("XGROUP", &["CREATE", "s", "g", "$"]), db.clone(), client.clone())
            .await
            .unwrap();

        let reply = cmd_xinfo(cmd("XINFO", &["STREAM", "s"]), db.clone(), client.clone())
            .await
            .unwrap();
        let Frame::Array(info) = reply else { panic!() };
        assert_eq!(info[0], Frame::Bulk(Bytes::from("length")));
        assert_eq!(info[1], Frame::Integer(1));

        let reply = cmd_xinfo(cmd("XINFO", &["GROUPS", "s"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 1);

        let reply = cmd_xinfo(cmd("XINFO", &["CONSUMERS", "s", "g"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 0);

        assert!(cmd_xinfo(cmd("XINFO", &["STREAM", "missing"]), db, client)
            .await
            .is_err());
    }
}
