//! End-to-end tests against the dispatcher.
//!
//! These drive the same executor entry point the RESP connections use,
//! without the socket layer in between.

use bytes::Bytes;
use custos::commands::CommandExecutor;
use custos::persistence::{AofReader, AofService};
use custos::protocol::Frame;
use custos::server::monitor::{MonitorHub, SlowLog};
use custos::server::{AppendFsync, ClientState, Config, RuntimeConfig, ServerMetrics};
use custos::storage::Database;
use custos::types::Key;
use custos::ParsedCommand;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    executor: Arc<CommandExecutor>,
    database: Arc<Database>,
    _dir: TempDir,
}

fn harness() -> Harness {
    harness_with(|_config| {})
}

fn harness_with(tweak: impl FnOnce(&mut Config)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default().dir(dir.path());
    tweak(&mut config);

    let database = Arc::new(Database::with_password(config.requirepass.clone()));
    let runtime = Arc::new(RuntimeConfig::from_config(&config));
    let aof = Arc::new(AofService::new(
        config.aof_path(),
        config.appendonly,
        config.appendfsync,
    ));
    let executor = Arc::new(CommandExecutor::new(
        database.clone(),
        Arc::new(MonitorHub::new()),
        Arc::new(SlowLog::new(
            config.slowlog_max_len,
            config.slowlog_log_slower_than,
        )),
        runtime,
        aof,
        Arc::new(ServerMetrics::new()),
    ));

    Harness {
        executor,
        database,
        _dir: dir,
    }
}

fn client() -> Arc<ClientState> {
    let client = Arc::new(ClientState::new(1, "127.0.0.1:50000".to_string()));
    client.set_authenticated(true);
    client
}

fn command(name: &str, args: &[&str]) -> ParsedCommand {
    ParsedCommand::from_parts(
        name.to_string(),
        args.iter()
            .map(|a| Bytes::copy_from_slice(a.as_bytes()))
            .collect(),
    )
}

async fn run(harness: &Harness, client: &Arc<ClientState>, name: &str, args: &[&str]) -> Frame {
    match harness
        .executor
        .execute(command(name, args), client.clone())
        .await
    {
        Ok(frame) => frame,
        Err(e) => Frame::Error(e.to_resp_error()),
    }
}

#[tokio::test]
async fn scenario_string_with_ttl() {
    let h = harness();
    let c = client();

    let reply = run(&h, &c, "SET", &["foo", "bar", "PX", "80"]).await;
    assert_eq!(reply, Frame::ok());

    let reply = run(&h, &c, "GET", &["foo"]).await;
    assert_eq!(reply, Frame::Bulk(Bytes::from("bar")));

    tokio::time::sleep(std::time::Duration::from_millis(120)).await;

    assert_eq!(run(&h, &c, "GET", &["foo"]).await, Frame::Null);
    assert_eq!(run(&h, &c, "TTL", &["foo"]).await, Frame::Integer(-2));
}

#[tokio::test]
async fn scenario_sorted_set_tie_break() {
    let h = harness();
    let c = client();

    let reply = run(&h, &c, "ZADD", &["s", "1", "b", "1", "a", "2", "c"]).await;
    assert_eq!(reply, Frame::Integer(3));

    let reply = run(&h, &c, "ZRANGE", &["s", "0", "-1", "WITHSCORES"]).await;
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
async fn scenario_optimistic_transaction_retry() {
    let h = harness();
    let client_a = client();
    let client_b = Arc::new(ClientState::new(2, "127.0.0.1:50001".to_string()));
    client_b.set_authenticated(true);

    assert_eq!(run(&h, &client_a, "WATCH", &["k"]).await, Frame::ok());
    assert_eq!(run(&h, &client_a, "MULTI", &[]).await, Frame::ok());
    assert_eq!(run(&h, &client_a, "SET", &["k", "A"]).await, Frame::queued());

    // Client B writes the watched key.
    assert_eq!(run(&h, &client_b, "SET", &["k", "B"]).await, Frame::ok());

    // EXEC aborts with a null array; B's write stands.
    assert_eq!(run(&h, &client_a, "EXEC", &[]).await, Frame::NullArray);
    assert_eq!(
        run(&h, &client_a, "GET", &["k"]).await,
        Frame::Bulk(Bytes::from("B"))
    );

    // Retry without interference succeeds.
    assert_eq!(run(&h, &client_a, "WATCH", &["k"]).await, Frame::ok());
    assert_eq!(run(&h, &client_a, "MULTI", &[]).await, Frame::ok());
    assert_eq!(run(&h, &client_a, "SET", &["k", "A"]).await, Frame::queued());
    assert_eq!(
        run(&h, &client_a, "EXEC", &[]).await,
        Frame::Array(vec![Frame::ok()])
    );
    assert_eq!(
        run(&h, &client_a, "GET", &["k"]).await,
        Frame::Bulk(Bytes::from("A"))
    );
}

#[tokio::test]
async fn scenario_set_algebra_store() {
    let h = harness();
    let c = client();

    assert_eq!(
        run(&h, &c, "SADD", &["x", "a", "b", "c"]).await,
        Frame::Integer(3)
    );
    assert_eq!(
        run(&h, &c, "SADD", &["y", "b", "c", "d"]).await,
        Frame::Integer(3)
    );
    assert_eq!(
        run(&h, &c, "SINTERSTORE", &["z", "x", "y"]).await,
        Frame::Integer(2)
    );

    let reply = run(&h, &c, "SMEMBERS", &["z"]).await;
    let Frame::Array(members) = reply else { panic!() };
    let mut members: Vec<Bytes> = members.into_iter().map(|f| f.to_bytes().unwrap()).collect();
    members.sort();
    assert_eq!(members, vec![Bytes::from("b"), Bytes::from("c")]);

    assert_eq!(run(&h, &c, "TYPE", &["z"]).await, Frame::simple("set"));

    // SUNIONSTORE dest equals SUNION of the sources.
    assert_eq!(
        run(&h, &c, "SUNIONSTORE", &["u", "x", "y"]).await,
        Frame::Integer(4)
    );
    let direct = run(&h, &c, "SUNION", &["x", "y"]).await;
    let stored = run(&h, &c, "SMEMBERS", &["u"]).await;
    let normalize = |frame: Frame| {
        let Frame::Array(frames) = frame else { panic!() };
        let mut v: Vec<Bytes> = frames.into_iter().map(|f| f.to_bytes().unwrap()).collect();
        v.sort();
        v
    };
    assert_eq!(normalize(direct), normalize(stored));
}

#[tokio::test]
async fn scenario_stream_ordering() {
    let h = harness();
    let c = client();

    let reply = run(&h, &c, "XADD", &["stream", "1-1", "k", "v"]).await;
    assert_eq!(reply, Frame::Bulk(Bytes::from("1-1")));

    let reply = run(&h, &c, "XADD", &["stream", "1-1", "k", "v"]).await;
    assert_eq!(
        reply,
        Frame::Error(
            "ERR The ID specified in XADD is equal or smaller than the target stream top item"
                .to_string()
        )
    );

    let reply = run(&h, &c, "XADD", &["stream", "*", "k", "v2"]).await;
    assert!(matches!(reply, Frame::Bulk(_)));

    assert_eq!(run(&h, &c, "XLEN", &["stream"]).await, Frame::Integer(2));
}

#[tokio::test]
async fn scenario_pubsub_fanout() {
    let h = harness();
    let c = client();

    let pubsub = h.database.pubsub();
    let mut direct = pubsub.subscribe(Bytes::from("news"));
    let mut pattern = pubsub.psubscribe(Bytes::from("n*"));

    let reply = run(&h, &c, "PUBLISH", &["news", "hello"]).await;
    assert_eq!(reply, Frame::Integer(2));

    assert_eq!(direct.recv().await.unwrap().message, Bytes::from("hello"));
    let pmsg = pattern.recv().await.unwrap();
    assert_eq!(pmsg.pattern, Some(Bytes::from("n*")));
    assert_eq!(pmsg.message, Bytes::from("hello"));

    // Introspection.
    let reply = run(&h, &c, "PUBSUB", &["NUMPAT"]).await;
    assert_eq!(reply, Frame::Integer(1));
}

#[tokio::test]
async fn test_exec_atomic_batch() {
    let h = harness();
    let c = client();

    run(&h, &c, "MULTI", &[]).await;
    assert_eq!(run(&h, &c, "SET", &["a", "1"]).await, Frame::queued());
    assert_eq!(run(&h, &c, "INCR", &["a"]).await, Frame::queued());
    assert_eq!(run(&h, &c, "GET", &["a"]).await, Frame::queued());

    let reply = run(&h, &c, "EXEC", &[]).await;
    assert_eq!(
        reply,
        Frame::Array(vec![
            Frame::ok(),
            Frame::Integer(2),
            Frame::Bulk(Bytes::from("2")),
        ])
    );

    // Errors are reported in place without aborting the batch.
    run(&h, &c, "MULTI", &[]).await;
    run(&h, &c, "SET", &["s", "text"]).await;
    run(&h, &c, "INCR", &["s"]).await;
    run(&h, &c, "SET", &["after", "yes"]).await;
    let reply = run(&h, &c, "EXEC", &[]).await;
    let Frame::Array(results) = reply else { panic!() };
    assert_eq!(results.len(), 3);
    assert!(results[1].is_error());
    assert_eq!(
        run(&h, &c, "GET", &["after"]).await,
        Frame::Bulk(Bytes::from("yes"))
    );
}

#[tokio::test]
async fn test_exec_without_multi() {
    let h = harness();
    let c = client();
    let reply = run(&h, &c, "EXEC", &[]).await;
    assert_eq!(reply, Frame::Error("ERR EXEC without MULTI".to_string()));
}

#[tokio::test]
async fn test_auth_gate() {
    let h = harness_with(|config| {
        config.requirepass = Some("sekrit".to_string());
    });
    let c = Arc::new(ClientState::new(1, "t".to_string()));

    let reply = run(&h, &c, "GET", &["k"]).await;
    assert!(reply
        .as_str()
        .map(|s| s.starts_with("NOAUTH"))
        .unwrap_or(false));

    // PING is allowed before auth.
    assert_eq!(run(&h, &c, "PING", &[]).await, Frame::simple("PONG"));

    let reply = run(&h, &c, "AUTH", &["wrong"]).await;
    assert!(reply
        .as_str()
        .map(|s| s.starts_with("WRONGPASS"))
        .unwrap_or(false));

    assert_eq!(run(&h, &c, "AUTH", &["sekrit"]).await, Frame::ok());
    assert_eq!(run(&h, &c, "GET", &["k"]).await, Frame::Null);
}

#[tokio::test]
async fn test_config_set_requirepass_flips_auth() {
    let h = harness();
    let c = client();

    assert_eq!(
        run(&h, &c, "CONFIG", &["SET", "requirepass", "newpass"]).await,
        Frame::ok()
    );

    let fresh = Arc::new(ClientState::new(2, "t".to_string()));
    let reply = run(&h, &fresh, "GET", &["k"]).await;
    assert!(reply
        .as_str()
        .map(|s| s.starts_with("NOAUTH"))
        .unwrap_or(false));

    assert_eq!(run(&h, &fresh, "AUTH", &["newpass"]).await, Frame::ok());
}

#[tokio::test]
async fn test_select_move_swapdb() {
    let h = harness();
    let c = client();

    run(&h, &c, "SET", &["k", "v"]).await;
    assert_eq!(run(&h, &c, "MOVE", &["k", "1"]).await, Frame::Integer(1));
    assert_eq!(run(&h, &c, "EXISTS", &["k"]).await, Frame::Integer(0));

    assert_eq!(run(&h, &c, "SELECT", &["1"]).await, Frame::ok());
    assert_eq!(
        run(&h, &c, "GET", &["k"]).await,
        Frame::Bulk(Bytes::from("v"))
    );

    // MOVE fails when the destination key exists.
    run(&h, &c, "SELECT", &["0"]).await;
    run(&h, &c, "SET", &["k", "other"]).await;
    assert_eq!(run(&h, &c, "MOVE", &["k", "1"]).await, Frame::Integer(0));

    // SWAPDB exchanges the two databases in place.
    assert_eq!(run(&h, &c, "SWAPDB", &["0", "1"]).await, Frame::ok());
    assert_eq!(
        run(&h, &c, "GET", &["k"]).await,
        Frame::Bulk(Bytes::from("v"))
    );

    assert_eq!(run(&h, &c, "SELECT", &["16"]).await, Frame::Error("ERR DB index is out of range".to_string()));
}

#[tokio::test]
async fn test_flushall() {
    let h = harness();
    let c = client();

    run(&h, &c, "SET", &["a", "1"]).await;
    run(&h, &c, "SELECT", &["3"]).await;
    run(&h, &c, "SET", &["b", "2"]).await;

    assert_eq!(run(&h, &c, "FLUSHALL", &[]).await, Frame::ok());
    assert_eq!(run(&h, &c, "DBSIZE", &[]).await, Frame::Integer(0));
    run(&h, &c, "SELECT", &["0"]).await;
    assert_eq!(run(&h, &c, "DBSIZE", &[]).await, Frame::Integer(0));
}

#[tokio::test]
async fn test_unknown_command() {
    let h = harness();
    let c = client();
    let reply = run(&h, &c, "BOGUS", &[]).await;
    assert_eq!(reply, Frame::Error("ERR unknown command 'BOGUS'".to_string()));
}

#[tokio::test]
async fn test_slowlog_records_commands() {
    let h = harness();
    let c = client();

    // Threshold 0 logs everything.
    run(&h, &c, "CONFIG", &["SET", "slowlog-log-slower-than", "0"]).await;
    run(&h, &c, "SET", &["k", "v"]).await;

    let reply = run(&h, &c, "SLOWLOG", &["LEN"]).await;
    let Frame::Integer(len) = reply else { panic!() };
    assert!(len >= 1);

    let reply = run(&h, &c, "SLOWLOG", &["GET"]).await;
    let Frame::Array(entries) = reply else { panic!() };
    assert!(!entries.is_empty());

    assert_eq!(run(&h, &c, "SLOWLOG", &["RESET"]).await, Frame::ok());
    assert_eq!(run(&h, &c, "SLOWLOG", &["LEN"]).await, Frame::Integer(0));
}

#[tokio::test]
async fn test_json_set_get_roundtrip() {
    let h = harness();
    let c = client();

    let doc = r#"{"user":{"name":"ada","tags":["a","b"]}}"#;
    assert_eq!(run(&h, &c, "JSON.SET", &["doc", "$", doc]).await, Frame::ok());

    let reply = run(&h, &c, "JSON.GET", &["doc", "$.user.tags[1]"]).await;
    assert_eq!(reply, Frame::Bulk(Bytes::from("\"b\"")));

    let reply = run(&h, &c, "JSON.GET", &["doc"]).await;
    let Frame::Bulk(raw) = reply else { panic!() };
    let parsed: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(
        parsed,
        serde_json::json!({"user": {"name": "ada", "tags": ["a", "b"]}})
    );

    assert_eq!(
        run(&h, &c, "TYPE", &["doc"]).await,
        Frame::simple("ReJSON-RL")
    );
}

async fn replay_aof(path: &Path) -> Harness {
    let fresh = harness();
    let replay_client = Arc::new(ClientState::new(0, "replay".to_string()));
    replay_client.set_authenticated(true);

    let mut reader = AofReader::open(path).unwrap();
    while let Some(args) = reader.next_command().unwrap() {
        let name = String::from_utf8_lossy(&args[0]).to_uppercase();
        let cmd = ParsedCommand::from_parts(name, args[1..].to_vec());
        fresh
            .executor
            .execute(cmd, replay_client.clone())
            .await
            .unwrap();
    }
    fresh
}

#[tokio::test]
async fn test_aof_logs_and_replays_writes() {
    let h = harness_with(|config| {
        config.appendonly = true;
        config.appendfsync = AppendFsync::Always;
    });
    let c = client();

    run(&h, &c, "SET", &["k", "v"]).await;
    run(&h, &c, "RPUSH", &["l", "a", "b"]).await;
    run(&h, &c, "SELECT", &["2"]).await;
    run(&h, &c, "SET", &["other-db", "x"]).await;
    // Reads are not logged.
    run(&h, &c, "GET", &["k"]).await;

    h.executor.aof().fsync();
    let path = h.executor.aof().path();

    let restored = replay_aof(&path).await;
    let db0 = restored.database.get_db(0).unwrap();
    assert_eq!(
        db0.get_string(&Key::from("k")).unwrap(),
        Some(Bytes::from("v"))
    );
    let db2 = restored.database.get_db(2).unwrap();
    assert_eq!(
        db2.get_string(&Key::from("other-db")).unwrap(),
        Some(Bytes::from("x"))
    );

    let list = db0.get(&Key::from("l")).unwrap();
    assert_eq!(
        list.as_list().unwrap().read().range(0, -1),
        vec![Bytes::from("a"), Bytes::from("b")]
    );
}

#[tokio::test]
async fn test_bgrewriteaof_roundtrip() {
    let h = harness_with(|config| {
        config.appendonly = true;
        config.appendfsync = AppendFsync::Always;
    });
    let c = client();

    run(&h, &c, "SET", &["k", "1"]).await;
    // Redundant history the rewrite should collapse.
    for _ in 0..10 {
        run(&h, &c, "INCR", &["k"]).await;
    }
    run(&h, &c, "ZADD", &["z", "1.5", "m"]).await;
    run(&h, &c, "EXPIRE", &["k", "1000"]).await;

    // A stream with an entry and a group, and one kept alive only by its
    // MKSTREAM group.
    run(&h, &c, "XADD", &["st", "1-1", "f", "v"]).await;
    run(&h, &c, "XGROUP", &["CREATE", "st", "g", "1-1"]).await;
    run(&h, &c, "XGROUP", &["CREATECONSUMER", "st", "g", "c1"]).await;
    run(&h, &c, "XGROUP", &["CREATE", "bare", "waiters", "$", "MKSTREAM"]).await;

    // Rewrite synchronously for the test.
    h.executor.aof().rewrite(&h.database).unwrap();

    let restored = replay_aof(&h.executor.aof().path()).await;
    let db = restored.database.get_db(0).unwrap();
    assert_eq!(
        db.get_string(&Key::from("k")).unwrap(),
        Some(Bytes::from("11"))
    );
    assert!(db.ttl(&Key::from("k")) > 0);

    let zset = db.get(&Key::from("z")).unwrap();
    assert_eq!(zset.as_zset().unwrap().read().score(b"m"), Some(1.5));

    // Stream entries, groups and consumers all survive the rewrite.
    let stream = db.get(&Key::from("st")).unwrap();
    {
        let guard = stream.as_stream().unwrap().read();
        assert_eq!(guard.len(), 1);
        let group = guard.group(b"g").unwrap();
        assert_eq!(group.last_delivered.to_string(), "1-1");
        assert!(group.consumers.contains_key(b"c1".as_slice()));
    }

    // The entry-less grouped stream is not lost.
    let bare = db.get(&Key::from("bare")).unwrap();
    {
        let guard = bare.as_stream().unwrap().read();
        assert!(guard.is_empty());
        assert!(guard.group(b"waiters").is_some());
    }
}

#[tokio::test]
async fn test_save_and_dbsize() {
    let h = harness();
    let c = client();

    run(&h, &c, "SET", &["a", "1"]).await;
    run(&h, &c, "SET", &["b", "2"]).await;
    assert_eq!(run(&h, &c, "DBSIZE", &[]).await, Frame::Integer(2));

    assert_eq!(run(&h, &c, "SAVE", &[]).await, Frame::ok());

    // INFO reflects the persistence state.
    let reply = run(&h, &c, "INFO", &["persistence"]).await;
    let Frame::Bulk(raw) = reply else { panic!() };
    let text = String::from_utf8_lossy(&raw).into_owned();
    assert!(text.contains("rdb_changes_since_last_save:0"));
}

#[tokio::test]
async fn test_blocking_pop_in_exec_does_not_block() {
    let h = harness();
    let c = client();

    run(&h, &c, "MULTI", &[]).await;
    run(&h, &c, "BLPOP", &["missing", "5"]).await;
    let started = std::time::Instant::now();
    let reply = run(&h, &c, "EXEC", &[]).await;
    assert!(started.elapsed() < std::time::Duration::from_secs(1));
    assert_eq!(reply, Frame::Array(vec![Frame::NullArray]));
}

#[tokio::test]
async fn test_expire_swapdb_keeps_ttl() {
    let h = harness();
    let c = client();

    run(&h, &c, "SET", &["k", "v"]).await;
    run(&h, &c, "EXPIRE", &["k", "500"]).await;
    run(&h, &c, "SWAPDB", &["0", "5"]).await;
    run(&h, &c, "SELECT", &["5"]).await;

    let Frame::Integer(ttl) = run(&h, &c, "TTL", &["k"]).await else {
        panic!()
    };
    assert!((499..=500).contains(&ttl));
}
