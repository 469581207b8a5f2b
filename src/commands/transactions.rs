//! Transaction command handlers: MULTI, DISCARD, WATCH, UNWATCH.
//!
//! EXEC lives in the executor, which owns the queue replay and the
//! exclusive database window.

use super::ParsedCommand;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::Key;
use crate::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// MULTI
pub fn cmd_multi(
    _cmd: ParsedCommand,
    _db: Arc<Db>,
    client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        if client.is_in_transaction() {
            return Err(CommandError::NestedMulti.into());
        }
        client.start_transaction();
        Ok(Frame::ok())
    })
}

/// DISCARD
pub fn cmd_discard(
    _cmd: ParsedCommand,
    _db: Arc<Db>,
    client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        if !client.is_in_transaction() {
            return Err(CommandError::DiscardWithoutMulti.into());
        }
        client.discard_transaction();
        Ok(Frame::ok())
    })
}

/// WATCH key [key ...]
///
/// Snapshots the fingerprint of each key in the connection's current
/// database; EXEC later aborts when any snapshot no longer matches.
pub fn cmd_watch(
    cmd: ParsedCommand,
    db: Arc<Db>,
    client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        if client.is_in_transaction() {
            return Err(CommandError::WatchInsideMulti.into());
        }
        cmd.require_args(1)?;

        let db_index = client.db_index();
        for arg in &cmd.args {
            let key = Key::from(arg.clone());
            let fingerprint = db.fingerprint(&key);
            client.watch_key(db_index, key, fingerprint);
        }
        Ok(Frame::ok())
    })
}

/// UNWATCH
pub fn cmd_unwatch(
    _cmd: ParsedCommand,
    _db: Arc<Db>,
    client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        client.unwatch_all();
        Ok(Frame::ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ServerStats;
    use crate::types::CustosValue;
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
    async fn test_multi_nested_rejected() {
        let (db, client) = setup();
        cmd_multi(cmd("MULTI", &[]), db.clone(), client.clone())
            .await
            .unwrap();
        assert!(client.is_in_transaction());

        let err = cmd_multi(cmd("MULTI", &[]), db, client).await.unwrap_err();
        assert!(err.to_resp_error().contains("can not be nested"));
    }

    #[tokio::test]
    async fn test_discard_without_multi() {
        let (db, client) = setup();
        let err = cmd_discard(cmd("DISCARD", &[]), db, client).await.unwrap_err();
        assert_eq!(err.to_resp_error(), "ERR DISCARD without MULTI");
    }

    #[tokio::test]
    async fn test_watch_inside_multi_rejected() {
        let (db, client) = setup();
        cmd_multi(cmd("MULTI", &[]), db.clone(), client.clone())
            .await
            .unwrap();
        let err = cmd_watch(cmd("WATCH", &["k"]), db, client).await.unwrap_err();
        assert!(err.to_resp_error().contains("WATCH inside MULTI"));
    }

    #[tokio::test]
    async fn test_watch_snapshots_fingerprint() {
        let (db, client) = setup();
        cmd_watch(cmd("WATCH", &["k"]), db.clone(), client.clone())
            .await
            .unwrap();

        let snapshots = client.watched_keys();
        assert_eq!(snapshots.len(), 1);
        let ((_, key), fingerprint) = &snapshots[0];
        assert_eq!(*fingerprint, db.fingerprint(key));

        // A write after WATCH makes the stored snapshot stale.
        db.set(Key::from("k"), CustosValue::string("v"));
        assert_ne!(client.watched_keys()[0].1, db.fingerprint(&Key::from("k")));
    }

    #[tokio::test]
    async fn test_unwatch() {
        let (db, client) = setup();
        cmd_watch(cmd("WATCH", &["a", "b"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(client.watched_keys().len(), 2);

        cmd_unwatch(cmd("UNWATCH", &[]), db, client.clone()).await.unwrap();
        assert!(client.watched_keys().is_empty());
    }
}
