//! Blocking command handlers.
//!
//! BLPOP/BRPOP return a value as soon as any of the listed keys has one,
//! polling on a short cadence, and return a null array once the supplied
//! timeout elapses. A timeout of 0 waits indefinitely.

use super::ParsedCommand;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::{CustosValue, Key};
use crate::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll cadence while waiting for a pushable element.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) fn try_pop(db: &Db, keys: &[Key], front: bool) -> Result<Option<Frame>> {
    for key in keys {
        let value = match db.get(key) {
            Some(value @ CustosValue::List(_)) => value,
            Some(_) => return Err(CommandError::WrongType.into()),
            None => continue,
        };

        let popped = {
            let list = value.as_list().expect("checked as list");
            let mut list = list.write();
            if front {
                list.pop_front()
            } else {
                list.pop_back()
            }
        };

        if let Some(element) = popped {
            db.store(key.clone(), value);
            return Ok(Some(Frame::Array(vec![
                Frame::Bulk(key.to_bytes()),
                Frame::Bulk(element),
            ])));
        }
    }
    Ok(None)
}

fn blocking_pop(
    cmd: ParsedCommand,
    db: Arc<Db>,
    front: bool,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(2)?;

        let timeout_idx = cmd.args.len() - 1;
        let timeout = cmd.get_f64(timeout_idx)?;
        if timeout < 0.0 {
            return Err(CommandError::MustBePositive.into());
        }
        let deadline = if timeout == 0.0 {
            None
        } else {
            Some(Instant::now() + Duration::from_secs_f64(timeout))
        };

        let keys: Vec<Key> = cmd.args[..timeout_idx]
            .iter()
            .map(|b| Key::from(b.clone()))
            .collect();

        loop {
            // Each attempt takes a shared pass on the atomic window; the
            // guard is released before sleeping so EXEC is never starved.
            {
                let _pass = db.guard().read().await;
                if let Some(frame) = try_pop(&db, &keys, front)? {
                    return Ok(frame);
                }
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Ok(Frame::NullArray);
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
}

/// BLPOP key [key ...] timeout
pub fn cmd_blpop(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    blocking_pop(cmd, db, true)
}

/// BRPOP key [key ...] timeout
pub fn cmd_brpop(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    blocking_pop(cmd, db, false)
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
    async fn test_immediate_return_when_data_present() {
        let (db, client) = setup();
        let list = CustosValue::new_list();
        list.as_list().unwrap().write().push_back(Bytes::from("x"));
        db.store(Key::from("l"), list);

        let reply = cmd_blpop(cmd("BLPOP", &["l", "5"]), db, client).await.unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![Frame::Bulk(Bytes::from("l")), Frame::Bulk(Bytes::from("x"))])
        );
    }

    #[tokio::test]
    async fn test_timeout_returns_null_array() {
        let (db, client) = setup();
        let start = Instant::now();
        let reply = cmd_brpop(cmd("BRPOP", &["missing", "0.05"]), db, client)
            .await
            .unwrap();
        assert_eq!(reply, Frame::NullArray);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_wakes_on_concurrent_push() {
        let (db, client) = setup();

        let db_writer = db.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let list = CustosValue::new_list();
            list.as_list().unwrap().write().push_back(Bytes::from("late"));
            db_writer.store(Key::from("l"), list);
        });

        let reply = cmd_blpop(cmd("BLPOP", &["l", "5"]), db, client).await.unwrap();
        writer.await.unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![
                Frame::Bulk(Bytes::from("l")),
                Frame::Bulk(Bytes::from("late"))
            ])
        );
    }

    #[tokio::test]
    async fn test_first_key_with_data_wins() {
        let (db, client) = setup();
        let list = CustosValue::new_list();
        list.as_list().unwrap().write().push_back(Bytes::from("b-val"));
        db.store(Key::from("b"), list);

        let reply = cmd_blpop(cmd("BLPOP", &["a", "b", "1"]), db, client)
            .await
            .unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![
                Frame::Bulk(Bytes::from("b")),
                Frame::Bulk(Bytes::from("b-val"))
            ])
        );
    }
}
