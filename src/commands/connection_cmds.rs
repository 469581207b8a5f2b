//! Connection command handlers.

use super::ParsedCommand;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// PING [message]
pub fn cmd_ping(
    cmd: ParsedCommand,
    _db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        match cmd.args.first() {
            Some(message) => Ok(Frame::Bulk(message.clone())),
            None => Ok(Frame::simple("PONG")),
        }
    })
}

/// ECHO message
pub fn cmd_echo(
    cmd: ParsedCommand,
    _db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { Ok(Frame::Bulk(cmd.args[0].clone())) })
}

/// CLIENT ID|GETNAME|SETNAME|LIST
pub fn cmd_client(
    cmd: ParsedCommand,
    _db: Arc<Db>,
    client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        cmd.require_args(1)?;
        match cmd.get_str(0)?.to_uppercase().as_str() {
            "ID" => Ok(Frame::Integer(client.id() as i64)),
            "GETNAME" => Ok(client
                .name()
                .map(|n| Frame::Bulk(n.into_bytes().into()))
                .unwrap_or(Frame::Bulk(bytes::Bytes::new()))),
            "SETNAME" => {
                cmd.require_exact_args(2)?;
                let name = cmd.get_str(1)?;
                if name.contains(' ') || name.contains('\n') {
                    return Err(CommandError::SyntaxError.into());
                }
                client.set_name(name.to_string());
                Ok(Frame::ok())
            }
            "LIST" => {
                let line = format!(
                    "id={} addr={} name={} db={} multi={}\n",
                    client.id(),
                    client.addr(),
                    client.name().unwrap_or_default(),
                    client.db_index(),
                    if client.is_in_transaction() { 1 } else { -1 },
                );
                Ok(Frame::Bulk(line.into_bytes().into()))
            }
            sub => Err(CommandError::UnknownCommand(format!("CLIENT {sub}")).into()),
        }
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
            Arc::new(ClientState::new(7, "127.0.0.1:9999".into())),
        )
    }

    fn cmd(name: &str, args: &[&str]) -> ParsedCommand {
        ParsedCommand::from_parts(
            name.into(),
            args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect(),
        )
    }

    #[tokio::test]
    async fn test_ping() {
        let (db, client) = setup();
        let reply = cmd_ping(cmd("PING", &[]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::simple("PONG"));

        let reply = cmd_ping(cmd("PING", &["hi"]), db, client).await.unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("hi")));
    }

    #[tokio::test]
    async fn test_client_name() {
        let (db, client) = setup();
        let reply = cmd_client(cmd("CLIENT", &["SETNAME", "worker-1"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::ok());

        let reply = cmd_client(cmd("CLIENT", &["GETNAME"]), db.clone(), client.clone())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from("worker-1")));

        let reply = cmd_client(cmd("CLIENT", &["ID"]), db, client).await.unwrap();
        assert_eq!(reply, Frame::Integer(7));
    }

    #[tokio::test]
    async fn test_client_setname_rejects_spaces() {
        let (db, client) = setup();
        assert!(
            cmd_client(cmd("CLIENT", &["SETNAME", "bad name"]), db, client)
                .await
                .is_err()
        );
    }
}
