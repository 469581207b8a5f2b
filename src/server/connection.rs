//! Per-connection handling.
//!
//! One task per accepted socket. The loop decodes one RESP array at a time
//! and runs it through the executor; replies are batched into a single
//! write buffer and flushed once the pipeline drains. SUBSCRIBE and MONITOR
//! switch the connection into their dedicated loops.

use super::metrics::ServerMetrics;
use super::pubsub::PubSubMessage;
use super::ClientState;
use crate::commands::{CommandExecutor, ParsedCommand};
use crate::error::{AuthError, CommandError};
use crate::protocol::{Frame, RespParser};
use crate::Result;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Buffer size for socket reads.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Flush after this many batched replies.
const WRITE_BATCH_SIZE: usize = 64;

/// Flush once the write buffer grows past this.
const WRITE_BUFFER_HIGH_WATER: usize = 64 * 1024;

/// Commands a connection accepts while in subscriber mode.
const SUBSCRIBER_COMMANDS: &[&str] = &[
    "SUBSCRIBE",
    "UNSUBSCRIBE",
    "PSUBSCRIBE",
    "PUNSUBSCRIBE",
    "PING",
    "QUIT",
];

/// A connection to a single client.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    peer_addr: SocketAddr,
    parser: RespParser,
    state: Arc<ClientState>,
    executor: Arc<CommandExecutor>,
    metrics: Arc<ServerMetrics>,
    write_buffer: BytesMut,
    pending_writes: usize,
    /// Idle timeout in seconds; 0 disables reaping
    idle_timeout: u32,
}

impl Connection {
    /// Create a new connection handler.
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        id: u64,
        executor: Arc<CommandExecutor>,
        metrics: Arc<ServerMetrics>,
        idle_timeout: u32,
    ) -> Self {
        debug!("new connection from {peer_addr} (id={id})");

        Self {
            stream: BufWriter::new(stream),
            peer_addr,
            parser: RespParser::new(),
            state: Arc::new(ClientState::new(id, peer_addr.to_string())),
            executor,
            metrics,
            write_buffer: BytesMut::with_capacity(4096),
            pending_writes: 0,
            idle_timeout,
        }
    }

    /// The per-connection state (exposed for adapters and tests).
    pub fn state(&self) -> &Arc<ClientState> {
        &self.state
    }

    /// Run the connection until close.
    pub async fn run(&mut self) -> Result<()> {
        let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            if self.state.is_closed() {
                break;
            }

            if self.state.is_in_pubsub_mode() {
                self.run_pubsub_mode(&mut read_buf).await?;
                continue;
            }

            let n = match self.read_some(&mut read_buf).await? {
                Some(n) => n,
                None => break,
            };

            self.parser.extend(&read_buf[..n]);

            loop {
                match self.parser.parse() {
                    Ok(Some(frame)) => {
                        self.handle_frame(frame, n as u64).await?;

                        if self.state.is_closed() || self.state.is_in_pubsub_mode() {
                            self.flush_writes().await?;
                            break;
                        }
                        if self.pending_writes >= WRITE_BATCH_SIZE
                            || self.write_buffer.len() >= WRITE_BUFFER_HIGH_WATER
                        {
                            self.flush_writes().await?;
                        }
                    }
                    Ok(None) => {
                        self.flush_writes().await?;
                        break;
                    }
                    Err(e) => {
                        // Malformed framing kills the connection.
                        self.metrics.parse_errors.fetch_add(
                            1,
                            std::sync::atomic::Ordering::Relaxed,
                        );
                        self.queue_frame(&Frame::error(format!("ERR Protocol error: {e}")));
                        self.flush_writes().await?;
                        self.state.close();
                        break;
                    }
                }
            }
        }

        self.flush_writes().await?;
        Ok(())
    }

    /// One socket read, honoring the idle timeout. Returns None at EOF.
    async fn read_some(&mut self, read_buf: &mut [u8]) -> Result<Option<usize>> {
        let read = self.stream.get_mut().read(read_buf);
        let n = if self.idle_timeout > 0 {
            match tokio::time::timeout(Duration::from_secs(u64::from(self.idle_timeout)), read)
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    debug!("reaping idle connection {}", self.peer_addr);
                    return Ok(None);
                }
            }
        } else {
            read.await?
        };

        if n == 0 {
            debug!("connection closed by peer: {}", self.peer_addr);
            return Ok(None);
        }
        trace!("read {n} bytes from {}", self.peer_addr);
        Ok(Some(n))
    }

    /// Handle one decoded command frame.
    async fn handle_frame(&mut self, frame: Frame, bytes_in: u64) -> Result<()> {
        let cmd = match ParsedCommand::from_frame(frame) {
            Ok(cmd) => cmd,
            Err(e) => {
                self.queue_frame(&Frame::error(e.to_resp_error()));
                return Ok(());
            }
        };

        // Commands that change the connection's mode are intercepted here;
        // everything else goes through the executor.
        match cmd.name.as_str() {
            "QUIT" => {
                self.queue_frame(&Frame::ok());
                self.state.close();
                return Ok(());
            }
            "SUBSCRIBE" | "PSUBSCRIBE" => {
                if let Some(denied) = self.auth_denied() {
                    self.queue_frame(&denied);
                    return Ok(());
                }
                if cmd.args.is_empty() {
                    self.queue_frame(&Frame::error(
                        CommandError::WrongArity {
                            command: cmd.name.to_lowercase(),
                        }
                        .to_string(),
                    ));
                    return Ok(());
                }
                self.subscribe(&cmd);
                return Ok(());
            }
            // With no active subscriptions these are acknowledgment-only.
            "UNSUBSCRIBE" | "PUNSUBSCRIBE" => {
                if let Some(denied) = self.auth_denied() {
                    self.queue_frame(&denied);
                    return Ok(());
                }
                let kind: &'static [u8] = if cmd.name == "UNSUBSCRIBE" {
                    b"unsubscribe"
                } else {
                    b"punsubscribe"
                };
                if cmd.args.is_empty() {
                    self.queue_frame(&Frame::Array(vec![
                        Frame::Bulk(Bytes::from_static(kind)),
                        Frame::Null,
                        Frame::Integer(0),
                    ]));
                } else {
                    for target in &cmd.args {
                        self.queue_frame(&Frame::Array(vec![
                            Frame::Bulk(Bytes::from_static(kind)),
                            Frame::Bulk(target.clone()),
                            Frame::Integer(0),
                        ]));
                    }
                }
                return Ok(());
            }
            "MONITOR" => {
                if let Some(denied) = self.auth_denied() {
                    self.queue_frame(&denied);
                    return Ok(());
                }
                self.queue_frame(&Frame::ok());
                self.flush_writes().await?;
                return self.run_monitor_mode().await;
            }
            _ => {}
        }

        let response = match self.executor.execute(cmd, self.state.clone()).await {
            Ok(frame) => frame,
            Err(e) => Frame::error(e.to_resp_error()),
        };

        let bytes_out = self.queue_frame(&response);
        self.metrics.record_command(bytes_in, bytes_out as u64);
        Ok(())
    }

    fn auth_denied(&self) -> Option<Frame> {
        let auth = self.executor.database().server_auth();
        if auth.is_auth_required() && !self.state.is_authenticated() {
            Some(Frame::error(AuthError::AuthRequired.to_string()))
        } else {
            None
        }
    }

    /// Register subscriptions and acknowledge each one.
    fn subscribe(&mut self, cmd: &ParsedCommand) {
        let pubsub = self.executor.database().pubsub().clone();
        let pattern_mode = cmd.name == "PSUBSCRIBE";

        for target in &cmd.args {
            let count = if pattern_mode {
                let receiver = pubsub.psubscribe(target.clone());
                self.state.subscribe_pattern(target.clone(), receiver)
            } else {
                let receiver = pubsub.subscribe(target.clone());
                self.state.subscribe_channel(target.clone(), receiver)
            };

            let kind: &'static [u8] = if pattern_mode {
                b"psubscribe"
            } else {
                b"subscribe"
            };
            self.queue_frame(&Frame::Array(vec![
                Frame::Bulk(Bytes::from_static(kind)),
                Frame::Bulk(target.clone()),
                Frame::Integer(count as i64),
            ]));
        }
    }

    /// Subscriber mode: wait on both the socket and the subscription
    /// receivers; only the six subscriber commands are accepted.
    async fn run_pubsub_mode(&mut self, read_buf: &mut [u8]) -> Result<()> {
        let mut pubsub_state = self.state.take_pubsub_state();
        let mut channel_receivers: Vec<(Bytes, broadcast::Receiver<PubSubMessage>)> =
            pubsub_state.channel_receivers.drain().collect();
        let mut pattern_receivers: Vec<(Bytes, broadcast::Receiver<PubSubMessage>)> =
            pubsub_state.pattern_receivers.drain().collect();

        // Commands pipelined behind the SUBSCRIBE are already buffered.
        while let Ok(Some(frame)) = self.parser.parse() {
            self.handle_subscriber_command(frame, &mut channel_receivers, &mut pattern_receivers)?;
        }
        self.flush_writes().await?;
        if channel_receivers.is_empty() && pattern_receivers.is_empty() {
            self.state.restore_pubsub_state(super::state::PubSubState::default());
            return Ok(());
        }

        let exit = loop {
            if self.state.is_closed() {
                break true;
            }

            tokio::select! {
                result = self.stream.get_mut().read(read_buf) => {
                    match result {
                        Ok(0) => {
                            debug!("subscriber closed: {}", self.peer_addr);
                            self.state.close();
                            break true;
                        }
                        Ok(n) => {
                            self.parser.extend(&read_buf[..n]);
                            let mut should_exit = false;
                            while let Ok(Some(frame)) = self.parser.parse() {
                                if self.handle_subscriber_command(
                                    frame,
                                    &mut channel_receivers,
                                    &mut pattern_receivers,
                                )? {
                                    should_exit = true;
                                    break;
                                }
                            }
                            self.flush_writes().await?;
                            if should_exit
                                || (channel_receivers.is_empty() && pattern_receivers.is_empty())
                            {
                                break false;
                            }
                        }
                        Err(e) => return Err(e.into()),
                    }
                }

                message = recv_any(&mut channel_receivers, &mut pattern_receivers) => {
                    if let Some(message) = message {
                        self.queue_pubsub_message(&message);
                        self.flush_writes().await?;
                    }
                }
            }
        };

        pubsub_state.channel_receivers = channel_receivers.into_iter().collect();
        pubsub_state.pattern_receivers = pattern_receivers.into_iter().collect();
        if exit {
            // Connection is going away; drop the subscriptions.
            let pubsub = self.executor.database().pubsub();
            for channel in pubsub_state.channel_receivers.keys() {
                pubsub.unsubscribe(channel);
            }
            for pattern in pubsub_state.pattern_receivers.keys() {
                pubsub.punsubscribe(pattern);
            }
            self.state.restore_pubsub_state(super::state::PubSubState::default());
        } else {
            self.state.restore_pubsub_state(pubsub_state);
        }
        Ok(())
    }

    /// Handle one command while in subscriber mode. Returns true when the
    /// subscriber loop should exit (QUIT or last unsubscribe).
    fn handle_subscriber_command(
        &mut self,
        frame: Frame,
        channel_receivers: &mut Vec<(Bytes, broadcast::Receiver<PubSubMessage>)>,
        pattern_receivers: &mut Vec<(Bytes, broadcast::Receiver<PubSubMessage>)>,
    ) -> Result<bool> {
        let cmd = match ParsedCommand::from_frame(frame) {
            Ok(cmd) => cmd,
            Err(e) => {
                self.queue_frame(&Frame::error(e.to_resp_error()));
                return Ok(false);
            }
        };

        if !SUBSCRIBER_COMMANDS.contains(&cmd.name.as_str()) {
            self.queue_frame(&Frame::error(
                CommandError::SubscriberMode(cmd.name.clone()).to_string(),
            ));
            return Ok(false);
        }

        let pubsub = self.executor.database().pubsub().clone();
        match cmd.name.as_str() {
            "SUBSCRIBE" => {
                for channel in &cmd.args {
                    let receiver = pubsub.subscribe(channel.clone());
                    channel_receivers.push((channel.clone(), receiver));
                    let total = channel_receivers.len() + pattern_receivers.len();
                    self.queue_frame(&Frame::Array(vec![
                        Frame::Bulk(Bytes::from_static(b"subscribe")),
                        Frame::Bulk(channel.clone()),
                        Frame::Integer(total as i64),
                    ]));
                }
                Ok(false)
            }
            "PSUBSCRIBE" => {
                for pattern in &cmd.args {
                    let receiver = pubsub.psubscribe(pattern.clone());
                    pattern_receivers.push((pattern.clone(), receiver));
                    let total = channel_receivers.len() + pattern_receivers.len();
                    self.queue_frame(&Frame::Array(vec![
                        Frame::Bulk(Bytes::from_static(b"psubscribe")),
                        Frame::Bulk(pattern.clone()),
                        Frame::Integer(total as i64),
                    ]));
                }
                Ok(false)
            }
            "UNSUBSCRIBE" => {
                let targets: Vec<Bytes> = if cmd.args.is_empty() {
                    channel_receivers.iter().map(|(c, _)| c.clone()).collect()
                } else {
                    cmd.args.clone()
                };
                for channel in targets {
                    if let Some(pos) = channel_receivers.iter().position(|(c, _)| *c == channel) {
                        channel_receivers.remove(pos);
                        pubsub.unsubscribe(&channel);
                    }
                    let total = channel_receivers.len() + pattern_receivers.len();
                    self.queue_frame(&Frame::Array(vec![
                        Frame::Bulk(Bytes::from_static(b"unsubscribe")),
                        Frame::Bulk(channel),
                        Frame::Integer(total as i64),
                    ]));
                }
                Ok(channel_receivers.is_empty() && pattern_receivers.is_empty())
            }
            "PUNSUBSCRIBE" => {
                let targets: Vec<Bytes> = if cmd.args.is_empty() {
                    pattern_receivers.iter().map(|(p, _)| p.clone()).collect()
                } else {
                    cmd.args.clone()
                };
                for pattern in targets {
                    if let Some(pos) = pattern_receivers.iter().position(|(p, _)| *p == pattern) {
                        pattern_receivers.remove(pos);
                        pubsub.punsubscribe(&pattern);
                    }
                    let total = channel_receivers.len() + pattern_receivers.len();
                    self.queue_frame(&Frame::Array(vec![
                        Frame::Bulk(Bytes::from_static(b"punsubscribe")),
                        Frame::Bulk(pattern),
                        Frame::Integer(total as i64),
                    ]));
                }
                Ok(channel_receivers.is_empty() && pattern_receivers.is_empty())
            }
            "PING" => {
                let payload = cmd.args.first().cloned().unwrap_or_default();
                self.queue_frame(&Frame::Array(vec![
                    Frame::Bulk(Bytes::from_static(b"pong")),
                    Frame::Bulk(payload),
                ]));
                Ok(false)
            }
            "QUIT" => {
                self.queue_frame(&Frame::ok());
                self.state.close();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn queue_pubsub_message(&mut self, message: &PubSubMessage) {
        let frame = match &message.pattern {
            Some(pattern) => Frame::Array(vec![
                Frame::Bulk(Bytes::from_static(b"pmessage")),
                Frame::Bulk(pattern.clone()),
                Frame::Bulk(message.channel.clone()),
                Frame::Bulk(message.message.clone()),
            ]),
            None => Frame::Array(vec![
                Frame::Bulk(Bytes::from_static(b"message")),
                Frame::Bulk(message.channel.clone()),
                Frame::Bulk(message.message.clone()),
            ]),
        };
        self.queue_frame(&frame);
    }

    /// MONITOR mode: stream every executed command until the client closes
    /// the socket or sends QUIT.
    async fn run_monitor_mode(&mut self) -> Result<()> {
        let mut feed = self.executor.monitor().subscribe();
        let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                line = feed.recv() => {
                    match line {
                        Ok(line) => {
                            let text = String::from_utf8_lossy(&line).into_owned();
                            self.queue_frame(&Frame::simple(text));
                            self.flush_writes().await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(dropped)) => {
                            trace!("monitor lagged, dropped {dropped} lines");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                result = self.stream.get_mut().read(&mut read_buf) => {
                    match result {
                        Ok(0) => {
                            self.state.close();
                            break;
                        }
                        Ok(n) => {
                            self.parser.extend(&read_buf[..n]);
                            while let Ok(Some(frame)) = self.parser.parse() {
                                if let Ok(cmd) = ParsedCommand::from_frame(frame) {
                                    if cmd.name == "QUIT" || cmd.name == "RESET" {
                                        self.queue_frame(&Frame::ok());
                                        self.flush_writes().await?;
                                        self.state.close();
                                        return Ok(());
                                    }
                                }
                            }
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        Ok(())
    }

    /// Queue a frame for writing. Returns the number of bytes queued.
    fn queue_frame(&mut self, frame: &Frame) -> usize {
        let start_len = self.write_buffer.len();
        frame.serialize(&mut self.write_buffer);
        self.pending_writes += 1;
        self.write_buffer.len() - start_len
    }

    /// Flush all pending writes to the socket.
    async fn flush_writes(&mut self) -> Result<()> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;
        self.write_buffer.clear();
        self.pending_writes = 0;
        Ok(())
    }
}

/// Poll every receiver for a pending message; sleeps briefly when all are
/// empty so the select loop can service the socket.
async fn recv_any(
    channel_receivers: &mut [(Bytes, broadcast::Receiver<PubSubMessage>)],
    pattern_receivers: &mut [(Bytes, broadcast::Receiver<PubSubMessage>)],
) -> Option<PubSubMessage> {
    loop {
        for (_, receiver) in channel_receivers.iter_mut() {
            match receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Empty) => {}
                Err(_) => {}
            }
        }
        for (_, receiver) in pattern_receivers.iter_mut() {
            match receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Empty) => {}
                Err(_) => {}
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("id", &self.state.id())
            .finish()
    }
}
