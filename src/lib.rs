//! # custos
//!
//! An in-memory key-value store speaking the Redis serialization protocol.
//!
//! custos implements:
//! - RESP framing with pipelining and inline commands
//! - 16 logical databases of typed values (string, list, hash, set,
//!   sorted set, stream, JSON document)
//! - Per-key TTL expiration, lazy plus background sampling
//! - MULTI/EXEC/WATCH transactions with version-counter fingerprints
//! - Pub/sub with channel and pattern subscriptions over bounded inboxes
//! - Dual persistence: binary snapshot and an append-only command log
//! - MONITOR, slowlog, and CONFIG-driven runtime parameters
//!
//! ## Example
//!
//! ```no_run
//! use custos::{Config, Server};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> custos::Result<()> {
//!     let config = Config::from_env();
//!     let server = Arc::new(Server::new(config));
//!     server.run().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, rust_2018_idioms, unused_lifetimes, unused_qualifications)]
#![allow(
    clippy::module_name_repetitions,
    clippy::await_holding_lock, // parking_lot guards never span an await
    clippy::type_complexity
)]

/// Command parsing and execution layer.
pub mod commands;
/// Error types and result aliases.
pub mod error;
/// Glob pattern matching.
pub mod pattern;
/// Snapshot and AOF persistence.
pub mod persistence;
/// RESP protocol implementation.
pub mod protocol;
/// TCP server and connection management.
pub mod server;
/// In-memory keyspace engine.
pub mod storage;
/// Typed value implementations.
pub mod types;

pub use commands::{CommandExecutor, ParsedCommand};
pub use error::{Error, Result};
pub use protocol::{Frame, RespParser};
pub use server::{ClientState, Config, Server};
pub use storage::Database;
pub use types::{CustosValue, Key};

/// Crate version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default server port.
pub const DEFAULT_PORT: u16 = 6379;

/// Maximum inline request size (64 KiB).
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Maximum bulk string size (512 MiB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in a command array.
pub const MAX_ARGUMENTS: usize = 1_000_000;
