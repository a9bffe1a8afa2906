//! # TideKV - An In-Memory, Redis-Compatible Key-Value Store
//!
//! TideKV speaks the RESP wire protocol and keeps strings and sorted sets in
//! memory across a fixed number of numbered databases. Keys can carry an
//! expiry, which a timer wheel enforces eagerly, and every mutation can be
//! logged to an append-only file that is replayed on startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               TideKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│   Engine    │── SELECT/PING    │
//! │  │ (main.rs)   │    │  Handler    │    │             │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                           │                   │ db_index                │
//! │                      RESP parser              ▼                         │
//! │                                  ┌──────────────────────────┐           │
//! │                                  │ Database 0 .. N-1        │           │
//! │                                  │  command table, handlers │           │
//! │                                  └──┬──────────┬─────────┬──┘           │
//! │                                     │          │         │              │
//! │                          ┌──────────▼───┐ ┌────▼─────┐ ┌─▼──────────┐   │
//! │                          │ Keyspace     │ │TimeWheel │ │ Aof writer │   │
//! │                          │ (shards,     │ │ (expiry) │ │ (fsync     │   │
//! │                          │  SortedSet)  │ │          │ │  policy)   │   │
//! │                          └──────────────┘ └──────────┘ └────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use tidekv::engine::ReplayConnection;
//! use tidekv::{Engine, EngineConfig, RespValue};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tidekv::EngineError> {
//! let engine = Engine::open(EngineConfig::default())?;
//! let mut conn = ReplayConnection::new();
//!
//! let reply = engine.execute(&mut conn, vec!["SET".into(), "name".into(), "tide".into()]);
//! assert_eq!(reply, RespValue::ok());
//!
//! let reply = engine.execute(&mut conn, vec!["GET".into(), "name".into()]);
//! assert_eq!(reply, RespValue::bulk_string("tide"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Supported Commands
//!
//! - Strings: `GET`, `MGET`, `SET key value [EX s | PX ms]`, `MSET`
//! - Keys: `DEL`, `EXISTS`, `EXPIRE`, `PEXPIREAT`, `TTL`, `PERSIST`, `TYPE`
//! - Sorted sets: `ZADD`, `ZSCORE`, `ZREM`, `ZCARD`, `ZRANK`, `ZREVRANK`,
//!   `ZRANGE`, `ZREVRANGE`
//! - Server: `SELECT`, `PING`, `AUTH`, `COMMAND`, `ECHO`, `DBSIZE`, `FLUSHDB`

pub mod commands;
pub mod connection;
pub mod engine;
pub mod persistence;
pub mod protocol;
pub mod storage;

pub use commands::CommandError;
pub use connection::{handle_connection, ConnectionStats};
pub use engine::{Engine, EngineConfig, EngineError};
pub use persistence::{AofConfig, FsyncPolicy};
pub use protocol::{ParseError, RespParser, RespValue};

/// The default port TideKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host TideKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of TideKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
