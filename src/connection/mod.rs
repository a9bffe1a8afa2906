//! Client connections.
//!
//! Each accepted socket is served by its own task running a
//! [`ConnectionHandler`]. All handlers share one [`Engine`](crate::Engine)
//! and one [`ConnectionStats`].
//!
//! ```text
//! TcpListener::accept ──► spawn(handle_connection) ──► ConnectionHandler
//!                                                         │
//!                          read ─► parse ─► Engine::execute ─► reply
//! ```
//!
//! ```ignore
//! use tidekv::connection::{handle_connection, ConnectionStats};
//! use tidekv::{Engine, EngineConfig};
//! use std::sync::Arc;
//!
//! let engine = Arc::new(Engine::open(EngineConfig::default())?);
//! let stats = Arc::new(ConnectionStats::new());
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, Arc::clone(&engine), Arc::clone(&stats)));
//! ```

pub mod handler;

pub use handler::{
    handle_connection, ClientState, ConnectionError, ConnectionHandler, ConnectionStats,
};
