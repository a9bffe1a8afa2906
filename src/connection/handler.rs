//! Connection Handler Module
//!
//! One handler per client, each in its own tokio task, reading frames,
//! executing them through the shared [`Engine`] and writing replies.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects, handler spawned
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │  Parse every complete frame  │◄──┐
//!    │  in the buffer, execute it,  │   │
//!    │  queue the reply             │   │
//!    └──────────────┬───────────────┘   │
//!                   ▼                   │
//!    ┌──────────────────────────────┐   │
//!    │  Flush replies, read more    │───┘
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 3. Client disconnects / error, handler task ends
//! ```
//!
//! Pipelined requests are answered in order with a single flush per batch.
//! A malformed frame gets a `-ERR Protocol error: ...` reply and the line
//! holding it is dropped; the connection stays open.

use crate::engine::{Connection, Engine};
use crate::protocol::parser::find_crlf;
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Largest amount of unparsed input held for one client (a maximal bulk
/// string plus its header).
const MAX_BUFFER_SIZE: usize = crate::protocol::parser::MAX_BULK_SIZE + 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Frames rejected as malformed
    pub protocol_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// What the engine sees of a network client.
#[derive(Debug)]
pub struct ClientState {
    addr: SocketAddr,
    db: usize,
}

impl ClientState {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, db: 0 }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Connection for ClientState {
    fn db_index(&self) -> usize {
        self.db
    }

    fn set_db_index(&mut self, index: usize) {
        debug!(client = %self.addr, db = index, "Database selected");
        self.db = index;
    }
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    client: ClientState,
    buffer: BytesMut,
    reply: Vec<u8>,
    engine: Arc<Engine>,
    parser: RespParser,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        engine: Arc<Engine>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            client: ClientState::new(addr),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            reply: Vec::with_capacity(INITIAL_BUFFER_SIZE),
            engine,
            parser: RespParser::new(),
            stats,
        }
    }

    /// Serves the client until it disconnects or the connection fails.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let addr = self.client.addr();
        info!(client = %addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %addr, "Client disconnected")
            }
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(frame) = self.next_frame() {
                let reply = match frame {
                    Ok(value) => match self.execute(value) {
                        Some(reply) => reply,
                        None => continue,
                    },
                    Err(e) => {
                        warn!(client = %self.client.addr(), error = %e, "Protocol error");
                        self.stats.protocol_error();
                        RespValue::error(format!("ERR Protocol error: {}", e))
                    }
                };
                reply.serialize_into(&mut self.reply);
            }

            self.flush_replies().await?;
            self.read_more_data().await?;
        }
    }

    /// Decodes the next frame from the buffer, if a complete one is there.
    /// A malformed frame costs the line it starts on.
    fn next_frame(&mut self) -> Option<Result<RespValue, ParseError>> {
        if self.buffer.is_empty() {
            return None;
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((value, consumed))) => {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.client.addr(),
                    consumed,
                    remaining = self.buffer.len(),
                    "Parsed frame"
                );
                Some(Ok(value))
            }
            Ok(None) => None,
            Err(e) => {
                match find_crlf(&self.buffer) {
                    Some(pos) => self.buffer.advance(pos + 2),
                    None => self.buffer.clear(),
                }
                Some(Err(e))
            }
        }
    }

    /// Runs one request. An empty array produces no reply.
    fn execute(&mut self, frame: RespValue) -> Option<RespValue> {
        let Some(tokens) = frame.into_command() else {
            self.stats.protocol_error();
            return Some(RespValue::error(
                "ERR Protocol error: expected an array of bulk strings",
            ));
        };
        if tokens.is_empty() {
            return None;
        }

        let reply = self.engine.execute(&mut self.client, tokens);
        self.stats.command_processed();
        Some(reply)
    }

    async fn flush_replies(&mut self) -> Result<(), ConnectionError> {
        if self.reply.is_empty() {
            return Ok(());
        }

        self.stream.write_all(&self.reply).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(self.reply.len());
        trace!(client = %self.client.addr(), bytes = self.reply.len(), "Sent replies");
        self.reply.clear();
        Ok(())
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.client.addr(),
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.bytes_read(n);
        trace!(client = %self.client.addr(), bytes = n, "Read data");
        Ok(())
    }
}

/// Errors that end a client connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Client disconnected")]
    ClientDisconnected,

    /// Connection closed in the middle of a frame
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Serves one accepted client to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    engine: Arc<Engine>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, engine, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => debug!(client = %addr, error = %e, "Connection ended with error"),
        }
    }
}
