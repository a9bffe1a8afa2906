//! Command Module
//!
//! The command table and its handlers. Each handler receives the database
//! the client has selected and the arguments after the command name, and
//! returns a reply or a [`CommandError`] that is rendered as an error reply.
//!
//! ## Architecture
//!
//! ```text
//! Engine::execute
//!       │  SELECT / PING / AUTH / COMMAND stop here (server.rs)
//!       ▼
//! ┌─────────────────┐
//! │ Database        │  lookup(name) ─► arity check ─► handler
//! └────────┬────────┘
//!          ▼
//!  string.rs / keys.rs / sorted_set.rs / server.rs
//! ```
//!
//! Arity counts the command name itself. A negative arity `-n` means "at
//! least `n`".
//!
//! Handlers that mutate state log themselves to the append-only file, since
//! what gets logged is not always the command as typed (relative TTLs are
//! logged as absolute deadlines, for instance).

pub mod keys;
pub mod server;
pub mod sorted_set;
pub mod string;

use crate::engine::Database;
use crate::protocol::RespValue;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors a command can reply with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR value is not a valid float")]
    NotFloat,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),

    #[error("ERR DB index is out of range")]
    DbIndexOutOfRange,

    #[error("ERR invalid argument: keys and members must be valid UTF-8")]
    InvalidUtf8,
}

impl From<CommandError> for RespValue {
    fn from(e: CommandError) -> Self {
        RespValue::error(e.to_string())
    }
}

pub type CommandResult = Result<RespValue, CommandError>;

/// A command handler: the selected database and the arguments after the name.
pub type Handler = fn(&Database, &[Bytes]) -> CommandResult;

/// One entry of the command table.
#[derive(Clone, Copy)]
pub struct Command {
    /// Lowercase name
    pub name: &'static str,
    /// Token count including the name; negative means "at least"
    pub arity: i32,
    pub handler: Handler,
}

impl Command {
    /// Whether `argc` tokens (name included) satisfy the arity.
    pub fn accepts(&self, argc: usize) -> bool {
        if self.arity >= 0 {
            argc == self.arity as usize
        } else {
            argc >= self.arity.unsigned_abs() as usize
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

const fn command(name: &'static str, arity: i32, handler: Handler) -> Command {
    Command {
        name,
        arity,
        handler,
    }
}

static COMMANDS: &[Command] = &[
    // Strings
    command("get", 2, string::get),
    command("mget", -2, string::mget),
    command("set", -3, string::set),
    command("mset", -3, string::mset),
    // Keys
    command("del", -2, keys::del),
    command("exists", -2, keys::exists),
    command("expire", 3, keys::expire),
    command("pexpireat", 3, keys::pexpireat),
    command("ttl", 2, keys::ttl),
    command("persist", 2, keys::persist),
    command("type", 2, keys::key_type),
    // Sorted sets
    command("zadd", -4, sorted_set::zadd),
    command("zscore", 3, sorted_set::zscore),
    command("zrem", -3, sorted_set::zrem),
    command("zcard", 2, sorted_set::zcard),
    command("zrank", 3, sorted_set::zrank),
    command("zrevrank", 3, sorted_set::zrevrank),
    command("zrange", -4, sorted_set::zrange),
    command("zrevrange", -4, sorted_set::zrevrange),
    // Server
    command("echo", 2, server::echo),
    command("dbsize", 1, server::dbsize),
    command("flushdb", 1, server::flushdb),
];

/// Finds a command by lowercase name.
pub fn lookup(name: &str) -> Option<&'static Command> {
    static TABLE: OnceLock<HashMap<&'static str, &'static Command>> = OnceLock::new();

    TABLE
        .get_or_init(|| COMMANDS.iter().map(|c| (c.name, c)).collect())
        .get(name)
        .copied()
}

/// Every command in the table.
pub fn all() -> impl Iterator<Item = &'static Command> {
    COMMANDS.iter()
}

/// Borrows an argument as a key or member name.
pub(crate) fn text(arg: &Bytes) -> Result<&str, CommandError> {
    std::str::from_utf8(arg).map_err(|_| CommandError::InvalidUtf8)
}

pub(crate) fn parse_int(arg: &Bytes) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotInteger)
}

/// Parses a score. Accepts `inf`, `+inf` and `-inf`; rejects NaN.
pub(crate) fn parse_float(arg: &Bytes) -> Result<f64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| !f.is_nan())
        .ok_or(CommandError::NotFloat)
}

/// Builds a log record: the given command name followed by `args`.
pub(crate) fn record(name: &'static str, args: &[Bytes]) -> Vec<Bytes> {
    let mut tokens = Vec::with_capacity(args.len() + 1);
    tokens.push(Bytes::from_static(name.as_bytes()));
    tokens.extend_from_slice(args);
    tokens
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::engine::{Connection, Engine, EngineConfig, ReplayConnection};
    use crate::protocol::RespValue;
    use bytes::Bytes;
    use std::time::Duration;

    /// An engine with no persistence and a fast timer wheel, plus a client.
    pub struct Client {
        pub engine: Engine,
        pub conn: ReplayConnection,
    }

    impl Client {
        pub fn new() -> Self {
            let engine = Engine::open(EngineConfig {
                shards: 4,
                wheel_interval: Duration::from_millis(10),
                wheel_slots: 128,
                ..EngineConfig::default()
            })
            .unwrap();
            Self {
                engine,
                conn: ReplayConnection::new(),
            }
        }

        pub fn run(&mut self, parts: &[&str]) -> RespValue {
            let tokens = parts
                .iter()
                .map(|p| Bytes::copy_from_slice(p.as_bytes()))
                .collect();
            self.run_tokens(tokens)
        }

        /// Runs raw tokens, for arguments that are not valid UTF-8.
        pub fn run_tokens(&mut self, tokens: Vec<Bytes>) -> RespValue {
            self.engine.execute(&mut self.conn, tokens)
        }

        pub fn wire(&mut self, parts: &[&str]) -> Vec<u8> {
            self.run(parts).serialize()
        }

        pub fn db(&self) -> usize {
            self.conn.db_index()
        }
    }
}
