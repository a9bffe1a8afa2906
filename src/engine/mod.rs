//! Engine Module
//!
//! The [`Engine`] is the single entry point for executing a command. It owns
//! a fixed set of [`Database`]s, the timer wheel shared by all of them, and
//! the append-only file.
//!
//! ```text
//!   tokens ──► Engine::execute ──┬── SELECT / PING / AUTH / COMMAND
//!                                │      (connection scoped, handled here)
//!                                │
//!                                └──► Database[conn.db_index()].execute
//!                                         │
//!                                         ├──► Keyspace / SortedSet
//!                                         ├──► TimeWheel (expiration)
//!                                         └──► Aof (mutations)
//! ```
//!
//! A panic inside a handler is caught here and turned into an error reply,
//! so one bad command never takes the server down.

pub mod connection;
pub mod database;
pub mod value;

pub use connection::{Connection, ReplayConnection};
pub use database::Database;
pub use value::Value;

use crate::commands::{server, CommandError};
use crate::persistence::{Aof, AofConfig};
use crate::protocol::RespValue;
use crate::storage::timewheel::{TimeWheel, DEFAULT_INTERVAL, DEFAULT_SLOTS};
use crate::storage::DEFAULT_SHARDS;
use bytes::Bytes;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// Default number of logical databases.
pub const DEFAULT_DATABASES: usize = 16;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of logical databases addressable with `SELECT`
    pub databases: usize,
    /// Shards per keyspace, rounded up to a power of two
    pub shards: usize,
    /// Append-only file settings; `None` disables persistence
    pub aof: Option<AofConfig>,
    /// Timer wheel tick
    pub wheel_interval: Duration,
    /// Timer wheel size
    pub wheel_slots: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            databases: DEFAULT_DATABASES,
            shards: DEFAULT_SHARDS,
            aof: None,
            wheel_interval: DEFAULT_INTERVAL,
            wheel_slots: DEFAULT_SLOTS,
        }
    }
}

/// Errors that prevent the engine from starting.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to open append-only file {path}: {source}")]
    AofOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to replay append-only file {path}: {source}")]
    AofReplay {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct Engine {
    databases: Vec<Arc<Database>>,
    aof: Option<Arc<Aof>>,
    // Keeps the wheel task alive for as long as the engine.
    _timer: TimeWheel,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("databases", &self.databases.len())
            .field("aof", &self.aof)
            .finish()
    }
}

impl Engine {
    /// Builds the databases, opens the append-only file and replays it.
    ///
    /// Must be called inside a tokio runtime: the timer wheel and the log
    /// writer are spawned as tasks.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        if config.databases == 0 {
            return Err(EngineError::InvalidConfig(
                "at least one database is required".into(),
            ));
        }

        let timer = TimeWheel::start(config.wheel_interval, config.wheel_slots);

        let aof = match &config.aof {
            Some(aof_config) => {
                let aof = Aof::open(aof_config).map_err(|source| EngineError::AofOpen {
                    path: aof_config.path.clone(),
                    source,
                })?;
                Some(Arc::new(aof))
            }
            None => None,
        };

        let databases = (0..config.databases)
            .map(|index| Database::new(index, config.shards, timer.clone(), aof.clone()))
            .collect();

        let engine = Self {
            databases,
            aof,
            _timer: timer,
        };

        if let Some(aof) = &engine.aof {
            let stats = aof.load(&engine).map_err(|source| EngineError::AofReplay {
                path: aof.path().to_path_buf(),
                source,
            })?;
            info!(
                applied = stats.applied,
                failed = stats.failed,
                "Append-only file loaded"
            );
        }

        debug!(databases = engine.databases.len(), shards = config.shards, "Engine ready");
        Ok(engine)
    }

    /// Executes one command on behalf of `conn`.
    pub fn execute(&self, conn: &mut dyn Connection, tokens: Vec<Bytes>) -> RespValue {
        if tokens.is_empty() {
            return RespValue::error("ERR empty command");
        }
        recover(|| self.dispatch(conn, &tokens))
    }

    fn dispatch(&self, conn: &mut dyn Connection, tokens: &[Bytes]) -> RespValue {
        let name = String::from_utf8_lossy(&tokens[0]).to_ascii_lowercase();
        let args = &tokens[1..];

        let result = match name.as_str() {
            "select" => server::select(conn, self.databases.len(), args),
            "ping" => server::ping(args),
            "auth" => server::auth(args),
            "command" => Ok(server::command_names()),
            _ => match self.databases.get(conn.db_index()) {
                Some(db) => return db.execute(tokens),
                None => Err(CommandError::DbIndexOutOfRange),
            },
        };

        result.unwrap_or_else(RespValue::from)
    }

    pub fn database_count(&self) -> usize {
        self.databases.len()
    }

    pub fn database(&self, index: usize) -> Option<&Arc<Database>> {
        self.databases.get(index)
    }

    pub fn aof(&self) -> Option<&Arc<Aof>> {
        self.aof.as_ref()
    }

    /// Waits until every logged mutation so far is on disk.
    pub async fn sync(&self) {
        if let Some(aof) = &self.aof {
            aof.sync().await;
        }
    }
}

/// Runs `f`, turning a panic into an error reply.
pub fn recover<F>(f: F) -> RespValue
where
    F: FnOnce() -> RespValue,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(reply) => reply,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "Command handler panicked");
            RespValue::error(format!("ERR internal error: {}", message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
