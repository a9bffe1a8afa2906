//! Append-only file.
//!
//! Every mutating command is written to the log in wire format, so the file
//! can be replayed through the same decoder the network path uses. A
//! `SELECT <db>` record is inserted whenever a record targets a different
//! database than the one written before it.
//!
//! ## Write path
//!
//! ```text
//!  handlers ──append()──► unbounded queue ──► writer task ──► file
//!                                                  ▲
//!                                      1s ticker ──┘ (everysec)
//! ```
//!
//! With [`FsyncPolicy::Always`] the queue is bypassed: the record is written
//! and fsynced under the file lock before `append` returns. The other two
//! policies only hand the record to the writer task, which fsyncs once per
//! second (`everysec`) or leaves flushing to the OS (`no`).
//!
//! Write and fsync failures are logged and dropped; the in-memory state stays
//! authoritative.

use crate::engine::{Connection, Engine, ReplayConnection};
use crate::protocol::{FrameReader, ParseError, RespValue};
use bytes::Bytes;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Default log file name.
pub const DEFAULT_AOF_PATH: &str = "appendonly.aof";

const EVERYSEC_INTERVAL: Duration = Duration::from_secs(1);

/// When the log is forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsyncPolicy {
    /// Fsync every record before `append` returns.
    Always,
    /// Fsync once per second from the writer task.
    #[default]
    EverySec,
    /// Never fsync explicitly.
    No,
}

impl FromStr for FsyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(FsyncPolicy::Always),
            "everysec" => Ok(FsyncPolicy::EverySec),
            "no" => Ok(FsyncPolicy::No),
            other => Err(format!(
                "invalid fsync policy '{}' (expected always, everysec or no)",
                other
            )),
        }
    }
}

impl fmt::Display for FsyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FsyncPolicy::Always => "always",
            FsyncPolicy::EverySec => "everysec",
            FsyncPolicy::No => "no",
        })
    }
}

/// Configuration for the append-only file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AofConfig {
    pub path: PathBuf,
    pub fsync: FsyncPolicy,
}

impl Default for AofConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_AOF_PATH),
            fsync: FsyncPolicy::default(),
        }
    }
}

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records executed without an error reply
    pub applied: usize,
    /// Records that failed to decode or replied with an error
    pub failed: usize,
}

enum AofMessage {
    Record { db: usize, command: Vec<Bytes> },
    Flush(oneshot::Sender<()>),
}

struct AofFile {
    file: File,
    last_db: usize,
}

impl AofFile {
    fn write_record(&mut self, db: usize, command: Vec<Bytes>) -> io::Result<()> {
        let mut buf = Vec::new();
        if db != self.last_db {
            RespValue::command([Bytes::from_static(b"SELECT"), Bytes::from(db.to_string())])
                .serialize_into(&mut buf);
        }
        RespValue::command(command).serialize_into(&mut buf);

        self.file.write_all(&buf)?;
        self.last_db = db;
        trace!(db, bytes = buf.len(), "AOF record written");
        Ok(())
    }

    fn sync(&mut self) {
        if let Err(e) = self.file.sync_data() {
            warn!(error = %e, "AOF fsync failed");
        }
    }
}

type SharedFile = Arc<Mutex<AofFile>>;

fn lock(file: &SharedFile) -> std::sync::MutexGuard<'_, AofFile> {
    file.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the append-only file and its writer task.
pub struct Aof {
    path: PathBuf,
    fsync: FsyncPolicy,
    file: SharedFile,
    tx: mpsc::UnboundedSender<AofMessage>,
    loading: AtomicBool,
}

impl fmt::Debug for Aof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aof")
            .field("path", &self.path)
            .field("fsync", &self.fsync)
            .finish()
    }
}

impl Aof {
    /// Opens (or creates) the log for appending and starts the writer task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(config: &AofConfig) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;

        let file = Arc::new(Mutex::new(AofFile { file, last_db: 0 }));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(Arc::clone(&file), config.fsync, rx));

        info!(path = %config.path.display(), fsync = %config.fsync, "Append-only file opened");

        Ok(Self {
            path: config.path.clone(),
            fsync: config.fsync,
            file,
            tx,
            loading: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fsync_policy(&self) -> FsyncPolicy {
        self.fsync
    }

    /// Records `command` as executed against database `db`.
    ///
    /// Ignored while the log is being replayed.
    pub fn append(&self, db: usize, command: Vec<Bytes>) {
        if self.loading.load(Ordering::Acquire) {
            return;
        }

        match self.fsync {
            FsyncPolicy::Always => {
                let mut file = lock(&self.file);
                match file.write_record(db, command) {
                    Ok(()) => file.sync(),
                    Err(e) => warn!(error = %e, "AOF write failed"),
                }
            }
            FsyncPolicy::EverySec | FsyncPolicy::No => {
                if self.tx.send(AofMessage::Record { db, command }).is_err() {
                    warn!("AOF writer is gone, record dropped");
                }
            }
        }
    }

    /// Waits until everything appended before this call is written and
    /// fsynced.
    pub async fn sync(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(AofMessage::Flush(done_tx)).is_err() {
            lock(&self.file).sync();
            return;
        }
        let _ = done_rx.await;
    }

    /// Replays the log into `engine`.
    ///
    /// Records are executed in order through [`Engine::execute`] on a
    /// connection that starts in database 0. Appends are suppressed for the
    /// duration. A record that fails to decode or execute is logged and
    /// skipped. A truncated final record ends the replay and is cut off the
    /// file, so later appends start on a frame boundary. A missing file is
    /// an empty log.
    pub fn load(&self, engine: &Engine) -> io::Result<ReplayStats> {
        let source = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ReplayStats::default()),
            Err(e) => return Err(e),
        };

        self.loading.store(true, Ordering::Release);
        let _guard = LoadingGuard(&self.loading);

        let mut conn = ReplayConnection::default();
        let mut stats = ReplayStats::default();

        let mut frames = FrameReader::new(BufReader::new(source));
        while let Some(frame) = frames.next() {
            let frame = match frame {
                Ok(frame) => frame,
                Err(ParseError::UnexpectedEof(partial)) => {
                    let valid = frames.offset();
                    warn!(partial, valid, "AOF ends with a truncated record, cutting it off");
                    lock(&self.file).file.set_len(valid)?;
                    break;
                }
                Err(ParseError::Io(e)) => {
                    error!(error = %e, "AOF read failed, replay stopped");
                    stats.failed += 1;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable AOF record");
                    stats.failed += 1;
                    continue;
                }
            };

            let tokens = match frame.into_command() {
                Some(tokens) if !tokens.is_empty() => tokens,
                _ => {
                    warn!("Skipping AOF record that is not a command");
                    stats.failed += 1;
                    continue;
                }
            };

            let reply = engine.execute(&mut conn, tokens);
            if let RespValue::Error(message) = &reply {
                warn!(error = %message, "AOF record failed on replay");
                stats.failed += 1;
            } else {
                stats.applied += 1;
            }
        }

        lock(&self.file).last_db = conn.db_index();
        debug!(
            applied = stats.applied,
            failed = stats.failed,
            last_db = conn.db_index(),
            "AOF replay finished"
        );
        Ok(stats)
    }
}

/// Clears the loading flag when replay ends, however it ends.
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single consumer of the append queue.
async fn run_writer(
    file: SharedFile,
    fsync: FsyncPolicy,
    mut rx: mpsc::UnboundedReceiver<AofMessage>,
) {
    let mut ticker = tokio::time::interval(EVERYSEC_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(AofMessage::Record { db, command }) => {
                    if let Err(e) = lock(&file).write_record(db, command) {
                        warn!(error = %e, "AOF write failed");
                    }
                }
                Some(AofMessage::Flush(done)) => {
                    lock(&file).sync();
                    let _ = done.send(());
                }
                None => {
                    lock(&file).sync();
                    debug!("AOF writer stopped");
                    return;
                }
            },
            _ = ticker.tick(), if fsync == FsyncPolicy::EverySec => {
                lock(&file).sync();
            }
        }
    }
}
