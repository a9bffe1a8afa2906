//! One logical database: a keyspace of values plus its expiration records.
//!
//! Expiration is tracked in a second keyspace (`key -> deadline`) and
//! enforced two ways. Every access checks the deadline first and evicts the
//! key if it has passed (lazy). The timer wheel also fires a callback at the
//! deadline that performs the same check (eager). Both are idempotent.
//!
//! Whenever both keyspaces are touched under lock, the value keyspace is
//! locked first. The timer callback evicts under the value shard's write
//! lock, so a concurrent `SET` either lands before the eviction (and is
//! evicted along with its key) or after it, never in between.

use crate::commands::{self, CommandError};
use crate::engine::Value;
use crate::persistence::Aof;
use crate::protocol::RespValue;
use crate::storage::{Keyspace, TimeWheel};
use bytes::Bytes;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

pub struct Database {
    index: usize,
    data: Keyspace<Value>,
    expires: Keyspace<Instant>,
    timer: TimeWheel,
    aof: Option<Arc<Aof>>,
    this: Weak<Database>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("index", &self.index)
            .field("keys", &self.data.count())
            .field("volatile", &self.expires.count())
            .finish()
    }
}

impl Database {
    pub fn new(index: usize, shards: usize, timer: TimeWheel, aof: Option<Arc<Aof>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            index,
            data: Keyspace::with_shards(shards),
            expires: Keyspace::with_shards(shards),
            timer,
            aof,
            this: this.clone(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Looks up the handler for `tokens[0]`, checks arity and runs it.
    pub fn execute(&self, tokens: &[Bytes]) -> RespValue {
        let Some(name) = tokens.first() else {
            return RespValue::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(name);

        let result = match commands::lookup(&name.to_ascii_lowercase()) {
            Some(command) if command.accepts(tokens.len()) => (command.handler)(self, &tokens[1..]),
            Some(command) => Err(CommandError::WrongArity(command.name.to_string())),
            None => Err(CommandError::UnknownCommand(name.into_owned())),
        };

        result.unwrap_or_else(|e| {
            trace!(db = self.index, error = %e, "Command rejected");
            e.into()
        })
    }

    /// Number of keys, including expired keys not yet evicted.
    pub fn len(&self) -> usize {
        self.data.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` against the live value under `key`.
    pub fn read<R>(&self, key: &str, f: impl FnOnce(Option<&Value>) -> R) -> R {
        self.expire_if_due(key);
        self.data.read(key, f)
    }

    /// Read-modify-write on the live value under `key`, atomic with respect
    /// to other commands on the same key. Leaving the slot empty deletes the
    /// key together with its expiration record.
    pub fn update<R>(&self, key: &str, f: impl FnOnce(&mut Option<Value>) -> R) -> R {
        self.expire_if_due(key);

        let mut dropped_ttl = false;
        let result = self.data.update(key, |slot| {
            let existed = slot.is_some();
            let result = f(slot);
            if existed && slot.is_none() {
                dropped_ttl = self.expires.delete(key);
            }
            result
        });

        if dropped_ttl {
            self.timer.cancel(self.timer_key(key));
        }
        result
    }

    /// Stores `value`, replacing whatever was there. The key expires at
    /// `deadline` if one is given and never expires otherwise.
    pub fn set(&self, key: &str, value: Value, deadline: Option<Instant>) {
        let dropped_ttl = self.data.update(key, |slot| {
            *slot = Some(value);
            match deadline {
                Some(at) => {
                    self.expires.put(key, at);
                    false
                }
                None => self.expires.delete(key),
            }
        });

        match deadline {
            Some(at) => self.schedule(key, at),
            None if dropped_ttl => self.timer.cancel(self.timer_key(key)),
            None => {}
        }
    }

    /// Deletes `key`. Returns whether a live key was removed.
    pub fn remove(&self, key: &str) -> bool {
        self.update(key, |slot| slot.take().is_some())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.expire_if_due(key);
        self.data.contains(key)
    }

    /// Sets the expiration deadline of an existing key.
    pub fn expire_at(&self, key: &str, deadline: Instant) -> bool {
        self.expire_if_due(key);

        let exists = self.data.read(key, |value| {
            if value.is_some() {
                self.expires.put(key, deadline);
            }
            value.is_some()
        });

        if exists {
            self.schedule(key, deadline);
        }
        exists
    }

    /// Drops the expiration deadline of `key`. Returns whether it had one.
    pub fn persist(&self, key: &str) -> bool {
        self.expire_if_due(key);

        if self.expires.delete(key) {
            self.timer.cancel(self.timer_key(key));
            true
        } else {
            false
        }
    }

    /// Remaining time to live: `None` if the key is missing, `Some(None)` if
    /// it never expires.
    pub fn ttl(&self, key: &str) -> Option<Option<Duration>> {
        self.expire_if_due(key);

        self.data.read(key, |value| {
            value.map(|_| {
                self.expires
                    .get(key)
                    .map(|at| at.saturating_duration_since(Instant::now()))
            })
        })
    }

    /// Removes every key and expiration record.
    ///
    /// Each expiration shard is cleared while its value shard is still
    /// locked, so a concurrent `SET EX` is either wiped whole or kept whole.
    /// Pending timers are left to fire; they find no record and do nothing.
    pub fn flush(&self) {
        self.data.clear_each(|shard| self.expires.clear_shard(shard));
        debug!(db = self.index, "Database flushed");
    }

    /// Logs a mutating command to the append-only file, if there is one.
    pub fn append_aof(&self, command: Vec<Bytes>) {
        if let Some(aof) = &self.aof {
            aof.append(self.index, command);
        }
    }

    /// Evicts `key` if its deadline has passed. Returns whether it did.
    pub fn expire_if_due(&self, key: &str) -> bool {
        let due = self
            .expires
            .read(key, |at| at.is_some_and(|at| *at <= Instant::now()));
        if !due {
            return false;
        }

        let now = Instant::now();
        let evicted = self.data.update(key, |slot| {
            if self.expires.remove_if(key, |at| *at <= now) {
                *slot = None;
                true
            } else {
                false
            }
        });

        if evicted {
            self.timer.cancel(self.timer_key(key));
            trace!(db = self.index, key = %key, "Key expired");
        }
        evicted
    }

    fn timer_key(&self, key: &str) -> String {
        format!("{}:{}", self.index, key)
    }

    /// Arms the timer for `key`, replacing any pending one.
    fn schedule(&self, key: &str, deadline: Instant) {
        let timer_key = self.timer_key(key);
        let db = self.this.clone();
        let key = key.to_owned();

        self.timer.cancel(timer_key.clone());
        self.timer.add_at(timer_key, deadline, move || {
            if let Some(db) = db.upgrade() {
                db.on_timer(&key);
            }
        });
    }

    fn on_timer(&self, key: &str) {
        match self.expires.get(key) {
            Some(at) if at > Instant::now() => self.schedule(key, at),
            Some(_) => {
                self.expire_if_due(key);
            }
            None => {}
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch at which `deadline` falls.
pub fn unix_millis_at(deadline: Instant) -> i64 {
    let now = Instant::now();
    let wall = SystemTime::now();
    let at = if deadline >= now {
        wall.checked_add(deadline - now)
    } else {
        wall.checked_sub(now - deadline)
    };
    at.unwrap_or(wall)
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Instant corresponding to a wall-clock Unix time in milliseconds.
/// Times in the past map to now.
pub fn instant_at_unix_millis(ms: i64) -> Instant {
    let now = Instant::now();
    let target = UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64);
    match target.duration_since(SystemTime::now()) {
        Ok(ahead) => now.checked_add(ahead).unwrap_or(now),
        Err(_) => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SortedSet;

    fn database() -> Arc<Database> {
        let timer = TimeWheel::start(Duration::from_millis(10), 64);
        Database::new(0, 4, timer, None)
    }

    fn string(value: &'static str) -> Value {
        Value::String(Bytes::from_static(value.as_bytes()))
    }

    fn read_string(db: &Database, key: &str) -> Option<Bytes> {
        db.read(key, |v| v.and_then(Value::as_string).cloned())
    }

    #[tokio::test]
    async fn test_set_read_remove() {
        let db = database();
        db.set("k", string("v"), None);

        assert_eq!(read_string(&db, "k"), Some(Bytes::from("v")));
        assert!(db.contains("k"));
        assert_eq!(db.len(), 1);

        assert!(db.remove("k"));
        assert!(!db.remove("k"));
        assert!(db.is_empty());
    }

    #[tokio::test]
    async fn test_flush_racing_set_ex_keeps_ttls_paired() {
        let db = database();
        let deadline = Instant::now() + Duration::from_secs(60);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..2_000 {
                    db.set(&format!("k{}", i), string("v"), Some(deadline));
                }
            });
            for _ in 0..200 {
                db.flush();
            }
        });

        for i in 0..2_000 {
            let key = format!("k{}", i);
            if db.expires.contains(&key) {
                assert!(db.data.contains(&key), "{} kept a deadline without a value", key);
            }
        }
        assert_eq!(db.expires.count(), db.data.count());
    }

    #[tokio::test]
    async fn test_past_deadline_is_absent_on_next_read() {
        let db = database();
        db.set("k", string("v"), None);
        assert!(db.expire_at("k", Instant::now()));

        assert_eq!(read_string(&db, "k"), None);
        assert_eq!(db.ttl("k"), None);
        assert_eq!(db.len(), 0);
    }

    #[tokio::test]
    async fn test_timer_evicts_without_access() {
        let db = database();
        db.set("k", string("v"), Some(Instant::now() + Duration::from_millis(30)));
        assert_eq!(db.len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(db.len(), 0);
    }

    #[tokio::test]
    async fn test_set_without_deadline_clears_ttl() {
        let db = database();
        db.set("k", string("v"), Some(Instant::now() + Duration::from_millis(30)));
        db.set("k", string("w"), None);
        assert_eq!(db.ttl("k"), Some(None));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(read_string(&db, "k"), Some(Bytes::from("w")));
    }

    #[tokio::test]
    async fn test_persist_and_reschedule() {
        let db = database();
        db.set("k", string("v"), None);

        assert!(!db.persist("k"));
        db.expire_at("k", Instant::now() + Duration::from_millis(30));
        assert!(db.persist("k"));

        db.expire_at("k", Instant::now() + Duration::from_secs(60));
        let ttl = db.ttl("k").flatten().unwrap();
        assert!(ttl > Duration::from_secs(59));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(db.contains("k"));
    }

    #[tokio::test]
    async fn test_expire_at_missing_key() {
        let db = database();
        assert!(!db.expire_at("nope", Instant::now()));
        assert!(!db.persist("nope"));
        assert_eq!(db.ttl("nope"), None);
    }

    #[tokio::test]
    async fn test_update_emptying_slot_drops_ttl() {
        let db = database();
        let mut set = SortedSet::new();
        set.add("a", 1.0);
        db.set("z", set.into(), Some(Instant::now() + Duration::from_secs(60)));

        db.update("z", |slot| *slot = None);
        assert_eq!(db.expires.count(), 0);
        assert!(!db.contains("z"));
    }

    #[tokio::test]
    async fn test_flush() {
        let db = database();
        db.set("a", string("1"), Some(Instant::now() + Duration::from_millis(20)));
        db.set("b", string("2"), None);

        db.flush();
        assert!(db.is_empty());

        db.set("a", string("3"), None);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(read_string(&db, "a"), Some(Bytes::from("3")));
    }

    #[test]
    fn test_unix_millis_conversion() {
        let later = Instant::now() + Duration::from_secs(100);
        let ms = unix_millis_at(later);
        let back = instant_at_unix_millis(ms);
        let diff = if back > later { back - later } else { later - back };
        assert!(diff < Duration::from_millis(50));

        let past = instant_at_unix_millis(1);
        assert!(past <= Instant::now());
    }
}
