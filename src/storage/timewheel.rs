//! Slotted timer wheel driving key expiration.
//!
//! ## Design
//!
//! A ring of `slots` buckets is advanced one bucket per `interval`. A task
//! due in `d` is `t = ceil(d / interval)` ticks away; it lands in bucket
//! `(cursor + t) % slots` with a lap count of `t / slots`. Each visit of the
//! cursor either fires the task (lap 0) or decrements its lap count.
//!
//! All wheel state lives in one tokio task. [`TimeWheel`] is only a handle
//! that posts `Add`/`Cancel` messages over an unbounded channel, so callers
//! never wait on a lock and requests are applied in the order they were
//! sent. Callbacks are spawned as their own tasks, so a slow one never
//! delays the cursor.
//!
//! Keys are unique while pending: adding a key that is already scheduled is
//! ignored. Cancel first to reschedule.
//!
//! The wheel task stops when the handle is dropped.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// One-shot callback run when a task fires.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Default tick interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of slots; with the default interval this is an hour per lap.
pub const DEFAULT_SLOTS: usize = 3600;

enum Message {
    Add {
        key: String,
        delay: Duration,
        callback: Callback,
    },
    Cancel {
        key: String,
    },
}

struct Task {
    circle: usize,
    callback: Callback,
}

/// Handle to a running timer wheel.
#[derive(Debug, Clone)]
pub struct TimeWheel {
    tx: mpsc::UnboundedSender<Message>,
    interval: Duration,
}

impl TimeWheel {
    /// Spawns the wheel task. Must be called inside a tokio runtime.
    pub fn start(interval: Duration, slots: usize) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(Wheel::new(interval, slots.max(1)).run(rx));
        debug!(interval_ms = interval.as_millis() as u64, slots, "Timer wheel started");

        Self { tx, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Schedules `callback` to run after `delay` under `key`.
    pub fn add<F>(&self, key: impl Into<String>, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Message::Add {
            key: key.into(),
            delay,
            callback: Box::new(callback),
        });
    }

    /// Schedules `callback` at `deadline`. A deadline in the past fires on
    /// the next tick.
    pub fn add_at<F>(&self, key: impl Into<String>, deadline: Instant, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = deadline.saturating_duration_since(Instant::now());
        self.add(key, delay, callback);
    }

    /// Drops the pending task under `key`, if any.
    pub fn cancel(&self, key: impl Into<String>) {
        self.send(Message::Cancel { key: key.into() });
    }

    fn send(&self, message: Message) {
        if self.tx.send(message).is_err() {
            // Only happens once the runtime is shutting down.
            trace!("Timer wheel is gone, request dropped");
        }
    }
}

struct Wheel {
    interval: Duration,
    slots: Vec<HashMap<String, Task>>,
    index: HashMap<String, usize>,
    cursor: usize,
}

impl Wheel {
    fn new(interval: Duration, slots: usize) -> Self {
        Self {
            interval,
            slots: (0..slots).map(|_| HashMap::new()).collect(),
            index: HashMap::new(),
            cursor: 0,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                message = rx.recv() => match message {
                    Some(Message::Add { key, delay, callback }) => self.add(key, delay, callback),
                    Some(Message::Cancel { key }) => self.cancel(&key),
                    None => {
                        debug!(pending = self.index.len(), "Timer wheel stopped");
                        return;
                    }
                },
            }
        }
    }

    /// Bucket and lap count for a task due after `delay`. Partial ticks
    /// round up so a task never fires before its delay has elapsed.
    fn position(&self, delay: Duration) -> (usize, usize) {
        let ticks = delay.as_nanos().div_ceil(self.interval.as_nanos()) as usize;
        let n = self.slots.len();
        ((self.cursor + ticks) % n, ticks / n)
    }

    fn add(&mut self, key: String, delay: Duration, callback: Callback) {
        if self.index.contains_key(&key) {
            trace!(key = %key, "Timer already scheduled, ignoring");
            return;
        }

        let (slot, circle) = self.position(delay);
        self.slots[slot].insert(key.clone(), Task { circle, callback });
        self.index.insert(key, slot);
    }

    fn cancel(&mut self, key: &str) {
        if let Some(slot) = self.index.remove(key) {
            self.slots[slot].remove(key);
        }
    }

    /// Fires the bucket under the cursor, then advances it.
    fn tick(&mut self) {
        let cursor = self.cursor;
        self.cursor = (cursor + 1) % self.slots.len();

        let slot = &mut self.slots[cursor];
        let mut due = Vec::new();
        for (key, task) in slot.iter_mut() {
            if task.circle > 0 {
                task.circle -= 1;
            } else {
                due.push(key.clone());
            }
        }

        if due.is_empty() {
            return;
        }

        trace!(fired = due.len(), "Timer wheel firing");
        for key in due {
            if let Some(task) = slot.remove(&key) {
                self.index.remove(&key);
                tokio::spawn(async move { (task.callback)() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const TICK: Duration = Duration::from_millis(10);

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let count = Arc::new(AtomicUsize::new(0));
        let make = {
            let count = Arc::clone(&count);
            move || -> Box<dyn FnOnce() + Send> {
                let count = Arc::clone(&count);
                Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }
        };
        (count, make)
    }

    #[test]
    fn test_position_wraps_into_laps() {
        let wheel = Wheel::new(Duration::from_secs(1), 10);
        assert_eq!(wheel.position(Duration::ZERO), (0, 0));
        assert_eq!(wheel.position(Duration::from_secs(3)), (3, 0));
        assert_eq!(wheel.position(Duration::from_secs(10)), (0, 1));
        assert_eq!(wheel.position(Duration::from_secs(25)), (5, 2));
        assert_eq!(wheel.position(Duration::from_millis(2500)), (3, 0));
    }

    #[tokio::test]
    async fn test_task_fires_after_delay() {
        let wheel = TimeWheel::start(TICK, 16);
        let (count, make) = counter();

        wheel.add("k", Duration::from_millis(30), make());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delay_longer_than_one_lap() {
        // 4 slots * 10ms = 40ms per lap; 100ms needs two laps.
        let wheel = TimeWheel::start(TICK, 4);
        let (count, make) = counter();

        wheel.add("k", Duration::from_millis(100), make());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let wheel = TimeWheel::start(TICK, 16);
        let (count, make) = counter();

        wheel.add("k", Duration::from_millis(40), make());
        wheel.cancel("k");

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_key_is_ignored() {
        let wheel = TimeWheel::start(TICK, 16);
        let (count, make) = counter();

        wheel.add("k", Duration::from_millis(20), make());
        wheel.add("k", Duration::from_millis(20), make());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_then_add_reschedules() {
        let wheel = TimeWheel::start(TICK, 64);
        let (count, make) = counter();

        wheel.add("k", Duration::from_millis(20), make());
        wheel.cancel("k");
        wheel.add("k", Duration::from_millis(300), make());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_add_at_past_deadline_fires_promptly() {
        let wheel = TimeWheel::start(TICK, 16);
        let (count, make) = counter();

        let past = Instant::now() - Duration::from_secs(5);
        wheel.add_at("k", past, make());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_key_can_be_reused_after_firing() {
        let wheel = TimeWheel::start(TICK, 16);
        let (count, make) = counter();

        wheel.add("k", Duration::ZERO, make());
        tokio::time::sleep(Duration::from_millis(60)).await;
        wheel.add("k", Duration::ZERO, make());
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
