//! Storage Module
//!
//! In-memory data structures the databases are built from:
//!
//! - [`Keyspace`]: sharded, thread-safe hash map with an atomic key count
//! - [`SkipList`] and [`SortedSet`]: rank-aware ordered index for sorted sets
//! - [`TimeWheel`]: slotted timer that drives eager key expiration
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Keyspace<V>                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ delete on fire
//!              ┌─────────────┴─────────────┐
//!              │        TimeWheel          │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use tidekv::storage::{Keyspace, SortedSet};
//!
//! let keys: Keyspace<SortedSet> = Keyspace::new();
//! keys.update("board", |slot| {
//!     let set = slot.get_or_insert_with(SortedSet::new);
//!     set.add("ariz", 10.0);
//!     set.add("kai", 7.5);
//! });
//!
//! let rank = keys.read("board", |set| set.and_then(|s| s.rank_of("ariz", false)));
//! assert_eq!(rank, Some(1));
//! assert_eq!(keys.count(), 1);
//! ```

pub mod keyspace;
pub mod skiplist;
pub mod sorted_set;
pub mod timewheel;

pub use keyspace::{Keyspace, PutOutcome, DEFAULT_SHARDS};
pub use skiplist::SkipList;
pub use sorted_set::SortedSet;
pub use timewheel::TimeWheel;
