//! Persistence Module
//!
//! Durability for the in-memory databases via an append-only file of
//! wire-format commands. See [`aof`] for the write path and replay rules.

pub mod aof;

pub use aof::{Aof, AofConfig, FsyncPolicy, ReplayStats, DEFAULT_AOF_PATH};
