//! Sorted set value: a member→score map kept in lockstep with a skip list.
//!
//! The map answers membership and score lookups in O(1); the skip list
//! answers everything positional. Every mutation touches both, so they
//! always agree on which members exist and what their scores are.
//!
//! The set carries no lock of its own. It is only ever reached through the
//! keyspace shard that owns it.

use crate::storage::skiplist::SkipList;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    scores: HashMap<String, f64>,
    list: SkipList,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `member` or moves it to a new score.
    ///
    /// Returns `false` only when the member already had exactly this score.
    pub fn add(&mut self, member: impl Into<String>, score: f64) -> bool {
        let member = member.into();

        match self.scores.get_mut(&member) {
            Some(current) if *current == score => false,
            Some(current) => {
                let old = *current;
                *current = score;
                self.list.remove(&member, old);
                self.list.insert(member, score);
                true
            }
            None => {
                self.scores.insert(member.clone(), score);
                self.list.insert(member, score);
                true
            }
        }
    }

    pub fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.list.remove(member, score);
                true
            }
            None => false,
        }
    }

    pub fn score_of(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn contains(&self, member: &str) -> bool {
        self.scores.contains_key(member)
    }

    /// Zero-based position of `member`, counted from the lowest score or,
    /// with `descending`, from the highest.
    pub fn rank_of(&self, member: &str, descending: bool) -> Option<usize> {
        let score = self.scores.get(member)?;
        let rank = self.list.rank(member, *score)?;
        Some(if descending {
            self.len() - rank
        } else {
            rank - 1
        })
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Members between zero-based ranks `start` and `stop` inclusive.
    ///
    /// Negative indices count back from the end (`-1` is the last member).
    /// Out-of-range bounds are clamped; an empty range yields nothing.
    pub fn range_by_rank(&self, start: i64, stop: i64, reverse: bool) -> Vec<(&str, f64)> {
        let len = self.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

        if len == 0 || start > stop || start >= len {
            return Vec::new();
        }

        self.list.range(start as usize, stop as usize, reverse)
    }

    /// All members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.list.iter()
    }
}
