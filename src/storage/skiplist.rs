//! Rank-aware skip list backing the sorted set.
//!
//! Nodes live in an arena (`Vec<Node>`) and refer to each other by index,
//! so the list has a single owner and no reference cycles. Slot 0 is the
//! header, a sentinel carrying `MAX_LEVEL` levels that never holds data.
//!
//! Every forward pointer records its *span*, the number of level-0 steps
//! it covers. Summing the spans walked on the way down to a node yields its
//! 1-based rank, and the same bookkeeping lets us jump to the node at a
//! given rank without a linear scan.
//!
//! Ordering is by `(score ascending, member ascending)`.
//!
//! For a pointer with no successor the span holds `len - rank(owner)`;
//! keeping that true on every insert and removal is what makes the span
//! arithmetic below free of underflow.

use rand::Rng;
use std::cmp::Ordering;

/// Tallest node the list will build.
pub const MAX_LEVEL: usize = 16;

const HEAD: usize = 0;

#[derive(Debug, Clone, Copy, Default)]
struct Level {
    forward: Option<usize>,
    span: usize,
}

#[derive(Debug, Clone)]
struct Node {
    member: String,
    score: f64,
    backward: Option<usize>,
    levels: Vec<Level>,
}

impl Node {
    fn new(member: String, score: f64, height: usize) -> Self {
        Self {
            member,
            score,
            backward: None,
            levels: vec![Level::default(); height],
        }
    }

    /// Orders this node against the `(score, member)` key.
    #[inline]
    fn cmp_key(&self, score: f64, member: &str) -> Ordering {
        compare(self.score, &self.member, score, member)
    }
}

/// Total order used by the list. Scores are never NaN.
#[inline]
pub fn compare(score_a: f64, member_a: &str, score_b: f64, member_b: &str) -> Ordering {
    score_a
        .partial_cmp(&score_b)
        .unwrap_or(Ordering::Equal)
        .then_with(|| member_a.cmp(member_b))
}

/// Picks a node height: one level, plus one more with probability 1/2 each
/// time, up to [`MAX_LEVEL`].
fn random_level<R: Rng + ?Sized>(rng: &mut R) -> usize {
    let mut level = 1;
    while level < MAX_LEVEL && rng.gen_bool(0.5) {
        level += 1;
    }
    level
}

#[derive(Debug, Clone)]
pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    tail: Option<usize>,
    len: usize,
    level: usize,
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl SkipList {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(String::new(), 0.0, MAX_LEVEL)],
            free: Vec::new(),
            tail: None,
            len: 0,
            level: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current height of the tallest node.
    pub fn height(&self) -> usize {
        self.level
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        let node = &mut self.nodes[idx];
        node.member = String::new();
        node.levels = Vec::new();
        node.backward = None;
        self.free.push(idx);
    }

    /// Inserts a pair that must not already be present.
    pub fn insert(&mut self, member: String, score: f64) {
        let height = random_level(&mut rand::thread_rng());
        self.insert_with_height(member, score, height);
    }

    fn insert_with_height(&mut self, member: String, score: f64, height: usize) {
        let mut update = [HEAD; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];

        let mut x = HEAD;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while let Some(next) = self.nodes[x].levels[i].forward {
                if self.nodes[next].cmp_key(score, &member) != Ordering::Less {
                    break;
                }
                rank[i] += self.nodes[x].levels[i].span;
                x = next;
            }
            update[i] = x;
        }

        if height > self.level {
            for i in self.level..height {
                rank[i] = 0;
                update[i] = HEAD;
                self.nodes[HEAD].levels[i] = Level {
                    forward: None,
                    span: self.len,
                };
            }
            self.level = height;
        }

        let idx = self.alloc(Node::new(member, score, height));

        for i in 0..height {
            let prev = update[i];
            let prev_level = self.nodes[prev].levels[i];
            let passed = rank[0] - rank[i];

            self.nodes[idx].levels[i] = Level {
                forward: prev_level.forward,
                span: prev_level.span - passed,
            };
            self.nodes[prev].levels[i] = Level {
                forward: Some(idx),
                span: passed + 1,
            };
        }

        // Taller pointers that pass over the new node now cover one more.
        for i in height..self.level {
            self.nodes[update[i]].levels[i].span += 1;
        }

        self.nodes[idx].backward = (update[0] != HEAD).then_some(update[0]);
        match self.nodes[idx].levels[0].forward {
            Some(next) => self.nodes[next].backward = Some(idx),
            None => self.tail = Some(idx),
        }

        self.len += 1;
    }

    /// Removes the exact `(member, score)` pair. Returns whether it was found.
    pub fn remove(&mut self, member: &str, score: f64) -> bool {
        let mut update = [HEAD; MAX_LEVEL];

        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                if self.nodes[next].cmp_key(score, member) != Ordering::Less {
                    break;
                }
                x = next;
            }
            update[i] = x;
        }

        match self.nodes[x].levels[0].forward {
            Some(target) if self.nodes[target].cmp_key(score, member) == Ordering::Equal => {
                self.unlink(target, &update);
                true
            }
            _ => false,
        }
    }

    fn unlink(&mut self, idx: usize, update: &[usize; MAX_LEVEL]) {
        for i in 0..self.level {
            let prev = update[i];
            if self.nodes[prev].levels[i].forward == Some(idx) {
                let removed = self.nodes[idx].levels[i];
                let prev_level = &mut self.nodes[prev].levels[i];
                prev_level.span = prev_level.span + removed.span - 1;
                prev_level.forward = removed.forward;
            } else {
                self.nodes[prev].levels[i].span -= 1;
            }
        }

        let backward = self.nodes[idx].backward;
        match self.nodes[idx].levels[0].forward {
            Some(next) => self.nodes[next].backward = backward,
            None => self.tail = backward,
        }

        while self.level > 1 && self.nodes[HEAD].levels[self.level - 1].forward.is_none() {
            self.level -= 1;
        }

        self.len -= 1;
        self.release(idx);
    }

    /// 1-based rank of the pair, or `None` if it is not in the list.
    ///
    /// The rank is the sum of the spans walked to reach the node; each span
    /// is counted exactly once.
    pub fn rank(&self, member: &str, score: f64) -> Option<usize> {
        let mut traversed = 0;
        let mut x = HEAD;

        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                if self.nodes[next].cmp_key(score, member) == Ordering::Greater {
                    break;
                }
                traversed += self.nodes[x].levels[i].span;
                x = next;
            }
            if x != HEAD && self.nodes[x].cmp_key(score, member) == Ordering::Equal {
                return Some(traversed);
            }
        }

        None
    }

    /// Arena index of the node at 1-based `rank`.
    fn node_at(&self, rank: usize) -> Option<usize> {
        if rank == 0 || rank > self.len {
            return None;
        }

        let mut traversed = 0;
        let mut x = HEAD;

        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                let span = self.nodes[x].levels[i].span;
                if traversed + span > rank {
                    break;
                }
                traversed += span;
                x = next;
            }
            if traversed == rank {
                return Some(x);
            }
        }

        None
    }

    /// Pair at 1-based `rank`.
    pub fn get_by_rank(&self, rank: usize) -> Option<(&str, f64)> {
        self.node_at(rank).map(|idx| {
            let node = &self.nodes[idx];
            (node.member.as_str(), node.score)
        })
    }

    /// Pairs with 0-based ranks `start..=stop`, ascending or descending.
    /// Both bounds must already be clamped to the list.
    pub fn range(&self, start: usize, stop: usize, reverse: bool) -> Vec<(&str, f64)> {
        if start > stop || stop >= self.len {
            return Vec::new();
        }

        let first_rank = if reverse { self.len - start } else { start + 1 };
        let mut cursor = self.node_at(first_rank);
        let mut out = Vec::with_capacity(stop - start + 1);

        while let Some(idx) = cursor {
            if out.len() == stop - start + 1 {
                break;
            }
            let node = &self.nodes[idx];
            out.push((node.member.as_str(), node.score));
            cursor = if reverse {
                node.backward
            } else {
                node.levels[0].forward
            };
        }

        out
    }

    /// Lowest-ranked pair.
    pub fn first(&self) -> Option<(&str, f64)> {
        self.nodes[HEAD].levels[0].forward.map(|idx| {
            let node = &self.nodes[idx];
            (node.member.as_str(), node.score)
        })
    }

    /// Highest-ranked pair.
    pub fn last(&self) -> Option<(&str, f64)> {
        self.tail.map(|idx| {
            let node = &self.nodes[idx];
            (node.member.as_str(), node.score)
        })
    }

    /// In-order iteration along level 0.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        let mut cursor = self.nodes[HEAD].levels[0].forward;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let node = &self.nodes[idx];
            cursor = node.levels[0].forward;
            Some((node.member.as_str(), node.score))
        })
    }

    /// Walks every level and checks order, spans and back links.
    #[cfg(test)]
    fn check_invariants(&self) {
        let ordered: Vec<usize> = {
            let mut v = Vec::new();
            let mut c = self.nodes[HEAD].levels[0].forward;
            while let Some(idx) = c {
                v.push(idx);
                c = self.nodes[idx].levels[0].forward;
            }
            v
        };
        assert_eq!(ordered.len(), self.len, "level 0 length");

        for pair in ordered.windows(2) {
            let (a, b) = (&self.nodes[pair[0]], &self.nodes[pair[1]]);
            assert_eq!(
                compare(a.score, &a.member, b.score, &b.member),
                Ordering::Less,
                "level 0 order"
            );
            assert_eq!(b.backward, Some(pair[0]), "backward link");
        }
        assert_eq!(self.tail, ordered.last().copied(), "tail");

        let rank_of = |idx: usize| -> usize {
            if idx == HEAD {
                0
            } else {
                ordered.iter().position(|&n| n == idx).unwrap() + 1
            }
        };

        for i in 0..self.level {
            let mut x = HEAD;
            loop {
                let level = self.nodes[x].levels[i];
                match level.forward {
                    Some(next) => {
                        assert_eq!(level.span, rank_of(next) - rank_of(x), "span at level {}", i);
                        x = next;
                    }
                    None => {
                        assert_eq!(level.span, self.len - rank_of(x), "tail span at level {}", i);
                        break;
                    }
                }
            }
        }

        if self.level > 1 {
            assert!(self.nodes[HEAD].levels[self.level - 1].forward.is_some());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model_sorted(model: &[(String, f64)]) -> Vec<(String, f64)> {
        let mut sorted = model.to_vec();
        sorted.sort_by(|a, b| compare(a.1, &a.0, b.1, &b.0));
        sorted
    }

    #[test]
    fn test_insert_orders_by_score_then_member() {
        let mut list = SkipList::new();
        list.insert("c".into(), 2.0);
        list.insert("b".into(), 1.0);
        list.insert("a".into(), 2.0);

        let items: Vec<_> = list.iter().collect();
        assert_eq!(items, vec![("b", 1.0), ("a", 2.0), ("c", 2.0)]);
        assert_eq!(list.first(), Some(("b", 1.0)));
        assert_eq!(list.last(), Some(("c", 2.0)));
        list.check_invariants();
    }

    #[test]
    fn test_rank_and_get_by_rank() {
        let mut list = SkipList::new();
        for (i, name) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            list.insert(name.to_string(), i as f64);
        }

        for (i, name) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            assert_eq!(list.rank(name, i as f64), Some(i + 1));
            assert_eq!(list.get_by_rank(i + 1), Some((*name, i as f64)));
        }
        assert_eq!(list.rank("a", 9.0), None);
        assert_eq!(list.rank("zz", 0.0), None);
        assert_eq!(list.get_by_rank(0), None);
        assert_eq!(list.get_by_rank(6), None);
    }

    #[test]
    fn test_tall_first_node_spans() {
        let mut list = SkipList::new();
        list.insert_with_height("m".into(), 5.0, MAX_LEVEL);
        list.insert_with_height("a".into(), 1.0, 1);
        list.insert_with_height("z".into(), 9.0, 3);
        list.check_invariants();

        assert_eq!(list.height(), MAX_LEVEL);
        assert_eq!(list.rank("a", 1.0), Some(1));
        assert_eq!(list.rank("m", 5.0), Some(2));
        assert_eq!(list.rank("z", 9.0), Some(3));
        assert_eq!(list.get_by_rank(3), Some(("z", 9.0)));
    }

    #[test]
    fn test_remove_fixes_links_and_shrinks_height() {
        let mut list = SkipList::new();
        list.insert_with_height("a".into(), 1.0, 1);
        list.insert_with_height("b".into(), 2.0, 4);
        list.insert_with_height("c".into(), 3.0, 2);
        assert_eq!(list.height(), 4);

        assert!(list.remove("b", 2.0));
        list.check_invariants();
        assert_eq!(list.height(), 2);
        assert_eq!(list.rank("c", 3.0), Some(2));

        assert!(!list.remove("b", 2.0));
        assert!(!list.remove("c", 4.0));

        assert!(list.remove("c", 3.0));
        assert_eq!(list.last(), Some(("a", 1.0)));
        assert!(list.remove("a", 1.0));
        assert!(list.is_empty());
        assert_eq!(list.height(), 1);
        assert_eq!(list.first(), None);
        assert_eq!(list.last(), None);
        list.check_invariants();
    }

    #[test]
    fn test_range_forward_and_reverse() {
        let mut list = SkipList::new();
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            list.insert(name.to_string(), i as f64);
        }

        assert_eq!(list.range(1, 2, false), vec![("b", 1.0), ("c", 2.0)]);
        assert_eq!(
            list.range(0, 3, true),
            vec![("d", 3.0), ("c", 2.0), ("b", 1.0), ("a", 0.0)]
        );
        assert_eq!(list.range(1, 1, true), vec![("c", 2.0)]);
        assert!(list.range(2, 1, false).is_empty());
        assert!(list.range(0, 4, false).is_empty());
    }

    #[test]
    fn test_arena_slots_are_reused() {
        let mut list = SkipList::new();
        for i in 0..10 {
            list.insert(format!("m{}", i), i as f64);
        }
        for i in 0..10 {
            assert!(list.remove(&format!("m{}", i), i as f64));
        }
        let arena = list.nodes.len();
        for i in 0..10 {
            list.insert(format!("n{}", i), i as f64);
        }
        assert_eq!(list.nodes.len(), arena);
        list.check_invariants();
    }

    #[test]
    fn test_random_operations_match_model() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for round in 0..20 {
            let mut list = SkipList::new();
            let mut model: Vec<(String, f64)> = Vec::new();

            for _ in 0..400 {
                let member = format!("m{}", rng.gen_range(0..60));
                let score = rng.gen_range(0..20) as f64;
                let present = model.iter().position(|(m, _)| *m == member);

                if rng.gen_bool(0.6) {
                    if present.is_none() {
                        list.insert_with_height(member.clone(), score, random_level(&mut rng));
                        model.push((member, score));
                    }
                } else {
                    match present {
                        Some(pos) => {
                            let (m, s) = model.swap_remove(pos);
                            assert!(list.remove(&m, s), "round {}", round);
                        }
                        None => assert!(!list.remove(&member, score)),
                    }
                }
            }

            list.check_invariants();

            let sorted = model_sorted(&model);
            assert_eq!(list.len(), sorted.len());
            for (i, (member, score)) in sorted.iter().enumerate() {
                assert_eq!(list.rank(member, *score), Some(i + 1));
                assert_eq!(list.get_by_rank(i + 1), Some((member.as_str(), *score)));
            }

            let listed: Vec<(String, f64)> = list.iter().map(|(m, s)| (m.to_string(), s)).collect();
            assert_eq!(listed, sorted);
        }
    }
}
