// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{FixedKey, FixedValue},
    value::KvPair,
};

const MAX_HEIGHT: usize = 20;

/// Arena slot of the head sentinel (key `K::MIN`).
const HEAD: usize = 0;

/// Arena slot of the tail sentinel (key `K::MAX`).
const TAIL: usize = 1;

struct Node<K, V> {
    key: K,
    value: V,

    /// Forward links, one per level of this node's tower.
    next: Vec<usize>,
}

/// A sorted in-memory run, implemented as a skip list.
///
/// Nodes live in a `Vec` arena and link to each other by slot index; the
/// head and tail sentinels carry the reserved `K::MIN`/`K::MAX` keys, so
/// traversals need no bounds checks against list ends.
///
/// Tower heights follow a geometric distribution (`P(h) = 2^-h`, capped
/// at 20 levels) drawn from a per-list xorshift generator, so two lists
/// with the same seed and insert order are identical.
///
/// Not thread-safe; a run is only ever mutated by the foreground writer
/// and handed off wholesale to the flush worker.
#[allow(clippy::module_name_repetitions)]
pub struct SkipList<K, V> {
    nodes: Vec<Node<K, V>>,

    /// Tallest tower currently in use
    height: usize,

    len: usize,
    rng_state: u64,

    /// Smallest key ever inserted (tombstones included)
    min_key: Option<K>,

    /// Largest key ever inserted (tombstones included)
    max_key: Option<K>,
}

impl<K: FixedKey, V: FixedValue> SkipList<K, V> {
    /// Constructs an empty list whose tower heights are drawn from `seed`.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        let head = Node {
            key: K::MIN,
            value: V::TOMBSTONE,
            next: vec![TAIL; MAX_HEIGHT],
        };
        let tail = Node {
            key: K::MAX,
            value: V::TOMBSTONE,
            next: Vec::new(),
        };

        Self {
            nodes: vec![head, tail],
            height: 1,
            len: 0,
            // NOTE: xorshift must not start at 0, it would get stuck there
            rng_state: seed.max(1),
            min_key: None,
            max_key: None,
        }
    }

    /// Number of entries in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the list holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Smallest key ever inserted.
    #[must_use]
    pub fn min_key(&self) -> Option<K> {
        self.min_key
    }

    /// Largest key ever inserted.
    #[must_use]
    pub fn max_key(&self) -> Option<K> {
        self.max_key
    }

    /// Draws a tower height with `P(h) = 2^-h`, capped at `MAX_HEIGHT`.
    fn random_height(&mut self) -> usize {
        // Xorshift (Marsaglia), 64-bit variant
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;

        ((x.trailing_zeros() as usize) + 1).min(MAX_HEIGHT)
    }

    /// Walks down from the tallest level, recording the rightmost node
    /// with a key below `key` on every level.
    #[allow(clippy::indexing_slicing)]
    fn find_splices(&self, key: K) -> [usize; MAX_HEIGHT] {
        let mut splices = [HEAD; MAX_HEIGHT];
        let mut cur = HEAD;

        for level in (0..self.height).rev() {
            loop {
                let next = self.nodes[cur].next[level];
                if self.nodes[next].key < key {
                    cur = next;
                } else {
                    break;
                }
            }
            splices[level] = cur;
        }

        splices
    }

    /// Inserts `(key, value)`, overwriting the value if the key exists.
    #[allow(clippy::indexing_slicing)]
    pub fn insert(&mut self, key: K, value: V) {
        debug_assert!(
            key > K::MIN && key < K::MAX,
            "key space sentinels are reserved"
        );

        self.min_key = Some(self.min_key.map_or(key, |min| min.min(key)));
        self.max_key = Some(self.max_key.map_or(key, |max| max.max(key)));

        let splices = self.find_splices(key);

        let candidate = self.nodes[splices[0]].next[0];
        if candidate != TAIL && self.nodes[candidate].key == key {
            self.nodes[candidate].value = value;
            return;
        }

        let height = self.random_height();
        if height > self.height {
            // Levels above the old height were never descended, so their
            // splice stays at the head sentinel
            self.height = height;
        }

        let idx = self.nodes.len();
        let next = (0..height)
            .map(|level| self.nodes[splices[level]].next[level])
            .collect();
        self.nodes.push(Node { key, value, next });

        for level in 0..height {
            self.nodes[splices[level]].next[level] = idx;
        }

        self.len += 1;
    }

    /// Returns the value stored for `key`, if any.
    #[allow(clippy::indexing_slicing)]
    #[must_use]
    pub fn get(&self, key: K) -> Option<V> {
        let splices = self.find_splices(key);

        let candidate = self.nodes[splices[0]].next[0];
        (candidate != TAIL && self.nodes[candidate].key == key)
            .then(|| self.nodes[candidate].value)
    }

    /// Iterates over all entries in ascending key order.
    #[allow(clippy::indexing_slicing)]
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            list: self,
            cursor: self.nodes[HEAD].next[0],
        }
    }

    /// Iterates over all entries with `lo <= key < hi` in ascending key
    /// order; empty if the interval misses the list entirely.
    #[allow(clippy::indexing_slicing)]
    pub fn range(&self, lo: K, hi: K) -> RangeIter<'_, K, V> {
        let disjoint = match (self.min_key, self.max_key) {
            (Some(min), Some(max)) => lo > max || hi <= min,
            _ => true,
        };

        let cursor = if disjoint {
            TAIL
        } else {
            let splices = self.find_splices(lo);
            self.nodes[splices[0]].next[0]
        };

        RangeIter {
            list: self,
            cursor,
            upper: hi,
        }
    }
}

/// Ascending iterator over all entries of a [`SkipList`].
pub struct Iter<'a, K, V> {
    list: &'a SkipList<K, V>,
    cursor: usize,
}

impl<K: FixedKey, V: FixedValue> Iterator for Iter<'_, K, V> {
    type Item = KvPair<K, V>;

    #[allow(clippy::indexing_slicing)]
    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == TAIL {
            return None;
        }

        let node = &self.list.nodes[self.cursor];
        self.cursor = node.next[0];

        Some(KvPair {
            key: node.key,
            value: node.value,
        })
    }
}

/// Ascending iterator over a half-open key range of a [`SkipList`].
pub struct RangeIter<'a, K, V> {
    list: &'a SkipList<K, V>,
    cursor: usize,
    upper: K,
}

impl<K: FixedKey, V: FixedValue> Iterator for RangeIter<'_, K, V> {
    type Item = KvPair<K, V>;

    #[allow(clippy::indexing_slicing)]
    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == TAIL {
            return None;
        }

        let node = &self.list.nodes[self.cursor];
        if node.key >= self.upper {
            self.cursor = TAIL;
            return None;
        }

        self.cursor = node.next[0];

        Some(KvPair {
            key: node.key,
            value: node.value,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use test_log::test;

    #[test]
    fn skiplist_insert_get() {
        let mut list = SkipList::<i64, i64>::with_seed(1);

        for key in [5, 1, 9, 3, 7] {
            list.insert(key, key * 10);
        }

        assert_eq!(5, list.len());
        assert_eq!(Some(30), list.get(3));
        assert_eq!(Some(90), list.get(9));
        assert_eq!(None, list.get(4));
        assert_eq!(None, list.get(100));
    }

    #[test]
    fn skiplist_overwrite_keeps_len() {
        let mut list = SkipList::<i64, i64>::with_seed(7);

        list.insert(1, 1);
        list.insert(1, 2);
        list.insert(1, 3);

        assert_eq!(1, list.len());
        assert_eq!(Some(3), list.get(1));
    }

    #[test]
    fn skiplist_iter_is_sorted() {
        let mut list = SkipList::<i64, i64>::with_seed(42);

        for key in [8, 3, 5, 1, 9, 2, 7, 4, 6] {
            list.insert(key, -key);
        }

        let keys = list.iter().map(|kv| kv.key).collect::<Vec<_>>();
        assert_eq!(vec![1, 2, 3, 4, 5, 6, 7, 8, 9], keys);
    }

    #[test]
    fn skiplist_range_is_half_open() {
        let mut list = SkipList::<i64, i64>::with_seed(3);

        for key in 1..=9 {
            list.insert(key, key);
        }

        let keys = list.range(3, 7).map(|kv| kv.key).collect::<Vec<_>>();
        assert_eq!(vec![3, 4, 5, 6], keys);

        assert_eq!(0, list.range(4, 4).count());
        assert_eq!(0, list.range(20, 30).count());
        assert_eq!(0, list.range(-10, 1).count());
    }

    #[test]
    fn skiplist_tracks_min_max() {
        let mut list = SkipList::<i64, i64>::with_seed(9);

        assert_eq!(None, list.min_key());
        assert_eq!(None, list.max_key());

        list.insert(5, 5);
        list.insert(-3, 3);
        list.insert(12, 12);

        assert_eq!(Some(-3), list.min_key());
        assert_eq!(Some(12), list.max_key());
    }

    #[test]
    fn skiplist_matches_btree_model() {
        use rand::prelude::*;

        let mut rng = rand::rng();
        let mut list = SkipList::<i64, i64>::with_seed(rng.random());
        let mut model = std::collections::BTreeMap::new();

        for _ in 0..2_000 {
            let key = rng.random_range(1..200i64);
            let value = rng.random_range(1..1_000_000i64);

            list.insert(key, value);
            model.insert(key, value);
        }

        assert_eq!(model.len(), list.len());

        for key in 1..200 {
            assert_eq!(model.get(&key).copied(), list.get(key));
        }

        let expected = model
            .range(50..150)
            .map(|(k, v)| (*k, *v))
            .collect::<Vec<_>>();
        let got = list
            .range(50, 150)
            .map(|kv| (kv.key, kv.value))
            .collect::<Vec<_>>();
        assert_eq!(expected, got);
    }

    #[test]
    fn skiplist_same_seed_same_shape() {
        let mut a = SkipList::<i64, i64>::with_seed(123);
        let mut b = SkipList::<i64, i64>::with_seed(123);

        for key in 1..100 {
            a.insert(key, key);
            b.insert(key, key);
        }

        assert_eq!(a.height, b.height);
    }
}
