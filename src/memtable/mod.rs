// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod skiplist;

pub use skiplist::SkipList;

use crate::{
    coding::{FixedKey, FixedValue},
    value::KvPair,
};

/// The contract of a mutable, sorted in-memory run.
///
/// The tree only talks to its memory tier through this trait, so the
/// concrete structure can be swapped out; [`SkipList`] is the provided
/// implementation and the default.
///
/// Implementations do not have to be thread-safe: a run is mutated by
/// one foreground writer and ownership moves to the flush worker
/// wholesale once the run is detached.
pub trait MemoryRun<K: FixedKey, V: FixedValue> {
    /// Constructs an empty run; `seed` drives any randomness the
    /// structure needs.
    fn with_seed(seed: u64) -> Self
    where
        Self: Sized;

    /// Inserts a key-value pair, overwriting the value if the key exists.
    fn insert(&mut self, key: K, value: V);

    /// Returns the value stored for `key`, if any.
    fn get(&self, key: K) -> Option<V>;

    /// Number of entries in the run.
    fn len(&self) -> usize;

    /// Returns `true` if the run holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest key ever inserted.
    fn min_key(&self) -> Option<K>;

    /// Largest key ever inserted.
    fn max_key(&self) -> Option<K>;

    /// Iterates over all entries in ascending key order.
    fn iter(&self) -> impl Iterator<Item = KvPair<K, V>> + '_;

    /// Iterates over all entries with `lo <= key < hi` in ascending key
    /// order; empty if the interval misses the run entirely.
    fn range(&self, lo: K, hi: K) -> impl Iterator<Item = KvPair<K, V>> + '_;
}

impl<K: FixedKey, V: FixedValue> MemoryRun<K, V> for SkipList<K, V> {
    fn with_seed(seed: u64) -> Self {
        Self::with_seed(seed)
    }

    fn insert(&mut self, key: K, value: V) {
        Self::insert(self, key, value);
    }

    fn get(&self, key: K) -> Option<V> {
        Self::get(self, key)
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn min_key(&self) -> Option<K> {
        Self::min_key(self)
    }

    fn max_key(&self) -> Option<K> {
        Self::max_key(self)
    }

    fn iter(&self) -> impl Iterator<Item = KvPair<K, V>> + '_ {
        Self::iter(self)
    }

    fn range(&self, lo: K, hi: K) -> impl Iterator<Item = KvPair<K, V>> + '_ {
        Self::range(self, lo, hi)
    }
}
