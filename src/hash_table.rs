// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{FixedKey, FixedValue},
    value::KvPair,
};

/// Open-addressing hash table used to deduplicate keys during a range scan.
///
/// A scan walks runs newest to oldest, so the *first* sighting of a key is
/// authoritative; the table only has to answer "seen before?".
///
/// Slots are linearly probed. An empty slot holds the reserved pair
/// `(K::MIN, V::TOMBSTONE)`, which no live entry can collide with since
/// `K::MIN` is reserved from the key space. Each table lives for a single
/// scan and is never shared.
#[allow(clippy::module_name_repetitions)]
pub struct HashTable<K, V> {
    slots: Vec<KvPair<K, V>>,
    occupied: usize,
}

impl<K: FixedKey, V: FixedValue> HashTable<K, V> {
    /// Reserved pair marking an unoccupied slot.
    fn empty_slot() -> KvPair<K, V> {
        KvPair {
            key: K::MIN,
            value: V::TOMBSTONE,
        }
    }

    /// Constructs a table with at least the given slot count.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(8).next_power_of_two();

        Self {
            slots: vec![Self::empty_slot(); capacity],
            occupied: 0,
        }
    }

    fn slot_index(&self, key: K) -> usize {
        let hash = key.with_bytes(xxhash_rust::xxh3::xxh3_64);

        #[allow(clippy::cast_possible_truncation)]
        let idx = (hash as usize) & (self.slots.len() - 1);
        idx
    }

    /// Records `(key, value)` if the key has not been seen yet.
    ///
    /// Returns `true` exactly on the first sighting of `key`; the stored
    /// value is left untouched on later sightings.
    #[allow(clippy::indexing_slicing)]
    pub fn put_if_absent(&mut self, key: K, value: V) -> bool {
        debug_assert!(key != K::MIN, "key space sentinels are reserved");

        // Load factor capped at 0.5
        if (self.occupied + 1) * 2 > self.slots.len() {
            self.grow();
        }

        let empty = Self::empty_slot();
        let mask = self.slots.len() - 1;
        let mut idx = self.slot_index(key);

        loop {
            let slot = self.slots[idx];

            if slot == empty {
                self.slots[idx] = KvPair { key, value };
                self.occupied += 1;
                return true;
            }

            if slot.key == key {
                return false;
            }

            idx = (idx + 1) & mask;
        }
    }

    /// Doubles the slot count and re-probes every occupied slot.
    #[allow(clippy::indexing_slicing)]
    fn grow(&mut self) {
        let empty = Self::empty_slot();
        let new_len = self.slots.len() * 2;
        let old = std::mem::replace(&mut self.slots, vec![Self::empty_slot(); new_len]);
        let mask = self.slots.len() - 1;

        for entry in old {
            if entry == empty {
                continue;
            }

            let mut idx = self.slot_index(entry.key);
            while self.slots[idx] != empty {
                idx = (idx + 1) & mask;
            }
            self.slots[idx] = entry;
        }
    }
}
