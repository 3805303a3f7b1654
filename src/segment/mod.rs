// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    binary_search::partition_point,
    bloom::BloomFilter,
    coding::{FixedKey, FixedValue},
    value::KvPair,
};
use memmap2::MmapMut;
use std::{
    fs::OpenOptions,
    marker::PhantomData,
    path::{Path, PathBuf},
};

/// An immutable sorted run on disk.
///
/// The backing file is named `C_<level>_<run_id>.clsm`, preallocated to
/// the owning level's full run size and memory-mapped read-write. A run
/// is populated exactly once, either by a bulk write (memory flush) or
/// entry by entry (k-way merge), and then indexed: a sparse fence
/// pointer per `block_size` entries, a bloom filter over all keys, and
/// the min/max key pair. After indexing, the mapping is only ever read.
///
/// Dropping a segment flushes, unmaps and deletes the file; the store
/// makes no durability promises past its own lifetime.
pub struct Segment<K: FixedKey, V: FixedValue> {
    path: PathBuf,
    mmap: MmapMut,

    /// Preallocated entry slots
    run_size: usize,

    /// Live entries
    len: usize,

    /// 1-based tier number, part of the file name
    level_no: usize,

    run_id: usize,
    block_size: usize,

    /// First key of every block
    fence_pointers: Vec<K>,

    filter: BloomFilter,

    /// Smallest and largest live key; `None` while unpopulated
    key_range: Option<(K, K)>,

    _value: PhantomData<V>,
}

impl<K: FixedKey, V: FixedValue> Segment<K, V> {
    const PAIR_WIDTH: usize = K::WIDTH + V::WIDTH;

    /// Creates an empty run with a preallocated, zeroed backing file.
    pub fn create(
        folder: &Path,
        level_no: usize,
        run_id: usize,
        run_size: usize,
        block_size: usize,
        fp_rate: f32,
    ) -> crate::Result<Self> {
        assert!(run_size > 0, "run size must be nonzero");
        assert!(block_size > 0, "block size must be nonzero");

        let path = folder.join(format!("C_{level_no}_{run_id}.clsm"));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.set_len((run_size * Self::PAIR_WIDTH) as u64)?;

        // SAFETY: the segment exclusively owns its backing file; nothing
        // else maps or writes it while the mapping is alive
        #[allow(unsafe_code)]
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            path,
            mmap,
            run_size,
            len: 0,
            level_no,
            run_id,
            block_size,
            fence_pointers: Vec::new(),
            filter: BloomFilter::with_fp_rate(run_size, fp_rate),
            key_range: None,
            _value: PhantomData,
        })
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the run holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Preallocated entry slots.
    pub fn run_size(&self) -> usize {
        self.run_size
    }

    pub fn run_id(&self) -> usize {
        self.run_id
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entry_offset(idx: usize) -> usize {
        idx * Self::PAIR_WIDTH
    }

    /// Decodes the key at `idx`.
    #[allow(clippy::indexing_slicing)]
    pub fn key_at(&self, idx: usize) -> K {
        debug_assert!(idx < self.run_size);
        let off = Self::entry_offset(idx);
        K::decode_from(&self.mmap[off..off + K::WIDTH])
    }

    /// Decodes the entry at `idx`.
    #[allow(clippy::indexing_slicing)]
    pub fn entry_at(&self, idx: usize) -> KvPair<K, V> {
        debug_assert!(idx < self.run_size);
        let off = Self::entry_offset(idx);
        KvPair {
            key: K::decode_from(&self.mmap[off..off + K::WIDTH]),
            value: V::decode_from(&self.mmap[off + K::WIDTH..off + Self::PAIR_WIDTH]),
        }
    }

    /// Encodes `entry` into slot `idx` of the mapping.
    #[allow(clippy::indexing_slicing)]
    pub fn write_entry(&mut self, idx: usize, entry: KvPair<K, V>) {
        debug_assert!(idx < self.run_size);
        let off = Self::entry_offset(idx);
        entry.key.encode_into(&mut self.mmap[off..off + K::WIDTH]);
        entry
            .value
            .encode_into(&mut self.mmap[off + K::WIDTH..off + Self::PAIR_WIDTH]);
    }

    /// Bulk-writes a pre-sorted slice of at most `run_size` entries.
    #[allow(clippy::indexing_slicing)]
    pub fn write_sorted(&mut self, items: &[KvPair<K, V>]) {
        debug_assert!(items.len() <= self.run_size);
        debug_assert!(items.windows(2).all(|w| w[0].key <= w[1].key));

        for (idx, item) in items.iter().enumerate() {
            self.write_entry(idx, *item);
        }
        self.len = items.len();
    }

    /// Sets the live entry count (used by the k-way merge, which writes
    /// entries directly).
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.run_size);
        self.len = len;
    }

    /// Builds the run's index over its live entries: bloom filter
    /// membership, one fence pointer per `block_size` entries, and the
    /// min/max key pair. Flushes the mapping afterwards.
    pub fn construct_index(&mut self) -> crate::Result<()> {
        self.fence_pointers.clear();

        for idx in 0..self.len {
            let key = self.key_at(idx);

            let hash = key.with_bytes(BloomFilter::get_hash);
            self.filter.set_with_hash(hash);

            if idx % self.block_size == 0 {
                self.fence_pointers.push(key);
            }
        }

        self.key_range = if self.len == 0 {
            None
        } else {
            Some((self.key_at(0), self.key_at(self.len - 1)))
        };

        self.mmap.flush()?;
        Ok(())
    }

    /// Locates the half-open block `[start, end)` that may contain `key`.
    ///
    /// Only meaningful for a populated run with `key` inside its min/max
    /// interval. A key equal to an interior fence lands in the block
    /// *beginning* at that fence.
    #[allow(clippy::indexing_slicing)]
    fn fence_block(&self, key: K) -> (usize, usize) {
        let fences = &self.fence_pointers;
        let max_fence = fences.len() - 1;

        if max_fence == 0 {
            return (0, self.len);
        }

        if key < fences[1] {
            return (0, self.block_size);
        }

        if key >= fences[max_fence] {
            return (self.block_size * max_fence, self.len);
        }

        // Unique m with fences[m] <= key < fences[m + 1]
        let m = partition_point(fences.len(), |i| fences[i] <= key) - 1;
        (m * self.block_size, (m + 1) * self.block_size)
    }

    /// Index of the first live entry whose key is not below `key`.
    fn lower_bound(&self, key: K) -> usize {
        let Some((min, max)) = self.key_range else {
            return 0;
        };

        if key <= min {
            return 0;
        }
        if key > max {
            return self.len;
        }

        let (start, end) = self.fence_block(key);
        start + partition_point(end - start, |i| self.key_at(start + i) < key)
    }

    /// Returns the value stored for `key`, if any.
    ///
    /// Rejects via the min/max interval and the bloom filter before
    /// touching the mapping; a hit costs one in-block binary search.
    pub fn get(&self, key: K) -> Option<V> {
        let (min, max) = self.key_range?;
        if key < min || key > max {
            return None;
        }

        let hash = key.with_bytes(BloomFilter::get_hash);
        if !self.filter.contains_hash(hash) {
            return None;
        }

        let (start, end) = self.fence_block(key);
        let idx = start + partition_point(end - start, |i| self.key_at(start + i) < key);

        (idx < end && self.key_at(idx) == key).then(|| self.entry_at(idx).value)
    }

    /// Returns half-open index bounds `(i1, i2)` covering every live
    /// entry with `lo <= key < hi`, or `(0, 0)` if the interval misses
    /// the run entirely. `i2` is clamped to the entry count when `hi`
    /// exceeds the largest key.
    pub fn range_indexes(&self, lo: K, hi: K) -> (usize, usize) {
        let Some((min, max)) = self.key_range else {
            return (0, 0);
        };

        if lo > max || hi < min {
            return (0, 0);
        }

        let start = self.lower_bound(lo);
        let end = if hi > max { self.len } else { self.lower_bound(hi) };

        (start, end)
    }

    /// Iterates over all live entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = KvPair<K, V>> + '_ {
        (0..self.len).map(|idx| self.entry_at(idx))
    }

    /// Renames the backing file to carry `run_id`, after older sibling
    /// runs were retired. A failed rename leaves the store unusable and
    /// is surfaced as an error.
    pub fn rename_to(&mut self, run_id: usize) -> crate::Result<()> {
        if run_id == self.run_id {
            return Ok(());
        }

        #[allow(clippy::expect_used)]
        let folder = self.path.parent().expect("segment path should have a parent");
        let new_path = folder.join(format!("C_{}_{run_id}.clsm", self.level_no));

        std::fs::rename(&self.path, &new_path)?;

        self.path = new_path;
        self.run_id = run_id;
        Ok(())
    }

    #[cfg(test)]
    fn fence_keys(&self) -> &[K] {
        &self.fence_pointers
    }
}

impl<K: FixedKey, V: FixedValue> Drop for Segment<K, V> {
    fn drop(&mut self) {
        let _ = self.mmap.flush();

        if let Err(e) = std::fs::remove_file(&self.path) {
            log::error!("Failed to remove segment file {:?}: {e}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use test_log::test;

    fn pairs(keys: &[i64]) -> Vec<KvPair<i64, i64>> {
        keys.iter()
            .map(|&key| KvPair {
                key,
                value: key * 10,
            })
            .collect()
    }

    fn populated(
        folder: &Path,
        keys: &[i64],
        block_size: usize,
    ) -> crate::Result<Segment<i64, i64>> {
        let mut segment = Segment::create(folder, 1, 0, keys.len().max(1), block_size, 0.01)?;
        segment.write_sorted(&pairs(keys));
        segment.construct_index()?;
        Ok(segment)
    }

    #[test]
    fn segment_file_is_preallocated() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let segment = Segment::<i64, i64>::create(dir.path(), 2, 3, 100, 4, 0.01)?;

        assert_eq!(dir.path().join("C_2_3.clsm"), segment.path());
        assert_eq!(100 * 16, std::fs::metadata(segment.path())?.len() as usize);
        assert!(segment.is_empty());

        Ok(())
    }

    #[test]
    fn segment_point_reads() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let segment = populated(dir.path(), &[1, 3, 5, 7, 9, 11, 13], 2)?;

        assert_eq!(7, segment.len());
        assert_eq!(Some(50), segment.get(5));
        assert_eq!(Some(10), segment.get(1));
        assert_eq!(Some(130), segment.get(13));

        assert_eq!(None, segment.get(4));
        assert_eq!(None, segment.get(0));
        assert_eq!(None, segment.get(99));

        Ok(())
    }

    #[test]
    fn segment_sorted_and_fences_invariant() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let keys = (1..=10).collect::<Vec<i64>>();
        let block_size = 3;
        let segment = populated(dir.path(), &keys, block_size)?;

        for idx in 1..segment.len() {
            assert!(segment.key_at(idx - 1) <= segment.key_at(idx));
        }

        // |fence| = ceil(len / block_size), fence[j] = key at j * block_size
        assert_eq!(
            segment.len().div_ceil(block_size),
            segment.fence_keys().len()
        );
        for (j, fence) in segment.fence_keys().iter().enumerate() {
            assert_eq!(segment.key_at(j * block_size), *fence);
        }

        Ok(())
    }

    #[test]
    fn segment_key_on_fence_is_found() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let keys = (1..=12).collect::<Vec<i64>>();
        let segment = populated(dir.path(), &keys, 4)?;

        // Keys sitting exactly on a fence pointer
        for &key in segment.fence_keys() {
            assert_eq!(Some(key * 10), segment.get(key));
        }

        // And every other key, for good measure
        for key in keys {
            assert_eq!(Some(key * 10), segment.get(key));
        }

        Ok(())
    }

    #[test]
    fn segment_range_indexes() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let segment = populated(dir.path(), &[2, 4, 6, 8, 10], 2)?;

        assert_eq!((0, 5), segment.range_indexes(2, 11));
        assert_eq!((0, 5), segment.range_indexes(-100, 100));
        assert_eq!((1, 3), segment.range_indexes(3, 7));
        assert_eq!((1, 4), segment.range_indexes(4, 9));

        // Misses
        assert_eq!((0, 0), segment.range_indexes(11, 50));
        assert_eq!((0, 0), segment.range_indexes(-5, 1));

        // Upper bound is exclusive
        let (i1, i2) = segment.range_indexes(2, 6);
        let keys = (i1..i2).map(|i| segment.key_at(i)).collect::<Vec<_>>();
        assert_eq!(vec![2, 4], keys);

        Ok(())
    }

    #[test]
    fn segment_empty_run_misses() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let mut segment = Segment::<i64, i64>::create(dir.path(), 1, 0, 8, 2, 0.01)?;
        segment.construct_index()?;

        assert_eq!(None, segment.get(1));
        assert_eq!((0, 0), segment.range_indexes(0, 100));

        Ok(())
    }

    #[test]
    fn segment_rename_moves_file() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let mut segment = populated(dir.path(), &[1, 2, 3], 2)?;

        let old_path = segment.path().to_path_buf();
        segment.rename_to(5)?;

        assert_eq!(dir.path().join("C_1_5.clsm"), segment.path());
        assert!(!old_path.exists());
        assert!(segment.path().exists());
        assert_eq!(Some(20), segment.get(2));

        Ok(())
    }

    #[test]
    fn segment_drop_deletes_file() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let path = {
            let segment = populated(dir.path(), &[1, 2, 3], 2)?;
            segment.path().to_path_buf()
        };

        assert!(!path.exists());

        Ok(())
    }

    #[test]
    fn segment_bloom_contains_every_key() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let keys = (1..=100).collect::<Vec<i64>>();
        let segment = populated(dir.path(), &keys, 8)?;

        for key in keys {
            let hash = key.with_bytes(BloomFilter::get_hash);
            assert!(segment.filter.contains_hash(hash));
        }

        Ok(())
    }
}
