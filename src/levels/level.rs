// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{FixedKey, FixedValue},
    segment::Segment,
    value::KvPair,
};
use interval_heap::IntervalHeap;
use std::path::{Path, PathBuf};

/// Heap entry of the k-way merge: an input entry tagged with the index
/// of the run it came from.
///
/// Ordered by key first, then input index, so duplicate keys pop oldest
/// input first and the write loop can let newer inputs overwrite.
#[derive(Copy, Clone)]
struct HeapItem<K, V>(usize, KvPair<K, V>);

impl<K: Ord, V: Eq> PartialEq for HeapItem<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.1.key == other.1.key && self.0 == other.0
    }
}

impl<K: Ord, V: Eq> Eq for HeapItem<K, V> {}

impl<K: Ord, V: Eq> Ord for HeapItem<K, V> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.1.key.cmp(&other.1.key).then(self.0.cmp(&other.0))
    }
}

impl<K: Ord, V: Eq> PartialOrd for HeapItem<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// One disk tier: an ordered collection of equally sized runs.
///
/// All `runs_per_level` run slots are preallocated up front; the first
/// `active_run_count` of them hold data, oldest first. New runs arrive
/// either as a sorted array (tier 1, flushed from memory) or as the
/// k-way merge of the previous tier's oldest runs.
pub struct Level<K: FixedKey, V: FixedValue> {
    folder: PathBuf,

    /// 1-based tier number
    level_no: usize,

    /// Entry capacity of each run
    run_size: usize,

    block_size: usize,
    runs_per_level: usize,

    /// Number of runs consumed per cascade into the next tier
    merge_size: usize,

    fp_rate: f32,

    /// Populated run slots; runs `0..active_run_count` hold data
    active_run_count: usize,

    runs: Vec<Segment<K, V>>,
}

impl<K: FixedKey, V: FixedValue> Level<K, V> {
    /// Creates a tier with every run slot preallocated on disk.
    pub fn create(
        folder: &Path,
        level_no: usize,
        run_size: usize,
        block_size: usize,
        runs_per_level: usize,
        merge_size: usize,
        fp_rate: f32,
    ) -> crate::Result<Self> {
        let mut runs = Vec::with_capacity(runs_per_level);
        for run_id in 0..runs_per_level {
            runs.push(Segment::create(
                folder, level_no, run_id, run_size, block_size, fp_rate,
            )?);
        }

        Ok(Self {
            folder: folder.to_path_buf(),
            level_no,
            run_size,
            block_size,
            runs_per_level,
            merge_size,
            fp_rate,
            active_run_count: 0,
            runs,
        })
    }

    pub fn is_full(&self) -> bool {
        self.active_run_count == self.runs_per_level
    }

    pub fn is_empty(&self) -> bool {
        self.active_run_count == 0
    }

    pub fn run_size(&self) -> usize {
        self.run_size
    }

    pub fn merge_size(&self) -> usize {
        self.merge_size
    }

    /// The populated runs, oldest first.
    #[allow(clippy::indexing_slicing)]
    pub fn active_runs(&self) -> &[Segment<K, V>] {
        &self.runs[..self.active_run_count]
    }

    /// Total live entries across populated runs.
    pub fn entry_count(&self) -> usize {
        self.active_runs().iter().map(Segment::len).sum()
    }

    /// Admits a pre-sorted array as the next run of this tier.
    #[allow(clippy::indexing_slicing)]
    pub fn add_sorted_run(&mut self, items: &[KvPair<K, V>]) -> crate::Result<()> {
        assert!(self.active_run_count < self.runs_per_level);
        assert!(items.len() <= self.run_size);

        let run = &mut self.runs[self.active_run_count];
        run.write_sorted(items);
        run.construct_index()?;

        self.active_run_count += 1;
        Ok(())
    }

    /// The previous tier's runs that the next cascade will consume.
    #[allow(clippy::indexing_slicing)]
    pub fn runs_to_merge(&self) -> &[Segment<K, V>] {
        &self.runs[..self.merge_size]
    }

    /// K-way merges `inputs` (the previous tier's oldest runs) into this
    /// tier's next run slot.
    ///
    /// Among duplicate keys, the entry from the run with the highest
    /// input index (the newest run) survives. When the output lands in
    /// the deepest, previously empty tier, surviving tombstones are
    /// dropped entirely; nothing below could resurrect those keys.
    #[allow(clippy::indexing_slicing)]
    pub fn merge_from(
        &mut self,
        inputs: &[Segment<K, V>],
        is_last_level: bool,
    ) -> crate::Result<()> {
        assert!(self.active_run_count < self.runs_per_level);

        let mut heap = IntervalHeap::with_capacity(inputs.len());
        let mut cursors = vec![0usize; inputs.len()];

        for (source, run) in inputs.iter().enumerate() {
            if !run.is_empty() {
                heap.push(HeapItem(source, run.entry_at(0)));
                cursors[source] = 1;
            }
        }

        let out = &mut self.runs[self.active_run_count];
        let mut out_len = 0;

        // The previous distinct key is held back until the next key
        // proves it final, so tombstone drops never need a retraction
        let mut pending: Option<HeapItem<K, V>> = None;

        while let Some(item) = heap.pop_min() {
            let HeapItem(source, entry) = item;

            match pending {
                Some(HeapItem(held_source, held)) if held.key == entry.key => {
                    if source > held_source {
                        pending = Some(item);
                    }
                }
                Some(HeapItem(_, held)) => {
                    if !(is_last_level && held.value == V::TOMBSTONE) {
                        out.write_entry(out_len, held);
                        out_len += 1;
                    }
                    pending = Some(item);
                }
                None => pending = Some(item),
            }

            let cursor = cursors[source];
            if cursor < inputs[source].len() {
                heap.push(HeapItem(source, inputs[source].entry_at(cursor)));
                cursors[source] = cursor + 1;
            }
        }

        if let Some(HeapItem(_, held)) = pending {
            if !(is_last_level && held.value == V::TOMBSTONE) {
                out.write_entry(out_len, held);
                out_len += 1;
            }
        }

        out.set_len(out_len);
        out.construct_index()?;

        if out_len > 0 {
            self.active_run_count += 1;
        }

        Ok(())
    }

    /// Retires the `merge_size` oldest runs after a cascade consumed
    /// them: their files are deleted, survivors are renamed down to run
    /// ids `0..`, and fresh preallocated runs restore the tier's
    /// physical capacity.
    #[allow(clippy::indexing_slicing)]
    pub fn retire_merged(&mut self) -> crate::Result<()> {
        // Drops delete the backing files
        self.runs.drain(..self.merge_size);
        self.active_run_count -= self.merge_size;

        for (run_id, run) in self
            .runs
            .iter_mut()
            .take(self.active_run_count)
            .enumerate()
        {
            run.rename_to(run_id)?;
        }

        while self.runs.len() < self.runs_per_level {
            let run_id = self.runs.len();
            self.runs.push(Segment::create(
                &self.folder,
                self.level_no,
                run_id,
                self.run_size,
                self.block_size,
                self.fp_rate,
            )?);
        }

        Ok(())
    }

    /// Returns the value stored for `key` in the newest run that has it.
    pub fn get(&self, key: K) -> Option<V> {
        self.active_runs().iter().rev().find_map(|run| run.get(key))
    }
}
