// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod level;

pub use level::Level;

use crate::coding::{FixedKey, FixedValue};
use crate::value::KvPair;
use std::path::{Path, PathBuf};

/// The ordered list of disk tiers, shallowest first.
///
/// Tier 1 exists from the start; deeper tiers are created lazily the
/// first time a cascade needs them, each with a run size of
/// `run_size(previous) * merge_size(previous)`.
///
/// The whole structure sits behind one mutex in the tree: the flush
/// worker mutates it while holding the lock, and every foreground read
/// of the disk side takes the same lock.
pub struct Levels<K: FixedKey, V: FixedValue> {
    folder: PathBuf,
    block_size: usize,
    runs_per_level: usize,
    merge_fraction: f64,
    fp_rate: f32,

    levels: Vec<Level<K, V>>,
}

impl<K: FixedKey, V: FixedValue> Levels<K, V> {
    /// Creates the tier list with tier 1 preallocated.
    pub fn create(
        folder: &Path,
        block_size: usize,
        runs_per_level: usize,
        merge_fraction: f64,
        fp_rate: f32,
        first_run_size: usize,
    ) -> crate::Result<Self> {
        #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let merge_size = (runs_per_level as f64 * merge_fraction).ceil() as usize;

        let first = Level::create(
            folder,
            1,
            first_run_size,
            block_size,
            runs_per_level,
            merge_size,
            fp_rate,
        )?;

        Ok(Self {
            folder: folder.to_path_buf(),
            block_size,
            runs_per_level,
            merge_fraction,
            fp_rate,
            levels: vec![first],
        })
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn merge_size(&self) -> usize {
        (self.runs_per_level as f64 * self.merge_fraction).ceil() as usize
    }

    /// Number of disk tiers.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Iterates over tiers, shallowest first.
    pub fn iter(&self) -> impl Iterator<Item = &Level<K, V>> {
        self.levels.iter()
    }

    /// Admits a sorted flush from the memory tier into tier 1,
    /// cascading first if tier 1 is full.
    #[allow(clippy::indexing_slicing)]
    pub fn push_sorted_run(&mut self, items: &[KvPair<K, V>]) -> crate::Result<()> {
        if self.levels[0].is_full() {
            self.cascade(1)?;
        }

        self.levels[0].add_sorted_run(items)
    }

    /// Cascades the oldest runs of tier `target - 1` into tier `target`
    /// (0-based indexes into the tier list).
    ///
    /// Recurses deeper first whenever the target tier is itself full, so
    /// one flush can ripple through several tiers.
    #[allow(clippy::indexing_slicing)]
    fn cascade(&mut self, target: usize) -> crate::Result<()> {
        if target == self.levels.len() {
            let previous = &self.levels[target - 1];
            let run_size = previous.run_size() * previous.merge_size();

            log::debug!(
                "Creating disk level {} with run size {run_size}",
                target + 1
            );

            self.levels.push(Level::create(
                &self.folder,
                target + 1,
                run_size,
                self.block_size,
                self.runs_per_level,
                self.merge_size(),
                self.fp_rate,
            )?);
        }

        if self.levels[target].is_full() {
            self.cascade(target + 1)?;
        }

        // Tombstones may only be dropped when the merge output lands in
        // the deepest tier and nothing older lives beside it
        let is_last_level = target + 1 == self.levels.len() && self.levels[target].is_empty();

        log::debug!(
            "Merging {} runs of disk level {} into level {} (last level: {is_last_level})",
            self.levels[target - 1].merge_size(),
            target,
            target + 1,
        );

        let (shallow, deep) = self.levels.split_at_mut(target);
        let source = &mut shallow[target - 1];
        let dest = &mut deep[0];

        dest.merge_from(source.runs_to_merge(), is_last_level)?;
        source.retire_merged()?;

        Ok(())
    }

    /// Returns the value stored for `key` in the shallowest tier (and
    /// newest run within it) that has it.
    pub fn get(&self, key: K) -> Option<V> {
        self.levels.iter().find_map(|level| level.get(key))
    }

    /// Live entry counts of the populated runs of every tier, shallowest
    /// tier first, oldest run first.
    pub fn run_lengths(&self) -> Vec<Vec<usize>> {
        self.levels
            .iter()
            .map(|level| level.active_runs().iter().map(crate::segment::Segment::len).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]

    use super::*;
    use test_log::test;

    fn pairs(keys: std::ops::RangeInclusive<i64>) -> Vec<KvPair<i64, i64>> {
        keys.map(|key| KvPair { key, value: key }).collect()
    }

    #[test]
    fn levels_flush_then_cascade() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        // 2 runs per tier, full fraction merged, tier 1 runs hold 4
        let mut levels = Levels::<i64, i64>::create(dir.path(), 2, 2, 1.0, 0.01, 4)?;
        assert_eq!(1, levels.level_count());

        levels.push_sorted_run(&pairs(1..=4))?;
        levels.push_sorted_run(&pairs(5..=8))?;
        assert_eq!(1, levels.level_count());
        assert_eq!(vec![vec![4, 4]], levels.run_lengths());

        // Tier 1 is full, the next flush cascades into a new tier 2
        levels.push_sorted_run(&pairs(9..=12))?;
        assert_eq!(2, levels.level_count());
        assert_eq!(vec![vec![4], vec![8]], levels.run_lengths());

        for key in 1..=12 {
            assert_eq!(Some(key), levels.get(key));
        }
        assert_eq!(None, levels.get(13));

        Ok(())
    }

    #[test]
    fn levels_deeper_tiers_scale_run_size() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let mut levels = Levels::<i64, i64>::create(dir.path(), 2, 2, 1.0, 0.01, 4)?;

        // Fill tier 1 repeatedly so two cascades land in tier 2
        for round in 0..5i64 {
            let base = round * 4;
            levels.push_sorted_run(&pairs(base + 1..=base + 4))?;
        }

        assert_eq!(2, levels.level_count());
        // Tier 2 runs hold runs_per_level * fraction = 2 tier-1 runs each
        assert_eq!(8, levels.levels[1].run_size());
        assert_eq!(vec![vec![4], vec![8, 8]], levels.run_lengths());

        for key in 1..=20 {
            assert_eq!(Some(key), levels.get(key));
        }

        Ok(())
    }
}
