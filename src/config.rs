// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{FixedKey, FixedValue},
    tree::Tree,
};
use std::path::PathBuf;

/// Tree configuration builder
#[derive(Clone, Debug)]
pub struct Config {
    /// Folder the store keeps its run files in
    pub(crate) folder: PathBuf,

    /// Maximum entries per memory run
    pub(crate) memtable_size: usize,

    /// Number of memory runs
    pub(crate) memtable_count: usize,

    /// Fraction of a tier consumed per cascade
    pub(crate) merge_fraction: f64,

    /// Target bloom filter false positive rate for all filters
    pub(crate) filter_fp_rate: f32,

    /// Entries per fence pointer in a disk run
    pub(crate) block_size: usize,

    /// Runs per disk tier
    pub(crate) runs_per_level: usize,
}

impl Config {
    /// Initializes a new config with sensible defaults.
    ///
    /// The folder is created on [`Config::open`] if it does not exist;
    /// run files are created, renamed and deleted inside it.
    pub fn new<P: Into<PathBuf>>(folder: P) -> Self {
        Self {
            folder: folder.into(),
            memtable_size: 4_096,
            memtable_count: 4,
            merge_fraction: 1.0,
            filter_fp_rate: 0.01,
            block_size: 64,
            runs_per_level: 4,
        }
    }

    /// Sets the maximum entry count of a single memory run.
    ///
    /// Defaults to 4096.
    #[must_use]
    pub fn memtable_size(mut self, count: usize) -> Self {
        self.memtable_size = count;
        self
    }

    /// Sets the number of memory runs.
    ///
    /// When every memory run is full, the oldest group is flushed to
    /// disk.
    ///
    /// Defaults to 4.
    #[must_use]
    pub fn memtable_count(mut self, count: usize) -> Self {
        self.memtable_count = count;
        self
    }

    /// Sets the fraction of a tier that one cascade consumes.
    ///
    /// Must be in `(0, 1]`. Defaults to 1.0 (full-tier merges).
    #[must_use]
    pub fn merge_fraction(mut self, fraction: f64) -> Self {
        self.merge_fraction = fraction;
        self
    }

    /// Sets the target false positive rate of all bloom filters.
    ///
    /// Defaults to 0.01.
    #[must_use]
    pub fn filter_fp_rate(mut self, fp_rate: f32) -> Self {
        self.filter_fp_rate = fp_rate;
        self
    }

    /// Sets the number of entries covered by one fence pointer in a
    /// disk run.
    ///
    /// Defaults to 64.
    #[must_use]
    pub fn block_size(mut self, count: usize) -> Self {
        self.block_size = count;
        self
    }

    /// Sets the run count of each disk tier.
    ///
    /// Defaults to 4.
    #[must_use]
    pub fn runs_per_level(mut self, count: usize) -> Self {
        self.runs_per_level = count;
        self
    }

    /// Opens a tree using the config.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] for out-of-range
    /// parameters and `Io` errors from preallocating tier 1.
    pub fn open<K: FixedKey, V: FixedValue>(self) -> crate::Result<Tree<K, V>> {
        Tree::open(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use test_log::test;

    #[test]
    fn config_rejects_zero_merge_fraction() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let result = Config::new(dir.path())
            .merge_fraction(0.0)
            .open::<i64, i64>();

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn config_rejects_overlong_merge_fraction() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let result = Config::new(dir.path())
            .merge_fraction(1.5)
            .open::<i64, i64>();

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn config_rejects_zero_sizes() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        for config in [
            Config::new(dir.path()).memtable_size(0),
            Config::new(dir.path()).memtable_count(0),
            Config::new(dir.path()).block_size(0),
            Config::new(dir.path()).runs_per_level(0),
        ] {
            assert!(matches!(
                config.open::<i64, i64>(),
                Err(Error::InvalidConfig(_))
            ));
        }

        Ok(())
    }

    #[test]
    fn config_rejects_silly_fp_rate() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let result = Config::new(dir.path())
            .filter_fp_rate(1.0)
            .open::<i64, i64>();

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn config_creates_store_folder() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let folder = dir.path().join("nested").join("store");

        let _tree = Config::new(&folder).open::<i64, i64>()?;

        assert!(folder.exists());
        Ok(())
    }
}
