// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    bloom::BloomFilter,
    coding::{FixedKey, FixedValue},
    config::Config,
    hash_table::HashTable,
    levels::Levels,
    memtable::MemoryRun,
    value::KvPair,
    Error, SkipList,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// An LSM-tree over fixed-width keys and values.
///
/// Writes go to the active memory run; when every memory run is full,
/// the oldest group is detached and handed to a background worker, which
/// sorts it and admits it to disk tier 1 (cascading deeper tiers as they
/// fill up). At most one such worker is in flight; it is joined before
/// the next flush, before any read touches the disk tiers, and on drop.
///
/// Reads consult runs newest to oldest (memory first, then disk tiers
/// shallowest to deepest), so the most recent write for a key wins. The
/// tree expects a single foreground thread; writes take `&mut self`.
///
/// The memory-run structure is pluggable through [`MemoryRun`];
/// [`SkipList`] is the default.
pub struct Tree<K: FixedKey, V: FixedValue, M: MemoryRun<K, V> = SkipList<K, V>> {
    config: Config,

    /// Memory runs consumed per flush
    num_to_merge: usize,

    /// Index of the memory run that takes writes
    active_idx: usize,

    /// Memory runs, oldest first
    memtables: Vec<M>,

    /// One bloom filter per memory run
    filters: Vec<BloomFilter>,

    /// Disk tiers; the flush worker mutates them under this lock, and
    /// every disk read takes it too
    levels: Arc<Mutex<Levels<K, V>>>,

    /// The at-most-one in-flight background flush
    flush_worker: Mutex<Option<JoinHandle<crate::Result<()>>>>,

    /// Seed source for fresh memory runs
    next_seed: u64,
}

impl<K: FixedKey, V: FixedValue, M: MemoryRun<K, V> + Send + 'static> Tree<K, V, M> {
    /// Opens a tree; use [`Config::open`].
    pub(crate) fn open(config: Config) -> crate::Result<Self> {
        if config.memtable_size == 0 {
            return Err(Error::InvalidConfig("memtable_size must be nonzero"));
        }
        if config.memtable_count == 0 {
            return Err(Error::InvalidConfig("memtable_count must be nonzero"));
        }
        if config.block_size == 0 {
            return Err(Error::InvalidConfig("block_size must be nonzero"));
        }
        if config.runs_per_level == 0 {
            return Err(Error::InvalidConfig("runs_per_level must be nonzero"));
        }
        if !(config.merge_fraction > 0.0 && config.merge_fraction <= 1.0) {
            return Err(Error::InvalidConfig("merge_fraction must be in (0, 1]"));
        }
        if !(config.filter_fp_rate > 0.0 && config.filter_fp_rate < 1.0) {
            return Err(Error::InvalidConfig("filter_fp_rate must be in (0, 1)"));
        }

        std::fs::create_dir_all(&config.folder)?;

        #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let num_to_merge = (config.memtable_count as f64 * config.merge_fraction).ceil() as usize;

        let levels = Levels::create(
            &config.folder,
            config.block_size,
            config.runs_per_level,
            config.merge_fraction,
            config.filter_fp_rate,
            num_to_merge * config.memtable_size,
        )?;

        let mut next_seed = 1;
        let memtables = (0..config.memtable_count)
            .map(|_| {
                let seed = next_seed;
                next_seed += 1;
                M::with_seed(seed)
            })
            .collect();

        let filters = (0..config.memtable_count)
            .map(|_| BloomFilter::with_fp_rate(config.memtable_size, config.filter_fp_rate))
            .collect();

        Ok(Self {
            num_to_merge,
            active_idx: 0,
            memtables,
            filters,
            levels: Arc::new(Mutex::new(levels)),
            flush_worker: Mutex::new(None),
            next_seed,
            config,
        })
    }

    /// Inserts a key-value pair, overwriting any older value.
    ///
    /// `K::MIN`, `K::MAX` and `V::TOMBSTONE` are reserved and must not
    /// be inserted.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a flush this write triggered (or a previous
    /// one being joined) failed.
    #[allow(clippy::indexing_slicing)]
    pub fn insert(&mut self, key: K, value: V) -> crate::Result<()> {
        if self.memtables[self.active_idx].len() >= self.config.memtable_size {
            self.active_idx += 1;
        }

        if self.active_idx == self.memtables.len() {
            self.rotate()?;
        }

        let hash = key.with_bytes(BloomFilter::get_hash);
        self.filters[self.active_idx].set_with_hash(hash);
        self.memtables[self.active_idx].insert(key, value);

        Ok(())
    }

    /// Deletes a key by inserting a tombstone that masks older values.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a flush this write triggered failed.
    pub fn remove(&mut self, key: K) -> crate::Result<()> {
        self.insert(key, V::TOMBSTONE)
    }

    /// Detaches the oldest group of memory runs and flushes it on the
    /// background worker, then refills the memory tier.
    fn rotate(&mut self) -> crate::Result<()> {
        let detached: Vec<M> = self.memtables.drain(..self.num_to_merge).collect();
        self.filters.drain(..self.num_to_merge);

        // Only one merge may be in flight
        self.join_flush_worker()?;

        log::debug!(
            "Flushing {} memory runs ({} entries) to disk",
            detached.len(),
            detached.iter().map(MemoryRun::len).sum::<usize>(),
        );

        let levels = Arc::clone(&self.levels);
        let handle = std::thread::spawn(move || flush_runs(&detached, &levels));

        #[allow(clippy::expect_used)]
        {
            *self.flush_worker.lock().expect("lock is poisoned") = Some(handle);
        }

        self.active_idx -= self.num_to_merge;

        while self.memtables.len() < self.config.memtable_count {
            let seed = self.next_seed;
            self.next_seed += 1;

            self.memtables.push(M::with_seed(seed));
            self.filters.push(BloomFilter::with_fp_rate(
                self.config.memtable_size,
                self.config.filter_fp_rate,
            ));
        }

        Ok(())
    }

    /// Joins the in-flight flush, surfacing its result.
    fn join_flush_worker(&self) -> crate::Result<()> {
        let handle = {
            #[allow(clippy::expect_used)]
            let mut worker = self.flush_worker.lock().expect("lock is poisoned");
            worker.take()
        };

        match handle {
            Some(handle) => handle.join().map_err(|_| Error::WorkerPanicked)?,
            None => Ok(()),
        }
    }

    #[allow(clippy::expect_used)]
    fn lock_levels(&self) -> MutexGuard<'_, Levels<K, V>> {
        self.levels.lock().expect("lock is poisoned")
    }

    /// Returns the value stored for `key`, if any.
    ///
    /// The newest write wins; a tombstone reads as absent.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the joined background flush failed.
    #[allow(clippy::indexing_slicing)]
    pub fn get(&self, key: K) -> crate::Result<Option<V>> {
        let hash = key.with_bytes(BloomFilter::get_hash);

        // The newest writes always sit in memory, so a memory hit
        // short-circuits before paying any synchronization cost
        for idx in (0..=self.active_idx).rev() {
            let run = &self.memtables[idx];

            let in_bounds = match (run.min_key(), run.max_key()) {
                (Some(min), Some(max)) => min <= key && key <= max,
                _ => false,
            };
            if !in_bounds || !self.filters[idx].contains_hash(hash) {
                continue;
            }

            if let Some(value) = run.get(key) {
                return Ok((value != V::TOMBSTONE).then_some(value));
            }
        }

        self.join_flush_worker()?;

        let levels = self.lock_levels();
        Ok(levels.get(key).filter(|value| *value != V::TOMBSTONE))
    }

    /// Returns all live entries with `lo <= key < hi`, in no particular
    /// order.
    ///
    /// Empty if `hi <= lo`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the joined background flush failed.
    #[allow(clippy::indexing_slicing)]
    pub fn range(&self, lo: K, hi: K) -> crate::Result<Vec<KvPair<K, V>>> {
        if hi <= lo {
            return Ok(Vec::new());
        }

        // Runs are visited newest to oldest, so the first sighting of a
        // key is its current version
        let mut seen = HashTable::with_capacity(1_024);
        let mut items = Vec::new();

        for idx in (0..=self.active_idx).rev() {
            for entry in self.memtables[idx].range(lo, hi) {
                if seen.put_if_absent(entry.key, entry.value) && entry.value != V::TOMBSTONE {
                    items.push(entry);
                }
            }
        }

        self.join_flush_worker()?;

        let levels = self.lock_levels();
        for level in levels.iter() {
            for run in level.active_runs().iter().rev() {
                let (start, end) = run.range_indexes(lo, hi);

                for idx in start..end {
                    let entry = run.entry_at(idx);
                    if seen.put_if_absent(entry.key, entry.value) && entry.value != V::TOMBSTONE {
                        items.push(entry);
                    }
                }
            }
        }

        Ok(items)
    }

    /// Counts the live entries of the whole store by scanning the full
    /// key space. Diagnostic; linear in store size.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the joined background flush failed.
    pub fn len(&self) -> crate::Result<usize> {
        Ok(self.range(K::MIN, K::MAX)?.len())
    }

    /// Returns `true` if the store holds no live entries.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the joined background flush failed.
    pub fn is_empty(&self) -> crate::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of entries in the memory tier, tombstones included.
    ///
    /// Counts runs up to and *including* the active one.
    pub fn buffer_len(&self) -> usize {
        self.memtables
            .iter()
            .take(self.active_idx + 1)
            .map(MemoryRun::len)
            .sum()
    }

    /// Number of disk tiers.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the joined background flush failed.
    pub fn disk_level_count(&self) -> crate::Result<usize> {
        self.join_flush_worker()?;
        Ok(self.lock_levels().level_count())
    }

    /// Live entry counts of the populated runs of every disk tier,
    /// shallowest tier first, oldest run first.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the joined background flush failed.
    pub fn disk_run_lengths(&self) -> crate::Result<Vec<Vec<usize>>> {
        self.join_flush_worker()?;
        Ok(self.lock_levels().run_lengths())
    }

    /// Renders every run of every tier, for debugging.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the joined background flush failed.
    pub fn dump(&self) -> crate::Result<String> {
        self.join_flush_worker()?;

        let mut out = String::new();

        out.push_str("memory buffer:\n");
        for (idx, run) in self.memtables.iter().take(self.active_idx + 1).enumerate() {
            out.push_str(&format!("  run {idx}:"));
            for entry in run.iter() {
                out.push_str(&format!(" {:?}={:?}", entry.key, entry.value));
            }
            out.push('\n');
        }

        let levels = self.lock_levels();
        for (level_idx, level) in levels.iter().enumerate() {
            out.push_str(&format!(
                "disk level {} ({} entries):\n",
                level_idx + 1,
                level.entry_count()
            ));
            for run in level.active_runs() {
                out.push_str(&format!("  run {} ({} entries):", run.run_id(), run.len()));
                for entry in run.iter() {
                    out.push_str(&format!(" {:?}={:?}", entry.key, entry.value));
                }
                out.push('\n');
            }
        }

        Ok(out)
    }
}

impl<K: FixedKey, V: FixedValue, M: MemoryRun<K, V>> Drop for Tree<K, V, M> {
    fn drop(&mut self) {
        let handle = self
            .flush_worker
            .lock()
            .ok()
            .and_then(|mut worker| worker.take());

        if let Some(handle) = handle {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("Background flush failed during shutdown: {e}"),
                Err(_) => log::error!("Background flush worker panicked"),
            }
        }
    }
}

/// Background half of a flush: sorts the detached memory runs into one
/// array and admits it to disk tier 1, cascading as needed.
fn flush_runs<K: FixedKey, V: FixedValue, M: MemoryRun<K, V>>(
    runs: &[M],
    levels: &Mutex<Levels<K, V>>,
) -> crate::Result<()> {
    let mut items: Vec<KvPair<K, V>> =
        Vec::with_capacity(runs.iter().map(MemoryRun::len).sum());

    // Newest runs first; the sort below is stable, so of any duplicate
    // key group the newest write ends up (and is kept) first
    for run in runs.iter().rev() {
        items.extend(run.iter());
    }

    items.sort();
    items.dedup_by(|dup, kept| dup.key == kept.key);

    log::trace!("Flush worker sorted {} entries", items.len());

    #[allow(clippy::expect_used)]
    let mut levels = levels.lock().expect("lock is poisoned");
    levels.push_sorted_run(&items)
}
