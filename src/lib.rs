// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An embedded, single-process, tiered-compaction LSM-tree over
//! fixed-width keys and values.
//!
//! ##### NOTE
//!
//! > This crate does not ship a write-ahead log, so data only lives as
//! > long as the process (or the [`Tree`] value) does. It is a storage
//! > *engine*, not a database.
//!
//! ##### About
//!
//! Writes enter an in-memory tier of sorted runs (skip lists). When all
//! memory runs are full, the oldest group is sorted and pushed to disk as
//! one immutable, memory-mapped sorted run carrying a sparse fence-pointer
//! index and a Bloom filter. When a disk tier fills up, its oldest runs are
//! k-way merged into a single larger run in the next tier by a background
//! worker ("cascade"). Reads consult runs newest to oldest, so the most
//! recent write for a key always wins.
//!
//! Deletes insert a *tombstone* (a reserved value) that masks older writes;
//! tombstones are garbage-collected when a cascade lands in the deepest
//! tier.
//!
//! Keys and values are fixed-width scalars (see [`FixedKey`] and
//! [`FixedValue`]). The sentinels `K::MIN`, `K::MAX` and `V::TOMBSTONE`
//! are reserved and may not be stored by the application.
//!
//! # Example usage
//!
//! ```
//! use clsm::{Config, Tree};
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! // A tree is a single ordered keyspace
//! let mut tree: Tree<i64, i64> = Config::new(folder.path()).open()?;
//!
//! tree.insert(1, 10)?;
//! tree.insert(2, 20)?;
//! tree.insert(3, 30)?;
//!
//! assert_eq!(Some(20), tree.get(2)?);
//! assert_eq!(None, tree.get(4)?);
//!
//! // Deletes mask older writes
//! tree.remove(2)?;
//! assert_eq!(None, tree.get(2)?);
//!
//! // Half-open range scan (order unspecified)
//! let items = tree.range(1, 100)?;
//! assert_eq!(2, items.len());
//! #
//! # Ok::<(), clsm::Error>(())
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

mod binary_search;

#[doc(hidden)]
pub mod bloom;

mod coding;
mod config;
mod error;
mod hash_table;

#[doc(hidden)]
pub mod levels;

mod memtable;

#[doc(hidden)]
pub mod segment;

mod tree;
mod value;

pub use {
    coding::{FixedKey, FixedValue},
    config::Config,
    error::{Error, Result},
    memtable::{MemoryRun, SkipList},
    tree::Tree,
    value::KvPair,
};
