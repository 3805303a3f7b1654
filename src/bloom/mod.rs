// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod bit_array;

use bit_array::BitArray;

/// Two hashes that are used for double hashing
pub type CompositeHash = (u64, u64);

/// A standard bloom filter
///
/// Every run (memory or disk) carries one filter so negative lookups can
/// skip the run without touching it.
///
/// The filter uses double hashing instead of `k` hash functions: bit
/// position `i` is `(h1 + i * h2) mod m`, with `(h1, h2)` being the two
/// halves of the 128-bit xxh3 of the key bytes.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct BloomFilter {
    /// Bit vector
    inner: BitArray,

    /// Bit count
    m: u64,

    /// Number of hash functions
    k: u64,
}

impl BloomFilter {
    /// Constructs a bloom filter that can hold `n` items
    /// while maintaining a certain false positive rate `fpr`.
    #[must_use]
    pub fn with_fp_rate(n: usize, fpr: f32) -> Self {
        assert!(n > 0);

        // NOTE: Some sensible minimum
        let fpr = f64::from(fpr).max(0.000_001);

        let m = Self::calculate_m(n, fpr);

        #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
        let k = ((m as f64 / n as f64) * std::f64::consts::LN_2).ceil() as u64;

        Self {
            inner: BitArray::with_bit_count(m),
            m: m as u64,
            k: k.max(1),
        }
    }

    /// Derives the bit count from the expected item count and the target
    /// false positive rate: `m = ceil(-n * ln(p) / ln(2)^2)`.
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
    fn calculate_m(n: usize, fp_rate: f64) -> usize {
        let ln2_squared = std::f64::consts::LN_2.powi(2);
        (-(n as f64) * fp_rate.ln() / ln2_squared).ceil() as usize
    }

    /// Returns the amount of hashes used per lookup.
    #[must_use]
    pub fn hash_fn_count(&self) -> usize {
        self.k as usize
    }

    /// Returns `true` if the hash may be contained.
    ///
    /// Will never have a false negative.
    #[must_use]
    pub fn contains_hash(&self, (h1, h2): CompositeHash) -> bool {
        (0..self.k).all(|i| {
            let idx = h1.wrapping_add(i.wrapping_mul(h2)) % self.m;

            // NOTE: in bounds because of modulo
            self.inner.get(idx as usize)
        })
    }

    /// Returns `true` if the item may be contained.
    ///
    /// Will never have a false negative.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.contains_hash(Self::get_hash(key))
    }

    /// Adds the key to the filter.
    pub fn set(&mut self, key: &[u8]) {
        self.set_with_hash(Self::get_hash(key));
    }

    /// Adds the hashed key to the filter.
    pub fn set_with_hash(&mut self, (h1, h2): CompositeHash) {
        for i in 0..self.k {
            let idx = h1.wrapping_add(i.wrapping_mul(h2)) % self.m;

            self.inner.enable(idx as usize);
        }
    }

    /// Gets the hash of a key.
    #[must_use]
    pub fn get_hash(key: &[u8]) -> CompositeHash {
        let h0 = xxhash_rust::xxh3::xxh3_128(key);
        let h1 = (h0 >> 64) as u64;
        let h2 = h0 as u64;
        (h1, h2)
    }
}
