// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-size bit array backed by 64-bit words
#[derive(Debug, Eq, PartialEq)]
pub struct BitArray(Box<[u64]>);

impl BitArray {
    /// Constructs a zeroed bit array holding at least `bit_count` bits.
    #[must_use]
    pub fn with_bit_count(bit_count: usize) -> Self {
        let words = bit_count.div_ceil(WORD_BITS);
        Self(vec![0; words].into_boxed_slice())
    }

    /// Sets the i-th bit
    pub fn enable(&mut self, idx: usize) {
        let word = self
            .0
            .get_mut(idx / WORD_BITS)
            .expect("bit index should be in bounds");

        *word |= 1 << (idx % WORD_BITS);
    }

    /// Gets the i-th bit
    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        let word = self
            .0
            .get(idx / WORD_BITS)
            .expect("bit index should be in bounds");

        (*word >> (idx % WORD_BITS)) & 1 == 1
    }
}
