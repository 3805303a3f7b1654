// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Fixed-width key and value codecs.
//!
//! Disk runs are densely packed arrays of `(key, value)` pairs in host
//! byte order, with no header, framing or checksum, so keys and values
//! must encode to a fixed number of bytes.

use std::fmt::Debug;

/// A fixed-width, totally ordered key scalar.
///
/// `MIN` and `MAX` are *reserved*: they are used as the skip list's head
/// and tail sentinels and must never be inserted by the application.
pub trait FixedKey: Copy + Ord + Debug + Send + Sync + 'static {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Smallest representable key (reserved).
    const MIN: Self;

    /// Largest representable key (reserved).
    const MAX: Self;

    /// Writes the native-endian encoding into `buf`.
    ///
    /// `buf` must be exactly [`Self::WIDTH`] bytes long.
    fn encode_into(self, buf: &mut [u8]);

    /// Reads a key back from its native-endian encoding.
    fn decode_from(buf: &[u8]) -> Self;

    /// Calls `f` with the encoded byte view of this key.
    ///
    /// Used for hashing (Bloom filters, scan deduplication).
    fn with_bytes<R>(self, f: impl FnOnce(&[u8]) -> R) -> R;
}

/// A fixed-width value scalar.
///
/// `TOMBSTONE` is *reserved*: it marks a deletion and must never be
/// inserted by the application.
pub trait FixedValue: Copy + Eq + Debug + Send + Sync + 'static {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Reserved value marking a deletion.
    const TOMBSTONE: Self;

    /// Writes the native-endian encoding into `buf`.
    ///
    /// `buf` must be exactly [`Self::WIDTH`] bytes long.
    fn encode_into(self, buf: &mut [u8]);

    /// Reads a value back from its native-endian encoding.
    fn decode_from(buf: &[u8]) -> Self;
}

macro_rules! impl_fixed_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl FixedKey for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();
                const MIN: Self = <$t>::MIN;
                const MAX: Self = <$t>::MAX;

                fn encode_into(self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_ne_bytes());
                }

                fn decode_from(buf: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(buf);
                    Self::from_ne_bytes(raw)
                }

                fn with_bytes<R>(self, f: impl FnOnce(&[u8]) -> R) -> R {
                    f(&self.to_ne_bytes())
                }
            }

            impl FixedValue for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();
                const TOMBSTONE: Self = <$t>::MIN;

                fn encode_into(self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_ne_bytes());
                }

                fn decode_from(buf: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(buf);
                    Self::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_fixed_int!(i32, i64, u32, u64);

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn coding_round_trip() {
        let mut buf = [0u8; 8];

        FixedKey::encode_into(-12_345i64, &mut buf);
        assert_eq!(-12_345i64, <i64 as FixedKey>::decode_from(&buf));

        FixedValue::encode_into(u64::MAX - 1, &mut buf);
        assert_eq!(u64::MAX - 1, <u64 as FixedValue>::decode_from(&buf));
    }

    #[test]
    fn coding_widths() {
        assert_eq!(4, <i32 as FixedKey>::WIDTH);
        assert_eq!(8, <i64 as FixedKey>::WIDTH);
        assert_eq!(4, <u32 as FixedValue>::WIDTH);
        assert_eq!(8, <u64 as FixedValue>::WIDTH);
    }

    #[test]
    fn coding_tombstone_is_minimum() {
        assert_eq!(i32::MIN, <i32 as FixedValue>::TOMBSTONE);
        assert_eq!(i64::MIN, <i64 as FixedValue>::TOMBSTONE);
        assert_eq!(0, <u64 as FixedValue>::TOMBSTONE);
    }
}
