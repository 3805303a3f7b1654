// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// A key-value pair.
///
/// Pairs compare equal only if both key and value match, but *order* is
/// determined by the key alone, so sorting a run of pairs never looks at
/// values.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KvPair<K, V> {
    /// User key
    pub key: K,

    /// User value
    pub value: V,
}

impl<K: Ord, V: Eq> PartialOrd for KvPair<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, V: Eq> Ord for KvPair<K, V> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn kv_pair_eq_considers_value() {
        let a = KvPair { key: 1, value: 2 };
        let b = KvPair { key: 1, value: 3 };

        assert_ne!(a, b);
        assert_eq!(a, KvPair { key: 1, value: 2 });
    }

    #[test]
    fn kv_pair_order_ignores_value() {
        let mut items = [
            KvPair { key: 3, value: 0 },
            KvPair { key: 1, value: 9 },
            KvPair { key: 2, value: 5 },
        ];
        items.sort();

        assert_eq!([1, 2, 3], items.map(|kv| kv.key));
    }
}
