use clsm::{Config, Tree};
use test_log::test;

fn small_tree(folder: &std::path::Path) -> clsm::Result<Tree<i64, i64>> {
    Config::new(folder)
        .memtable_size(4)
        .memtable_count(2)
        .merge_fraction(1.0)
        .block_size(2)
        .runs_per_level(2)
        .open()
}

fn sorted(mut items: Vec<clsm::KvPair<i64, i64>>) -> Vec<(i64, i64)> {
    items.sort();
    items.into_iter().map(|kv| (kv.key, kv.value)).collect()
}

#[test]
fn tree_range_empty_interval() -> clsm::Result<()> {
    let folder = tempfile::tempdir()?;
    let mut tree = small_tree(folder.path())?;

    for key in 1..=8 {
        tree.insert(key, key)?;
    }

    assert_eq!(0, tree.range(5, 5)?.len());
    assert_eq!(0, tree.range(7, 3)?.len());
    assert_eq!(0, tree.range(100, 200)?.len());

    Ok(())
}

#[test]
fn tree_range_upper_bound_is_exclusive() -> clsm::Result<()> {
    let folder = tempfile::tempdir()?;
    let mut tree = small_tree(folder.path())?;

    // Spread across memory and disk
    for key in 1..=11 {
        tree.insert(key, key)?;
    }

    assert_eq!(
        vec![(3, 3), (4, 4), (5, 5), (6, 6)],
        sorted(tree.range(3, 7)?)
    );
    assert_eq!(vec![(1, 1), (2, 2)], sorted(tree.range(-100, 3)?));
    assert_eq!(vec![(10, 10), (11, 11)], sorted(tree.range(10, 100)?));

    Ok(())
}

#[test]
fn tree_range_spans_all_tiers() -> clsm::Result<()> {
    let folder = tempfile::tempdir()?;
    let mut tree = small_tree(folder.path())?;

    // Builds two disk tiers plus memory-resident keys
    for key in 1..=25 {
        tree.insert(key, key)?;
    }

    let all = sorted(tree.range(1, 26)?);
    assert_eq!(25, all.len());
    assert_eq!((1, 1), all[0]);
    assert_eq!((25, 25), all[24]);

    Ok(())
}

#[test]
fn tree_matches_btree_model() -> clsm::Result<()> {
    use rand::prelude::*;

    let folder = tempfile::tempdir()?;
    let mut tree = small_tree(folder.path())?;
    let mut model = std::collections::BTreeMap::<i64, i64>::new();

    let mut rng = rand::rng();

    for _ in 0..600 {
        let key = rng.random_range(1..64i64);

        if rng.random_bool(0.25) {
            tree.remove(key)?;
            model.remove(&key);
        } else {
            let value = rng.random_range(1..1_000_000i64);
            tree.insert(key, value)?;
            model.insert(key, value);
        }
    }

    for key in 0..=64 {
        assert_eq!(model.get(&key).copied(), tree.get(key)?, "key {key}");
    }

    let expected = model
        .range(16..48)
        .map(|(k, v)| (*k, *v))
        .collect::<Vec<_>>();
    assert_eq!(expected, sorted(tree.range(16, 48)?));

    assert_eq!(model.len(), tree.len()?);

    Ok(())
}
