use std::sync::Arc;
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::SeedableRng;

mod common;
use common::{create_temp_db_file, create_test_buffer_pool};

use stratadb::common::types::Rid;
use stratadb::index::btree::BPlusTree;
use stratadb::storage::buffer::{BufferPoolConfig, BufferPoolManager};

fn rid_for(key: i64) -> Rid {
    Rid::new(1000 + key as u32, key as u32)
}

#[test]
fn test_insert_then_get() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let index = BPlusTree::<i64>::create("pk", buffer_pool, 64, 64)?;

    assert!(index.is_empty()?);
    assert!(index.insert(&42, rid_for(42))?);
    assert!(!index.is_empty()?);

    assert_eq!(index.get_value(&42)?, vec![rid_for(42)]);
    assert_eq!(index.get_value(&17)?, Vec::<Rid>::new());
    Ok(())
}

#[test]
fn test_duplicate_insert_is_rejected() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let index = BPlusTree::<i64>::create("pk", buffer_pool, 4, 4)?;

    assert!(index.insert(&7, rid_for(7))?);
    assert!(!index.insert(&7, Rid::new(9, 9))?);
    // The original mapping is untouched.
    assert_eq!(index.get_value(&7)?, vec![rid_for(7)]);
    Ok(())
}

#[test]
fn test_remove_round_trip() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let index = BPlusTree::<i64>::create("pk", buffer_pool, 4, 4)?;

    index.insert(&5, rid_for(5))?;
    index.remove(&5)?;
    assert_eq!(index.get_value(&5)?, Vec::<Rid>::new());

    // Removing again is a no-op, as is removing from an empty subtree.
    index.remove(&5)?;
    index.remove(&99)?;
    Ok(())
}

#[test]
fn test_sequential_insert_splits_root() -> Result<()> {
    // Fanout (3, 3): inserting 1..=5 exercises the first root split.
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let index = BPlusTree::<i64>::create("pk", buffer_pool, 3, 3)?;

    for key in 1..=3i64 {
        index.insert(&key, rid_for(key))?;
    }
    // Still a single full root leaf.
    assert_eq!(index.leaf_keys()?, vec![vec![1, 2, 3]]);

    // The fourth insert splits the root leaf around pivot 3.
    index.insert(&4, rid_for(4))?;
    assert_eq!(index.leaf_keys()?, vec![vec![1, 2], vec![3, 4]]);
    index.verify_integrity()?;

    // The fifth lands in the right leaf without another split.
    index.insert(&5, rid_for(5))?;
    assert_eq!(index.leaf_keys()?, vec![vec![1, 2], vec![3, 4, 5]]);
    index.verify_integrity()?;

    for key in 1..=5i64 {
        assert_eq!(index.get_value(&key)?, vec![rid_for(key)]);
    }
    Ok(())
}

#[test]
fn test_delete_merges_and_collapses_root() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let index = BPlusTree::<i64>::create("pk", buffer_pool, 3, 3)?;

    for key in 1..=4i64 {
        index.insert(&key, rid_for(key))?;
    }
    assert_eq!(index.leaf_keys()?, vec![vec![1, 2], vec![3, 4]]);
    let old_root = index.root_page_id();

    // Deleting 2 under-fills the left leaf; its only sibling cannot spare
    // an entry, so the leaves merge and the root collapses back to a leaf.
    index.remove(&2)?;
    assert_eq!(index.leaf_keys()?, vec![vec![1, 3, 4]]);
    assert_ne!(index.root_page_id(), old_root);
    index.verify_integrity()?;

    for (key, expect) in [(1, true), (2, false), (3, true), (4, true)] {
        assert_eq!(!index.get_value(&key)?.is_empty(), expect);
    }
    Ok(())
}

#[test]
fn test_delete_borrows_from_right_sibling() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let index = BPlusTree::<i64>::create("pk", buffer_pool, 3, 3)?;

    for key in 1..=5i64 {
        index.insert(&key, rid_for(key))?;
    }
    assert_eq!(index.leaf_keys()?, vec![vec![1, 2], vec![3, 4, 5]]);

    // Removing 1 under-fills the left leaf; the right sibling has a spare.
    index.remove(&1)?;
    assert_eq!(index.leaf_keys()?, vec![vec![2, 3], vec![4, 5]]);
    index.verify_integrity()?;
    Ok(())
}

#[test]
fn test_delete_borrows_from_left_sibling() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let index = BPlusTree::<i64>::create("pk", buffer_pool, 3, 3)?;

    for key in 1..=5i64 {
        index.insert(&key, rid_for(key))?;
    }
    index.insert(&0, rid_for(0))?;
    assert_eq!(index.leaf_keys()?, vec![vec![0, 1, 2], vec![3, 4, 5]]);

    index.remove(&4)?;
    index.remove(&5)?;
    // The right leaf is down to [3]; it borrows 2 from the left.
    assert_eq!(index.leaf_keys()?, vec![vec![0, 1], vec![2, 3]]);
    index.verify_integrity()?;
    Ok(())
}

#[test]
fn test_shuffled_workload_keeps_invariants() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(100)?;
    let index = BPlusTree::<i64>::create("pk", buffer_pool, 4, 4)?;

    let mut keys: Vec<i64> = (0..200).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xB17E);
    keys.shuffle(&mut rng);

    for &key in &keys {
        index.insert(&key, rid_for(key))?;
    }
    index.verify_integrity()?;

    let scanned: Vec<i64> = index.iter()?.map(|(k, _)| k).collect();
    assert_eq!(scanned, (0..200).collect::<Vec<_>>());

    // Delete the odd keys in a different shuffled order.
    let mut odds: Vec<i64> = (0..200).filter(|k| k % 2 == 1).collect();
    odds.shuffle(&mut rng);
    for &key in &odds {
        index.remove(&key)?;
    }
    index.verify_integrity()?;

    for key in 0..200i64 {
        let expect_present = key % 2 == 0;
        assert_eq!(!index.get_value(&key)?.is_empty(), expect_present, "key {key}");
    }
    let scanned: Vec<i64> = index.iter()?.map(|(k, _)| k).collect();
    assert_eq!(scanned, (0..200).filter(|k| k % 2 == 0).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_delete_everything_then_reuse() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let index = BPlusTree::<i64>::create("pk", buffer_pool, 3, 3)?;

    for key in 0..30i64 {
        index.insert(&key, rid_for(key))?;
    }
    for key in 0..30i64 {
        index.remove(&key)?;
    }
    index.verify_integrity()?;
    assert!(index.is_empty()?);
    assert_eq!(index.iter()?.count(), 0);

    // The tree stays usable after draining.
    for key in 0..10i64 {
        index.insert(&key, rid_for(key))?;
    }
    index.verify_integrity()?;
    assert_eq!(index.iter()?.count(), 10);
    Ok(())
}

#[test]
fn test_iterator_positioning() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let index = BPlusTree::<i64>::create("pk", buffer_pool, 3, 3)?;

    // Empty tree: both iterators are immediately exhausted.
    assert_eq!(index.iter()?.next(), None);
    assert_eq!(index.iter_from(&5)?.next(), None);

    for key in [10i64, 20, 30, 40, 50] {
        index.insert(&key, rid_for(key))?;
    }

    let from_exact: Vec<i64> = index.iter_from(&30)?.map(|(k, _)| k).collect();
    assert_eq!(from_exact, vec![30, 40, 50]);

    // Positioning between keys starts at the next larger one.
    let from_gap: Vec<i64> = index.iter_from(&25)?.map(|(k, _)| k).collect();
    assert_eq!(from_gap, vec![30, 40, 50]);

    // Past the maximum key the scan is empty.
    assert_eq!(index.iter_from(&99)?.next(), None);

    // Values ride along with the keys.
    let (key, rid) = index.iter()?.next().unwrap();
    assert_eq!((key, rid), (10, rid_for(10)));
    Ok(())
}

#[test]
fn test_reopen_from_header_page() -> Result<()> {
    let (_temp_file, path) = create_temp_db_file()?;
    let config = BufferPoolConfig {
        pool_size: 50,
        replacer_k: 2,
    };

    {
        let buffer_pool = Arc::new(BufferPoolManager::new(config, &path)?);
        let index = BPlusTree::<i64>::create("orders_pk", Arc::clone(&buffer_pool), 4, 4)?;
        for key in 0..64i64 {
            index.insert(&key, rid_for(key))?;
        }
        buffer_pool.flush_all()?;
    }

    // A fresh buffer pool over the same file finds the root through the
    // header page.
    let buffer_pool = Arc::new(BufferPoolManager::new(config, &path)?);
    let index = BPlusTree::<i64>::open("orders_pk", Arc::clone(&buffer_pool), 4, 4)?;
    index.verify_integrity()?;
    for key in 0..64i64 {
        assert_eq!(index.get_value(&key)?, vec![rid_for(key)]);
    }

    assert!(BPlusTree::<i64>::open("missing", buffer_pool, 4, 4).is_err());
    Ok(())
}

#[test]
fn test_concurrent_inserts() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(100)?;
    let index = Arc::new(BPlusTree::<i64>::create("pk", buffer_pool, 4, 4)?);

    let mut handles = Vec::new();
    for t in 0..4i64 {
        let index = Arc::clone(&index);
        handles.push(std::thread::spawn(move || -> Result<()> {
            for i in 0..64i64 {
                let key = t * 64 + i;
                index.insert(&key, rid_for(key))?;
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().unwrap()?;
    }

    index.verify_integrity()?;
    let scanned: Vec<i64> = index.iter()?.map(|(k, _)| k).collect();
    assert_eq!(scanned, (0..256).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_concurrent_readers_during_inserts() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(100)?;
    let index = Arc::new(BPlusTree::<i64>::create("pk", buffer_pool, 4, 4)?);

    for key in 0..128i64 {
        index.insert(&key, rid_for(key))?;
    }

    let writer = {
        let index = Arc::clone(&index);
        std::thread::spawn(move || -> Result<()> {
            for key in 128..256i64 {
                index.insert(&key, rid_for(key))?;
            }
            Ok(())
        })
    };
    let reader = {
        let index = Arc::clone(&index);
        std::thread::spawn(move || -> Result<()> {
            // Keys below 128 are stable and must always be visible.
            for round in 0..8 {
                for key in (0..128i64).step_by(16) {
                    let hit = index.get_value(&key)?;
                    assert_eq!(hit, vec![rid_for(key)], "round {round}");
                }
            }
            Ok(())
        })
    };

    writer.join().unwrap()?;
    reader.join().unwrap()?;
    index.verify_integrity()?;
    Ok(())
}
