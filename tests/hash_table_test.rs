use std::sync::Arc;
use std::thread;
use anyhow::Result;

mod common;
use common::create_test_buffer_pool;

use stratadb::common::types::Rid;
use stratadb::index::hash::{ExtendibleHashTable, GenericKey};
use stratadb::storage::buffer::BufferPool;

fn create_test_hash_table(
    pool_size: usize,
) -> Result<(ExtendibleHashTable<i32, i32>, tempfile::NamedTempFile)> {
    let (buffer_pool, temp_file) = create_test_buffer_pool(pool_size)?;
    let pool: Arc<dyn BufferPool> = buffer_pool;
    Ok((ExtendibleHashTable::new(pool), temp_file))
}

#[test]
fn test_insert_and_get() -> Result<()> {
    let (table, _temp_file) = create_test_hash_table(10)?;

    for i in 0..100 {
        assert!(table.insert(&i, &(i * 10))?);
    }
    for i in 0..100 {
        assert_eq!(table.get_value(&i)?, vec![i * 10]);
    }

    // a key that was never inserted
    assert!(table.get_value(&1000)?.is_empty());
    table.verify_integrity()?;
    Ok(())
}

#[test]
fn test_duplicate_pair_rejected() -> Result<()> {
    let (table, _temp_file) = create_test_hash_table(10)?;

    assert!(table.insert(&7, &70)?);
    assert!(!table.insert(&7, &70)?);

    // same key with a different value is a separate entry
    assert!(table.insert(&7, &71)?);
    let mut values = table.get_value(&7)?;
    values.sort();
    assert_eq!(values, vec![70, 71]);
    Ok(())
}

#[test]
fn test_remove() -> Result<()> {
    let (table, _temp_file) = create_test_hash_table(10)?;

    table.insert(&1, &10)?;
    table.insert(&1, &11)?;

    assert!(table.remove(&1, &10)?);
    assert_eq!(table.get_value(&1)?, vec![11]);

    // removing it again, or removing an absent pair, fails
    assert!(!table.remove(&1, &10)?);
    assert!(!table.remove(&99, &0)?);
    Ok(())
}

#[test]
fn test_remove_restores_previous_lookups() -> Result<()> {
    let (table, _temp_file) = create_test_hash_table(10)?;

    for i in 0..50 {
        table.insert(&i, &i)?;
    }
    let before = table.get_value(&3)?;

    table.insert(&3, &999)?;
    table.remove(&3, &999)?;

    assert_eq!(table.get_value(&3)?, before);
    Ok(())
}

// Fill past one bucket's capacity and watch the directory grow, then
// drain it and watch the merges pull the depth back to zero
#[test]
fn test_split_growth_and_merge_shrink() -> Result<()> {
    common::init_test_logger();
    let (table, _temp_file) = create_test_hash_table(16)?;
    assert_eq!(table.get_global_depth()?, 0);

    let n = 1200;
    for i in 0..n {
        assert!(table.insert(&i, &i)?);
    }

    let grown_depth = table.get_global_depth()?;
    assert!(grown_depth >= 1, "1200 entries must overflow one bucket");
    table.verify_integrity()?;

    for i in 0..n {
        assert_eq!(table.get_value(&i)?, vec![i]);
    }

    for i in 0..n {
        assert!(table.remove(&i, &i)?);
    }

    assert_eq!(table.get_global_depth()?, 0);
    table.verify_integrity()?;

    for i in 0..n {
        assert!(table.get_value(&i)?.is_empty());
    }
    Ok(())
}

// After the first split both halves must hold exactly the entries that
// hash to them
#[test]
fn test_split_keeps_table_consistent() -> Result<()> {
    let (table, _temp_file) = create_test_hash_table(16)?;

    let mut inserted = Vec::new();
    let mut i = 0;
    while table.get_global_depth()? == 0 {
        assert!(table.insert(&i, &(i * 2))?);
        inserted.push(i);
        i += 1;
        assert!(i < 10_000, "table never split");
    }

    table.verify_integrity()?;
    for key in &inserted {
        assert_eq!(table.get_value(key)?, vec![key * 2]);
    }
    Ok(())
}

#[test]
fn test_depth_never_exceeds_maximum() -> Result<()> {
    let (table, _temp_file) = create_test_hash_table(32)?;

    // far more than one bucket can hold at every depth we will reach in
    // a test; inserts may start failing only at the depth ceiling
    for i in 0..5000 {
        table.insert(&i, &i)?;
    }
    assert!(table.get_global_depth()? <= 9);
    table.verify_integrity()?;
    Ok(())
}

#[test]
fn test_generic_key_with_rid_values() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;
    let pool: Arc<dyn BufferPool> = buffer_pool;
    let table = ExtendibleHashTable::<GenericKey<8>, Rid>::new(pool);

    for i in 0u32..200 {
        let key = GenericKey::<8>::from_slice(format!("key{:04}", i).as_bytes());
        assert!(table.insert(&key, &Rid::new(i as i32, i))?);
    }

    let probe = GenericKey::<8>::from_slice(b"key0042");
    assert_eq!(table.get_value(&probe)?, vec![Rid::new(42, 42)]);

    assert!(table.remove(&probe, &Rid::new(42, 42))?);
    assert!(table.get_value(&probe)?.is_empty());
    table.verify_integrity()?;
    Ok(())
}

#[test]
fn test_concurrent_inserts_and_lookups() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let pool: Arc<dyn BufferPool> = buffer_pool;
    let table = Arc::new(ExtendibleHashTable::<i32, i32>::new(pool));

    let mut handles = Vec::new();
    for t in 0..4 {
        let table = table.clone();
        handles.push(thread::spawn(move || {
            let base = t * 500;
            for i in base..base + 500 {
                table.insert(&i, &i).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    table.verify_integrity()?;
    for i in 0..2000 {
        assert_eq!(table.get_value(&i)?, vec![i]);
    }
    Ok(())
}
