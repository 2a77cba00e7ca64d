use anyhow::Result;

mod common;
use common::create_test_parallel_pool;

use stratadb::storage::buffer::{BufferPool, BufferPoolError};

#[test]
fn test_pool_size_sums_instances() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(3, 4)?;
    assert_eq!(pool.num_instances(), 3);
    assert_eq!(pool.pool_size(), 12);
    Ok(())
}

// Round-robin allocation walks the instances, and every allocated id
// lands in its instance's congruence class
#[test]
fn test_round_robin_allocation_strides_ids() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(3, 4)?;

    let mut page_ids = Vec::new();
    for _ in 0..6 {
        let (_page, page_id) = pool.new_page()?;
        page_ids.push(page_id);
    }

    // first sweep hits instances 0, 1, 2 in order
    assert_eq!(page_ids[0] % 3, 0);
    assert_eq!(page_ids[1] % 3, 1);
    assert_eq!(page_ids[2] % 3, 2);
    // second sweep wraps around
    assert_eq!(page_ids[3] % 3, 0);
    assert_eq!(page_ids[4] % 3, 1);
    assert_eq!(page_ids[5] % 3, 2);

    for page_id in page_ids {
        pool.unpin_page(page_id, false)?;
    }
    Ok(())
}

// Operations on a page route back to the instance that allocated it
#[test]
fn test_routing_round_trip() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(4, 3)?;

    let mut page_ids = Vec::new();
    for i in 0u8..8 {
        let (page, page_id) = pool.new_page()?;
        page.write().data[0] = i + 1;
        pool.unpin_page(page_id, true)?;
        page_ids.push(page_id);
    }

    for (i, page_id) in page_ids.iter().enumerate() {
        let fetched = pool.fetch_page(*page_id)?;
        assert_eq!(fetched.read().page_id, *page_id);
        assert_eq!(fetched.read().data[0], i as u8 + 1);
        pool.unpin_page(*page_id, false)?;
    }

    pool.flush_all_pages()?;
    for page_id in page_ids {
        pool.delete_page(page_id)?;
    }
    Ok(())
}

// new_page sweeps every instance before giving up, and a single free
// frame anywhere is enough to succeed
#[test]
fn test_new_page_sweeps_all_instances() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(2, 1)?;

    let (_p0, id0) = pool.new_page()?;
    let (_p1, id1) = pool.new_page()?;

    // both instances exhausted
    assert!(matches!(
        pool.new_page(),
        Err(BufferPoolError::BufferPoolFull)
    ));

    // free one frame; the sweep finds it regardless of cursor position
    pool.unpin_page(id0, false)?;
    let (_p2, id2) = pool.new_page()?;
    assert_eq!(id2 % 2, id0 % 2);

    pool.unpin_page(id1, false)?;
    pool.unpin_page(id2, false)?;
    Ok(())
}
