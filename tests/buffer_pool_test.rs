use anyhow::Result;

mod common;
use common::create_test_buffer_pool;

use stratadb::storage::buffer::BufferPoolError;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    assert!(page_id > 0);

    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
    }

    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false);

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(page_guard.page_id, page_id);
    }

    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_page_modification() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    buffer_pool.unpin_page(page_id, true);

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(&page_guard.data[100..109], b"Test Data");
    }
    buffer_pool.unpin_page(page_id, false);
    Ok(())
}

#[test]
fn test_eviction_writes_dirty_pages_back() -> Result<()> {
    // Pool of 3 frames; creating 6 pages forces eviction of dirty pages.
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let mut page_ids = Vec::new();
    for i in 0u8..6 {
        let (page, page_id) = buffer_pool.new_page()?;
        {
            let mut page_guard = page.write();
            page_guard.data[0] = i;
        }
        buffer_pool.unpin_page(page_id, true);
        page_ids.push(page_id);
    }

    // Every page must read back with the bytes it was evicted with.
    for (i, &page_id) in page_ids.iter().enumerate() {
        let page = buffer_pool.fetch_page(page_id)?;
        {
            let page_guard = page.read();
            assert_eq!(page_guard.data[0], i as u8);
        }
        buffer_pool.unpin_page(page_id, false);
    }
    Ok(())
}

#[test]
fn test_pool_exhaustion_is_recoverable() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let mut pinned = Vec::new();
    for _ in 0..3 {
        pinned.push(buffer_pool.new_page()?);
    }

    // Every frame is pinned: no victim exists.
    match buffer_pool.new_page() {
        Err(BufferPoolError::PoolExhausted) => {}
        other => panic!("expected PoolExhausted, got {other:?}"),
    }

    // Releasing one pin makes the allocation succeed.
    let (_, victim_id) = pinned.pop().unwrap();
    buffer_pool.unpin_page(victim_id, false);
    let (_, new_id) = buffer_pool.new_page()?;
    assert!(new_id > victim_id);
    Ok(())
}

#[test]
fn test_unpin_edge_cases() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    // Not resident at all.
    assert!(!buffer_pool.unpin_page(99, false));

    let (_, page_id) = buffer_pool.new_page()?;
    assert!(buffer_pool.unpin_page(page_id, false));
    // Second unpin: pin count is already zero.
    assert!(!buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_pin_count_tracking() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    assert_eq!(buffer_pool.pin_count_of(page_id), Some(1));

    let _second = buffer_pool.fetch_page(page_id)?;
    assert_eq!(buffer_pool.pin_count_of(page_id), Some(2));

    buffer_pool.unpin_page(page_id, false);
    assert_eq!(buffer_pool.pin_count_of(page_id), Some(1));
    buffer_pool.unpin_page(page_id, false);
    assert_eq!(buffer_pool.pin_count_of(page_id), Some(0));
    Ok(())
}

#[test]
fn test_dirty_flag_is_sticky_until_flush() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, true);
    assert_eq!(buffer_pool.is_dirty(page_id), Some(true));

    // A clean unpin must not wipe the dirty flag.
    let _page = buffer_pool.fetch_page(page_id)?;
    buffer_pool.unpin_page(page_id, false);
    assert_eq!(buffer_pool.is_dirty(page_id), Some(true));

    assert!(buffer_pool.flush_page(page_id)?);
    assert_eq!(buffer_pool.is_dirty(page_id), Some(false));
    Ok(())
}

#[test]
fn test_flush_page_not_resident() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;
    assert!(!buffer_pool.flush_page(42)?);
    Ok(())
}

#[test]
fn test_flush_all_leaves_every_page_clean() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let mut page_ids = Vec::new();
    for i in 0..5u8 {
        let (page, page_id) = buffer_pool.new_page()?;
        {
            let mut page_guard = page.write();
            page_guard.data[7] = i;
        }
        buffer_pool.unpin_page(page_id, true);
        page_ids.push(page_id);
    }

    buffer_pool.flush_all()?;
    for page_id in page_ids {
        assert_eq!(buffer_pool.is_dirty(page_id), Some(false));
    }
    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;

    // Pinned pages cannot be deleted.
    assert!(!buffer_pool.delete_page(page_id)?);
    buffer_pool.unpin_page(page_id, false);
    assert!(buffer_pool.delete_page(page_id)?);

    // Deleting a page that is not resident is a no-op success.
    assert!(buffer_pool.delete_page(page_id)?);

    // Page ids are never re-issued within a run.
    let (_, next_id) = buffer_pool.new_page()?;
    assert!(next_id > page_id);
    Ok(())
}

#[test]
fn test_page_guard_unpins_on_drop() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false);

    {
        let guard = buffer_pool.fetch_page_guarded(page_id)?;
        assert_eq!(buffer_pool.pin_count_of(page_id), Some(1));
        guard.mark_dirty();
    }
    assert_eq!(buffer_pool.pin_count_of(page_id), Some(0));
    assert_eq!(buffer_pool.is_dirty(page_id), Some(true));
    Ok(())
}

#[test]
fn test_flush_then_fetch_round_trip() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[0..5].copy_from_slice(b"state");
    }
    buffer_pool.unpin_page(page_id, true);
    buffer_pool.flush_page(page_id)?;

    // Push the page out of the pool entirely, then fetch it back.
    for _ in 0..4 {
        let (_, pid) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(pid, false);
    }
    let page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = page.read();
        assert_eq!(&page_guard.data[0..5], b"state");
    }
    buffer_pool.unpin_page(page_id, false);
    Ok(())
}
