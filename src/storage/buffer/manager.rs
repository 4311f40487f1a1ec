use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use parking_lot::{Mutex, MutexGuard};
use log::debug;

use crate::common::types::{Frame, FrameId, FramePtr, Page, PageId, PagePtr, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_guard::PageGuard;
use crate::storage::buffer::page_table::ExtendibleHashTable;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

const PAGE_TABLE_BUCKET_SIZE: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub pool_size: usize,
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            replacer_k: 2,
        }
    }
}

/// State guarded by the buffer pool's coarse latch. Disk I/O happens while
/// this latch is held, trading throughput for a simple correctness story.
struct PoolInner {
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
    next_page_id: PageId,
}

/// Buffer pool manager: a bounded page cache over the disk file.
///
/// Residency is tracked by an extendible hash table mapping page ids to
/// frame ids, eviction candidates are ranked by an LRU-K replacer, and a
/// free list recycles frames whose pages were deleted. A frame with a
/// positive pin count is never evictable.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FramePtr>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    inner: Mutex<PoolInner>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(config: BufferPoolConfig, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        let mut frames = Vec::with_capacity(config.pool_size);
        let mut free_list = VecDeque::with_capacity(config.pool_size);

        for frame_id in 0..config.pool_size {
            let page = Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Arc::new(parking_lot::RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }

        // Resume the monotonic page id sequence from the file length so a
        // reopened database never re-issues ids.
        let next_page_id = disk_manager.num_pages()? + 1;

        Ok(Self {
            pool_size: config.pool_size,
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            inner: Mutex::new(PoolInner {
                free_list,
                replacer: LruKReplacer::new(config.replacer_k),
                next_page_id,
            }),
            disk_manager,
        })
    }

    /// Allocate a brand-new page, pinned in a frame. Fails with
    /// `PoolExhausted` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();
        let frame_id = self.acquire_frame(&mut inner)?;

        let page_id = inner.next_page_id;
        inner.next_page_id += 1;

        self.page_table.insert(page_id, frame_id)?;
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        let mut frame = self.frames[frame_id].write();
        {
            let mut page = frame.page.write();
            page.reset();
            page.page_id = page_id;
        }
        frame.pin_count = 1;
        frame.is_dirty = false;

        Ok((frame.page.clone(), page_id))
    }

    /// Fetch a page, reading it from disk on a miss. The returned page is
    /// pinned; callers must `unpin_page` when done.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            inner.replacer.record_access(frame_id);
            inner.replacer.set_evictable(frame_id, false);
            let mut frame = self.frames[frame_id].write();
            frame.pin_count += 1;
            return Ok(frame.page.clone());
        }

        let frame_id = self.acquire_frame(&mut inner)?;

        // Read before installing the mapping so a disk failure leaves the
        // pool consistent.
        let mut buf = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_manager.read_page(page_id, &mut buf) {
            inner.free_list.push_front(frame_id);
            return Err(e.into());
        }

        self.page_table.insert(page_id, frame_id)?;
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        let mut frame = self.frames[frame_id].write();
        {
            let mut page = frame.page.write();
            page.data = buf;
            page.page_id = page_id;
        }
        frame.pin_count = 1;
        frame.is_dirty = false;

        Ok(frame.page.clone())
    }

    /// Drop one pin on a page. `is_dirty` is OR'd into the frame's flag:
    /// once dirty, a page stays dirty until flushed. Returns false if the
    /// page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };

        let mut frame = self.frames[frame_id].write();
        if frame.pin_count == 0 {
            return false;
        }
        frame.pin_count -= 1;
        frame.is_dirty |= is_dirty;
        if frame.pin_count == 0 {
            inner.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write a page's bytes to disk regardless of the dirty flag and mark
    /// it clean. Returns `Ok(false)` if the page is not resident.
    ///
    /// The snapshot is taken outside the pool latch: flushing must not hold
    /// the latch while waiting on a page that a tree thread has latched,
    /// because that thread may itself be blocked on the pool latch.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let page_ptr = {
            let _inner = self.inner.lock();
            let Some(frame_id) = self.page_table.find(&page_id) else {
                return Ok(false);
            };
            self.frames[frame_id].read().page.clone()
        };

        let snapshot = {
            let page = page_ptr.read();
            if page.page_id != page_id {
                // Evicted while we were waiting; the eviction wrote it back.
                return Ok(true);
            }
            page.data
        };
        self.disk_manager.write_page(page_id, &snapshot)?;

        let _inner = self.inner.lock();
        if let Some(frame_id) = self.page_table.find(&page_id) {
            self.frames[frame_id].write().is_dirty = false;
        }
        Ok(true)
    }

    /// Flush every resident page.
    pub fn flush_all(&self) -> Result<(), BufferPoolError> {
        let resident: Vec<PageId> = {
            let _inner = self.inner.lock();
            self.page_table.entries().into_iter().map(|(pid, _)| pid).collect()
        };
        for page_id in resident {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drop a page from the pool and recycle its frame. A page that is not
    /// resident deletes trivially; a pinned page cannot be deleted
    /// (`Ok(false)`). Page ids are never re-issued within a run.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut inner = self.inner.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(true);
        };

        let mut frame = self.frames[frame_id].write();
        if frame.pin_count > 0 {
            return Ok(false);
        }

        self.page_table.remove(&page_id);
        inner.replacer.remove(frame_id);

        {
            let mut page = frame.page.write();
            page.reset();
        }
        frame.is_dirty = false;
        inner.free_list.push_back(frame_id);

        Ok(true)
    }

    /// Fetch a page wrapped in a scoped guard that unpins on drop.
    pub fn fetch_page_guarded(self: &Arc<Self>, page_id: PageId) -> Result<PageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(PageGuard::new(Arc::clone(self), page, page_id))
    }

    /// Allocate a new page wrapped in a scoped guard that unpins on drop.
    pub fn new_page_guarded(self: &Arc<Self>) -> Result<PageGuard, BufferPoolError> {
        let (page, page_id) = self.new_page()?;
        Ok(PageGuard::new(Arc::clone(self), page, page_id))
    }

    /// Pin count of a resident page. Test and assertion support.
    pub fn pin_count_of(&self, page_id: PageId) -> Option<u32> {
        let _inner = self.inner.lock();
        let frame_id = self.page_table.find(&page_id)?;
        Some(self.frames[frame_id].read().pin_count)
    }

    /// Dirty flag of a resident page. Test and assertion support.
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let _inner = self.inner.lock();
        let frame_id = self.page_table.find(&page_id)?;
        Some(self.frames[frame_id].read().is_dirty)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// The id the next `new_page` call will hand out. Lets callers detect a
    /// brand-new database before any page exists.
    pub fn next_page_id(&self) -> PageId {
        self.inner.lock().next_page_id
    }

    /// Pick a frame to (re)use: free list first, then eviction. Writes a
    /// dirty victim back to disk and drops its page-table mapping.
    fn acquire_frame(&self, inner: &mut MutexGuard<'_, PoolInner>) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = inner.replacer.evict().ok_or(BufferPoolError::PoolExhausted)?;

        let mut frame = self.frames[frame_id].write();
        let victim_page_id = frame.page.read().page_id;
        if victim_page_id != INVALID_PAGE_ID {
            if frame.is_dirty {
                debug!("evicting dirty page {victim_page_id} from frame {frame_id}");
                let page = frame.page.read();
                self.disk_manager.write_page(victim_page_id, &page.data)?;
            }
            self.page_table.remove(&victim_page_id);
        }
        frame.is_dirty = false;

        Ok(frame_id)
    }
}
