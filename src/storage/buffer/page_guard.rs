use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::manager::BufferPoolManager;

/// Scoped pin on a buffer pool page.
///
/// Fetching through a guard pairs every pin with exactly one unpin: the
/// guard unpins when dropped, passing along whether `mark_dirty` was
/// called. Manual pin/unpin bookkeeping is the classic source of buffer
/// pool bugs; the index layer only ever pins through guards.
pub struct PageGuard {
    bpm: Arc<BufferPoolManager>,
    page: PagePtr,
    page_id: PageId,
    dirty: AtomicBool,
}

impl PageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        Self {
            bpm,
            page,
            page_id,
            dirty: AtomicBool::new(false),
        }
    }

    /// The guarded page. Latch it through the returned pointer's `RwLock`.
    pub fn page(&self) -> &PagePtr {
        &self.page
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Record that the page content was modified; the unpin on drop will
    /// carry the dirty flag to the frame.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, self.dirty.load(Ordering::Relaxed));
    }
}
