use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

use crate::common::types::{Page, PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header::{self, HEADER_PAGE_ID};
use crate::index::btree::internal::InternalView;
use crate::index::btree::key::KeyCodec;
use crate::index::btree::layout;
use crate::index::btree::leaf::LeafView;
use crate::storage::buffer::{BufferPoolManager, PageGuard};

pub(crate) type PageReadLatch = ArcRwLockReadGuard<RawRwLock, Page>;
pub(crate) type PageWriteLatch = ArcRwLockWriteGuard<RawRwLock, Page>;

/// A held page on the write-crabbing path: the write latch plus the pin
/// guard. The latch comes first so that any drop releases it before the
/// pin: a latched page is therefore always pinned, which keeps latched
/// pages out of the evictor's reach.
pub(crate) type HeldPage = (PageWriteLatch, PageGuard);

pub(crate) fn release_held(path: &mut Vec<HeldPage>) {
    while let Some((latch, guard)) = path.pop() {
        drop(latch);
        drop(guard);
    }
}

/// Concurrent on-disk B+tree mapping fixed-width keys to record ids.
///
/// Pages are reached exclusively through the buffer pool by page id; the
/// per-page `RwLock` serves as the latch for crabbing. `root` is the
/// tree-wide latch: it is only ever write-held to create the tree or to
/// change which page is the root.
pub struct BPlusTree<K: KeyCodec> {
    index_name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) root: RwLock<PageId>,
    pub(crate) leaf_max_size: u32,
    pub(crate) internal_max_size: u32,
    pub(crate) _marker: PhantomData<K>,
}

impl<K: KeyCodec> BPlusTree<K> {
    /// Register a new (empty) index under `name`. The root page is
    /// allocated lazily on first insert.
    pub fn create(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self, BTreeError> {
        let name = name.into();
        Self::validate_fanout(leaf_max_size, internal_max_size)?;

        let tree = Self {
            index_name: name,
            buffer_pool,
            root: RwLock::new(INVALID_PAGE_ID),
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        };
        tree.update_header_root(INVALID_PAGE_ID)?;
        Ok(tree)
    }

    /// Reopen an index previously registered under `name`.
    pub fn open(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self, BTreeError> {
        let name = name.into();
        Self::validate_fanout(leaf_max_size, internal_max_size)?;

        let guard = Self::header_guard(&buffer_pool)?;
        let root = {
            let page = guard.page().read();
            header::lookup_root(&page, &name).ok_or_else(|| BTreeError::IndexNotFound(name.clone()))?
        };
        drop(guard);

        Ok(Self {
            index_name: name,
            buffer_pool,
            root: RwLock::new(root),
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    fn validate_fanout(leaf_max_size: u32, internal_max_size: u32) -> Result<(), BTreeError> {
        if leaf_max_size < 2 {
            return Err(BTreeError::InvalidFanout(format!(
                "leaf max size {leaf_max_size} must be at least 2"
            )));
        }
        if internal_max_size < 3 {
            return Err(BTreeError::InvalidFanout(format!(
                "internal max size {internal_max_size} must be at least 3"
            )));
        }
        let leaf_bytes = layout::LEAF_HEADER_SIZE + leaf_max_size as usize * (K::ENCODED_LEN + 8);
        // Internal pages reserve one spare slot for the insert-then-split
        // sequence.
        let internal_bytes =
            layout::COMMON_HEADER_SIZE + (internal_max_size as usize + 1) * (K::ENCODED_LEN + 4);
        if leaf_bytes > PAGE_SIZE || internal_bytes > PAGE_SIZE {
            return Err(BTreeError::InvalidFanout(format!(
                "fanout ({leaf_max_size}, {internal_max_size}) does not fit a {PAGE_SIZE}-byte page"
            )));
        }
        Ok(())
    }

    /// Fetch the header page, allocating it if the database is brand new.
    fn header_guard(buffer_pool: &Arc<BufferPoolManager>) -> Result<PageGuard, BTreeError> {
        if buffer_pool.next_page_id() == HEADER_PAGE_ID {
            let guard = buffer_pool.new_page_guarded()?;
            debug_assert_eq!(guard.page_id(), HEADER_PAGE_ID);
            guard.mark_dirty();
            Ok(guard)
        } else {
            Ok(buffer_pool.fetch_page_guarded(HEADER_PAGE_ID)?)
        }
    }

    /// Persist a root change into the header page.
    pub(crate) fn update_header_root(&self, root: PageId) -> Result<(), BTreeError> {
        let guard = Self::header_guard(&self.buffer_pool)?;
        {
            let mut page = guard.page().write();
            header::upsert_root(&mut page, &self.index_name, root)?;
        }
        guard.mark_dirty();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.index_name
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        let root_guard = self.root.read();
        let root_id = *root_guard;
        if root_id == INVALID_PAGE_ID {
            return Ok(true);
        }
        let guard = self.buffer_pool.fetch_page_guarded(root_id)?;
        let page = guard.page().read();
        Ok(layout::is_leaf(&page.data) && layout::size(&page.data) == 0)
    }

    pub(crate) fn leaf_min_size(&self) -> usize {
        (self.leaf_max_size as usize).div_ceil(2)
    }

    pub(crate) fn internal_min_size(&self) -> usize {
        (self.internal_max_size as usize).div_ceil(2)
    }

    /// Point lookup. Descends with read latches, releasing each parent as
    /// soon as the child latch is held.
    pub fn get_value(&self, key: &K) -> Result<Vec<Rid>, BTreeError> {
        let root_guard = self.root.read();
        let root_id = *root_guard;
        if root_id == INVALID_PAGE_ID {
            return Ok(Vec::new());
        }

        let mut guard = self.buffer_pool.fetch_page_guarded(root_id)?;
        let mut latch: PageReadLatch = guard.page().read_arc();
        drop(root_guard);

        loop {
            if layout::is_leaf(&latch.data) {
                let leaf = LeafView::<K>::new(&latch);
                let result = leaf.lookup(key).map(|rid| vec![rid]).unwrap_or_default();
                drop(latch);
                return Ok(result);
            }

            let child_id = InternalView::<K>::new(&latch).lookup(key);
            let child_guard = self.buffer_pool.fetch_page_guarded(child_id)?;
            let child_latch = child_guard.page().read_arc();
            drop(latch);
            drop(guard);
            guard = child_guard;
            latch = child_latch;
        }
    }

    /// Descend to the leaf that owns `key` without crabbing, holding only
    /// pins. Iterator positioning and test helpers use this; it is not
    /// safe against concurrent writers.
    pub(crate) fn find_leaf_pin(&self, key: Option<&K>) -> Result<Option<PageGuard>, BTreeError> {
        let root_id = self.root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.buffer_pool.fetch_page_guarded(root_id)?;
        loop {
            let child_id = {
                let page = guard.page().read();
                if layout::is_leaf(&page.data) {
                    break;
                }
                let node = InternalView::<K>::new(&page);
                match key {
                    Some(key) => node.lookup(key),
                    None => node.child_at(0),
                }
            };
            guard = self.buffer_pool.fetch_page_guarded(child_id)?;
        }
        Ok(Some(guard))
    }

    /// Key contents of every leaf, left to right. Test support.
    pub fn leaf_keys(&self) -> Result<Vec<Vec<K>>, BTreeError> {
        let mut groups = Vec::new();
        let Some(mut guard) = self.find_leaf_pin(None)? else {
            return Ok(groups);
        };
        loop {
            let next = {
                let page = guard.page().read();
                let leaf = LeafView::<K>::new(&page);
                groups.push((0..leaf.size()).map(|i| leaf.key_at(i)).collect());
                leaf.next_page_id()
            };
            if next == INVALID_PAGE_ID {
                break;
            }
            guard = self.buffer_pool.fetch_page_guarded(next)?;
        }
        Ok(groups)
    }

    /// Check the structural invariants of the whole tree: key order inside
    /// nodes, child parent pointers, occupancy bounds for non-root nodes,
    /// and ascending keys along the leaf chain. Intended for tests; assumes
    /// no concurrent writers.
    pub fn verify_integrity(&self) -> Result<(), BTreeError> {
        let root_id = self.root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut dfs_leaves = Vec::new();
        self.verify_node(root_id, INVALID_PAGE_ID, &mut dfs_leaves)?;

        // The next-pointer chain must visit exactly the DFS leaves in order,
        // with keys ascending across boundaries.
        let mut chain = Vec::new();
        let mut last_key: Option<K> = None;
        let Some(mut guard) = self.find_leaf_pin(None)? else {
            return Ok(());
        };
        loop {
            let next = {
                let page = guard.page().read();
                let leaf = LeafView::<K>::new(&page);
                chain.push(page.page_id);
                for i in 0..leaf.size() {
                    let key = leaf.key_at(i);
                    if let Some(prev) = last_key {
                        if prev >= key {
                            return Err(BTreeError::CorruptNode(format!(
                                "leaf chain keys out of order at page {}",
                                page.page_id
                            )));
                        }
                    }
                    last_key = Some(key);
                }
                leaf.next_page_id()
            };
            if next == INVALID_PAGE_ID {
                break;
            }
            guard = self.buffer_pool.fetch_page_guarded(next)?;
        }
        if chain != dfs_leaves {
            return Err(BTreeError::CorruptNode(
                "leaf chain does not match tree order".to_string(),
            ));
        }
        let unique: HashSet<_> = chain.iter().collect();
        if unique.len() != chain.len() {
            return Err(BTreeError::CorruptNode("leaf chain revisits a page".to_string()));
        }
        Ok(())
    }

    fn verify_node(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        dfs_leaves: &mut Vec<PageId>,
    ) -> Result<(), BTreeError> {
        let guard = self.buffer_pool.fetch_page_guarded(page_id)?;
        let page = guard.page().read();
        let is_root = expected_parent == INVALID_PAGE_ID;

        if layout::parent_page_id(&page.data) != expected_parent {
            return Err(BTreeError::CorruptNode(format!(
                "page {page_id} has parent {} but expected {expected_parent}",
                layout::parent_page_id(&page.data)
            )));
        }

        if layout::is_leaf(&page.data) {
            let leaf = LeafView::<K>::new(&page);
            if !is_root && leaf.size() < self.leaf_min_size() {
                return Err(BTreeError::CorruptNode(format!(
                    "leaf {page_id} under-full: {}",
                    leaf.size()
                )));
            }
            for i in 1..leaf.size() {
                if leaf.key_at(i - 1) >= leaf.key_at(i) {
                    return Err(BTreeError::CorruptNode(format!("leaf {page_id} keys out of order")));
                }
            }
            dfs_leaves.push(page_id);
            return Ok(());
        }

        let node = InternalView::<K>::new(&page);
        if node.size() < 2 || (!is_root && node.size() < self.internal_min_size()) {
            return Err(BTreeError::CorruptNode(format!(
                "internal {page_id} under-full: {}",
                node.size()
            )));
        }
        for i in 2..node.size() {
            if node.key_at(i - 1) >= node.key_at(i) {
                return Err(BTreeError::CorruptNode(format!(
                    "internal {page_id} keys out of order"
                )));
            }
        }
        let children: Vec<PageId> = (0..node.size()).map(|i| node.child_at(i)).collect();
        drop(page);
        drop(guard);
        for child in children {
            self.verify_node(child, page_id, dfs_leaves)?;
        }
        Ok(())
    }
}
