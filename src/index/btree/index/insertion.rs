use log::debug;

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::internal::{self, InternalView, InternalViewMut};
use crate::index::btree::key::KeyCodec;
use crate::index::btree::layout;
use crate::index::btree::leaf::{LeafView, LeafViewMut};
use super::base::{release_held, BPlusTree, HeldPage};

impl<K: KeyCodec> BPlusTree<K> {
    /// Insert a key/rid pair. Keys are unique: inserting an existing key
    /// returns `Ok(false)` and leaves the tree unchanged.
    ///
    /// The descent write-latches each node and releases all held ancestors
    /// (including the tree-wide latch) as soon as the current node is safe,
    /// i.e. cannot split.
    pub fn insert(&self, key: &K, rid: Rid) -> Result<bool, BTreeError> {
        let mut root_guard = Some(self.root.write());
        let root_id = **root_guard.as_ref().expect("tree latch just acquired");

        if root_id == INVALID_PAGE_ID {
            // Start a new tree: a single leaf root.
            let guard = self.buffer_pool.new_page_guarded()?;
            let page_id = guard.page_id();
            {
                let mut page = guard.page().write();
                let mut leaf = LeafViewMut::<K>::new(&mut page);
                leaf.init(page_id, INVALID_PAGE_ID, self.leaf_max_size);
                leaf.insert(key, rid);
            }
            guard.mark_dirty();
            drop(guard);
            if let Some(rg) = root_guard.as_mut() {
                **rg = page_id;
            }
            self.update_header_root(page_id)?;
            return Ok(true);
        }

        let mut path: Vec<HeldPage> = Vec::new();
        let mut pid = root_id;
        loop {
            let guard = self.buffer_pool.fetch_page_guarded(pid)?;
            let latch = guard.page().write_arc();
            let is_leaf = layout::is_leaf(&latch.data);
            let safe = layout::size(&latch.data) < layout::max_size(&latch.data);
            if safe {
                release_held(&mut path);
                root_guard = None;
            }
            path.push((latch, guard));
            if is_leaf {
                break;
            }
            pid = InternalView::<K>::new(&path.last().expect("just pushed").0).lookup(key);
        }

        let (mut leaf_latch, leaf_guard) = path.pop().expect("descent ends at a leaf");

        if LeafView::<K>::new(&leaf_latch).lookup(key).is_some() {
            drop(leaf_latch);
            drop(leaf_guard);
            release_held(&mut path);
            return Ok(false);
        }

        if layout::size(&leaf_latch.data) < self.leaf_max_size {
            {
                let mut leaf = LeafViewMut::<K>::new(&mut leaf_latch);
                leaf.insert(key, rid);
            }
            leaf_guard.mark_dirty();
            drop(leaf_latch);
            drop(leaf_guard);
            release_held(&mut path);
            return Ok(true);
        }

        // Full leaf: split, keeping the incoming pair in whichever half
        // owns it, then rebalance so the halves end up even.
        let leaf_pid = leaf_latch.page_id;
        debug!("splitting leaf {leaf_pid}");
        let new_guard = self.buffer_pool.new_page_guarded()?;
        let mut new_latch = new_guard.page().write_arc();
        let new_pid = new_guard.page_id();

        let pivot;
        {
            let mut old_leaf = LeafViewMut::<K>::new(&mut leaf_latch);
            let mut new_leaf = LeafViewMut::<K>::new(&mut new_latch);
            new_leaf.init(new_pid, old_leaf.parent_page_id(), self.leaf_max_size);
            new_leaf.set_next_page_id(old_leaf.next_page_id());
            old_leaf.set_next_page_id(new_pid);
            old_leaf.move_half_to(&mut new_leaf);
            if *key < new_leaf.key_at(0) {
                old_leaf.insert(key, rid);
            } else {
                new_leaf.insert(key, rid);
            }
            while new_leaf.size() > old_leaf.size() + 1 {
                new_leaf.move_first_to_end_of(&mut old_leaf);
            }
            pivot = new_leaf.key_at(0);
        }
        leaf_guard.mark_dirty();
        new_guard.mark_dirty();
        drop(leaf_latch);
        drop(leaf_guard);
        drop(new_latch);
        drop(new_guard);

        // Push the pivot up through the held ancestors. Everything still on
        // the path is full and will split in turn.
        let mut split = Some((pivot, new_pid));
        let mut child_pid = leaf_pid;

        while let Some((sep, new_child)) = split.take() {
            match path.pop() {
                None => {
                    // Above the root: the tree grows one level.
                    let rg = root_guard
                        .as_mut()
                        .expect("tree latch must be held while splitting the root");
                    let guard = self.buffer_pool.new_page_guarded()?;
                    let new_root_pid = guard.page_id();
                    {
                        let mut page = guard.page().write();
                        let mut node = InternalViewMut::<K>::new(&mut page);
                        node.init(new_root_pid, INVALID_PAGE_ID, self.internal_max_size);
                        node.populate_new_root(child_pid, &sep, new_child);
                    }
                    guard.mark_dirty();
                    drop(guard);
                    internal::adopt(&self.buffer_pool, child_pid, new_root_pid)?;
                    internal::adopt(&self.buffer_pool, new_child, new_root_pid)?;
                    **rg = new_root_pid;
                    debug!("new root {new_root_pid}");
                    self.update_header_root(new_root_pid)?;
                }
                Some((mut latch, guard)) => {
                    let this_pid = latch.page_id;
                    if layout::size(&latch.data) < self.internal_max_size {
                        {
                            let mut node = InternalViewMut::<K>::new(&mut latch);
                            node.insert_after(child_pid, &sep, new_child);
                        }
                        guard.mark_dirty();
                        drop(latch);
                        drop(guard);
                    } else {
                        // Full ancestor: insert into the spare slot, then
                        // split off the upper half.
                        debug!("splitting internal {this_pid}");
                        let sib_guard = self.buffer_pool.new_page_guarded()?;
                        let mut sib_latch = sib_guard.page().write_arc();
                        let sib_pid = sib_guard.page_id();
                        let next_sep;
                        {
                            let mut node = InternalViewMut::<K>::new(&mut latch);
                            let mut sibling = InternalViewMut::<K>::new(&mut sib_latch);
                            sibling.init(sib_pid, node.parent_page_id(), self.internal_max_size);
                            node.insert_after(child_pid, &sep, new_child);
                            node.move_half_to(&mut sibling, &self.buffer_pool)?;
                            next_sep = sibling.key_at(0);
                        }
                        guard.mark_dirty();
                        sib_guard.mark_dirty();
                        drop(latch);
                        drop(guard);
                        drop(sib_latch);
                        drop(sib_guard);
                        split = Some((next_sep, sib_pid));
                        child_pid = this_pid;
                    }
                }
            }
        }

        release_held(&mut path);
        Ok(true)
    }
}
