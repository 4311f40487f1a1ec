use log::debug;

use crate::common::types::INVALID_PAGE_ID;
use crate::index::btree::error::BTreeError;
use crate::index::btree::internal::{self, InternalView, InternalViewMut};
use crate::index::btree::key::KeyCodec;
use crate::index::btree::layout;
use crate::index::btree::leaf::LeafViewMut;
use super::base::{release_held, BPlusTree, HeldPage};

impl<K: KeyCodec> BPlusTree<K> {
    /// Remove `key` if present. Under-full nodes first try to borrow an
    /// entry from a sibling (left preferred), then merge; underflow
    /// propagates up the held path, collapsing the root when an internal
    /// root is left with a single child.
    ///
    /// The descent write-latches each node, releasing held ancestors once
    /// the current node is delete-safe, i.e. strictly more than half full.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let mut root_guard = Some(self.root.write());
        let root_id = **root_guard.as_ref().expect("tree latch just acquired");
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut path: Vec<HeldPage> = Vec::new();
        let mut pid = root_id;
        loop {
            let guard = self.buffer_pool.fetch_page_guarded(pid)?;
            let latch = guard.page().write_arc();
            let is_leaf = layout::is_leaf(&latch.data);
            let is_root = layout::parent_page_id(&latch.data) == INVALID_PAGE_ID;
            let size = layout::size(&latch.data) as usize;
            // A root leaf never merges; an internal root collapses once it
            // is down to a single child.
            let safe = if is_root {
                is_leaf || size > 2
            } else if is_leaf {
                size > self.leaf_min_size()
            } else {
                size > self.internal_min_size()
            };
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
        let before;
        let after;
        {
            let mut leaf = LeafViewMut::<K>::new(&mut leaf_latch);
            before = leaf.size();
            after = leaf.remove(key);
        }
        if before == after {
            drop(leaf_latch);
            drop(leaf_guard);
            release_held(&mut path);
            return Ok(());
        }
        leaf_guard.mark_dirty();

        let mut cur: HeldPage = (leaf_latch, leaf_guard);
        loop {
            let is_leaf = layout::is_leaf(&cur.0.data);
            let is_root = layout::parent_page_id(&cur.0.data) == INVALID_PAGE_ID;
            let size = layout::size(&cur.0.data) as usize;

            if is_root {
                if !is_leaf && size == 1 {
                    // The root has a single child left: that child becomes
                    // the new root.
                    let only_child = InternalView::<K>::new(&cur.0).child_at(0);
                    let old_root_pid = cur.0.page_id;
                    let rg = root_guard
                        .as_mut()
                        .expect("tree latch must be held while collapsing the root");
                    internal::adopt(&self.buffer_pool, only_child, INVALID_PAGE_ID)?;
                    **rg = only_child;
                    let (latch, guard) = cur;
                    drop(latch);
                    drop(guard);
                    self.buffer_pool.delete_page(old_root_pid)?;
                    self.update_header_root(only_child)?;
                    debug!("root collapsed into {only_child}");
                    return Ok(());
                }
                break;
            }

            let min = if is_leaf {
                self.leaf_min_size()
            } else {
                self.internal_min_size()
            };
            if size >= min {
                break;
            }

            let parent = path
                .last_mut()
                .expect("under-full non-root node keeps its parent latched");
            let merged = self.fix_underflow(parent, cur)?;
            if !merged {
                // A sibling spared an entry; nothing propagates.
                release_held(&mut path);
                return Ok(());
            }
            cur = path.pop().expect("parent was just peeked");
        }

        let (latch, guard) = cur;
        drop(latch);
        drop(guard);
        release_held(&mut path);
        Ok(())
    }

    /// Repair an under-full node by redistribution or merge. Returns true
    /// when a merge removed an entry from the parent (underflow may now
    /// propagate), false when a borrow fixed the node locally.
    fn fix_underflow(&self, parent_held: &mut HeldPage, cur: HeldPage) -> Result<bool, BTreeError> {
        let (mut cur_latch, cur_guard) = cur;
        let cur_pid = cur_latch.page_id;
        let is_leaf = layout::is_leaf(&cur_latch.data);
        let min = if is_leaf {
            self.leaf_min_size()
        } else {
            self.internal_min_size()
        };

        let idx = InternalView::<K>::new(&parent_held.0)
            .value_index(cur_pid)
            .expect("under-full node must appear in its parent");
        let parent_size = layout::size(&parent_held.0.data) as usize;

        // Borrow from the left sibling if it can spare an entry.
        if idx > 0 {
            let sib_pid = InternalView::<K>::new(&parent_held.0).child_at(idx - 1);
            let sib_guard = self.buffer_pool.fetch_page_guarded(sib_pid)?;
            let mut sib_latch = sib_guard.page().write_arc();
            if layout::size(&sib_latch.data) as usize > min {
                debug!("node {cur_pid} borrows from left sibling {sib_pid}");
                if is_leaf {
                    let mut sibling = LeafViewMut::<K>::new(&mut sib_latch);
                    let mut node = LeafViewMut::<K>::new(&mut cur_latch);
                    sibling.move_last_to_front_of(&mut node);
                    let new_sep = node.key_at(0);
                    InternalViewMut::<K>::new(&mut parent_held.0).set_key_at(idx, &new_sep);
                } else {
                    let middle = InternalView::<K>::new(&parent_held.0).key_at(idx);
                    let mut sibling = InternalViewMut::<K>::new(&mut sib_latch);
                    let mut node = InternalViewMut::<K>::new(&mut cur_latch);
                    let new_sep =
                        sibling.move_last_to_front_of(&mut node, &middle, &self.buffer_pool)?;
                    InternalViewMut::<K>::new(&mut parent_held.0).set_key_at(idx, &new_sep);
                }
                sib_guard.mark_dirty();
                cur_guard.mark_dirty();
                parent_held.1.mark_dirty();
                return Ok(false);
            }
        }

        // Borrow from the right sibling.
        if idx + 1 < parent_size {
            let sib_pid = InternalView::<K>::new(&parent_held.0).child_at(idx + 1);
            let sib_guard = self.buffer_pool.fetch_page_guarded(sib_pid)?;
            let mut sib_latch = sib_guard.page().write_arc();
            if layout::size(&sib_latch.data) as usize > min {
                debug!("node {cur_pid} borrows from right sibling {sib_pid}");
                if is_leaf {
                    let mut sibling = LeafViewMut::<K>::new(&mut sib_latch);
                    let mut node = LeafViewMut::<K>::new(&mut cur_latch);
                    sibling.move_first_to_end_of(&mut node);
                    let new_sep = sibling.key_at(0);
                    InternalViewMut::<K>::new(&mut parent_held.0).set_key_at(idx + 1, &new_sep);
                } else {
                    let middle = InternalView::<K>::new(&parent_held.0).key_at(idx + 1);
                    let mut sibling = InternalViewMut::<K>::new(&mut sib_latch);
                    let mut node = InternalViewMut::<K>::new(&mut cur_latch);
                    let new_sep =
                        sibling.move_first_to_end_of(&mut node, &middle, &self.buffer_pool)?;
                    InternalViewMut::<K>::new(&mut parent_held.0).set_key_at(idx + 1, &new_sep);
                }
                sib_guard.mark_dirty();
                cur_guard.mark_dirty();
                parent_held.1.mark_dirty();
                return Ok(false);
            }
        }

        // No sibling can spare: merge. Prefer folding into the left
        // sibling; a leftmost node absorbs its right sibling instead.
        if idx > 0 {
            let sib_pid = InternalView::<K>::new(&parent_held.0).child_at(idx - 1);
            let sib_guard = self.buffer_pool.fetch_page_guarded(sib_pid)?;
            let mut sib_latch = sib_guard.page().write_arc();
            debug!("merging node {cur_pid} into left sibling {sib_pid}");
            if is_leaf {
                let mut node = LeafViewMut::<K>::new(&mut cur_latch);
                let mut sibling = LeafViewMut::<K>::new(&mut sib_latch);
                node.move_all_to(&mut sibling);
            } else {
                let middle = InternalView::<K>::new(&parent_held.0).key_at(idx);
                let mut node = InternalViewMut::<K>::new(&mut cur_latch);
                let mut sibling = InternalViewMut::<K>::new(&mut sib_latch);
                node.move_all_to(&mut sibling, &middle, &self.buffer_pool)?;
            }
            InternalViewMut::<K>::new(&mut parent_held.0).remove(idx);
            sib_guard.mark_dirty();
            parent_held.1.mark_dirty();
            drop(sib_latch);
            drop(sib_guard);
            drop(cur_latch);
            drop(cur_guard);
            self.buffer_pool.delete_page(cur_pid)?;
        } else {
            let sib_pid = InternalView::<K>::new(&parent_held.0).child_at(idx + 1);
            let sib_guard = self.buffer_pool.fetch_page_guarded(sib_pid)?;
            let mut sib_latch = sib_guard.page().write_arc();
            debug!("merging right sibling {sib_pid} into node {cur_pid}");
            if is_leaf {
                let mut sibling = LeafViewMut::<K>::new(&mut sib_latch);
                let mut node = LeafViewMut::<K>::new(&mut cur_latch);
                sibling.move_all_to(&mut node);
            } else {
                let middle = InternalView::<K>::new(&parent_held.0).key_at(idx + 1);
                let mut sibling = InternalViewMut::<K>::new(&mut sib_latch);
                let mut node = InternalViewMut::<K>::new(&mut cur_latch);
                sibling.move_all_to(&mut node, &middle, &self.buffer_pool)?;
            }
            InternalViewMut::<K>::new(&mut parent_held.0).remove(idx + 1);
            cur_guard.mark_dirty();
            parent_held.1.mark_dirty();
            drop(sib_latch);
            drop(sib_guard);
            drop(cur_latch);
            drop(cur_guard);
            self.buffer_pool.delete_page(sib_pid)?;
        }
        Ok(true)
    }
}
