use std::marker::PhantomData;
use std::sync::Arc;
use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::KeyCodec;
use crate::index::btree::layout::{self, BTreePageType, COMMON_HEADER_SIZE};
use crate::storage::buffer::BufferPoolManager;

const CHILD_LEN: usize = 4;

fn entry_len<K: KeyCodec>() -> usize {
    K::ENCODED_LEN + CHILD_LEN
}

fn entry_offset<K: KeyCodec>(index: usize) -> usize {
    COMMON_HEADER_SIZE + index * entry_len::<K>()
}

fn read_key<K: KeyCodec>(data: &[u8], index: usize) -> K {
    K::decode_from(&data[entry_offset::<K>(index)..])
}

fn read_child<K: KeyCodec>(data: &[u8], index: usize) -> PageId {
    let off = entry_offset::<K>(index) + K::ENCODED_LEN;
    LittleEndian::read_u32(&data[off..off + 4])
}

fn write_entry<K: KeyCodec>(data: &mut [u8], index: usize, key: &K, child: PageId) {
    let off = entry_offset::<K>(index);
    key.encode_into(&mut data[off..]);
    let off = off + K::ENCODED_LEN;
    LittleEndian::write_u32(&mut data[off..off + 4], child);
}

/// Rewrite a child page's parent pointer through the buffer pool. Every
/// structural move of internal entries must keep the on-disk parent id of
/// the moved child in sync with its new physical parent.
pub(crate) fn adopt(
    buffer_pool: &Arc<BufferPoolManager>,
    child_id: PageId,
    new_parent: PageId,
) -> Result<(), BTreeError> {
    let guard = buffer_pool.fetch_page_guarded(child_id)?;
    {
        let mut page = guard.page().write();
        layout::set_parent_page_id(&mut page.data, new_parent);
    }
    guard.mark_dirty();
    Ok(())
}

/// Read-only view of an internal node. `size` counts children; the key in
/// slot 0 is a placeholder and never compared.
pub struct InternalView<'a, K> {
    page: &'a Page,
    _marker: PhantomData<K>,
}

impl<'a, K: KeyCodec> InternalView<'a, K> {
    pub fn new(page: &'a Page) -> Self {
        debug_assert!(!layout::is_leaf(&page.data));
        Self {
            page,
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        layout::size(&self.page.data) as usize
    }

    pub fn max_size(&self) -> u32 {
        layout::max_size(&self.page.data)
    }

    pub fn parent_page_id(&self) -> PageId {
        layout::parent_page_id(&self.page.data)
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        read_key::<K>(&self.page.data, index)
    }

    pub fn child_at(&self, index: usize) -> PageId {
        debug_assert!(index < self.size());
        read_child::<K>(&self.page.data, index)
    }

    /// Index of the entry whose child pointer equals `child_id`.
    pub fn value_index(&self, child_id: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.child_at(i) == child_id)
    }

    /// The child whose subtree owns `key`: the last child whose key slot is
    /// <= `key`, with slot 0 standing in for negative infinity.
    pub fn lookup(&self, key: &K) -> PageId {
        let n = self.size();
        for i in 1..n {
            if *key < self.key_at(i) {
                return self.child_at(i - 1);
            }
        }
        self.child_at(n - 1)
    }
}

/// Mutable view of an internal node.
pub struct InternalViewMut<'a, K> {
    page: &'a mut Page,
    _marker: PhantomData<K>,
}

impl<'a, K: KeyCodec> InternalViewMut<'a, K> {
    pub fn new(page: &'a mut Page) -> Self {
        Self {
            page,
            _marker: PhantomData,
        }
    }

    /// Initialize a freshly allocated page as an empty internal node.
    pub fn init(&mut self, page_id: PageId, parent_id: PageId, max_size: u32) {
        let data = &mut self.page.data;
        layout::set_page_type(data, BTreePageType::Internal);
        layout::set_size(data, 0);
        layout::set_max_size(data, max_size);
        layout::set_parent_page_id(data, parent_id);
        layout::set_page_id(data, page_id);
    }

    pub fn size(&self) -> usize {
        layout::size(&self.page.data) as usize
    }

    pub fn max_size(&self) -> u32 {
        layout::max_size(&self.page.data)
    }

    pub fn page_id(&self) -> PageId {
        layout::page_id(&self.page.data)
    }

    pub fn parent_page_id(&self) -> PageId {
        layout::parent_page_id(&self.page.data)
    }

    pub fn set_parent_page_id(&mut self, parent: PageId) {
        layout::set_parent_page_id(&mut self.page.data, parent);
    }

    fn set_size(&mut self, size: usize) {
        layout::set_size(&mut self.page.data, size as u32);
    }

    pub fn key_at(&self, index: usize) -> K {
        read_key::<K>(&self.page.data, index)
    }

    pub fn set_key_at(&mut self, index: usize, key: &K) {
        let off = entry_offset::<K>(index);
        key.encode_into(&mut self.page.data[off..]);
    }

    pub fn child_at(&self, index: usize) -> PageId {
        read_child::<K>(&self.page.data, index)
    }

    pub fn value_index(&self, child_id: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.child_at(i) == child_id)
    }

    pub fn lookup(&self, key: &K) -> PageId {
        let n = self.size();
        for i in 1..n {
            if *key < self.key_at(i) {
                return self.child_at(i - 1);
            }
        }
        self.child_at(n - 1)
    }

    /// Turn an empty node into a root with two children separated by
    /// `pivot`. The callers re-parent both children themselves.
    pub fn populate_new_root(&mut self, left_child: PageId, pivot: &K, right_child: PageId) {
        write_entry::<K>(&mut self.page.data, 0, &K::default(), left_child);
        write_entry::<K>(&mut self.page.data, 1, pivot, right_child);
        self.set_size(2);
    }

    /// Insert `(new_key, new_child)` immediately after the entry holding
    /// `old_child`. The page reserves one spare physical slot, so this may
    /// briefly push the node one past its logical max before a split.
    pub fn insert_after(&mut self, old_child: PageId, new_key: &K, new_child: PageId) -> usize {
        let n = self.size();
        let idx = self
            .value_index(old_child)
            .expect("insert_after: old child must be present");
        self.shift_right(idx + 1, n);
        write_entry::<K>(&mut self.page.data, idx + 1, new_key, new_child);
        self.set_size(n + 1);
        n + 1
    }

    /// Remove the entry at `index`.
    pub fn remove(&mut self, index: usize) {
        let n = self.size();
        debug_assert!(index < n);
        self.shift_left(index + 1, n);
        self.set_size(n - 1);
    }

    /// Move the upper half of the entries to `recipient` (a fresh, empty
    /// node), re-parenting every moved child. The promoted separator ends
    /// up in the recipient's slot 0.
    pub fn move_half_to(
        &mut self,
        recipient: &mut InternalViewMut<'_, K>,
        buffer_pool: &Arc<BufferPoolManager>,
    ) -> Result<(), BTreeError> {
        let n = self.size();
        let split = n / 2;
        let moved = n - split;
        let src = entry_offset::<K>(split)..entry_offset::<K>(n);
        recipient.page.data[entry_offset::<K>(0)..entry_offset::<K>(moved)]
            .copy_from_slice(&self.page.data[src]);
        recipient.set_size(moved);
        self.set_size(split);

        let new_parent = recipient.page_id();
        for i in 0..moved {
            adopt(buffer_pool, recipient.child_at(i), new_parent)?;
        }
        Ok(())
    }

    /// Move every entry into `recipient` (its left sibling), pulling the
    /// parent's separator key down into the first moved slot.
    pub fn move_all_to(
        &mut self,
        recipient: &mut InternalViewMut<'_, K>,
        middle_key: &K,
        buffer_pool: &Arc<BufferPoolManager>,
    ) -> Result<(), BTreeError> {
        let n = self.size();
        self.set_key_at(0, middle_key);

        let m = recipient.size();
        let src = entry_offset::<K>(0)..entry_offset::<K>(n);
        recipient.page.data[entry_offset::<K>(m)..entry_offset::<K>(m + n)]
            .copy_from_slice(&self.page.data[src]);
        recipient.set_size(m + n);
        self.set_size(0);

        let new_parent = recipient.page_id();
        for i in m..m + n {
            adopt(buffer_pool, recipient.child_at(i), new_parent)?;
        }
        Ok(())
    }

    /// Move the first entry to the end of `recipient` (its left sibling).
    /// `middle_key` is the parent separator that descends into the moved
    /// slot. Returns the key that must replace the parent separator.
    pub fn move_first_to_end_of(
        &mut self,
        recipient: &mut InternalViewMut<'_, K>,
        middle_key: &K,
        buffer_pool: &Arc<BufferPoolManager>,
    ) -> Result<K, BTreeError> {
        let n = self.size();
        debug_assert!(n > 1);
        let child = self.child_at(0);

        let m = recipient.size();
        write_entry::<K>(&mut recipient.page.data, m, middle_key, child);
        recipient.set_size(m + 1);
        adopt(buffer_pool, child, recipient.page_id())?;

        self.shift_left(1, n);
        self.set_size(n - 1);
        Ok(self.key_at(0))
    }

    /// Move the last entry to the front of `recipient` (its right sibling).
    /// `middle_key` is the parent separator, which descends into the
    /// recipient's old slot-0 position. Returns the key that must replace
    /// the parent separator.
    pub fn move_last_to_front_of(
        &mut self,
        recipient: &mut InternalViewMut<'_, K>,
        middle_key: &K,
        buffer_pool: &Arc<BufferPoolManager>,
    ) -> Result<K, BTreeError> {
        let n = self.size();
        debug_assert!(n > 1);
        let (last_key, last_child) = (self.key_at(n - 1), self.child_at(n - 1));

        // The placeholder slot becomes a real key once it shifts to slot 1.
        recipient.set_key_at(0, middle_key);
        let m = recipient.size();
        recipient.shift_right(0, m);
        write_entry::<K>(&mut recipient.page.data, 0, &K::default(), last_child);
        recipient.set_size(m + 1);
        adopt(buffer_pool, last_child, recipient.page_id())?;

        self.set_size(n - 1);
        Ok(last_key)
    }

    fn shift_right(&mut self, from: usize, size: usize) {
        if from < size {
            self.page
                .data
                .copy_within(entry_offset::<K>(from)..entry_offset::<K>(size), entry_offset::<K>(from + 1));
        }
    }

    fn shift_left(&mut self, from: usize, size: usize) {
        if from < size {
            self.page
                .data
                .copy_within(entry_offset::<K>(from)..entry_offset::<K>(size), entry_offset::<K>(from - 1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    fn new_internal(page: &mut Page, page_id: PageId) -> InternalViewMut<'_, i64> {
        let mut node = InternalViewMut::new(page);
        node.init(page_id, INVALID_PAGE_ID, 4);
        node
    }

    #[test]
    fn test_populate_new_root_and_lookup() {
        let mut page = Page::new(5);
        let mut node = new_internal(&mut page, 5);
        node.populate_new_root(2, &10, 3);

        assert_eq!(node.size(), 2);
        assert_eq!(node.lookup(&5), 2);
        assert_eq!(node.lookup(&10), 3);
        assert_eq!(node.lookup(&99), 3);
    }

    #[test]
    fn test_insert_after_preserves_child_order() {
        let mut page = Page::new(5);
        let mut node = new_internal(&mut page, 5);
        node.populate_new_root(2, &10, 3);

        node.insert_after(2, &5, 7);
        assert_eq!(node.size(), 3);
        assert_eq!(node.child_at(0), 2);
        assert_eq!(node.child_at(1), 7);
        assert_eq!(node.child_at(2), 3);
        assert_eq!(node.key_at(1), 5);
        assert_eq!(node.key_at(2), 10);

        assert_eq!(node.lookup(&4), 2);
        assert_eq!(node.lookup(&7), 7);
        assert_eq!(node.lookup(&11), 3);
        assert_eq!(node.value_index(7), Some(1));
    }

    #[test]
    fn test_remove_entry() {
        let mut page = Page::new(5);
        let mut node = new_internal(&mut page, 5);
        node.populate_new_root(2, &10, 3);
        node.insert_after(2, &5, 7);

        node.remove(1);
        assert_eq!(node.size(), 2);
        assert_eq!(node.child_at(0), 2);
        assert_eq!(node.child_at(1), 3);
        assert_eq!(node.key_at(1), 10);
    }
}
