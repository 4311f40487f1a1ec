use std::marker::PhantomData;
use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, Rid};
use crate::index::btree::key::KeyCodec;
use crate::index::btree::layout::{self, BTreePageType, LEAF_HEADER_SIZE};

const RID_LEN: usize = 8;

fn entry_len<K: KeyCodec>() -> usize {
    K::ENCODED_LEN + RID_LEN
}

fn entry_offset<K: KeyCodec>(index: usize) -> usize {
    LEAF_HEADER_SIZE + index * entry_len::<K>()
}

fn read_key<K: KeyCodec>(data: &[u8], index: usize) -> K {
    K::decode_from(&data[entry_offset::<K>(index)..])
}

fn read_rid<K: KeyCodec>(data: &[u8], index: usize) -> Rid {
    let off = entry_offset::<K>(index) + K::ENCODED_LEN;
    Rid {
        page_id: LittleEndian::read_u32(&data[off..off + 4]),
        slot: LittleEndian::read_u32(&data[off + 4..off + 8]),
    }
}

fn write_entry<K: KeyCodec>(data: &mut [u8], index: usize, key: &K, rid: Rid) {
    let off = entry_offset::<K>(index);
    key.encode_into(&mut data[off..]);
    let off = off + K::ENCODED_LEN;
    LittleEndian::write_u32(&mut data[off..off + 4], rid.page_id);
    LittleEndian::write_u32(&mut data[off + 4..off + 8], rid.slot);
}

/// First index whose key is >= `key`; `size` when every key is smaller.
fn lower_bound<K: KeyCodec>(data: &[u8], size: usize, key: &K) -> usize {
    let mut lo = 0;
    let mut hi = size;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if read_key::<K>(data, mid) < *key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Read-only view of a leaf node's on-page representation.
pub struct LeafView<'a, K> {
    page: &'a Page,
    _marker: PhantomData<K>,
}

impl<'a, K: KeyCodec> LeafView<'a, K> {
    pub fn new(page: &'a Page) -> Self {
        debug_assert!(layout::is_leaf(&page.data));
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

    pub fn next_page_id(&self) -> PageId {
        layout::next_page_id(&self.page.data)
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        read_key::<K>(&self.page.data, index)
    }

    pub fn rid_at(&self, index: usize) -> Rid {
        debug_assert!(index < self.size());
        read_rid::<K>(&self.page.data, index)
    }

    pub fn item_at(&self, index: usize) -> (K, Rid) {
        (self.key_at(index), self.rid_at(index))
    }

    /// First index whose key is >= `key`; `size` when none qualifies.
    pub fn key_index(&self, key: &K) -> usize {
        lower_bound::<K>(&self.page.data, self.size(), key)
    }

    /// Binary search for an exact key match.
    pub fn lookup(&self, key: &K) -> Option<Rid> {
        let idx = self.key_index(key);
        if idx < self.size() && self.key_at(idx) == *key {
            Some(self.rid_at(idx))
        } else {
            None
        }
    }
}

/// Mutable view of a leaf node. All structural primitives live here; the
/// tree layer is responsible for latching and pinning.
pub struct LeafViewMut<'a, K> {
    page: &'a mut Page,
    _marker: PhantomData<K>,
}

impl<'a, K: KeyCodec> LeafViewMut<'a, K> {
    pub fn new(page: &'a mut Page) -> Self {
        Self {
            page,
            _marker: PhantomData,
        }
    }

    /// Initialize a freshly allocated page as an empty leaf.
    pub fn init(&mut self, page_id: PageId, parent_id: PageId, max_size: u32) {
        let data = &mut self.page.data;
        layout::set_page_type(data, BTreePageType::Leaf);
        layout::set_size(data, 0);
        layout::set_max_size(data, max_size);
        layout::set_parent_page_id(data, parent_id);
        layout::set_page_id(data, page_id);
        layout::set_next_page_id(data, crate::common::types::INVALID_PAGE_ID);
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

    pub fn next_page_id(&self) -> PageId {
        layout::next_page_id(&self.page.data)
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        layout::set_next_page_id(&mut self.page.data, next);
    }

    fn set_size(&mut self, size: usize) {
        layout::set_size(&mut self.page.data, size as u32);
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        read_key::<K>(&self.page.data, index)
    }

    pub fn rid_at(&self, index: usize) -> Rid {
        read_rid::<K>(&self.page.data, index)
    }

    pub fn key_index(&self, key: &K) -> usize {
        lower_bound::<K>(&self.page.data, self.size(), key)
    }

    pub fn lookup(&self, key: &K) -> Option<Rid> {
        let idx = self.key_index(key);
        if idx < self.size() && self.key_at(idx) == *key {
            Some(self.rid_at(idx))
        } else {
            None
        }
    }

    /// Ordered insertion. The caller must have ensured there is room and
    /// that the key is not already present.
    pub fn insert(&mut self, key: &K, rid: Rid) -> usize {
        let n = self.size();
        let idx = self.key_index(key);
        self.shift_right(idx, n);
        write_entry::<K>(&mut self.page.data, idx, key, rid);
        self.set_size(n + 1);
        n + 1
    }

    /// Remove `key` if present; returns the new size either way.
    pub fn remove(&mut self, key: &K) -> usize {
        let n = self.size();
        let idx = self.key_index(key);
        if idx >= n || self.key_at(idx) != *key {
            return n;
        }
        self.shift_left(idx + 1, n);
        self.set_size(n - 1);
        n - 1
    }

    /// Move the upper half of this leaf's entries to `recipient`, which
    /// must be an empty, freshly initialized leaf.
    pub fn move_half_to(&mut self, recipient: &mut LeafViewMut<'_, K>) {
        let n = self.size();
        let split = n / 2;
        let moved = n - split;
        let src = entry_offset::<K>(split)..entry_offset::<K>(n);
        recipient.page.data[entry_offset::<K>(0)..entry_offset::<K>(moved)]
            .copy_from_slice(&self.page.data[src]);
        recipient.set_size(moved);
        self.set_size(split);
    }

    /// Move every entry into `recipient` (appended), splicing this leaf out
    /// of the next-pointer chain.
    pub fn move_all_to(&mut self, recipient: &mut LeafViewMut<'_, K>) {
        let n = self.size();
        let m = recipient.size();
        let src = entry_offset::<K>(0)..entry_offset::<K>(n);
        recipient.page.data[entry_offset::<K>(m)..entry_offset::<K>(m + n)]
            .copy_from_slice(&self.page.data[src]);
        recipient.set_size(m + n);
        recipient.set_next_page_id(self.next_page_id());
        self.set_size(0);
    }

    /// Move this leaf's first entry to the end of `recipient` (its left
    /// sibling).
    pub fn move_first_to_end_of(&mut self, recipient: &mut LeafViewMut<'_, K>) {
        let n = self.size();
        debug_assert!(n > 0);
        let (key, rid) = (self.key_at(0), self.rid_at(0));
        let m = recipient.size();
        write_entry::<K>(&mut recipient.page.data, m, &key, rid);
        recipient.set_size(m + 1);
        self.shift_left(1, n);
        self.set_size(n - 1);
    }

    /// Move this leaf's last entry to the front of `recipient` (its right
    /// sibling).
    pub fn move_last_to_front_of(&mut self, recipient: &mut LeafViewMut<'_, K>) {
        let n = self.size();
        debug_assert!(n > 0);
        let (key, rid) = (self.key_at(n - 1), self.rid_at(n - 1));
        let m = recipient.size();
        recipient.shift_right(0, m);
        write_entry::<K>(&mut recipient.page.data, 0, &key, rid);
        recipient.set_size(m + 1);
        self.set_size(n - 1);
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
