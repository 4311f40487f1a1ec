use std::marker::PhantomData;
use std::sync::Arc;

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::KeyCodec;
use crate::index::btree::leaf::LeafView;
use crate::storage::buffer::{BufferPoolManager, PageGuard};
use super::base::BPlusTree;

/// Single-pass forward scan over the leaf chain.
///
/// The iterator keeps the current leaf pinned (not latched) and pins the
/// next leaf as it steps across a boundary, so it must not run concurrently
/// with writers. Exhaustion is expressed as `None`, not a sentinel value.
pub struct BPlusTreeIter<K: KeyCodec> {
    buffer_pool: Arc<BufferPoolManager>,
    current: Option<PageGuard>,
    index: usize,
    _marker: PhantomData<K>,
}

impl<K: KeyCodec> Iterator for BPlusTreeIter<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        loop {
            let guard = self.current.as_ref()?;
            let next_page_id = {
                let page = guard.page().read();
                let leaf = LeafView::<K>::new(&page);
                if self.index < leaf.size() {
                    let item = leaf.item_at(self.index);
                    self.index += 1;
                    return Some(item);
                }
                leaf.next_page_id()
            };

            // Step off the end of this leaf: unpin it and pin the next.
            self.current = None;
            if next_page_id == INVALID_PAGE_ID {
                return None;
            }
            match self.buffer_pool.fetch_page_guarded(next_page_id) {
                Ok(next_guard) => {
                    self.current = Some(next_guard);
                    self.index = 0;
                }
                Err(_) => return None,
            }
        }
    }
}

impl<K: KeyCodec> BPlusTree<K> {
    /// Iterator positioned at the leftmost leaf's first pair.
    pub fn iter(&self) -> Result<BPlusTreeIter<K>, BTreeError> {
        let current = self.find_leaf_pin(None)?;
        Ok(BPlusTreeIter {
            buffer_pool: Arc::clone(&self.buffer_pool),
            current,
            index: 0,
            _marker: PhantomData,
        })
    }

    /// Iterator positioned at the first pair whose key is >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<BPlusTreeIter<K>, BTreeError> {
        let current = self.find_leaf_pin(Some(key))?;
        let index = match &current {
            Some(guard) => {
                let page = guard.page().read();
                LeafView::<K>::new(&page).key_index(key)
            }
            None => 0,
        };
        Ok(BPlusTreeIter {
            buffer_pool: Arc::clone(&self.buffer_pool),
            current,
            index,
            _marker: PhantomData,
        })
    }
}
