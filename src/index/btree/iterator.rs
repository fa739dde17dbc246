use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageLatch, Rid, INVALID_PAGE_ID};
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::deserialize_node;
use crate::storage::buffer::BufferPoolManager;

/// Forward iterator over the leaf level.
///
/// Holds at most one leaf read-latched (and pinned) at a time; stepping past
/// the end of a leaf unlatches and unpins it before following
/// `next_page_id`.
pub struct BTreeIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    position: Option<(PageLatch, BTreeNode<K>, usize)>,
}

impl<K> BTreeIterator<K>
where
    K: Ord + Clone + Default + Serialize + DeserializeOwned,
{
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        position: Option<(PageLatch, BTreeNode<K>, usize)>,
    ) -> Self {
        Self {
            buffer_pool,
            position,
        }
    }

    pub fn is_end(&self) -> bool {
        self.position.is_none()
    }

    fn advance_leaf(&mut self) {
        let Some((latch, node, _)) = self.position.take() else {
            return;
        };
        let page_id = node.page_id;
        let next = node.next_page_id;
        drop(latch);
        let _ = self.buffer_pool.unpin_page(page_id, false);
        if next == INVALID_PAGE_ID {
            return;
        }
        if let Ok(page_ptr) = self.buffer_pool.fetch_page(next) {
            let latch = PageLatch::acquire(&page_ptr, false);
            match deserialize_node::<K>(latch.page()) {
                Ok(node) => self.position = Some((latch, node, 0)),
                Err(_) => {
                    drop(latch);
                    let _ = self.buffer_pool.unpin_page(next, false);
                }
            }
        }
    }

}

impl<K> Iterator for BTreeIterator<K>
where
    K: Ord + Clone + Default + Serialize + DeserializeOwned,
{
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (_, node, index) = self.position.as_ref()?;
            if *index < node.size() {
                let key = node.keys[*index].clone();
                let value = node.values[*index];
                self.position.as_mut().expect("position checked above").2 += 1;
                return Some((key, value));
            }
            self.advance_leaf();
        }
    }
}

impl<K> Drop for BTreeIterator<K> {
    fn drop(&mut self) {
        if let Some((latch, node, _)) = self.position.take() {
            let page_id = node.page_id;
            drop(latch);
            let _ = self.buffer_pool.unpin_page(page_id, false);
        }
    }
}
