use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, PageLatch, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::BTreeIterator;
use crate::index::btree::latch::{DescentContext, OpKind};
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{default_max_size, deserialize_node, serialize_node};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::HeaderPage;
use crate::transaction::transaction::Transaction;

/// Concurrent B+tree index over the buffer pool, keyed by `K` with RID
/// values; unique keys only.
///
/// Traversals follow latch crabbing: take the root latch (shared for reads,
/// exclusive for writes), latch downward, and release all held ancestors as
/// soon as the current node is safe for the operation. Structure
/// modifications therefore always run with every affected ancestor
/// write-latched. The root page id is tracked in a record on the header page
/// and only changes under the exclusive root latch.
pub struct BPlusTree<K> {
    index_name: String,
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: Arc<RwLock<PageId>>,
    leaf_max_size: usize,
    internal_max_size: usize,
    _phantom: PhantomData<K>,
}

impl<K> BPlusTree<K>
where
    K: Ord + Clone + Default + Serialize + DeserializeOwned,
{
    /// Open (or create) the index named `index_name`, resuming from the
    /// root recorded on the header page if one exists.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        let max = default_max_size::<K>();
        Self::with_max_sizes(index_name, buffer_pool, max, max)
    }

    /// Open with explicit node capacities. Tests use tiny capacities to
    /// exercise splits and merges with a handful of keys.
    pub fn with_max_sizes(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        let index_name = index_name.into();
        let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root_page_id = {
            let page = header.read();
            HeaderPage::get_record(&page, &index_name).unwrap_or(INVALID_PAGE_ID)
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: Arc::new(RwLock::new(root_page_id)),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup.
    pub fn get_value(
        &self,
        key: &K,
        txn: Option<&Transaction>,
    ) -> Result<Option<Rid>, BTreeError> {
        let mut ctx = DescentContext::new(txn);
        let result = self
            .find_leaf(Some(key), OpKind::Read, &mut ctx)
            .map(|leaf| leaf.and_then(|leaf| leaf.leaf_lookup(key)));
        let freed = ctx.free_all(false, &self.buffer_pool);
        let value = result?;
        freed?;
        Ok(value)
    }

    /// Insert a key/value pair; returns false (and changes nothing) if the
    /// key is already present.
    pub fn insert(&self, key: &K, value: Rid, txn: &Transaction) -> Result<bool, BTreeError> {
        loop {
            let mut ctx = DescentContext::new(Some(txn));
            let attempt = self.try_insert(key, value, &mut ctx);
            let freed = ctx.free_all(true, &self.buffer_pool);
            let attempt = attempt?;
            freed?;
            match attempt {
                Some(inserted) => return Ok(inserted),
                // The tree emptied out between the root latch being dropped
                // and the descent re-taking it; retry from the top.
                None => continue,
            }
        }
    }

    fn try_insert(
        &self,
        key: &K,
        value: Rid,
        ctx: &mut DescentContext,
    ) -> Result<Option<bool>, BTreeError> {
        ctx.latch_root(&self.root_page_id, true);
        if ctx.root_id() == Some(INVALID_PAGE_ID) {
            self.start_new_tree(key, value, ctx)?;
            return Ok(Some(true));
        }
        ctx.release_root();

        let Some(mut leaf) = self.find_leaf(Some(key), OpKind::Insert, ctx)? else {
            return Ok(None);
        };
        if leaf.leaf_lookup(key).is_some() {
            return Ok(Some(false));
        }
        leaf.leaf_insert(key.clone(), value);
        if leaf.size() > leaf.max_size {
            let new_leaf = self.split(&mut leaf, ctx)?;
            let separator = new_leaf.key_at(0).clone();
            self.insert_into_parent(leaf, separator, new_leaf, ctx)?;
        } else {
            self.store_node(&leaf, ctx)?;
        }
        Ok(Some(true))
    }

    /// Remove a key if present.
    pub fn remove(&self, key: &K, txn: &Transaction) -> Result<(), BTreeError> {
        let mut ctx = DescentContext::new(Some(txn));
        let result = self.try_remove(key, &mut ctx);
        let freed = ctx.free_all(true, &self.buffer_pool);
        result?;
        freed
    }

    fn try_remove(&self, key: &K, ctx: &mut DescentContext) -> Result<(), BTreeError> {
        let Some(mut leaf) = self.find_leaf(Some(key), OpKind::Delete, ctx)? else {
            return Ok(());
        };
        let size = leaf.leaf_remove(key);
        if size < leaf.min_size() {
            self.coalesce_or_redistribute(leaf, ctx)?;
        } else {
            self.store_node(&leaf, ctx)?;
        }
        Ok(())
    }

    /// Iterator over the whole leaf level in key order.
    pub fn begin(&self) -> Result<BTreeIterator<K>, BTreeError> {
        self.make_iterator(None)
    }

    /// Iterator positioned at the first entry with key >= `key`.
    pub fn begin_at(&self, key: &K) -> Result<BTreeIterator<K>, BTreeError> {
        self.make_iterator(Some(key))
    }

    fn make_iterator(&self, key: Option<&K>) -> Result<BTreeIterator<K>, BTreeError> {
        let mut ctx = DescentContext::new(None);
        match self.find_leaf(key, OpKind::Read, &mut ctx) {
            Ok(leaf) => {
                ctx.release_root();
                // The iterator takes over the leaf latch and pin; it unpins
                // on advance or drop.
                let position = leaf.map(|node| {
                    let index = key.map_or(0, |key| node.key_index(key));
                    (ctx.take_leaf_latch().expect("leaf is latched"), node, index)
                });
                Ok(BTreeIterator::new(self.buffer_pool.clone(), position))
            }
            Err(e) => {
                let _ = ctx.free_all(false, &self.buffer_pool);
                Err(e)
            }
        }
    }

    /// Descend to the leaf responsible for `key` (or the leftmost leaf when
    /// `key` is None), crabbing latches per `op`. On return the leaf — and,
    /// for an unsafe write descent, its ancestors — sit latched in the
    /// context. Returns None for an empty tree, with the root latch
    /// released.
    fn find_leaf(
        &self,
        key: Option<&K>,
        op: OpKind,
        ctx: &mut DescentContext,
    ) -> Result<Option<BTreeNode<K>>, BTreeError> {
        let exclusive = op.exclusive();
        ctx.latch_root(&self.root_page_id, exclusive);
        let root_id = ctx.root_id().expect("root latch just acquired");
        if root_id == INVALID_PAGE_ID {
            ctx.release_root();
            return Ok(None);
        }

        let mut previous: Option<PageId> = None;
        let mut current = root_id;
        loop {
            let node = self.crabbing_fetch(current, op, previous, ctx)?;
            if node.is_leaf() {
                return Ok(Some(node));
            }
            let next = match key {
                Some(key) => node.internal_lookup(key),
                None => node.child_at(0),
            };
            previous = Some(current);
            current = next;
        }
    }

    /// Fetch and latch one page on the descent path. When the node is safe
    /// for the operation (always, for reads), every latch held so far —
    /// root latch included — is released before this page joins the
    /// page-set.
    fn crabbing_fetch(
        &self,
        page_id: PageId,
        op: OpKind,
        previous: Option<PageId>,
        ctx: &mut DescentContext,
    ) -> Result<BTreeNode<K>, BTreeError> {
        let exclusive = op.exclusive();
        let page_ptr = self.buffer_pool.fetch_page(page_id)?;
        let latch = PageLatch::acquire(&page_ptr, exclusive);
        let node = deserialize_node::<K>(latch.page())?;
        if previous.is_some() && (!exclusive || node.is_safe(op)) {
            ctx.free_all(exclusive, &self.buffer_pool)?;
        }
        ctx.push_page(latch);
        Ok(node)
    }

    /// First insert into an empty tree: allocate a leaf root and publish it.
    fn start_new_tree(
        &self,
        key: &K,
        value: Rid,
        ctx: &mut DescentContext,
    ) -> Result<(), BTreeError> {
        let (page_ptr, page_id) = self.buffer_pool.new_page()?;
        let mut root = BTreeNode::new_leaf(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        root.leaf_insert(key.clone(), value);
        {
            let mut page = page_ptr.write();
            serialize_node(&root, &mut page)?;
        }
        self.buffer_pool.unpin_page(page_id, true)?;
        ctx.set_root_id(page_id);
        self.update_root_record(page_id)
    }

    /// Allocate a sibling, write-latch it into the page-set, and move the
    /// upper half of `node` into it. Children moving between internal nodes
    /// are re-parented on the spot.
    fn split(
        &self,
        node: &mut BTreeNode<K>,
        ctx: &mut DescentContext,
    ) -> Result<BTreeNode<K>, BTreeError> {
        let (page_ptr, page_id) = self.buffer_pool.new_page()?;
        ctx.push_page(PageLatch::acquire(&page_ptr, true));

        let mut sibling = if node.is_leaf() {
            BTreeNode::new_leaf(page_id, node.parent_page_id, self.leaf_max_size)
        } else {
            BTreeNode::new_internal(page_id, node.parent_page_id, self.internal_max_size)
        };
        let moved = node.move_half_to(&mut sibling);
        for child in moved {
            self.set_parent(ctx, child, page_id)?;
        }
        Ok(sibling)
    }

    /// Link a freshly split `new_node` (right of `old_node`, separated by
    /// `separator`) into the parent, growing a new root or splitting the
    /// parent as needed.
    fn insert_into_parent(
        &self,
        mut old_node: BTreeNode<K>,
        separator: K,
        mut new_node: BTreeNode<K>,
        ctx: &mut DescentContext,
    ) -> Result<(), BTreeError> {
        if old_node.is_root() {
            // Root split: the exclusive root latch is still held, since an
            // unsafe descent never releases it.
            let (page_ptr, root_id) = self.buffer_pool.new_page()?;
            let root = BTreeNode::new_root(
                root_id,
                old_node.page_id,
                separator,
                new_node.page_id,
                self.internal_max_size,
            );
            {
                let mut page = page_ptr.write();
                serialize_node(&root, &mut page)?;
            }
            self.buffer_pool.unpin_page(root_id, true)?;

            old_node.parent_page_id = root_id;
            new_node.parent_page_id = root_id;
            self.store_node(&old_node, ctx)?;
            self.store_node(&new_node, ctx)?;
            ctx.set_root_id(root_id);
            return self.update_root_record(root_id);
        }

        let parent_id = old_node.parent_page_id;
        new_node.parent_page_id = parent_id;
        self.store_node(&old_node, ctx)?;
        self.store_node(&new_node, ctx)?;

        let mut parent = self.load_latched(parent_id, ctx)?;
        parent.insert_node_after(old_node.page_id, separator, new_node.page_id);
        if parent.size() > parent.max_size {
            let new_parent = self.split(&mut parent, ctx)?;
            let separator = new_parent.key_at(0).clone();
            self.insert_into_parent(parent, separator, new_parent, ctx)?;
        } else {
            self.store_node(&parent, ctx)?;
        }
        Ok(())
    }

    /// Restore the size invariant of an underfull `node`: merge with a
    /// sibling when both fit in one page, otherwise borrow one entry.
    /// Returns true when `node`'s page got scheduled for deletion.
    fn coalesce_or_redistribute(
        &self,
        node: BTreeNode<K>,
        ctx: &mut DescentContext,
    ) -> Result<bool, BTreeError> {
        if node.is_root() {
            return self.adjust_root(node, ctx);
        }

        let parent_id = node.parent_page_id;
        let mut parent = self.load_latched(parent_id, ctx)?;
        let index = parent.child_index(node.page_id).ok_or_else(|| {
            BTreeError::Corrupt(format!("page {} missing from its parent", node.page_id))
        })?;
        // Prefer the left sibling; only the leftmost child borrows right.
        let (sibling_index, sibling_is_right) =
            if index == 0 { (1, true) } else { (index - 1, false) };
        let sibling_id = parent.child_at(sibling_index);
        let sibling = self.crabbing_fetch(sibling_id, OpKind::Delete, None, ctx)?;

        if node.size() + sibling.size() <= node.max_size {
            // Coalesce into whichever of the two is on the left.
            let (mut left, mut right, right_index) = if sibling_is_right {
                (node, sibling, sibling_index)
            } else {
                (sibling, node, index)
            };
            let separator = parent.key_at(right_index).clone();
            let moved = right.move_all_to(&mut left, separator);
            for child in moved {
                self.set_parent(ctx, child, left.page_id)?;
            }
            ctx.add_deleted(right.page_id);
            parent.remove_at(right_index);
            self.store_node(&left, ctx)?;

            // Internal parents recurse at <= min_size: the invalid slot-0
            // key makes their effective load one smaller than it looks.
            if parent.size() <= parent.min_size() {
                self.coalesce_or_redistribute(parent, ctx)?;
            } else {
                self.store_node(&parent, ctx)?;
            }
            return Ok(true);
        }

        self.redistribute(node, sibling, parent, index, sibling_index, sibling_is_right, ctx)?;
        Ok(false)
    }

    /// Move exactly one entry from the sibling and fix the parent separator.
    #[allow(clippy::too_many_arguments)]
    fn redistribute(
        &self,
        mut node: BTreeNode<K>,
        mut sibling: BTreeNode<K>,
        mut parent: BTreeNode<K>,
        index: usize,
        sibling_index: usize,
        sibling_is_right: bool,
        ctx: &mut DescentContext,
    ) -> Result<(), BTreeError> {
        let moved_child = if sibling_is_right {
            let moved = node.steal_first_from(&mut sibling);
            parent.set_key_at(sibling_index, sibling.key_at(0).clone());
            moved
        } else {
            let moved = node.steal_last_from(&mut sibling);
            parent.set_key_at(index, node.key_at(0).clone());
            moved
        };
        if let Some(child) = moved_child {
            self.set_parent(ctx, child, node.page_id)?;
        }
        self.store_node(&node, ctx)?;
        self.store_node(&sibling, ctx)?;
        self.store_node(&parent, ctx)
    }

    /// Handle the two root collapse cases: an emptied leaf root empties the
    /// tree; an internal root left with one child promotes that child.
    fn adjust_root(
        &self,
        node: BTreeNode<K>,
        ctx: &mut DescentContext,
    ) -> Result<bool, BTreeError> {
        if node.is_leaf() {
            if node.size() == 0 {
                ctx.set_root_id(INVALID_PAGE_ID);
                self.update_root_record(INVALID_PAGE_ID)?;
                ctx.add_deleted(node.page_id);
                return Ok(true);
            }
            self.store_node(&node, ctx)?;
            return Ok(false);
        }
        if node.size() == 1 {
            let child = node.only_child();
            ctx.set_root_id(child);
            self.update_root_record(child)?;
            self.set_parent(ctx, child, INVALID_PAGE_ID)?;
            ctx.add_deleted(node.page_id);
            return Ok(true);
        }
        self.store_node(&node, ctx)?;
        Ok(false)
    }

    /// Rewrite a child's parent pointer. The child may already be
    /// write-latched by this very descent (it is, whenever a split or merge
    /// moves the page we descended through), in which case its held latch is
    /// used instead of a second, self-deadlocking acquisition.
    fn set_parent(
        &self,
        ctx: &mut DescentContext,
        child_id: PageId,
        parent_id: PageId,
    ) -> Result<(), BTreeError> {
        let held = ctx.with_page_mut(child_id, |page| -> Result<(), BTreeError> {
            let mut child: BTreeNode<K> = deserialize_node(page)?;
            child.parent_page_id = parent_id;
            serialize_node(&child, page)
        });
        if let Some(result) = held {
            return result;
        }

        let page_ptr = self.buffer_pool.fetch_page(child_id)?;
        {
            let mut page = page_ptr.write();
            let mut child: BTreeNode<K> = deserialize_node(&page)?;
            child.parent_page_id = parent_id;
            serialize_node(&child, &mut page)?;
        }
        self.buffer_pool.unpin_page(child_id, true)?;
        Ok(())
    }

    /// Decode a node this descent already holds latched.
    fn load_latched(
        &self,
        page_id: PageId,
        ctx: &mut DescentContext,
    ) -> Result<BTreeNode<K>, BTreeError> {
        ctx.with_page(page_id, deserialize_node::<K>)
            .ok_or_else(|| BTreeError::Corrupt(format!("page {} is not latched", page_id)))?
    }

    /// Encode a node back into its latched page.
    fn store_node(&self, node: &BTreeNode<K>, ctx: &mut DescentContext) -> Result<(), BTreeError> {
        ctx.with_page_mut(node.page_id, |page| serialize_node(node, page))
            .ok_or_else(|| BTreeError::Corrupt(format!("page {} is not latched", node.page_id)))?
    }

    /// Publish a root change to the header page. Callers hold the exclusive
    /// root latch.
    fn update_root_record(&self, root_page_id: PageId) -> Result<(), BTreeError> {
        let header = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut page = header.write();
            if HeaderPage::get_record(&page, &self.index_name).is_some() {
                HeaderPage::update_record(&mut page, &self.index_name, root_page_id)?;
            } else {
                HeaderPage::insert_record(&mut page, &self.index_name, root_page_id)?;
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }

    /// Structural self-check for tests: key ordering, size bounds,
    /// separator bracketing, uniform leaf depth, and the leaf chain. Not
    /// synchronized against concurrent writers.
    pub fn check_integrity(&self) -> Result<(), BTreeError> {
        let root_id = self.root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }
        let mut leaves = Vec::new();
        self.check_subtree(root_id, INVALID_PAGE_ID, None, None, 0, &mut leaves)?;

        // All leaves at one depth, chained left to right in key order.
        let depth = leaves[0].0;
        let mut expected_next = leaves[0].1;
        let mut last_key: Option<K> = None;
        for (i, (leaf_depth, page_id, next, first, last)) in leaves.iter().cloned().enumerate() {
            if leaf_depth != depth {
                return Err(BTreeError::Corrupt("leaves at unequal depth".into()));
            }
            if i > 0 {
                if expected_next != page_id {
                    return Err(BTreeError::Corrupt("broken leaf chain".into()));
                }
                if let (Some(prev), Some(first)) = (&last_key, &first) {
                    if prev >= first {
                        return Err(BTreeError::Corrupt("leaf chain out of key order".into()));
                    }
                }
            }
            expected_next = next;
            if last.is_some() {
                last_key = last;
            }
        }
        if expected_next != INVALID_PAGE_ID {
            return Err(BTreeError::Corrupt("last leaf has a successor".into()));
        }
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn check_subtree(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<&K>,
        upper: Option<&K>,
        depth: usize,
        leaves: &mut Vec<(usize, PageId, PageId, Option<K>, Option<K>)>,
    ) -> Result<(), BTreeError> {
        let page_ptr = self.buffer_pool.fetch_page(page_id)?;
        let node = {
            let page = page_ptr.read();
            deserialize_node::<K>(&page)?
        };
        self.buffer_pool.unpin_page(page_id, false)?;

        if node.parent_page_id != expected_parent {
            return Err(BTreeError::Corrupt(format!(
                "page {} has wrong parent pointer",
                page_id
            )));
        }
        if !node.is_root() && (node.size() < node.min_size() || node.size() > node.max_size) {
            return Err(BTreeError::Corrupt(format!(
                "page {} violates size bounds",
                page_id
            )));
        }

        // Keys strictly increasing; slot 0 of internal nodes not compared.
        let first_real_key = if node.is_leaf() { 0 } else { 1 };
        for i in (first_real_key + 1)..node.keys.len() {
            if node.keys[i - 1] >= node.keys[i] {
                return Err(BTreeError::Corrupt(format!(
                    "page {} keys out of order",
                    page_id
                )));
            }
        }
        for key in node.keys.iter().skip(first_real_key) {
            if lower.is_some_and(|lo| key < lo) || upper.is_some_and(|hi| key >= hi) {
                return Err(BTreeError::Corrupt(format!(
                    "page {} key outside separator bracket",
                    page_id
                )));
            }
        }

        if node.is_leaf() {
            leaves.push((
                depth,
                page_id,
                node.next_page_id,
                node.keys.first().cloned(),
                node.keys.last().cloned(),
            ));
            return Ok(());
        }
        for i in 0..node.children.len() {
            let child_lower = if i == 0 { lower } else { Some(&node.keys[i]) };
            let child_upper = if i + 1 < node.keys.len() {
                Some(&node.keys[i + 1])
            } else {
                upper
            };
            self.check_subtree(
                node.child_at(i),
                page_id,
                child_lower,
                child_upper,
                depth + 1,
                leaves,
            )?;
        }
        Ok(())
    }
}
