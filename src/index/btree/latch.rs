use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::common::types::{Page, PageId, PageLatch};
use crate::index::btree::error::BTreeError;
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::transaction::Transaction;

/// What a descent intends to do; decides latch mode and safety rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Insert,
    Delete,
}

impl OpKind {
    pub fn exclusive(self) -> bool {
        !matches!(self, OpKind::Read)
    }
}

/// Owned latch on the tree's root pointer. Taking it shared or exclusive is
/// the first step of every descent; the write guard is also the only place
/// the root page id may change.
pub enum RootLatch {
    Read(ArcRwLockReadGuard<RawRwLock, PageId>),
    Write(ArcRwLockWriteGuard<RawRwLock, PageId>),
}

impl RootLatch {
    pub fn acquire(root: &Arc<RwLock<PageId>>, exclusive: bool) -> Self {
        if exclusive {
            RootLatch::Write(RwLock::write_arc(root))
        } else {
            RootLatch::Read(RwLock::read_arc(root))
        }
    }

    pub fn root_id(&self) -> PageId {
        match self {
            RootLatch::Read(g) => **g,
            RootLatch::Write(g) => **g,
        }
    }

    pub fn set_root_id(&mut self, page_id: PageId) {
        match self {
            RootLatch::Read(_) => unreachable!("root change under a shared root latch"),
            RootLatch::Write(g) => **g = page_id,
        }
    }
}

/// State of one descent through the tree.
///
/// The ordered page-set of latched-and-pinned pages and the deleted-page set
/// live on the transaction; descents without a transaction (plain reads,
/// iterator positioning) use the local fields. Releasing happens in
/// acquisition order: root latch first, then each page latch, its pin, and
/// any deferred page deletion.
pub struct DescentContext<'a> {
    txn: Option<&'a Transaction>,
    root: Option<RootLatch>,
    local_pages: VecDeque<PageLatch>,
    local_deleted: HashSet<PageId>,
}

impl<'a> DescentContext<'a> {
    pub fn new(txn: Option<&'a Transaction>) -> Self {
        Self {
            txn,
            root: None,
            local_pages: VecDeque::new(),
            local_deleted: HashSet::new(),
        }
    }

    /// Take the root latch unless this descent already holds it.
    pub fn latch_root(&mut self, root: &Arc<RwLock<PageId>>, exclusive: bool) {
        if self.root.is_none() {
            self.root = Some(RootLatch::acquire(root, exclusive));
        }
    }

    pub fn root_id(&self) -> Option<PageId> {
        self.root.as_ref().map(|latch| latch.root_id())
    }

    pub fn set_root_id(&mut self, page_id: PageId) {
        self.root
            .as_mut()
            .expect("root change without the root latch")
            .set_root_id(page_id);
    }

    /// Idempotent; descents release the root as soon as safety is known.
    pub fn release_root(&mut self) {
        self.root = None;
    }

    pub fn push_page(&mut self, latch: PageLatch) {
        match self.txn {
            Some(txn) => txn.page_set().push_back(latch),
            None => self.local_pages.push_back(latch),
        }
    }

    /// Schedule a page for deletion once its latch and pin are dropped.
    pub fn add_deleted(&mut self, page_id: PageId) {
        match self.txn {
            Some(txn) => {
                txn.deleted_page_set().insert(page_id);
            }
            None => {
                self.local_deleted.insert(page_id);
            }
        }
    }

    /// Run `f` against a page this descent already holds latched.
    pub fn with_page<R>(&self, page_id: PageId, f: impl FnOnce(&Page) -> R) -> Option<R> {
        match self.txn {
            Some(txn) => {
                let set = txn.page_set();
                set.iter().find(|l| l.page_id() == page_id).map(|l| f(l.page()))
            }
            None => self
                .local_pages
                .iter()
                .find(|l| l.page_id() == page_id)
                .map(|l| f(l.page())),
        }
    }

    /// Run `f` against a write-latched page this descent holds.
    pub fn with_page_mut<R>(
        &mut self,
        page_id: PageId,
        f: impl FnOnce(&mut Page) -> R,
    ) -> Option<R> {
        let apply = |latch: &mut PageLatch| latch.page_mut().map(f);
        match self.txn {
            Some(txn) => {
                let mut set = txn.page_set();
                set.iter_mut()
                    .find(|l| l.page_id() == page_id)
                    .and_then(apply)
            }
            None => self
                .local_pages
                .iter_mut()
                .find(|l| l.page_id() == page_id)
                .and_then(apply),
        }
    }

    /// Release everything this descent holds: the root latch, then every
    /// page in acquisition order (unlatch, unpin, then delete if the page
    /// was scheduled). `dirty` is true for write descents.
    pub fn free_all(
        &mut self,
        dirty: bool,
        buffer_pool: &BufferPoolManager,
    ) -> Result<(), BTreeError> {
        self.release_root();
        let pages: Vec<PageLatch> = match self.txn {
            Some(txn) => txn.page_set().drain(..).collect(),
            None => self.local_pages.drain(..).collect(),
        };
        for latch in pages {
            let page_id = latch.page_id();
            drop(latch);
            buffer_pool.unpin_page(page_id, dirty)?;
            let deleted = match self.txn {
                Some(txn) => txn.deleted_page_set().remove(&page_id),
                None => self.local_deleted.remove(&page_id),
            };
            if deleted {
                buffer_pool.delete_page(page_id)?;
            }
        }
        debug_assert!(match self.txn {
            Some(txn) => txn.deleted_page_set().is_empty(),
            None => self.local_deleted.is_empty(),
        });
        Ok(())
    }

    /// Hand the (single) remaining latch to the caller; used by iterator
    /// construction after a read descent has crabbed down to a leaf.
    pub fn take_leaf_latch(&mut self) -> Option<PageLatch> {
        debug_assert!(self.txn.is_none());
        debug_assert!(self.local_pages.len() <= 1);
        self.local_pages.pop_back()
    }
}
