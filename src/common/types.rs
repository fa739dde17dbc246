use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

/// Page size in bytes
pub const PAGE_SIZE: usize = 4096;

/// Page ID type (-1 means invalid)
pub type PageId = i32;

/// Buffer pool frame index type
pub type FrameId = u32;

/// Transaction ID type (smaller id = older transaction)
pub type TxnId = i32;

/// Log sequence number type
pub type Lsn = i32;

pub const INVALID_PAGE_ID: PageId = -1;
pub const INVALID_LSN: Lsn = -1;
pub const INVALID_TXN_ID: TxnId = -1;

/// Page 0 holds the index-name → root-page-id directory.
pub const HEADER_PAGE_ID: PageId = 0;

/// Record identifier: (page, slot). Used as the lock-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

/// In-memory image of one on-disk page.
///
/// The surrounding `RwLock` in [`PagePtr`] is the page latch: it protects the
/// bytes and is distinct from the buffer pool mutex and from transactional
/// tuple locks.
#[derive(Debug)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    /// Zero the payload and drop the identity, as when a frame is recycled.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
        self.lsn = 0;
    }
}

/// Shared handle to a page; cloned out of the buffer pool to pin holders.
pub type PagePtr = Arc<RwLock<Page>>;

/// One slot of the fixed pool array. Exactly one page resides per frame.
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            is_dirty: false,
            pin_count: 0,
        }
    }
}

pub type FramePtr = Arc<RwLock<Frame>>;

/// An owned read or write latch on a page.
///
/// Owned guards (rather than borrowed ones) let a descent park latches in the
/// transaction's ordered page-set and release them later in acquisition
/// order.
pub enum PageLatch {
    Read(ArcRwLockReadGuard<RawRwLock, Page>),
    Write(ArcRwLockWriteGuard<RawRwLock, Page>),
}

impl PageLatch {
    pub fn acquire(page: &PagePtr, exclusive: bool) -> Self {
        if exclusive {
            PageLatch::Write(RwLock::write_arc(page))
        } else {
            PageLatch::Read(RwLock::read_arc(page))
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page().page_id
    }

    pub fn page(&self) -> &Page {
        match self {
            PageLatch::Read(g) => g,
            PageLatch::Write(g) => g,
        }
    }

    /// Mutable access to the page bytes; `None` for a read latch.
    pub fn page_mut(&mut self) -> Option<&mut Page> {
        match self {
            PageLatch::Read(_) => None,
            PageLatch::Write(g) => Some(&mut *g),
        }
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, PageLatch::Write(_))
    }
}
