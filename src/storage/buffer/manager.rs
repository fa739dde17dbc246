use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::config::EngineConfig;
use crate::common::types::{
    Frame, FrameId, FramePtr, Page, PageId, PagePtr, INVALID_PAGE_ID,
};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_table::ExtendibleHashTable;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;
use crate::transaction::wal::log_manager::LogManager;

struct PoolState {
    free_list: VecDeque<FrameId>,
}

/// Fixed-size buffer pool fronting the paged data file.
///
/// All bookkeeping operations are serialized by one pool-level mutex; the
/// page latches inside each frame are a separate, longer-lived concern owned
/// by callers. Before a dirty page goes to disk, the log is forced up to the
/// page's LSN (WAL-before-flush) — that guard is never bypassed.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FramePtr>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruReplacer,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    /// Build a pool of `pool_size` frames over `disk_manager`. Without a log
    /// manager, logging (and the WAL flush guard) is disabled — the usual
    /// setup for storage-only tests.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_log_manager(pool_size, disk_manager, None)
    }

    pub fn with_log_manager(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        Self::with_config(
            &EngineConfig {
                pool_size,
                ..EngineConfig::default()
            },
            disk_manager,
            log_manager,
        )
    }

    pub fn with_config(
        config: &EngineConfig,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let pool_size = config.pool_size;
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = i as FrameId;
            let page = Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Arc::new(parking_lot::RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }
        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(config.bucket_size),
            replacer: LruReplacer::new(),
            state: Mutex::new(PoolState { free_list }),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Fetch a page, pinning it. Resident pages are returned directly;
    /// otherwise a frame is claimed from the free list or the replacer, its
    /// previous occupant written back if dirty, and the page read from disk.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId);
        }
        let mut state = self.state.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let mut frame = self.frames[frame_id as usize].write();
            frame.pin_count += 1;
            self.replacer.erase(frame_id);
            return Ok(frame.page.clone());
        }

        let frame_id = self.obtain_frame(&mut state)?;
        let mut frame = self.frames[frame_id as usize].write();
        {
            let mut page = frame.page.write();
            self.disk_manager.read_page(page_id, &mut page.data);
            page.page_id = page_id;
            page.lsn = 0;
        }
        frame.pin_count = 1;
        frame.is_dirty = false;
        self.page_table.insert(page_id, frame_id);
        Ok(frame.page.clone())
    }

    /// Allocate a fresh on-disk page and pin it in a frame.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = self.obtain_frame(&mut state)?;
        let page_id = self.disk_manager.allocate_page();

        let mut frame = self.frames[frame_id as usize].write();
        {
            let mut page = frame.page.write();
            page.reset();
            page.page_id = page_id;
        }
        frame.pin_count = 1;
        frame.is_dirty = false;
        self.page_table.insert(page_id, frame_id);
        Ok((frame.page.clone(), page_id))
    }

    /// Drop one pin. The dirty flag is OR-ed in; at pin count zero the frame
    /// becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let _state = self.state.lock();
        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        let mut frame = self.frames[frame_id as usize].write();

        frame.is_dirty |= is_dirty;
        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            self.replacer.insert(frame_id);
        }
        Ok(())
    }

    /// Write a resident page to disk if dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId);
        }
        let _state = self.state.lock();
        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        let mut frame = self.frames[frame_id as usize].write();
        if frame.is_dirty {
            let page = frame.page.read();
            self.wal_guard(&page);
            self.disk_manager.write_page(page.page_id, &page.data);
            drop(page);
            frame.is_dirty = false;
        }
        Ok(())
    }

    /// Flush every dirty resident page.
    pub fn flush_all_pages(&self) {
        let _state = self.state.lock();
        for frame in &self.frames {
            let mut frame = frame.write();
            if frame.is_dirty {
                let page = frame.page.read();
                if page.page_id != INVALID_PAGE_ID {
                    self.wal_guard(&page);
                    self.disk_manager.write_page(page.page_id, &page.data);
                }
                drop(page);
                frame.is_dirty = false;
            }
        }
    }

    /// Remove a page from the pool and hand its frame back to the free list.
    /// Fails while anyone still holds a pin. The disk-side deallocation is a
    /// no-op but is always issued.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        if let Some(frame_id) = self.page_table.find(&page_id) {
            let mut frame = self.frames[frame_id as usize].write();
            if frame.pin_count > 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }
            self.replacer.erase(frame_id);
            self.page_table.remove(&page_id);
            frame.page.write().reset();
            frame.is_dirty = false;
            state.free_list.push_back(frame_id);
        }
        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    /// Pin-discipline check for tests: true when no frame is pinned.
    pub fn check_all_unpinned(&self) -> bool {
        let _state = self.state.lock();
        self.frames.iter().all(|frame| frame.read().pin_count == 0)
    }

    /// Claim a frame: free list first, then LRU victim (with dirty
    /// write-back behind the WAL guard). Fails when everything is pinned.
    fn obtain_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }
        let frame_id = self.replacer.victim().ok_or(BufferPoolError::OutOfFrames)?;
        let mut frame = self.frames[frame_id as usize].write();
        debug_assert_eq!(frame.pin_count, 0);

        let old_page_id = {
            let page = frame.page.read();
            if frame.is_dirty {
                self.wal_guard(&page);
                self.disk_manager.write_page(page.page_id, &page.data);
            }
            page.page_id
        };
        frame.is_dirty = false;
        if old_page_id != INVALID_PAGE_ID {
            self.page_table.remove(&old_page_id);
        }
        Ok(frame_id)
    }

    /// WAL invariant: the log must be durable up to a page's LSN before that
    /// page image reaches disk. Loops because a concurrent flush completion
    /// can satisfy the force-wait without covering this page's LSN yet.
    fn wal_guard(&self, page: &Page) {
        if let Some(log_manager) = &self.log_manager {
            if log_manager.is_enabled() {
                while log_manager.persistent_lsn() < page.lsn {
                    log_manager.flush(true);
                }
            }
        }
    }
}
