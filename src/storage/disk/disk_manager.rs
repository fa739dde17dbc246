use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use log::{debug, error};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles page-aligned I/O on the data file and sequential I/O
/// on the append-only log file.
///
/// Page N occupies bytes `[N * PAGE_SIZE, (N + 1) * PAGE_SIZE)`. Page 0 is
/// reserved for the header page, so the allocation counter never starts
/// below 1.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
    log_path: PathBuf,
    next_page_id: AtomicI32,
    num_flushes: AtomicU32,
}

impl DiskManager {
    /// Open (or create) the database file and its sibling `.log` file.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let db_path = db_path.as_ref();
        let log_path = db_path.with_extension("log");

        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&log_path)?;

        // Seed the monotonic allocation counter from the file length so that
        // page ids survive a restart. Page 0 is the header page.
        let pages_on_disk = (db_file.metadata()?.len() / PAGE_SIZE as u64) as PageId;
        let next_page_id = pages_on_disk.max(1);

        Ok(Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            log_path,
            next_page_id: AtomicI32::new(next_page_id),
            num_flushes: AtomicU32::new(0),
        })
    }

    /// Write a page image to its slot in the data file.
    ///
    /// I/O errors are logged and swallowed: data-file durability is
    /// re-established by recovery, not by the caller.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) {
        if page_id == INVALID_PAGE_ID {
            error!("refusing to write page with invalid id");
            return;
        }
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();
        let result = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(data))
            .and_then(|_| file.flush());
        if let Err(e) = result {
            error!("I/O error while writing page {}: {}", page_id, e);
        }
    }

    /// Read a page image from the data file. Reads past the end of the file
    /// (a freshly allocated page) yield zeroes, as does a short tail.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8; PAGE_SIZE]) {
        if page_id == INVALID_PAGE_ID {
            error!("refusing to read page with invalid id");
            return;
        }
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();

        let file_size = match file.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                error!("I/O error while reading page {}: {}", page_id, e);
                return;
            }
        };
        if offset >= file_size {
            // Never written: a fresh zero page.
            data.fill(0);
            return;
        }

        let result = file.seek(SeekFrom::Start(offset)).and_then(|_| {
            let readable = ((file_size - offset) as usize).min(PAGE_SIZE);
            file.read_exact(&mut data[..readable])?;
            data[readable..].fill(0);
            Ok(())
        });
        if let Err(e) = result {
            error!("I/O error while reading page {}: {}", page_id, e);
        }
    }

    /// Allocate a new page: a monotonic counter, no free-space map.
    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Deallocation is a no-op; space is not reclaimed.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Append a chunk of serialized log records and force it to stable
    /// storage. Unlike data-file writes, log writes must be reliable.
    pub fn write_log(&self, data: &[u8]) -> Result<(), DiskManagerError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut file = self.log_file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        file.sync_data()?;
        self.num_flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Read up to `buf.len()` bytes of log starting at `offset`; a short
    /// tail is zero-filled. Returns false once `offset` is at or past the
    /// end of the log, which recovery treats as end-of-log.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> bool {
        let mut file = self.log_file.lock();
        let file_size = match file.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                error!("I/O error while reading log: {}", e);
                return false;
            }
        };
        if offset >= file_size {
            debug!("end of log file at offset {}", offset);
            return false;
        }
        let result = file.seek(SeekFrom::Start(offset)).and_then(|_| {
            let readable = ((file_size - offset) as usize).min(buf.len());
            file.read_exact(&mut buf[..readable])?;
            buf[readable..].fill(0);
            Ok(())
        });
        if let Err(e) = result {
            error!("I/O error while reading log: {}", e);
            return false;
        }
        true
    }

    /// Number of forced log flushes so far.
    pub fn num_flushes(&self) -> u32 {
        self.num_flushes.load(Ordering::SeqCst)
    }

    /// Byte length of the log file.
    pub fn log_size(&self) -> u64 {
        std::fs::metadata(&self.log_path).map(|m| m.len()).unwrap_or(0)
    }
}
