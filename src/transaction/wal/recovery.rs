use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::common::types::{Lsn, TxnId, INVALID_LSN, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::disk::DiskManager;
use crate::storage::page::{PageError, PageManager};
use crate::transaction::wal::log_record::{LogPayload, LogRecord, LogRecordType};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Buffer pool error during recovery: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Page error during recovery: {0}")]
    Page(#[from] PageError),

    #[error("Corrupt log: {0}")]
    CorruptLog(String),
}

/// Crash recovery: scan the log, redo history, then roll back losers.
///
/// Runs on startup before any transactions begin, with logging disabled, so
/// no pass generates new log records.
pub struct LogRecovery {
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<BufferPoolManager>,
    page_manager: PageManager,
    /// Transactions with no COMMIT/ABORT seen, mapped to their last LSN.
    active_txn: HashMap<TxnId, Lsn>,
    /// LSN → byte offset in the log file, for the undo pass.
    lsn_mapping: HashMap<Lsn, u64>,
    log_buffer: Vec<u8>,
}

impl LogRecovery {
    pub fn new(
        disk_manager: Arc<DiskManager>,
        buffer_pool: Arc<BufferPoolManager>,
        buffer_size: usize,
    ) -> Self {
        Self {
            disk_manager,
            buffer_pool,
            page_manager: PageManager::new(),
            active_txn: HashMap::new(),
            lsn_mapping: HashMap::new(),
            log_buffer: vec![0; buffer_size],
        }
    }

    /// Redo followed by undo.
    pub fn recover(&mut self) -> Result<(), RecoveryError> {
        self.redo()?;
        self.undo()?;
        Ok(())
    }

    /// Scan the whole log in order, reapplying any effect newer than the
    /// page image it touches. Rebuilds `active_txn` and `lsn_mapping` along
    /// the way. A short or zeroed tail is treated as end-of-log.
    pub fn redo(&mut self) -> Result<(), RecoveryError> {
        self.active_txn.clear();
        self.lsn_mapping.clear();

        let mut file_offset = 0u64;
        while self
            .disk_manager
            .read_log(&mut self.log_buffer, file_offset)
        {
            let mut pos = 0usize;
            loop {
                let record = match LogRecord::deserialize(&self.log_buffer[pos..]) {
                    Ok(record) => record,
                    // Either a record straddling the buffer boundary (the
                    // outer loop re-reads from here) or the end of the log.
                    Err(_) => break,
                };
                let record_size = record.size();
                self.lsn_mapping.insert(record.lsn, file_offset + pos as u64);

                match record.record_type {
                    LogRecordType::Commit | LogRecordType::Abort => {
                        self.active_txn.remove(&record.txn_id);
                    }
                    _ => {
                        self.active_txn.insert(record.txn_id, record.lsn);
                    }
                }
                if !matches!(record.payload, LogPayload::Empty) {
                    self.redo_record(&record)?;
                }
                pos += record_size;
            }
            if pos == 0 {
                break;
            }
            file_offset += pos as u64;
        }
        info!(
            "redo complete: {} loser transaction(s), {} log record(s) indexed",
            self.active_txn.len(),
            self.lsn_mapping.len()
        );
        Ok(())
    }

    fn redo_record(&self, record: &LogRecord) -> Result<(), RecoveryError> {
        let rid = record
            .rid()
            .ok_or_else(|| RecoveryError::CorruptLog("data record without a RID".into()))?;
        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let mut page = page_ptr.write();

        if self.page_manager.page_lsn(&page) >= record.lsn {
            // Effect already on the page image; redo is idempotent.
            drop(page);
            self.buffer_pool.unpin_page(rid.page_id, false)?;
            return Ok(());
        }

        debug!(
            "redo lsn {} ({:?}) on page {}",
            record.lsn, record.record_type, rid.page_id
        );
        match (&record.record_type, &record.payload) {
            (LogRecordType::Insert, LogPayload::Tuple { tuple, .. }) => {
                self.page_manager.restore_record(&mut page, rid.slot, tuple)?;
            }
            (LogRecordType::MarkDelete, _) => {
                self.page_manager.mark_delete(&mut page, rid.slot)?;
            }
            (LogRecordType::ApplyDelete, _) => {
                self.page_manager.apply_delete(&mut page, rid.slot)?;
            }
            (LogRecordType::RollbackDelete, _) => {
                self.page_manager.rollback_delete(&mut page, rid.slot)?;
            }
            (LogRecordType::Update, LogPayload::Update { new_tuple, .. }) => {
                self.page_manager.update_record(&mut page, rid.slot, new_tuple)?;
            }
            (
                LogRecordType::NewPage,
                LogPayload::NewPage {
                    prev_page_id,
                    page_id,
                },
            ) => {
                self.page_manager.init_page_with_links(&mut page, *prev_page_id);
                if *prev_page_id != INVALID_PAGE_ID {
                    self.link_prev_page(*prev_page_id, *page_id)?;
                }
            }
            _ => {
                return Err(RecoveryError::CorruptLog(format!(
                    "payload does not match record type {:?}",
                    record.record_type
                )))
            }
        }
        self.page_manager.set_page_lsn(&mut page, record.lsn);
        drop(page);
        self.buffer_pool.unpin_page(rid.page_id, true)?;
        Ok(())
    }

    fn link_prev_page(
        &self,
        prev_page_id: crate::common::types::PageId,
        page_id: crate::common::types::PageId,
    ) -> Result<(), RecoveryError> {
        let prev_ptr = self.buffer_pool.fetch_page(prev_page_id)?;
        let mut prev = prev_ptr.write();
        let mut header = self.page_manager.get_header(&prev);
        let dirty = header.next_page_id != page_id;
        if dirty {
            header.next_page_id = page_id;
            self.page_manager.set_header(&mut prev, header);
        }
        drop(prev);
        self.buffer_pool.unpin_page(prev_page_id, dirty)?;
        Ok(())
    }

    /// Roll back every loser by walking its `prev_lsn` chain backward and
    /// applying the inverse of each data record.
    pub fn undo(&mut self) -> Result<(), RecoveryError> {
        let losers: Vec<(TxnId, Lsn)> = self.active_txn.iter().map(|(&t, &l)| (t, l)).collect();
        for (txn_id, last_lsn) in losers {
            debug!("undoing loser transaction {}", txn_id);
            let mut lsn = last_lsn;
            while lsn != INVALID_LSN {
                let offset = *self.lsn_mapping.get(&lsn).ok_or_else(|| {
                    RecoveryError::CorruptLog(format!("no file offset for lsn {}", lsn))
                })?;
                if !self.disk_manager.read_log(&mut self.log_buffer, offset) {
                    return Err(RecoveryError::CorruptLog(format!(
                        "log ends before lsn {}",
                        lsn
                    )));
                }
                let record = LogRecord::deserialize(&self.log_buffer).map_err(|e| {
                    RecoveryError::CorruptLog(format!("undo read of lsn {}: {}", lsn, e))
                })?;
                self.undo_record(&record)?;
                lsn = record.prev_lsn;
            }
        }
        self.active_txn.clear();
        Ok(())
    }

    fn undo_record(&self, record: &LogRecord) -> Result<(), RecoveryError> {
        let rid = match record.rid() {
            Some(rid) => rid,
            None => return Ok(()), // BEGIN has nothing to undo
        };
        // An orphaned page costs nothing; space is never reclaimed anyway.
        if record.record_type == LogRecordType::NewPage {
            return Ok(());
        }

        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let mut page = page_ptr.write();
        debug!(
            "undo lsn {} ({:?}) on page {}",
            record.lsn, record.record_type, rid.page_id
        );
        match (&record.record_type, &record.payload) {
            (LogRecordType::Insert, _) => {
                // Tolerate an already-vacated slot: a crash mid-undo leaves
                // no compensation records, so the next undo repeats the walk.
                match self.page_manager.apply_delete(&mut page, rid.slot) {
                    Ok(()) | Err(PageError::RecordNotFound) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            (LogRecordType::MarkDelete, _) => {
                self.page_manager.rollback_delete(&mut page, rid.slot)?;
            }
            (LogRecordType::RollbackDelete, _) => {
                self.page_manager.mark_delete(&mut page, rid.slot)?;
            }
            (LogRecordType::ApplyDelete, LogPayload::Tuple { tuple, .. }) => {
                self.page_manager.restore_record(&mut page, rid.slot, tuple)?;
            }
            (LogRecordType::Update, LogPayload::Update { old_tuple, .. }) => {
                self.page_manager.update_record(&mut page, rid.slot, old_tuple)?;
            }
            _ => {
                return Err(RecoveryError::CorruptLog(format!(
                    "cannot undo record type {:?}",
                    record.record_type
                )))
            }
        }
        drop(page);
        self.buffer_pool.unpin_page(rid.page_id, true)?;
        Ok(())
    }
}
