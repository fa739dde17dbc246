use std::sync::Arc;

use anyhow::Result;

mod common;
use common::{create_logged_engine, reopen_engine};

use rookdb::common::types::{PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use rookdb::storage::buffer::BufferPoolManager;
use rookdb::storage::page::{PageError, PageManager};
use rookdb::transaction::wal::log_manager::LogManager;
use rookdb::transaction::wal::log_record::{LogRecord, LogRecordType};
use rookdb::transaction::wal::recovery::LogRecovery;
use rookdb::transaction::Transaction;

// The moves a table heap would make: log first, apply to the page, stamp the
// page LSN.

fn logged_new_page(
    buffer_pool: &Arc<BufferPoolManager>,
    log_manager: &Arc<LogManager>,
    txn: &Transaction,
) -> Result<PageId> {
    let (page, page_id) = buffer_pool.new_page()?;
    let mut record = LogRecord::new_new_page(txn.id(), txn.prev_lsn(), INVALID_PAGE_ID, page_id);
    let lsn = log_manager.append_log_record(&mut record);
    txn.set_prev_lsn(lsn);

    let pm = PageManager::new();
    let mut guard = page.write();
    pm.init_page(&mut guard);
    pm.set_page_lsn(&mut guard, lsn);
    drop(guard);
    buffer_pool.unpin_page(page_id, true)?;
    Ok(page_id)
}

fn logged_insert(
    buffer_pool: &Arc<BufferPoolManager>,
    log_manager: &Arc<LogManager>,
    txn: &Transaction,
    page_id: PageId,
    tuple: &[u8],
) -> Result<Rid> {
    let pm = PageManager::new();
    let page = buffer_pool.fetch_page(page_id)?;
    let mut guard = page.write();
    let slot = pm.insert_record(&mut guard, tuple)?;
    let rid = Rid::new(page_id, slot);

    let mut record = LogRecord::new_insert(txn.id(), txn.prev_lsn(), rid, tuple.to_vec());
    let lsn = log_manager.append_log_record(&mut record);
    txn.set_prev_lsn(lsn);
    pm.set_page_lsn(&mut guard, lsn);
    drop(guard);
    buffer_pool.unpin_page(page_id, true)?;
    Ok(rid)
}

fn logged_commit(log_manager: &Arc<LogManager>, txn: &Transaction) {
    let mut record = LogRecord::new_commit(txn.id(), txn.prev_lsn());
    let lsn = log_manager.append_log_record(&mut record);
    txn.set_prev_lsn(lsn);
    log_manager.flush(true);
}

fn begin(log_manager: &Arc<LogManager>, txn_id: i32) -> Transaction {
    let txn = Transaction::new(txn_id);
    let mut record = LogRecord::new_begin(txn_id);
    let lsn = log_manager.append_log_record(&mut record);
    txn.set_prev_lsn(lsn);
    txn
}

#[test]
fn test_committed_survives_uncommitted_rolls_back() -> Result<()> {
    // Crash simulation: T1 inserts and commits; T2 inserts and crashes.
    // After recovery T1's tuple is present and T2's is gone.
    let (_disk, log_manager, buffer_pool, temp_file) = create_logged_engine(8, 1 << 16)?;

    let t1 = begin(&log_manager, 1);
    let page_id = logged_new_page(&buffer_pool, &log_manager, &t1)?;
    let committed = logged_insert(&buffer_pool, &log_manager, &t1, page_id, b"committed-row")?;
    logged_commit(&log_manager, &t1);

    let t2 = begin(&log_manager, 2);
    let lost = logged_insert(&buffer_pool, &log_manager, &t2, page_id, b"lost-row")?;
    // Make sure T2's records are on disk too: recovery must undo them, not
    // merely fail to see them.
    log_manager.flush(true);
    log_manager.stop_flush_thread();

    // Crash: drop the engine without flushing any data page.
    drop(buffer_pool);

    let (disk, buffer_pool) = reopen_engine(&temp_file, 8)?;
    let mut recovery = LogRecovery::new(disk, buffer_pool.clone(), 1 << 16);
    recovery.recover()?;

    let pm = PageManager::new();
    let page = buffer_pool.fetch_page(page_id)?;
    let guard = page.read();
    assert_eq!(pm.get_record(&guard, committed.slot)?, b"committed-row");
    assert_eq!(
        pm.get_record(&guard, lost.slot),
        Err(PageError::RecordNotFound)
    );
    drop(guard);
    buffer_pool.unpin_page(page_id, false)?;
    assert!(buffer_pool.check_all_unpinned());
    Ok(())
}

#[test]
fn test_redo_is_idempotent() -> Result<()> {
    let (_disk, log_manager, buffer_pool, temp_file) = create_logged_engine(8, 1 << 16)?;

    let t1 = begin(&log_manager, 1);
    let page_id = logged_new_page(&buffer_pool, &log_manager, &t1)?;
    for i in 0..5u32 {
        logged_insert(
            &buffer_pool,
            &log_manager,
            &t1,
            page_id,
            format!("row-{}", i).as_bytes(),
        )?;
    }
    logged_commit(&log_manager, &t1);
    log_manager.stop_flush_thread();
    drop(buffer_pool);

    // First recovery, flushed to disk.
    let (disk, buffer_pool) = reopen_engine(&temp_file, 8)?;
    let mut recovery = LogRecovery::new(disk.clone(), buffer_pool.clone(), 1 << 16);
    recovery.recover()?;
    buffer_pool.flush_all_pages();
    let mut first = [0u8; PAGE_SIZE];
    disk.read_page(page_id, &mut first);
    drop(recovery);
    drop(buffer_pool);

    // Second recovery over the already-recovered file changes nothing.
    let (disk, buffer_pool) = reopen_engine(&temp_file, 8)?;
    let mut recovery = LogRecovery::new(disk.clone(), buffer_pool.clone(), 1 << 16);
    recovery.recover()?;
    buffer_pool.flush_all_pages();
    let mut second = [0u8; PAGE_SIZE];
    disk.read_page(page_id, &mut second);

    assert_eq!(first.as_slice(), second.as_slice());
    Ok(())
}

#[test]
fn test_update_and_delete_round_trip_through_crash() -> Result<()> {
    let (_disk, log_manager, buffer_pool, temp_file) = create_logged_engine(8, 1 << 16)?;
    let pm = PageManager::new();

    // T1 commits an insert, an update, and a full two-phase delete of a
    // second row.
    let t1 = begin(&log_manager, 1);
    let page_id = logged_new_page(&buffer_pool, &log_manager, &t1)?;
    let kept = logged_insert(&buffer_pool, &log_manager, &t1, page_id, b"original")?;
    let doomed = logged_insert(&buffer_pool, &log_manager, &t1, page_id, b"doomed")?;

    {
        let page = buffer_pool.fetch_page(page_id)?;
        let mut guard = page.write();

        let mut update = LogRecord::new_update(
            t1.id(),
            t1.prev_lsn(),
            kept,
            b"original".to_vec(),
            b"replaced".to_vec(),
        );
        let lsn = log_manager.append_log_record(&mut update);
        t1.set_prev_lsn(lsn);
        pm.update_record(&mut guard, kept.slot, b"replaced")?;
        pm.set_page_lsn(&mut guard, lsn);

        let mut mark = LogRecord::new_delete(
            LogRecordType::MarkDelete,
            t1.id(),
            t1.prev_lsn(),
            doomed,
            b"doomed".to_vec(),
        );
        let lsn = log_manager.append_log_record(&mut mark);
        t1.set_prev_lsn(lsn);
        pm.mark_delete(&mut guard, doomed.slot)?;
        pm.set_page_lsn(&mut guard, lsn);

        let mut apply = LogRecord::new_delete(
            LogRecordType::ApplyDelete,
            t1.id(),
            t1.prev_lsn(),
            doomed,
            b"doomed".to_vec(),
        );
        let lsn = log_manager.append_log_record(&mut apply);
        t1.set_prev_lsn(lsn);
        pm.apply_delete(&mut guard, doomed.slot)?;
        pm.set_page_lsn(&mut guard, lsn);

        drop(guard);
        buffer_pool.unpin_page(page_id, true)?;
    }
    logged_commit(&log_manager, &t1);

    // T2 updates the kept row but never commits.
    let t2 = begin(&log_manager, 2);
    {
        let page = buffer_pool.fetch_page(page_id)?;
        let mut guard = page.write();
        let mut update = LogRecord::new_update(
            t2.id(),
            t2.prev_lsn(),
            kept,
            b"replaced".to_vec(),
            b"scribble".to_vec(),
        );
        let lsn = log_manager.append_log_record(&mut update);
        t2.set_prev_lsn(lsn);
        pm.update_record(&mut guard, kept.slot, b"scribble")?;
        pm.set_page_lsn(&mut guard, lsn);
        drop(guard);
        buffer_pool.unpin_page(page_id, true)?;
    }
    log_manager.flush(true);
    log_manager.stop_flush_thread();
    drop(buffer_pool);

    let (disk, buffer_pool) = reopen_engine(&temp_file, 8)?;
    let mut recovery = LogRecovery::new(disk, buffer_pool.clone(), 1 << 16);
    recovery.recover()?;

    let page = buffer_pool.fetch_page(page_id)?;
    let guard = page.read();
    // T1's committed effects stand; T2's update was rolled back.
    assert_eq!(pm.get_record(&guard, kept.slot)?, b"replaced");
    assert_eq!(
        pm.get_record(&guard, doomed.slot),
        Err(PageError::RecordNotFound)
    );
    drop(guard);
    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_short_log_tail_is_end_of_log() -> Result<()> {
    let (disk, log_manager, buffer_pool, temp_file) = create_logged_engine(8, 1 << 16)?;

    let t1 = begin(&log_manager, 1);
    let page_id = logged_new_page(&buffer_pool, &log_manager, &t1)?;
    let rid = logged_insert(&buffer_pool, &log_manager, &t1, page_id, b"durable")?;
    logged_commit(&log_manager, &t1);
    log_manager.stop_flush_thread();

    // Append garbage that looks like a torn final record.
    disk.write_log(&[13u8, 0, 0, 0, 7, 7])?;
    drop(buffer_pool);

    let (disk, buffer_pool) = reopen_engine(&temp_file, 8)?;
    let mut recovery = LogRecovery::new(disk, buffer_pool.clone(), 1 << 16);
    recovery.recover()?;

    let pm = PageManager::new();
    let page = buffer_pool.fetch_page(page_id)?;
    assert_eq!(pm.get_record(&page.read(), rid.slot)?, b"durable");
    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_recovery_lsn_mapping_spans_buffer_boundaries() -> Result<()> {
    // A scratch buffer much smaller than the log forces the redo pass to
    // re-read at record boundaries; the undo chain walk must still work.
    let (_disk, log_manager, buffer_pool, temp_file) = create_logged_engine(8, 1 << 16)?;

    let t1 = begin(&log_manager, 1);
    let page_id = logged_new_page(&buffer_pool, &log_manager, &t1)?;
    let mut committed = Vec::new();
    for i in 0..40u32 {
        committed.push(logged_insert(
            &buffer_pool,
            &log_manager,
            &t1,
            page_id,
            format!("payload-{:03}", i).as_bytes(),
        )?);
    }
    logged_commit(&log_manager, &t1);

    let t2 = begin(&log_manager, 2);
    let lost = logged_insert(&buffer_pool, &log_manager, &t2, page_id, b"uncommitted")?;
    log_manager.flush(true);
    log_manager.stop_flush_thread();
    drop(buffer_pool);

    let (disk, buffer_pool) = reopen_engine(&temp_file, 8)?;
    // 128-byte scratch buffer: a few records per read at most.
    let mut recovery = LogRecovery::new(disk, buffer_pool.clone(), 128);
    recovery.recover()?;

    let pm = PageManager::new();
    let page = buffer_pool.fetch_page(page_id)?;
    let guard = page.read();
    for (i, rid) in committed.iter().enumerate() {
        assert_eq!(
            pm.get_record(&guard, rid.slot)?,
            format!("payload-{:03}", i).into_bytes()
        );
    }
    assert_eq!(
        pm.get_record(&guard, lost.slot),
        Err(PageError::RecordNotFound)
    );
    drop(guard);
    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}
