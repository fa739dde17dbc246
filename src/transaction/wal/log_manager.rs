use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::error;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Lsn, INVALID_LSN};
use crate::storage::disk::DiskManager;
use crate::transaction::wal::log_record::{LogRecord, LOG_HEADER_SIZE};

struct LogState {
    /// Active buffer where appenders serialize records.
    log_buffer: Vec<u8>,
    /// Bytes used in the active buffer.
    offset: usize,
    /// The second buffer, at rest between flushes.
    flush_buffer: Vec<u8>,
    /// Set when a flush has been requested and not yet completed.
    need_flush: bool,
    /// LSN of the last record appended.
    last_lsn: Lsn,
}

/// Group-commit write-ahead log manager.
///
/// Two fixed-size buffers: appenders serialize into `log_buffer` under the
/// mutex; the background flusher swaps the buffers and writes the full one
/// outside the mutex, then publishes `persistent_lsn`. A flush is triggered
/// by buffer pressure, by `LOG_TIMEOUT`, or by the buffer pool's
/// WAL-before-flush guard.
pub struct LogManager {
    disk_manager: Arc<DiskManager>,
    state: Mutex<LogState>,
    /// Wakes the flusher thread.
    flush_cv: Condvar,
    /// Wakes appenders waiting for room and force-flushers waiting for
    /// `need_flush` to clear.
    append_cv: Condvar,
    next_lsn: AtomicI32,
    persistent_lsn: AtomicI32,
    enabled: AtomicBool,
    buffer_size: usize,
    timeout: Duration,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    pub fn with_config(
        disk_manager: Arc<DiskManager>,
        config: &crate::common::config::EngineConfig,
    ) -> Self {
        Self::new(disk_manager, config.log_buffer_size, config.log_timeout)
    }

    pub fn new(disk_manager: Arc<DiskManager>, buffer_size: usize, timeout: Duration) -> Self {
        // Continue LSN assignment past whatever the log file already holds.
        let max_lsn = Self::scan_max_lsn(&disk_manager, buffer_size);
        Self {
            disk_manager,
            state: Mutex::new(LogState {
                log_buffer: vec![0; buffer_size],
                offset: 0,
                flush_buffer: vec![0; buffer_size],
                need_flush: false,
                last_lsn: max_lsn,
            }),
            flush_cv: Condvar::new(),
            append_cv: Condvar::new(),
            // LSNs start at 1: a fresh page image carries page_lsn 0, and the
            // redo guard must see every record as newer than it.
            next_lsn: AtomicI32::new((max_lsn + 1).max(1)),
            persistent_lsn: AtomicI32::new(max_lsn),
            enabled: AtomicBool::new(false),
            buffer_size,
            timeout,
            flush_thread: Mutex::new(None),
        }
    }

    /// Highest LSN present in the log file, or `INVALID_LSN` for an empty
    /// log. Strides record-by-record using the leading size field.
    fn scan_max_lsn(disk_manager: &DiskManager, buffer_size: usize) -> Lsn {
        let mut max_lsn = INVALID_LSN;
        let mut buf = vec![0u8; buffer_size.max(LOG_HEADER_SIZE)];
        let mut file_offset = 0u64;
        while disk_manager.read_log(&mut buf, file_offset) {
            let mut pos = 0usize;
            while let Ok(record) = LogRecord::deserialize(&buf[pos..]) {
                max_lsn = max_lsn.max(record.lsn);
                pos += record.size();
            }
            if pos == 0 {
                break;
            }
            file_offset += pos as u64;
        }
        max_lsn
    }

    /// Start the background flusher and enable logging. Idempotent.
    pub fn run_flush_thread(self: &Arc<Self>) {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::clone(self);
        let handle = std::thread::spawn(move || manager.flush_loop());
        *self.flush_thread.lock() = Some(handle);
    }

    /// Disable logging, drain the buffer, and join the flusher.
    pub fn stop_flush_thread(&self) {
        if !self.enabled.swap(false, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock();
            state.need_flush = true;
            self.flush_cv.notify_one();
        }
        if let Some(handle) = self.flush_thread.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::SeqCst)
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }

    /// Append a record, assigning its LSN. Blocks while the active buffer
    /// has no room, which forces a flush of everything appended so far.
    pub fn append_log_record(&self, record: &mut LogRecord) -> Lsn {
        let size = record.size();
        debug_assert!(
            size < self.buffer_size,
            "log record larger than the log buffer"
        );
        let mut state = self.state.lock();
        while state.offset + size >= self.buffer_size {
            state.need_flush = true;
            self.flush_cv.notify_one();
            self.append_cv.wait(&mut state);
        }
        record.lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let offset = state.offset;
        record.serialize_into(&mut state.log_buffer[offset..offset + size]);
        state.offset += size;
        state.last_lsn = record.lsn;
        record.lsn
    }

    /// `force` — request a flush and wait synchronously until it completes.
    /// Otherwise park on the group-commit path: return once the next
    /// implicit (timeout or pressure) flush has run.
    pub fn flush(&self, force: bool) {
        let mut state = self.state.lock();
        if force {
            state.need_flush = true;
            self.flush_cv.notify_one();
            if self.is_enabled() {
                while state.need_flush {
                    self.append_cv.wait(&mut state);
                }
            }
        } else {
            self.append_cv.wait(&mut state);
        }
    }

    fn flush_loop(self: Arc<Self>) {
        loop {
            let mut state = self.state.lock();
            if !state.need_flush && self.is_enabled() {
                let _ = self.flush_cv.wait_for(&mut state, self.timeout);
            }
            let exiting = !self.is_enabled();

            if state.offset > 0 {
                let flushed = state.offset;
                let last_lsn = state.last_lsn;
                // Swap buffers and do the I/O outside the mutex so appenders
                // keep filling the other buffer.
                let mut buf = std::mem::take(&mut state.flush_buffer);
                std::mem::swap(&mut buf, &mut state.log_buffer);
                state.offset = 0;
                drop(state);

                if let Err(e) = self.disk_manager.write_log(&buf[..flushed]) {
                    error!("failed to write log: {}", e);
                }
                self.persistent_lsn.store(last_lsn, Ordering::SeqCst);

                let mut state = self.state.lock();
                state.flush_buffer = buf;
                state.need_flush = false;
                self.append_cv.notify_all();
            } else {
                state.need_flush = false;
                self.append_cv.notify_all();
            }

            if exiting {
                break;
            }
        }
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        // The flusher holds an Arc to self, so by the time Drop runs the
        // thread is already gone; this only covers a never-started state.
        self.enabled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Rid;
    use tempfile::NamedTempFile;

    fn test_log_manager(buffer_size: usize, timeout: Duration) -> (Arc<LogManager>, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        let manager = Arc::new(LogManager::new(disk, buffer_size, timeout));
        (manager, file)
    }

    #[test]
    fn lsns_are_sequential() {
        let (manager, _file) = test_log_manager(4096, Duration::from_millis(50));
        manager.run_flush_thread();

        let mut begin = LogRecord::new_begin(1);
        let first = manager.append_log_record(&mut begin);
        let mut commit = LogRecord::new_commit(1, first);
        let second = manager.append_log_record(&mut commit);
        assert_eq!(second, first + 1);

        manager.flush(true);
        assert!(manager.persistent_lsn() >= second);
        manager.stop_flush_thread();
    }

    #[test]
    fn buffer_pressure_triggers_flush() {
        // Three ~34-byte records against a 80-byte buffer: the third append
        // must wait for a swap, and the first two become persistent first.
        // The long timeout keeps the periodic flush out of the picture.
        let (manager, _file) = test_log_manager(80, Duration::from_secs(30));
        manager.run_flush_thread();

        let rid = Rid::new(1, 0);
        let mut r1 = LogRecord::new_insert(1, INVALID_LSN, rid, b"ab".to_vec());
        let lsn1 = manager.append_log_record(&mut r1);
        let mut r2 = LogRecord::new_insert(1, lsn1, rid, b"cd".to_vec());
        let lsn2 = manager.append_log_record(&mut r2);
        let mut r3 = LogRecord::new_insert(1, lsn2, rid, b"ef".to_vec());
        let lsn3 = manager.append_log_record(&mut r3);

        assert!(manager.persistent_lsn() >= lsn2);
        manager.flush(true);
        assert!(manager.persistent_lsn() >= lsn3);
        manager.stop_flush_thread();
    }

    #[test]
    fn timeout_flush_advances_persistent_lsn() {
        let (manager, _file) = test_log_manager(4096, Duration::from_millis(50));
        manager.run_flush_thread();
        let mut record = LogRecord::new_begin(9);
        let lsn = manager.append_log_record(&mut record);
        // No force: the periodic flush should pick it up.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while manager.persistent_lsn() < lsn {
            assert!(std::time::Instant::now() < deadline, "flusher never ran");
            std::thread::sleep(Duration::from_millis(10));
        }
        manager.stop_flush_thread();
    }

    #[test]
    fn restart_resumes_lsn_sequence() {
        let file = NamedTempFile::new().unwrap();
        let last = {
            let disk = Arc::new(DiskManager::new(file.path()).unwrap());
            let manager = Arc::new(LogManager::new(disk, 4096, Duration::from_millis(50)));
            manager.run_flush_thread();
            let mut r = LogRecord::new_begin(1);
            manager.append_log_record(&mut r);
            let mut c = LogRecord::new_commit(1, r.lsn);
            let last = manager.append_log_record(&mut c);
            manager.flush(true);
            manager.stop_flush_thread();
            last
        };
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        let manager = Arc::new(LogManager::new(disk, 4096, Duration::from_millis(50)));
        assert_eq!(manager.next_lsn(), last + 1);
        assert_eq!(manager.persistent_lsn(), last);
    }
}
