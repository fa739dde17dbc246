use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::common::types::{Lsn, PageId, Rid, TxnId, INVALID_LSN, INVALID_PAGE_ID};

/// Fixed 20-byte record header: size, lsn, txn_id, prev_lsn, type.
pub const LOG_HEADER_SIZE: usize = 20;

#[derive(Error, Debug)]
pub enum LogRecordError {
    #[error("Truncated log record")]
    Truncated,
    #[error("Unknown log record type: {0}")]
    UnknownType(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LogRecordType {
    Begin = 1,
    Commit = 2,
    Abort = 3,
    Insert = 4,
    MarkDelete = 5,
    ApplyDelete = 6,
    RollbackDelete = 7,
    Update = 8,
    NewPage = 9,
}

impl LogRecordType {
    fn from_u32(value: u32) -> Result<Self, LogRecordError> {
        Ok(match value {
            1 => Self::Begin,
            2 => Self::Commit,
            3 => Self::Abort,
            4 => Self::Insert,
            5 => Self::MarkDelete,
            6 => Self::ApplyDelete,
            7 => Self::RollbackDelete,
            8 => Self::Update,
            9 => Self::NewPage,
            other => return Err(LogRecordError::UnknownType(other)),
        })
    }
}

/// Type-specific body of a log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    /// BEGIN / COMMIT / ABORT carry nothing beyond the header.
    Empty,
    /// INSERT and the three delete flavors: the affected tuple image.
    Tuple { rid: Rid, tuple: Vec<u8> },
    /// UPDATE: before and after images.
    Update {
        rid: Rid,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    },
    /// NEWPAGE: predecessor link and the page being created.
    NewPage {
        prev_page_id: PageId,
        page_id: PageId,
    },
}

/// One write-ahead log record. Records of a transaction chain backward
/// through `prev_lsn`; the `lsn` is assigned by the log manager at append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
    pub payload: LogPayload,
}

impl LogRecord {
    pub fn new_begin(txn_id: TxnId) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn: INVALID_LSN,
            record_type: LogRecordType::Begin,
            payload: LogPayload::Empty,
        }
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: LogRecordType::Commit,
            payload: LogPayload::Empty,
        }
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: LogRecordType::Abort,
            payload: LogPayload::Empty,
        }
    }

    pub fn new_insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: LogRecordType::Insert,
            payload: LogPayload::Tuple { rid, tuple },
        }
    }

    pub fn new_delete(
        delete_type: LogRecordType,
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: Rid,
        tuple: Vec<u8>,
    ) -> Self {
        debug_assert!(matches!(
            delete_type,
            LogRecordType::MarkDelete | LogRecordType::ApplyDelete | LogRecordType::RollbackDelete
        ));
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: delete_type,
            payload: LogPayload::Tuple { rid, tuple },
        }
    }

    pub fn new_update(
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: Rid,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    ) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: LogRecordType::Update,
            payload: LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        }
    }

    pub fn new_new_page(txn_id: TxnId, prev_lsn: Lsn, prev_page_id: PageId, page_id: PageId) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: LogRecordType::NewPage,
            payload: LogPayload::NewPage {
                prev_page_id,
                page_id,
            },
        }
    }

    /// Total serialized size, header included.
    pub fn size(&self) -> usize {
        LOG_HEADER_SIZE
            + match &self.payload {
                LogPayload::Empty => 0,
                LogPayload::Tuple { tuple, .. } => 8 + 4 + tuple.len(),
                LogPayload::Update {
                    old_tuple,
                    new_tuple,
                    ..
                } => 8 + 4 + old_tuple.len() + 4 + new_tuple.len(),
                LogPayload::NewPage { .. } => 8,
            }
    }

    /// Serialize into `buf`, which must hold at least `self.size()` bytes.
    pub fn serialize_into(&self, buf: &mut [u8]) {
        let size = self.size();
        debug_assert!(buf.len() >= size);
        LittleEndian::write_u32(&mut buf[0..4], size as u32);
        LittleEndian::write_i32(&mut buf[4..8], self.lsn);
        LittleEndian::write_i32(&mut buf[8..12], self.txn_id);
        LittleEndian::write_i32(&mut buf[12..16], self.prev_lsn);
        LittleEndian::write_u32(&mut buf[16..20], self.record_type as u32);

        let mut pos = LOG_HEADER_SIZE;
        match &self.payload {
            LogPayload::Empty => {}
            LogPayload::Tuple { rid, tuple } => {
                pos = write_rid(buf, pos, *rid);
                write_tuple(buf, pos, tuple);
            }
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                pos = write_rid(buf, pos, *rid);
                pos = write_tuple(buf, pos, old_tuple);
                write_tuple(buf, pos, new_tuple);
            }
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                LittleEndian::write_i32(&mut buf[pos..pos + 4], *prev_page_id);
                LittleEndian::write_i32(&mut buf[pos + 4..pos + 8], *page_id);
            }
        }
    }

    /// Parse one record from the front of `buf`. Fails on a truncated or
    /// malformed prefix, which recovery treats as end-of-log.
    pub fn deserialize(buf: &[u8]) -> Result<Self, LogRecordError> {
        if buf.len() < LOG_HEADER_SIZE {
            return Err(LogRecordError::Truncated);
        }
        let size = LittleEndian::read_u32(&buf[0..4]) as usize;
        if size < LOG_HEADER_SIZE || size > buf.len() {
            return Err(LogRecordError::Truncated);
        }
        let lsn = LittleEndian::read_i32(&buf[4..8]);
        let txn_id = LittleEndian::read_i32(&buf[8..12]);
        let prev_lsn = LittleEndian::read_i32(&buf[12..16]);
        let record_type = LogRecordType::from_u32(LittleEndian::read_u32(&buf[16..20]))?;

        let body = &buf[LOG_HEADER_SIZE..size];
        let payload = match record_type {
            LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort => LogPayload::Empty,
            LogRecordType::Insert
            | LogRecordType::MarkDelete
            | LogRecordType::ApplyDelete
            | LogRecordType::RollbackDelete => {
                let (rid, pos) = read_rid(body, 0)?;
                let (tuple, _) = read_tuple(body, pos)?;
                LogPayload::Tuple { rid, tuple }
            }
            LogRecordType::Update => {
                let (rid, pos) = read_rid(body, 0)?;
                let (old_tuple, pos) = read_tuple(body, pos)?;
                let (new_tuple, _) = read_tuple(body, pos)?;
                LogPayload::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            LogRecordType::NewPage => {
                if body.len() < 8 {
                    return Err(LogRecordError::Truncated);
                }
                LogPayload::NewPage {
                    prev_page_id: LittleEndian::read_i32(&body[0..4]),
                    page_id: LittleEndian::read_i32(&body[4..8]),
                }
            }
        };

        let record = Self {
            lsn,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        };
        if record.size() != size {
            return Err(LogRecordError::Truncated);
        }
        Ok(record)
    }

    /// RID of the page this record touches, if it is a data record.
    pub fn rid(&self) -> Option<Rid> {
        match &self.payload {
            LogPayload::Tuple { rid, .. } | LogPayload::Update { rid, .. } => Some(*rid),
            LogPayload::NewPage { page_id, .. } => Some(Rid::new(*page_id, 0)),
            LogPayload::Empty => None,
        }
    }
}

fn write_rid(buf: &mut [u8], pos: usize, rid: Rid) -> usize {
    LittleEndian::write_i32(&mut buf[pos..pos + 4], rid.page_id);
    LittleEndian::write_u32(&mut buf[pos + 4..pos + 8], rid.slot);
    pos + 8
}

fn read_rid(buf: &[u8], pos: usize) -> Result<(Rid, usize), LogRecordError> {
    if buf.len() < pos + 8 {
        return Err(LogRecordError::Truncated);
    }
    let page_id = LittleEndian::read_i32(&buf[pos..pos + 4]);
    let slot = LittleEndian::read_u32(&buf[pos + 4..pos + 8]);
    if page_id == INVALID_PAGE_ID {
        return Err(LogRecordError::Truncated);
    }
    Ok((Rid::new(page_id, slot), pos + 8))
}

fn write_tuple(buf: &mut [u8], pos: usize, tuple: &[u8]) -> usize {
    LittleEndian::write_u32(&mut buf[pos..pos + 4], tuple.len() as u32);
    buf[pos + 4..pos + 4 + tuple.len()].copy_from_slice(tuple);
    pos + 4 + tuple.len()
}

fn read_tuple(buf: &[u8], pos: usize) -> Result<(Vec<u8>, usize), LogRecordError> {
    if buf.len() < pos + 4 {
        return Err(LogRecordError::Truncated);
    }
    let len = LittleEndian::read_u32(&buf[pos..pos + 4]) as usize;
    if buf.len() < pos + 4 + len {
        return Err(LogRecordError::Truncated);
    }
    Ok((buf[pos + 4..pos + 4 + len].to_vec(), pos + 4 + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(mut record: LogRecord) -> LogRecord {
        record.lsn = 42;
        let mut buf = vec![0u8; record.size()];
        record.serialize_into(&mut buf);
        let parsed = LogRecord::deserialize(&buf).unwrap();
        assert_eq!(parsed, record);
        parsed
    }

    #[test]
    fn begin_commit_abort_round_trip() {
        round_trip(LogRecord::new_begin(7));
        round_trip(LogRecord::new_commit(7, 3));
        round_trip(LogRecord::new_abort(7, 3));
    }

    #[test]
    fn data_records_round_trip() {
        let rid = Rid::new(4, 2);
        round_trip(LogRecord::new_insert(1, 5, rid, b"tuple".to_vec()));
        round_trip(LogRecord::new_delete(
            LogRecordType::MarkDelete,
            1,
            5,
            rid,
            b"old".to_vec(),
        ));
        round_trip(LogRecord::new_update(
            1,
            5,
            rid,
            b"before".to_vec(),
            b"after".to_vec(),
        ));
        round_trip(LogRecord::new_new_page(1, 5, 3, 9));
    }

    #[test]
    fn truncated_buffer_rejected() {
        let mut record = LogRecord::new_insert(1, 2, Rid::new(3, 0), b"payload".to_vec());
        record.lsn = 1;
        let mut buf = vec![0u8; record.size()];
        record.serialize_into(&mut buf);
        assert!(LogRecord::deserialize(&buf[..buf.len() - 1]).is_err());
        assert!(LogRecord::deserialize(&buf[..10]).is_err());
        // A zeroed tail (end of log) does not parse.
        assert!(LogRecord::deserialize(&[0u8; 64]).is_err());
    }
}
