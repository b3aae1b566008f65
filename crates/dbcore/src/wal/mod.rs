//! Module: wal
//! Responsibility: `LogManager` — typed log records, LSN assignment, a
//! background flush thread, and the commit-forces-flush durability
//! policy. Recovery lives in `wal::recovery` and replays
//! what this module persisted.
//! Does not own: deciding which pages are dirty or evicted (out of
//! scope) — every write is logged unconditionally.

pub mod recovery;

use crate::lock::TxnId;
use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use dbcore_types::rid::Rid;
use std::io::Write;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// 4-byte LSN, monotonically increasing from 1 (0 is `INVALID_LSN`).
pub type Lsn = u32;
pub const INVALID_LSN: Lsn = 0;

/// Fixed header size in bytes: log-type(4) + lsn(4) + total-length(4) +
/// txn-id(4) + prev-lsn(4).
pub const LOG_HEADER_SIZE: usize = 20;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum LogType {
    Update = 0,
    Insert = 1,
    Delete = 2,
    Begin = 3,
    Commit = 4,
    Abort = 5,
    StaticCheckpoint = 6,
}

impl LogType {
    fn from_u32(raw: u32) -> Result<Self, DbError> {
        Ok(match raw {
            0 => Self::Update,
            1 => Self::Insert,
            2 => Self::Delete,
            3 => Self::Begin,
            4 => Self::Commit,
            5 => Self::Abort,
            6 => Self::StaticCheckpoint,
            other => {
                return Err(wal_err(ErrorKind::IoError, format!("unknown log type tag {other}")))
            }
        })
    }
}

#[derive(Clone, Debug)]
pub enum LogBody {
    Begin,
    Commit,
    Abort,
    StaticCheckpoint,
    Insert { table: String, rid: Rid, image: Vec<u8> },
    Delete { table: String, rid: Rid, image: Vec<u8> },
    Update { table: String, rid: Rid, old_image: Vec<u8>, new_image: Vec<u8> },
}

impl LogBody {
    const fn log_type(&self) -> LogType {
        match self {
            Self::Begin => LogType::Begin,
            Self::Commit => LogType::Commit,
            Self::Abort => LogType::Abort,
            Self::StaticCheckpoint => LogType::StaticCheckpoint,
            Self::Insert { .. } => LogType::Insert,
            Self::Delete { .. } => LogType::Delete,
            Self::Update { .. } => LogType::Update,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogRecord {
    pub log_type: LogType,
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub body: LogBody,
}

fn wal_err(kind: ErrorKind, message: impl Into<String>) -> DbError {
    DbError::new(kind, ErrorOrigin::Wal, message)
}

fn write_sized_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_sized_bytes(src: &[u8], offset: &mut usize) -> Result<Vec<u8>, DbError> {
    let len = u32::from_le_bytes(
        src.get(*offset..*offset + 4)
            .ok_or_else(|| wal_err(ErrorKind::IoError, "truncated log record"))?
            .try_into()
            .unwrap(),
    ) as usize;
    *offset += 4;
    let bytes = src
        .get(*offset..*offset + len)
        .ok_or_else(|| wal_err(ErrorKind::IoError, "truncated log record"))?
        .to_vec();
    *offset += len;
    Ok(bytes)
}

fn write_sized_string(out: &mut Vec<u8>, s: &str) {
    write_sized_bytes(out, s.as_bytes());
}

fn read_sized_string(src: &[u8], offset: &mut usize) -> Result<String, DbError> {
    let bytes = read_sized_bytes(src, offset)?;
    String::from_utf8(bytes).map_err(|e| wal_err(ErrorKind::IoError, e.to_string()))
}

impl LogRecord {
    /// Serialize the 20-byte header followed by the type-specific body.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LOG_HEADER_SIZE);
        out.extend_from_slice(&(self.log_type as u32).to_le_bytes());
        out.extend_from_slice(&self.lsn.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // total length patched below
        out.extend_from_slice(&self.txn_id.to_le_bytes());
        out.extend_from_slice(&self.prev_lsn.to_le_bytes());
        debug_assert_eq!(out.len(), LOG_HEADER_SIZE);
        match &self.body {
            LogBody::Begin | LogBody::Commit | LogBody::Abort | LogBody::StaticCheckpoint => {}
            LogBody::Insert { table, rid, image } => {
                out.extend_from_slice(&rid.to_bytes());
                write_sized_bytes(&mut out, image);
                write_sized_string(&mut out, table);
            }
            LogBody::Delete { table, rid, image } => {
                out.extend_from_slice(&rid.to_bytes());
                write_sized_bytes(&mut out, image);
                write_sized_string(&mut out, table);
            }
            LogBody::Update { table, rid, old_image, new_image } => {
                out.extend_from_slice(&rid.to_bytes());
                write_sized_bytes(&mut out, old_image);
                write_sized_bytes(&mut out, new_image);
                write_sized_string(&mut out, table);
            }
        }
        let total_len = (out.len() as u32).to_le_bytes();
        out[8..12].copy_from_slice(&total_len);
        out
    }

    /// Deserialize one record starting at `src[0]`; returns the record
    /// and the number of bytes consumed.
    pub fn deserialize(src: &[u8]) -> Result<(Self, usize), DbError> {
        if src.len() < LOG_HEADER_SIZE {
            return Err(wal_err(ErrorKind::IoError, "truncated log header"));
        }
        let log_type = LogType::from_u32(u32::from_le_bytes(src[0..4].try_into().unwrap()))?;
        let lsn = Lsn::from_le_bytes(src[4..8].try_into().unwrap());
        let total_len = u32::from_le_bytes(src[8..12].try_into().unwrap()) as usize;
        let txn_id = TxnId::from_le_bytes(src[12..16].try_into().unwrap());
        let prev_lsn = Lsn::from_le_bytes(src[16..20].try_into().unwrap());
        if src.len() < total_len {
            return Err(wal_err(ErrorKind::IoError, "truncated log body"));
        }
        let mut offset = LOG_HEADER_SIZE;
        let body = match log_type {
            LogType::Begin => LogBody::Begin,
            LogType::Commit => LogBody::Commit,
            LogType::Abort => LogBody::Abort,
            LogType::StaticCheckpoint => LogBody::StaticCheckpoint,
            LogType::Insert => {
                let rid = Rid::from_bytes(&src[offset..offset + 8]);
                offset += 8;
                let image = read_sized_bytes(src, &mut offset)?;
                let table = read_sized_string(src, &mut offset)?;
                LogBody::Insert { table, rid, image }
            }
            LogType::Delete => {
                let rid = Rid::from_bytes(&src[offset..offset + 8]);
                offset += 8;
                let image = read_sized_bytes(src, &mut offset)?;
                let table = read_sized_string(src, &mut offset)?;
                LogBody::Delete { table, rid, image }
            }
            LogType::Update => {
                let rid = Rid::from_bytes(&src[offset..offset + 8]);
                offset += 8;
                let old_image = read_sized_bytes(src, &mut offset)?;
                let new_image = read_sized_bytes(src, &mut offset)?;
                let table = read_sized_string(src, &mut offset)?;
                LogBody::Update { table, rid, old_image, new_image }
            }
        };
        Ok((
            Self {
                log_type,
                lsn,
                txn_id,
                prev_lsn,
                body,
            },
            total_len,
        ))
    }
}

struct Inner {
    unflushed: Vec<u8>,
    persisted: Vec<u8>,
    next_lsn: Lsn,
    persist_lsn: Lsn,
    running: bool,
}

/// Appends log records to an in-memory buffer and flushes them under a
/// background-thread policy, plus synchronously on commit. `persisted`
/// doubles as the durable log this process would otherwise write to the
/// log file — recovery reads it back through `LogManager::persisted_bytes`.
pub struct LogManager {
    inner: Arc<(Mutex<Inner>, Condvar)>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    #[must_use]
    pub fn new(flush_interval: Duration) -> Arc<Self> {
        let inner = Arc::new((
            Mutex::new(Inner {
                unflushed: Vec::new(),
                persisted: Vec::new(),
                next_lsn: 1,
                persist_lsn: INVALID_LSN,
                running: true,
            }),
            Condvar::new(),
        ));
        let manager = Arc::new(Self {
            inner: Arc::clone(&inner),
            thread: Mutex::new(None),
        });
        let background = Arc::clone(&inner);
        let handle = std::thread::spawn(move || background_flush(&background, flush_interval));
        *manager.thread.lock().unwrap() = Some(handle);
        manager
    }

    /// Append one record, assigning it the next LSN. Returns the LSN.
    pub fn append(&self, mut record: LogRecord) -> Lsn {
        let (lock, _cv) = &*self.inner;
        let mut inner = lock.lock().unwrap();
        let lsn = inner.next_lsn;
        inner.next_lsn += 1;
        record.lsn = lsn;
        inner.unflushed.extend_from_slice(&record.serialize());
        lsn
    }

    /// Flush all unflushed bytes, advancing `persist_lsn` to the last
    /// record appended so far.
    pub fn flush(&self) {
        let (lock, cv) = &*self.inner;
        let mut inner = lock.lock().unwrap();
        if inner.unflushed.is_empty() {
            return;
        }
        let batch_len = inner.unflushed.len();
        let flushed = std::mem::take(&mut inner.unflushed);
        inner.persisted.write_all(&flushed).expect("in-memory write cannot fail");
        inner.persist_lsn = inner.next_lsn.saturating_sub(1);
        let persist_lsn = inner.persist_lsn;
        drop(inner);
        cv.notify_all();
        crate::diagnostics::log_flushed(batch_len, persist_lsn);
    }

    /// Append a record and flush synchronously: the commit-forces-flush
    /// policy — after Commit returns, every log record of that
    /// transaction is durable.
    pub fn append_and_force(&self, record: LogRecord) -> Lsn {
        let lsn = self.append(record);
        self.flush();
        lsn
    }

    #[must_use]
    pub fn persist_lsn(&self) -> Lsn {
        self.inner.0.lock().unwrap().persist_lsn
    }

    #[must_use]
    pub fn persisted_bytes(&self) -> Vec<u8> {
        self.inner.0.lock().unwrap().persisted.clone()
    }

    /// Load a previously persisted log, e.g. from a file read at
    /// process start, before replaying it through `recovery::recover`.
    pub fn load_persisted(&self, bytes: Vec<u8>, next_lsn: Lsn) {
        let mut inner = self.inner.0.lock().unwrap();
        inner.persist_lsn = next_lsn.saturating_sub(1);
        inner.next_lsn = next_lsn;
        inner.persisted = bytes;
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        {
            let mut inner = self.inner.0.lock().unwrap();
            inner.running = false;
        }
        self.inner.1.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn background_flush(shared: &Arc<(Mutex<Inner>, Condvar)>, interval: Duration) {
    let (lock, cv) = &**shared;
    let mut inner = lock.lock().unwrap();
    loop {
        let (guard, timeout) = cv.wait_timeout(inner, interval).unwrap();
        inner = guard;
        if !inner.running {
            return;
        }
        if timeout.timed_out() && !inner.unflushed.is_empty() {
            let batch_len = inner.unflushed.len();
            let flushed = std::mem::take(&mut inner.unflushed);
            inner.persisted.write_all(&flushed).expect("in-memory write cannot fail");
            inner.persist_lsn = inner.next_lsn.saturating_sub(1);
            crate::diagnostics::log_flushed(batch_len, inner.persist_lsn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_record_round_trips() {
        let record = LogRecord {
            log_type: LogType::Insert,
            lsn: 1,
            txn_id: 7,
            prev_lsn: INVALID_LSN,
            body: LogBody::Insert {
                table: "t".to_string(),
                rid: Rid::new(2, 3),
                image: vec![1, 2, 3, 4],
            },
        };
        let bytes = record.serialize();
        let (back, consumed) = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(back.txn_id, 7);
        assert_eq!(back.prev_lsn, INVALID_LSN);
        match back.body {
            LogBody::Insert { table, rid, image } => {
                assert_eq!(table, "t");
                assert_eq!(rid, Rid::new(2, 3));
                assert_eq!(image, vec![1, 2, 3, 4]);
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn append_and_force_advances_persist_lsn() {
        let manager = LogManager::new(Duration::from_secs(3600));
        let lsn = manager.append_and_force(LogRecord {
            log_type: LogType::Begin,
            lsn: INVALID_LSN,
            txn_id: 1,
            prev_lsn: INVALID_LSN,
            body: LogBody::Begin,
        });
        assert_eq!(lsn, 1);
        assert_eq!(manager.persist_lsn(), 1);
    }

    #[test]
    fn unforced_append_does_not_persist_until_flush() {
        let manager = LogManager::new(Duration::from_secs(3600));
        manager.append(LogRecord {
            log_type: LogType::Begin,
            lsn: INVALID_LSN,
            txn_id: 1,
            prev_lsn: INVALID_LSN,
            body: LogBody::Begin,
        });
        assert_eq!(manager.persist_lsn(), INVALID_LSN);
        manager.flush();
        assert_eq!(manager.persist_lsn(), 1);
    }
}
