//! Module: wal::recovery
//! Responsibility: ARIES-lite crash recovery — analysis, redo,
//! undo over the log persisted by `LogManager`. Does not own applying
//! writes beyond replaying heap-file operations; index maintenance
//! after recovery is the caller's job (rebuild indexes from a fresh
//! scan, same as initial load).

use crate::lock::TxnId;
use crate::storage::HeapFile;
use crate::wal::{LogBody, LogRecord, Lsn};
use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use dbcore_types::record::Record;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn recovery_err(message: impl Into<String>) -> DbError {
    DbError::new(ErrorKind::IoError, ErrorOrigin::Wal, message)
}

#[derive(Default)]
pub struct RecoverySummary {
    pub analyzed: usize,
    pub redone: usize,
    pub undone: usize,
    pub aborted_txns: Vec<TxnId>,
}

/// Parse every record out of a persisted log buffer, in LSN order.
pub fn parse_log(bytes: &[u8]) -> Result<Vec<LogRecord>, DbError> {
    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let (record, consumed) = LogRecord::deserialize(&bytes[offset..])?;
        if consumed == 0 {
            return Err(recovery_err("zero-length log record"));
        }
        offset += consumed;
        records.push(record);
    }
    Ok(records)
}

/// Replay `records` against `heaps` (table name -> heap file): analysis
/// determines which transactions never committed, redo reapplies every
/// write unconditionally, undo reverses the writes of transactions that
/// were still active at crash time.
pub fn recover(records: &[LogRecord], heaps: &HashMap<String, Arc<HeapFile>>) -> Result<RecoverySummary, DbError> {
    let mut summary = RecoverySummary::default();

    // Analysis: a transaction is "active" (needs undo) unless we observe
    // its Commit or Abort record.
    let mut active: HashSet<TxnId> = HashSet::new();
    for record in records {
        summary.analyzed += 1;
        match record.body {
            LogBody::Begin => {
                active.insert(record.txn_id);
            }
            LogBody::Commit | LogBody::Abort => {
                active.remove(&record.txn_id);
            }
            _ => {}
        }
    }
    crate::diagnostics::recovery_phase("analysis", summary.analyzed);

    // Redo: reapply every logged write in forward LSN order, regardless
    // of whether its transaction eventually committed; undo below
    // reverses the ones that didn't.
    for record in records {
        match &record.body {
            LogBody::Insert { table, rid, image } => {
                if let Some(heap) = heaps.get(table) {
                    heap.insert_at(*rid, &Record::new(image.clone()))?;
                    summary.redone += 1;
                }
            }
            LogBody::Delete { table, rid, .. } => {
                if let Some(heap) = heaps.get(table) {
                    let _ = heap.delete(*rid);
                    summary.redone += 1;
                }
            }
            LogBody::Update { table, rid, new_image, .. } => {
                if let Some(heap) = heaps.get(table) {
                    heap.update(*rid, &Record::new(new_image.clone()))?;
                    summary.redone += 1;
                }
            }
            LogBody::Begin | LogBody::Commit | LogBody::Abort | LogBody::StaticCheckpoint => {}
        }
    }
    crate::diagnostics::recovery_phase("redo", summary.redone);

    // Undo: for transactions still active at crash time, reverse their
    // writes in reverse LSN order by replaying before-images.
    let mut per_txn_lsn_order: HashMap<TxnId, Vec<&LogRecord>> = HashMap::new();
    for record in records {
        if active.contains(&record.txn_id) {
            per_txn_lsn_order.entry(record.txn_id).or_default().push(record);
        }
    }
    for (txn_id, mut txn_records) in per_txn_lsn_order {
        txn_records.sort_by_key(|r| std::cmp::Reverse(r.lsn));
        for record in txn_records {
            match &record.body {
                LogBody::Insert { table, rid, .. } => {
                    if let Some(heap) = heaps.get(table) {
                        let _ = heap.delete(*rid);
                        summary.undone += 1;
                    }
                }
                LogBody::Delete { table, rid, image } => {
                    if let Some(heap) = heaps.get(table) {
                        heap.insert_at(*rid, &Record::new(image.clone()))?;
                        summary.undone += 1;
                    }
                }
                LogBody::Update { table, rid, old_image, .. } => {
                    if let Some(heap) = heaps.get(table) {
                        heap.update(*rid, &Record::new(old_image.clone()))?;
                        summary.undone += 1;
                    }
                }
                LogBody::Begin | LogBody::Commit | LogBody::Abort | LogBody::StaticCheckpoint => {}
            }
        }
        summary.aborted_txns.push(txn_id);
    }
    crate::diagnostics::recovery_phase("undo", summary.undone);

    Ok(summary)
}

/// The LSN recovery should resume replay from on a subsequent restart:
/// one past the last record in the log it was handed.
#[must_use]
pub fn next_lsn_after(records: &[LogRecord]) -> Lsn {
    records.iter().map(|r| r.lsn).max().map_or(1, |lsn| lsn + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryPageStore;
    use crate::wal::{LogType, INVALID_LSN};
    use dbcore_types::rid::Rid;

    fn heap() -> Arc<HeapFile> {
        Arc::new(HeapFile::new(Arc::new(InMemoryPageStore::new(256)), 4))
    }

    #[test]
    fn redo_replays_committed_insert() {
        let heap = heap();
        let mut heaps = HashMap::new();
        heaps.insert("t".to_string(), Arc::clone(&heap));
        let records = vec![
            LogRecord { log_type: LogType::Begin, lsn: 1, txn_id: 1, prev_lsn: INVALID_LSN, body: LogBody::Begin },
            LogRecord {
                log_type: LogType::Insert,
                lsn: 2,
                txn_id: 1,
                prev_lsn: 1,
                body: LogBody::Insert { table: "t".into(), rid: Rid::new(0, 0), image: vec![9, 9, 9, 9] },
            },
            LogRecord { log_type: LogType::Commit, lsn: 3, txn_id: 1, prev_lsn: 2, body: LogBody::Commit },
        ];
        let summary = recover(&records, &heaps).unwrap();
        assert_eq!(summary.redone, 1);
        assert!(summary.aborted_txns.is_empty());
        assert_eq!(heap.get(Rid::new(0, 0)).unwrap().data, vec![9, 9, 9, 9]);
    }

    #[test]
    fn undo_reverses_uncommitted_insert() {
        let heap = heap();
        let mut heaps = HashMap::new();
        heaps.insert("t".to_string(), Arc::clone(&heap));
        let records = vec![
            LogRecord { log_type: LogType::Begin, lsn: 1, txn_id: 1, prev_lsn: INVALID_LSN, body: LogBody::Begin },
            LogRecord {
                log_type: LogType::Insert,
                lsn: 2,
                txn_id: 1,
                prev_lsn: 1,
                body: LogBody::Insert { table: "t".into(), rid: Rid::new(0, 0), image: vec![9, 9, 9, 9] },
            },
        ];
        let summary = recover(&records, &heaps).unwrap();
        assert_eq!(summary.aborted_txns, vec![1]);
        assert!(heap.get(Rid::new(0, 0)).is_err());
    }
}
