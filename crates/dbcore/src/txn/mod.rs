//! Module: txn
//! Responsibility: `Txn` lifecycle and `TxnManager`, the process-wide
//! table of live transactions. Owns the write set used to undo on
//! abort; does not own lock acquisition itself (`lock`) or log
//! durability (`wal`) — it drives both at the right lifecycle points.

use crate::lock::{LockManager, TxnId};
use crate::storage::HeapFile;
use crate::wal::{LogBody, LogManager, LogRecord, LogType, Lsn, INVALID_LSN};
use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use dbcore_types::record::Record;
use dbcore_types::rid::Rid;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxnState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Clone, Debug)]
pub enum WriteRecord {
    Insert { table: String, rid: Rid },
    Update { table: String, rid: Rid, before_image: Record },
    Delete { table: String, rid: Rid, before_image: Record },
}

/// One transaction's lifecycle state and undo log.
pub struct Txn {
    pub id: TxnId,
    pub state: TxnState,
    pub prev_lsn: Lsn,
    pub write_set: Vec<WriteRecord>,
}

impl Txn {
    fn new(id: TxnId) -> Self {
        Self {
            id,
            state: TxnState::Growing,
            prev_lsn: INVALID_LSN,
            write_set: Vec::new(),
        }
    }
}

fn txn_err(kind: ErrorKind, message: impl Into<String>) -> DbError {
    DbError::new(kind, ErrorOrigin::Txn, message)
}

/// Owns every live `Txn`, the monotonic id counter, and drives the
/// lock manager and log manager at Begin/Commit/Abort.
pub struct TxnManager {
    next_txn_id: AtomicU32,
    live: Mutex<HashMap<TxnId, Txn>>,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
}

impl TxnManager {
    #[must_use]
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Arc<LogManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            live: Mutex::new(HashMap::new()),
            lock_manager,
            log_manager,
        }
    }

    /// Start a new transaction: assign an id, emit a Begin record,
    /// register it as live.
    pub fn begin(&self) -> TxnId {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let mut txn = Txn::new(id);
        let lsn = self.log_manager.append(LogRecord {
            log_type: LogType::Begin,
            lsn: INVALID_LSN,
            txn_id: id,
            prev_lsn: INVALID_LSN,
            body: LogBody::Begin,
        });
        txn.prev_lsn = lsn;
        self.live.lock().unwrap().insert(id, txn);
        crate::diagnostics::txn_begin(id);
        id
    }

    fn with_txn<R>(&self, id: TxnId, f: impl FnOnce(&mut Txn) -> Result<R, DbError>) -> Result<R, DbError> {
        let mut live = self.live.lock().unwrap();
        let txn = live
            .get_mut(&id)
            .ok_or_else(|| txn_err(ErrorKind::Internal, format!("no such transaction {id}")))?;
        f(txn)
    }

    pub fn record_insert(&self, id: TxnId, table: &str, rid: Rid, image: &Record) -> Result<(), DbError> {
        self.with_txn(id, |txn| {
            let lsn = self.log_manager.append(LogRecord {
                log_type: LogType::Insert,
                lsn: INVALID_LSN,
                txn_id: id,
                prev_lsn: txn.prev_lsn,
                body: LogBody::Insert { table: table.to_string(), rid, image: image.data.clone() },
            });
            txn.prev_lsn = lsn;
            txn.write_set.push(WriteRecord::Insert { table: table.to_string(), rid });
            Ok(())
        })
    }

    pub fn record_delete(&self, id: TxnId, table: &str, rid: Rid, before_image: Record) -> Result<(), DbError> {
        self.with_txn(id, |txn| {
            let lsn = self.log_manager.append(LogRecord {
                log_type: LogType::Delete,
                lsn: INVALID_LSN,
                txn_id: id,
                prev_lsn: txn.prev_lsn,
                body: LogBody::Delete {
                    table: table.to_string(),
                    rid,
                    image: before_image.data.clone(),
                },
            });
            txn.prev_lsn = lsn;
            txn.write_set.push(WriteRecord::Delete { table: table.to_string(), rid, before_image });
            Ok(())
        })
    }

    pub fn record_update(
        &self,
        id: TxnId,
        table: &str,
        rid: Rid,
        before_image: Record,
        after_image: &Record,
    ) -> Result<(), DbError> {
        self.with_txn(id, |txn| {
            let lsn = self.log_manager.append(LogRecord {
                log_type: LogType::Update,
                lsn: INVALID_LSN,
                txn_id: id,
                prev_lsn: txn.prev_lsn,
                body: LogBody::Update {
                    table: table.to_string(),
                    rid,
                    old_image: before_image.data.clone(),
                    new_image: after_image.data.clone(),
                },
            });
            txn.prev_lsn = lsn;
            txn.write_set.push(WriteRecord::Update { table: table.to_string(), rid, before_image });
            Ok(())
        })
    }

    /// Commit: emit Commit, force a flush so every record of this
    /// transaction is durable before returning, then release locks.
    pub fn commit(&self, id: TxnId) -> Result<(), DbError> {
        let prev_lsn = self.with_txn(id, |txn| {
            txn.state = TxnState::Shrinking;
            Ok(txn.prev_lsn)
        })?;
        let lsn = self.log_manager.append_and_force(LogRecord {
            log_type: LogType::Commit,
            lsn: INVALID_LSN,
            txn_id: id,
            prev_lsn,
            body: LogBody::Commit,
        });
        self.with_txn(id, |txn| {
            txn.prev_lsn = lsn;
            txn.state = TxnState::Committed;
            Ok(())
        })?;
        self.lock_manager.release_all(id);
        self.live.lock().unwrap().remove(&id);
        crate::diagnostics::txn_commit(id, lsn);
        Ok(())
    }

    /// Abort: undo the write set in reverse against `heaps`, emit
    /// Abort, flush, and release locks.
    pub fn abort(&self, id: TxnId, heaps: &HashMap<String, Arc<HeapFile>>, reason: &str) -> Result<(), DbError> {
        let (prev_lsn, write_set) = self.with_txn(id, |txn| {
            txn.state = TxnState::Shrinking;
            Ok((txn.prev_lsn, std::mem::take(&mut txn.write_set)))
        })?;
        for write in write_set.into_iter().rev() {
            match write {
                WriteRecord::Insert { table, rid } => {
                    if let Some(heap) = heaps.get(&table) {
                        let _ = heap.delete(rid);
                    }
                }
                WriteRecord::Delete { table, rid, before_image } => {
                    if let Some(heap) = heaps.get(&table) {
                        heap.insert_at(rid, &before_image)?;
                    }
                }
                WriteRecord::Update { table, rid, before_image } => {
                    if let Some(heap) = heaps.get(&table) {
                        heap.update(rid, &before_image)?;
                    }
                }
            }
        }
        let lsn = self.log_manager.append_and_force(LogRecord {
            log_type: LogType::Abort,
            lsn: INVALID_LSN,
            txn_id: id,
            prev_lsn,
            body: LogBody::Abort,
        });
        self.with_txn(id, |txn| {
            txn.prev_lsn = lsn;
            txn.state = TxnState::Aborted;
            Ok(())
        })?;
        self.lock_manager.release_all(id);
        self.live.lock().unwrap().remove(&id);
        crate::diagnostics::txn_abort(id, reason);
        Ok(())
    }

    #[must_use]
    pub fn is_live(&self, id: TxnId) -> bool {
        self.live.lock().unwrap().contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryPageStore;
    use std::time::Duration;

    fn manager() -> TxnManager {
        TxnManager::new(Arc::new(LockManager::new()), LogManager::new(Duration::from_secs(3600)))
    }

    #[test]
    fn begin_then_commit_clears_live_table() {
        let mgr = manager();
        let id = mgr.begin();
        assert!(mgr.is_live(id));
        mgr.commit(id).unwrap();
        assert!(!mgr.is_live(id));
    }

    #[test]
    fn abort_undoes_insert() {
        let mgr = manager();
        let heap = Arc::new(HeapFile::new(Arc::new(InMemoryPageStore::new(256)), 4));
        let mut heaps = HashMap::new();
        heaps.insert("t".to_string(), Arc::clone(&heap));

        let id = mgr.begin();
        let image = Record::new(vec![1, 2, 3, 4]);
        let rid = heap.insert(&image).unwrap();
        mgr.record_insert(id, "t", rid, &image).unwrap();
        mgr.abort(id, &heaps, "test").unwrap();
        assert!(heap.get(rid).is_err());
    }

    #[test]
    fn abort_undoes_update_to_before_image() {
        let mgr = manager();
        let heap = Arc::new(HeapFile::new(Arc::new(InMemoryPageStore::new(256)), 4));
        let mut heaps = HashMap::new();
        heaps.insert("t".to_string(), Arc::clone(&heap));

        let before = Record::new(vec![1, 1, 1, 1]);
        let rid = heap.insert(&before).unwrap();
        let id = mgr.begin();
        let after = Record::new(vec![2, 2, 2, 2]);
        heap.update(rid, &after).unwrap();
        mgr.record_update(id, "t", rid, before.clone(), &after).unwrap();
        mgr.abort(id, &heaps, "test").unwrap();
        assert_eq!(heap.get(rid).unwrap(), before);
    }
}
