//! Module: exec::dml
//! Responsibility: `Insert`/`Update`/`Delete`, the write operators.
//! Each follows the same six-step protocol: take the row's
//! exclusive lock, read the current image, write the new image to the
//! heap, maintain affected indexes, log the write chained to the
//! transaction's previous LSN, then push the undo `WriteRecord`.

use crate::exec::{exec_err, ExecContext, Operator};
use crate::storage::BTreeIndex;
use dbcore_types::col::{ColMeta, IndexMeta};
use dbcore_types::error::{DbError, ErrorKind};
use dbcore_types::record::Record;
use dbcore_types::rid::Rid;
use dbcore_types::value::Value;
use std::sync::Arc;

fn index_key(index: &IndexMeta, record: &Record) -> Vec<u8> {
    let mut key = Vec::with_capacity(index.col_tot_len());
    for col in &index.cols {
        key.extend_from_slice(&record.field(col).init_raw(col.len));
    }
    key
}

/// Pulls rows to insert from `child` (typically a row of literal
/// values with no scan beneath it) and writes each into `table`.
pub struct Insert {
    table: String,
    cols: Vec<ColMeta>,
    rows: Vec<Record>,
    pos: usize,
    inserted: usize,
}

impl Insert {
    #[must_use]
    pub fn new(table: &str, cols: Vec<ColMeta>, rows: Vec<Record>) -> Self {
        Self {
            table: table.to_string(),
            cols,
            rows,
            pos: 0,
            inserted: 0,
        }
    }

    pub fn run(&mut self, ctx: &ExecContext, indexes: &[(IndexMeta, Arc<dyn BTreeIndex>)]) -> Result<usize, DbError> {
        ctx.lock_manager.lock_intention_exclusive_on_table(ctx.txn_id, &self.table)?;
        let heap = ctx
            .heaps
            .get(&self.table)
            .ok_or_else(|| exec_err(ErrorKind::TableNotFound, format!("table {} not found", self.table)))?;
        while self.pos < self.rows.len() {
            let record = &self.rows[self.pos];
            let rid = heap.insert(record)?;
            ctx.lock_manager.lock_exclusive_on_row(ctx.txn_id, &self.table, rid)?;
            for (meta, index) in indexes {
                index.insert(index_key(meta, record), rid);
            }
            ctx.txn_manager.record_insert(ctx.txn_id, &self.table, rid, record)?;
            self.pos += 1;
            self.inserted += 1;
        }
        Ok(self.inserted)
    }
}

/// Deletes every row `child` yields, maintaining indexes and the undo
/// log as it goes. `child` must hold row-exclusive locks already
/// (built with `LockIntent::Write`).
pub struct Delete {
    table: String,
}

impl Delete {
    #[must_use]
    pub fn new(table: &str) -> Self {
        Self { table: table.to_string() }
    }

    pub fn run(
        &self,
        ctx: &ExecContext,
        child: &mut dyn Operator,
        indexes: &[(IndexMeta, Arc<dyn BTreeIndex>)],
    ) -> Result<usize, DbError> {
        let heap = ctx
            .heaps
            .get(&self.table)
            .ok_or_else(|| exec_err(ErrorKind::TableNotFound, format!("table {} not found", self.table)))?;
        let mut rids: Vec<Rid> = Vec::new();
        child.begin_tuple()?;
        while !child.is_end() {
            let rid = child
                .rid()
                .ok_or_else(|| exec_err(ErrorKind::Internal, "delete child produced no rid"))?;
            rids.push(rid);
            child.next_tuple()?;
        }

        let mut deleted = 0;
        for rid in rids {
            ctx.lock_manager.lock_exclusive_on_row(ctx.txn_id, &self.table, rid)?;
            let before = heap.get(rid)?;
            heap.delete(rid)?;
            for (meta, index) in indexes {
                index.remove(&index_key(meta, &before), rid);
            }
            ctx.txn_manager.record_delete(ctx.txn_id, &self.table, rid, before)?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

/// Right-hand side of one SET clause: either a literal replacement or
/// `col = col + delta`, the only arithmetic the grammar allows.
#[derive(Clone, Debug)]
pub enum Assignment {
    Set(Value),
    Increment(Value),
}

fn add_values(current: &Value, delta: &Value) -> Result<Value, DbError> {
    match (current, delta) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f32 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f32)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        _ => Err(exec_err(ErrorKind::IncompatibleType, "cannot increment a string column")),
    }
}

/// Updates every row `child` yields by applying `assignments` (column
/// index into the table schema, new value or increment) and writing
/// the result back. Maintains indexes only when `is_set_index_key` says
/// some assignment can actually change an indexed column; otherwise no
/// index is touched regardless of how many rows are updated.
pub struct Update {
    table: String,
    cols: Vec<ColMeta>,
    assignments: Vec<(usize, Assignment)>,
    is_set_index_key: bool,
}

impl Update {
    #[must_use]
    pub fn new(table: &str, cols: Vec<ColMeta>, assignments: Vec<(usize, Assignment)>, is_set_index_key: bool) -> Self {
        Self {
            table: table.to_string(),
            cols,
            assignments,
            is_set_index_key,
        }
    }

    pub fn run(
        &self,
        ctx: &ExecContext,
        child: &mut dyn Operator,
        indexes: &[(IndexMeta, Arc<dyn BTreeIndex>)],
    ) -> Result<usize, DbError> {
        let heap = ctx
            .heaps
            .get(&self.table)
            .ok_or_else(|| exec_err(ErrorKind::TableNotFound, format!("table {} not found", self.table)))?;
        let mut rids: Vec<Rid> = Vec::new();
        child.begin_tuple()?;
        while !child.is_end() {
            let rid = child
                .rid()
                .ok_or_else(|| exec_err(ErrorKind::Internal, "update child produced no rid"))?;
            rids.push(rid);
            child.next_tuple()?;
        }

        let mut updated = 0;
        for rid in rids {
            ctx.lock_manager.lock_exclusive_on_row(ctx.txn_id, &self.table, rid)?;
            let before = heap.get(rid)?;
            let mut after = before.clone();
            for (idx, assignment) in &self.assignments {
                let value = match assignment {
                    Assignment::Set(v) => v.clone(),
                    Assignment::Increment(delta) => add_values(&before.field(&self.cols[*idx]), delta)?,
                };
                after.set_field(&self.cols[*idx], &value);
            }
            heap.update(rid, &after)?;
            if self.is_set_index_key {
                for (meta, index) in indexes {
                    let old_key = index_key(meta, &before);
                    let new_key = index_key(meta, &after);
                    if old_key != new_key {
                        index.remove(&old_key, rid);
                        index.insert(new_key, rid);
                    }
                }
            }
            ctx.txn_manager.record_update(ctx.txn_id, &self.table, rid, before, &after)?;
            updated += 1;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockManager;
    use crate::storage::{HeapFile, InMemoryPageStore};
    use crate::txn::TxnManager;
    use crate::wal::LogManager;
    use dbcore_types::value::ColType;
    use std::collections::HashMap;
    use std::time::Duration;

    fn ctx_with_table() -> (ExecContext, Vec<ColMeta>) {
        let lock_manager = Arc::new(LockManager::new());
        let log_manager = LogManager::new(Duration::from_secs(3600));
        let txn_manager = Arc::new(TxnManager::new(Arc::clone(&lock_manager), log_manager));
        let txn_id = txn_manager.begin();
        let cols = vec![ColMeta::new("t", "id", ColType::Int, 4, 0)];
        let heap = Arc::new(HeapFile::new(Arc::new(InMemoryPageStore::new(256)), 4));
        let mut heaps = HashMap::new();
        heaps.insert("t".to_string(), heap);
        (ExecContext::new(txn_id, lock_manager, txn_manager, heaps, HashMap::new()), cols)
    }

    #[test]
    fn insert_writes_rows_and_logs_write_set() {
        let (ctx, cols) = ctx_with_table();
        let rows = vec![Record::from_values(&cols, &[Value::Int(1)]), Record::from_values(&cols, &[Value::Int(2)])];
        let mut insert = Insert::new("t", cols, rows);
        let n = insert.run(&ctx, &[]).unwrap();
        assert_eq!(n, 2);
        assert_eq!(ctx.heaps["t"].scan().unwrap().len(), 2);
    }

    struct OneRowOp {
        cols: Vec<ColMeta>,
        rid: Rid,
        done: bool,
    }

    impl Operator for OneRowOp {
        fn begin_tuple(&mut self) -> Result<(), DbError> {
            self.done = false;
            Ok(())
        }
        fn next_tuple(&mut self) -> Result<(), DbError> {
            self.done = true;
            Ok(())
        }
        fn is_end(&self) -> bool {
            self.done
        }
        fn current(&self) -> &Record {
            unreachable!("update/delete only need rid()")
        }
        fn rid(&self) -> Option<Rid> {
            if self.done { None } else { Some(self.rid) }
        }
        fn cols(&self) -> &[ColMeta] {
            &self.cols
        }
    }

    #[test]
    fn update_skips_index_maintenance_when_is_set_index_key_is_false() {
        let (ctx, cols) = ctx_with_table();
        let heap = &ctx.heaps["t"];
        let rid = heap.insert(&Record::from_values(&cols, &[Value::Int(1)])).unwrap();
        let index_meta = IndexMeta::new("t", cols.clone());
        let index: Arc<dyn BTreeIndex> = Arc::new(crate::storage::BTreeMapIndex::new(vec![(cols[0].ty, cols[0].len)]));
        index.insert(Value::Int(1).init_raw(4), rid);

        let mut child = OneRowOp { cols: cols.clone(), rid, done: false };
        let update = Update::new("t", cols.clone(), vec![(0, Assignment::Set(Value::Int(2)))], false);
        let n = update.run(&ctx, &mut child, &[(index_meta, Arc::clone(&index))]).unwrap();
        assert_eq!(n, 1);
        assert_eq!(heap.get(rid).unwrap().field(&cols[0]), Value::Int(2));
        // The index still carries the stale key because maintenance was skipped.
        assert_eq!(index.range(None, None).len(), 1);
        assert_eq!(index.range(None, None)[0].0, Value::Int(1).init_raw(4));
    }
}
