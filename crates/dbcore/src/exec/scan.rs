//! Module: exec::scan
//! Responsibility: `SeqScan` and `IndexScan`, the two leaf operators
//! that pull rids out of a heap file, taking the table
//! or gap lock their caller's DML intent requires at construction time.

use crate::exec::{eval_all, exec_err, ExecContext, Operator};
use crate::predicate::{CmpOp, Condition, PredicateManager};
use crate::storage::{compare_keys, BTreeIndex, HeapFile, KeyLayout};
use dbcore_types::col::ColMeta;
use dbcore_types::error::{DbError, ErrorKind};
use dbcore_types::record::Record;
use dbcore_types::rid::Rid;
use std::cmp::Ordering;
use std::sync::Arc;

/// Whether a scan is read-only (shared lock) or feeds a DML operator
/// that will write through it (exclusive lock), decided by the plan
/// translator from the statement kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockIntent {
    Read,
    Write,
}

/// Iterates every rid of a table's heap file in page/slot order,
/// applying residual conditions per tuple. Takes the table's S or X
/// lock at construction, before any tuple is pulled.
pub struct SeqScan {
    cols: Vec<ColMeta>,
    residual: Vec<Condition>,
    rows: Vec<(Rid, Record)>,
    pos: Option<usize>,
}

impl SeqScan {
    pub fn new(
        ctx: &ExecContext,
        table: &str,
        cols: Vec<ColMeta>,
        residual: Vec<Condition>,
        intent: LockIntent,
    ) -> Result<Self, DbError> {
        match intent {
            LockIntent::Read => ctx.lock_manager.lock_shared_on_table(ctx.txn_id, table)?,
            LockIntent::Write => ctx.lock_manager.lock_exclusive_on_table(ctx.txn_id, table)?,
        }
        let heap = ctx
            .heaps
            .get(table)
            .ok_or_else(|| exec_err(ErrorKind::TableNotFound, format!("table {table} not found")))?;
        let rows = heap.scan()?;
        Ok(Self {
            cols,
            residual,
            rows,
            pos: None,
        })
    }

    fn matches(&self, record: &Record) -> Result<bool, DbError> {
        eval_all(&self.residual, record, &self.cols)
    }

    fn advance_to_match(&mut self, mut pos: usize) -> Result<(), DbError> {
        while pos < self.rows.len() && !self.matches(&self.rows[pos].1)? {
            pos += 1;
        }
        self.pos = if pos < self.rows.len() { Some(pos) } else { None };
        Ok(())
    }
}

impl Operator for SeqScan {
    fn begin_tuple(&mut self) -> Result<(), DbError> {
        self.advance_to_match(0)
    }

    fn next_tuple(&mut self) -> Result<(), DbError> {
        if let Some(pos) = self.pos {
            self.advance_to_match(pos + 1)?;
        }
        Ok(())
    }

    fn is_end(&self) -> bool {
        self.pos.is_none()
    }

    fn current(&self) -> &Record {
        &self.rows[self.pos.expect("current() called at end")].1
    }

    fn rid(&self) -> Option<Rid> {
        self.pos.map(|p| self.rows[p].0)
    }

    fn cols(&self) -> &[ColMeta] {
        &self.cols
    }
}

/// Drives an index's ordered range (derived by `PredicateManager`) to
/// fetch only the rids within the table's WHERE-implied bounds, then
/// fetches each from the heap and applies any residual conditions.
/// Takes a shared or exclusive gap lock over the derived bound at
/// construction, before iteration begins, to block phantom inserts.
pub struct IndexScan {
    heap: Arc<HeapFile>,
    cols: Vec<ColMeta>,
    residual: Vec<Condition>,
    entries: Vec<(Vec<u8>, Rid)>,
    pos: Option<usize>,
    current: Option<Record>,
}

impl IndexScan {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: &ExecContext,
        table: &str,
        index: &Arc<dyn BTreeIndex>,
        layout: &KeyLayout,
        pm: &PredicateManager,
        cols: Vec<ColMeta>,
        reverse: bool,
        intent: LockIntent,
    ) -> Result<Self, DbError> {
        match intent {
            LockIntent::Read => ctx.lock_manager.lock_shared_on_gap(ctx.txn_id, table, layout, &pm.gap)?,
            LockIntent::Write => ctx.lock_manager.lock_exclusive_on_gap(ctx.txn_id, table, layout, &pm.gap)?,
        }
        let heap = Arc::clone(
            ctx.heaps
                .get(table)
                .ok_or_else(|| exec_err(ErrorKind::TableNotFound, format!("table {table} not found")))?,
        );
        let entries = fetch_range(index.as_ref(), layout, pm, reverse);
        Ok(Self {
            heap,
            cols,
            residual: pm.residual.clone(),
            entries,
            pos: None,
            current: None,
        })
    }

    fn matches(&self, record: &Record) -> Result<bool, DbError> {
        eval_all(&self.residual, record, &self.cols)
    }

    fn advance_to_match(&mut self, mut pos: usize) -> Result<(), DbError> {
        loop {
            if pos >= self.entries.len() {
                self.pos = None;
                self.current = None;
                return Ok(());
            }
            let record = self.heap.get(self.entries[pos].1)?;
            if self.matches(&record)? {
                self.pos = Some(pos);
                self.current = Some(record);
                return Ok(());
            }
            pos += 1;
        }
    }
}

impl Operator for IndexScan {
    fn begin_tuple(&mut self) -> Result<(), DbError> {
        self.advance_to_match(0)
    }

    fn next_tuple(&mut self) -> Result<(), DbError> {
        if let Some(pos) = self.pos {
            self.advance_to_match(pos + 1)?;
        }
        Ok(())
    }

    fn is_end(&self) -> bool {
        self.pos.is_none()
    }

    fn current(&self) -> &Record {
        self.current.as_ref().expect("current() called at end")
    }

    fn rid(&self) -> Option<Rid> {
        self.pos.map(|p| self.entries[p].1)
    }

    fn cols(&self) -> &[ColMeta] {
        &self.cols
    }
}

/// Resolve a `PredicateManager`'s derived bound against the index's
/// actual entries, correcting for the two cases the underlying
/// half-open `range` doesn't match on its own: an exact equality
/// prefix (`left_key == right_key`, which a half-open range would
/// always read as empty) and a strict lower bound (`>`, which `range`
/// otherwise treats as inclusive).
fn fetch_range(index: &dyn BTreeIndex, layout: &KeyLayout, pm: &PredicateManager, reverse: bool) -> Vec<(Vec<u8>, Rid)> {
    if pm.index_clean {
        let mut matched: Vec<_> = index
            .range(Some(&pm.left_key), None)
            .into_iter()
            .take_while(|(k, _)| compare_keys(k, &pm.left_key, layout) == Ordering::Equal)
            .collect();
        if reverse {
            matched.reverse();
        }
        return matched;
    }

    let hi = if pm.last_right_op == Some(CmpOp::Le) {
        None
    } else {
        Some(pm.right_key.clone())
    };
    let mut entries = if reverse {
        index.range_rev(Some(&pm.left_key), hi.as_deref())
    } else {
        index.range(Some(&pm.left_key), hi.as_deref())
    };
    if pm.last_right_op == Some(CmpOp::Le) {
        entries.retain(|(k, _)| compare_keys(k, &pm.right_key, layout) != Ordering::Greater);
    }
    if pm.last_left_op == Some(CmpOp::Gt) {
        entries.retain(|(k, _)| compare_keys(k, &pm.left_key, layout) != Ordering::Equal);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockManager;
    use crate::predicate::RhsKind;
    use crate::storage::{BTreeMapIndex, InMemoryPageStore};
    use crate::txn::TxnManager;
    use crate::wal::LogManager;
    use dbcore_types::col::IndexMeta;
    use dbcore_types::tabcol::TabCol;
    use dbcore_types::value::{ColType, Value};
    use std::collections::HashMap;
    use std::time::Duration;

    fn ctx() -> (ExecContext, u32) {
        let lock_manager = Arc::new(LockManager::new());
        let log_manager = LogManager::new(Duration::from_secs(3600));
        let txn_manager = Arc::new(TxnManager::new(Arc::clone(&lock_manager), log_manager));
        let txn_id = txn_manager.begin();
        let ctx = ExecContext::new(txn_id, lock_manager, txn_manager, HashMap::new(), HashMap::new());
        (ctx, txn_id)
    }

    fn cols() -> Vec<ColMeta> {
        vec![ColMeta::new("t", "id", ColType::Int, 4, 0)]
    }

    #[test]
    fn seq_scan_applies_residual_condition() {
        let (mut ctx, _) = ctx();
        let heap = Arc::new(HeapFile::new(Arc::new(InMemoryPageStore::new(256)), 4));
        for v in [1i32, 2, 3] {
            heap.insert(&Record::new(v.to_le_bytes().to_vec())).unwrap();
        }
        ctx.heaps.insert("t".to_string(), heap);
        let residual = vec![Condition::new(TabCol::new("t", "id"), CmpOp::Gt, RhsKind::Value(Value::Int(1)))];
        let mut scan = SeqScan::new(&ctx, "t", cols(), residual, LockIntent::Read).unwrap();
        scan.begin_tuple().unwrap();
        let mut seen = Vec::new();
        while !scan.is_end() {
            seen.push(scan.current().data.clone());
            scan.next_tuple().unwrap();
        }
        assert_eq!(seen, vec![2i32.to_le_bytes().to_vec(), 3i32.to_le_bytes().to_vec()]);
    }

    #[test]
    fn index_scan_exact_match_returns_only_equal_keys() {
        let (mut ctx, _) = ctx();
        let heap = Arc::new(HeapFile::new(Arc::new(InMemoryPageStore::new(256)), 4));
        let layout: KeyLayout = vec![(ColType::Int, 4)];
        let index: Arc<dyn BTreeIndex> = Arc::new(BTreeMapIndex::new(layout.clone()));
        for v in [1i32, 2, 2, 3] {
            let rid = heap.insert(&Record::new(v.to_le_bytes().to_vec())).unwrap();
            index.insert(v.to_le_bytes().to_vec(), rid);
        }
        ctx.heaps.insert("t".to_string(), heap);
        let index_meta = IndexMeta::new("t", vec![ColMeta::new("t", "id", ColType::Int, 4, 0)]);
        let conds = vec![Condition::new(TabCol::new("t", "id"), CmpOp::Eq, RhsKind::Value(Value::Int(2)))];
        let pm = PredicateManager::build(&index_meta, &conds);
        let mut scan = IndexScan::new(&ctx, "t", &index, &layout, &pm, cols(), false, LockIntent::Read).unwrap();
        scan.begin_tuple().unwrap();
        let mut count = 0;
        while !scan.is_end() {
            assert_eq!(scan.current().data, 2i32.to_le_bytes().to_vec());
            count += 1;
            scan.next_tuple().unwrap();
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn index_scan_reverse_gives_descending_order() {
        let (mut ctx, _) = ctx();
        let heap = Arc::new(HeapFile::new(Arc::new(InMemoryPageStore::new(256)), 4));
        let layout: KeyLayout = vec![(ColType::Int, 4)];
        let index: Arc<dyn BTreeIndex> = Arc::new(BTreeMapIndex::new(layout.clone()));
        for v in [1i32, 2, 3] {
            let rid = heap.insert(&Record::new(v.to_le_bytes().to_vec())).unwrap();
            index.insert(v.to_le_bytes().to_vec(), rid);
        }
        ctx.heaps.insert("t".to_string(), heap);
        let index_meta = IndexMeta::new("t", vec![ColMeta::new("t", "id", ColType::Int, 4, 0)]);
        let pm = PredicateManager::build(&index_meta, &[]);
        let mut scan = IndexScan::new(&ctx, "t", &index, &layout, &pm, cols(), true, LockIntent::Read).unwrap();
        scan.begin_tuple().unwrap();
        let mut seen = Vec::new();
        while !scan.is_end() {
            seen.push(scan.current().data.clone());
            scan.next_tuple().unwrap();
        }
        assert_eq!(
            seen,
            vec![3i32.to_le_bytes().to_vec(), 2i32.to_le_bytes().to_vec(), 1i32.to_le_bytes().to_vec()]
        );
    }
}
