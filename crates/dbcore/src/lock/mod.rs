//! Module: lock
//! Responsibility: `LockManager` — table/row/gap locking under strict
//! two-phase locking, with wait-for-graph deadlock detection.
//! Does not own: transaction lifecycle or write-set bookkeeping (that
//! is `txn`); log durability (that is `wal`).

use crate::predicate::Gap;
use crate::storage::btree::{compare_keys, KeyLayout};
use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use dbcore_types::rid::Rid;
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};

/// 4-byte transaction id, sized to fit the 20-byte log record header
/// unchanged.
pub type TxnId = u32;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockMode {
    IS,
    IX,
    S,
    X,
}

impl LockMode {
    /// Standard 2PL compatibility matrix plus intention-lock rules.
    #[must_use]
    pub const fn compatible_with(self, other: Self) -> bool {
        use LockMode::{IS, IX, S, X};
        match (self, other) {
            (IS, IS | IX | S) | (IX, IS | IX) | (S, IS | S) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResourceKey {
    Table(String),
    Row(String, Rid),
    Gap(String, Vec<u8>, Vec<u8>),
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table(t) => write!(f, "table:{t}"),
            Self::Row(t, rid) => write!(f, "row:{t}:{rid}"),
            Self::Gap(t, ..) => write!(f, "gap:{t}"),
        }
    }
}

struct Holder {
    txn_id: TxnId,
    mode: LockMode,
}

#[derive(Default)]
struct GapBucket {
    entries: Vec<(Vec<u8>, Vec<u8>, TxnId, LockMode)>,
}

#[derive(Default)]
struct LockTable {
    table_locks: HashMap<String, Vec<Holder>>,
    row_locks: HashMap<(String, Rid), Vec<Holder>>,
    gap_locks: HashMap<String, GapBucket>,
    wait_for: HashMap<TxnId, HashSet<TxnId>>,
    held_by_txn: HashMap<TxnId, Vec<ResourceKey>>,
}

fn lock_err(kind: ErrorKind, message: impl Into<String>) -> DbError {
    DbError::new(kind, ErrorOrigin::Lock, message)
}

/// The table/row/gap lock manager. Every acquire blocks the caller's OS
/// thread until the lock is granted or a deadlock is detected.
pub struct LockManager {
    state: Mutex<LockTable>,
    cv: Condvar,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockTable::default()),
            cv: Condvar::new(),
        }
    }

    pub fn lock_shared_on_table(&self, txn_id: TxnId, table: &str) -> Result<(), DbError> {
        self.acquire_table(txn_id, table, LockMode::S)
    }

    pub fn lock_exclusive_on_table(&self, txn_id: TxnId, table: &str) -> Result<(), DbError> {
        self.acquire_table(txn_id, table, LockMode::X)
    }

    pub fn lock_intention_shared_on_table(&self, txn_id: TxnId, table: &str) -> Result<(), DbError> {
        self.acquire_table(txn_id, table, LockMode::IS)
    }

    pub fn lock_intention_exclusive_on_table(&self, txn_id: TxnId, table: &str) -> Result<(), DbError> {
        self.acquire_table(txn_id, table, LockMode::IX)
    }

    pub fn lock_shared_on_row(&self, txn_id: TxnId, table: &str, rid: Rid) -> Result<(), DbError> {
        self.acquire_row(txn_id, table, rid, LockMode::S)
    }

    pub fn lock_exclusive_on_row(&self, txn_id: TxnId, table: &str, rid: Rid) -> Result<(), DbError> {
        self.acquire_row(txn_id, table, rid, LockMode::X)
    }

    pub fn lock_shared_on_gap(
        &self,
        txn_id: TxnId,
        table: &str,
        layout: &KeyLayout,
        gap: &Gap,
    ) -> Result<(), DbError> {
        self.acquire_gap(txn_id, table, layout, gap, LockMode::S)
    }

    pub fn lock_exclusive_on_gap(
        &self,
        txn_id: TxnId,
        table: &str,
        layout: &KeyLayout,
        gap: &Gap,
    ) -> Result<(), DbError> {
        self.acquire_gap(txn_id, table, layout, gap, LockMode::X)
    }

    /// Release every lock this transaction holds, at commit or abort
    /// (strict 2PL: no early release).
    pub fn release_all(&self, txn_id: TxnId) {
        let mut state = self.state.lock().unwrap();
        let Some(resources) = state.held_by_txn.remove(&txn_id) else {
            return;
        };
        for resource in resources {
            match resource {
                ResourceKey::Table(t) => {
                    if let Some(holders) = state.table_locks.get_mut(&t) {
                        holders.retain(|h| h.txn_id != txn_id);
                    }
                }
                ResourceKey::Row(t, rid) => {
                    if let Some(holders) = state.row_locks.get_mut(&(t, rid)) {
                        holders.retain(|h| h.txn_id != txn_id);
                    }
                }
                ResourceKey::Gap(t, left, right) => {
                    if let Some(bucket) = state.gap_locks.get_mut(&t) {
                        bucket
                            .entries
                            .retain(|(l, r, id, _)| !(*l == left && *r == right && *id == txn_id));
                    }
                }
            }
        }
        state.wait_for.remove(&txn_id);
        for waiters in state.wait_for.values_mut() {
            waiters.remove(&txn_id);
        }
        drop(state);
        self.cv.notify_all();
    }

    fn record_held(state: &mut LockTable, txn_id: TxnId, resource: ResourceKey) {
        state.held_by_txn.entry(txn_id).or_default().push(resource);
    }

    fn acquire_table(&self, txn_id: TxnId, table: &str, mode: LockMode) -> Result<(), DbError> {
        let resource = ResourceKey::Table(table.to_string());
        loop {
            let mut state = self.state.lock().unwrap();
            let holders = state.table_locks.entry(table.to_string()).or_default();
            if let Some(existing) = holders.iter().find(|h| h.txn_id == txn_id) {
                if mode_subsumed(existing.mode, mode) {
                    return Ok(());
                }
            }
            let conflicting: Vec<TxnId> = holders
                .iter()
                .filter(|h| h.txn_id != txn_id && !h.mode.compatible_with(mode))
                .map(|h| h.txn_id)
                .collect();
            if conflicting.is_empty() {
                holders.retain(|h| h.txn_id != txn_id);
                holders.push(Holder { txn_id, mode });
                let label = resource.to_string();
                Self::record_held(&mut state, txn_id, resource);
                crate::diagnostics::lock_granted(txn_id, &label, mode_label(mode));
                return Ok(());
            }
            self.block_or_abort(state, txn_id, conflicting, &resource)?;
        }
    }

    fn acquire_row(&self, txn_id: TxnId, table: &str, rid: Rid, mode: LockMode) -> Result<(), DbError> {
        let key = (table.to_string(), rid);
        let resource = ResourceKey::Row(table.to_string(), rid);
        loop {
            let mut state = self.state.lock().unwrap();
            let holders = state.row_locks.entry(key.clone()).or_default();
            if let Some(existing) = holders.iter().find(|h| h.txn_id == txn_id) {
                if mode_subsumed(existing.mode, mode) {
                    return Ok(());
                }
            }
            let conflicting: Vec<TxnId> = holders
                .iter()
                .filter(|h| h.txn_id != txn_id && !h.mode.compatible_with(mode))
                .map(|h| h.txn_id)
                .collect();
            if conflicting.is_empty() {
                holders.retain(|h| h.txn_id != txn_id);
                holders.push(Holder { txn_id, mode });
                let label = resource.to_string();
                Self::record_held(&mut state, txn_id, resource);
                crate::diagnostics::lock_granted(txn_id, &label, mode_label(mode));
                return Ok(());
            }
            self.block_or_abort(state, txn_id, conflicting, &resource)?;
        }
    }

    fn acquire_gap(
        &self,
        txn_id: TxnId,
        table: &str,
        layout: &KeyLayout,
        gap: &Gap,
        mode: LockMode,
    ) -> Result<(), DbError> {
        let resource = ResourceKey::Gap(table.to_string(), gap.left_key.clone(), gap.right_key.clone());
        loop {
            let mut state = self.state.lock().unwrap();
            let bucket = state.gap_locks.entry(table.to_string()).or_default();
            let conflicting: Vec<TxnId> = bucket
                .entries
                .iter()
                .filter(|(left, right, id, held_mode)| {
                    *id != txn_id
                        && !held_mode.compatible_with(mode)
                        && ranges_overlap(&gap.left_key, &gap.right_key, left, right, layout)
                })
                .map(|(_, _, id, _)| *id)
                .collect();
            if conflicting.is_empty() {
                bucket
                    .entries
                    .push((gap.left_key.clone(), gap.right_key.clone(), txn_id, mode));
                let label = resource.to_string();
                Self::record_held(&mut state, txn_id, resource);
                crate::diagnostics::lock_granted(txn_id, &label, mode_label(mode));
                return Ok(());
            }
            self.block_or_abort(state, txn_id, conflicting, &resource)?;
        }
    }

    /// Add wait-for edges for a blocked acquire; if they would close a
    /// cycle, abort the requester with `DeadlockAbort` instead of
    /// blocking. Otherwise block on the shared condvar and let the
    /// caller retry.
    fn block_or_abort(
        &self,
        mut state: std::sync::MutexGuard<'_, LockTable>,
        txn_id: TxnId,
        conflicting: Vec<TxnId>,
        resource: &ResourceKey,
    ) -> Result<(), DbError> {
        let edges = state.wait_for.entry(txn_id).or_default();
        for other in &conflicting {
            edges.insert(*other);
        }
        if has_cycle(&state.wait_for, txn_id) {
            state.wait_for.get_mut(&txn_id).unwrap().clear();
            crate::diagnostics::deadlock_aborted(txn_id, &resource.to_string());
            return Err(lock_err(
                ErrorKind::DeadlockAbort,
                format!("transaction {txn_id} aborted: deadlock on {resource}"),
            ));
        }
        crate::diagnostics::lock_waiting(txn_id, &resource.to_string());
        let _unused = self.cv.wait(state).unwrap();
        Ok(())
    }
}

fn mode_subsumed(held: LockMode, requested: LockMode) -> bool {
    matches!(
        (held, requested),
        (LockMode::X, _) | (LockMode::S, LockMode::S | LockMode::IS) | (LockMode::IX, LockMode::IS)
    )
}

fn mode_label(mode: LockMode) -> &'static str {
    match mode {
        LockMode::IS => "IS",
        LockMode::IX => "IX",
        LockMode::S => "S",
        LockMode::X => "X",
    }
}

fn ranges_overlap(l1: &[u8], r1: &[u8], l2: &[u8], r2: &[u8], layout: &KeyLayout) -> bool {
    compare_keys(l1, r2, layout).is_lt() && compare_keys(l2, r1, layout).is_lt()
}

/// Depth-first search from `start` for a cycle in the wait-for graph.
fn has_cycle(graph: &HashMap<TxnId, HashSet<TxnId>>, start: TxnId) -> bool {
    let mut visiting = HashSet::new();
    let mut path = HashSet::new();
    fn visit(
        node: TxnId,
        start: TxnId,
        graph: &HashMap<TxnId, HashSet<TxnId>>,
        path: &mut HashSet<TxnId>,
        visiting: &mut HashSet<TxnId>,
    ) -> bool {
        if node == start && !path.is_empty() {
            return true;
        }
        if visiting.contains(&node) {
            return false;
        }
        visiting.insert(node);
        path.insert(node);
        let found = graph
            .get(&node)
            .is_some_and(|next| next.iter().any(|&n| visit(n, start, graph, path, visiting)));
        path.remove(&node);
        found
    }
    graph
        .get(&start)
        .is_some_and(|next| next.iter().any(|&n| visit(n, start, graph, &mut path, &mut visiting)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcore_types::value::ColType;

    #[test]
    fn shared_locks_on_same_row_are_compatible() {
        let lm = LockManager::new();
        lm.lock_shared_on_row(1, "t", Rid::new(0, 0)).unwrap();
        lm.lock_shared_on_row(2, "t", Rid::new(0, 0)).unwrap();
    }

    #[test]
    fn exclusive_lock_is_reentrant_for_same_txn() {
        let lm = LockManager::new();
        lm.lock_exclusive_on_row(1, "t", Rid::new(0, 0)).unwrap();
        lm.lock_exclusive_on_row(1, "t", Rid::new(0, 0)).unwrap();
    }

    #[test]
    fn release_all_frees_row_for_other_transactions() {
        let lm = LockManager::new();
        lm.lock_exclusive_on_row(1, "t", Rid::new(0, 0)).unwrap();
        lm.release_all(1);
        lm.lock_exclusive_on_row(2, "t", Rid::new(0, 0)).unwrap();
    }

    #[test]
    fn overlapping_exclusive_gaps_conflict() {
        let layout = vec![(ColType::Int, 4)];
        let gap_a = Gap {
            left_key: 0i32.to_le_bytes().to_vec(),
            right_key: 10i32.to_le_bytes().to_vec(),
        };
        let gap_b = Gap {
            left_key: 5i32.to_le_bytes().to_vec(),
            right_key: 15i32.to_le_bytes().to_vec(),
        };
        assert!(ranges_overlap(
            &gap_a.left_key,
            &gap_a.right_key,
            &gap_b.left_key,
            &gap_b.right_key,
            &layout
        ));
    }

    #[test]
    fn self_wait_cycle_is_not_falsely_flagged_on_first_wait() {
        let mut graph = HashMap::new();
        graph.insert(1u32, HashSet::from([2u32]));
        assert!(!has_cycle(&graph, 1));
    }

    #[test]
    fn two_cycle_is_detected() {
        let mut graph = HashMap::new();
        graph.insert(1u32, HashSet::from([2u32]));
        graph.insert(2u32, HashSet::from([1u32]));
        assert!(has_cycle(&graph, 1));
    }
}
