//! Module: exec
//! Responsibility: the tuple-at-a-time pull operators and the
//! shared `Operator` contract and `ExecContext` they run under. Plan
//! trees are lowered into these by `plan::build_operator`.
//! Does not own: plan shape or join-strategy selection — see `plan`.

pub mod aggregate;
pub mod dml;
pub mod join;
pub mod projection;
pub mod scan;
pub mod sort;

use crate::lock::{LockManager, TxnId};
use crate::predicate::{AggKind, CmpOp, Condition, RhsKind};
use crate::storage::{BTreeIndex, HeapFile};
use crate::txn::TxnManager;
use dbcore_types::col::ColMeta;
use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use dbcore_types::record::Record;
use dbcore_types::rid::Rid;
use dbcore_types::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

fn exec_err(kind: ErrorKind, message: impl Into<String>) -> DbError {
    DbError::new(kind, ErrorOrigin::Executor, message)
}

/// Shared handles every operator needs to resolve tables, take locks,
/// and log writes, threaded down from the session through the
/// plan translator.
#[derive(Clone)]
pub struct ExecContext {
    pub txn_id: TxnId,
    pub lock_manager: Arc<LockManager>,
    pub txn_manager: Arc<TxnManager>,
    pub heaps: HashMap<String, Arc<HeapFile>>,
    pub indexes: HashMap<String, Arc<dyn BTreeIndex>>,
    pub enable_nestloop: bool,
    pub enable_sortmerge: bool,
    next_spill_id: Arc<std::sync::atomic::AtomicU64>,
}

impl ExecContext {
    #[must_use]
    pub fn new(
        txn_id: TxnId,
        lock_manager: Arc<LockManager>,
        txn_manager: Arc<TxnManager>,
        heaps: HashMap<String, Arc<HeapFile>>,
        indexes: HashMap<String, Arc<dyn BTreeIndex>>,
    ) -> Self {
        Self {
            txn_id,
            lock_manager,
            txn_manager,
            heaps,
            indexes,
            enable_nestloop: true,
            enable_sortmerge: true,
            next_spill_id: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    /// A unique id for this context's lifetime, used to keep spill-file
    /// names from colliding across concurrently running operators.
    pub fn next_spill_id(&self) -> u64 {
        self.next_spill_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}

/// The tuple-at-a-time pull contract every operator implements.
/// `begin_tuple` must be idempotent across repeated calls (subquery
/// re-execution restarts the same operator instance).
pub trait Operator {
    fn begin_tuple(&mut self) -> Result<(), DbError>;
    fn next_tuple(&mut self) -> Result<(), DbError>;
    fn is_end(&self) -> bool;
    fn current(&self) -> &Record;
    fn rid(&self) -> Option<Rid> {
        None
    }
    fn cols(&self) -> &[ColMeta];

    fn tuple_len(&self) -> usize {
        self.cols().iter().map(ColMeta::width).sum()
    }
}

fn find_col<'a>(cols: &'a [ColMeta], tab_name: &str, col_name: &str) -> Option<(usize, &'a ColMeta)> {
    cols.iter()
        .enumerate()
        .find(|(_, c)| c.name == col_name && (tab_name.is_empty() || c.tab_name == tab_name))
}

/// Evaluate one `Condition` against a (possibly join-concatenated)
/// record using `cols` as its schema.
pub fn eval_condition(cond: &Condition, record: &Record, cols: &[ColMeta]) -> Result<bool, DbError> {
    if cond.lhs.is_star() {
        return Ok(true);
    }
    let (_, lhs_col) = find_col(cols, &cond.lhs.tab_name, &cond.lhs.col_name)
        .ok_or_else(|| exec_err(ErrorKind::ColumnNotFound, format!("unknown column {}", cond.lhs)))?;
    let lhs_value = record.field(lhs_col);

    let target_ty = lhs_value.col_type();
    match &cond.rhs {
        RhsKind::Value(value) => compare_values(&lhs_value, cond.op, &[value.coerce_to(target_ty)?]),
        RhsKind::Col(tab_col) => {
            let (_, rhs_col) = find_col(cols, &tab_col.tab_name, &tab_col.col_name)
                .ok_or_else(|| exec_err(ErrorKind::ColumnNotFound, format!("unknown column {tab_col}")))?;
            let rhs_value = record.field(rhs_col);
            compare_values(&lhs_value, cond.op, &[rhs_value.coerce_to(target_ty)?])
        }
        RhsKind::ValueList(values) => {
            let coerced: Result<Vec<Value>, DbError> = values.iter().map(|v| v.coerce_to(target_ty)).collect();
            compare_values(&lhs_value, cond.op, &coerced?)
        }
        RhsKind::SubqueryPlan(plan) => {
            let rows = crate::plan::eval_scalar_subquery(plan)?;
            let coerced: Result<Vec<Value>, DbError> = rows.iter().map(|v| v.coerce_to(target_ty)).collect();
            compare_values(&lhs_value, cond.op, &coerced?)
        }
    }
}

fn compare_values(lhs: &Value, op: CmpOp, rhs: &[Value]) -> Result<bool, DbError> {
    match op {
        CmpOp::In => Ok(rhs.iter().any(|v| v == lhs)),
        CmpOp::Eq => Ok(rhs.first().is_some_and(|v| v == lhs)),
        CmpOp::Ne => Ok(rhs.first().is_some_and(|v| v != lhs)),
        CmpOp::Lt | CmpOp::Gt | CmpOp::Le | CmpOp::Ge => {
            let rhs = rhs.first().ok_or_else(|| {
                exec_err(ErrorKind::Internal, "range comparison requires exactly one value")
            })?;
            let ordering = typed_partial_cmp(lhs, rhs)?;
            Ok(match op {
                CmpOp::Lt => ordering == std::cmp::Ordering::Less,
                CmpOp::Gt => ordering == std::cmp::Ordering::Greater,
                CmpOp::Le => ordering != std::cmp::Ordering::Greater,
                CmpOp::Ge => ordering != std::cmp::Ordering::Less,
                CmpOp::Eq | CmpOp::Ne | CmpOp::In => unreachable!(),
            })
        }
    }
}

/// Concatenate two schemas for a join's output record, re-anchoring the
/// right schema's column offsets past the end of the left one.
#[must_use]
pub fn concat_schema(left: &[ColMeta], right: &[ColMeta]) -> Vec<ColMeta> {
    let left_width: usize = left.iter().map(ColMeta::width).sum();
    let mut out = left.to_vec();
    out.extend(right.iter().map(|c| {
        let mut c = c.clone();
        c.offset += left_width;
        c
    }));
    out
}

/// Concatenate two records' bytes into one join-output record, matching
/// the offsets `concat_schema` produces for the same pair of schemas.
#[must_use]
pub fn concat_records(left: &Record, right: &Record) -> Record {
    let mut data = left.data.clone();
    data.extend_from_slice(&right.data);
    Record::new(data)
}

pub(crate) fn typed_partial_cmp(a: &Value, b: &Value) -> Result<std::cmp::Ordering, DbError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => Ok(x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal)),
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        _ => Err(exec_err(ErrorKind::IncompatibleType, "cannot compare values of different types")),
    }
}

/// Evaluate every residual condition conjunctively.
pub fn eval_all(conds: &[Condition], record: &Record, cols: &[ColMeta]) -> Result<bool, DbError> {
    for cond in conds {
        if !eval_condition(cond, record, cols)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Extract the `AggKind` a HAVING condition targets, so the aggregate
/// operator can evaluate it against its computed slots instead of a
/// stored column.
#[must_use]
pub fn having_agg_kind(cond: &Condition) -> AggKind {
    cond.agg_kind
}
