//! Module: plan
//! Responsibility: `Plan`, the resolved operator tree the analyzer
//! hands the executor, plus `execute`/`build_operator`, the translator
//! that lowers a `Plan` into live `exec::Operator`s against one
//! transaction's `ExecContext`. Scan and join strategy are decided here
//! (index vs. sequential, nested-loop vs. sort-merge), not by `exec`
//! itself, which only knows how to run whatever shape it is handed.
//! Does not own: name resolution or type-checking (`analyzer`); lock
//! acquisition or write-set bookkeeping (`lock`, `txn`) — the leaf
//! scan/DML operators do that themselves, driven by the `LockIntent`
//! this module assigns.

use crate::exec::aggregate::{AggSpec, Aggregate};
use crate::exec::dml::{Assignment, Delete, Insert, Update};
use crate::exec::join::{NestedLoopJoin, SortMergeJoin};
use crate::exec::projection::Projection;
use crate::exec::scan::{IndexScan, LockIntent, SeqScan};
use crate::exec::sort::Sort;
use crate::exec::{ExecContext, Operator};
use crate::predicate::{Condition, PredicateManager, RhsKind};
use crate::storage::btree::KeyLayout;
use dbcore_types::col::{ColMeta, IndexMeta};
use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use dbcore_types::record::Record;
use dbcore_types::tabcol::TabCol;
use dbcore_types::value::Value;

fn plan_err(kind: ErrorKind, message: impl Into<String>) -> DbError {
    DbError::new(kind, ErrorOrigin::Planner, message)
}

/// Which write intent a scan beneath a DML node is opened with, carried
/// alongside the plan node rather than re-derived from context, since
/// the analyzer already knows whether the statement is a SELECT or the
/// read side of an UPDATE/DELETE.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanIntent {
    Read,
    Write,
}

impl ScanIntent {
    const fn into_lock_intent(self) -> LockIntent {
        match self {
            Self::Read => LockIntent::Read,
            Self::Write => LockIntent::Write,
        }
    }
}

/// The resolved, executable shape of one statement. Every `TabCol` here
/// is fully qualified; every `IndexMeta` is one the analyzer confirmed
/// exists. Subqueries are pre-resolved by `resolve_subqueries` before a
/// `Plan` reaches `execute` — `RhsKind::SubqueryPlan` surviving to
/// runtime is a planner bug, not a supported case.
#[derive(Clone, Debug)]
pub enum Plan {
    SeqScan {
        table: String,
        cols: Vec<ColMeta>,
        residual: Vec<Condition>,
        intent: ScanIntent,
    },
    IndexScan {
        table: String,
        index: IndexMeta,
        cols: Vec<ColMeta>,
        conditions: Vec<Condition>,
        reverse: bool,
        intent: ScanIntent,
    },
    NestedLoopJoin {
        outer: Box<Plan>,
        inner: Box<Plan>,
        conditions: Vec<Condition>,
    },
    SortMergeJoin {
        left: Box<Plan>,
        right: Box<Plan>,
        left_key: TabCol,
        right_key: TabCol,
    },
    Sort {
        input: Box<Plan>,
        keys: Vec<TabCol>,
        descending: bool,
    },
    Aggregate {
        input: Box<Plan>,
        group_cols: Vec<TabCol>,
        agg_specs: Vec<AggSpec>,
        having: Vec<Condition>,
    },
    Projection {
        input: Box<Plan>,
        select: Vec<TabCol>,
        aliases: Vec<Option<String>>,
        limit: Option<usize>,
    },
    Insert {
        table: String,
        cols: Vec<ColMeta>,
        rows: Vec<Record>,
        indexes: Vec<IndexMeta>,
    },
    Delete {
        table: String,
        input: Box<Plan>,
        indexes: Vec<IndexMeta>,
    },
    Update {
        table: String,
        cols: Vec<ColMeta>,
        assignments: Vec<(usize, Assignment)>,
        input: Box<Plan>,
        indexes: Vec<IndexMeta>,
        /// Whether any assignment targets a column that is part of some
        /// index's key. When `false`, no index entry can possibly change
        /// and the executor skips index maintenance entirely.
        is_set_index_key: bool,
    },
}

/// What running a `Plan` to completion produces: a result set for reads,
/// or a row count for writes.
#[derive(Debug)]
pub enum PlanOutput {
    Rows { cols: Vec<ColMeta>, rows: Vec<Record> },
    Affected(usize),
}

fn index_layout(index: &IndexMeta) -> KeyLayout {
    index.cols.iter().map(|c| (c.ty, c.len)).collect()
}

fn lookup_index(ctx: &ExecContext, index: &IndexMeta) -> Result<std::sync::Arc<dyn crate::storage::BTreeIndex>, DbError> {
    ctx.indexes
        .get(&index.index_name())
        .cloned()
        .ok_or_else(|| plan_err(ErrorKind::IndexNotFound, format!("index {} not resolved in this context", index.index_name())))
}

fn resolve_indexes(ctx: &ExecContext, metas: &[IndexMeta]) -> Result<Vec<(IndexMeta, std::sync::Arc<dyn crate::storage::BTreeIndex>)>, DbError> {
    metas.iter().map(|m| Ok((m.clone(), lookup_index(ctx, m)?))).collect()
}

/// Recursively lower the read side of a `Plan` (scans, joins, sort,
/// aggregate, projection) into a live `Operator` tree. DML nodes are not
/// handled here: `execute` drives them directly since they return a
/// row count, not a tuple stream.
pub fn build_operator(plan: &Plan, ctx: &ExecContext) -> Result<Box<dyn Operator>, DbError> {
    match plan {
        Plan::SeqScan { table, cols, residual, intent } => Ok(Box::new(SeqScan::new(
            ctx,
            table,
            cols.clone(),
            residual.clone(),
            intent.into_lock_intent(),
        )?)),
        Plan::IndexScan { table, index, cols, conditions, reverse, intent } => {
            let btree = lookup_index(ctx, index)?;
            let layout = index_layout(index);
            let pm = PredicateManager::build(index, conditions);
            Ok(Box::new(IndexScan::new(
                ctx,
                table,
                &btree,
                &layout,
                &pm,
                cols.clone(),
                *reverse,
                intent.into_lock_intent(),
            )?))
        }
        Plan::NestedLoopJoin { outer, inner, conditions } => {
            let outer_op = build_operator(outer, ctx)?;
            let inner_op = build_operator(inner, ctx)?;
            Ok(Box::new(NestedLoopJoin::new(outer_op, inner_op, conditions.clone())))
        }
        Plan::SortMergeJoin { left, right, left_key, right_key } => {
            let left_op = build_operator(left, ctx)?;
            let right_op = build_operator(right, ctx)?;
            Ok(Box::new(SortMergeJoin::new(left_op, right_op, left_key, right_key)?))
        }
        Plan::Sort { input, keys, descending } => {
            let child = build_operator(input, ctx)?;
            Ok(Box::new(Sort::build(child, keys, *descending)?))
        }
        Plan::Aggregate { input, group_cols, agg_specs, having } => {
            let child = build_operator(input, ctx)?;
            Ok(Box::new(Aggregate::build(child, group_cols, agg_specs, having)?))
        }
        Plan::Projection { input, select, aliases, limit } => {
            let child = build_operator(input, ctx)?;
            Ok(Box::new(Projection::build(child, select, aliases, *limit)?))
        }
        Plan::Insert { .. } | Plan::Delete { .. } | Plan::Update { .. } => Err(plan_err(
            ErrorKind::Internal,
            "DML plan node cannot be lowered to a tuple-producing operator",
        )),
    }
}

/// Run a `Plan` to completion against `ctx`: pull every tuple for a
/// read-shaped plan, or drive the write protocol for a DML plan.
pub fn execute(plan: &Plan, ctx: &ExecContext) -> Result<PlanOutput, DbError> {
    match plan {
        Plan::Insert { table, cols, rows, indexes } => {
            let resolved = resolve_indexes(ctx, indexes)?;
            let mut insert = Insert::new(table, cols.clone(), rows.clone());
            let n = insert.run(ctx, &resolved)?;
            Ok(PlanOutput::Affected(n))
        }
        Plan::Delete { table, input, indexes } => {
            let mut child = build_operator(input, ctx)?;
            let resolved = resolve_indexes(ctx, indexes)?;
            let delete = Delete::new(table);
            let n = delete.run(ctx, child.as_mut(), &resolved)?;
            Ok(PlanOutput::Affected(n))
        }
        Plan::Update { table, cols, assignments, input, indexes, is_set_index_key } => {
            let mut child = build_operator(input, ctx)?;
            let resolved = resolve_indexes(ctx, indexes)?;
            let update = Update::new(table, cols.clone(), assignments.clone(), *is_set_index_key);
            let n = update.run(ctx, child.as_mut(), &resolved)?;
            Ok(PlanOutput::Affected(n))
        }
        _ => {
            let mut op = build_operator(plan, ctx)?;
            let cols = op.cols().to_vec();
            let mut rows = Vec::new();
            op.begin_tuple()?;
            while !op.is_end() {
                rows.push(op.current().clone());
                op.next_tuple()?;
            }
            Ok(PlanOutput::Rows { cols, rows })
        }
    }
}

/// Walk every `Condition` reachable from `plan` and replace an
/// uncorrelated `RhsKind::SubqueryPlan` with the `ValueList` its
/// one-time execution against `ctx` produces. Must run before
/// `execute`/`build_operator` see the plan: those treat a surviving
/// `SubqueryPlan` as a planner bug.
pub fn resolve_subqueries(plan: &mut Plan, ctx: &ExecContext) -> Result<(), DbError> {
    for conditions in condition_lists_mut(plan) {
        for cond in conditions.iter_mut() {
            if let RhsKind::SubqueryPlan(sub) = &cond.rhs {
                let values = run_scalar_subquery(sub, ctx)?;
                cond.rhs = RhsKind::ValueList(values);
            }
        }
    }
    for child in children_mut(plan) {
        resolve_subqueries(child, ctx)?;
    }
    Ok(())
}

fn condition_lists_mut(plan: &mut Plan) -> Vec<&mut Vec<Condition>> {
    match plan {
        Plan::SeqScan { residual, .. } => vec![residual],
        Plan::IndexScan { conditions, .. } => vec![conditions],
        Plan::NestedLoopJoin { conditions, .. } => vec![conditions],
        Plan::Aggregate { having, .. } => vec![having],
        Plan::SortMergeJoin { .. } | Plan::Sort { .. } | Plan::Projection { .. } | Plan::Insert { .. } | Plan::Delete { .. } | Plan::Update { .. } => {
            vec![]
        }
    }
}

fn children_mut(plan: &mut Plan) -> Vec<&mut Plan> {
    match plan {
        Plan::NestedLoopJoin { outer, inner, .. } => vec![outer.as_mut(), inner.as_mut()],
        Plan::SortMergeJoin { left, right, .. } => vec![left.as_mut(), right.as_mut()],
        Plan::Sort { input, .. }
        | Plan::Aggregate { input, .. }
        | Plan::Projection { input, .. }
        | Plan::Delete { input, .. }
        | Plan::Update { input, .. } => vec![input.as_mut()],
        Plan::SeqScan { .. } | Plan::IndexScan { .. } | Plan::Insert { .. } => vec![],
    }
}

fn run_scalar_subquery(plan: &Plan, ctx: &ExecContext) -> Result<Vec<Value>, DbError> {
    match execute(plan, ctx)? {
        PlanOutput::Rows { cols, rows } => {
            if cols.len() != 1 {
                return Err(plan_err(ErrorKind::Internal, "scalar subquery must project exactly one column"));
            }
            Ok(rows.iter().map(|r| r.field(&cols[0])).collect())
        }
        PlanOutput::Affected(_) => Err(plan_err(ErrorKind::Internal, "a DML statement cannot appear as a scalar subquery")),
    }
}

/// Fallback invoked by `exec::eval_condition` when a `SubqueryPlan`
/// reaches runtime without having gone through `resolve_subqueries`.
/// Always an error: correlated re-evaluation per outer tuple is not
/// supported, so every subquery must be resolved once up front during
/// planning.
pub fn eval_scalar_subquery(_plan: &Plan) -> Result<Vec<Value>, DbError> {
    Err(plan_err(
        ErrorKind::Internal,
        "subquery was not resolved during planning; correlated subqueries are not supported",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockManager;
    use crate::predicate::CmpOp;
    use crate::storage::{HeapFile, InMemoryPageStore};
    use crate::txn::TxnManager;
    use crate::wal::LogManager;
    use dbcore_types::value::ColType;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx_with_rows(values: &[i32]) -> ExecContext {
        let lock_manager = Arc::new(LockManager::new());
        let log_manager = LogManager::new(Duration::from_secs(3600));
        let txn_manager = Arc::new(TxnManager::new(Arc::clone(&lock_manager), log_manager));
        let txn_id = txn_manager.begin();
        let heap = Arc::new(HeapFile::new(Arc::new(InMemoryPageStore::new(256)), 4));
        for v in values {
            heap.insert(&Record::new(v.to_le_bytes().to_vec())).unwrap();
        }
        let mut heaps = HashMap::new();
        heaps.insert("t".to_string(), heap);
        ExecContext::new(txn_id, lock_manager, txn_manager, heaps, HashMap::new())
    }

    fn cols() -> Vec<ColMeta> {
        vec![ColMeta::new("t", "id", ColType::Int, 4, 0)]
    }

    #[test]
    fn seq_scan_plan_runs_to_rows() {
        let ctx = ctx_with_rows(&[1, 2, 3]);
        let plan = Plan::SeqScan {
            table: "t".to_string(),
            cols: cols(),
            residual: vec![Condition::new(TabCol::new("t", "id"), CmpOp::Ge, RhsKind::Value(Value::Int(2)))],
            intent: ScanIntent::Read,
        };
        let PlanOutput::Rows { rows, .. } = execute(&plan, &ctx).unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn insert_plan_reports_affected_count() {
        let ctx = ctx_with_rows(&[]);
        let plan = Plan::Insert {
            table: "t".to_string(),
            cols: cols(),
            rows: vec![Record::from_values(&cols(), &[Value::Int(5)]), Record::from_values(&cols(), &[Value::Int(6)])],
            indexes: vec![],
        };
        let PlanOutput::Affected(n) = execute(&plan, &ctx).unwrap() else {
            panic!("expected affected count");
        };
        assert_eq!(n, 2);
    }

    #[test]
    fn unresolved_subquery_errors_at_runtime() {
        let sub = Plan::SeqScan {
            table: "t".to_string(),
            cols: cols(),
            residual: vec![],
            intent: ScanIntent::Read,
        };
        assert!(eval_scalar_subquery(&sub).is_err());
    }
}
