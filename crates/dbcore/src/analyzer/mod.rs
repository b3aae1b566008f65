//! Module: analyzer
//! Responsibility: semantic analysis over a parsed `ast::Statement` —
//! table/column existence, unqualified-column resolution against the
//! FROM list, type-checking predicates, alias synthesis for unaliased
//! aggregates, the GROUP BY/aggregate-purity invariant — and lowering
//! the result to a `plan::Plan`. Does not own: tokenizing or
//! grammar (`parser`); choosing to acquire a lock or how a scan reads a
//! heap (`exec`) — this module only decides which scan/join shape to
//! build, never runs one itself.

use crate::catalog::{DbMeta, TabMeta};
use crate::exec::aggregate::AggSpec;
use crate::exec::dml::Assignment;
use crate::parser::ast::{self, AggType, BinaryExpr, BoundExpr, ColRef, CompOp, HavingExpr, Lit, Rhs, SelectStmt, SetClause, Statement};
use crate::plan::{Plan, ScanIntent};
use crate::predicate::{AggKind, CmpOp, Condition, RhsKind};
use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use dbcore_types::record::Record;
use dbcore_types::tabcol::TabCol;
use dbcore_types::value::{ColType, Value};

fn analyzer_err(kind: ErrorKind, message: impl Into<String>) -> DbError {
    DbError::new(kind, ErrorOrigin::Analyzer, message)
}

/// Session-controlled knobs that bias plan shape, mirroring `SET
/// enable_nestloop|enable_sortmerge`.
#[derive(Clone, Copy, Debug)]
pub struct PlanOptions {
    pub enable_nestloop: bool,
    pub enable_sortmerge: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self { enable_nestloop: true, enable_sortmerge: false }
    }
}

/// Lower one DML/SELECT statement into an executable `Plan`, resolving
/// every name against `catalog` along the way. DDL, transaction
/// control, `SET`, and `HELP` statements are not analyzable as a plan —
/// the session dispatches those directly.
pub fn analyze(stmt: Statement, catalog: &DbMeta, opts: PlanOptions) -> Result<Plan, DbError> {
    match stmt {
        Statement::Select(select) => analyze_select(select, catalog, opts),
        Statement::Insert { table, values } => analyze_insert(&table, values, catalog),
        Statement::Delete { table, conds } => analyze_delete(&table, conds, catalog, opts),
        Statement::Update { table, set, conds } => analyze_update(&table, set, conds, catalog, opts),
        other => Err(analyzer_err(ErrorKind::Internal, format!("{other:?} is not a data-manipulation statement"))),
    }
}

fn to_cmp_op(op: CompOp) -> CmpOp {
    match op {
        CompOp::Eq => CmpOp::Eq,
        CompOp::Ne => CmpOp::Ne,
        CompOp::Lt => CmpOp::Lt,
        CompOp::Gt => CmpOp::Gt,
        CompOp::Le => CmpOp::Le,
        CompOp::Ge => CmpOp::Ge,
        CompOp::In => CmpOp::In,
    }
}

fn to_agg_kind(agg: AggType) -> AggKind {
    match agg {
        AggType::Col => AggKind::None,
        AggType::Count => AggKind::Count,
        AggType::Max => AggKind::Max,
        AggType::Min => AggKind::Min,
        AggType::Sum => AggKind::Sum,
    }
}

fn col_ref_to_tabcol(col: &ColRef) -> TabCol {
    if col.is_star() {
        TabCol::star()
    } else {
        TabCol::new(col.tab_name.clone().unwrap_or_default(), col.col_name.clone())
    }
}

/// Resolve an unqualified column against `tables`, inferring the owning
/// table by scanning every table's column set; qualified columns are
/// checked for existence in exactly the table they name.
fn check_column(catalog: &DbMeta, tables: &[String], target: &mut TabCol) -> Result<(), DbError> {
    if target.tab_name.is_empty() {
        let mut owner: Option<&str> = None;
        for table in tables {
            let tab = catalog.get_table(table)?;
            if tab.is_col(&target.col_name) {
                if owner.is_some() {
                    return Err(analyzer_err(ErrorKind::AmbiguousColumn, format!("column {} is ambiguous", target.col_name)));
                }
                owner = Some(table);
            }
        }
        let Some(owner) = owner else {
            return Err(analyzer_err(ErrorKind::ColumnNotFound, format!("column {} not found", target.col_name)));
        };
        target.tab_name = owner.to_string();
    } else if !tables.contains(&target.tab_name) || !catalog.get_table(&target.tab_name)?.is_col(&target.col_name) {
        return Err(analyzer_err(ErrorKind::ColumnNotFound, format!("column {} not found", target)));
    }
    Ok(())
}

fn col_type_of(catalog: &DbMeta, tab_col: &TabCol) -> Result<ColType, DbError> {
    Ok(catalog.get_table(&tab_col.tab_name)?.col(&tab_col.col_name).expect("resolved column must exist").ty)
}

fn literal_type(lit: &Lit) -> ColType {
    match lit {
        Lit::Int(_) => ColType::Int,
        Lit::Float(_) => ColType::Float,
        Lit::Str(_) => ColType::Str,
    }
}

/// Coerce `lit` so it type-checks against `target`, the only implicit
/// conversion being `Int -> Float`.
fn coerce_literal(lit: Lit, target: ColType) -> Result<Value, DbError> {
    lit.into_value().coerce_to(target)
}

fn convert_where_conds(
    conds: Vec<BinaryExpr>,
    tables: &[String],
    catalog: &DbMeta,
    opts: PlanOptions,
) -> Result<Vec<Condition>, DbError> {
    conds
        .into_iter()
        .map(|expr| convert_where_cond(expr, tables, catalog, opts))
        .collect()
}

fn convert_where_cond(expr: BinaryExpr, tables: &[String], catalog: &DbMeta, opts: PlanOptions) -> Result<Condition, DbError> {
    let mut lhs = col_ref_to_tabcol(&expr.lhs);
    check_column(catalog, tables, &mut lhs)?;
    let lhs_ty = col_type_of(catalog, &lhs)?;
    let op = to_cmp_op(expr.op);

    let rhs = match expr.rhs {
        Rhs::Value(lit) => RhsKind::Value(coerce_literal(lit, lhs_ty)?),
        Rhs::ValueList(lits) => {
            let values: Result<Vec<Value>, DbError> = lits.into_iter().map(|l| coerce_literal(l, lhs_ty)).collect();
            RhsKind::ValueList(values?)
        }
        Rhs::Col(col) => {
            let mut rhs_col = col_ref_to_tabcol(&col);
            check_column(catalog, tables, &mut rhs_col)?;
            let rhs_ty = col_type_of(catalog, &rhs_col)?;
            if rhs_ty != lhs_ty && !(lhs_ty == ColType::Float && rhs_ty == ColType::Int) {
                return Err(analyzer_err(
                    ErrorKind::IncompatibleType,
                    format!("cannot compare {lhs_ty} column against {rhs_ty} column"),
                ));
            }
            RhsKind::Col(rhs_col)
        }
        Rhs::Subquery(sub) => {
            let sub_plan = analyze_select(*sub, catalog, opts)?;
            RhsKind::SubqueryPlan(Box::new(sub_plan))
        }
    };
    Ok(Condition { lhs, op, agg_kind: AggKind::None, rhs })
}

/// Whether a WHERE condition only ever references a single table —
/// eligible to be pushed into that table's scan instead of staying a
/// post-join residual.
fn single_table_owner(cond: &Condition) -> Option<String> {
    match &cond.rhs {
        RhsKind::Col(rhs) if rhs.tab_name != cond.lhs.tab_name => None,
        _ => Some(cond.lhs.tab_name.clone()),
    }
}

fn build_single_table_scan(tab: &TabMeta, conds: Vec<Condition>, intent: ScanIntent) -> Plan {
    let leading_eq = conds.iter().find(|c| c.op == CmpOp::Eq && matches!(c.rhs, RhsKind::Value(_)));
    let index = leading_eq.and_then(|c| tab.index_covering(&c.lhs.col_name)).cloned();
    match index {
        Some(index) => Plan::IndexScan { table: tab.name.clone(), index, cols: tab.cols.clone(), conditions: conds, reverse: false, intent },
        None => Plan::SeqScan { table: tab.name.clone(), cols: tab.cols.clone(), residual: conds, intent },
    }
}

/// A join step qualifies for a sort-merge strategy when its condition
/// list is exactly one equality between two plain columns — the only
/// shape `exec::join::SortMergeJoin` knows how to merge. Returns
/// `(outer_key, inner_key)`, oriented so `outer_key` names a column on
/// the already-built side and `inner_key` one on `new_table`.
fn equi_join_keys(join_conds: &[Condition], new_table: &str) -> Option<(TabCol, TabCol)> {
    let [cond] = join_conds else { return None };
    if cond.op != CmpOp::Eq {
        return None;
    }
    let RhsKind::Col(rhs) = &cond.rhs else { return None };
    if cond.lhs.tab_name == new_table && rhs.tab_name != new_table {
        Some((rhs.clone(), cond.lhs.clone()))
    } else if rhs.tab_name == new_table && cond.lhs.tab_name != new_table {
        Some((cond.lhs.clone(), rhs.clone()))
    } else {
        None
    }
}

fn build_join_tree(tables: &[String], conds: Vec<Condition>, catalog: &DbMeta, intent: ScanIntent, opts: PlanOptions) -> Result<Plan, DbError> {
    let mut owned: Vec<Vec<Condition>> = tables.iter().map(|_| Vec::new()).collect();
    let mut cross: Vec<Condition> = Vec::new();
    for cond in conds {
        match single_table_owner(&cond) {
            Some(owner) => {
                let idx = tables.iter().position(|t| t == &owner).expect("owner must be one of the FROM tables");
                owned[idx].push(cond);
            }
            None => cross.push(cond),
        }
    }

    let mut seen = vec![tables[0].clone()];
    let first_tab = catalog.get_table(&tables[0])?;
    let mut plan = build_single_table_scan(first_tab, std::mem::take(&mut owned[0]), intent);

    for (i, table) in tables.iter().enumerate().skip(1) {
        let tab = catalog.get_table(table)?;
        let inner = build_single_table_scan(tab, std::mem::take(&mut owned[i]), intent);
        let mut join_conds = Vec::new();
        cross.retain(|c| {
            let rhs_tab = match &c.rhs {
                RhsKind::Col(rhs) => Some(rhs.tab_name.as_str()),
                _ => None,
            };
            let touches_new = c.lhs.tab_name == *table || rhs_tab == Some(table.as_str());
            let rhs_ok = rhs_tab.map_or(true, |r| seen.iter().any(|t| t == r) || r == table);
            let both_seen = seen.iter().any(|t| t == &c.lhs.tab_name) && rhs_ok;
            if touches_new && both_seen {
                join_conds.push(c.clone());
                false
            } else {
                true
            }
        });
        seen.push(table.clone());
        plan = match equi_join_keys(&join_conds, table) {
            Some((left_key, right_key)) if opts.enable_sortmerge => Plan::SortMergeJoin {
                left: Box::new(Plan::Sort { input: Box::new(plan), keys: vec![left_key.clone()], descending: false }),
                right: Box::new(Plan::Sort { input: Box::new(inner), keys: vec![right_key.clone()], descending: false }),
                left_key,
                right_key,
            },
            _ => Plan::NestedLoopJoin { outer: Box::new(plan), inner: Box::new(inner), conditions: join_conds },
        };
    }
    Ok(plan)
}

fn alias_for(agg: AggType, col: &ColRef) -> String {
    match agg {
        AggType::Count if col.is_star() => "COUNT(*)".to_string(),
        AggType::Count => format!("COUNT({})", col.col_name),
        AggType::Max => format!("MAX({})", col.col_name),
        AggType::Min => format!("MIN({})", col.col_name),
        AggType::Sum => format!("SUM({})", col.col_name),
        AggType::Col => col.col_name.clone(),
    }
}

/// Matches the synthesized column naming `exec::aggregate::Aggregate`
/// builds: group columns keep their bare name, aggregates are named
/// `"{Kind:?}({col or *})"`.
fn post_aggregate_tabcol(agg: AggType, col: &ColRef) -> TabCol {
    if agg == AggType::Col {
        return TabCol::new(String::new(), col.col_name.clone());
    }
    let kind = to_agg_kind(agg);
    let inner = if col.is_star() { "*".to_string() } else { col.col_name.clone() };
    TabCol::new(String::new(), format!("{kind:?}({inner})"))
}

fn analyze_select(select: SelectStmt, catalog: &DbMeta, opts: PlanOptions) -> Result<Plan, DbError> {
    let mut tables = select.tables;
    for join in &select.joins {
        tables.push(join.table.clone());
    }
    for table in &tables {
        if !catalog.is_table(table) {
            return Err(analyzer_err(ErrorKind::TableNotFound, format!("table {table} not found")));
        }
    }

    let star = select.select_list.is_empty();
    let items: Vec<BoundExpr> = if star {
        if !select.group_bys.is_empty() || !select.havings.is_empty() {
            return Err(analyzer_err(ErrorKind::Internal, "select * cannot be combined with GROUP BY or HAVING"));
        }
        tables
            .iter()
            .map(|t| catalog.get_table(t))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flat_map(|tab| tab.cols.iter().map(|c| BoundExpr { col: ColRef::qualified(c.tab_name.clone(), c.name.clone()), agg: AggType::Col, alias: None }))
            .collect()
    } else {
        select.select_list
    };

    let mut resolved_cols = Vec::with_capacity(items.len());
    let mut aliases = Vec::with_capacity(items.len());
    for item in &items {
        let mut tab_col = col_ref_to_tabcol(&item.col);
        if !(item.agg == AggType::Count && item.col.is_star()) {
            check_column(catalog, &tables, &mut tab_col)?;
        }
        let alias = item.alias.clone().unwrap_or_else(|| if item.agg == AggType::Col { String::new() } else { alias_for(item.agg, &item.col) });
        resolved_cols.push((item.agg, item.col.clone(), tab_col));
        aliases.push(if alias.is_empty() { None } else { Some(alias) });
    }

    let where_conds = convert_where_conds(select.conds, &tables, catalog, opts)?;

    let mut group_bys = Vec::with_capacity(select.group_bys.len());
    for g in &select.group_bys {
        let mut tc = col_ref_to_tabcol(g);
        check_column(catalog, &tables, &mut tc)?;
        group_bys.push(tc);
    }

    if group_bys.is_empty() {
        if !select.havings.is_empty() {
            return Err(analyzer_err(ErrorKind::Internal, "HAVING requires a GROUP BY clause"));
        }
        let has_col = resolved_cols.iter().any(|(agg, ..)| *agg == AggType::Col);
        let has_agg = resolved_cols.iter().any(|(agg, ..)| *agg != AggType::Col);
        if has_col && has_agg {
            return Err(analyzer_err(ErrorKind::Internal, "cannot mix aggregate and non-aggregate columns without GROUP BY"));
        }
    } else {
        for (agg, _, tab_col) in &resolved_cols {
            if *agg == AggType::Col && !group_bys.contains(tab_col) {
                return Err(analyzer_err(
                    ErrorKind::Internal,
                    format!("column {tab_col} must appear in GROUP BY or be wrapped in an aggregate"),
                ));
            }
        }
    }

    let needs_aggregate = !group_bys.is_empty() || resolved_cols.iter().any(|(agg, ..)| *agg != AggType::Col);

    let mut havings = Vec::with_capacity(select.havings.len());
    for HavingExpr { lhs, op, rhs } in select.havings {
        if lhs.agg == AggType::Col {
            return Err(analyzer_err(ErrorKind::Internal, "HAVING left side must be an aggregate"));
        }
        let lhs_tab_col = post_aggregate_tabcol(lhs.agg, &lhs.col);
        let value = rhs.into_value();
        havings.push(Condition { lhs: lhs_tab_col, op: to_cmp_op(op), agg_kind: to_agg_kind(lhs.agg), rhs: RhsKind::Value(value) });
    }

    let order_by = match select.order_by {
        Some((col, dir)) => {
            let mut tc = col_ref_to_tabcol(&col);
            check_column(catalog, &tables, &mut tc)?;
            Some((tc, dir))
        }
        None => None,
    };

    let mut plan = build_join_tree(&tables, where_conds, catalog, ScanIntent::Read, opts)?;

    if needs_aggregate {
        let agg_specs: Vec<AggSpec> = resolved_cols
            .iter()
            .filter(|(agg, ..)| *agg != AggType::Col)
            .map(|(agg, col, _)| AggSpec { kind: to_agg_kind(*agg), col: if col.is_star() { None } else { Some(col_ref_to_tabcol(col)) } })
            .collect();
        plan = Plan::Aggregate { input: Box::new(plan), group_cols: group_bys, agg_specs, having: havings };
    }

    if let Some((key, dir)) = order_by {
        plan = Plan::Sort { input: Box::new(plan), keys: vec![key], descending: dir == ast::OrderDir::Desc };
    }

    let select_tabcols: Vec<TabCol> = resolved_cols
        .iter()
        .map(|(agg, col, tab_col)| if needs_aggregate { post_aggregate_tabcol(*agg, col) } else { tab_col.clone() })
        .collect();

    Ok(Plan::Projection { input: Box::new(plan), select: select_tabcols, aliases, limit: select.limit })
}

fn analyze_insert(table: &str, values: Vec<Lit>, catalog: &DbMeta) -> Result<Plan, DbError> {
    let tab = catalog.get_table(table)?;
    if values.len() != tab.cols.len() {
        return Err(analyzer_err(
            ErrorKind::Internal,
            format!("table {table} has {} columns but {} values were supplied", tab.cols.len(), values.len()),
        ));
    }
    let coerced: Result<Vec<Value>, DbError> = values.into_iter().zip(&tab.cols).map(|(lit, col)| coerce_literal(lit, col.ty)).collect();
    let row = Record::from_values(&tab.cols, &coerced?);
    Ok(Plan::Insert { table: table.to_string(), cols: tab.cols.clone(), rows: vec![row], indexes: tab.indexes.clone() })
}

fn analyze_delete(table: &str, conds: Vec<BinaryExpr>, catalog: &DbMeta, opts: PlanOptions) -> Result<Plan, DbError> {
    let tables = vec![table.to_string()];
    let conditions = convert_where_conds(conds, &tables, catalog, opts)?;
    let tab = catalog.get_table(table)?;
    let scan = build_single_table_scan(tab, conditions, ScanIntent::Write);
    Ok(Plan::Delete { table: table.to_string(), input: Box::new(scan), indexes: tab.indexes.clone() })
}

fn analyze_update(table: &str, set: Vec<SetClause>, conds: Vec<BinaryExpr>, catalog: &DbMeta, opts: PlanOptions) -> Result<Plan, DbError> {
    let tab = catalog.get_table(table)?;
    let mut assignments = Vec::with_capacity(set.len());
    for clause in set {
        let idx = tab
            .cols
            .iter()
            .position(|c| c.name == clause.col)
            .ok_or_else(|| analyzer_err(ErrorKind::ColumnNotFound, format!("column {} not found", clause.col)))?;
        let col_ty = tab.cols[idx].ty;
        let value = coerce_literal(clause.value, col_ty)?;
        let assignment = if clause.increment { Assignment::Increment(value) } else { Assignment::Set(value) };
        assignments.push((idx, assignment));
    }

    let is_set_index_key = tab.indexes.iter().any(|ix| {
        assignments
            .iter()
            .any(|(idx, _)| ix.cols.iter().any(|c| c.name == tab.cols[*idx].name))
    });

    let tables = vec![table.to_string()];
    let conditions = convert_where_conds(conds, &tables, catalog, opts)?;
    let scan = build_single_table_scan(tab, conditions, ScanIntent::Write);
    Ok(Plan::Update {
        table: table.to_string(),
        cols: tab.cols.clone(),
        assignments,
        input: Box::new(scan),
        indexes: tab.indexes.clone(),
        is_set_index_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcore_types::col::ColMeta;

    fn catalog() -> DbMeta {
        let mut db = DbMeta::new("db");
        db.create_table(TabMeta::new(
            "grade",
            vec![
                ColMeta::new("grade", "id", ColType::Int, 4, 0),
                ColMeta::new("grade", "course", ColType::Str, 8, 4),
                ColMeta::new("grade", "score", ColType::Float, 4, 12),
            ],
        ))
        .unwrap();
        db
    }

    #[test]
    fn resolves_unqualified_column_and_coerces_int_literal_to_float() {
        let db = catalog();
        let stmt = Statement::Select(SelectStmt {
            select_list: vec![BoundExpr { col: ColRef::new("id"), agg: AggType::Col, alias: None }],
            tables: vec!["grade".to_string()],
            conds: vec![BinaryExpr { lhs: ColRef::new("score"), op: CompOp::Ge, rhs: Rhs::Value(Lit::Int(60)) }],
            ..Default::default()
        });
        let plan = analyze(stmt, &db, PlanOptions::default()).unwrap();
        let Plan::Projection { input, .. } = plan else { panic!("expected projection") };
        match *input {
            Plan::SeqScan { residual, .. } => {
                assert_eq!(residual.len(), 1);
                assert!(matches!(&residual[0].rhs, RhsKind::Value(Value::Float(_))));
            }
            other => panic!("unexpected plan shape {other:?}"),
        }
    }

    #[test]
    fn select_star_with_group_by_is_rejected() {
        let db = catalog();
        let stmt = Statement::Select(SelectStmt {
            tables: vec!["grade".to_string()],
            group_bys: vec![ColRef::new("course")],
            ..Default::default()
        });
        assert!(analyze(stmt, &db, PlanOptions::default()).is_err());
    }

    #[test]
    fn mixing_aggregate_and_bare_column_without_group_by_errors() {
        let db = catalog();
        let stmt = Statement::Select(SelectStmt {
            select_list: vec![
                BoundExpr { col: ColRef::new("id"), agg: AggType::Col, alias: None },
                BoundExpr { col: ColRef::new("score"), agg: AggType::Max, alias: None },
            ],
            tables: vec!["grade".to_string()],
            ..Default::default()
        });
        assert!(analyze(stmt, &db, PlanOptions::default()).is_err());
    }

    #[test]
    fn unaliased_aggregate_synthesizes_sql_style_alias() {
        let db = catalog();
        let stmt = Statement::Select(SelectStmt {
            select_list: vec![BoundExpr { col: ColRef::new("score"), agg: AggType::Max, alias: None }],
            tables: vec!["grade".to_string()],
            ..Default::default()
        });
        let plan = analyze(stmt, &db, PlanOptions::default()).unwrap();
        let Plan::Projection { aliases, .. } = plan else { panic!("expected projection") };
        assert_eq!(aliases, vec![Some("MAX(score)".to_string())]);
    }

    #[test]
    fn insert_rejects_wrong_column_count() {
        let db = catalog();
        let err = analyze_insert("grade", vec![Lit::Int(1)], &db).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
