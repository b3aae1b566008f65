//! Module: predicate
//! Responsibility: `Condition`/`CmpOp`/`AggKind`, and the `PredicateManager`
//! that separates a conjunctive WHERE clause into index-resident bounds
//! plus a residual filter, against one table's `IndexMeta`.
//! Does not own: lock acquisition from the derived `Gap` (that is
//! `lock`) or tuple filtering itself (that is `exec`).

use dbcore_types::col::IndexMeta;
use dbcore_types::tabcol::TabCol;
use dbcore_types::value::{self, ColType, Value};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
}

impl CmpOp {
    #[must_use]
    pub const fn is_range(self) -> bool {
        matches!(self, Self::Lt | Self::Gt | Self::Le | Self::Ge)
    }

    #[must_use]
    pub const fn is_lower_bound(self) -> bool {
        matches!(self, Self::Gt | Self::Ge)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AggKind {
    None,
    Count,
    Max,
    Min,
    Sum,
}

/// The right-hand side of a `Condition`. `SubqueryPlan` is boxed to keep
/// `Condition` a fixed size despite `Plan` being a recursive tree defined
/// in a higher-level module.
#[derive(Clone, Debug)]
pub enum RhsKind {
    Value(Value),
    Col(TabCol),
    ValueList(Vec<Value>),
    SubqueryPlan(Box<crate::plan::Plan>),
}

#[derive(Clone, Debug)]
pub struct Condition {
    pub lhs: TabCol,
    pub op: CmpOp,
    pub agg_kind: AggKind,
    pub rhs: RhsKind,
}

impl Condition {
    #[must_use]
    pub fn new(lhs: TabCol, op: CmpOp, rhs: RhsKind) -> Self {
        Self {
            lhs,
            op,
            agg_kind: AggKind::None,
            rhs,
        }
    }

    #[must_use]
    pub fn is_index_resident(&self, index: &IndexMeta) -> bool {
        matches!(self.rhs, RhsKind::Value(_))
            && matches!(self.op, CmpOp::Eq | CmpOp::Lt | CmpOp::Gt | CmpOp::Le | CmpOp::Ge)
            && index.position_of(&self.lhs.col_name).is_some()
    }
}

/// A half-open gap between two adjacent index keys (or an index bound),
/// the unit gap locks are taken on to prevent phantom inserts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Gap {
    pub left_key: Vec<u8>,
    pub right_key: Vec<u8>,
}

/// Outcome of separating one table's WHERE conditions against its
/// `IndexMeta`: the derived scan range plus what still needs per-tuple
/// re-checking.
pub struct PredicateManager {
    pub left_key: Vec<u8>,
    pub right_key: Vec<u8>,
    pub last_left_op: Option<CmpOp>,
    pub last_right_op: Option<CmpOp>,
    pub index_clean: bool,
    pub residual: Vec<Condition>,
    pub gap: Gap,
}

impl PredicateManager {
    /// Separate `conditions` against `index`, keeping only the prefix of
    /// equality-bound columns plus at most one range-bound column
    /// immediately after it; everything else becomes residual.
    #[must_use]
    pub fn build(index: &IndexMeta, conditions: &[Condition]) -> Self {
        let mut residual = Vec::new();
        let mut eq_values: Vec<Option<Value>> = vec![None; index.col_num()];
        let mut lower: Option<(usize, CmpOp, Value)> = None;
        let mut upper: Option<(usize, CmpOp, Value)> = None;

        for cond in conditions {
            if !cond.is_index_resident(index) {
                residual.push(cond.clone());
                continue;
            }
            let position = index.position_of(&cond.lhs.col_name).unwrap();
            let RhsKind::Value(value) = &cond.rhs else {
                residual.push(cond.clone());
                continue;
            };
            match cond.op {
                CmpOp::Eq => {
                    if eq_values[position].is_some() {
                        residual.push(cond.clone());
                    } else {
                        eq_values[position] = Some(value.clone());
                    }
                }
                CmpOp::Gt | CmpOp::Ge => {
                    if lower.is_some() {
                        residual.push(cond.clone());
                    } else {
                        lower = Some((position, cond.op, value.clone()));
                    }
                }
                CmpOp::Lt | CmpOp::Le => {
                    if upper.is_some() {
                        residual.push(cond.clone());
                    } else {
                        upper = Some((position, cond.op, value.clone()));
                    }
                }
                CmpOp::Ne | CmpOp::In => residual.push(cond.clone()),
            }
        }

        // last_idx: first column position with no equality binding.
        let last_idx = eq_values.iter().position(Option::is_none).unwrap_or(index.col_num());

        // An equality binding only narrows the key if it sits within the
        // contiguous prefix ending at last_idx; one past a gap (e.g. `b = 9`
        // with no condition on `a` in index (a, b)) can't narrow anything and
        // must be re-checked per tuple instead of silently baked into the key.
        for pos in last_idx..eq_values.len() {
            if let Some(value) = eq_values[pos].take() {
                residual.push(Condition::new(
                    index.col_at(pos).map_or_else(TabCol::star, |c| {
                        TabCol::new(c.tab_name.clone(), c.name.clone())
                    }),
                    CmpOp::Eq,
                    RhsKind::Value(value),
                ));
            }
        }

        // A range predicate only participates if it sits exactly at last_idx;
        // anything further out can't narrow the scan and falls to residual.
        let (lower, upper) = {
            let mut lower = lower;
            let mut upper = upper;
            if let Some((pos, op, value)) = lower.take() {
                if pos == last_idx {
                    lower = Some((pos, op, value));
                } else {
                    residual.push(Condition::new(
                        index.col_at(pos).map_or_else(TabCol::star, |c| {
                            TabCol::new(c.tab_name.clone(), c.name.clone())
                        }),
                        op,
                        RhsKind::Value(value),
                    ));
                }
            }
            if let Some((pos, op, value)) = upper.take() {
                if pos == last_idx {
                    upper = Some((pos, op, value));
                } else {
                    residual.push(Condition::new(
                        index.col_at(pos).map_or_else(TabCol::star, |c| {
                            TabCol::new(c.tab_name.clone(), c.name.clone())
                        }),
                        op,
                        RhsKind::Value(value),
                    ));
                }
            }
            (lower, upper)
        };

        let mut left_key = Vec::with_capacity(index.col_tot_len());
        let mut right_key = Vec::with_capacity(index.col_tot_len());
        for (pos, col) in index.cols.iter().enumerate() {
            if let Some(value) = &eq_values[pos] {
                let raw = value.init_raw(col.len);
                left_key.extend_from_slice(&raw);
                right_key.extend_from_slice(&raw);
            } else if pos == last_idx {
                // Both a lower and an upper bound can land on the same
                // column (`a > 1 AND a < 10`); bake both sides into the
                // key instead of letting one silently win.
                match (&lower, &upper) {
                    (Some((_, _, lo)), Some((_, _, hi))) => {
                        left_key.extend_from_slice(&lo.init_raw(col.len));
                        right_key.extend_from_slice(&hi.init_raw(col.len));
                    }
                    (Some((_, _, lo)), None) => {
                        left_key.extend_from_slice(&lo.init_raw(col.len));
                        right_key.extend_from_slice(&value::type_max(col.ty, col.len));
                    }
                    (None, Some((_, _, hi))) => {
                        left_key.extend_from_slice(&value::type_min(col.ty, col.len));
                        right_key.extend_from_slice(&hi.init_raw(col.len));
                    }
                    (None, None) => {
                        left_key.extend_from_slice(&value::type_min(col.ty, col.len));
                        right_key.extend_from_slice(&value::type_max(col.ty, col.len));
                    }
                }
            } else {
                left_key.extend_from_slice(&value::type_min(col.ty, col.len));
                right_key.extend_from_slice(&value::type_max(col.ty, col.len));
            }
        }

        // right_key is exclusive: when the upper bound column carries Le/no-op,
        // bump the composite key image past its literal by treating the
        // residual suffix as type_max (already done above); Lt already
        // excludes by definition of the half-open range.
        let last_left_op = lower.map(|(_, op, _)| op);
        let last_right_op = upper.map(|(_, op, _)| op);
        let index_clean = eq_values.iter().all(Option::is_some);

        let gap = Gap {
            left_key: left_key.clone(),
            right_key: right_key.clone(),
        };

        Self {
            left_key,
            right_key,
            last_left_op,
            last_right_op,
            index_clean,
            residual,
            gap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcore_types::col::ColMeta;

    fn index() -> IndexMeta {
        IndexMeta::new(
            "t",
            vec![
                ColMeta::new("t", "a", ColType::Int, 4, 0),
                ColMeta::new("t", "b", ColType::Int, 4, 4),
            ],
        )
    }

    #[test]
    fn pure_equality_prefix_is_index_clean() {
        let idx = index();
        let conds = vec![
            Condition::new(TabCol::new("t", "a"), CmpOp::Eq, RhsKind::Value(Value::Int(3))),
            Condition::new(TabCol::new("t", "b"), CmpOp::Eq, RhsKind::Value(Value::Int(9))),
        ];
        let pm = PredicateManager::build(&idx, &conds);
        assert!(pm.index_clean);
        assert!(pm.residual.is_empty());
        assert_eq!(pm.left_key, pm.right_key);
    }

    #[test]
    fn range_after_equality_prefix_narrows_bounds() {
        let idx = index();
        let conds = vec![
            Condition::new(TabCol::new("t", "a"), CmpOp::Eq, RhsKind::Value(Value::Int(3))),
            Condition::new(TabCol::new("t", "b"), CmpOp::Ge, RhsKind::Value(Value::Int(5))),
        ];
        let pm = PredicateManager::build(&idx, &conds);
        assert!(!pm.index_clean);
        assert!(pm.residual.is_empty());
        assert_ne!(pm.left_key, pm.right_key);
    }

    #[test]
    fn non_prefix_condition_falls_to_residual() {
        let idx = index();
        let conds = vec![Condition::new(
            TabCol::new("t", "b"),
            CmpOp::Eq,
            RhsKind::Value(Value::Int(9)),
        )];
        let pm = PredicateManager::build(&idx, &conds);
        assert_eq!(pm.residual.len(), 1);
    }

    #[test]
    fn lower_and_upper_bound_on_same_column_both_narrow_the_key() {
        let idx = IndexMeta::new("t", vec![ColMeta::new("t", "a", ColType::Int, 4, 0)]);
        let conds = vec![
            Condition::new(TabCol::new("t", "a"), CmpOp::Gt, RhsKind::Value(Value::Int(1))),
            Condition::new(TabCol::new("t", "a"), CmpOp::Lt, RhsKind::Value(Value::Int(10))),
        ];
        let pm = PredicateManager::build(&idx, &conds);
        assert!(pm.residual.is_empty());
        assert_eq!(pm.left_key, Value::Int(1).init_raw(4));
        assert_eq!(pm.right_key, Value::Int(10).init_raw(4));
        assert_eq!(pm.last_left_op, Some(CmpOp::Gt));
        assert_eq!(pm.last_right_op, Some(CmpOp::Lt));
    }
}
