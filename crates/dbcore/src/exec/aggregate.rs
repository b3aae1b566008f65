//! Module: exec::aggregate
//! Responsibility: `Aggregate`, the GROUP BY + HAVING operator
//! — {COUNT, MAX, MIN, SUM}, grouped by a stable hash over the
//! concatenated group-key bytes, with `COUNT(*)` via `TabCol::star()`.

use crate::exec::{eval_all, exec_err, Operator};
use crate::predicate::{AggKind, Condition};
use dbcore_types::col::ColMeta;
use dbcore_types::error::{DbError, ErrorKind};
use dbcore_types::record::Record;
use dbcore_types::tabcol::TabCol;
use dbcore_types::value::{ColType, Value};
use std::collections::HashMap;

/// One SELECT-list aggregate expression; `col: None` is `COUNT(*)`.
#[derive(Clone, Debug)]
pub struct AggSpec {
    pub kind: AggKind,
    pub col: Option<TabCol>,
}

struct Acc {
    count: i64,
    sum_int: i64,
    sum_float: f64,
    max: Option<Value>,
    min: Option<Value>,
}

impl Acc {
    fn new() -> Self {
        Self {
            count: 0,
            sum_int: 0,
            sum_float: 0.0,
            max: None,
            min: None,
        }
    }

    fn feed(&mut self, value: Option<&Value>) {
        self.count += 1;
        if let Some(v) = value {
            match v {
                Value::Int(i) => self.sum_int += i64::from(*i),
                Value::Float(f) => self.sum_float += f64::from(*f),
                Value::Str(_) => {}
            }
            let is_new_max = self.max.as_ref().map_or(true, |m| cmp_value(v, m) == std::cmp::Ordering::Greater);
            if is_new_max {
                self.max = Some(v.clone());
            }
            let is_new_min = self.min.as_ref().map_or(true, |m| cmp_value(v, m) == std::cmp::Ordering::Less);
            if is_new_min {
                self.min = Some(v.clone());
            }
        }
    }

    fn result(&self, kind: AggKind, source_ty: Option<ColType>) -> Value {
        match kind {
            AggKind::Count => Value::Int(self.count as i32),
            AggKind::Sum => match source_ty {
                Some(ColType::Float) => Value::Float(self.sum_float as f32),
                _ => Value::Int(self.sum_int as i32),
            },
            AggKind::Max => self.max.clone().unwrap_or(Value::Int(0)),
            AggKind::Min => self.min.clone().unwrap_or(Value::Int(0)),
            AggKind::None => Value::Int(0),
        }
    }
}

fn cmp_value(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        _ => std::cmp::Ordering::Equal,
    }
}

/// Groups the child's output by `group_cols`, computes `agg_specs` per
/// group, then filters groups through `having`. Materializes its
/// input fully (aggregation is a blocking operator by nature).
pub struct Aggregate {
    cols: Vec<ColMeta>,
    rows: Vec<Record>,
    pos: Option<usize>,
}

impl Aggregate {
    pub fn build(
        mut child: Box<dyn Operator>,
        group_cols: &[TabCol],
        agg_specs: &[AggSpec],
        having: &[Condition],
    ) -> Result<Self, DbError> {
        let child_cols = child.cols().to_vec();
        let group_idx: Result<Vec<usize>, DbError> = group_cols
            .iter()
            .map(|g| {
                child_cols
                    .iter()
                    .position(|c| c.name == g.col_name)
                    .ok_or_else(|| exec_err(ErrorKind::ColumnNotFound, format!("unknown group column {g}")))
            })
            .collect();
        let group_idx = group_idx?;
        let agg_idx: Vec<Option<usize>> = agg_specs
            .iter()
            .map(|spec| {
                spec.col.as_ref().map(|c| {
                    child_cols
                        .iter()
                        .position(|cc| cc.name == c.col_name)
                        .unwrap_or(usize::MAX)
                })
            })
            .collect();

        let mut order: Vec<Vec<u8>> = Vec::new();
        let mut groups: HashMap<Vec<u8>, (Vec<Value>, Vec<Acc>)> = HashMap::new();

        // Without a GROUP BY there is always exactly one group, even over
        // zero input rows (COUNT(*) on an empty table is 0, not no rows).
        if group_idx.is_empty() {
            order.push(Vec::new());
            groups.insert(Vec::new(), (Vec::new(), agg_specs.iter().map(|_| Acc::new()).collect()));
        }

        child.begin_tuple()?;
        while !child.is_end() {
            let record = child.current();
            let group_values: Vec<Value> = group_idx.iter().map(|&i| record.field(&child_cols[i])).collect();
            let mut key = Vec::new();
            for (i, v) in group_idx.iter().zip(&group_values) {
                key.extend_from_slice(&v.init_raw(child_cols[*i].len));
            }
            let entry = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                (group_values.clone(), agg_specs.iter().map(|_| Acc::new()).collect())
            });
            for (slot, idx) in entry.1.iter_mut().zip(&agg_idx) {
                let value = idx.and_then(|i| child_cols.get(i)).map(|c| record.field(c));
                slot.feed(value.as_ref());
            }
            child.next_tuple()?;
        }

        let mut cols = Vec::new();
        let mut offset = 0usize;
        for (g, idx) in group_cols.iter().zip(&group_idx) {
            let src = &child_cols[*idx];
            cols.push(ColMeta::new("", g.col_name.clone(), src.ty, src.len, offset));
            offset += src.width();
        }
        for (i, spec) in agg_specs.iter().enumerate() {
            let source_ty = agg_idx[i].and_then(|idx| child_cols.get(idx)).map(|c| c.ty);
            let ty = if spec.kind == AggKind::Count { ColType::Int } else { source_ty.unwrap_or(ColType::Int) };
            let name = format!("{:?}({})", spec.kind, spec.col.as_ref().map_or("*".to_string(), |c| c.col_name.clone()));
            cols.push(ColMeta::new("", name, ty, 4, offset));
            offset += ty.width(4);
        }

        let mut rows = Vec::new();
        for key in order {
            let (group_values, accs) = groups.remove(&key).unwrap();
            let mut values = group_values;
            for (idx, (spec, acc)) in agg_specs.iter().zip(&accs).enumerate() {
                let source_ty = agg_idx[idx].and_then(|i| child_cols.get(i)).map(|c| c.ty);
                values.push(acc.result(spec.kind, source_ty));
            }
            let row = Record::from_values(&cols, &values);
            if eval_all(having, &row, &cols)? {
                rows.push(row);
            }
        }

        Ok(Self { cols, rows, pos: None })
    }
}

impl Operator for Aggregate {
    fn begin_tuple(&mut self) -> Result<(), DbError> {
        self.pos = if self.rows.is_empty() { None } else { Some(0) };
        Ok(())
    }

    fn next_tuple(&mut self) -> Result<(), DbError> {
        if let Some(p) = self.pos {
            self.pos = if p + 1 < self.rows.len() { Some(p + 1) } else { None };
        }
        Ok(())
    }

    fn is_end(&self) -> bool {
        self.pos.is_none()
    }

    fn current(&self) -> &Record {
        &self.rows[self.pos.expect("current() called at end")]
    }

    fn cols(&self) -> &[ColMeta] {
        &self.cols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcore_types::rid::Rid;

    struct VecOp {
        cols: Vec<ColMeta>,
        rows: Vec<Record>,
        pos: Option<usize>,
    }

    impl Operator for VecOp {
        fn begin_tuple(&mut self) -> Result<(), DbError> {
            self.pos = if self.rows.is_empty() { None } else { Some(0) };
            Ok(())
        }
        fn next_tuple(&mut self) -> Result<(), DbError> {
            if let Some(p) = self.pos {
                self.pos = if p + 1 < self.rows.len() { Some(p + 1) } else { None };
            }
            Ok(())
        }
        fn is_end(&self) -> bool {
            self.pos.is_none()
        }
        fn current(&self) -> &Record {
            &self.rows[self.pos.unwrap()]
        }
        fn rid(&self) -> Option<Rid> {
            None
        }
        fn cols(&self) -> &[ColMeta] {
            &self.cols
        }
    }

    fn child() -> Box<VecOp> {
        let cols = vec![
            ColMeta::new("t", "grp", ColType::Int, 4, 0),
            ColMeta::new("t", "amt", ColType::Int, 4, 4),
        ];
        let data = [(1, 10), (1, 20), (2, 5)];
        let rows = data
            .iter()
            .map(|(g, a)| Record::from_values(&cols, &[Value::Int(*g), Value::Int(*a)]))
            .collect();
        Box::new(VecOp { cols, rows, pos: None })
    }

    #[test]
    fn groups_and_sums_per_group() {
        let specs = vec![AggSpec {
            kind: AggKind::Sum,
            col: Some(TabCol::new("t", "amt")),
        }];
        let mut agg = Aggregate::build(child(), &[TabCol::new("t", "grp")], &specs, &[]).unwrap();
        agg.begin_tuple().unwrap();
        let mut seen = Vec::new();
        while !agg.is_end() {
            let record = agg.current();
            let grp = record.field(&agg.cols()[0]);
            let sum = record.field(&agg.cols()[1]);
            seen.push((grp, sum));
            agg.next_tuple().unwrap();
        }
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&(Value::Int(1), Value::Int(30))));
        assert!(seen.contains(&(Value::Int(2), Value::Int(5))));
    }

    #[test]
    fn having_filters_groups() {
        let specs = vec![AggSpec {
            kind: AggKind::Count,
            col: None,
        }];
        let having = vec![Condition::new(
            TabCol::new("", "Count(*)"),
            crate::predicate::CmpOp::Gt,
            crate::predicate::RhsKind::Value(Value::Int(1)),
        )];
        let mut agg = Aggregate::build(child(), &[TabCol::new("t", "grp")], &specs, &having).unwrap();
        agg.begin_tuple().unwrap();
        assert!(!agg.is_end());
        assert_eq!(agg.current().field(&agg.cols()[0]), Value::Int(1));
        agg.next_tuple().unwrap();
        assert!(agg.is_end());
    }

    #[test]
    fn count_star_on_empty_input_returns_one_row_of_zero() {
        let cols = vec![ColMeta::new("t", "grp", ColType::Int, 4, 0)];
        let empty = Box::new(VecOp { cols, rows: Vec::new(), pos: None });
        let specs = vec![AggSpec { kind: AggKind::Count, col: None }];
        let mut agg = Aggregate::build(empty, &[], &specs, &[]).unwrap();
        agg.begin_tuple().unwrap();
        assert!(!agg.is_end());
        assert_eq!(agg.current().field(&agg.cols()[0]), Value::Int(0));
        agg.next_tuple().unwrap();
        assert!(agg.is_end());
    }
}
