//! Module: exec::join
//! Responsibility: `NestedLoopJoin` (any condition, re-scans the inner
//! child per outer tuple) and `SortMergeJoin` (equi-join only, assumes
//! both children already produce rows in join-key order)

use crate::exec::{concat_records, concat_schema, eval_all, exec_err, typed_partial_cmp, Operator};
use crate::predicate::Condition;
use dbcore_types::col::ColMeta;
use dbcore_types::error::{DbError, ErrorKind};
use dbcore_types::record::Record;
use dbcore_types::tabcol::TabCol;
use dbcore_types::value::Value;
use std::cmp::Ordering;

/// Re-opens the inner child for every outer tuple and emits the cross
/// product rows that satisfy `conditions`. Works for any join
/// predicate, at O(outer * inner) cost.
pub struct NestedLoopJoin {
    outer: Box<dyn Operator>,
    inner: Box<dyn Operator>,
    conditions: Vec<Condition>,
    cols: Vec<ColMeta>,
    current: Option<Record>,
}

impl NestedLoopJoin {
    pub fn new(outer: Box<dyn Operator>, inner: Box<dyn Operator>, conditions: Vec<Condition>) -> Self {
        let cols = concat_schema(outer.cols(), inner.cols());
        Self {
            outer,
            inner,
            conditions,
            cols,
            current: None,
        }
    }

    fn find_next(&mut self) -> Result<(), DbError> {
        loop {
            if self.outer.is_end() {
                self.current = None;
                return Ok(());
            }
            if self.inner.is_end() {
                self.outer.next_tuple()?;
                if self.outer.is_end() {
                    self.current = None;
                    return Ok(());
                }
                self.inner.begin_tuple()?;
                continue;
            }
            let candidate = concat_records(self.outer.current(), self.inner.current());
            if eval_all(&self.conditions, &candidate, &self.cols)? {
                self.current = Some(candidate);
                return Ok(());
            }
            self.inner.next_tuple()?;
        }
    }
}

impl Operator for NestedLoopJoin {
    fn begin_tuple(&mut self) -> Result<(), DbError> {
        self.outer.begin_tuple()?;
        if self.outer.is_end() {
            self.current = None;
            return Ok(());
        }
        self.inner.begin_tuple()?;
        self.find_next()
    }

    fn next_tuple(&mut self) -> Result<(), DbError> {
        if self.current.is_none() {
            return Ok(());
        }
        self.inner.next_tuple()?;
        self.find_next()
    }

    fn is_end(&self) -> bool {
        self.current.is_none()
    }

    fn current(&self) -> &Record {
        self.current.as_ref().expect("current() called at end")
    }

    fn cols(&self) -> &[ColMeta] {
        &self.cols
    }
}

/// Equi-join over two children that each already yield rows sorted
/// ascending on the join key (the plan translator places a `Sort`
/// ahead of each side unless its child is already index-ordered on
/// that key). Classic three-state merge: advance whichever side is
/// behind, or buffer the right side's run of equal keys and cross it
/// against every left row sharing that key.
pub struct SortMergeJoin {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    left_key_idx: usize,
    right_key_idx: usize,
    cols: Vec<ColMeta>,
    right_buf: Vec<Record>,
    right_buf_key: Option<Value>,
    right_buf_pos: usize,
    current: Option<Record>,
}

impl SortMergeJoin {
    pub fn new(left: Box<dyn Operator>, right: Box<dyn Operator>, left_key: &TabCol, right_key: &TabCol) -> Result<Self, DbError> {
        let left_key_idx = left
            .cols()
            .iter()
            .position(|c| c.name == left_key.col_name)
            .ok_or_else(|| exec_err(ErrorKind::ColumnNotFound, format!("unknown join column {left_key}")))?;
        let right_key_idx = right
            .cols()
            .iter()
            .position(|c| c.name == right_key.col_name)
            .ok_or_else(|| exec_err(ErrorKind::ColumnNotFound, format!("unknown join column {right_key}")))?;
        let cols = concat_schema(left.cols(), right.cols());
        Ok(Self {
            left,
            right,
            left_key_idx,
            right_key_idx,
            cols,
            right_buf: Vec::new(),
            right_buf_key: None,
            right_buf_pos: 0,
            current: None,
        })
    }

    fn left_key(&self) -> Value {
        self.left.current().field(&self.left.cols()[self.left_key_idx])
    }

    fn right_key(&self) -> Value {
        self.right.current().field(&self.right.cols()[self.right_key_idx])
    }

    fn fill_right_buf(&mut self, target: &Value) -> Result<(), DbError> {
        self.right_buf.clear();
        self.right_buf_pos = 0;
        while !self.right.is_end() && &self.right_key() == target {
            self.right_buf.push(self.right.current().clone());
            self.right.next_tuple()?;
        }
        self.right_buf_key = Some(target.clone());
        Ok(())
    }

    fn advance(&mut self) -> Result<(), DbError> {
        loop {
            if self.left.is_end() {
                self.current = None;
                return Ok(());
            }
            let lk = self.left_key();
            if self.right_buf_key.as_ref() == Some(&lk) {
                if self.right_buf_pos < self.right_buf.len() {
                    let pair = concat_records(self.left.current(), &self.right_buf[self.right_buf_pos]);
                    self.right_buf_pos += 1;
                    self.current = Some(pair);
                    return Ok(());
                }
                self.left.next_tuple()?;
                self.right_buf_pos = 0;
                continue;
            }
            if self.right.is_end() {
                self.current = None;
                return Ok(());
            }
            let rk = self.right_key();
            match typed_partial_cmp(&rk, &lk)? {
                Ordering::Less => self.right.next_tuple()?,
                Ordering::Greater => self.left.next_tuple()?,
                Ordering::Equal => self.fill_right_buf(&lk)?,
            }
        }
    }
}

impl Operator for SortMergeJoin {
    fn begin_tuple(&mut self) -> Result<(), DbError> {
        self.left.begin_tuple()?;
        self.right.begin_tuple()?;
        self.right_buf.clear();
        self.right_buf_key = None;
        self.right_buf_pos = 0;
        self.advance()
    }

    fn next_tuple(&mut self) -> Result<(), DbError> {
        if self.current.is_none() {
            return Ok(());
        }
        self.advance()
    }

    fn is_end(&self) -> bool {
        self.current.is_none()
    }

    fn current(&self) -> &Record {
        self.current.as_ref().expect("current() called at end")
    }

    fn cols(&self) -> &[ColMeta] {
        &self.cols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{CmpOp, RhsKind};
    use dbcore_types::rid::Rid;
    use dbcore_types::value::ColType;

    struct VecOp {
        cols: Vec<ColMeta>,
        rows: Vec<Record>,
        pos: Option<usize>,
    }

    impl VecOp {
        fn new(name: &str, values: Vec<i32>) -> Self {
            Self {
                cols: vec![ColMeta::new(name, "k", ColType::Int, 4, 0)],
                rows: values.into_iter().map(|v| Record::new(v.to_le_bytes().to_vec())).collect(),
                pos: None,
            }
        }
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

    #[test]
    fn nested_loop_join_emits_matching_pairs() {
        let outer = Box::new(VecOp::new("a", vec![1, 2]));
        let inner = Box::new(VecOp::new("b", vec![2, 3]));
        let conditions = vec![Condition::new(
            TabCol::new("a", "k"),
            CmpOp::Eq,
            RhsKind::Col(TabCol::new("b", "k")),
        )];
        let mut join = NestedLoopJoin::new(outer, inner, conditions);
        join.begin_tuple().unwrap();
        assert!(!join.is_end());
        assert_eq!(join.current().data, [2i32.to_le_bytes().to_vec(), 2i32.to_le_bytes().to_vec()].concat());
        join.next_tuple().unwrap();
        assert!(join.is_end());
    }

    #[test]
    fn sort_merge_join_expands_duplicate_keys_on_both_sides() {
        let left = Box::new(VecOp::new("a", vec![1, 1, 2]));
        let right = Box::new(VecOp::new("b", vec![1, 1, 3]));
        let mut join = SortMergeJoin::new(left, right, &TabCol::new("a", "k"), &TabCol::new("b", "k")).unwrap();
        join.begin_tuple().unwrap();
        let mut count = 0;
        while !join.is_end() {
            count += 1;
            join.next_tuple().unwrap();
        }
        assert_eq!(count, 4);
    }
}
