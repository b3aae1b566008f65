//! Module: exec::projection
//! Responsibility: `Projection`, reordering/renaming the child's
//! columns for the final SELECT list and short-circuiting at LIMIT
//! without pulling further child tuples.

use crate::exec::{exec_err, Operator};
use dbcore_types::col::ColMeta;
use dbcore_types::error::{DbError, ErrorKind};
use dbcore_types::record::Record;
use dbcore_types::rid::Rid;
use dbcore_types::tabcol::TabCol;

pub struct Projection {
    child: Box<dyn Operator>,
    proj_idx: Vec<usize>,
    cols: Vec<ColMeta>,
    limit: Option<usize>,
    emitted: usize,
    current: Option<Record>,
}

impl Projection {
    pub fn build(child: Box<dyn Operator>, select: &[TabCol], aliases: &[Option<String>], limit: Option<usize>) -> Result<Self, DbError> {
        let child_cols = child.cols().to_vec();
        let proj_idx: Result<Vec<usize>, DbError> = select
            .iter()
            .map(|tc| {
                child_cols
                    .iter()
                    .position(|c| c.name == tc.col_name && (tc.tab_name.is_empty() || c.tab_name == tc.tab_name))
                    .ok_or_else(|| exec_err(ErrorKind::ColumnNotFound, format!("unknown column {tc}")))
            })
            .collect();
        let proj_idx = proj_idx?;

        let mut cols = Vec::with_capacity(proj_idx.len());
        let mut offset = 0usize;
        for (i, &idx) in proj_idx.iter().enumerate() {
            let src = &child_cols[idx];
            let name = aliases.get(i).and_then(Clone::clone).unwrap_or_else(|| src.name.clone());
            cols.push(ColMeta::new(src.tab_name.clone(), name, src.ty, src.len, offset));
            offset += src.width();
        }

        Ok(Self {
            child,
            proj_idx,
            cols,
            limit,
            emitted: 0,
            current: None,
        })
    }

    fn project_current(&self) -> Record {
        let child_cols = self.child.cols();
        let values: Vec<_> = self.proj_idx.iter().map(|&i| self.child.current().field(&child_cols[i])).collect();
        Record::from_values(&self.cols, &values)
    }

    fn within_limit(&self) -> bool {
        match self.limit {
            None => true,
            Some(limit) => self.emitted < limit,
        }
    }
}

impl Operator for Projection {
    fn begin_tuple(&mut self) -> Result<(), DbError> {
        self.emitted = 0;
        self.child.begin_tuple()?;
        self.current = if !self.child.is_end() && self.within_limit() {
            Some(self.project_current())
        } else {
            None
        };
        Ok(())
    }

    fn next_tuple(&mut self) -> Result<(), DbError> {
        if self.current.is_none() {
            return Ok(());
        }
        self.emitted += 1;
        if !self.within_limit() {
            self.current = None;
            return Ok(());
        }
        self.child.next_tuple()?;
        self.current = if self.child.is_end() { None } else { Some(self.project_current()) };
        Ok(())
    }

    fn is_end(&self) -> bool {
        self.current.is_none()
    }

    fn current(&self) -> &Record {
        self.current.as_ref().expect("current() called at end")
    }

    fn rid(&self) -> Option<Rid> {
        self.child.rid()
    }

    fn cols(&self) -> &[ColMeta] {
        &self.cols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcore_types::value::{ColType, Value};

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
        fn cols(&self) -> &[ColMeta] {
            &self.cols
        }
    }

    fn child() -> Box<VecOp> {
        let cols = vec![
            ColMeta::new("t", "a", ColType::Int, 4, 0),
            ColMeta::new("t", "b", ColType::Int, 4, 4),
        ];
        let rows = (0..5)
            .map(|i| Record::from_values(&cols, &[Value::Int(i), Value::Int(i * 10)]))
            .collect();
        Box::new(VecOp { cols, rows, pos: None })
    }

    #[test]
    fn reorders_columns() {
        let mut proj = Projection::build(child(), &[TabCol::new("t", "b"), TabCol::new("t", "a")], &[None, None], None).unwrap();
        proj.begin_tuple().unwrap();
        assert_eq!(proj.current().field(&proj.cols()[0]), Value::Int(0));
        assert_eq!(proj.current().field(&proj.cols()[1]), Value::Int(0));
        proj.next_tuple().unwrap();
        assert_eq!(proj.current().field(&proj.cols()[0]), Value::Int(10));
    }

    #[test]
    fn limit_short_circuits() {
        let mut proj = Projection::build(child(), &[TabCol::new("t", "a")], &[None], Some(2)).unwrap();
        proj.begin_tuple().unwrap();
        let mut count = 0;
        while !proj.is_end() {
            count += 1;
            proj.next_tuple().unwrap();
        }
        assert_eq!(count, 2);
    }
}
