//! Module: col
//! Responsibility: `ColMeta` (table-name, column-name, type, length,
//! offset-in-record) and `IndexMeta`, the ordered composite-key layout
//! derived from a sequence of `ColMeta`.

use crate::value::ColType;

#[derive(Clone, Debug, PartialEq)]
pub struct ColMeta {
    pub tab_name: String,
    pub name: String,
    pub ty: ColType,
    pub len: usize,
    pub offset: usize,
}

impl ColMeta {
    #[must_use]
    pub fn new(
        tab_name: impl Into<String>,
        name: impl Into<String>,
        ty: ColType,
        len: usize,
        offset: usize,
    ) -> Self {
        Self {
            tab_name: tab_name.into(),
            name: name.into(),
            ty,
            len,
            offset,
        }
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.ty.width(self.len)
    }
}

///
/// IndexMeta
///
/// Ordered sequence of (in-key-offset, `ColMeta`) defining one composite
/// index key layout. Keys are the concatenation of column images in
/// declared order; comparison is lexicographic across columns using
/// per-column typed compare.
///

#[derive(Clone, Debug, PartialEq)]
pub struct IndexMeta {
    pub tab_name: String,
    pub cols: Vec<ColMeta>,
    /// Offset of each column's image within the composite key, parallel
    /// to `cols`.
    pub col_offsets: Vec<usize>,
}

impl IndexMeta {
    #[must_use]
    pub fn new(tab_name: impl Into<String>, cols: Vec<ColMeta>) -> Self {
        let mut col_offsets = Vec::with_capacity(cols.len());
        let mut offset = 0usize;
        for col in &cols {
            col_offsets.push(offset);
            offset += col.width();
        }
        Self {
            tab_name: tab_name.into(),
            cols,
            col_offsets,
        }
    }

    #[must_use]
    pub fn col_num(&self) -> usize {
        self.cols.len()
    }

    #[must_use]
    pub fn col_tot_len(&self) -> usize {
        self.cols.iter().map(ColMeta::width).sum()
    }

    /// Position of a column within the index key prefix, if it is one of
    /// the indexed columns.
    #[must_use]
    pub fn position_of(&self, col_name: &str) -> Option<usize> {
        self.cols.iter().position(|c| c.name == col_name)
    }

    #[must_use]
    pub fn col_at(&self, position: usize) -> Option<&ColMeta> {
        self.cols.get(position)
    }

    #[must_use]
    pub fn offset_at(&self, position: usize) -> Option<usize> {
        self.col_offsets.get(position).copied()
    }

    /// Index name as used in the catalog and `SHOW INDEX` output: the
    /// table name followed by its indexed columns joined by `_`.
    #[must_use]
    pub fn index_name(&self) -> String {
        let cols: Vec<&str> = self.cols.iter().map(|c| c.name.as_str()).collect();
        format!("{}_{}", self.tab_name, cols.join("_"))
    }
}
