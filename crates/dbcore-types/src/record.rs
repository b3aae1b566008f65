//! Module: record
//! Responsibility: `Record`, an owned fixed-size byte buffer whose layout
//! is the packed concatenation of a table's column images.

use crate::col::ColMeta;
use crate::value::Value;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub data: Vec<u8>,
}

impl Record {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn zeroed(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn field(&self, col: &ColMeta) -> Value {
        let raw = &self.data[col.offset..col.offset + col.width()];
        Value::from_raw(raw, col.len, col.ty)
    }

    pub fn set_field(&mut self, col: &ColMeta, value: &Value) {
        let raw = value.init_raw(col.len);
        self.data[col.offset..col.offset + col.width()].copy_from_slice(&raw);
    }

    /// Build a record from parallel `(ColMeta, Value)` pairs, in column
    /// order, sized to the sum of column widths.
    pub fn from_values(cols: &[ColMeta], values: &[Value]) -> Self {
        let size = cols.iter().map(ColMeta::width).sum();
        let mut record = Self::zeroed(size);
        for (col, value) in cols.iter().zip(values) {
            record.set_field(col, value);
        }
        record
    }
}
