//! Module: value
//! Responsibility: the typed `Value` variant and its canonical fixed-width
//! byte image. Every comparison, index key, and stored record byte
//! in the engine is built from the codec in this module.
//! Does not own: predicate composition or index-key assembly across
//! multiple columns — see `dbcore::predicate` and `dbcore::storage::btree`.

use crate::error::{DbError, ErrorKind, ErrorOrigin};
use std::cmp::Ordering;
use std::fmt;

///
/// ColType
///
/// The closed set of column/value types the engine understands.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ColType {
    Int,
    Float,
    Str,
}

impl ColType {
    /// Canonical on-disk width in bytes for a column of this type and
    /// declared length (`len` is only meaningful for `Str`).
    #[must_use]
    pub const fn width(self, len: usize) -> usize {
        match self {
            Self::Int | Self::Float => 4,
            Self::Str => len,
        }
    }
}

impl fmt::Display for ColType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Int => "INT",
            Self::Float => "FLOAT",
            Self::Str => "STRING",
        };
        write!(f, "{label}")
    }
}

///
/// Value
///
/// Tagged variant over {Int32, Float32, FixedStr(n)}. `Int -> Float`
/// promotion is the only implicit coercion; anything else is a type error.
///

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
}

impl Value {
    #[must_use]
    pub const fn set_int(i: i32) -> Self {
        Self::Int(i)
    }

    #[must_use]
    pub const fn set_float(f: f32) -> Self {
        Self::Float(f)
    }

    #[must_use]
    pub fn set_str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    #[must_use]
    pub const fn col_type(&self) -> ColType {
        match self {
            Self::Int(_) => ColType::Int,
            Self::Float(_) => ColType::Float,
            Self::Str(_) => ColType::Str,
        }
    }

    /// Rewrite an `Int` value to `Float` when the destination column is
    /// `Float`; any other type mismatch is `IncompatibleType`.
    pub fn coerce_to(&self, target: ColType) -> Result<Self, DbError> {
        match (self, target) {
            (Self::Int(i), ColType::Float) => Ok(Self::Float(*i as f32)),
            (Self::Int(_), ColType::Int)
            | (Self::Float(_), ColType::Float)
            | (Self::Str(_), ColType::Str) => Ok(self.clone()),
            _ => Err(DbError::new(
                ErrorKind::IncompatibleType,
                ErrorOrigin::Value,
                format!("cannot compare {} against a {target} column", self.col_type()),
            )),
        }
    }

    /// Produce the canonical fixed-width byte image used for storage and
    /// comparison. `len` is the column's declared length (ignored for
    /// `Int`/`Float`, which are always 4 bytes).
    #[must_use]
    pub fn init_raw(&self, len: usize) -> Vec<u8> {
        match self {
            Self::Int(i) => i.to_le_bytes().to_vec(),
            Self::Float(f) => f.to_le_bytes().to_vec(),
            Self::Str(s) => {
                let mut buf = vec![0u8; len];
                let bytes = s.as_bytes();
                let n = bytes.len().min(len);
                buf[..n].copy_from_slice(&bytes[..n]);
                buf
            }
        }
    }

    /// Decode a canonical byte image back into a typed `Value`.
    #[must_use]
    pub fn from_raw(bytes: &[u8], len: usize, ty: ColType) -> Self {
        match ty {
            ColType::Int => Self::Int(i32::from_le_bytes(bytes[..4].try_into().unwrap())),
            ColType::Float => Self::Float(f32::from_le_bytes(bytes[..4].try_into().unwrap())),
            ColType::Str => {
                let raw = &bytes[..len];
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Self::Str(String::from_utf8_lossy(&raw[..end]).into_owned())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v:.6}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Total order comparator over two canonical byte images of the same
/// column type and declared length. `FixedStr` compares as raw bytes.
#[must_use]
pub fn compare(a: &[u8], b: &[u8], len: usize, ty: ColType) -> Ordering {
    match ty {
        ColType::Int => {
            let ia = i32::from_le_bytes(a[..4].try_into().unwrap());
            let ib = i32::from_le_bytes(b[..4].try_into().unwrap());
            ia.cmp(&ib)
        }
        ColType::Float => {
            let fa = f32::from_le_bytes(a[..4].try_into().unwrap());
            let fb = f32::from_le_bytes(b[..4].try_into().unwrap());
            fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
        }
        ColType::Str => a[..len].cmp(&b[..len]),
    }
}

/// The canonical lower bound byte image for one column type: `Int` ->
/// `INT32_MIN`, `Float` -> `FLT_MIN` (least normal positive, per the
/// source's bound semantics), `FixedStr` -> all-0x00.
#[must_use]
pub fn type_min(ty: ColType, len: usize) -> Vec<u8> {
    match ty {
        ColType::Int => i32::MIN.to_le_bytes().to_vec(),
        ColType::Float => f32::MIN_POSITIVE.to_le_bytes().to_vec(),
        ColType::Str => vec![0x00; len],
    }
}

/// The canonical upper bound byte image for one column type: `Int` ->
/// `INT32_MAX`, `Float` -> `FLT_MAX`, `FixedStr` -> all-0xFF.
#[must_use]
pub fn type_max(ty: ColType, len: usize) -> Vec<u8> {
    match ty {
        ColType::Int => i32::MAX.to_le_bytes().to_vec(),
        ColType::Float => f32::MAX.to_le_bytes().to_vec(),
        ColType::Str => vec![0xFF; len],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        for value in [Value::Int(-7), Value::Float(3.5), Value::Str("hi".into())] {
            let ty = value.col_type();
            let len = if ty == ColType::Str { 8 } else { 4 };
            let raw = value.init_raw(len);
            let back = Value::from_raw(&raw, len, ty);
            assert_eq!(value, back);
        }
    }

    #[test]
    fn compare_is_reflexive_and_matches_typed_order() {
        let a = Value::Int(3).init_raw(4);
        let b = Value::Int(9).init_raw(4);
        assert_eq!(compare(&a, &a, 4, ColType::Int), Ordering::Equal);
        assert_eq!(compare(&a, &b, 4, ColType::Int), Ordering::Less);
        assert_eq!(compare(&b, &a, 4, ColType::Int), Ordering::Greater);
    }

    #[test]
    fn int_promotes_to_float_only() {
        assert_eq!(
            Value::Int(2).coerce_to(ColType::Float).unwrap(),
            Value::Float(2.0)
        );
        assert!(Value::Str("x".into()).coerce_to(ColType::Int).is_err());
    }

    #[test]
    fn fixed_str_pads_and_truncates_at_declared_length() {
        let raw = Value::Str("ab".into()).init_raw(5);
        assert_eq!(raw, vec![b'a', b'b', 0, 0, 0]);
    }
}
