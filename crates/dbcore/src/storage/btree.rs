//! Module: storage::btree
//! Responsibility: `BTreeIndex`, the ordered-index collaborator
//! standing in for the on-disk B+-tree — mapping composite-key byte
//! images to the set of `Rid`s carrying that key, with ordered range
//! iteration. Does not own gap derivation (that is `predicate`) or
//! locking (that is `lock`).
//!
//! Key images are the raw concatenation of column images, whose
//! byte order does not generally match numeric order (e.g. a negative
//! `Int`'s little-endian bytes sort after a positive one). Ordering is
//! therefore driven by the table's column layout via typed `compare`,
//! never by `Vec<u8>`'s own `Ord`.

use dbcore_types::rid::Rid;
use dbcore_types::value::{self, ColType};
use std::cmp::Ordering;
use std::sync::RwLock;

/// An ordered index over fixed-width composite-key byte images.
/// Duplicate keys are legal: each key maps to the set of rids currently
/// carrying it, consistent with a non-unique secondary index.
pub trait BTreeIndex: Send + Sync {
    fn insert(&self, key: Vec<u8>, rid: Rid);

    fn remove(&self, key: &[u8], rid: Rid);

    /// Half-open range scan over `[lo, hi)`, ascending by key then by rid.
    /// `lo == None` means unbounded below, `hi == None` unbounded above.
    fn range(&self, lo: Option<&[u8]>, hi: Option<&[u8]>) -> Vec<(Vec<u8>, Rid)>;

    /// Same as `range` but descending, used by the reverse-direction
    /// fast path for `MAX`/`MIN` + `LIMIT 1`.
    fn range_rev(&self, lo: Option<&[u8]>, hi: Option<&[u8]>) -> Vec<(Vec<u8>, Rid)>;

    fn is_empty(&self) -> bool;

    fn len(&self) -> usize;
}

/// Per-column `(type, declared length)`, in key order, used to interpret
/// a composite key image the same way `IndexMeta` lays it out.
pub type KeyLayout = Vec<(ColType, usize)>;

/// Compare two composite key images column-by-column using each
/// column's typed comparator, short-circuiting on the first unequal
/// column (lexicographic over typed columns, not raw bytes).
#[must_use]
pub fn compare_keys(a: &[u8], b: &[u8], layout: &KeyLayout) -> Ordering {
    let mut offset = 0usize;
    for (ty, len) in layout {
        let width = ty.width(*len);
        let ord = value::compare(&a[offset..offset + width], &b[offset..offset + width], *len, *ty);
        if ord != Ordering::Equal {
            return ord;
        }
        offset += width;
    }
    Ordering::Equal
}

/// Reference `BTreeIndex` backed by a sorted vector, in place of the
/// on-disk B+-tree. Insert is O(n); acceptable since this is an explicit
/// stand-in collaborator, not the production index path.
pub struct BTreeMapIndex {
    layout: KeyLayout,
    entries: RwLock<Vec<(Vec<u8>, Vec<Rid>)>>,
}

impl BTreeMapIndex {
    #[must_use]
    pub fn new(layout: KeyLayout) -> Self {
        Self {
            layout,
            entries: RwLock::new(Vec::new()),
        }
    }

    fn find(&self, entries: &[(Vec<u8>, Vec<Rid>)], key: &[u8]) -> Result<usize, usize> {
        entries.binary_search_by(|(k, _)| compare_keys(k, key, &self.layout))
    }
}

impl BTreeIndex for BTreeMapIndex {
    fn insert(&self, key: Vec<u8>, rid: Rid) {
        let mut entries = self.entries.write().unwrap();
        match self.find(&entries, &key) {
            Ok(pos) => entries[pos].1.push(rid),
            Err(pos) => entries.insert(pos, (key, vec![rid])),
        }
    }

    fn remove(&self, key: &[u8], rid: Rid) {
        let mut entries = self.entries.write().unwrap();
        if let Ok(pos) = self.find(&entries, key) {
            entries[pos].1.retain(|r| *r != rid);
            if entries[pos].1.is_empty() {
                entries.remove(pos);
            }
        }
    }

    fn range(&self, lo: Option<&[u8]>, hi: Option<&[u8]>) -> Vec<(Vec<u8>, Rid)> {
        let entries = self.entries.read().unwrap();
        let start = lo.map_or(0, |k| match self.find(&entries, k) {
            Ok(pos) | Err(pos) => pos,
        });
        let end = hi.map_or(entries.len(), |k| match self.find(&entries, k) {
            Ok(pos) | Err(pos) => pos,
        });
        let end = end.max(start);
        let mut out = Vec::new();
        for (key, rids) in &entries[start..end] {
            for rid in rids {
                out.push((key.clone(), *rid));
            }
        }
        out
    }

    fn range_rev(&self, lo: Option<&[u8]>, hi: Option<&[u8]>) -> Vec<(Vec<u8>, Rid)> {
        let mut forward = self.range(lo, hi);
        forward.reverse();
        forward
    }

    fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap().iter().map(|(_, rids)| rids.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_layout() -> KeyLayout {
        vec![(ColType::Int, 4)]
    }

    fn int_key(v: i32) -> Vec<u8> {
        v.to_le_bytes().to_vec()
    }

    #[test]
    fn range_is_half_open_and_sorted() {
        let idx = BTreeMapIndex::new(int_layout());
        idx.insert(int_key(1), Rid::new(0, 0));
        idx.insert(int_key(2), Rid::new(0, 1));
        idx.insert(int_key(3), Rid::new(0, 2));
        let got = idx.range(Some(&int_key(1)), Some(&int_key(3)));
        assert_eq!(
            got,
            vec![(int_key(1), Rid::new(0, 0)), (int_key(2), Rid::new(0, 1))]
        );
    }

    #[test]
    fn duplicate_keys_keep_all_rids() {
        let idx = BTreeMapIndex::new(int_layout());
        idx.insert(int_key(1), Rid::new(0, 0));
        idx.insert(int_key(1), Rid::new(0, 1));
        assert_eq!(idx.range(None, None).len(), 2);
        idx.remove(&int_key(1), Rid::new(0, 0));
        assert_eq!(idx.range(None, None), vec![(int_key(1), Rid::new(0, 1))]);
    }

    #[test]
    fn range_rev_reverses_order() {
        let idx = BTreeMapIndex::new(int_layout());
        for i in 0i32..5 {
            idx.insert(int_key(i), Rid::new(0, i as u32));
        }
        let fwd = idx.range(None, None);
        let mut rev = idx.range_rev(None, None);
        rev.reverse();
        assert_eq!(fwd, rev);
    }

    #[test]
    fn negative_ints_sort_before_positive_despite_byte_image() {
        let idx = BTreeMapIndex::new(int_layout());
        idx.insert(int_key(-1), Rid::new(0, 0));
        idx.insert(int_key(1), Rid::new(0, 1));
        let got = idx.range(None, None);
        assert_eq!(got, vec![(int_key(-1), Rid::new(0, 0)), (int_key(1), Rid::new(0, 1))]);
    }
}
