//! B-tree secondary index: an ordered map from column value to row
//! handles.
//!
//! Keys order as NULL-less typed values: numbers before strings,
//! numbers among themselves numerically (INT and DOUBLE compare in one
//! domain), strings lexicographically. Rows whose indexed column is
//! NULL are not indexed at all; WHERE never matches NULL, so lookups
//! stay equivalent to scans.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::common::{CompareOp, Error, ErrorCode, Result, RowHandle, Value};

/// A totally ordered index key.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexKey(pub Value);

impl IndexKey {
    /// Keys are never built from NULL; callers skip NULL column values.
    pub fn from_value(value: &Value) -> Option<IndexKey> {
        if value.is_null() {
            None
        } else {
            Some(IndexKey(value.clone()))
        }
    }

    fn rank(&self) -> u8 {
        match self.0 {
            Value::Int(_) | Value::Double(_) => 0,
            Value::Str(_) => 1,
            Value::Null => unreachable!("NULL keys are never constructed"),
        }
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => match (&self.0, &other.0) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                (a, b) => {
                    let x = a.as_number().unwrap_or(f64::NAN);
                    let y = b.as_number().unwrap_or(f64::NAN);
                    x.total_cmp(&y)
                }
            },
            other_rank => other_rank,
        }
    }
}

/// One secondary index over a single column.
pub struct BTreeIndex {
    name: String,
    table: String,
    column: String,
    unique: bool,
    map: BTreeMap<IndexKey, Vec<RowHandle>>,
    entry_count: usize,
}

impl BTreeIndex {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        unique: bool,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            column: column.into(),
            unique,
            map: BTreeMap::new(),
            entry_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Insert an entry. A UNIQUE index rejects the insert when any
    /// entry already exists under the key.
    pub fn insert(&mut self, key: &Value, handle: RowHandle) -> Result<()> {
        let rendered = key.render();
        let Some(key) = IndexKey::from_value(key) else {
            return Ok(()); // NULLs are not indexed
        };

        let entries = self.map.entry(key).or_default();
        if self.unique && !entries.is_empty() {
            return Err(Error::new(
                ErrorCode::UniqueViolation,
                "index",
                format!("duplicate key '{}' in unique index '{}'", rendered, self.name),
            ));
        }
        entries.push(handle);
        self.entry_count += 1;
        Ok(())
    }

    /// Remove the entry for `(key, handle)`. Returns whether an entry
    /// was removed.
    pub fn delete(&mut self, key: &Value, handle: RowHandle) -> bool {
        let Some(key) = IndexKey::from_value(key) else {
            return false;
        };
        let Some(entries) = self.map.get_mut(&key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|h| *h != handle);
        let removed = before - entries.len();
        if entries.is_empty() {
            self.map.remove(&key);
        }
        self.entry_count -= removed;
        removed > 0
    }

    /// All row handles under a key.
    pub fn search(&self, key: &Value) -> Vec<RowHandle> {
        match IndexKey::from_value(key) {
            Some(key) => self.map.get(&key).cloned().unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Row handles in `[lo, hi]` under the given bounds.
    pub fn range(&self, lo: Bound<&Value>, hi: Bound<&Value>) -> Vec<RowHandle> {
        let to_key = |b: Bound<&Value>| -> Option<Bound<IndexKey>> {
            match b {
                Bound::Unbounded => Some(Bound::Unbounded),
                Bound::Included(v) => IndexKey::from_value(v).map(Bound::Included),
                Bound::Excluded(v) => IndexKey::from_value(v).map(Bound::Excluded),
            }
        };
        let (Some(lo), Some(hi)) = (to_key(lo), to_key(hi)) else {
            return Vec::new();
        };
        self.map
            .range((lo, hi))
            .flat_map(|(_, handles)| handles.iter().copied())
            .collect()
    }

    /// Candidate handles for a comparison predicate against this
    /// index's column.
    pub fn scan_op(&self, op: CompareOp, value: &Value) -> Vec<RowHandle> {
        match op {
            CompareOp::Eq => self.search(value),
            CompareOp::Lt => self.range(Bound::Unbounded, Bound::Excluded(value)),
            CompareOp::Le => self.range(Bound::Unbounded, Bound::Included(value)),
            CompareOp::Gt => self.range(Bound::Excluded(value), Bound::Unbounded),
            CompareOp::Ge => self.range(Bound::Included(value), Bound::Unbounded),
            // Not index-accelerable; the caller falls back to a scan.
            CompareOp::NotEq | CompareOp::Like => Vec::new(),
        }
    }

    pub fn first_key(&self) -> Option<&Value> {
        self.map.keys().next().map(|k| &k.0)
    }

    pub fn last_key(&self) -> Option<&Value> {
        self.map.keys().next_back().map(|k| &k.0)
    }

    /// Number of `(key, handle)` entries.
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// All entries as `(key, handle)` pairs, in key order. Used by the
    /// index/data consistency checks.
    pub fn entries(&self) -> Vec<(Value, RowHandle)> {
        self.map
            .iter()
            .flat_map(|(k, handles)| handles.iter().map(move |h| (k.0.clone(), *h)))
            .collect()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.entry_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageId;

    fn handle(page: u32, slot: u16) -> RowHandle {
        RowHandle::new(PageId::new(page), slot)
    }

    #[test]
    fn test_insert_search() {
        let mut index = BTreeIndex::new("idx_id", "users", "id", false);
        index.insert(&Value::Int(1), handle(1, 0)).unwrap();
        index.insert(&Value::Int(2), handle(1, 1)).unwrap();

        assert_eq!(index.search(&Value::Int(1)), vec![handle(1, 0)]);
        assert_eq!(index.search(&Value::Int(3)), Vec::new());
        assert_eq!(index.entry_count(), 2);
    }

    #[test]
    fn test_non_unique_duplicates() {
        let mut index = BTreeIndex::new("idx_name", "users", "name", false);
        index.insert(&Value::Str("a".into()), handle(1, 0)).unwrap();
        index.insert(&Value::Str("a".into()), handle(1, 1)).unwrap();

        assert_eq!(index.search(&Value::Str("a".into())).len(), 2);
    }

    #[test]
    fn test_unique_rejects_duplicate() {
        let mut index = BTreeIndex::new("idx_id", "users", "id", true);
        index.insert(&Value::Int(1), handle(1, 0)).unwrap();
        let err = index.insert(&Value::Int(1), handle(1, 1)).unwrap_err();
        assert_eq!(err.code, ErrorCode::UniqueViolation);
        assert_eq!(index.entry_count(), 1);
    }

    #[test]
    fn test_delete_specific_handle() {
        let mut index = BTreeIndex::new("idx", "t", "c", false);
        index.insert(&Value::Int(1), handle(1, 0)).unwrap();
        index.insert(&Value::Int(1), handle(1, 1)).unwrap();

        assert!(index.delete(&Value::Int(1), handle(1, 0)));
        assert_eq!(index.search(&Value::Int(1)), vec![handle(1, 1)]);
        assert!(!index.delete(&Value::Int(1), handle(1, 0)));
    }

    #[test]
    fn test_null_keys_not_indexed() {
        let mut index = BTreeIndex::new("idx", "t", "c", true);
        index.insert(&Value::Null, handle(1, 0)).unwrap();
        index.insert(&Value::Null, handle(1, 1)).unwrap(); // no unique violation
        assert_eq!(index.entry_count(), 0);
    }

    #[test]
    fn test_range_scan() {
        let mut index = BTreeIndex::new("idx", "t", "c", false);
        for i in 1..=5 {
            index.insert(&Value::Int(i), handle(1, i as u16)).unwrap();
        }

        let hits = index.scan_op(CompareOp::Gt, &Value::Int(3));
        assert_eq!(hits, vec![handle(1, 4), handle(1, 5)]);

        let hits = index.scan_op(CompareOp::Le, &Value::Int(2));
        assert_eq!(hits, vec![handle(1, 1), handle(1, 2)]);
    }

    #[test]
    fn test_mixed_numeric_key_order() {
        let mut index = BTreeIndex::new("idx", "t", "c", false);
        index.insert(&Value::Double(1.5), handle(1, 0)).unwrap();
        index.insert(&Value::Int(1), handle(1, 1)).unwrap();
        index.insert(&Value::Int(2), handle(1, 2)).unwrap();

        let hits = index.range(Bound::Included(&Value::Int(1)), Bound::Excluded(&Value::Int(2)));
        assert_eq!(hits, vec![handle(1, 1), handle(1, 0)]);
    }

    #[test]
    fn test_first_last_key() {
        let mut index = BTreeIndex::new("idx", "t", "c", false);
        assert!(index.first_key().is_none());

        index.insert(&Value::Int(5), handle(1, 0)).unwrap();
        index.insert(&Value::Int(2), handle(1, 1)).unwrap();
        index.insert(&Value::Str("z".into()), handle(1, 2)).unwrap();

        assert_eq!(index.first_key(), Some(&Value::Int(2)));
        assert_eq!(index.last_key(), Some(&Value::Str("z".into())));
    }

    #[test]
    fn test_not_eq_and_like_not_accelerated() {
        let mut index = BTreeIndex::new("idx", "t", "c", false);
        index.insert(&Value::Int(1), handle(1, 0)).unwrap();
        assert!(index.scan_op(CompareOp::NotEq, &Value::Int(1)).is_empty());
        assert!(index.scan_op(CompareOp::Like, &Value::Int(1)).is_empty());
    }
}
