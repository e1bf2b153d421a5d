// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! The per-block primary-key index.
//!
//! Appendable blocks keep an exact in-memory map of active rows and
//! tombstones. Sealed blocks keep an approximate immutable form (key
//! bounds plus a bloom filter); a [`DedupOutcome::Maybe`] answer is
//! confirmed by scanning the persisted primary-key column.

use std::collections::HashMap;

use bitvec::vec::BitVec;
use bloomfilter::Bloom;
use parking_lot::RwLock;

use crate::array::ArrayImpl;
use crate::storage::{StorageResult, TracedStorageError};
use crate::types::{DataValue, RowOffset, Timestamp};

const BLOOM_FP_RATE: f64 = 0.01;

/// Result of probing an index with a key batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// No probed key exists in this block.
    Unique,
    /// Key indexes that collide with active rows.
    Collides(Vec<usize>),
    /// Key indexes the index cannot rule out; the caller confirms them by
    /// scanning the primary-key column.
    Maybe(Vec<usize>),
}

/// Stable byte form of a key, fed to the bloom filter.
fn key_bytes(key: &DataValue) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(9);
    match key {
        DataValue::Bool(v) => {
            bytes.push(0);
            bytes.push(*v as u8);
        }
        DataValue::Int32(v) => {
            bytes.push(1);
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        DataValue::Int64(v) => {
            bytes.push(2);
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        DataValue::String(v) => {
            bytes.push(3);
            bytes.extend_from_slice(v.as_bytes());
        }
        DataValue::Float64(_) | DataValue::Null => {
            panic!("invalid primary-key value: {:?}", key)
        }
    }
    bytes
}

fn key_le(a: &DataValue, b: &DataValue) -> bool {
    a.partial_cmp(b)
        .expect("primary keys must be totally ordered")
        .is_le()
}

/// Scan a primary-key column for `key`, skipping rows set in `exclude`.
pub(crate) fn scan_column_for_key(
    column: &ArrayImpl,
    key: &DataValue,
    exclude: Option<&BitVec>,
) -> Option<RowOffset> {
    (0..column.len())
        .filter(|row| {
            exclude
                .and_then(|mask| mask.get(*row).map(|b| !*b))
                .unwrap_or(true)
        })
        .find(|row| &column.get(*row) == key)
        .map(|row| row as RowOffset)
}

/// The exact index of an appendable block: active rows plus tombstones.
/// A key lives in at most one of the two maps.
#[derive(Debug)]
pub struct MutableIndex {
    inner: RwLock<MutableIndexInner>,
}

#[derive(Debug, Default)]
struct MutableIndexInner {
    active: HashMap<DataValue, RowOffset>,
    /// Key -> (delete timestamp, the row the key occupied).
    deleted: HashMap<DataValue, (Timestamp, RowOffset)>,
}

impl MutableIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MutableIndexInner::default()),
        }
    }

    /// Insert `keys` starting at `start_row`. No key is inserted if any of
    /// them collides with an active entry.
    pub fn batch_upsert(&self, keys: &ArrayImpl, start_row: RowOffset) -> StorageResult<()> {
        let mut inner = self.inner.write();
        for row in 0..keys.len() {
            let key = keys.get(row);
            if inner.active.contains_key(&key) {
                return Err(TracedStorageError::duplicated("primary key", key));
            }
        }
        for row in 0..keys.len() {
            let key = keys.get(row);
            inner.deleted.remove(&key);
            inner.active.insert(key, start_row + row as RowOffset);
        }
        Ok(())
    }

    /// Probe `keys` against the active map; `rowmask` marks key indexes to
    /// skip.
    pub fn batch_dedup(&self, keys: &ArrayImpl, rowmask: Option<&BitVec>) -> DedupOutcome {
        let inner = self.inner.read();
        let collides: Vec<usize> = (0..keys.len())
            .filter(|idx| {
                rowmask
                    .and_then(|mask| mask.get(*idx).map(|b| !*b))
                    .unwrap_or(true)
            })
            .filter(|idx| inner.active.contains_key(&keys.get(*idx)))
            .collect();
        if collides.is_empty() {
            DedupOutcome::Unique
        } else {
            DedupOutcome::Collides(collides)
        }
    }

    /// Move `key` from active to the tombstone map at `ts`.
    pub fn delete(&self, key: &DataValue, ts: Timestamp) -> StorageResult<()> {
        let mut inner = self.inner.write();
        match inner.active.remove(key) {
            Some(row) => {
                inner.deleted.insert(key.clone(), (ts, row));
                Ok(())
            }
            None => Err(TracedStorageError::not_found("primary key", key)),
        }
    }

    /// Drop keys inserted by a rolled-back append.
    pub fn remove_keys(&self, keys: &[DataValue]) {
        let mut inner = self.inner.write();
        for key in keys {
            inner.active.remove(key);
        }
    }

    pub fn get_active_row(&self, key: &DataValue) -> Option<RowOffset> {
        self.inner.read().active.get(key).copied()
    }

    /// Tombstone lookup: `(delete_ts, row)` if the key was deleted.
    pub fn get_tombstone(&self, key: &DataValue) -> Option<(Timestamp, RowOffset)> {
        self.inner.read().deleted.get(key).copied()
    }

    /// Whether `key` existed and was deleted at or before `ts`.
    pub fn is_key_deleted(&self, key: &DataValue, ts: Timestamp) -> (bool, bool) {
        match self.get_tombstone(key) {
            Some((delete_ts, _)) => (true, delete_ts <= ts),
            None => (false, false),
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.read().active.len()
    }

    #[cfg(test)]
    pub fn tombstone_count(&self) -> usize {
        self.inner.read().deleted.len()
    }
}

impl Default for MutableIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// The approximate index of a sealed block: key bounds plus a bloom
/// filter over the persisted primary-key column.
pub struct ImmutableIndex {
    min: DataValue,
    max: DataValue,
    bloom: Bloom<Vec<u8>>,
}

impl ImmutableIndex {
    /// Rebuild the index from the persisted primary-key column. Called
    /// when a sealed block is opened.
    pub fn read_from(pk_column: &ArrayImpl) -> Self {
        assert!(!pk_column.is_empty(), "sealed block cannot be empty");
        let mut bloom = Bloom::new_for_fp_rate(pk_column.len().max(1), BLOOM_FP_RATE);
        let mut min = pk_column.get(0);
        let mut max = pk_column.get(0);
        for row in 0..pk_column.len() {
            let key = pk_column.get(row);
            bloom.set(&key_bytes(&key));
            if key_le(&key, &min) {
                min = key.clone();
            }
            if key_le(&max, &key) {
                max = key;
            }
        }
        Self { min, max, bloom }
    }

    /// Probe one key. `Maybe` answers must be confirmed against the
    /// primary-key column.
    pub fn dedup(&self, key: &DataValue) -> DedupOutcome {
        if !key_le(&self.min, key) || !key_le(key, &self.max) {
            return DedupOutcome::Unique;
        }
        if !self.bloom.check(&key_bytes(key)) {
            return DedupOutcome::Unique;
        }
        DedupOutcome::Maybe(vec![0])
    }

    /// Probe a key batch; returns the indexes needing scan confirmation.
    pub fn batch_dedup(&self, keys: &ArrayImpl, rowmask: Option<&BitVec>) -> DedupOutcome {
        let candidates: Vec<usize> = (0..keys.len())
            .filter(|idx| {
                rowmask
                    .and_then(|mask| mask.get(*idx).map(|b| !*b))
                    .unwrap_or(true)
            })
            .filter(|idx| !matches!(self.dedup(&keys.get(*idx)), DedupOutcome::Unique))
            .collect();
        if candidates.is_empty() {
            DedupOutcome::Unique
        } else {
            DedupOutcome::Maybe(candidates)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::I32Array;

    fn keys(range: std::ops::Range<i32>) -> ArrayImpl {
        ArrayImpl::Int32(range.map(Some).collect::<I32Array>())
    }

    #[test]
    fn test_mutable_upsert_and_dedup() {
        let index = MutableIndex::new();
        index.batch_upsert(&keys(0..4), 0).unwrap();
        assert_eq!(index.get_active_row(&DataValue::Int32(2)), Some(2));

        // a colliding batch inserts nothing
        let err = index.batch_upsert(&keys(3..6), 4).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::storage::StorageError::Duplicated(..)
        ));
        assert_eq!(index.get_active_row(&DataValue::Int32(4)), None);
        assert_eq!(index.active_count(), 4);

        match index.batch_dedup(&keys(2..6), None) {
            DedupOutcome::Collides(idxs) => assert_eq!(idxs, vec![0, 1]),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(index.batch_dedup(&keys(10..12), None), DedupOutcome::Unique);
    }

    #[test]
    fn test_delete_moves_to_tombstone() {
        let index = MutableIndex::new();
        index.batch_upsert(&keys(0..4), 0).unwrap();
        index.delete(&DataValue::Int32(1), 18).unwrap();

        assert_eq!(index.get_active_row(&DataValue::Int32(1)), None);
        assert_eq!(index.get_tombstone(&DataValue::Int32(1)), Some((18, 1)));
        assert_eq!(index.is_key_deleted(&DataValue::Int32(1), 17), (true, false));
        assert_eq!(index.is_key_deleted(&DataValue::Int32(1), 18), (true, true));
        // active and tombstone maps stay disjoint
        assert_eq!(index.active_count(), 3);
        assert_eq!(index.tombstone_count(), 1);

        // re-insert clears the tombstone
        index.batch_upsert(&keys(1..2), 4).unwrap();
        assert_eq!(index.tombstone_count(), 0);
    }

    #[test]
    fn test_immutable_dedup() {
        let pk = keys(0..100);
        let index = ImmutableIndex::read_from(&pk);

        // out of bounds is definitely unique
        assert_eq!(index.dedup(&DataValue::Int32(1000)), DedupOutcome::Unique);
        // present keys can never be ruled out
        assert!(matches!(
            index.dedup(&DataValue::Int32(50)),
            DedupOutcome::Maybe(_)
        ));
        match index.batch_dedup(&keys(98..102), None) {
            DedupOutcome::Maybe(c) => {
                assert!(c.contains(&0) && c.contains(&1));
                assert!(!c.contains(&2) && !c.contains(&3));
            }
            DedupOutcome::Unique => panic!("keys 98 and 99 exist"),
            DedupOutcome::Collides(_) => panic!("immutable index cannot answer collides"),
        }
    }

    #[test]
    fn test_scan_column_for_key() {
        let pk = keys(0..10);
        assert_eq!(scan_column_for_key(&pk, &DataValue::Int32(7), None), Some(7));
        assert_eq!(scan_column_for_key(&pk, &DataValue::Int32(17), None), None);

        let mut exclude = BitVec::new();
        exclude.resize(10, false);
        exclude.set(7, true);
        assert_eq!(
            scan_column_for_key(&pk, &DataValue::Int32(7), Some(&exclude)),
            None
        );
    }
}
