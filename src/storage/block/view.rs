// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! Read views captured at one timestamp: the raw base vector plus the
//! update and delete masks that turn it into what a transaction sees.

use std::collections::{BTreeMap, HashMap};

use bitvec::vec::BitVec;

use crate::array::{ArrayBuilderImpl, ArrayImpl, DataChunk};
use crate::storage::LogIndex;
use crate::types::{DataValue, RowOffset, Timestamp};

/// One column of one block as visible at `ts`.
#[derive(Debug)]
pub struct ColumnView {
    pub ts: Timestamp,
    pub col_idx: usize,
    /// The base vector: a truncated copy of the appendable node, or the
    /// decoded column file.
    pub raw: Option<ArrayImpl>,
    /// Rows rewritten by committed updates at or before `ts`.
    pub update_mask: Option<BitVec>,
    pub update_vals: BTreeMap<RowOffset, DataValue>,
    /// Rows deleted at or before `ts`.
    pub delete_mask: Option<BitVec>,
    applied: Option<ArrayImpl>,
}

impl ColumnView {
    pub fn new(ts: Timestamp, col_idx: usize) -> Self {
        Self {
            ts,
            col_idx,
            raw: None,
            update_mask: None,
            update_vals: BTreeMap::new(),
            delete_mask: None,
            applied: None,
        }
    }

    /// Apply the update mask onto the raw vector, materializing the
    /// applied vector. A view without updates keeps serving the raw one.
    pub fn eval(&mut self) {
        let raw = self.raw.as_ref().expect("eval needs a base vector");
        if self.update_vals.is_empty() {
            self.applied = None;
            return;
        }
        let mut builder = ArrayBuilderImpl::with_capacity(&raw.data_type(), raw.len());
        for row in 0..raw.len() {
            match self.update_vals.get(&(row as RowOffset)) {
                Some(value) => builder.push(value),
                None => builder.push(&raw.get(row)),
            }
        }
        self.applied = Some(builder.finish());
    }

    /// The materialized vector: updates folded in if [`ColumnView::eval`]
    /// ran and found any.
    pub fn applied_vec(&self) -> &ArrayImpl {
        self.applied
            .as_ref()
            .or(self.raw.as_ref())
            .expect("view has no base vector")
    }

    pub fn is_row_deleted(&self, row: RowOffset) -> bool {
        self.delete_mask
            .as_ref()
            .and_then(|mask| mask.get(row as usize).map(|b| *b))
            .unwrap_or(false)
    }

    /// Rows of the base vector surviving the delete mask.
    pub fn visible_row_count(&self) -> usize {
        let rows = self.raw.as_ref().map(|r| r.len()).unwrap_or(0);
        let deleted = self
            .delete_mask
            .as_ref()
            .map(|mask| mask.count_ones())
            .unwrap_or(0);
        rows - deleted.min(rows)
    }
}

/// Every column of one block as visible at `ts`, plus the WAL pointers of
/// the folded changes. Produced by change collection for replication and
/// checkpoint consumers.
pub struct BlockView {
    pub ts: Timestamp,
    pub update_masks: HashMap<usize, BitVec>,
    pub update_vals: HashMap<usize, BTreeMap<RowOffset, DataValue>>,
    pub col_log_indexes: HashMap<usize, Vec<LogIndex>>,
    pub delete_mask: Option<BitVec>,
    pub delete_log_indexes: Vec<LogIndex>,
    /// The raw rows, when the consumer asked for a full snapshot.
    pub raw: Option<DataChunk>,
}

impl BlockView {
    pub fn new(ts: Timestamp) -> Self {
        Self {
            ts,
            update_masks: HashMap::new(),
            update_vals: HashMap::new(),
            col_log_indexes: HashMap::new(),
            delete_mask: None,
            delete_log_indexes: Vec::new(),
            raw: None,
        }
    }

    /// Whether the view carries any change at all.
    pub fn has_changes(&self) -> bool {
        !self.update_vals.is_empty() || self.delete_mask.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::I32Array;

    #[test]
    fn test_eval_applies_updates() {
        let mut view = ColumnView::new(10, 1);
        view.raw = Some(ArrayImpl::Int32((0..4).map(Some).collect::<I32Array>()));
        view.update_vals.insert(2, DataValue::Int32(99));
        let mut mask = BitVec::new();
        mask.resize(3, false);
        mask.set(2, true);
        view.update_mask = Some(mask);
        view.eval();

        let applied = view.applied_vec();
        assert_eq!(applied.get(1), DataValue::Int32(1));
        assert_eq!(applied.get(2), DataValue::Int32(99));
    }

    #[test]
    fn test_eval_without_updates_serves_raw() {
        let mut view = ColumnView::new(10, 0);
        view.raw = Some(ArrayImpl::Int32((0..4).map(Some).collect::<I32Array>()));
        view.eval();
        assert_eq!(view.applied_vec().get(3), DataValue::Int32(3));
    }

    #[test]
    fn test_visible_row_count() {
        let mut view = ColumnView::new(10, 0);
        view.raw = Some(ArrayImpl::Int32((0..4).map(Some).collect::<I32Array>()));
        let mut mask = BitVec::new();
        mask.resize(4, false);
        mask.set(0, true);
        view.delete_mask = Some(mask);
        assert_eq!(view.visible_row_count(), 3);
        assert!(view.is_row_deleted(0));
        assert!(!view.is_row_deleted(3));
    }
}
