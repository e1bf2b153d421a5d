// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! The per-column version chain of row-level updates.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bitvec::vec::BitVec;
use parking_lot::RwLock;

use crate::storage::{LogIndex, StorageResult, TracedStorageError, Transaction};
use crate::types::{DataValue, RowOffset, Timestamp, NULL_TS};

/// One entry of a column chain: the rows one transaction rewrote in this
/// column, keyed by row offset.
#[derive(Debug)]
pub struct UpdateNode {
    txn_id: u64,
    commit_ts: AtomicU64,
    inner: RwLock<UpdateNodeInner>,
}

#[derive(Default, Debug)]
struct UpdateNodeInner {
    values: BTreeMap<RowOffset, DataValue>,
    log_index: Option<LogIndex>,
}

impl UpdateNode {
    fn new(txn_id: u64) -> Arc<Self> {
        Arc::new(Self {
            txn_id,
            commit_ts: AtomicU64::new(NULL_TS),
            inner: RwLock::new(UpdateNodeInner::default()),
        })
    }

    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    pub fn commit_ts(&self) -> Timestamp {
        self.commit_ts.load(Ordering::Acquire)
    }

    pub fn is_committed(&self) -> bool {
        self.commit_ts() != NULL_TS
    }

    pub fn row_count(&self) -> usize {
        self.inner.read().values.len()
    }

    pub fn get(&self, row: RowOffset) -> Option<DataValue> {
        self.inner.read().values.get(&row).cloned()
    }

    pub fn log_index(&self) -> Option<LogIndex> {
        self.inner.read().log_index
    }

    fn covers(&self, start: RowOffset, end: RowOffset) -> bool {
        self.inner.read().values.range(start..=end).next().is_some()
    }
}

/// Ordered version chain of updates for a single column of a single block.
///
/// Committed nodes are kept sorted by commit timestamp; uncommitted nodes
/// sit at the tail in transaction-arrival order. Write-write conflicts are
/// detected here, under the chain's own lock.
pub struct ColumnChain {
    col_idx: usize,
    inner: RwLock<ChainInner>,
    /// Committed row updates, for compaction scoring.
    committed_rows: AtomicUsize,
}

#[derive(Default)]
struct ChainInner {
    committed: Vec<Arc<UpdateNode>>,
    uncommitted: Vec<Arc<UpdateNode>>,
}

impl ColumnChain {
    pub fn new(col_idx: usize) -> Self {
        Self {
            col_idx,
            inner: RwLock::new(ChainInner::default()),
            committed_rows: AtomicUsize::new(0),
        }
    }

    pub fn col_idx(&self) -> usize {
        self.col_idx
    }

    /// Committed row updates in this chain.
    pub fn update_count(&self) -> usize {
        self.committed_rows.load(Ordering::Relaxed)
    }

    /// All nodes, committed or not.
    pub fn node_count(&self) -> usize {
        let inner = self.inner.read();
        inner.committed.len() + inner.uncommitted.len()
    }

    pub fn has_uncommitted(&self) -> bool {
        !self.inner.read().uncommitted.is_empty()
    }

    /// Record `row -> value` for `txn`, linking a new node if the
    /// transaction has none on this chain yet.
    ///
    /// Fails with `WriteConflict` if another transaction holds an
    /// uncommitted write for the row, or a transaction invisible to `txn`
    /// already committed one.
    pub fn try_update(
        &self,
        txn: &Transaction,
        row: RowOffset,
        value: DataValue,
    ) -> StorageResult<Arc<UpdateNode>> {
        let mut inner = self.inner.write();
        for node in &inner.committed {
            if node.commit_ts() > txn.start_ts() && node.covers(row, row) {
                return Err(TracedStorageError::write_conflict(row));
            }
        }
        for node in &inner.uncommitted {
            if node.txn_id != txn.id() && node.covers(row, row) {
                return Err(TracedStorageError::write_conflict(row));
            }
        }
        let node = match inner.uncommitted.iter().find(|n| n.txn_id == txn.id()) {
            Some(node) => node.clone(),
            None => {
                let node = UpdateNode::new(txn.id());
                inner.uncommitted.push(node.clone());
                node
            }
        };
        node.inner.write().values.insert(row, value);
        Ok(node)
    }

    /// Link a node committed at `commit_ts` carrying one recovered update.
    pub fn replay_committed(&self, row: RowOffset, value: DataValue, commit_ts: Timestamp) {
        assert_ne!(commit_ts, NULL_TS, "replayed update must carry a commit ts");
        let node = UpdateNode::new(0);
        node.commit_ts.store(commit_ts, Ordering::Release);
        node.inner.write().values.insert(row, value);
        let mut inner = self.inner.write();
        let pos = inner
            .committed
            .partition_point(|n| n.commit_ts() <= commit_ts);
        inner.committed.insert(pos, node);
        self.committed_rows.fetch_add(1, Ordering::Relaxed);
    }

    /// Stamp an uncommitted node with its commit timestamp and move it to
    /// the committed list, keeping commit order.
    pub fn commit_node(
        &self,
        node: &Arc<UpdateNode>,
        commit_ts: Timestamp,
        log_index: Option<LogIndex>,
    ) {
        // a transaction touching several rows records the node once per
        // row; later stamps are no-ops
        if node.is_committed() {
            return;
        }
        let mut inner = self.inner.write();
        let pos = inner
            .uncommitted
            .iter()
            .position(|n| Arc::ptr_eq(n, node))
            .expect("committed node must be linked");
        let node = inner.uncommitted.remove(pos);
        node.commit_ts.store(commit_ts, Ordering::Release);
        node.inner.write().log_index = log_index;
        // commits may stamp out of order, keep the list sorted
        let at = inner
            .committed
            .partition_point(|n| n.commit_ts() <= commit_ts);
        inner.committed.insert(at, node.clone());
        self.committed_rows
            .fetch_add(node.row_count(), Ordering::Relaxed);
    }

    /// Unlink a half-constructed or aborted node.
    pub fn abort_node(&self, node: &Arc<UpdateNode>) {
        let mut inner = self.inner.write();
        if let Some(pos) = inner.uncommitted.iter().position(|n| Arc::ptr_eq(n, node)) {
            inner.uncommitted.remove(pos);
        }
    }

    /// The most recent committed value for `row` with commit-ts <= `ts`.
    pub fn get_value(&self, row: RowOffset, ts: Timestamp) -> Option<DataValue> {
        let inner = self.inner.read();
        inner
            .committed
            .iter()
            .rev()
            .filter(|n| n.commit_ts() <= ts)
            .find_map(|n| n.get(row))
    }

    /// Whether any transaction invisible to `ts`, or any other in-flight
    /// transaction, has written rows in `[start, end]`.
    pub fn check_not_updated(
        &self,
        start: RowOffset,
        end: RowOffset,
        ts: Timestamp,
        txn_id: u64,
    ) -> StorageResult<()> {
        let inner = self.inner.read();
        for node in &inner.committed {
            if node.commit_ts() > ts && node.covers(start, end) {
                return Err(TracedStorageError::write_conflict(start));
            }
        }
        for node in &inner.uncommitted {
            if node.txn_id != txn_id && node.covers(start, end) {
                return Err(TracedStorageError::write_conflict(start));
            }
        }
        Ok(())
    }

    /// Fold committed updates visible at `ts` into a row mask and the
    /// replacement values; later commit timestamps win.
    pub fn collect_updates(
        &self,
        ts: Timestamp,
    ) -> Option<(BitVec, BTreeMap<RowOffset, DataValue>)> {
        let inner = self.inner.read();
        let mut values = BTreeMap::new();
        for node in inner.committed.iter().filter(|n| n.commit_ts() <= ts) {
            for (row, value) in &node.inner.read().values {
                values.insert(*row, value.clone());
            }
        }
        drop(inner);
        if values.is_empty() {
            return None;
        }
        Some((row_mask(&values), values))
    }

    /// Like [`ColumnChain::collect_updates`], over commit timestamps in
    /// `(start_ts, end_ts]`, together with the WAL indexes of the folded
    /// nodes.
    pub fn collect_committed_in_range(
        &self,
        start_ts: Timestamp,
        end_ts: Timestamp,
    ) -> (
        Option<(BitVec, BTreeMap<RowOffset, DataValue>)>,
        Vec<LogIndex>,
    ) {
        let inner = self.inner.read();
        let mut values = BTreeMap::new();
        let mut indexes = Vec::new();
        for node in &inner.committed {
            let ts = node.commit_ts();
            if ts <= start_ts || ts > end_ts {
                continue;
            }
            let node_inner = node.inner.read();
            for (row, value) in &node_inner.values {
                values.insert(*row, value.clone());
            }
            if let Some(index) = node_inner.log_index {
                indexes.push(index);
            }
        }
        drop(inner);
        if values.is_empty() {
            (None, indexes)
        } else {
            (Some((row_mask(&values), values)), indexes)
        }
    }

    /// Drop committed nodes folded into the base by a checkpoint.
    pub fn prune_committed_up_to(&self, ts: Timestamp) {
        let mut inner = self.inner.write();
        let mut pruned_rows = 0;
        inner.committed.retain(|n| {
            let keep = n.commit_ts() > ts;
            if !keep {
                pruned_rows += n.row_count();
            }
            keep
        });
        self.committed_rows.fetch_sub(pruned_rows, Ordering::Relaxed);
    }
}

fn row_mask(values: &BTreeMap<RowOffset, DataValue>) -> BitVec {
    let mut mask = BitVec::new();
    let max_row = *values.keys().next_back().unwrap() as usize;
    mask.resize(max_row + 1, false);
    for row in values.keys() {
        mask.set(*row as usize, true);
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TxnManager;

    #[test]
    fn test_update_visibility_order() {
        let mgr = TxnManager::new();
        let chain = ColumnChain::new(1);

        let t1 = mgr.begin();
        let node = chain.try_update(&t1, 0, DataValue::Int32(11)).unwrap();
        assert_eq!(chain.get_value(0, u64::MAX), None);
        chain.commit_node(&node, 15, None);

        assert_eq!(chain.get_value(0, 14), None);
        assert_eq!(chain.get_value(0, 15), Some(DataValue::Int32(11)));
        assert_eq!(chain.get_value(0, 20), Some(DataValue::Int32(11)));
        assert_eq!(chain.update_count(), 1);
    }

    #[test]
    fn test_write_write_conflict() {
        let mgr = TxnManager::new();
        let chain = ColumnChain::new(1);

        let t1 = mgr.begin();
        let t2 = mgr.begin();
        chain.try_update(&t1, 0, DataValue::Int32(1)).unwrap();
        let err = chain.try_update(&t2, 0, DataValue::Int32(2)).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::storage::StorageError::WriteConflict(0)
        ));
        // a different row is fine
        chain.try_update(&t2, 1, DataValue::Int32(2)).unwrap();
    }

    #[test]
    fn test_committed_after_start_conflicts() {
        let mgr = TxnManager::new();
        let chain = ColumnChain::new(0);

        let t1 = mgr.begin();
        let node = chain.try_update(&t1, 3, DataValue::Int32(7)).unwrap();
        chain.commit_node(&node, 10, None);

        // reader that started before the commit cannot rewrite the row
        let stale = mgr.begin_at(5);
        let err = chain.try_update(&stale, 3, DataValue::Int32(8)).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::storage::StorageError::WriteConflict(3)
        ));
    }

    #[test]
    fn test_collect_updates_later_wins() {
        let mgr = TxnManager::new();
        let chain = ColumnChain::new(0);

        let t1 = mgr.begin();
        let n1 = chain.try_update(&t1, 0, DataValue::Int32(1)).unwrap();
        chain.commit_node(&n1, 5, None);
        // the second writer's snapshot covers the first commit
        let t2 = mgr.begin_at(8);
        let n2 = chain.try_update(&t2, 0, DataValue::Int32(2)).unwrap();
        chain.commit_node(&n2, 9, None);

        let (mask, values) = chain.collect_updates(10).unwrap();
        assert!(mask[0]);
        assert_eq!(values[&0], DataValue::Int32(2));

        let (_, values) = chain.collect_updates(5).unwrap();
        assert_eq!(values[&0], DataValue::Int32(1));
    }

    #[test]
    fn test_abort_unlinks() {
        let mgr = TxnManager::new();
        let chain = ColumnChain::new(0);
        let t1 = mgr.begin();
        let node = chain.try_update(&t1, 0, DataValue::Int32(1)).unwrap();
        chain.abort_node(&node);
        assert_eq!(chain.node_count(), 0);
        // the row is writable again
        let t2 = mgr.begin();
        chain.try_update(&t2, 0, DataValue::Int32(2)).unwrap();
    }
}
