// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! The version chain of row-range deletes for a block.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bitvec::vec::BitVec;
use parking_lot::RwLock;

use crate::storage::{LogIndex, StorageResult, TracedStorageError};
use crate::types::{RowOffset, Timestamp, NULL_TS};

/// One entry of the delete chain: a `[start, end]` row range one
/// transaction deleted, kept as a bitmap of row offsets.
pub struct DeleteNode {
    txn_id: u64,
    commit_ts: AtomicU64,
    inner: RwLock<DeleteNodeInner>,
}

#[derive(Default)]
struct DeleteNodeInner {
    mask: BitVec,
    log_index: Option<LogIndex>,
}

impl DeleteNode {
    fn new(txn_id: u64) -> Arc<Self> {
        Arc::new(Self {
            txn_id,
            commit_ts: AtomicU64::new(NULL_TS),
            inner: RwLock::new(DeleteNodeInner::default()),
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

    /// Mark `[start, end]` deleted in this node.
    pub fn range_delete(&self, start: RowOffset, end: RowOffset) {
        assert!(start <= end, "invalid delete range");
        let mut inner = self.inner.write();
        if inner.mask.len() <= end as usize {
            inner.mask.resize(end as usize + 1, false);
        }
        for row in start..=end {
            inner.mask.set(row as usize, true);
        }
    }

    pub fn delete_mask(&self) -> BitVec {
        self.inner.read().mask.clone()
    }

    pub fn deleted_rows(&self) -> usize {
        self.inner.read().mask.count_ones()
    }

    fn covers_row(&self, row: RowOffset) -> bool {
        let inner = self.inner.read();
        inner.mask.get(row as usize).map(|b| *b).unwrap_or(false)
    }

    fn overlaps(&self, start: RowOffset, end: RowOffset) -> bool {
        let inner = self.inner.read();
        if inner.mask.is_empty() || start as usize >= inner.mask.len() {
            return false;
        }
        let hi = (end as usize).min(inner.mask.len() - 1);
        inner.mask[start as usize..=hi].any()
    }
}

/// Ordered version chain of range deletes for a block. Same shape as a
/// column chain, with bitmaps of deleted rows instead of value maps.
pub struct DeleteChain {
    inner: RwLock<DeleteChainInner>,
    /// Committed deleted rows, for compaction scoring.
    committed_rows: AtomicUsize,
}

#[derive(Default)]
struct DeleteChainInner {
    committed: Vec<Arc<DeleteNode>>,
    uncommitted: Vec<Arc<DeleteNode>>,
}

impl DeleteChain {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(DeleteChainInner::default()),
            committed_rows: AtomicUsize::new(0),
        }
    }

    /// Committed deleted rows in this chain.
    pub fn delete_count(&self) -> usize {
        self.committed_rows.load(Ordering::Relaxed)
    }

    pub fn node_count(&self) -> usize {
        let inner = self.inner.read();
        inner.committed.len() + inner.uncommitted.len()
    }

    pub fn has_uncommitted(&self) -> bool {
        !self.inner.read().uncommitted.is_empty()
    }

    /// Link a fresh uncommitted node for `txn_id`.
    pub fn add_node(&self, txn_id: u64) -> Arc<DeleteNode> {
        let node = DeleteNode::new(txn_id);
        self.inner.write().uncommitted.push(node.clone());
        node
    }

    /// Link a node committed at `commit_ts` carrying a recovered delete.
    pub fn replay_committed(&self, start: RowOffset, end: RowOffset, commit_ts: Timestamp) {
        assert_ne!(commit_ts, NULL_TS, "replayed delete must carry a commit ts");
        let node = DeleteNode::new(0);
        node.range_delete(start, end);
        node.commit_ts.store(commit_ts, Ordering::Release);
        let rows = node.deleted_rows();
        let mut inner = self.inner.write();
        let pos = inner
            .committed
            .partition_point(|n| n.commit_ts() <= commit_ts);
        inner.committed.insert(pos, node);
        self.committed_rows.fetch_add(rows, Ordering::Relaxed);
    }

    /// Whether `[start, end]` may be written at `ts`: fails with
    /// `AlreadyDeleted` if a node committed at or before `ts` overlaps
    /// the range, or any other transaction holds an uncommitted
    /// overlapping delete (conservative write-write conflict).
    pub fn check_not_deleted(
        &self,
        start: RowOffset,
        end: RowOffset,
        ts: Timestamp,
        txn_id: u64,
    ) -> StorageResult<()> {
        let inner = self.inner.read();
        for node in &inner.committed {
            if node.commit_ts() <= ts && node.overlaps(start, end) {
                return Err(TracedStorageError::already_deleted(start, end));
            }
        }
        for node in &inner.uncommitted {
            if node.txn_id != txn_id && node.overlaps(start, end) {
                return Err(TracedStorageError::already_deleted(start, end));
            }
        }
        Ok(())
    }

    /// Whether `row` is deleted by a node committed at or before `ts`.
    pub fn is_deleted(&self, row: RowOffset, ts: Timestamp) -> bool {
        let inner = self.inner.read();
        inner
            .committed
            .iter()
            .any(|n| n.commit_ts() <= ts && n.covers_row(row))
    }

    /// Stamp an uncommitted node and move it to the committed list.
    pub fn commit_node(
        &self,
        node: &Arc<DeleteNode>,
        commit_ts: Timestamp,
        log_index: Option<LogIndex>,
    ) {
        if node.is_committed() {
            return;
        }
        let mut inner = self.inner.write();
        let pos = inner
            .uncommitted
            .iter()
            .position(|n| Arc::ptr_eq(n, node))
            .expect("committed delete node must be linked");
        let node = inner.uncommitted.remove(pos);
        node.commit_ts.store(commit_ts, Ordering::Release);
        node.inner.write().log_index = log_index;
        let at = inner
            .committed
            .partition_point(|n| n.commit_ts() <= commit_ts);
        inner.committed.insert(at, node.clone());
        self.committed_rows
            .fetch_add(node.deleted_rows(), Ordering::Relaxed);
    }

    /// Unlink a half-constructed or aborted node.
    pub fn abort_node(&self, node: &Arc<DeleteNode>) {
        let mut inner = self.inner.write();
        if let Some(pos) = inner.uncommitted.iter().position(|n| Arc::ptr_eq(n, node)) {
            inner.uncommitted.remove(pos);
        }
    }

    /// Union of committed delete masks at or before `ts`, optionally
    /// unioned with the caller's own in-flight node.
    pub fn collect_deletes(&self, ts: Timestamp, include_txn: Option<u64>) -> Option<BitVec> {
        let inner = self.inner.read();
        let mut mask: Option<BitVec> = None;
        let mut union = |node_mask: BitVec| match &mut mask {
            Some(acc) => {
                if acc.len() < node_mask.len() {
                    acc.resize(node_mask.len(), false);
                }
                for row in node_mask.iter_ones() {
                    acc.set(row, true);
                }
            }
            None => mask = Some(node_mask),
        };
        for node in inner.committed.iter().filter(|n| n.commit_ts() <= ts) {
            union(node.delete_mask());
        }
        if let Some(txn_id) = include_txn {
            for node in inner.uncommitted.iter().filter(|n| n.txn_id == txn_id) {
                union(node.delete_mask());
            }
        }
        mask
    }

    /// Union of deletes committed in `(start_ts, end_ts]` plus their WAL
    /// indexes.
    pub fn collect_deletes_in_range(
        &self,
        start_ts: Timestamp,
        end_ts: Timestamp,
    ) -> (Option<BitVec>, Vec<LogIndex>) {
        let inner = self.inner.read();
        let mut mask: Option<BitVec> = None;
        let mut indexes = Vec::new();
        for node in &inner.committed {
            let ts = node.commit_ts();
            if ts <= start_ts || ts > end_ts {
                continue;
            }
            let node_mask = node.delete_mask();
            match &mut mask {
                Some(acc) => {
                    if acc.len() < node_mask.len() {
                        acc.resize(node_mask.len(), false);
                    }
                    for row in node_mask.iter_ones() {
                        acc.set(row, true);
                    }
                }
                None => mask = Some(node_mask),
            }
            if let Some(index) = node.inner.read().log_index {
                indexes.push(index);
            }
        }
        (mask, indexes)
    }
}

impl Default for DeleteChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_visibility() {
        let chain = DeleteChain::new();
        let node = chain.add_node(1);
        node.range_delete(0, 0);
        chain.commit_node(&node, 18, None);

        assert!(!chain.is_deleted(0, 17));
        assert!(chain.is_deleted(0, 18));
        assert!(chain.is_deleted(0, 25));
        assert!(!chain.is_deleted(1, 25));
        assert_eq!(chain.delete_count(), 1);
    }

    #[test]
    fn test_check_not_deleted() {
        let chain = DeleteChain::new();
        let node = chain.add_node(1);
        node.range_delete(2, 4);

        // another transaction's in-flight delete conflicts
        let err = chain.check_not_deleted(4, 6, 100, 2).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::storage::StorageError::AlreadyDeleted(4, 6)
        ));
        // our own node does not
        chain.check_not_deleted(4, 6, 100, 1).unwrap();
        // disjoint ranges do not
        chain.check_not_deleted(5, 6, 100, 2).unwrap();

        chain.commit_node(&node, 10, None);
        // a delete committed after the snapshot does not reject the writer
        chain.check_not_deleted(2, 2, 5, 2).unwrap();
        let err = chain.check_not_deleted(2, 2, 10, 2).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::storage::StorageError::AlreadyDeleted(2, 2)
        ));
        assert!(chain.check_not_deleted(2, 2, 25, 2).is_err());
    }

    #[test]
    fn test_collect_deletes_union() {
        let chain = DeleteChain::new();
        let n1 = chain.add_node(1);
        n1.range_delete(0, 1);
        chain.commit_node(&n1, 5, None);
        let n2 = chain.add_node(2);
        n2.range_delete(4, 4);
        chain.commit_node(&n2, 9, None);

        let mask = chain.collect_deletes(9, None).unwrap();
        assert_eq!(mask.iter_ones().collect::<Vec<_>>(), vec![0, 1, 4]);
        let mask = chain.collect_deletes(5, None).unwrap();
        assert_eq!(mask.iter_ones().collect::<Vec<_>>(), vec![0, 1]);
        assert!(chain.collect_deletes(4, None).is_none());

        // the caller sees its own in-flight node
        let n3 = chain.add_node(7);
        n3.range_delete(2, 2);
        let mask = chain.collect_deletes(9, Some(7)).unwrap();
        assert_eq!(mask.iter_ones().collect::<Vec<_>>(), vec![0, 1, 2, 4]);
    }

    #[test]
    fn test_collect_deletes_in_range() {
        let chain = DeleteChain::new();
        let n1 = chain.add_node(1);
        n1.range_delete(0, 0);
        chain.commit_node(&n1, 5, None);
        let n2 = chain.add_node(2);
        n2.range_delete(1, 1);
        chain.commit_node(&n2, 9, None);

        // (5, 9] excludes the node committed exactly at the range start
        let (mask, _) = chain.collect_deletes_in_range(5, 9);
        assert_eq!(mask.unwrap().iter_ones().collect::<Vec<_>>(), vec![1]);
    }
}
