// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! MVCC state of one block: one update chain per column, one delete
//! chain, the append log, and the visibility arithmetic over them.

mod column_chain;
mod delete_chain;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitvec::vec::BitVec;
pub use column_chain::*;
pub use delete_chain::*;
use parking_lot::{Mutex, RwLock};

use crate::storage::{LogIndex, StorageResult};
use crate::types::{RowOffset, Timestamp};

/// Invoked when a delete commits, with the delete mask and the commit
/// timestamp. Appendable blocks hook this to move the deleted keys of the
/// primary-key index from active to tombstone.
pub type DeletesListener = Box<dyn Fn(&BitVec, Timestamp) -> StorageResult<()> + Send + Sync>;

/// One committed append: the row count the block reached and the WAL
/// pointer of the batch.
#[derive(Clone, Copy, Debug)]
pub struct AppendEntry {
    pub commit_ts: Timestamp,
    pub row_count: u32,
    pub log_index: Option<LogIndex>,
}

/// The MVCC handle of one block.
///
/// The handle's own lock guards chain-list structure; each chain guards
/// its node list with its own lock. Readers take shared locks only.
/// Lock order is block, then handle, then chain; never the reverse.
pub struct MvccHandle {
    lock: RwLock<()>,
    columns: Box<[Arc<ColumnChain>]>,
    deletes: Arc<DeleteChain>,
    appends: RwLock<Vec<AppendEntry>>,
    max_visible_ts: AtomicU64,
    deletes_listener: Mutex<Option<DeletesListener>>,
}

impl MvccHandle {
    pub fn new(column_count: usize) -> Arc<Self> {
        Arc::new(Self {
            lock: RwLock::new(()),
            columns: (0..column_count)
                .map(|i| Arc::new(ColumnChain::new(i)))
                .collect(),
            deletes: Arc::new(DeleteChain::new()),
            appends: RwLock::new(Vec::new()),
            max_visible_ts: AtomicU64::new(0),
            deletes_listener: Mutex::new(None),
        })
    }

    /// Shared guard over the chain-list structure.
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    /// Exclusive guard, for structural mutation such as range deletes.
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }

    pub fn column_chain(&self, col_idx: usize) -> &Arc<ColumnChain> {
        &self.columns[col_idx]
    }

    pub fn delete_chain(&self) -> &Arc<DeleteChain> {
        &self.deletes
    }

    pub fn set_deletes_listener(&self, listener: Option<DeletesListener>) {
        *self.deletes_listener.lock() = listener;
    }

    /// Highest commit timestamp this block has seen. A hint, not a fence.
    pub fn max_visible_ts(&self) -> Timestamp {
        self.max_visible_ts.load(Ordering::Acquire)
    }

    pub fn bump_max_visible(&self, ts: Timestamp) {
        self.max_visible_ts.fetch_max(ts, Ordering::AcqRel);
    }

    /// The row count reached by the last append committed at or before
    /// `ts`.
    pub fn max_visible_row(&self, ts: Timestamp) -> u32 {
        let appends = self.appends.read();
        let pos = appends.partition_point(|e| e.commit_ts <= ts);
        if pos == 0 {
            0
        } else {
            appends[pos - 1].row_count
        }
    }

    /// Whether `row` was appended by a transaction visible at `ts`.
    pub fn is_visible(&self, row: RowOffset, ts: Timestamp) -> bool {
        row < self.max_visible_row(ts)
    }

    /// Whether `row` is deleted by a transaction visible at `ts`.
    pub fn is_deleted(&self, row: RowOffset, ts: Timestamp) -> bool {
        self.deletes.is_deleted(row, ts)
    }

    /// Gate a write of `[start, end]` on the delete chain.
    pub fn check_not_deleted(
        &self,
        start: RowOffset,
        end: RowOffset,
        ts: Timestamp,
        txn_id: u64,
    ) -> StorageResult<()> {
        self.deletes.check_not_deleted(start, end, ts, txn_id)
    }

    /// Gate a delete of `[start, end]` on every column chain.
    pub fn check_not_updated(
        &self,
        start: RowOffset,
        end: RowOffset,
        ts: Timestamp,
        txn_id: u64,
    ) -> StorageResult<()> {
        for chain in self.columns.iter() {
            chain.check_not_updated(start, end, ts, txn_id)?;
        }
        Ok(())
    }

    /// Record a committed append. Commits are serialized by the
    /// transaction manager, so entries arrive in timestamp order.
    pub fn commit_append(&self, commit_ts: Timestamp, row_count: u32, log_index: Option<LogIndex>) {
        let mut appends = self.appends.write();
        if let Some(last) = appends.last() {
            assert!(
                last.commit_ts <= commit_ts && last.row_count <= row_count,
                "append entries must be monotonic"
            );
        }
        appends.push(AppendEntry {
            commit_ts,
            row_count,
            log_index,
        });
        drop(appends);
        self.bump_max_visible(commit_ts);
    }

    /// Stamp a delete node committed, then tell the listener which rows
    /// went away.
    pub fn commit_delete(
        &self,
        node: &Arc<DeleteNode>,
        commit_ts: Timestamp,
        log_index: Option<LogIndex>,
    ) -> StorageResult<()> {
        self.deletes.commit_node(node, commit_ts, log_index);
        self.bump_max_visible(commit_ts);
        let listener = self.deletes_listener.lock();
        if let Some(listener) = listener.as_ref() {
            listener(&node.delete_mask(), commit_ts)?;
        }
        Ok(())
    }

    /// WAL pointers of appends committed in `(start_ts, end_ts]`.
    pub fn collect_append_log_indexes(
        &self,
        start_ts: Timestamp,
        end_ts: Timestamp,
    ) -> Vec<LogIndex> {
        let appends = self.appends.read();
        appends
            .iter()
            .filter(|e| e.commit_ts > start_ts && e.commit_ts <= end_ts)
            .filter_map(|e| e.log_index)
            .collect()
    }

    /// Total chain nodes, committed or in flight. Zero means the block
    /// carries no MVCC changes.
    pub fn change_node_count(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.node_count())
            .sum::<usize>()
            + self.deletes.node_count()
    }

    pub fn column_update_count(&self, col_idx: usize) -> usize {
        self.columns[col_idx].update_count()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.delete_count()
    }

    /// Whether any transaction holds uncommitted state on this block.
    pub fn has_uncommitted(&self) -> bool {
        self.columns.iter().any(|c| c.has_uncommitted()) || self.deletes.has_uncommitted()
    }

    /// Drop chain state folded into the base files by a checkpoint.
    pub fn prune_committed_up_to(&self, ts: Timestamp) {
        let _guard = self.lock.write();
        for chain in self.columns.iter() {
            chain.prune_committed_up_to(ts);
        }
    }
}

impl std::fmt::Debug for MvccHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MvccHandle")
            .field("columns", &self.columns.len())
            .field("max_visible_ts", &self.max_visible_ts())
            .field("change_nodes", &self.change_node_count())
            .finish()
    }
}

/// Replay helpers used when recovering a block from the write-ahead log.
impl MvccHandle {
    pub fn replay_append(&self, commit_ts: Timestamp, row_count: u32, log_index: Option<LogIndex>) {
        self.commit_append(commit_ts, row_count, log_index);
    }

    pub fn replay_update(
        &self,
        col_idx: usize,
        row: RowOffset,
        value: crate::types::DataValue,
        commit_ts: Timestamp,
    ) {
        self.columns[col_idx].replay_committed(row, value, commit_ts);
        self.bump_max_visible(commit_ts);
    }

    pub fn replay_delete(&self, start: RowOffset, end: RowOffset, commit_ts: Timestamp) {
        self.deletes.replay_committed(start, end, commit_ts);
        self.bump_max_visible(commit_ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_visible_row() {
        let mvcc = MvccHandle::new(2);
        mvcc.commit_append(5, 2, None);
        mvcc.commit_append(9, 4, None);

        assert_eq!(mvcc.max_visible_row(4), 0);
        assert_eq!(mvcc.max_visible_row(5), 2);
        assert_eq!(mvcc.max_visible_row(8), 2);
        assert_eq!(mvcc.max_visible_row(9), 4);
        assert_eq!(mvcc.max_visible_row(100), 4);
        assert!(mvcc.is_visible(1, 5));
        assert!(!mvcc.is_visible(2, 5));
        assert_eq!(mvcc.max_visible_ts(), 9);
    }

    #[test]
    fn test_deletes_listener_fires() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc as StdArc;

        let mvcc = MvccHandle::new(1);
        let fired = StdArc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        mvcc.set_deletes_listener(Some(Box::new(move |mask, _ts| {
            fired2.fetch_add(mask.count_ones(), Ordering::SeqCst);
            Ok(())
        })));

        let node = mvcc.delete_chain().add_node(1);
        node.range_delete(3, 5);
        mvcc.commit_delete(&node, 7, None).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(mvcc.delete_count(), 3);
    }
}
