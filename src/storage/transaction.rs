// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! The engine-side face of the transaction coordinator.
//!
//! A [`Transaction`] carries a start timestamp for reads, collects the
//! chain nodes it created, and receives a commit timestamp from the
//! [`TxnManager`]'s oracle. Commit stamps every collected node; abort
//! unlinks them. Commits are serialized so append entries and chain
//! stamps land in timestamp order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::block::{
    AppendableNode, ColumnChain, DeleteNode, MutableIndex, MvccHandle, UpdateNode,
};
use super::{StorageResult, TracedStorageError};
use crate::types::{DataValue, Timestamp, NULL_TS};

/// A pointer into the write-ahead log, carried on committed chain nodes
/// for replication and checkpoint consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogIndex {
    pub lsn: u64,
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// One write a transaction performed, replayed at commit or abort.
pub(crate) enum WriteEntry {
    Append {
        mvcc: Arc<MvccHandle>,
        node: Arc<AppendableNode>,
        index: Arc<MutableIndex>,
        rows_after: u32,
        keys: Vec<DataValue>,
    },
    Update {
        mvcc: Arc<MvccHandle>,
        chain: Arc<ColumnChain>,
        node: Arc<UpdateNode>,
    },
    Delete {
        mvcc: Arc<MvccHandle>,
        node: Arc<DeleteNode>,
    },
}

/// A transaction as seen by the block engine.
pub struct Transaction {
    id: u64,
    start_ts: Timestamp,
    commit_ts: AtomicU64,
    state: Mutex<TxnState>,
    cancelled: AtomicBool,
    log_index: Mutex<Option<LogIndex>>,
    writes: Mutex<Vec<WriteEntry>>,
}

impl Transaction {
    fn new(id: u64, start_ts: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            id,
            start_ts,
            commit_ts: AtomicU64::new(NULL_TS),
            state: Mutex::new(TxnState::Active),
            cancelled: AtomicBool::new(false),
            log_index: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    /// The commit timestamp, or [`NULL_TS`] while the transaction runs.
    pub fn commit_ts(&self) -> Timestamp {
        self.commit_ts.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TxnState {
        *self.state.lock()
    }

    /// Request cancellation. Write paths observe the flag at entry.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Attach the WAL pointer of this transaction's log record; committed
    /// chain nodes inherit it.
    pub fn set_log_index(&self, index: LogIndex) {
        *self.log_index.lock() = Some(index);
    }

    pub(crate) fn record_write(&self, entry: WriteEntry) {
        self.writes.lock().push(entry);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if *self.state.lock() == TxnState::Active && !self.writes.lock().is_empty() {
            warn!(
                txn_id = self.id,
                "transaction dropped without committing or aborting"
            );
        }
    }
}

/// Hands out transactions and serializes commit so the chains observe
/// monotonically increasing commit timestamps.
pub struct TxnManager {
    next_txn_id: AtomicU64,
    oracle: AtomicU64,
    commit_lock: Mutex<()>,
}

impl TxnManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_txn_id: AtomicU64::new(1),
            oracle: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
        })
    }

    /// Start a transaction reading the latest committed snapshot.
    pub fn begin(&self) -> Arc<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        Transaction::new(id, self.oracle.load(Ordering::SeqCst))
    }

    /// Start a transaction reading the snapshot at `start_ts`.
    pub fn begin_at(&self, start_ts: Timestamp) -> Arc<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        Transaction::new(id, start_ts)
    }

    /// Push the oracle forward, e.g. after replaying recovered commits.
    pub fn advance_oracle(&self, ts: Timestamp) {
        self.oracle.fetch_max(ts, Ordering::SeqCst);
    }

    /// Commit `txn`: allocate the commit timestamp and stamp every write.
    pub fn commit(&self, txn: &Arc<Transaction>) -> StorageResult<Timestamp> {
        assert_eq!(txn.state(), TxnState::Active, "commit of a finished txn");
        if txn.is_cancelled() {
            self.abort(txn);
            return Err(TracedStorageError::cancelled());
        }

        let _serialize = self.commit_lock.lock();
        let commit_ts = self.oracle.fetch_add(1, Ordering::SeqCst) + 1;
        let log_index = *txn.log_index.lock();
        let writes = std::mem::take(&mut *txn.writes.lock());
        for entry in &writes {
            match entry {
                WriteEntry::Append {
                    mvcc,
                    node,
                    rows_after,
                    ..
                } => {
                    mvcc.commit_append(commit_ts, *rows_after, log_index);
                    node.clear_pending(txn.id);
                }
                WriteEntry::Update { mvcc, chain, node } => {
                    chain.commit_node(node, commit_ts, log_index);
                    mvcc.bump_max_visible(commit_ts);
                }
                WriteEntry::Delete { mvcc, node } => {
                    mvcc.commit_delete(node, commit_ts, log_index)?;
                }
            }
        }
        txn.commit_ts.store(commit_ts, Ordering::Release);
        *txn.state.lock() = TxnState::Committed;
        Ok(commit_ts)
    }

    /// Abort `txn`, unlinking every chain node it created.
    pub fn abort(&self, txn: &Arc<Transaction>) {
        if txn.state() != TxnState::Active {
            return;
        }
        let writes = std::mem::take(&mut *txn.writes.lock());
        // unwind in reverse order of the writes
        for entry in writes.iter().rev() {
            match entry {
                WriteEntry::Append {
                    node, index, keys, ..
                } => {
                    node.rollback(txn.id);
                    index.remove_keys(keys);
                }
                WriteEntry::Update { chain, node, .. } => {
                    chain.abort_node(node);
                }
                WriteEntry::Delete { mvcc, node } => {
                    mvcc.delete_chain().abort_node(node);
                }
            }
        }
        *txn.state.lock() = TxnState::Aborted;
    }
}
