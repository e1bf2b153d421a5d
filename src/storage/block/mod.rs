// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! The per-block data engine.
//!
//! A [`Block`] wires together the mutable row buffer (while appendable),
//! the per-column MVCC chains, the primary-key index and the buffer-managed
//! column parts, and exposes the contract transactions program against:
//! append, update, range-delete, point and columnar reads, dedup, change
//! collection, replay, and compaction scoring.

mod appendable;
mod column_part;
mod compaction;
mod mvcc;
mod pk_index;
mod view;


use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

pub use appendable::*;
use bitvec::vec::BitVec;
pub use column_part::*;
pub use compaction::*;
use itertools::Itertools;
pub use mvcc::*;
use parking_lot::RwLock;
pub use pk_index::*;
use tracing::{debug, info};
pub use view::*;

use super::{
    BlockFile, BufferManager, ChecksumType, SegmentFile, StorageOptions, StorageResult,
    TracedStorageError, Transaction, WriteEntry,
};
use crate::array::{ArrayImpl, DataChunk};
use crate::catalog::{BlockId, Schema};
use crate::types::{DataValue, RowOffset, Timestamp};

/// An equality probe against the primary-key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOp {
    Equals,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub op: FilterOp,
    pub value: DataValue,
}

impl Filter {
    pub fn equals(value: DataValue) -> Self {
        Self {
            op: FilterOp::Equals,
            value,
        }
    }
}

/// The appendable-only state lives in this variant and is dropped at seal.
enum BlockState {
    Appendable {
        node: Arc<AppendableNode>,
        index: Arc<MutableIndex>,
    },
    Sealed {
        index: Arc<ImmutableIndex>,
        rows: u32,
    },
}

/// The block engine façade. See the module docs.
pub struct Block {
    id: BlockId,
    schema: Arc<Schema>,
    state: RwLock<BlockState>,
    parts: RwLock<Vec<ColumnPart>>,
    mvcc: Arc<MvccHandle>,
    block_file: Arc<BlockFile>,
    buf_mgr: Arc<BufferManager>,
    checksum_type: ChecksumType,
    /// Compaction-urgency bias; grows while the block keeps looking dirty.
    nice: AtomicU32,
    max_checkpoint_ts: AtomicU64,
    dropped: AtomicBool,
    closed: AtomicBool,
}

fn apply_delete_to_index(
    node: &AppendableNode,
    index: &MutableIndex,
    pk_idx: usize,
    mask: &BitVec,
    ts: Timestamp,
) -> StorageResult<()> {
    for row in mask.iter_ones() {
        let key = node.get_value(row as RowOffset, pk_idx);
        if index.get_active_row(&key) == Some(row as RowOffset) {
            index.delete(&key, ts)?;
        }
    }
    Ok(())
}

impl Block {
    /// Create a fresh appendable block on segment expansion.
    pub fn new_appendable(
        id: BlockId,
        schema: Arc<Schema>,
        segment: &SegmentFile,
        buf_mgr: Arc<BufferManager>,
        options: &StorageOptions,
    ) -> StorageResult<Arc<Self>> {
        let block_file = segment.open_block(id, schema.column_count())?;
        let node = AppendableNode::new(schema.clone());
        let index = Arc::new(MutableIndex::new());
        let mvcc = MvccHandle::new(schema.column_count());

        let parts = (0..schema.column_count())
            .map(|col| ColumnPart::new_transient(node.clone(), col))
            .collect_vec();

        let listener_node = node.clone();
        let listener_index = index.clone();
        let pk_idx = schema.primary_key();
        mvcc.set_deletes_listener(Some(Box::new(move |mask, ts| {
            apply_delete_to_index(&listener_node, &listener_index, pk_idx, mask, ts)
        })));

        Ok(Arc::new(Self {
            id,
            schema,
            state: RwLock::new(BlockState::Appendable { node, index }),
            parts: RwLock::new(parts),
            mvcc,
            block_file,
            buf_mgr,
            checksum_type: options.checksum_type,
            nice: AtomicU32::new(0),
            max_checkpoint_ts: AtomicU64::new(0),
            dropped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    /// Open a sealed block from its persisted column files.
    pub fn open_sealed(
        id: BlockId,
        schema: Arc<Schema>,
        segment: &SegmentFile,
        buf_mgr: Arc<BufferManager>,
        options: &StorageOptions,
    ) -> StorageResult<Arc<Self>> {
        let block_file = segment.open_block(id, schema.column_count())?;
        let rows = block_file.read_rows()?;
        let pk_idx = schema.primary_key();
        let pk_column = block_file.read_column(pk_idx, &schema.column_type(pk_idx))?;
        let index = Arc::new(ImmutableIndex::read_from(&pk_column));

        let parts: Vec<ColumnPart> = (0..schema.column_count())
            .map(|col| {
                ColumnPart::new_persistent(
                    block_file.clone(),
                    col,
                    schema.column_type(col),
                    &buf_mgr,
                    false,
                    false,
                )
            })
            .try_collect()?;
        if options.prefetch_on_open {
            for part in &parts {
                part.prefetch();
            }
        }

        let mvcc = MvccHandle::new(schema.column_count());
        Ok(Arc::new(Self {
            id,
            schema,
            state: RwLock::new(BlockState::Sealed { index, rows }),
            parts: RwLock::new(parts),
            mvcc,
            block_file,
            buf_mgr,
            checksum_type: options.checksum_type,
            nice: AtomicU32::new(0),
            max_checkpoint_ts: AtomicU64::new(0),
            dropped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn mvcc(&self) -> &Arc<MvccHandle> {
        &self.mvcc
    }

    /// Whether the block still runs in appendable mode (sealing has not
    /// happened), regardless of how full it is.
    pub fn is_appendable_mode(&self) -> bool {
        matches!(&*self.state.read(), BlockState::Appendable { .. })
    }

    /// Whether the block can take more rows.
    pub fn is_appendable(&self) -> bool {
        match &*self.state.read() {
            BlockState::Appendable { node, .. } => !node.is_full(),
            BlockState::Sealed { .. } => false,
        }
    }

    /// Coarse row count: the node's physical rows while appendable, the
    /// file-level count once sealed. Not filtered by timestamp; ts-scoped
    /// readers compose with [`MvccHandle::max_visible_row`].
    pub fn rows(&self) -> u32 {
        match &*self.state.read() {
            BlockState::Appendable { node, .. } => node.rows(),
            BlockState::Sealed { rows, .. } => *rows,
        }
    }

    pub fn max_visible_ts(&self) -> Timestamp {
        self.mvcc.max_visible_ts()
    }

    pub fn max_checkpoint_ts(&self) -> Timestamp {
        self.max_checkpoint_ts.load(Ordering::Acquire)
    }

    /// Record that appends up to `ts` were persisted by a checkpoint.
    pub fn set_max_checkpoint_ts(&self, ts: Timestamp) {
        self.max_checkpoint_ts.store(ts, Ordering::Release);
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    /// Mark the block drop-committed; it scores zero from now on.
    pub fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }

    /// Whether an uncommitted append reservation is open on the node.
    pub(crate) fn has_pending_append(&self) -> bool {
        match &*self.state.read() {
            BlockState::Appendable { node, .. } => node.has_pending(),
            BlockState::Sealed { .. } => false,
        }
    }

    fn appendable_state(&self) -> Option<(Arc<AppendableNode>, Arc<MutableIndex>)> {
        match &*self.state.read() {
            BlockState::Appendable { node, index } => Some((node.clone(), index.clone())),
            BlockState::Sealed { .. } => None,
        }
    }

    fn part(&self, col_idx: usize) -> ColumnPart {
        self.parts.read()[col_idx].clone()
    }

    // ------------------------------------------------------------------
    // write path
    // ------------------------------------------------------------------

    /// The write handle for appends. Fails with `NotAppendable` on sealed
    /// blocks.
    pub fn make_appender(&self) -> StorageResult<Appender> {
        match self.appendable_state() {
            Some((node, index)) => Ok(Appender::new(
                self.schema.clone(),
                node,
                index,
                self.mvcc.clone(),
            )),
            None => Err(TracedStorageError::not_appendable()),
        }
    }

    /// Append a batch for `txn`; see [`Appender::append`].
    pub fn append(&self, txn: &Arc<Transaction>, chunk: DataChunk) -> StorageResult<RowOffset> {
        match self.appendable_state() {
            Some(_) => self.make_appender()?.append(txn, chunk),
            None => Err(TracedStorageError::read_only()),
        }
    }

    /// Record `row -> value` in the column's update chain for `txn`.
    ///
    /// Takes the handle's shared lock plus the target chain's exclusive
    /// lock; write-write conflicts are detected by the chain itself.
    pub fn update(
        &self,
        txn: &Arc<Transaction>,
        row: RowOffset,
        col_idx: usize,
        value: DataValue,
    ) -> StorageResult<()> {
        if txn.is_cancelled() {
            return Err(TracedStorageError::cancelled());
        }
        if !self.is_appendable_mode() {
            return Err(TracedStorageError::read_only());
        }
        assert_ne!(
            col_idx,
            self.schema.primary_key(),
            "primary-key updates must be routed as delete plus append"
        );
        let _guard = self.mvcc.read();
        self.mvcc
            .check_not_deleted(row, row, txn.start_ts(), txn.id())?;
        let chain = self.mvcc.column_chain(col_idx).clone();
        let node = chain.try_update(txn, row, value)?;
        txn.record_write(WriteEntry::Update {
            mvcc: self.mvcc.clone(),
            chain,
            node,
        });
        Ok(())
    }

    /// Bind a delete of `[start, end]` to `txn`.
    ///
    /// The range must be free of visible committed deletes, of updates the
    /// transaction cannot see, and of any other transaction's in-flight
    /// writes.
    pub fn range_delete(
        &self,
        txn: &Arc<Transaction>,
        start: RowOffset,
        end: RowOffset,
    ) -> StorageResult<()> {
        if txn.is_cancelled() {
            return Err(TracedStorageError::cancelled());
        }
        if !self.is_appendable_mode() {
            return Err(TracedStorageError::read_only());
        }
        let _guard = self.mvcc.write();
        self.mvcc
            .check_not_deleted(start, end, txn.start_ts(), txn.id())?;
        self.mvcc
            .check_not_updated(start, end, txn.start_ts(), txn.id())?;
        let node = self.mvcc.delete_chain().add_node(txn.id());
        node.range_delete(start, end);
        txn.record_write(WriteEntry::Delete {
            mvcc: self.mvcc.clone(),
            node,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // read path
    // ------------------------------------------------------------------

    /// Resolve one cell at the transaction's start timestamp: delete check,
    /// then the update chain, then the base storage.
    pub fn get_value(
        &self,
        txn: &Arc<Transaction>,
        row: RowOffset,
        col_idx: usize,
    ) -> StorageResult<DataValue> {
        let ts = txn.start_ts();
        {
            let _guard = self.mvcc.read();
            if self.mvcc.is_deleted(row, ts) {
                return Err(TracedStorageError::not_found("row", row));
            }
            if let Some(value) = self.mvcc.column_chain(col_idx).get_value(row, ts) {
                return Ok(value);
            }
        }
        match self.appendable_state() {
            Some((node, _)) => {
                if !self.mvcc.is_visible(row, ts) {
                    return Err(TracedStorageError::not_found("row", row));
                }
                Ok(node.get_value(row, col_idx))
            }
            None => {
                if row >= self.rows() {
                    return Err(TracedStorageError::not_found("row", row));
                }
                let part = self.part(col_idx);
                let vec = part.get_vector()?;
                Ok(vec.get(row as usize))
            }
        }
    }

    /// A [`ColumnView`] of one column at the transaction's start
    /// timestamp: raw base vector, update mask and values, delete mask,
    /// and the applied vector after `eval`.
    pub fn get_column_data_by_id(
        &self,
        txn: &Arc<Transaction>,
        col_idx: usize,
    ) -> StorageResult<ColumnView> {
        let ts = txn.start_ts();
        let mut view = ColumnView::new(ts, col_idx);
        match self.appendable_state() {
            Some((node, _)) => {
                let _guard = self.mvcc.read();
                let max_row = self.mvcc.max_visible_row(ts);
                view.raw = Some(node.get_vector_view(max_row, col_idx));
                self.fill_column_updates(&mut view);
                self.fill_column_deletes(&mut view, None);
            }
            None => {
                // pin the base vector before taking any MVCC lock
                let part = self.part(col_idx);
                let vec = part.get_vector()?;
                view.raw = Some((*vec).clone());
                let _guard = self.mvcc.read();
                self.fill_column_updates(&mut view);
                self.fill_column_deletes(&mut view, None);
            }
        }
        view.eval();
        Ok(view)
    }

    /// Column lookup by name, delegating to the by-index path.
    pub fn get_column_data_by_name(
        &self,
        txn: &Arc<Transaction>,
        name: &str,
    ) -> StorageResult<ColumnView> {
        let col_idx = self
            .schema
            .column_index(name)
            .ok_or_else(|| TracedStorageError::not_found("column", name))?;
        self.get_column_data_by_id(txn, col_idx)
    }

    /// The primary-key column plus the delete mask at `ts`, skipping
    /// update-chain collection: keys are never rewritten in place.
    pub fn get_pk_column_data_optimized(&self, ts: Timestamp) -> StorageResult<ColumnView> {
        let pk_idx = self.schema.primary_key();
        let part = self.part(pk_idx);
        let raw = part.force_load(u32::MAX)?;
        let mut view = ColumnView::new(ts, pk_idx);
        view.raw = Some(raw);
        let _guard = self.mvcc.read();
        self.fill_column_deletes(&mut view, None);
        Ok(view)
    }

    fn fill_column_updates(&self, view: &mut ColumnView) {
        if let Some((mask, values)) = self.mvcc.column_chain(view.col_idx).collect_updates(view.ts)
        {
            view.update_mask = Some(mask);
            view.update_vals = values;
        }
    }

    fn fill_column_deletes(&self, view: &mut ColumnView, include_txn: Option<u64>) {
        view.delete_mask = self.mvcc.delete_chain().collect_deletes(view.ts, include_txn);
    }

    /// Point lookup through the primary-key index. Only equality probes
    /// are supported.
    pub fn get_by_filter(
        &self,
        txn: &Arc<Transaction>,
        filter: &Filter,
    ) -> StorageResult<RowOffset> {
        assert_eq!(filter.op, FilterOp::Equals, "only equality probes");
        let ts = txn.start_ts();
        match self.appendable_state() {
            Some((_, index)) => self.appendable_get_by_filter(ts, index, &filter.value),
            None => self.sealed_get_by_filter(ts, &filter.value),
        }
    }

    fn appendable_get_by_filter(
        &self,
        ts: Timestamp,
        index: Arc<MutableIndex>,
        key: &DataValue,
    ) -> StorageResult<RowOffset> {
        let _guard = self.mvcc.read();
        if let Some(row) = index.get_active_row(key) {
            if self.mvcc.is_visible(row, ts) {
                if self.mvcc.is_deleted(row, ts) {
                    return Err(TracedStorageError::not_found("key", key));
                }
                return Ok(row);
            }
        }
        // not active at this snapshot; a tombstoned key is still visible
        // to transactions that started before the delete committed
        if let Some((delete_ts, row)) = index.get_tombstone(key) {
            if ts < delete_ts && self.mvcc.is_visible(row, ts) {
                return Ok(row);
            }
        }
        Err(TracedStorageError::not_found("key", key))
    }

    fn sealed_get_by_filter(&self, ts: Timestamp, key: &DataValue) -> StorageResult<RowOffset> {
        let index = match &*self.state.read() {
            BlockState::Sealed { index, .. } => index.clone(),
            BlockState::Appendable { .. } => unreachable!("checked by caller"),
        };
        if index.dedup(key) == DedupOutcome::Unique {
            return Err(TracedStorageError::not_found("key", key));
        }
        // possible duplicate: confirm against the persisted key column
        let pk_idx = self.schema.primary_key();
        let pk_column = self.part(pk_idx).force_load(u32::MAX)?;
        let row = scan_column_for_key(&pk_column, key, None)
            .ok_or_else(|| TracedStorageError::not_found("key", key))?;
        let _guard = self.mvcc.read();
        if self.mvcc.is_deleted(row, ts) {
            return Err(TracedStorageError::not_found("key", key));
        }
        Ok(row)
    }

    /// Probe an incoming key batch against this block's keys. Fails with
    /// `Duplicated` on any confirmed collision. `rowmask` marks key
    /// indexes already resolved elsewhere.
    pub fn batch_dedup(
        &self,
        txn: &Arc<Transaction>,
        keys: &ArrayImpl,
        rowmask: Option<&BitVec>,
    ) -> StorageResult<()> {
        match self.appendable_state() {
            Some((_, index)) => {
                let _guard = self.mvcc.read();
                match index.batch_dedup(keys, rowmask) {
                    DedupOutcome::Unique => Ok(()),
                    DedupOutcome::Collides(idxs) => {
                        Err(TracedStorageError::duplicated("primary key", keys.get(idxs[0])))
                    }
                    DedupOutcome::Maybe(_) => unreachable!("mutable index is exact"),
                }
            }
            None => {
                let index = match &*self.state.read() {
                    BlockState::Sealed { index, .. } => index.clone(),
                    BlockState::Appendable { .. } => unreachable!(),
                };
                let candidates = match index.batch_dedup(keys, rowmask) {
                    DedupOutcome::Unique => return Ok(()),
                    DedupOutcome::Maybe(candidates) => candidates,
                    DedupOutcome::Collides(_) => unreachable!("immutable index is approximate"),
                };
                let view = self.get_pk_column_data_optimized(txn.start_ts())?;
                for idx in candidates {
                    let key = keys.get(idx);
                    if scan_column_for_key(view.applied_vec(), &key, view.delete_mask.as_ref())
                        .is_some()
                    {
                        return Err(TracedStorageError::duplicated("primary key", key));
                    }
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // change collection
    // ------------------------------------------------------------------

    /// Snapshot of the committed changes in `(start_ts, end_ts]`, per
    /// column and for deletes, with their WAL indexes. Consumed by
    /// replication and checkpointing.
    pub fn collect_changes_in_range(
        &self,
        start_ts: Timestamp,
        end_ts: Timestamp,
    ) -> BlockView {
        let mut view = BlockView::new(end_ts);
        let _guard = self.mvcc.read();
        for col_idx in 0..self.schema.column_count() {
            let (updates, indexes) = self
                .mvcc
                .column_chain(col_idx)
                .collect_committed_in_range(start_ts, end_ts);
            if let Some((mask, values)) = updates {
                view.update_masks.insert(col_idx, mask);
                view.update_vals.insert(col_idx, values);
            }
            view.col_log_indexes.insert(col_idx, indexes);
        }
        let (delete_mask, delete_indexes) = self
            .mvcc
            .delete_chain()
            .collect_deletes_in_range(start_ts, end_ts);
        view.delete_mask = delete_mask;
        view.delete_log_indexes = delete_indexes;
        view
    }

    /// WAL pointers of appends committed in `(start_ts, end_ts]`.
    pub fn collect_append_log_indexes(
        &self,
        start_ts: Timestamp,
        end_ts: Timestamp,
    ) -> Vec<super::LogIndex> {
        let _guard = self.mvcc.read();
        self.mvcc.collect_append_log_indexes(start_ts, end_ts)
    }

    /// Whole-block snapshot at the highest visible timestamp: raw rows,
    /// per-column update state and the delete mask.
    pub fn make_block_view(&self) -> StorageResult<BlockView> {
        let ts = self.mvcc.max_visible_ts();
        let appendable = self.appendable_state();
        let mut view = BlockView::new(ts);
        {
            let _guard = self.mvcc.read();
            for col_idx in 0..self.schema.column_count() {
                if let Some((mask, values)) = self.mvcc.column_chain(col_idx).collect_updates(ts) {
                    view.update_masks.insert(col_idx, mask);
                    view.update_vals.insert(col_idx, values);
                }
            }
            view.delete_mask = self.mvcc.delete_chain().collect_deletes(ts, None);
            if let Some((node, _)) = &appendable {
                let max_row = self.mvcc.max_visible_row(ts);
                view.raw = Some(
                    (0..self.schema.column_count())
                        .map(|col| node.get_vector_view(max_row, col))
                        .collect(),
                );
            }
        }
        if view.raw.is_none() {
            // sealed: load from the block files, without any lock held
            let types = self
                .schema
                .columns()
                .iter()
                .map(|c| c.datatype())
                .collect_vec();
            view.raw = Some(self.block_file.load_batch(&types)?);
        }
        Ok(view)
    }

    /// Debug summary of the block's MVCC churn.
    pub fn mutation_info(&self) -> String {
        let rows = self.rows();
        let total_changes = self.mvcc.change_node_count();
        let mut s = format!("Block {} Mutation Info: Changes={}/{}", self.id, total_changes, rows);
        if total_changes == 0 {
            return s;
        }
        for col_idx in 0..self.schema.column_count() {
            let cnt = self.mvcc.column_update_count(col_idx);
            if cnt == 0 {
                continue;
            }
            s = format!("{}, Col[{}]:{}/{}", s, col_idx, cnt, rows);
        }
        let delete_cnt = self.mvcc.delete_count();
        if delete_cnt != 0 {
            s = format!("{}, Del:{}/{}", s, delete_cnt, rows);
        }
        s
    }

    // ------------------------------------------------------------------
    // replay
    // ------------------------------------------------------------------

    /// Rebuild the primary-key index of a sealed block from its persisted
    /// key column. Appendable blocks need no rebuild here: rows only ever
    /// reach the node through [`Block::on_replay_append`], which restores
    /// the index entry by entry as the append log replays. Idempotent.
    pub fn replay_data(&self) -> StorageResult<()> {
        if self.is_appendable_mode() {
            return Ok(());
        }
        let pk_idx = self.schema.primary_key();
        let pk_column = self
            .block_file
            .read_column(pk_idx, &self.schema.column_type(pk_idx))?;
        let index = Arc::new(ImmutableIndex::read_from(&pk_column));
        let rows = pk_column.len() as u32;
        *self.state.write() = BlockState::Sealed { index, rows };
        info!(block = %self.id, "replayed block index");
        Ok(())
    }

    /// Apply a recovered append with its original commit timestamp.
    pub fn on_replay_append(&self, commit_ts: Timestamp, chunk: DataChunk) -> StorageResult<()> {
        let (node, index) = self
            .appendable_state()
            .expect("append replay targets an appendable block");
        let start_row = node.begin_append(0, chunk.cardinality() as u32)?;
        let pk = chunk.array_at(self.schema.primary_key());
        index.batch_upsert(pk, start_row)?;
        node.write_rows(&chunk);
        node.clear_pending(0);
        self.mvcc.replay_append(commit_ts, node.rows(), None);
        Ok(())
    }

    /// Apply a recovered update as a committed chain node with its
    /// original commit timestamp.
    pub fn on_replay_update(
        &self,
        commit_ts: Timestamp,
        row: RowOffset,
        col_idx: usize,
        value: DataValue,
    ) {
        let _guard = self.mvcc.read();
        self.mvcc.replay_update(col_idx, row, value, commit_ts);
    }

    /// Apply a recovered range delete with its original commit timestamp.
    pub fn on_replay_delete(
        &self,
        commit_ts: Timestamp,
        start: RowOffset,
        end: RowOffset,
    ) -> StorageResult<()> {
        {
            let _guard = self.mvcc.write();
            self.mvcc.replay_delete(start, end, commit_ts);
        }
        if let Some((node, index)) = self.appendable_state() {
            let mut mask = BitVec::new();
            mask.resize(end as usize + 1, false);
            for row in start..=end {
                mask.set(row as usize, true);
            }
            apply_delete_to_index(&node, &index, self.schema.primary_key(), &mask, commit_ts)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // compaction scoring
    // ------------------------------------------------------------------

    /// Bump the urgency bias when the block keeps looking dirty. Called
    /// periodically by the calibration sweep.
    pub fn run_calibration(&self) {
        if self.estimate_raw_score() == 0 {
            return;
        }
        let nice = self.nice.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(block = %self.id, nice, "calibration bumped nice");
    }

    fn reset_nice(&self) {
        self.nice.store(0, Ordering::Release);
    }

    fn estimate_raw_score(&self) -> u32 {
        let rows = self.rows();
        let appendable = self.is_appendable_mode();
        if appendable && rows == self.schema.block_max_rows() {
            return 100;
        }
        let changes = self.mvcc.change_node_count();
        if changes == 0 {
            if !appendable {
                return 0;
            }
            if self.mvcc.max_visible_ts() <= self.max_checkpoint_ts() {
                return 0;
            }
        }
        if rows == 0 {
            return 0;
        }

        let cols = self.schema.column_count();
        let mut factor = 0f64;
        for col_idx in 0..cols {
            let cnt = self.mvcc.column_update_count(col_idx);
            let mut col_factor = cnt as f64 / rows as f64;
            if col_factor <= 0.005 {
                col_factor *= 10.0;
            } else if col_factor < 0.10 {
                col_factor *= 20.0;
            } else {
                col_factor *= 40.0;
            }
            factor += col_factor;
        }
        factor /= cols as f64;
        factor += self.mvcc.delete_count() as f64 / rows as f64 * 50.0;
        let score = (factor * 100.0) as u32;
        score.max(1)
    }

    /// The compaction score: the raw estimate plus the accumulated bias,
    /// zero for dropped blocks.
    pub fn estimate_score(&self) -> u32 {
        if self.is_dropped() {
            return 0;
        }
        if self.is_appendable_mode() && self.rows() == self.schema.block_max_rows() {
            return 100;
        }
        let raw = self.estimate_raw_score();
        if raw == 0 {
            self.reset_nice();
            return 0;
        }
        raw + self.nice.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    /// Seal the appendable node into column files: write each column,
    /// build the immutable key index, upgrade the parts, and drop the
    /// mutable state. The MVCC chains survive, so timestamped reads keep
    /// resolving against them.
    pub fn seal(&self) -> StorageResult<()> {
        let mut state = self.state.write();
        let node = match &*state {
            BlockState::Appendable { node, .. } => node.clone(),
            BlockState::Sealed { .. } => return Err(TracedStorageError::read_only()),
        };
        if node.has_pending() {
            return Err(TracedStorageError::write_conflict(node.rows()));
        }

        let columns = node.snapshot_columns();
        let rows = node.rows();
        self.block_file.write_columns(&columns, self.checksum_type)?;
        let index = Arc::new(ImmutableIndex::read_from(&columns[self.schema.primary_key()]));

        let mut parts = self.parts.write();
        let upgraded: Vec<ColumnPart> = parts
            .iter()
            .enumerate()
            .map(|(col, part)| {
                part.clone_with_upgrade(
                    self.block_file.clone(),
                    self.schema.column_type(col),
                    &self.buf_mgr,
                )
            })
            .try_collect()?;
        *parts = upgraded;
        drop(parts);

        *state = BlockState::Sealed { index, rows };
        self.mvcc.set_deletes_listener(None);
        info!(block = %self.id, rows, "sealed appendable block");
        Ok(())
    }

    /// Fold the committed updates of a sealed block into its column files
    /// and prune the folded chain nodes. Deletes stay in the chain; only
    /// the rewrite into a fresh block renumbers rows.
    pub(crate) fn checkpoint_committed_changes(&self) -> StorageResult<()> {
        let ts = self.mvcc.max_visible_ts();
        assert!(
            !self.is_appendable_mode(),
            "checkpoint targets sealed blocks"
        );
        let mut columns = Vec::with_capacity(self.schema.column_count());
        for col_idx in 0..self.schema.column_count() {
            let part = self.part(col_idx);
            let mut view = ColumnView::new(ts, col_idx);
            view.raw = Some(part.force_load(u32::MAX)?);
            {
                let _guard = self.mvcc.read();
                self.fill_column_updates(&mut view);
            }
            view.eval();
            columns.push(view.applied_vec().clone());
        }
        self.block_file.write_columns(&columns, self.checksum_type)?;
        self.mvcc.prune_committed_up_to(ts);
        // the files changed underneath: drop cached vectors and reopen
        let mut parts = self.parts.write();
        for part in parts.iter() {
            part.invalidate();
        }
        *parts = (0..self.schema.column_count())
            .map(|col| {
                ColumnPart::new_persistent(
                    self.block_file.clone(),
                    col,
                    self.schema.column_type(col),
                    &self.buf_mgr,
                    false,
                    false,
                )
            })
            .try_collect()?;
        drop(parts);
        self.set_max_checkpoint_ts(ts);
        info!(block = %self.id, ts, "checkpointed committed changes");
        Ok(())
    }

    /// Two-phase close: the caller that wins the flip releases resources.
    /// Background readers holding pins keep the vectors alive until they
    /// unpin.
    pub fn destroy(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        for part in self.parts.read().iter() {
            part.invalidate();
        }
        self.mvcc.set_deletes_listener(None);
        info!(block = %self.id, "destroyed block");
        true
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("appendable", &self.is_appendable_mode())
            .field("rows", &self.rows())
            .field("mvcc", &self.mvcc)
            .finish()
    }
}
