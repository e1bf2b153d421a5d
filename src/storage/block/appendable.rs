// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! The mutable row buffer of an appendable block.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::mvcc::MvccHandle;
use super::pk_index::MutableIndex;
use crate::array::{ArrayBuilderImpl, ArrayImpl, DataChunk};
use crate::catalog::Schema;
use crate::storage::{StorageResult, TracedStorageError, Transaction, WriteEntry};
use crate::types::{DataValue, RowOffset};

/// A batch of live column builders plus the current row count.
///
/// Rows land in the builders as soon as a transaction appends them; they
/// become visible only when the transaction commits and the MVCC handle
/// records the append. One uncommitted appending transaction is admitted
/// at a time, so a rollback is a truncation of the builder tail.
#[derive(Debug)]
pub struct AppendableNode {
    schema: Arc<Schema>,
    data: RwLock<Vec<ArrayBuilderImpl>>,
    rows: AtomicU32,
    pending: Mutex<Option<PendingAppend>>,
}

#[derive(Debug)]
struct PendingAppend {
    txn_id: u64,
    start_row: RowOffset,
}

impl AppendableNode {
    pub fn new(schema: Arc<Schema>) -> Arc<Self> {
        let data = schema
            .columns()
            .iter()
            .map(|col| ArrayBuilderImpl::with_capacity(&col.datatype(), schema.block_max_rows() as usize))
            .collect_vec();
        Arc::new(Self {
            schema,
            data: RwLock::new(data),
            rows: AtomicU32::new(0),
            pending: Mutex::new(None),
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Physical rows in the node, committed or pending.
    pub fn rows(&self) -> u32 {
        self.rows.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.rows() >= self.schema.block_max_rows()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Admit `txn_id` as the appending transaction and reserve `count`
    /// rows. Returns the start row of the reservation.
    pub(crate) fn begin_append(&self, txn_id: u64, count: u32) -> StorageResult<RowOffset> {
        let mut pending = self.pending.lock();
        let rows = self.rows();
        match pending.as_ref() {
            Some(p) if p.txn_id != txn_id => {
                return Err(TracedStorageError::write_conflict(rows));
            }
            Some(_) => {}
            None => {
                *pending = Some(PendingAppend {
                    txn_id,
                    start_row: rows,
                });
            }
        }
        let remaining = self.schema.block_max_rows() - rows;
        if count > remaining {
            // release a reservation that never wrote a row
            if pending.as_ref().map(|p| p.start_row) == Some(rows) {
                *pending = None;
            }
            return Err(TracedStorageError::block_full(count, remaining));
        }
        Ok(rows)
    }

    /// Release the reservation of `txn_id` if it has not written any row.
    pub(crate) fn release_unused_reservation(&self, txn_id: u64) {
        let mut pending = self.pending.lock();
        if let Some(p) = pending.as_ref() {
            if p.txn_id == txn_id && p.start_row == self.rows() {
                *pending = None;
            }
        }
    }

    /// Write a reserved chunk into the builders.
    pub(crate) fn write_rows(&self, chunk: &DataChunk) {
        let mut data = self.data.write();
        for (idx, builder) in data.iter_mut().enumerate() {
            builder.append(chunk.array_at(idx));
        }
        let rows = data[0].len() as u32;
        drop(data);
        self.rows.store(rows, Ordering::Release);
    }

    /// Drop the pending rows of `txn_id`, truncating the builder tail.
    pub(crate) fn rollback(&self, txn_id: u64) {
        let mut pending = self.pending.lock();
        let Some(p) = pending.as_ref() else { return };
        if p.txn_id != txn_id {
            return;
        }
        let start_row = p.start_row;
        *pending = None;
        let mut data = self.data.write();
        for builder in data.iter_mut() {
            builder.truncate(start_row as usize);
        }
        drop(data);
        self.rows.store(start_row, Ordering::Release);
        debug!(txn_id, start_row, "rolled back pending append");
    }

    /// Release the append reservation once the transaction committed.
    pub(crate) fn clear_pending(&self, txn_id: u64) {
        let mut pending = self.pending.lock();
        if pending.as_ref().map(|p| p.txn_id) == Some(txn_id) {
            *pending = None;
        }
    }

    /// Copy out the first `max_row` rows of one column.
    pub fn get_vector_view(&self, max_row: u32, col_idx: usize) -> ArrayImpl {
        let data = self.data.read();
        data[col_idx].snapshot(max_row as usize)
    }

    /// Read one cell of the live builders.
    pub fn get_value(&self, row: RowOffset, col_idx: usize) -> DataValue {
        let data = self.data.read();
        data[col_idx].get(row as usize)
    }

    /// Copy out every column in full, for sealing.
    pub fn snapshot_columns(&self) -> Vec<ArrayImpl> {
        let rows = self.rows() as usize;
        let data = self.data.read();
        data.iter().map(|builder| builder.snapshot(rows)).collect()
    }
}

/// The write handle of an appendable block.
#[derive(Debug)]
pub struct Appender {
    schema: Arc<Schema>,
    node: Arc<AppendableNode>,
    index: Arc<MutableIndex>,
    mvcc: Arc<MvccHandle>,
}

impl Appender {
    pub(crate) fn new(
        schema: Arc<Schema>,
        node: Arc<AppendableNode>,
        index: Arc<MutableIndex>,
        mvcc: Arc<MvccHandle>,
    ) -> Self {
        Self {
            schema,
            node,
            index,
            mvcc,
        }
    }

    /// Append a batch for `txn`. Rows become visible at the transaction's
    /// commit timestamp. Returns the start row of the batch.
    ///
    /// Fails with `DuplicateKey` if any primary key is already active,
    /// `BlockFull` if the batch exceeds the block's remaining capacity,
    /// and `WriteConflict` if another transaction has a pending append.
    pub fn append(&self, txn: &Arc<Transaction>, chunk: DataChunk) -> StorageResult<RowOffset> {
        if txn.is_cancelled() {
            return Err(TracedStorageError::cancelled());
        }
        assert_eq!(
            chunk.column_count(),
            self.schema.column_count(),
            "chunk layout must match the block schema"
        );
        let count = chunk.cardinality() as u32;
        let start_row = self.node.begin_append(txn.id(), count)?;

        let pk = chunk.array_at(self.schema.primary_key());
        if let Err(e) = self.index.batch_upsert(pk, start_row) {
            self.node.release_unused_reservation(txn.id());
            return Err(e);
        }
        self.node.write_rows(&chunk);

        let keys = (0..pk.len()).map(|i| pk.get(i)).collect_vec();
        txn.record_write(WriteEntry::Append {
            mvcc: self.mvcc.clone(),
            node: self.node.clone(),
            index: self.index.clone(),
            rows_after: self.node.rows(),
            keys,
        });
        Ok(start_row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::I32Array;
    use crate::catalog::ColumnCatalog;
    use crate::types::{DataTypeExt, DataTypeKind};

    fn test_schema(max_rows: u32) -> Arc<Schema> {
        Arc::new(Schema::new(
            vec![
                ColumnCatalog::new(
                    0,
                    "pk".into(),
                    DataTypeKind::Int32.not_null().to_column_primary_key(),
                ),
                ColumnCatalog::new(1, "v".into(), DataTypeKind::Int32.not_null().to_column()),
            ],
            max_rows,
        ))
    }

    fn chunk(rows: std::ops::Range<i32>) -> DataChunk {
        [
            ArrayImpl::Int32(rows.clone().map(Some).collect::<I32Array>()),
            ArrayImpl::Int32(rows.map(|x| Some(x * 10)).collect::<I32Array>()),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_append_and_view() {
        let node = AppendableNode::new(test_schema(8));
        node.begin_append(1, 4).unwrap();
        node.write_rows(&chunk(0..4));
        node.clear_pending(1);

        assert_eq!(node.rows(), 4);
        assert!(!node.is_full());
        let view = node.get_vector_view(2, 1);
        assert_eq!(view.len(), 2);
        assert_eq!(view.get(1), DataValue::Int32(10));
        assert_eq!(node.get_value(3, 0), DataValue::Int32(3));
    }

    #[test]
    fn test_reservation_gate() {
        let node = AppendableNode::new(test_schema(8));
        node.begin_append(1, 2).unwrap();
        node.write_rows(&chunk(0..2));

        // a second writer is refused while txn 1 is pending
        let err = node.begin_append(2, 2).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::storage::StorageError::WriteConflict(_)
        ));

        node.rollback(1);
        assert_eq!(node.rows(), 0);
        node.begin_append(2, 2).unwrap();
    }

    #[test]
    fn test_capacity() {
        let node = AppendableNode::new(test_schema(4));
        node.begin_append(1, 4).unwrap();
        node.write_rows(&chunk(0..4));
        node.clear_pending(1);
        assert!(node.is_full());

        let err = node.begin_append(2, 1).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::storage::StorageError::BlockFull(1, 0)
        ));
    }
}
