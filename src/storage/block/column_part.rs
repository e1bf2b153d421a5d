// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! One cached column slice of one block.
//!
//! A part is the block's handle on one column's storage: the live node
//! for appendable blocks, a buffer-managed window into the column file
//! for sealed ones. Vectors materialize lazily on first read.

use std::sync::Arc;

use super::appendable::AppendableNode;
use crate::array::ArrayImpl;
use crate::storage::{
    decode_column, BlockFile, BufferManager, NodeHandle, NodeKey, StorageResult, VectorConstructor,
    VirtualFile,
};
use crate::types::DataType;

/// How a part's bytes are backed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartMode {
    /// Appendable base vector, served from the live node.
    Transient,
    /// Window into a sealed column file.
    Persistent,
    /// Same as [`PartMode::Persistent`]; the block is clustered on this
    /// column, which planners use as a hint.
    PersistentSorted,
}

#[derive(Clone)]
enum PartSource {
    Node(Arc<AppendableNode>),
    File {
        handle: NodeHandle,
        block_file: Arc<BlockFile>,
        ty: DataType,
    },
}

/// One column part of one block.
#[derive(Clone)]
pub struct ColumnPart {
    col_idx: usize,
    mode: PartMode,
    source: PartSource,
}

impl ColumnPart {
    /// A part over the live builders of an appendable block.
    pub fn new_transient(node: Arc<AppendableNode>, col_idx: usize) -> Self {
        Self {
            col_idx,
            mode: PartMode::Transient,
            source: PartSource::Node(node),
        }
    }

    /// A part over a sealed column file, materialized through the buffer
    /// manager.
    pub fn new_persistent(
        block_file: Arc<BlockFile>,
        col_idx: usize,
        ty: DataType,
        buf_mgr: &Arc<BufferManager>,
        sorted: bool,
        preload: bool,
    ) -> StorageResult<Self> {
        let vfile = block_file.make_virtual_part_file(col_idx)?;
        let constructor: VectorConstructor = Arc::new(move |vf: &VirtualFile| {
            let data = vf.read_bytes()?;
            decode_column(&ty, &data)
        });
        let handle = buf_mgr.create_node(
            NodeKey {
                block: block_file.block_id(),
                column: col_idx as u32,
            },
            vfile,
            preload,
            constructor,
        )?;
        Ok(Self {
            col_idx,
            mode: if sorted {
                PartMode::PersistentSorted
            } else {
                PartMode::Persistent
            },
            source: PartSource::File {
                handle,
                block_file,
                ty,
            },
        })
    }

    pub fn col_idx(&self) -> usize {
        self.col_idx
    }

    pub fn mode(&self) -> PartMode {
        self.mode
    }

    /// The materialized vector. Persistent parts pin through the buffer
    /// manager and may block on I/O; do not hold block or MVCC locks
    /// across this call.
    pub fn get_vector(&self) -> StorageResult<Arc<ArrayImpl>> {
        match &self.source {
            PartSource::Node(node) => Ok(Arc::new(
                node.get_vector_view(node.rows(), self.col_idx),
            )),
            PartSource::File { handle, .. } => Ok(handle.pin()?.to_shared()),
        }
    }

    /// Copy out a vector sized to `ref_rows`. Memory-backed parts take
    /// the latest append-visible view; persistent parts decode from the
    /// virtual file directly, skipping the cache, for callers that will
    /// not reread.
    pub fn force_load(&self, ref_rows: u32) -> StorageResult<ArrayImpl> {
        match &self.source {
            PartSource::Node(node) => {
                let rows = ref_rows.min(node.rows());
                Ok(node.get_vector_view(rows, self.col_idx))
            }
            PartSource::File { handle, ty, .. } => {
                let mut scratch = Vec::new();
                handle.virtual_file().read_with_buffer(&mut scratch)?;
                let vec = decode_column(ty, &scratch)?;
                if (ref_rows as usize) < vec.len() {
                    Ok(vec.slice(..ref_rows as usize))
                } else {
                    Ok(vec)
                }
            }
        }
    }

    /// Warm the page cache for persistent parts; a no-op for memory-backed
    /// ones.
    pub fn prefetch(&self) {
        if let PartSource::File {
            block_file,
            ..
        } = &self.source
        {
            block_file.prefetch_part(self.col_idx);
        }
    }

    /// The hand-off used when an appendable block is sealed: a persistent
    /// part pointing at the freshly written column file.
    pub fn clone_with_upgrade(
        &self,
        block_file: Arc<BlockFile>,
        ty: DataType,
        buf_mgr: &Arc<BufferManager>,
    ) -> StorageResult<ColumnPart> {
        let sorted = self.mode == PartMode::PersistentSorted;
        Self::new_persistent(block_file, self.col_idx, ty, buf_mgr, sorted, false)
    }

    /// Estimated bytes of the backing range.
    pub fn size(&self) -> u64 {
        match &self.source {
            PartSource::Node(node) => {
                node.get_vector_view(node.rows(), self.col_idx).estimated_size() as u64
            }
            PartSource::File { handle, .. } => handle.capacity(),
        }
    }

    /// Drop the cached materialization, e.g. after the file was rewritten
    /// or the block destroyed.
    pub fn invalidate(&self) {
        if let PartSource::File { handle, .. } = &self.source {
            handle.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::array::I32Array;
    use crate::catalog::{BlockId, ColumnCatalog, Schema};
    use crate::storage::{ChecksumType, SegmentFile};
    use crate::types::{DataTypeExt, DataTypeKind, DataValue};

    fn sealed_part(tempdir: &TempDir) -> ColumnPart {
        let seg = SegmentFile::open(tempdir.path().join("seg"), 0).unwrap();
        let block_file = seg.open_block(BlockId::new(0, 1, 0, 0), 1).unwrap();
        let pk: I32Array = (0..64).map(Some).collect();
        block_file
            .write_columns(&[ArrayImpl::Int32(pk)], ChecksumType::Crc32)
            .unwrap();
        let buf_mgr = BufferManager::new(1 << 20);
        ColumnPart::new_persistent(
            block_file,
            0,
            DataTypeKind::Int32.not_null(),
            &buf_mgr,
            false,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_persistent_get_vector() {
        let tempdir = TempDir::new().unwrap();
        let part = sealed_part(&tempdir);
        assert_eq!(part.mode(), PartMode::Persistent);
        let vec = part.get_vector().unwrap();
        assert_eq!(vec.len(), 64);
        assert_eq!(vec.get(63), DataValue::Int32(63));
        assert!(part.size() > 0);
    }

    #[test]
    fn test_persistent_force_load_truncates() {
        let tempdir = TempDir::new().unwrap();
        let part = sealed_part(&tempdir);
        let vec = part.force_load(10).unwrap();
        assert_eq!(vec.len(), 10);
    }

    #[test]
    fn test_transient_latest_view() {
        let schema = Arc::new(Schema::new(
            vec![ColumnCatalog::new(
                0,
                "pk".into(),
                DataTypeKind::Int32.not_null().to_column_primary_key(),
            )],
            16,
        ));
        let node = AppendableNode::new(schema);
        node.begin_append(1, 3).unwrap();
        node.write_rows(
            &[ArrayImpl::Int32([1, 2, 3].map(Some).into_iter().collect::<I32Array>())]
                .into_iter()
                .collect(),
        );
        node.clear_pending(1);

        let part = ColumnPart::new_transient(node, 0);
        assert_eq!(part.mode(), PartMode::Transient);
        let vec = part.force_load(2).unwrap();
        assert_eq!(vec.len(), 2);
        assert_eq!(vec.get(1), DataValue::Int32(2));
        part.prefetch(); // no-op
    }
}
