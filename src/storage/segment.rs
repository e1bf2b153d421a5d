// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! On-disk layout of a segment: one directory per segment, one directory
//! per block inside it, one file per column plus a JSON metadata file.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(not(unix))]
use std::sync::Mutex;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    decode_column, decode_row_count, encode_column, ChecksumType, ColumnReadableFile, PartFile,
    StorageResult, VirtualFile,
};
use crate::array::{ArrayImpl, DataChunk};
use crate::catalog::BlockId;
use crate::types::{DataType, SegmentId};

const BLOCK_META_FILE_NAME: &str = "meta.json";

fn path_of_column(block_dir: &Path, col_idx: usize) -> PathBuf {
    block_dir.join(format!("{}.col", col_idx))
}

/// Metadata persisted next to a block's column files when it is sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockFileMeta {
    pub rows: u32,
    pub checksum_type: ChecksumType,
}

/// A segment file: the directory holding the blocks of one segment.
pub struct SegmentFile {
    directory: PathBuf,
    segment_id: SegmentId,
}

impl SegmentFile {
    /// Create the segment directory if missing and open it.
    pub fn open(directory: impl Into<PathBuf>, segment_id: SegmentId) -> StorageResult<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            segment_id,
        })
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Open the file set of one block, creating its directory if missing.
    pub fn open_block(&self, id: BlockId, column_count: usize) -> StorageResult<Arc<BlockFile>> {
        let dir = self.directory.join(format!("blk_{}", id.block_id));
        std::fs::create_dir_all(&dir)?;
        Ok(Arc::new(BlockFile {
            dir,
            id,
            column_count,
            meta: RwLock::new(None),
        }))
    }
}

/// The file set of one block: one column file per schema column.
pub struct BlockFile {
    dir: PathBuf,
    id: BlockId,
    column_count: usize,
    meta: RwLock<Option<BlockFileMeta>>,
}

impl BlockFile {
    pub fn block_id(&self) -> BlockId {
        self.id
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn open_column(&self, col_idx: usize) -> StorageResult<ColumnFile> {
        assert!(col_idx < self.column_count, "column index out of range");
        Ok(ColumnFile {
            path: path_of_column(&self.dir, col_idx),
        })
    }

    /// Write all column files and the metadata file. Called once, at seal.
    pub fn write_columns(
        &self,
        columns: &[ArrayImpl],
        checksum_type: ChecksumType,
    ) -> StorageResult<()> {
        assert_eq!(columns.len(), self.column_count);
        let rows = columns.first().map(|c| c.len() as u32).unwrap_or(0);
        for (idx, column) in columns.iter().enumerate() {
            let data = encode_column(column, checksum_type);
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path_of_column(&self.dir, idx))?;
            file.write_all(&data)?;
            file.sync_data()?;
        }
        let meta = BlockFileMeta {
            rows,
            checksum_type,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.dir.join(BLOCK_META_FILE_NAME))?;
        file.write_all(&serde_json::to_vec(&meta)?)?;
        file.sync_data()?;
        *self.meta.write() = Some(meta);
        debug!(block = %self.id, rows, "block column files written");
        Ok(())
    }

    fn load_meta(&self) -> StorageResult<BlockFileMeta> {
        if let Some(meta) = self.meta.read().clone() {
            return Ok(meta);
        }
        let mut data = Vec::new();
        let mut file = std::fs::File::open(self.dir.join(BLOCK_META_FILE_NAME))?;
        file.read_to_end(&mut data)?;
        let meta: BlockFileMeta = serde_json::from_slice(&data)?;
        *self.meta.write() = Some(meta.clone());
        Ok(meta)
    }

    /// Row count of the sealed block, from its metadata file. Falls back to
    /// the column-file header when the metadata file is missing.
    pub fn read_rows(&self) -> StorageResult<u32> {
        match self.load_meta() {
            Ok(meta) => Ok(meta.rows),
            Err(_) => {
                let vfile = self.make_virtual_part_file(0)?;
                let data = vfile.read_bytes()?;
                decode_row_count(&data)
            }
        }
    }

    /// A [`VirtualFile`] windowing the whole column file of `col_idx`.
    pub fn make_virtual_part_file(&self, col_idx: usize) -> StorageResult<VirtualFile> {
        let column = self.open_column(col_idx)?;
        let length = column.on_disk_size()?;
        let file = column.open_data_file()?;
        Ok(VirtualFile::Part(PartFile::new(file, 0, length)))
    }

    /// Ask the OS to fault the column file into the page cache ahead of a
    /// scan. Fire-and-forget; errors are logged, not surfaced.
    pub fn prefetch_part(&self, col_idx: usize) {
        let path = path_of_column(&self.dir, col_idx);
        let id = self.id;
        let spawned = std::thread::Builder::new()
            .name("part-prefetch".into())
            .spawn(move || {
                let mut data = Vec::new();
                if let Err(e) =
                    std::fs::File::open(&path).and_then(|mut f| f.read_to_end(&mut data))
                {
                    debug!(block = %id, col_idx, "prefetch failed: {}", e);
                }
            });
        if let Err(e) = spawned {
            warn!(block = %id, col_idx, "failed to spawn prefetch thread: {}", e);
        }
    }

    /// Decode one column file.
    pub fn read_column(&self, col_idx: usize, ty: &DataType) -> StorageResult<ArrayImpl> {
        let vfile = self.make_virtual_part_file(col_idx)?;
        let data = vfile.read_bytes()?;
        decode_column(ty, &data)
    }

    /// Decode every column file into one chunk.
    pub fn load_batch(&self, types: &[DataType]) -> StorageResult<DataChunk> {
        assert_eq!(types.len(), self.column_count);
        let mut arrays = Vec::with_capacity(types.len());
        for (idx, ty) in types.iter().enumerate() {
            arrays.push(self.read_column(idx, ty)?);
        }
        Ok(arrays.into_iter().collect())
    }
}

/// One column file of one block.
pub struct ColumnFile {
    path: PathBuf,
}

impl ColumnFile {
    /// Open the underlying data file for reading.
    pub fn open_data_file(&self) -> StorageResult<ColumnReadableFile> {
        let file = OpenOptions::new().read(true).open(&self.path)?;
        #[cfg(unix)]
        return Ok(ColumnReadableFile::PositionedRead(Arc::new(file)));
        #[cfg(not(unix))]
        Ok(ColumnReadableFile::NormalRead(Arc::new(Mutex::new(file))))
    }

    pub fn on_disk_size(&self) -> StorageResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::array::I32Array;
    use crate::types::{DataTypeExt, DataTypeKind};

    #[test]
    fn test_write_and_reload_block() {
        let tempdir = TempDir::new().unwrap();
        let seg = SegmentFile::open(tempdir.path().join("seg_0"), 0).unwrap();
        let block_file = seg.open_block(BlockId::new(0, 1, 0, 7), 2).unwrap();

        let pk: I32Array = (0..100).map(Some).collect();
        let v: I32Array = (0..100).map(|x| Some(x * 10)).collect();
        block_file
            .write_columns(
                &[ArrayImpl::Int32(pk), ArrayImpl::Int32(v)],
                ChecksumType::Crc32,
            )
            .unwrap();

        assert_eq!(block_file.read_rows().unwrap(), 100);
        let chunk = block_file
            .load_batch(&[
                DataTypeKind::Int32.not_null(),
                DataTypeKind::Int32.not_null(),
            ])
            .unwrap();
        assert_eq!(chunk.cardinality(), 100);
        assert_eq!(chunk.array_at(1).get(3), crate::types::DataValue::Int32(30));
    }

    #[test]
    fn test_virtual_part_file_window() {
        let tempdir = TempDir::new().unwrap();
        let seg = SegmentFile::open(tempdir.path().join("seg_0"), 0).unwrap();
        let block_file = seg.open_block(BlockId::new(0, 1, 0, 0), 1).unwrap();
        let pk: I32Array = (0..10).map(Some).collect();
        block_file
            .write_columns(&[ArrayImpl::Int32(pk)], ChecksumType::Crc32)
            .unwrap();

        let vfile = block_file.make_virtual_part_file(0).unwrap();
        let array =
            decode_column(&DataTypeKind::Int32.not_null(), &vfile.read_bytes().unwrap()).unwrap();
        assert_eq!(array.len(), 10);
    }
}
