// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! A uniform byte-range interface over memory or segment-file-backed
//! storage.

use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::StorageResult;

/// The backing of a readable column file.
#[derive(Clone)]
pub enum ColumnReadableFile {
    /// For `read_at`
    #[cfg(unix)]
    PositionedRead(Arc<std::fs::File>),
    /// For `file.lock().seek().read()`
    NormalRead(Arc<Mutex<std::fs::File>>),
}

impl ColumnReadableFile {
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> StorageResult<()> {
        match self {
            #[cfg(unix)]
            ColumnReadableFile::PositionedRead(file) => {
                use std::os::unix::fs::FileExt;
                file.read_exact_at(buf, offset)?;
            }
            ColumnReadableFile::NormalRead(file) => {
                let mut file = file.lock().unwrap();
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)?;
            }
        }
        Ok(())
    }
}

/// A window into one column file of one block on disk.
#[derive(Clone)]
pub struct PartFile {
    file: ColumnReadableFile,
    offset: u64,
    length: u64,
}

impl PartFile {
    pub fn new(file: ColumnReadableFile, offset: u64, length: u64) -> Self {
        Self {
            file,
            offset,
            length,
        }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    fn read_into(&self, scratch: &mut Vec<u8>) -> StorageResult<()> {
        scratch.clear();
        scratch.resize(self.length as usize, 0);
        self.file.read_exact_at(&mut scratch[..], self.offset)
    }
}

/// An abstraction over a contiguous byte range, either transient in memory
/// or backed by a region of a segment file.
#[derive(Clone)]
pub enum VirtualFile {
    /// Transient range, bounded by a capacity. Appendable base vectors are
    /// served from the live node, so a memory file carries no payload.
    Mem { capacity: u64 },
    /// Persistent range backed by a segment column file.
    Part(PartFile),
}

impl VirtualFile {
    pub fn mem(capacity: u64) -> Self {
        Self::Mem { capacity }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Mem { capacity } => *capacity,
            Self::Part(part) => part.length(),
        }
    }

    /// Read the whole range. Memory files carry no payload to read.
    pub fn read_bytes(&self) -> StorageResult<Bytes> {
        let mut scratch = Vec::new();
        self.read_with_buffer(&mut scratch)?;
        Ok(Bytes::from(scratch))
    }

    /// Read the whole range through a caller-provided scratch buffer, so a
    /// scanning caller can reuse its allocation across columns.
    pub fn read_with_buffer(&self, scratch: &mut Vec<u8>) -> StorageResult<()> {
        match self {
            Self::Mem { .. } => panic!("cannot read a transient memory file"),
            Self::Part(part) => part.read_into(scratch),
        }
    }
}
