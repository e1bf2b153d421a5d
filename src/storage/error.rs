// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

use std::backtrace::Backtrace;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{ColumnId, RowOffset};

/// The error type of the block engine.
///
/// Conflicts and `NotFound` are surfaced to the calling transaction, which
/// decides whether to abort or retry. I/O and decode errors propagate
/// upward. Invariant violations are programmer errors and panic instead of
/// taking a variant here.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{0}({1}) not found")]
    NotFound(&'static str, String),
    #[error("duplicated {0}: {1}")]
    Duplicated(&'static str, String),
    #[error("rows [{0}, {1}] already deleted")]
    AlreadyDeleted(RowOffset, RowOffset),
    #[error("write conflict on row {0}")]
    WriteConflict(RowOffset),
    #[error("block is read only")]
    ReadOnlyBlock,
    #[error("block is not appendable")]
    NotAppendable,
    #[error("append of {0} rows exceeds remaining capacity {1}")]
    BlockFull(u32, u32),
    #[error("transaction cancelled")]
    Cancelled,
    #[error("invalid column id: {0}")]
    InvalidColumn(ColumnId),
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),
    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid checksum: found {0}, expected {1}")]
    Checksum(u64, u64),
    #[error("{0}")]
    Nested(Arc<TracedStorageError>),
}

/// [`StorageError`] with a backtrace captured at construction.
pub struct TracedStorageError {
    source: StorageError,
    backtrace: Backtrace,
}

impl std::error::Error for TracedStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

impl std::fmt::Display for TracedStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.source, self.backtrace)
    }
}

impl std::fmt::Debug for TracedStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.source)
    }
}

impl From<StorageError> for TracedStorageError {
    fn from(source: StorageError) -> Self {
        Self {
            source,
            backtrace: Backtrace::capture(),
        }
    }
}

impl From<std::io::Error> for TracedStorageError {
    fn from(e: std::io::Error) -> TracedStorageError {
        StorageError::Io(e.into()).into()
    }
}

impl From<serde_json::Error> for TracedStorageError {
    fn from(e: serde_json::Error) -> TracedStorageError {
        StorageError::JsonDecode(e).into()
    }
}

impl From<Arc<TracedStorageError>> for TracedStorageError {
    fn from(e: Arc<TracedStorageError>) -> TracedStorageError {
        StorageError::Nested(e).into()
    }
}

impl TracedStorageError {
    /// The wrapped error, for matching on the failure kind.
    pub fn kind(&self) -> &StorageError {
        &self.source
    }

    pub fn not_found(ty: &'static str, item: impl ToString) -> Self {
        StorageError::NotFound(ty, item.to_string()).into()
    }

    pub fn duplicated(ty: &'static str, item: impl ToString) -> Self {
        StorageError::Duplicated(ty, item.to_string()).into()
    }

    pub fn already_deleted(start: RowOffset, end: RowOffset) -> Self {
        StorageError::AlreadyDeleted(start, end).into()
    }

    pub fn write_conflict(row: RowOffset) -> Self {
        StorageError::WriteConflict(row).into()
    }

    pub fn read_only() -> Self {
        StorageError::ReadOnlyBlock.into()
    }

    pub fn not_appendable() -> Self {
        StorageError::NotAppendable.into()
    }

    pub fn block_full(requested: u32, remaining: u32) -> Self {
        StorageError::BlockFull(requested, remaining).into()
    }

    pub fn cancelled() -> Self {
        StorageError::Cancelled.into()
    }

    pub fn decode(message: impl ToString) -> Self {
        StorageError::Decode(message.to_string()).into()
    }

    pub fn checksum(found: u64, expected: u64) -> Self {
        StorageError::Checksum(found, expected).into()
    }
}

pub type StorageResult<T> = std::result::Result<T, TracedStorageError>;
