// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

use std::path::PathBuf;

use super::ChecksumType;

/// Options for the block engine.
#[derive(Clone, Debug)]
pub struct StorageOptions {
    /// Root directory of segment files.
    pub path: PathBuf,
    /// Capacity of the buffer manager, in bytes.
    pub cache_size: u64,
    /// Checksum used when sealing column files.
    pub checksum_type: ChecksumType,
    /// Whether sealed column parts warm the page cache ahead of scans.
    pub prefetch_on_open: bool,
}

impl StorageOptions {
    pub fn default_for_test(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache_size: 1 << 20,
            checksum_type: ChecksumType::Crc32,
            prefetch_on_open: false,
        }
    }
}
