// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

use serde::{Deserialize, Serialize};

use super::{StorageResult, TracedStorageError};

/// Checksum algorithm recorded in a column file header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumType {
    None,
    Crc32,
}

impl ChecksumType {
    pub fn to_tag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Crc32 => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Crc32),
            _ => None,
        }
    }
}

pub fn build_checksum(checksum_type: ChecksumType, data: &[u8]) -> u64 {
    match checksum_type {
        ChecksumType::None => 0,
        ChecksumType::Crc32 => crc32fast::hash(data) as u64,
    }
}

pub fn verify_checksum(
    checksum_type: ChecksumType,
    data: &[u8],
    expected: u64,
) -> StorageResult<()> {
    let found = build_checksum(checksum_type, data);
    if found != expected {
        return Err(TracedStorageError::checksum(found, expected));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify() {
        let data = b"basalt";
        let sum = build_checksum(ChecksumType::Crc32, data);
        verify_checksum(ChecksumType::Crc32, data, sum).unwrap();
        assert!(verify_checksum(ChecksumType::Crc32, data, sum + 1).is_err());
        verify_checksum(ChecksumType::None, data, 0).unwrap();
    }
}
