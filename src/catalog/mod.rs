// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! Column descriptors and the per-block schema.

use serde::{Deserialize, Serialize};

use crate::types::{DatabaseId, SegmentId, TableId};

mod column;
mod schema;

pub use self::column::*;
pub use self::schema::*;

/// Stable identifier of a block: which table, which segment, which block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    pub database_id: DatabaseId,
    pub table_id: TableId,
    pub segment_id: SegmentId,
    pub block_id: u32,
}

impl BlockId {
    pub fn new(database_id: DatabaseId, table_id: TableId, segment_id: SegmentId, block_id: u32) -> Self {
        Self {
            database_id,
            table_id,
            segment_id,
            block_id,
        }
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.database_id, self.table_id, self.segment_id, self.block_id
        )
    }
}
