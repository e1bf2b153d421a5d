// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! Compaction task factories.
//!
//! The scheduler polls [`Block::estimate_score`] and, for chosen
//! candidates, asks for a factory. The factory is an opaque descriptor;
//! invoking it yields the task that seals an appendable node into column
//! files, or folds a sealed block's committed changes back into them.

use std::sync::Arc;

use tracing::info;

use super::Block;
use crate::catalog::BlockId;
use crate::storage::StorageResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionTaskKind {
    /// Rewrite a sealed block's files, or seal a full appendable block.
    CompactBlock,
    /// Seal a non-full appendable block whose churn justifies it.
    CompactAppendableBlock,
}

/// Descriptor handed to the task scheduler.
pub struct CompactionTaskFactory {
    kind: CompactionTaskKind,
    block: Arc<Block>,
}

impl CompactionTaskFactory {
    pub fn kind(&self) -> CompactionTaskKind {
        self.kind
    }

    /// The blocks this task will touch, for scheduler-side conflict
    /// detection.
    pub fn scopes(&self) -> Vec<BlockId> {
        vec![self.block.id()]
    }

    /// Instantiate the task.
    pub fn build(&self) -> CompactionTask {
        CompactionTask {
            kind: self.kind,
            block: self.block.clone(),
        }
    }
}

/// A runnable compaction step over one block.
pub struct CompactionTask {
    kind: CompactionTaskKind,
    block: Arc<Block>,
}

impl CompactionTask {
    pub fn kind(&self) -> CompactionTaskKind {
        self.kind
    }

    pub fn run(&self) -> StorageResult<()> {
        match self.kind {
            CompactionTaskKind::CompactAppendableBlock => self.block.seal(),
            CompactionTaskKind::CompactBlock => {
                if self.block.is_appendable_mode() {
                    self.block.seal()
                } else {
                    self.block.checkpoint_committed_changes()
                }
            }
        }
    }
}

impl Block {
    /// Choose the compaction task for this block, or `None` when it is
    /// ineligible (dropped, or a transaction still holds uncommitted
    /// state on it). Never errors.
    pub fn build_compaction_task_factory(
        self: &Arc<Self>,
    ) -> Option<CompactionTaskFactory> {
        if self.is_dropped() {
            return None;
        }
        if self.mvcc().has_uncommitted() {
            return None;
        }
        if self.has_pending_append() {
            return None;
        }
        let kind = if !self.is_appendable_mode() || !self.is_appendable() {
            CompactionTaskKind::CompactBlock
        } else {
            CompactionTaskKind::CompactAppendableBlock
        };
        info!(block = %self.id(), ?kind, "built compaction task factory");
        Some(CompactionTaskFactory {
            kind,
            block: self.clone(),
        })
    }
}
