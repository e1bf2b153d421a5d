// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! Basalt is the block-level data engine of a column-oriented,
//! transactional analytic storage layer.
//!
//! A table is partitioned into segments, a segment into fixed-maximum-row
//! blocks, and a block stores each column as an independent file. This
//! crate implements the per-block engine: the [`storage::block::Block`]
//! façade, its MVCC handle (per-column update chains, a range-delete
//! chain and visibility arithmetic) and its buffer-managed column parts.
//! Transaction coordination, the catalog, the write-ahead log and the
//! global task scheduler are external collaborators, represented here
//! only by the interfaces the engine consumes.

#![deny(unused_must_use)]

pub mod array;
pub mod catalog;
pub mod storage;
pub mod types;
