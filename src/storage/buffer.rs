// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! A shared node cache mapping a virtual file to a pinnable in-memory
//! materialization of one column.
//!
//! Pinning is reference counting: [`NodeHandle::pin`] returns a
//! [`PinnedVector`] whose inner `Arc` keeps the materialized vector alive
//! even if the cache evicts the node underneath; dropping the pin releases
//! it. Eviction is weighted by the vector's estimated byte size and is
//! entirely this module's concern.

use std::sync::Arc;

use moka::sync::Cache;

use super::{StorageResult, VirtualFile};
use crate::array::ArrayImpl;
use crate::catalog::BlockId;

/// Key of one cached column node: which block, which column.
#[derive(Clone, Hash, PartialEq, Eq, Debug)]
pub struct NodeKey {
    pub block: BlockId,
    pub column: u32,
}

/// Builds the typed vector for a node from its virtual file. The
/// constructor is chosen by the column part: decode-from-file for
/// persistent parts, scalar or variable-length for transient ones.
pub type VectorConstructor = Arc<dyn Fn(&VirtualFile) -> StorageResult<ArrayImpl> + Send + Sync>;

/// A shared cache of materialized column vectors.
pub struct BufferManager {
    cache: Cache<NodeKey, Arc<ArrayImpl>>,
}

impl BufferManager {
    pub fn new(capacity_bytes: u64) -> Arc<Self> {
        let cache = Cache::builder()
            .max_capacity(capacity_bytes)
            .weigher(|_key: &NodeKey, vec: &Arc<ArrayImpl>| {
                vec.estimated_size().min(u32::MAX as usize) as u32
            })
            .build();
        Arc::new(Self { cache })
    }

    /// Register a node for one column of one block.
    pub fn create_node(
        self: &Arc<Self>,
        key: NodeKey,
        vfile: VirtualFile,
        preload: bool,
        constructor: VectorConstructor,
    ) -> StorageResult<NodeHandle> {
        let handle = NodeHandle {
            key,
            vfile,
            constructor,
            mgr: self.clone(),
        };
        if preload {
            let _ = handle.pin()?;
        }
        Ok(handle)
    }

    fn pin(&self, handle: &NodeHandle) -> StorageResult<PinnedVector> {
        let vec = self
            .cache
            .try_get_with(handle.key.clone(), || {
                (handle.constructor)(&handle.vfile).map(Arc::new)
            })
            .map_err(Into::<super::TracedStorageError>::into)?;
        Ok(PinnedVector { vec })
    }

    fn invalidate(&self, key: &NodeKey) {
        self.cache.invalidate(key);
    }
}

/// Handle of one cached column node.
#[derive(Clone)]
pub struct NodeHandle {
    key: NodeKey,
    vfile: VirtualFile,
    constructor: VectorConstructor,
    mgr: Arc<BufferManager>,
}

impl NodeHandle {
    /// Materialize the vector, faulting it in from the virtual file if it
    /// is not cached. May block on I/O; callers must not hold any block or
    /// MVCC lock across this call.
    pub fn pin(&self) -> StorageResult<PinnedVector> {
        self.mgr.pin(self)
    }

    /// Size of the backing byte range.
    pub fn capacity(&self) -> u64 {
        self.vfile.size()
    }

    pub fn virtual_file(&self) -> &VirtualFile {
        &self.vfile
    }

    /// Drop the cached materialization. In-flight pins stay alive until
    /// they are dropped.
    pub fn invalidate(&self) {
        self.mgr.invalidate(&self.key);
    }
}

/// A pinned, materialized column vector. Unpin by dropping.
pub struct PinnedVector {
    vec: Arc<ArrayImpl>,
}

impl PinnedVector {
    /// Share the underlying vector without copying it.
    pub fn to_shared(&self) -> Arc<ArrayImpl> {
        self.vec.clone()
    }
}

impl std::ops::Deref for PinnedVector {
    type Target = ArrayImpl;

    fn deref(&self) -> &ArrayImpl {
        &self.vec
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::array::I32Array;

    fn test_key(column: u32) -> NodeKey {
        NodeKey {
            block: BlockId::default(),
            column,
        }
    }

    #[test]
    fn test_pin_caches_materialization() {
        let mgr = BufferManager::new(1 << 20);
        let loads = Arc::new(AtomicUsize::new(0));
        let loads2 = loads.clone();
        let constructor: VectorConstructor = Arc::new(move |_vfile| {
            loads2.fetch_add(1, Ordering::SeqCst);
            Ok(ArrayImpl::Int32((0..16).map(Some).collect::<I32Array>()))
        });
        let handle = mgr
            .create_node(test_key(0), VirtualFile::mem(64), false, constructor)
            .unwrap();

        let pinned = handle.pin().unwrap();
        assert_eq!(pinned.len(), 16);
        let again = handle.pin().unwrap();
        assert_eq!(again.len(), 16);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pin_survives_invalidation() {
        let mgr = BufferManager::new(1 << 20);
        let constructor: VectorConstructor =
            Arc::new(|_vfile| Ok(ArrayImpl::Int32((0..4).map(Some).collect::<I32Array>())));
        let handle = mgr
            .create_node(test_key(1), VirtualFile::mem(16), false, constructor)
            .unwrap();

        let pinned = handle.pin().unwrap();
        handle.invalidate();
        // the pin keeps the vector alive after eviction
        assert_eq!(pinned.len(), 4);
        // and a fresh pin re-materializes
        let fresh = handle.pin().unwrap();
        assert_eq!(fresh.len(), 4);
    }
}
