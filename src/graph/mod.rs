/// Graph Management Layer
///
/// This module owns node instances, the connection indices and everything that
/// persists a graph:
/// - Type definitions (NodeId, PinId, Connection, snapshots)
/// - Lock-free hot-swap node class registry using ArcSwap
/// - Graph owned value tables and return slot
/// - JSON persistence and incremental reconciliation

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Ids, pins, connections and the persisted record format
pub mod types;

// Hot-swap node class registry
pub mod registry;

// STOREDVALUES / INPUTVALUES / DYNAMICINPUTVALUES and the return slot
pub mod values;

// The Graph itself: nodes, connection indices, topology edits
pub mod dataflow;

// Save/load/update of graph snapshots
pub mod storage;

// Re-export commonly used types
pub use dataflow::{Graph, NodeHandle};
pub use registry::NodeRegistry;
pub use types::{Connection, GraphSnapshot, NodeId, NodeRecord, PinId, PinKind, PinRecord};
pub use values::{ReturnSlot, ReturnState, ValueStore};

/// Lock a mutex, recovering the data if a node panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
