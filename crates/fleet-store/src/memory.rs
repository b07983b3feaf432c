//! # In-Memory Storage Engines
//!
//! Process-local implementations of the repository traits. Every
//! read-validate-write runs under a single write lock, so the reservation
//! compare-and-swap and the version check are atomic with respect to every
//! other caller sharing the same engine.
//!
//! Engines are cheap to clone; clones share the same underlying table.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

use fleet_core::{ConductorId, NodeId, Timestamp};

use crate::conductor::ConductorRecord;
use crate::error::StoreError;
use crate::inventory::InspectionData;
use crate::node::Node;
use crate::repository::{ConductorRegistry, InventoryStore, NodeStore};

// ─── Generic Table ───────────────────────────────────────────────────

/// Thread-safe, cloneable keyed table.
///
/// The lock is `parking_lot` and is never held across an `.await`, so a
/// panicking writer cannot poison it.
#[derive(Debug)]
struct Table<K, V> {
    data: Arc<RwLock<HashMap<K, V>>>,
}

impl<K, V> Clone for Table<K, V> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash, V: Clone> Table<K, V> {
    fn get(&self, key: &K) -> Option<V> {
        self.data.read().get(key).cloned()
    }

    fn list(&self) -> Vec<V> {
        self.data.read().values().cloned().collect()
    }

    fn insert(&self, key: K, value: V) -> Option<V> {
        self.data.write().insert(key, value)
    }

    /// Insert only if the key is absent. Returns whether it was inserted.
    fn insert_new(&self, key: K, value: V) -> bool {
        let mut guard = self.data.write();
        if guard.contains_key(&key) {
            return false;
        }
        guard.insert(key, value);
        true
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.data.write().remove(key)
    }

    /// Atomically read-validate-update an entry. `None` if the key is absent.
    fn try_update<R, E>(
        &self,
        key: &K,
        f: impl FnOnce(&mut V) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        self.data.write().get_mut(key).map(f)
    }
}

// ─── Nodes ───────────────────────────────────────────────────────────

/// In-memory [`NodeStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryNodeStore {
    nodes: Table<NodeId, Node>,
}

impl InMemoryNodeStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeStore for InMemoryNodeStore {
    fn create(&self, node: Node) -> Result<Node, StoreError> {
        let id = node.id;
        if self.nodes.insert_new(id, node.clone()) {
            Ok(node)
        } else {
            Err(StoreError::DuplicateNode(id))
        }
    }

    fn get(&self, id: &NodeId) -> Result<Node, StoreError> {
        self.nodes.get(id).ok_or(StoreError::NodeNotFound(*id))
    }

    fn list(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self.nodes.list())
    }

    fn save(&self, node: &Node) -> Result<Node, StoreError> {
        self.nodes
            .try_update(&node.id, |stored| {
                if stored.version != node.version {
                    return Err(StoreError::VersionConflict {
                        node: node.id,
                        expected: node.version,
                        actual: stored.version,
                    });
                }
                let reservation = stored.reservation.take();
                let created_at = stored.created_at;
                *stored = node.clone();
                stored.reservation = reservation;
                stored.created_at = created_at;
                stored.version += 1;
                stored.updated_at = Timestamp::now();
                Ok(stored.clone())
            })
            .unwrap_or(Err(StoreError::NodeNotFound(node.id)))
    }

    fn swap_reservation(
        &self,
        id: &NodeId,
        expected: Option<&ConductorId>,
        new: Option<&ConductorId>,
    ) -> Result<Node, StoreError> {
        self.nodes
            .try_update(id, |stored| {
                if stored.reservation.as_ref() != expected {
                    return Err(StoreError::ReservationMismatch {
                        node: *id,
                        expected: expected.cloned(),
                        current: stored.reservation.clone(),
                    });
                }
                stored.reservation = new.cloned();
                stored.version += 1;
                stored.updated_at = Timestamp::now();
                Ok(stored.clone())
            })
            .unwrap_or(Err(StoreError::NodeNotFound(*id)))
    }
}

// ─── Conductors ──────────────────────────────────────────────────────

/// In-memory [`ConductorRegistry`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryConductorRegistry {
    conductors: Table<ConductorId, ConductorRecord>,
}

impl InMemoryConductorRegistry {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConductorRegistry for InMemoryConductorRegistry {
    fn register(
        &self,
        hostname: &ConductorId,
        drivers: Vec<String>,
        at: Timestamp,
    ) -> Result<ConductorRecord, StoreError> {
        let mut record = ConductorRecord::new(hostname.clone(), drivers, at);
        if let Some(previous) = self.conductors.get(hostname) {
            record.created_at = previous.created_at;
        }
        self.conductors.insert(hostname.clone(), record.clone());
        Ok(record)
    }

    fn heartbeat(&self, hostname: &ConductorId, at: Timestamp) -> Result<(), StoreError> {
        self.conductors
            .try_update(hostname, |record| {
                record.updated_at = at;
                Ok(())
            })
            .unwrap_or_else(|| Err(StoreError::ConductorNotFound(hostname.clone())))
    }

    fn unregister(&self, hostname: &ConductorId) -> Result<(), StoreError> {
        self.conductors
            .try_update(hostname, |record| {
                record.online = false;
                Ok(())
            })
            .unwrap_or_else(|| Err(StoreError::ConductorNotFound(hostname.clone())))
    }

    fn get(&self, hostname: &ConductorId) -> Result<ConductorRecord, StoreError> {
        self.conductors
            .get(hostname)
            .ok_or_else(|| StoreError::ConductorNotFound(hostname.clone()))
    }

    fn list(&self) -> Result<Vec<ConductorRecord>, StoreError> {
        Ok(self.conductors.list())
    }
}

// ─── Inspection Data ─────────────────────────────────────────────────

/// In-memory [`InventoryStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryStore {
    data: Table<NodeId, InspectionData>,
}

impl InMemoryInventoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn put(&self, node: &NodeId, data: InspectionData) -> Result<(), StoreError> {
        self.data.insert(*node, data);
        Ok(())
    }

    fn get(&self, node: &NodeId) -> Result<InspectionData, StoreError> {
        self.data.get(node).ok_or(StoreError::InventoryNotFound(*node))
    }

    fn delete(&self, node: &NodeId) -> Result<(), StoreError> {
        self.data.remove(node);
        Ok(())
    }
}
