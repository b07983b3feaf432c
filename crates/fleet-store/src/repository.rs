//! # Repository Traits
//!
//! The storage seams of the lifecycle core. Engines implement these for
//! whatever durable store backs a deployment; [`crate::memory`] provides
//! in-process engines used by tests and single-process setups.
//!
//! ## Write Rules
//!
//! - `reservation` changes only through [`NodeStore::swap_reservation()`],
//!   a compare-and-swap. [`NodeStore::save()`] never touches it.
//! - Every successful write bumps `version`. `save()` is rejected with
//!   [`StoreError::VersionConflict`] when the caller's copy is stale.

use fleet_core::{ConductorId, NodeId, Timestamp};

use crate::conductor::ConductorRecord;
use crate::error::StoreError;
use crate::inventory::InspectionData;
use crate::node::Node;

/// Durable storage of node records.
pub trait NodeStore: Send + Sync {
    /// Insert a new node. Fails with `DuplicateNode` if the id is taken.
    fn create(&self, node: Node) -> Result<Node, StoreError>;

    /// Fetch a node by id.
    fn get(&self, id: &NodeId) -> Result<Node, StoreError>;

    /// All nodes, in no particular order.
    fn list(&self) -> Result<Vec<Node>, StoreError>;

    /// Write back a node read earlier. `node.version` must match the stored
    /// version. The stored `reservation` and `created_at` are preserved.
    /// Returns the record as stored.
    fn save(&self, node: &Node) -> Result<Node, StoreError>;

    /// Atomically set `reservation` to `new` if it currently equals
    /// `expected`. Returns the record as stored.
    fn swap_reservation(
        &self,
        id: &NodeId,
        expected: Option<&ConductorId>,
        new: Option<&ConductorId>,
    ) -> Result<Node, StoreError>;
}

/// Registry of conductor processes and their heartbeats.
pub trait ConductorRegistry: Send + Sync {
    /// Register (or re-register) a conductor as online.
    fn register(
        &self,
        hostname: &ConductorId,
        drivers: Vec<String>,
        at: Timestamp,
    ) -> Result<ConductorRecord, StoreError>;

    /// Refresh a conductor's heartbeat.
    fn heartbeat(&self, hostname: &ConductorId, at: Timestamp) -> Result<(), StoreError>;

    /// Mark a conductor offline.
    fn unregister(&self, hostname: &ConductorId) -> Result<(), StoreError>;

    /// Look up a conductor.
    fn get(&self, hostname: &ConductorId) -> Result<ConductorRecord, StoreError>;

    /// All registered conductors, online or not.
    fn list(&self) -> Result<Vec<ConductorRecord>, StoreError>;
}

/// Storage of per-node inspection data.
pub trait InventoryStore: Send + Sync {
    /// Store inspection data, replacing any earlier data for the node.
    fn put(&self, node: &NodeId, data: InspectionData) -> Result<(), StoreError>;

    /// Fails with `InventoryNotFound` if nothing is stored.
    fn get(&self, node: &NodeId) -> Result<InspectionData, StoreError>;

    /// Remove stored data. Removing absent data is not an error.
    fn delete(&self, node: &NodeId) -> Result<(), StoreError>;
}
