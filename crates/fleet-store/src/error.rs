//! Storage errors.

use fleet_core::{ConductorId, NodeId};

/// Errors from node, conductor and inventory storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No node with this id exists.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// A node with this id was already created.
    #[error("node {0} already exists")]
    DuplicateNode(NodeId),

    /// The compare-and-swap on `reservation` saw a different holder.
    #[error(
        "reservation of node {node} is {current}, expected {expected}",
        current = holder_label(.current),
        expected = holder_label(.expected)
    )]
    ReservationMismatch {
        /// Node whose reservation was compared.
        node: NodeId,
        /// Holder the caller expected.
        expected: Option<ConductorId>,
        /// Holder actually stored.
        current: Option<ConductorId>,
    },

    /// The record was written by someone else since it was read.
    #[error("node {node} was modified concurrently: expected version {expected}, found {actual}")]
    VersionConflict {
        /// Node being saved.
        node: NodeId,
        /// Version the caller read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// The conductor never registered.
    #[error("conductor {0} is not registered")]
    ConductorNotFound(ConductorId),

    /// Nothing was stored for the node, or storage is disabled.
    #[error("no inspection data stored for node {0}")]
    InventoryNotFound(NodeId),

    /// Failure inside a storage engine.
    #[error("storage backend error: {0}")]
    Backend(String),
}

fn holder_label(holder: &Option<ConductorId>) -> &str {
    holder.as_ref().map_or("<unreserved>", ConductorId::as_str)
}
