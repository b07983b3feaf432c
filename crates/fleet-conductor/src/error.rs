//! Conductor errors.
//!
//! [`ConductorError`] is the error surface of every conductor operation.
//! Storage errors convert into it with `?`; a missing node becomes
//! [`ConductorError::NotFound`] rather than a generic storage failure.

use fleet_core::{ConductorId, ConfigError, NodeId};
use fleet_state::TransitionError;
use fleet_store::StoreError;

/// Errors raised by the task manager, the workflows and the conductor.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// Another live conductor holds the node's reservation.
    #[error("node {node} is locked by conductor {holder}")]
    LockConflict {
        /// Node that was requested.
        node: NodeId,
        /// Conductor currently holding it.
        holder: ConductorId,
    },

    /// No node with this id exists.
    #[error("node {0} not found")]
    NotFound(NodeId),

    /// The node is not in a state that allows the requested step.
    #[error(transparent)]
    InvalidStateTransition(#[from] TransitionError),

    /// Inspection failed. Displays exactly the recorded message.
    #[error("{0}")]
    InspectionFailure(String),

    /// The node names a driver this conductor does not have.
    #[error("driver '{0}' is not loaded on this conductor")]
    DriverNotFound(String),

    /// The reservation was cleared or taken over while a task was open.
    #[error("reservation of node {node} is no longer held by {holder}")]
    ReservationLost {
        /// Node whose reservation changed.
        node: NodeId,
        /// Holder that lost it.
        holder: ConductorId,
    },

    /// The conductor configuration is unusable.
    #[error("invalid conductor configuration: {0}")]
    Config(#[from] ConfigError),

    /// Every worker is busy; the request was not queued.
    #[error("no free worker available to process the request")]
    NoFreeWorker,

    /// Any other storage failure.
    #[error("storage error: {0}")]
    Store(StoreError),

    /// A worker running a driver call died before returning.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl From<StoreError> for ConductorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NodeNotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}
