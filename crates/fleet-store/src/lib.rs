#![deny(missing_docs)]

//! # fleet-store — Records and Storage Seams
//!
//! Typed records for nodes, conductors and inspection data, and the
//! repository traits the conductor talks to:
//!
//! - [`NodeStore`]: node records, with the reservation compare-and-swap
//!   and an optimistic version check on writes.
//! - [`ConductorRegistry`]: conductor registration and heartbeats.
//! - [`InventoryStore`]: per-node inspection data.
//!
//! The [`memory`] module provides in-process engines for all three.

pub mod conductor;
pub mod error;
pub mod inventory;
pub mod memory;
pub mod node;
pub mod repository;

pub use conductor::ConductorRecord;
pub use error::StoreError;
pub use inventory::InspectionData;
pub use memory::{InMemoryConductorRegistry, InMemoryInventoryStore, InMemoryNodeStore};
pub use node::{DriverInternalInfo, InternalEntry, Node};
pub use repository::{ConductorRegistry, InventoryStore, NodeStore};
