#![deny(missing_docs)]

//! # fleet-core — Foundational Types for the Fleet Lifecycle Core
//!
//! Leaf crate of the workspace. It defines the primitives every other crate
//! shares: identifier newtypes, the UTC timestamp used for heartbeats and
//! provision bookkeeping, and the explicit conductor configuration value.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `NodeId` and `ConductorId` are
//!    distinct types. A conductor hostname can never be passed where a node
//!    UUID is expected.
//!
//! 2. **Configuration is a value, not a global.** [`ConductorConfig`] is
//!    built once at startup and handed to each component that needs it.
//!
//! 3. **UTC-only timestamps.** [`Timestamp`] is always UTC at seconds
//!    precision, so heartbeat ages compare the same way on every conductor.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `fleet-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod config;
pub mod error;
pub mod identity;
pub mod temporal;

pub use config::{ConductorConfig, ConfigError, InventoryBackend};
pub use error::FleetError;
pub use identity::{ConductorId, NodeId};
pub use temporal::Timestamp;
