#![deny(missing_docs)]

//! # fleet-state — Node State Machines
//!
//! Pure state logic for fleet nodes. Nothing here performs I/O or holds a
//! lock; callers persist the results.
//!
//! ## State Machines
//!
//! - **Provision** (`provision.rs`): the provisioning lifecycle with a
//!   static `(state, event) -> (next state, target policy)` table.
//!   Inspection is the workflow exercised end to end:
//!   `manageable → inspecting → {manageable | inspect wait | inspect failed}`.
//!
//! - **Power** (`power.rs`): power state enumeration, carried on the node
//!   record but outside provisioning logic.

pub mod power;
pub mod provision;

pub use power::PowerState;
pub use provision::{
    allowed_events, check_transition, fire, require_state, ProvisionEvent, ProvisionState,
    TargetPolicy, Transition, TransitionError, TRANSITIONS,
};
