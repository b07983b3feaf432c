#![deny(missing_docs)]

//! # fleet-conductor — Node Lifecycle on a Conductor
//!
//! The conductor side of the fleet lifecycle core:
//!
//! - [`task_manager`]: per-node reservation lock with fail-fast
//!   acquisition, re-entrant holds and stale-holder takeover.
//! - [`driver`]: the hardware driver seam and registry.
//! - [`inspection`]: the hardware inspection workflow.
//! - [`conductor`]: registration, heartbeats, periodic maintenance and the
//!   bounded worker pool.
//!
//! ## Crate Policy
//!
//! - Every node mutation goes through a [`Task`].
//! - Driver calls run on the blocking pool, never on the async dispatch path.
//! - No `.unwrap()` outside tests.

mod blocking;
pub mod conductor;
pub mod driver;
pub mod error;
pub mod inspection;
pub mod metrics;
pub mod periodic;
pub mod task_manager;

pub use conductor::Conductor;
pub use driver::{DriverError, DriverRegistry, HardwareDriver};
pub use error::ConductorError;
pub use inspection::{
    abort_inspection, begin_inspection, check_inspect_wait_timeouts, complete_inspection,
    inspect_hardware, InspectionOutcome, ABORTED_BY_REQUEST, INSPECT_WAIT_TIMEOUT,
};
pub use periodic::{spawn_periodic, PeriodicHandle};
pub use task_manager::{Task, TaskManager};
