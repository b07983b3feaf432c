//! # Inspection Workflow
//!
//! Drives a node through hardware inspection:
//!
//! ```text
//! manageable | inspect failed --inspect--> inspecting
//! inspecting --done--> manageable          (driver finished)
//! inspecting --wait--> inspect wait        (driver continues out of band)
//! inspecting --fail--> inspect failed      (anything else)
//! inspect wait --done | fail | abort-->    manageable | inspect failed
//! ```
//!
//! The driver's result is first reduced to a decision, then exactly one
//! decision is applied and persisted through [`Task::update()`] before the
//! lock is released and the caller sees the result. Every failure is
//! recorded in `last_error` and logged at error level.
//!
//! Driver calls and the steps that follow them run on the blocking pool
//! and finish there even if the caller stops waiting. A worker that dies
//! before finishing leaves the node failed, never stuck in `inspecting`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, info, warn};

use fleet_core::{ConductorId, NodeId, Timestamp};
use fleet_state::{require_state, ProvisionEvent, ProvisionState};
use fleet_store::Node;

use crate::blocking::on_blocking_pool;
use crate::driver::{DriverError, HardwareDriver};
use crate::error::ConductorError;
use crate::metrics;
use crate::task_manager::{Task, TaskManager};

/// `last_error` recorded when an operator aborts an inspection.
pub const ABORTED_BY_REQUEST: &str = "Inspection was aborted by request.";

/// `last_error` recorded when a node sat in `inspect wait` for too long.
pub const INSPECT_WAIT_TIMEOUT: &str =
    "Timeout reached while waiting for hardware inspection to complete";

/// Error kind recorded for a driver that panicked.
const PANIC_KIND: &str = "panic";

/// How a finished inspection step left the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectionOutcome {
    /// Inspection finished; the node is `manageable`.
    Complete,
    /// Inspection continues out of band; the node is `inspect wait`.
    Wait,
}

/// What to do with the node after the driver returned.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Decision {
    Complete,
    Wait,
    Fail(String),
}

impl Decision {
    fn from_driver(node: NodeId, result: Result<Option<ProvisionState>, DriverError>) -> Self {
        match result {
            Ok(Some(ProvisionState::Manageable)) => Self::Complete,
            Ok(Some(ProvisionState::InspectWait)) => Self::Wait,
            Ok(other) => {
                let value = other.map_or("None", |state| state.as_str());
                let message = format!("driver returned unexpected state: {value}");
                error!(node = %node, "inspection failed: {message}");
                Self::Fail(message)
            }
            Err(DriverError::InspectionFailure(message)) => {
                error!(node = %node, "inspection failed: {message}");
                Self::Fail(message)
            }
            Err(DriverError::Unexpected { kind, message }) => {
                let message = format!("Unexpected exception of type {kind}: {message}");
                error!(node = %node, "inspection failed: {message}");
                Self::Fail(message)
            }
        }
    }
}

// ─── Workflow Steps ──────────────────────────────────────────────────

/// Move a node into `inspecting` and clear its previous error.
///
/// Accepted from `manageable` and `inspect failed`.
pub fn begin_inspection(task: &mut Task) -> Result<(), ConductorError> {
    let transition = task.update(|node| {
        let transition = node.apply_event(ProvisionEvent::Inspect)?;
        node.last_error = None;
        Ok(transition)
    })?;
    info!(node = %task.node_id(), from = %transition.from, "hardware inspection started");
    Ok(())
}

/// Run the driver's inspection on a node in `inspecting` and record the
/// result.
///
/// The lock is released before this returns, whatever the outcome.
pub async fn inspect_hardware(task: Task) -> Result<InspectionOutcome, ConductorError> {
    inspect_hardware_holding(task, ()).await
}

/// [`inspect_hardware()`], keeping `guard` alive until the workflow ends
/// on the blocking pool.
pub(crate) async fn inspect_hardware_holding<G>(
    task: Task,
    guard: G,
) -> Result<InspectionOutcome, ConductorError>
where
    G: Send + 'static,
{
    require_state(task.node().provision_state, ProvisionState::Inspecting)?;

    let manager = task.manager().clone();
    let node = task.node_id();
    let holder = task.holder().clone();
    let finished = on_blocking_pool(move || {
        let _guard = guard;
        let mut task = task;
        let result = call_driver(&mut task, |driver, task| driver.inspect_hardware(task));
        let decision = Decision::from_driver(task.node_id(), result);
        let outcome = apply(&mut task, decision);
        release(task);
        outcome
    })
    .await;

    match finished {
        Ok(outcome) => outcome,
        Err(err) => fail_interrupted(&manager, &node, &holder, err),
    }
}

/// Record the out-of-band completion of an inspection in `inspect wait`.
///
/// `Err(message)` fails the inspection with `message` as `last_error`.
pub fn complete_inspection(
    task: Task,
    result: Result<(), String>,
) -> Result<InspectionOutcome, ConductorError> {
    let mut task = task;
    require_state(task.node().provision_state, ProvisionState::InspectWait)?;

    let decision = match result {
        Ok(()) => Decision::Complete,
        Err(message) => {
            error!(node = %task.node_id(), "inspection failed: {message}");
            Decision::Fail(message)
        }
    };
    let outcome = apply(&mut task, decision);
    release(task);
    outcome
}

/// Abort an inspection waiting in `inspect wait`.
///
/// The driver is asked to stop first; if it refuses, the node is left
/// untouched.
pub async fn abort_inspection(task: Task) -> Result<(), ConductorError> {
    require_state(task.node().provision_state, ProvisionState::InspectWait)?;

    on_blocking_pool(move || {
        let mut task = task;
        if let Err(err) = call_driver(&mut task, |driver, task| driver.abort_inspection(task)) {
            let message = format!("Failed to abort inspection: {err}");
            error!(node = %task.node_id(), "{message}");
            return Err(ConductorError::InspectionFailure(message));
        }

        task.update(|node| {
            node.apply_event(ProvisionEvent::Abort)?;
            node.last_error = Some(ABORTED_BY_REQUEST.to_string());
            Ok(())
        })?;
        info!(node = %task.node_id(), "hardware inspection aborted");
        metrics::record_inspection("abort");
        release(task);
        Ok(())
    })
    .await?
}

/// Fail every node that has waited in `inspect wait` for longer than the
/// configured timeout. Nodes locked by someone else, or whose update
/// fails, are skipped until the next run. Returns the number of nodes
/// failed.
pub fn check_inspect_wait_timeouts(manager: &TaskManager) -> Result<usize, ConductorError> {
    let Some(timeout) = manager.config().inspect_wait_timeout else {
        return Ok(0);
    };
    let now = Timestamp::now();
    let timed_out = |node: &Node| {
        node.provision_state == ProvisionState::InspectWait
            && node
                .provision_updated_at
                .unwrap_or(node.updated_at)
                .is_older_than(&now, timeout)
    };

    let mut failed = 0;
    for node in manager.nodes().list()? {
        if !timed_out(&node) || node.is_reserved() {
            continue;
        }
        let mut task = match manager.acquire(&node.id, manager.host()) {
            Ok(task) => task,
            Err(ConductorError::LockConflict { .. } | ConductorError::NotFound(_)) => continue,
            Err(err) => {
                warn!(node = %node.id, error = %err, "cannot check inspection timeout");
                continue;
            }
        };
        if !timed_out(task.node()) {
            continue;
        }
        let updated = task.update(|node| {
            node.apply_event(ProvisionEvent::Fail)?;
            node.last_error = Some(INSPECT_WAIT_TIMEOUT.to_string());
            Ok(())
        });
        if let Err(err) = updated {
            warn!(node = %node.id, error = %err, "cannot fail timed out inspection");
            continue;
        }
        error!(node = %node.id, "inspection failed: {INSPECT_WAIT_TIMEOUT}");
        metrics::record_inspection("fail");
        failed += 1;
    }
    Ok(failed)
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn apply(task: &mut Task, decision: Decision) -> Result<InspectionOutcome, ConductorError> {
    match decision {
        Decision::Complete => {
            let purged = task.update(|node| {
                node.apply_event(ProvisionEvent::Done)?;
                node.last_error = None;
                Ok(node.driver_internal_info.purge_ephemeral())
            })?;
            info!(node = %task.node_id(), purged = purged.len(), "hardware inspection completed");
            metrics::record_inspection("complete");
            Ok(InspectionOutcome::Complete)
        }
        Decision::Wait => {
            task.update(|node| {
                node.apply_event(ProvisionEvent::Wait)?;
                Ok(())
            })?;
            info!(node = %task.node_id(), "waiting for hardware inspection to complete");
            metrics::record_inspection("wait");
            Ok(InspectionOutcome::Wait)
        }
        Decision::Fail(message) => {
            task.update(|node| {
                node.apply_event(ProvisionEvent::Fail)?;
                node.last_error = Some(message.clone());
                Ok(())
            })?;
            metrics::record_inspection("fail");
            Err(ConductorError::InspectionFailure(message))
        }
    }
}

/// Record an inspection whose worker died before finishing. The node is
/// failed unless it already left `inspecting`; `err` is returned when it
/// cannot be.
fn fail_interrupted(
    manager: &TaskManager,
    node: &NodeId,
    holder: &ConductorId,
    err: ConductorError,
) -> Result<InspectionOutcome, ConductorError> {
    let message = format!("Inspection was interrupted: {err}");
    error!(node = %node, "inspection failed: {message}");
    let mut task = match manager.acquire(node, holder) {
        Ok(task) => task,
        Err(acquire) => {
            warn!(node = %node, error = %acquire, "cannot record interrupted inspection");
            return Err(err);
        }
    };
    if task.node().provision_state != ProvisionState::Inspecting {
        return Err(err);
    }
    let outcome = apply(&mut task, Decision::Fail(message));
    release(task);
    outcome
}

/// Call the task's driver. A panicking driver is reported as an
/// undeclared error of kind `panic`.
fn call_driver<R>(
    task: &mut Task,
    call: impl FnOnce(&dyn HardwareDriver, &mut Task) -> Result<R, DriverError>,
) -> Result<R, DriverError> {
    let driver = Arc::clone(task.driver());
    panic::catch_unwind(AssertUnwindSafe(|| call(driver.as_ref(), task))).unwrap_or_else(
        |payload| Err(DriverError::unexpected(PANIC_KIND, panic_message(payload.as_ref()))),
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "driver panicked".to_string()
    }
}

fn release(task: Task) {
    let node = task.node_id();
    if let Err(err) = task.release() {
        warn!(node = %node, error = %err, "failed to release node lock");
    }
}
