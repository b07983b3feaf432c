//! # Provision State Machine
//!
//! The provisioning lifecycle of a node, expressed as an enum with a static
//! transition table rather than typestate types: nodes are loaded from the
//! store with a state only known at runtime, so every transition is
//! validated by [`fire()`] and rejected with a [`TransitionError`].
//!
//! ## States
//!
//! ```text
//! enroll ──manage──▶ verifying ──done──▶ manageable
//!                    verifying ──fail──▶ enroll
//! manageable ──provide──▶ available ──manage──▶ manageable
//! manageable | inspect failed ──inspect──▶ inspecting
//! inspecting ──done──▶ manageable
//! inspecting ──wait──▶ inspect wait ──done──▶ manageable
//! inspecting | inspect wait ──fail──▶ inspect failed
//! inspect wait ──abort──▶ inspect failed ──manage──▶ manageable
//! ```
//!
//! ## Target Policy
//!
//! Each transition carries a [`TargetPolicy`] that decides the node's
//! `target_provision_state`. It is cleared (`NOSTATE`) exactly when the
//! transition lands in a stable state; otherwise it names the state the
//! in-flight sequence is heading to, so a retry or an asynchronous
//! completion knows its destination.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── States ──────────────────────────────────────────────────────────

/// The provisioning state of a node.
///
/// `NOSTATE` is not a member: an absent target is `Option::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProvisionState {
    /// Node is enrolled but its management credentials are unverified.
    #[serde(rename = "enroll")]
    Enroll,
    /// Management credentials are being verified.
    #[serde(rename = "verifying")]
    Verifying,
    /// Node is under operator control and not offered for deployment.
    #[serde(rename = "manageable")]
    Manageable,
    /// Node is offered for deployment.
    #[serde(rename = "available")]
    Available,
    /// Hardware inspection is running.
    #[serde(rename = "inspecting")]
    Inspecting,
    /// Inspection was started and awaits an asynchronous completion signal.
    #[serde(rename = "inspect wait")]
    InspectWait,
    /// Inspection failed; the node may be inspected again or managed.
    #[serde(rename = "inspect failed")]
    InspectFail,
}

impl ProvisionState {
    /// Every provision state.
    pub const ALL: [ProvisionState; 7] = [
        Self::Enroll,
        Self::Verifying,
        Self::Manageable,
        Self::Available,
        Self::Inspecting,
        Self::InspectWait,
        Self::InspectFail,
    ];

    /// The persisted name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enroll => "enroll",
            Self::Verifying => "verifying",
            Self::Manageable => "manageable",
            Self::Available => "available",
            Self::Inspecting => "inspecting",
            Self::InspectWait => "inspect wait",
            Self::InspectFail => "inspect failed",
        }
    }

    /// A stable state has no workflow in flight; its target is `NOSTATE`.
    pub fn is_stable(&self) -> bool {
        matches!(self, Self::Enroll | Self::Manageable | Self::Available)
    }

    /// A failure state ends a workflow unsuccessfully but keeps its target
    /// so the workflow may be retried.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::InspectFail)
    }

    /// States a conductor is actively driving while holding the node's
    /// reservation. A node found in one of these after its holder died or
    /// restarted has been orphaned. `inspect wait` is not transient: the
    /// work continues out of band with no reservation held.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Verifying | Self::Inspecting)
    }
}

impl std::fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProvisionState {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| TransitionError::UnknownState(s.to_string()))
    }
}

// ─── Events ──────────────────────────────────────────────────────────

/// An event that drives a provision state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionEvent {
    /// Bring a node under operator control.
    Manage,
    /// Offer a manageable node for deployment.
    Provide,
    /// Start hardware inspection.
    Inspect,
    /// The running step finished successfully.
    Done,
    /// The running step continues asynchronously.
    Wait,
    /// The running step failed.
    Fail,
    /// The operator aborted the running step.
    Abort,
}

impl ProvisionEvent {
    /// Every provision event.
    pub const ALL: [ProvisionEvent; 7] = [
        Self::Manage,
        Self::Provide,
        Self::Inspect,
        Self::Done,
        Self::Wait,
        Self::Fail,
        Self::Abort,
    ];

    /// The event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manage => "manage",
            Self::Provide => "provide",
            Self::Inspect => "inspect",
            Self::Done => "done",
            Self::Wait => "wait",
            Self::Fail => "fail",
            Self::Abort => "abort",
        }
    }
}

impl std::fmt::Display for ProvisionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Transition Table ────────────────────────────────────────────────

/// How a transition sets `target_provision_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetPolicy {
    /// Clear the target (`NOSTATE`): the node reached a stable state.
    Clear,
    /// Record the eventual goal of the in-flight sequence.
    Set(ProvisionState),
}

impl TargetPolicy {
    /// The resulting target provision state.
    pub fn target(&self) -> Option<ProvisionState> {
        match self {
            Self::Clear => None,
            Self::Set(state) => Some(*state),
        }
    }
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transition {
    /// State the node must be in.
    pub from: ProvisionState,
    /// Event that triggers the transition.
    pub event: ProvisionEvent,
    /// State the node moves to.
    pub to: ProvisionState,
    /// Resulting target provision state.
    pub target: TargetPolicy,
}

const fn row(
    from: ProvisionState,
    event: ProvisionEvent,
    to: ProvisionState,
    target: TargetPolicy,
) -> Transition {
    Transition {
        from,
        event,
        to,
        target,
    }
}

use ProvisionEvent as E;
use ProvisionState as S;

/// The complete provision transition table. Any `(state, event)` pair not
/// listed here is rejected.
pub const TRANSITIONS: &[Transition] = &[
    row(S::Enroll, E::Manage, S::Verifying, TargetPolicy::Set(S::Manageable)),
    row(S::Verifying, E::Done, S::Manageable, TargetPolicy::Clear),
    row(S::Verifying, E::Fail, S::Enroll, TargetPolicy::Clear),
    row(S::Manageable, E::Inspect, S::Inspecting, TargetPolicy::Set(S::Manageable)),
    row(S::Manageable, E::Provide, S::Available, TargetPolicy::Clear),
    row(S::Available, E::Manage, S::Manageable, TargetPolicy::Clear),
    row(S::Inspecting, E::Done, S::Manageable, TargetPolicy::Clear),
    row(S::Inspecting, E::Wait, S::InspectWait, TargetPolicy::Set(S::Manageable)),
    row(S::Inspecting, E::Fail, S::InspectFail, TargetPolicy::Set(S::Manageable)),
    row(S::InspectWait, E::Done, S::Manageable, TargetPolicy::Clear),
    row(S::InspectWait, E::Fail, S::InspectFail, TargetPolicy::Set(S::Manageable)),
    row(S::InspectWait, E::Abort, S::InspectFail, TargetPolicy::Set(S::Manageable)),
    row(S::InspectFail, E::Inspect, S::Inspecting, TargetPolicy::Set(S::Manageable)),
    row(S::InspectFail, E::Manage, S::Manageable, TargetPolicy::Clear),
];

/// Compute the transition triggered by `event` in state `from`.
pub fn fire(from: ProvisionState, event: ProvisionEvent) -> Result<Transition, TransitionError> {
    TRANSITIONS
        .iter()
        .find(|t| t.from == from && t.event == event)
        .copied()
        .ok_or(TransitionError::EventNotAllowed { from, event })
}

/// Validate a direct state change: legal iff some event moves `from` to `to`.
pub fn check_transition(from: ProvisionState, to: ProvisionState) -> Result<(), TransitionError> {
    if TRANSITIONS.iter().any(|t| t.from == from && t.to == to) {
        Ok(())
    } else {
        Err(TransitionError::InvalidTransition { from, to })
    }
}

/// Events accepted in state `from`, in table order.
pub fn allowed_events(from: ProvisionState) -> Vec<ProvisionEvent> {
    TRANSITIONS
        .iter()
        .filter(|t| t.from == from)
        .map(|t| t.event)
        .collect()
}

/// Require that a node is in `expected` before a workflow step runs.
pub fn require_state(
    actual: ProvisionState,
    expected: ProvisionState,
) -> Result<(), TransitionError> {
    if actual == expected {
        Ok(())
    } else {
        Err(TransitionError::UnexpectedState { expected, actual })
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors raised by the provision state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// No event moves a node between these two states.
    #[error("invalid provision state transition: '{from}' -> '{to}'")]
    InvalidTransition {
        /// Current state.
        from: ProvisionState,
        /// Requested state.
        to: ProvisionState,
    },

    /// The event is not accepted in the current state.
    #[error("event '{event}' is not allowed in provision state '{from}'")]
    EventNotAllowed {
        /// Current state.
        from: ProvisionState,
        /// Rejected event.
        event: ProvisionEvent,
    },

    /// A workflow step requires a specific current state.
    #[error("node must be in provision state '{expected}' but is in '{actual}'")]
    UnexpectedState {
        /// State the step requires.
        expected: ProvisionState,
        /// State the node is in.
        actual: ProvisionState,
    },

    /// A persisted state name is not a member of the enumeration.
    #[error("unknown provision state: {0:?}")]
    UnknownState(String),
}

// ─── Tests ───────────────────────────────────────────────────────────
