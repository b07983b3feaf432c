//! Lifecycle metrics.
//!
//! Metrics tracked:
//! - `fleet_lock_conflicts_total` - acquisitions refused because a live
//!   conductor holds the node
//! - `fleet_stale_reservations_cleared_total` - reservations of dead
//!   conductors taken over or reaped
//! - `fleet_inspections_total` - finished inspection workflows by `outcome`
//!   (`complete`, `wait`, `fail`, `abort`)
//!
//! Installing a recorder is left to the embedding binary; without one the
//! calls below are no-ops.

use metrics::{counter, describe_counter};

/// Register descriptions for all lifecycle metrics.
pub fn describe_metrics() {
    describe_counter!(
        "fleet_lock_conflicts_total",
        "Node lock acquisitions refused because another live conductor holds the node"
    );
    describe_counter!(
        "fleet_stale_reservations_cleared_total",
        "Reservations held by dead conductors that were taken over or cleared"
    );
    describe_counter!(
        "fleet_inspections_total",
        "Finished hardware inspection workflows by outcome"
    );
}

pub(crate) fn record_lock_conflict() {
    counter!("fleet_lock_conflicts_total").increment(1);
}

pub(crate) fn record_stale_reservation_cleared() {
    counter!("fleet_stale_reservations_cleared_total").increment(1);
}

pub(crate) fn record_inspection(outcome: &'static str) {
    counter!("fleet_inspections_total", "outcome" => outcome).increment(1);
}
