//! Conductor registration records.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleet_core::{ConductorId, Timestamp};

/// A conductor process as seen by its peers.
///
/// `updated_at` doubles as the heartbeat: a live conductor refreshes it
/// every heartbeat interval, and peers treat a record older than the
/// heartbeat timeout as dead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConductorRecord {
    /// Conductor identity.
    pub hostname: ConductorId,
    /// Driver names this conductor can load.
    pub drivers: Vec<String>,
    /// Cleared on graceful shutdown.
    pub online: bool,
    /// First registration.
    pub created_at: Timestamp,
    /// Last heartbeat.
    pub updated_at: Timestamp,
}

impl ConductorRecord {
    /// A freshly registered, online conductor.
    pub fn new(hostname: ConductorId, drivers: Vec<String>, at: Timestamp) -> Self {
        Self {
            hostname,
            drivers,
            online: true,
            created_at: at,
            updated_at: at,
        }
    }

    /// Whether the conductor is online and has heartbeated within `timeout`.
    pub fn is_alive(&self, now: &Timestamp, timeout: Duration) -> bool {
        self.online && !self.updated_at.is_older_than(now, timeout)
    }
}
