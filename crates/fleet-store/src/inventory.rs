//! Inspection data: the hardware inventory and plugin data a driver
//! gathered while inspecting a node.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use fleet_core::Timestamp;

/// Result of a hardware inspection, kept per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionData {
    /// Discovered hardware (CPUs, memory, disks, interfaces).
    pub inventory: Value,
    /// Free-form output of inspection plugins.
    #[serde(default)]
    pub plugin_data: Value,
    /// When the data was stored.
    pub collected_at: Timestamp,
}

impl InspectionData {
    /// Inspection data collected now.
    pub fn new(inventory: Value, plugin_data: Value) -> Self {
        Self {
            inventory,
            plugin_data,
            collected_at: Timestamp::now(),
        }
    }
}
