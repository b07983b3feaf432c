//! # Power State
//!
//! Power state of a node as last reported by its management controller.
//! Independent of provisioning: no provision transition reads or writes it.

use serde::{Deserialize, Serialize};

/// The power state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerState {
    /// Node is powered on.
    #[serde(rename = "power on")]
    PowerOn,
    /// Node is powered off.
    #[serde(rename = "power off")]
    PowerOff,
    /// Node is rebooting.
    #[serde(rename = "rebooting")]
    Rebooting,
    /// The power state could not be determined.
    #[serde(rename = "error")]
    Error,
}

impl PowerState {
    /// The persisted name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PowerOn => "power on",
            Self::PowerOff => "power off",
            Self::Rebooting => "rebooting",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
