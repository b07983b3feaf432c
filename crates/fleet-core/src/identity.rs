//! # Identity Newtypes
//!
//! Newtype wrappers for the two identifier namespaces of the fleet: nodes
//! (UUIDs assigned at enrollment) and conductors (the hostname a conductor
//! registers under, which is also the token written into a node's
//! reservation).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FleetError;

/// Maximum length of a conductor hostname, matching the width of the
/// persisted reservation column.
pub const MAX_CONDUCTOR_ID_LEN: usize = 255;

/// Unique, immutable identifier of a physical node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Generate a new random node identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a node identifier from its canonical UUID string.
    pub fn parse(s: &str) -> Result<Self, FleetError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| FleetError::InvalidIdentifier(format!("node id {s:?}: {e}")))
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a conductor process.
///
/// Non-empty, at most [`MAX_CONDUCTOR_ID_LEN`] bytes, no surrounding
/// whitespace. Validated on construction and on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConductorId(String);

impl ConductorId {
    /// Create a conductor identifier from a hostname.
    pub fn new(host: impl Into<String>) -> Result<Self, FleetError> {
        let host = host.into();
        if host.is_empty() {
            return Err(FleetError::InvalidIdentifier(
                "conductor id must not be empty".to_string(),
            ));
        }
        if host.len() > MAX_CONDUCTOR_ID_LEN {
            return Err(FleetError::InvalidIdentifier(format!(
                "conductor id exceeds {MAX_CONDUCTOR_ID_LEN} bytes: {} bytes",
                host.len()
            )));
        }
        if host.trim() != host {
            return Err(FleetError::InvalidIdentifier(format!(
                "conductor id must not have surrounding whitespace: {host:?}"
            )));
        }
        Ok(Self(host))
    }

    /// The hostname as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ConductorId {
    type Error = FleetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConductorId> for String {
    fn from(id: ConductorId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ConductorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
