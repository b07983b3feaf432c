//! # Node Record
//!
//! The typed node record owned by a [`NodeStore`](crate::NodeStore).
//! Composite fields (`driver_info`, `driver_internal_info`) are typed maps
//! here and only become JSON at the storage boundary via serde.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use fleet_core::{ConductorId, NodeId, Timestamp};
use fleet_state::{fire, PowerState, ProvisionEvent, ProvisionState, Transition, TransitionError};

// ─── Driver Internal Info ────────────────────────────────────────────

/// One scratch entry written by a workflow or driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalEntry {
    /// The stored value.
    pub value: Value,
    /// Ephemeral entries are purged when the workflow that wrote them
    /// completes.
    #[serde(default)]
    pub ephemeral: bool,
}

/// Workflow-managed scratch data attached to a node.
///
/// Every entry is tagged persistent or ephemeral at insertion time.
/// Ephemeral entries (agent URLs, session tokens) must not outlive the
/// workflow that created them; [`DriverInternalInfo::purge_ephemeral()`]
/// removes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverInternalInfo {
    entries: BTreeMap<String, InternalEntry>,
}

impl DriverInternalInfo {
    /// Empty scratch data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether a key is present and tagged ephemeral.
    pub fn is_ephemeral(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.ephemeral)
    }

    /// Insert a persistent entry, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.put(key.into(), value.into(), false)
    }

    /// Insert an ephemeral entry, returning the previous value.
    pub fn insert_ephemeral(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.put(key.into(), value.into(), true)
    }

    /// Remove an entry, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// Remove every ephemeral entry. Returns the purged keys in order.
    pub fn purge_ephemeral(&mut self) -> Vec<String> {
        let purged: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.ephemeral)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &purged {
            self.entries.remove(key);
        }
        purged
    }

    /// Keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn put(&mut self, key: String, value: Value, ephemeral: bool) -> Option<Value> {
        self.entries
            .insert(key, InternalEntry { value, ephemeral })
            .map(|previous| previous.value)
    }
}

// ─── Node ────────────────────────────────────────────────────────────

/// A physical machine managed by the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Immutable external identifier.
    pub id: NodeId,
    /// Last reported power state.
    pub power_state: Option<PowerState>,
    /// Power state being driven towards, if a power action is in flight.
    pub target_power_state: Option<PowerState>,
    /// Current provisioning state.
    pub provision_state: ProvisionState,
    /// Goal of the in-flight provisioning sequence; `None` is `NOSTATE`.
    pub target_provision_state: Option<ProvisionState>,
    /// When `provision_state` last changed.
    pub provision_updated_at: Option<Timestamp>,
    /// Diagnostic of the most recent failure.
    pub last_error: Option<String>,
    /// Name of the bound hardware driver.
    pub driver: String,
    /// Operator-supplied driver configuration.
    pub driver_info: BTreeMap<String, Value>,
    /// Workflow-managed scratch data.
    pub driver_internal_info: DriverInternalInfo,
    /// Conductor holding the exclusive lock, if any.
    pub reservation: Option<ConductorId>,
    /// Operator maintenance flag.
    pub maintenance: bool,
    /// Write counter, bumped by the store on every durable write.
    pub version: u64,
    /// When the record was created.
    pub created_at: Timestamp,
    /// When the record was last written.
    pub updated_at: Timestamp,
}

impl Node {
    /// A freshly enrolled node bound to `driver`.
    pub fn new(driver: impl Into<String>) -> Self {
        Self::with_id(NodeId::new(), driver)
    }

    /// A freshly enrolled node with a caller-chosen identifier.
    pub fn with_id(id: NodeId, driver: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            power_state: None,
            target_power_state: None,
            provision_state: ProvisionState::Enroll,
            target_provision_state: None,
            provision_updated_at: None,
            last_error: None,
            driver: driver.into(),
            driver_info: BTreeMap::new(),
            driver_internal_info: DriverInternalInfo::new(),
            reservation: None,
            maintenance: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Place the record in a given provision state, e.g. when importing
    /// nodes that already exist.
    pub fn in_state(mut self, state: ProvisionState, target: Option<ProvisionState>) -> Self {
        self.provision_state = state;
        self.target_provision_state = target;
        self.provision_updated_at = Some(Timestamp::now());
        self
    }

    /// Whether any conductor holds the lock.
    pub fn is_reserved(&self) -> bool {
        self.reservation.is_some()
    }

    /// Whether `holder` holds the lock.
    pub fn is_reserved_by(&self, holder: &ConductorId) -> bool {
        self.reservation.as_ref() == Some(holder)
    }

    /// Apply a provision event.
    ///
    /// The transition is computed before anything is written: on error the
    /// record is left untouched.
    pub fn apply_event(&mut self, event: ProvisionEvent) -> Result<Transition, TransitionError> {
        let transition = fire(self.provision_state, event)?;
        self.provision_state = transition.to;
        self.target_provision_state = transition.target.target();
        self.provision_updated_at = Some(Timestamp::now());
        Ok(transition)
    }
}
