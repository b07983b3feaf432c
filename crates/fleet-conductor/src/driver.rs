//! # Hardware Drivers
//!
//! The seam between the lifecycle core and vendor-specific hardware code.
//! A driver is selected per node by `node.driver` from the conductor's
//! [`DriverRegistry`]; workflows call it while holding the node's
//! reservation and interpret its result.
//!
//! Driver calls are synchronous and may block on hardware I/O. Workflows
//! run them on the blocking pool, never on the async dispatch path.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_state::ProvisionState;

use crate::error::ConductorError;
use crate::task_manager::Task;

/// Errors a driver may report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// The declared inspection failure. The message is recorded on the node
    /// verbatim.
    #[error("{0}")]
    InspectionFailure(String),

    /// Any failure the driver did not declare, identified by its kind.
    #[error("{kind}: {message}")]
    Unexpected {
        /// Short name of the failure type.
        kind: String,
        /// Failure detail.
        message: String,
    },
}

impl DriverError {
    /// An undeclared failure of the given kind.
    pub fn unexpected(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unexpected {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Vendor-specific hardware operations.
pub trait HardwareDriver: Send + Sync + std::fmt::Debug {
    /// Name nodes use to select this driver.
    fn name(&self) -> &str;

    /// Inspect the node's hardware.
    ///
    /// Returns the provision state the node should move to:
    /// `manageable` when inspection finished, `inspect wait` when it
    /// continues asynchronously. Anything else is treated as a failure.
    fn inspect_hardware(&self, task: &mut Task) -> Result<Option<ProvisionState>, DriverError>;

    /// Stop an asynchronous inspection that is still running out of band.
    fn abort_inspection(&self, _task: &mut Task) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Drivers loaded on this conductor, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn HardwareDriver>>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a driver, replacing any driver of the same name.
    pub fn register(&mut self, driver: Arc<dyn HardwareDriver>) -> Option<Arc<dyn HardwareDriver>> {
        self.drivers.insert(driver.name().to_string(), driver)
    }

    /// Builder form of [`DriverRegistry::register()`].
    pub fn with(mut self, driver: Arc<dyn HardwareDriver>) -> Self {
        self.register(driver);
        self
    }

    /// Select the driver for `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn HardwareDriver>, ConductorError> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| ConductorError::DriverNotFound(name.to_string()))
    }

    /// Names of all loaded drivers, sorted.
    pub fn names(&self) -> Vec<String> {
        self.drivers.keys().cloned().collect()
    }

    /// Number of loaded drivers.
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether no driver is loaded.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
