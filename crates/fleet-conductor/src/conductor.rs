//! # Conductor
//!
//! A conductor process: registers itself, heartbeats, runs periodic
//! maintenance and dispatches workflows onto a bounded worker pool.
//!
//! Workflow requests never queue. When every worker is busy the request
//! fails with [`ConductorError::NoFreeWorker`]; when the node is locked it
//! fails with [`ConductorError::LockConflict`]. Both checks happen before
//! anything is spawned.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use fleet_core::{ConductorId, NodeId, Timestamp};

use crate::error::ConductorError;
use crate::inspection::{self, InspectionOutcome};
use crate::metrics;
use crate::periodic::{spawn_periodic, PeriodicHandle};
use crate::task_manager::TaskManager;

/// A running conductor.
#[derive(Debug)]
pub struct Conductor {
    manager: TaskManager,
    workers: Arc<Semaphore>,
    periodic: Mutex<Vec<PeriodicHandle>>,
}

impl Conductor {
    /// A conductor dispatching through `manager`, with a worker pool of
    /// `workers_pool_size` slots.
    pub fn new(manager: TaskManager) -> Self {
        let workers = Arc::new(Semaphore::new(manager.config().workers_pool_size));
        Self {
            manager,
            workers,
            periodic: Mutex::new(Vec::new()),
        }
    }

    /// The task manager this conductor dispatches through.
    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    /// This conductor's identity.
    pub fn host(&self) -> &ConductorId {
        self.manager.host()
    }

    /// Workers not currently running a workflow.
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Register with the conductor registry, recover reservations left by a
    /// previous run and start the heartbeat and maintenance loops. Both
    /// loops run their store I/O on the blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), ConductorError> {
        let config = self.manager.config();
        let host = self.host().clone();
        metrics::describe_metrics();
        self.manager
            .conductors()
            .register(&host, self.manager.drivers().names(), Timestamp::now())?;
        let cleared = self.manager.clear_own_reservations()?;
        info!(
            conductor = %host,
            drivers = ?self.manager.drivers().names(),
            cleared_reservations = cleared,
            "conductor started"
        );

        let registry = Arc::clone(self.manager.conductors());
        let heartbeat_host = host.clone();
        let heartbeat = spawn_periodic("heartbeat", config.heartbeat_interval, move || {
            registry.heartbeat(&heartbeat_host, Timestamp::now())?;
            Ok(())
        });

        let manager = self.manager.clone();
        let maintenance = spawn_periodic("maintenance", config.periodic_interval, move || {
            manager.reap_stale_reservations()?;
            inspection::check_inspect_wait_timeouts(&manager)?;
            Ok(())
        });

        let mut periodic = self.periodic.lock();
        periodic.push(heartbeat);
        periodic.push(maintenance);
        Ok(())
    }

    /// Stop the periodic loops and mark this conductor offline.
    pub async fn stop(&self) -> Result<(), ConductorError> {
        let handles = std::mem::take(&mut *self.periodic.lock());
        for handle in handles {
            handle.shutdown().await;
        }
        self.manager.conductors().unregister(self.host())?;
        info!(conductor = %self.host(), "conductor stopped");
        Ok(())
    }

    /// Start hardware inspection of a node.
    ///
    /// The node is locked and moved to `inspecting` before this returns;
    /// the driver call runs on a worker. The returned handle resolves to
    /// the workflow result.
    pub fn inspect_node(
        &self,
        id: &NodeId,
    ) -> Result<JoinHandle<Result<InspectionOutcome, ConductorError>>, ConductorError> {
        let permit = Arc::clone(&self.workers)
            .try_acquire_owned()
            .map_err(|_| ConductorError::NoFreeWorker)?;
        let mut task = self.manager.acquire(id, self.host())?;
        inspection::begin_inspection(&mut task)?;

        Ok(tokio::spawn(inspection::inspect_hardware_holding(task, permit)))
    }

    /// Record the out-of-band completion of a node's inspection.
    pub fn complete_node_inspection(
        &self,
        id: &NodeId,
        result: Result<(), String>,
    ) -> Result<InspectionOutcome, ConductorError> {
        let task = self.manager.acquire(id, self.host())?;
        inspection::complete_inspection(task, result)
    }

    /// Abort a node's inspection that is waiting in `inspect wait`.
    pub async fn abort_node_inspection(&self, id: &NodeId) -> Result<(), ConductorError> {
        let task = self.manager.acquire(id, self.host())?;
        inspection::abort_inspection(task).await
    }
}

impl Drop for Conductor {
    fn drop(&mut self) {
        let running = self.periodic.get_mut().len();
        if running > 0 {
            warn!(conductor = %self.host(), running, "conductor dropped without stop()");
        }
    }
}
