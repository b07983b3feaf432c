//! # Task Manager — Per-Node Reservation Lock
//!
//! Every mutation of a node happens inside a [`Task`]: a handle proving that
//! this conductor holds the node's reservation. The reservation is a single
//! `reservation` column on the node record, changed only through the
//! store's compare-and-swap.
//!
//! ## Acquisition
//!
//! - Fail-fast. A node reserved by another live conductor yields
//!   [`ConductorError::LockConflict`] immediately; there is no queue.
//! - Stale takeover. A reservation naming a conductor that is unknown,
//!   offline, or silent for longer than `heartbeat_timeout` is swapped to
//!   the caller.
//! - Re-entrant. The same holder may acquire a node it already holds; an
//!   in-process hold count tracks nesting and the reservation is cleared
//!   only when the last hold is released.
//!
//! ## Release
//!
//! [`Task::release()`] releases explicitly. A `Task` dropped without an
//! explicit release (early return, error, panic unwinding, cancelled
//! future) releases in `Drop`.
//!
//! ## Orphaned Workflows
//!
//! A node left in a transient state (`inspecting`, `verifying`) by a
//! holder that restarted or died has nobody driving it. Whenever such a
//! reservation is cleared or taken over, the node is failed first so the
//! workflow can be retried.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use fleet_core::{ConductorConfig, ConductorId, InventoryBackend, NodeId, Timestamp};
use fleet_state::{ProvisionEvent, ProvisionState};
use fleet_store::{
    ConductorRegistry, InspectionData, InventoryStore, Node, NodeStore, StoreError,
};

use crate::driver::{DriverRegistry, HardwareDriver};
use crate::error::ConductorError;
use crate::metrics;

/// Compare-and-swap attempts before giving up on a reservation that keeps
/// changing underneath us.
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// Cause recorded when this conductor finds its own orphaned workflow.
const CAUSE_RESTART: &str = "restart";
/// Cause recorded when a dead conductor's workflow is taken over.
const CAUSE_FAILURE: &str = "failure";

type HoldKey = (NodeId, ConductorId);

/// Hands out [`Task`]s for nodes.
///
/// Cheap to clone; clones share hold counts and storage.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConductorConfig,
    nodes: Arc<dyn NodeStore>,
    conductors: Arc<dyn ConductorRegistry>,
    inventory: Arc<dyn InventoryStore>,
    drivers: DriverRegistry,
    /// In-process hold counts. Locked across every reservation swap so
    /// count and persisted reservation change together.
    holds: Mutex<HashMap<HoldKey, usize>>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("host", &self.inner.config.host)
            .field("drivers", &self.inner.drivers.names())
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Build a manager over the given storage and drivers.
    ///
    /// Fails with [`ConductorError::Config`] when `config` does not pass
    /// [`ConductorConfig::validate()`].
    pub fn new(
        config: ConductorConfig,
        nodes: Arc<dyn NodeStore>,
        conductors: Arc<dyn ConductorRegistry>,
        inventory: Arc<dyn InventoryStore>,
        drivers: DriverRegistry,
    ) -> Result<Self, ConductorError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                nodes,
                conductors,
                inventory,
                drivers,
                holds: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Configuration the manager was built with.
    pub fn config(&self) -> &ConductorConfig {
        &self.inner.config
    }

    /// Identity of the conductor this manager belongs to.
    pub fn host(&self) -> &ConductorId {
        &self.inner.config.host
    }

    /// Node storage.
    pub fn nodes(&self) -> &Arc<dyn NodeStore> {
        &self.inner.nodes
    }

    /// Conductor registry used for liveness checks.
    pub fn conductors(&self) -> &Arc<dyn ConductorRegistry> {
        &self.inner.conductors
    }

    /// Drivers loaded on this conductor.
    pub fn drivers(&self) -> &DriverRegistry {
        &self.inner.drivers
    }

    /// Number of open holds `holder` has on `node` in this process.
    pub fn hold_count(&self, node: &NodeId, holder: &ConductorId) -> usize {
        self.inner
            .holds
            .lock()
            .get(&(*node, holder.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Acquire the lock on `id` for `holder`.
    ///
    /// Fails with `NotFound` for an unknown node, `DriverNotFound` when the
    /// node's driver is not loaded here (no reservation is taken), and
    /// `LockConflict` when another live conductor holds the node.
    pub fn acquire(&self, id: &NodeId, holder: &ConductorId) -> Result<Task, ConductorError> {
        let inner = &self.inner;
        let mut holds = inner.holds.lock();
        let key = (*id, holder.clone());

        let mut node = inner.nodes.get(id)?;
        let driver = inner.drivers.get(&node.driver)?;

        if let Some(count) = holds.get_mut(&key) {
            if !node.is_reserved_by(holder) {
                return Err(ConductorError::ReservationLost {
                    node: *id,
                    holder: holder.clone(),
                });
            }
            *count += 1;
            debug!(node = %id, holder = %holder, holds = *count, "re-entered node lock");
            return Ok(self.task(node, holder, driver));
        }

        let mut attempts = 0;
        loop {
            let expected = match node.reservation.clone() {
                None => None,
                Some(current) if &current == holder => {
                    info!(node = %id, holder = %holder, "adopting reservation left by a previous run");
                    let node = self.recover_or_unreserve(node, holder, CAUSE_RESTART)?;
                    holds.insert(key, 1);
                    return Ok(self.task(node, holder, driver));
                }
                Some(current) => {
                    if self.holder_is_alive(&current)? {
                        metrics::record_lock_conflict();
                        debug!(node = %id, holder = %holder, current = %current, "node is locked");
                        return Err(ConductorError::LockConflict {
                            node: *id,
                            holder: current,
                        });
                    }
                    warn!(
                        node = %id,
                        stale_holder = %current,
                        holder = %holder,
                        "taking over reservation of dead conductor"
                    );
                    Some(current)
                }
            };

            match inner.nodes.swap_reservation(id, expected.as_ref(), Some(holder)) {
                Ok(reserved) => {
                    let reserved = if expected.is_some() {
                        metrics::record_stale_reservation_cleared();
                        self.recover_or_unreserve(reserved, holder, CAUSE_FAILURE)?
                    } else {
                        reserved
                    };
                    holds.insert(key, 1);
                    debug!(node = %id, holder = %holder, "acquired node lock");
                    return Ok(self.task(reserved, holder, driver));
                }
                Err(err @ StoreError::ReservationMismatch { .. }) => {
                    attempts += 1;
                    if attempts >= MAX_ACQUIRE_ATTEMPTS {
                        return Err(err.into());
                    }
                    node = inner.nodes.get(id)?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Release a task. Same as [`Task::release()`].
    pub fn release(&self, task: Task) -> Result<(), ConductorError> {
        task.release()
    }

    /// Clear every reservation naming this conductor that no open task in
    /// this process backs. Run on startup to recover from a crash. Nodes
    /// caught mid-workflow are failed.
    pub fn clear_own_reservations(&self) -> Result<usize, ConductorError> {
        let host = self.host();
        let holds = self.inner.holds.lock();
        let mut cleared = 0;
        for node in self.inner.nodes.list()? {
            if !node.is_reserved_by(host) || holds.contains_key(&(node.id, host.clone())) {
                continue;
            }
            if self.clear_reservation(&node, host, CAUSE_RESTART)? {
                cleared += 1;
                info!(node = %node.id, holder = %host, "cleared reservation left by a previous run");
            }
        }
        Ok(cleared)
    }

    /// Clear reservations held by conductors that are no longer alive.
    /// Nodes caught mid-workflow are failed.
    pub fn reap_stale_reservations(&self) -> Result<usize, ConductorError> {
        let host = self.host();
        let _holds = self.inner.holds.lock();
        let mut liveness: HashMap<ConductorId, bool> = HashMap::new();
        let mut cleared = 0;
        for node in self.inner.nodes.list()? {
            let Some(holder) = node.reservation.as_ref() else {
                continue;
            };
            if holder == host {
                continue;
            }
            let alive = match liveness.get(holder) {
                Some(alive) => *alive,
                None => {
                    let alive = self.holder_is_alive(holder)?;
                    liveness.insert(holder.clone(), alive);
                    alive
                }
            };
            if alive {
                continue;
            }
            if self.clear_reservation(&node, holder, CAUSE_FAILURE)? {
                cleared += 1;
                metrics::record_stale_reservation_cleared();
                warn!(node = %node.id, stale_holder = %holder, "cleared reservation of dead conductor");
            }
        }
        Ok(cleared)
    }

    /// Clear `current`'s reservation on `node`, failing the node first if
    /// it was left mid-workflow. Returns `false` when the reservation
    /// changed underneath. Callers hold `holds`.
    fn clear_reservation(
        &self,
        node: &Node,
        current: &ConductorId,
        cause: &str,
    ) -> Result<bool, ConductorError> {
        let nodes = &self.inner.nodes;
        let host = self.host();
        let next = if node.provision_state.is_transient() {
            Some(host)
        } else {
            None
        };
        let reserved = match nodes.swap_reservation(&node.id, Some(current), next) {
            Ok(reserved) => reserved,
            Err(StoreError::ReservationMismatch { .. } | StoreError::NodeNotFound(_)) => {
                return Ok(false)
            }
            Err(err) => return Err(err.into()),
        };
        if next.is_none() {
            return Ok(true);
        }
        let failed = self.fail_orphaned(reserved, cause);
        nodes.swap_reservation(&node.id, Some(host), None)?;
        failed?;
        Ok(true)
    }

    /// [`Self::fail_orphaned()`] on a node `holder` just reserved. On error
    /// the reservation is dropped again. Callers hold `holds`.
    fn recover_or_unreserve(
        &self,
        node: Node,
        holder: &ConductorId,
        cause: &str,
    ) -> Result<Node, ConductorError> {
        let id = node.id;
        self.fail_orphaned(node, cause).map_err(|err| {
            if let Err(release) = self.inner.nodes.swap_reservation(&id, Some(holder), None) {
                warn!(node = %id, holder = %holder, error = %release, "failed to drop reservation");
            }
            err
        })
    }

    /// Fail a node whose workflow lost its conductor. Nodes outside a
    /// transient state are returned untouched. The caller holds the
    /// node's reservation.
    fn fail_orphaned(&self, mut node: Node, cause: &str) -> Result<Node, ConductorError> {
        let from = node.provision_state;
        if !from.is_transient() {
            return Ok(node);
        }
        node.apply_event(ProvisionEvent::Fail)?;
        let message = interrupted_message(from, cause);
        node.last_error = Some(message.clone());
        let saved = self.inner.nodes.save(&node)?;
        if from == ProvisionState::Inspecting {
            metrics::record_inspection("fail");
        }
        error!(node = %saved.id, from = %from, to = %saved.provision_state, "{message}");
        Ok(saved)
    }

    fn holder_is_alive(&self, holder: &ConductorId) -> Result<bool, ConductorError> {
        match self.inner.conductors.get(holder) {
            Ok(record) => Ok(record.is_alive(&Timestamp::now(), self.inner.config.heartbeat_timeout)),
            Err(StoreError::ConductorNotFound(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn release_hold(&self, id: &NodeId, holder: &ConductorId) -> Result<(), ConductorError> {
        let mut holds = self.inner.holds.lock();
        let key = (*id, holder.clone());
        match holds.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                debug!(node = %id, holder = %holder, holds = *count, "left nested node lock");
                return Ok(());
            }
            Some(_) => {
                holds.remove(&key);
            }
            None => {
                warn!(node = %id, holder = %holder, "release of a node lock that is not held");
                return Ok(());
            }
        }

        match self.inner.nodes.swap_reservation(id, Some(holder), None) {
            Ok(_) => {
                debug!(node = %id, holder = %holder, "released node lock");
                Ok(())
            }
            Err(StoreError::ReservationMismatch { .. }) => Err(ConductorError::ReservationLost {
                node: *id,
                holder: holder.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn task(&self, node: Node, holder: &ConductorId, driver: Arc<dyn HardwareDriver>) -> Task {
        Task {
            manager: self.clone(),
            node,
            holder: holder.clone(),
            driver,
            released: false,
        }
    }
}

/// `last_error` for a workflow abandoned by its conductor.
fn interrupted_message(state: ProvisionState, cause: &str) -> String {
    let workflow = match state {
        ProvisionState::Inspecting => "Inspection",
        ProvisionState::Verifying => "Verification",
        _ => "Workflow",
    };
    format!("{workflow} was aborted due to conductor {cause}")
}

// ─── Task ────────────────────────────────────────────────────────────

/// Exclusive access to one node.
///
/// Holds the node record as last read or written through this task.
pub struct Task {
    manager: TaskManager,
    node: Node,
    holder: ConductorId,
    driver: Arc<dyn HardwareDriver>,
    released: bool,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("node", &self.node.id)
            .field("holder", &self.holder)
            .field("driver", &self.driver.name())
            .finish()
    }
}

impl Task {
    /// The node as last read or written through this task.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Id of the locked node.
    pub fn node_id(&self) -> NodeId {
        self.node.id
    }

    /// Conductor holding the reservation.
    pub fn holder(&self) -> &ConductorId {
        &self.holder
    }

    /// The driver selected by `node.driver`.
    pub fn driver(&self) -> &Arc<dyn HardwareDriver> {
        &self.driver
    }

    /// Manager that issued this task.
    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    /// Re-read the node from the store.
    pub fn refresh(&mut self) -> Result<&Node, ConductorError> {
        self.node = self.read_owned()?;
        Ok(&self.node)
    }

    /// Durable read-modify-write of the node.
    ///
    /// Re-reads the record, checks the reservation is still ours, applies
    /// `f` and saves with a version check. Nothing is written when `f`
    /// fails.
    pub fn update<R>(
        &mut self,
        f: impl FnOnce(&mut Node) -> Result<R, ConductorError>,
    ) -> Result<R, ConductorError> {
        let mut node = self.read_owned()?;
        let result = f(&mut node)?;
        self.node = self.manager.inner.nodes.save(&node)?;
        Ok(result)
    }

    /// Store inspection data for this node, unless storage is disabled.
    pub fn store_inspection_data(&self, data: InspectionData) -> Result<(), ConductorError> {
        match self.manager.inner.config.inventory_backend {
            InventoryBackend::Disabled => {
                debug!(node = %self.node.id, "inspection data storage is disabled, data not stored");
                Ok(())
            }
            InventoryBackend::Database => {
                self.manager.inner.inventory.put(&self.node.id, data)?;
                debug!(node = %self.node.id, "stored inspection data");
                Ok(())
            }
        }
    }

    /// Inspection data stored for this node.
    pub fn inspection_data(&self) -> Result<InspectionData, ConductorError> {
        match self.manager.inner.config.inventory_backend {
            InventoryBackend::Disabled => Err(StoreError::InventoryNotFound(self.node.id).into()),
            InventoryBackend::Database => Ok(self.manager.inner.inventory.get(&self.node.id)?),
        }
    }

    /// Release the lock.
    pub fn release(mut self) -> Result<(), ConductorError> {
        self.released = true;
        self.manager.release_hold(&self.node.id, &self.holder)
    }

    fn read_owned(&self) -> Result<Node, ConductorError> {
        let node = self.manager.inner.nodes.get(&self.node.id)?;
        if !node.is_reserved_by(&self.holder) {
            return Err(ConductorError::ReservationLost {
                node: self.node.id,
                holder: self.holder.clone(),
            });
        }
        Ok(node)
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.manager.release_hold(&self.node.id, &self.holder) {
            warn!(node = %self.node.id, holder = %self.holder, error = %err, "failed to release dropped task");
        }
    }
}
