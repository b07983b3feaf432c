//! Shared fixtures for conductor integration tests: a scripted fake driver,
//! an in-memory harness and a tracing layer that captures log events.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;

use fleet_conductor::{DriverError, DriverRegistry, HardwareDriver, Task, TaskManager};
use fleet_core::{ConductorConfig, ConductorId, InventoryBackend, NodeId, Timestamp};
use fleet_state::ProvisionState;
use fleet_store::{
    ConductorRegistry, InMemoryConductorRegistry, InMemoryInventoryStore, InMemoryNodeStore,
    InspectionData, Node, NodeStore, StoreError,
};

pub const DRIVER: &str = "fake-hardware";

// ─── Fake Driver ─────────────────────────────────────────────────────

/// What the fake driver does when asked to inspect.
#[derive(Debug, Clone)]
pub enum Script {
    Return(Option<ProvisionState>),
    Fail(String),
    Unexpected { kind: String, message: String },
    Panic(String),
}

/// A driver whose inspection result is scripted per test.
#[derive(Debug)]
pub struct FakeDriver {
    script: Script,
    inventory: Option<Value>,
    abort_error: Option<String>,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
    inspect_calls: AtomicUsize,
    abort_calls: AtomicUsize,
}

impl FakeDriver {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            inventory: None,
            abort_error: None,
            gate: Mutex::new(None),
            inspect_calls: AtomicUsize::new(0),
            abort_calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(state: Option<ProvisionState>) -> Self {
        Self::new(Script::Return(state))
    }

    pub fn failing(message: &str) -> Self {
        Self::new(Script::Fail(message.to_string()))
    }

    pub fn raising(kind: &str, message: &str) -> Self {
        Self::new(Script::Unexpected {
            kind: kind.to_string(),
            message: message.to_string(),
        })
    }

    pub fn panicking(message: &str) -> Self {
        Self::new(Script::Panic(message.to_string()))
    }

    /// Store `inventory` as inspection data before returning.
    pub fn with_inventory(mut self, inventory: Value) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Refuse to abort with `message`.
    pub fn refusing_abort(mut self, message: &str) -> Self {
        self.abort_error = Some(message.to_string());
        self
    }

    /// Block inspection until the returned sender fires or is dropped.
    pub fn gated(self) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        *self.gate.lock() = Some(rx);
        (self, tx)
    }

    pub fn inspect_calls(&self) -> usize {
        self.inspect_calls.load(Ordering::SeqCst)
    }

    pub fn abort_calls(&self) -> usize {
        self.abort_calls.load(Ordering::SeqCst)
    }
}

impl HardwareDriver for FakeDriver {
    fn name(&self) -> &str {
        DRIVER
    }

    fn inspect_hardware(&self, task: &mut Task) -> Result<Option<ProvisionState>, DriverError> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        if let Some(inventory) = &self.inventory {
            task.store_inspection_data(InspectionData::new(inventory.clone(), json!({})))
                .map_err(|err| DriverError::unexpected("StorageError", err.to_string()))?;
        }
        match &self.script {
            Script::Return(state) => Ok(*state),
            Script::Fail(message) => Err(DriverError::InspectionFailure(message.clone())),
            Script::Unexpected { kind, message } => Err(DriverError::unexpected(kind, message)),
            Script::Panic(message) => panic!("{message}"),
        }
    }

    fn abort_inspection(&self, _task: &mut Task) -> Result<(), DriverError> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        match &self.abort_error {
            Some(message) => Err(DriverError::InspectionFailure(message.clone())),
            None => Ok(()),
        }
    }
}

// ─── Harness ─────────────────────────────────────────────────────────

pub fn host(name: &str) -> ConductorId {
    ConductorId::new(name).unwrap()
}

pub fn config(name: &str) -> ConductorConfig {
    ConductorConfig::for_host(host(name))
}

/// Storage shared by every conductor in a test.
#[derive(Clone, Default)]
pub struct Cluster {
    pub nodes: Arc<InMemoryNodeStore>,
    pub conductors: Arc<InMemoryConductorRegistry>,
    pub inventory: Arc<InMemoryInventoryStore>,
}

impl Cluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// A task manager for `config` backed by this cluster, with `driver`
    /// loaded and the conductor registered as alive.
    pub fn manager(&self, config: ConductorConfig, driver: Arc<FakeDriver>) -> TaskManager {
        self.manager_over(self.nodes.clone(), config, driver)
    }

    /// Like [`Cluster::manager`], writing nodes through `nodes`.
    pub fn manager_over(
        &self,
        nodes: Arc<dyn NodeStore>,
        config: ConductorConfig,
        driver: Arc<FakeDriver>,
    ) -> TaskManager {
        self.conductors
            .register(&config.host, vec![DRIVER.to_string()], Timestamp::now())
            .unwrap();
        TaskManager::new(
            config,
            nodes,
            self.conductors.clone(),
            self.inventory.clone(),
            DriverRegistry::new().with(driver),
        )
        .unwrap()
    }

    /// Register a conductor whose last heartbeat was `age` ago.
    pub fn register_peer(&self, name: &str, age: Duration) -> ConductorId {
        let peer = host(name);
        let beat = Timestamp::from_epoch_secs(Timestamp::now().epoch_secs() - age.as_secs() as i64)
            .unwrap();
        self.conductors.register(&peer, vec![DRIVER.to_string()], beat).unwrap();
        peer
    }

    /// Create a node in `state` with the given target.
    pub fn node_in(&self, state: ProvisionState, target: Option<ProvisionState>) -> NodeId {
        self.nodes
            .create(Node::new(DRIVER).in_state(state, target))
            .unwrap()
            .id
    }

    /// Create a node and let `f` adjust it first.
    pub fn node_with(&self, state: ProvisionState, f: impl FnOnce(&mut Node)) -> NodeId {
        let mut node = Node::new(DRIVER).in_state(state, None);
        f(&mut node);
        self.nodes.create(node).unwrap().id
    }

    pub fn node(&self, id: &NodeId) -> Node {
        self.nodes.get(id).unwrap()
    }

    /// Put a reservation on a node directly, as another process would.
    pub fn reserve(&self, id: &NodeId, holder: &ConductorId) {
        self.nodes.swap_reservation(id, None, Some(holder)).unwrap();
    }
}

/// Node store over a cluster's nodes whose `save` can be made to fail
/// or panic.
#[derive(Debug, Default)]
pub struct FaultyNodeStore {
    inner: InMemoryNodeStore,
    failing: Mutex<HashSet<NodeId>>,
    panic_next_save: AtomicBool,
}

impl FaultyNodeStore {
    pub fn over(cluster: &Cluster) -> Arc<Self> {
        Arc::new(Self {
            inner: (*cluster.nodes).clone(),
            ..Self::default()
        })
    }

    /// Reject every save of `id`.
    pub fn fail_saves_of(&self, id: NodeId) {
        self.failing.lock().insert(id);
    }

    /// Panic inside the next save, once.
    pub fn panic_on_next_save(&self) {
        self.panic_next_save.store(true, Ordering::SeqCst);
    }
}

impl NodeStore for FaultyNodeStore {
    fn create(&self, node: Node) -> Result<Node, StoreError> {
        self.inner.create(node)
    }

    fn get(&self, id: &NodeId) -> Result<Node, StoreError> {
        self.inner.get(id)
    }

    fn list(&self) -> Result<Vec<Node>, StoreError> {
        self.inner.list()
    }

    fn save(&self, node: &Node) -> Result<Node, StoreError> {
        if self.panic_next_save.swap(false, Ordering::SeqCst) {
            panic!("storage engine crashed");
        }
        if self.failing.lock().contains(&node.id) {
            return Err(StoreError::Backend("write rejected".to_string()));
        }
        self.inner.save(node)
    }

    fn swap_reservation(
        &self,
        id: &NodeId,
        expected: Option<&ConductorId>,
        new: Option<&ConductorId>,
    ) -> Result<Node, StoreError> {
        self.inner.swap_reservation(id, expected, new)
    }
}

pub fn single(driver: FakeDriver) -> (Cluster, TaskManager, Arc<FakeDriver>) {
    single_with(config("cond-a"), driver)
}

pub fn single_with(
    config: ConductorConfig,
    driver: FakeDriver,
) -> (Cluster, TaskManager, Arc<FakeDriver>) {
    let cluster = Cluster::new();
    let driver = Arc::new(driver);
    let manager = cluster.manager(config, Arc::clone(&driver));
    (cluster, manager, driver)
}

pub fn config_without_inventory(name: &str) -> ConductorConfig {
    let mut config = config(name);
    config.inventory_backend = InventoryBackend::Disabled;
    config
}

// ─── Log Capture ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
}

/// Collects every event's level and message.
#[derive(Debug, Clone, Default)]
pub struct CapturedEvents {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedEvents {
    /// Install a capturing subscriber on the current thread.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let captured = Self::default();
        let subscriber = Registry::default().with(captured.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (captured, guard)
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    /// Whether an event at `level` mentions `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|event| event.level == level && event.message.contains(needle))
    }
}

impl<S: Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.0,
        });
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
