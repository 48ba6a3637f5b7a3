//! Storages: lifecycle-managed associations bridging a graph and a medium.
//!
//! A [`Storage`] owns a set of marked associations. While mounted it watches
//! the graph and turns mutations of stored associations into
//! [`StorageBackend`] calls, serialized through one [`OperationChain`].
//! Incoming dumps and deltas from the medium are applied with the
//! [`delta`](crate::delta) engine and never echoed back.

pub mod chain;
pub mod contract;
pub mod markers;
pub mod memory;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

pub use chain::{ErrorLog, OperationChain};
pub use contract::{BackendOp, StorageBackend};
pub use markers::{MarkerCatalog, StorageMarker};
pub use memory::MemoryBackend;

use crate::core::config::SyncConfig;
use crate::delta::{self, ApplyOutcome, SubscriptionReport};
use crate::graph::{
    AssociationSnapshot, Event, EventArgs, EventKind, Field, Graph, Lifecycle, Stage, SubscriptionHandle,
};
use crate::types::{AssocId, Error, GraphError, Result, StorageDelta, StorageDump};

/// Construction options of a [`Storage`]
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Dump applied right after construction
    pub initial_dump: Option<StorageDump>,
    /// Existing Storage association to reuse instead of creating one
    pub existing: Option<AssocId>,
    /// Mark the root and its direct instances
    pub default_marking: bool,
    /// Record protocol errors and unmount instead of returning them
    pub soft_errors: bool,
    /// Capacity of the error list
    pub max_recorded_errors: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl StorageOptions {
    /// Options derived from the sync section of the configuration
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            initial_dump: None,
            existing: None,
            default_marking: config.default_marking,
            soft_errors: config.soft_errors,
            max_recorded_errors: config.max_recorded_errors,
        }
    }

    /// Apply `dump` after construction
    pub fn with_initial_dump(mut self, dump: StorageDump) -> Self {
        self.initial_dump = Some(dump);
        self
    }

    /// Reuse an existing Storage association
    pub fn with_existing(mut self, id: AssocId) -> Self {
        self.existing = Some(id);
        self
    }

    /// Toggle soft-error mode
    pub fn with_soft_errors(mut self, soft_errors: bool) -> Self {
        self.soft_errors = soft_errors;
        self
    }

    /// Toggle default marking
    pub fn with_default_marking(mut self, default_marking: bool) -> Self {
        self.default_marking = default_marking;
        self
    }
}

/// State reachable from graph listeners
struct Shared {
    id: AssocId,
    /// What the medium is known to hold, per id
    synced: Mutex<HashMap<AssocId, AssociationSnapshot>>,
    chain: OperationChain,
    errors: Arc<ErrorLog>,
}

impl Shared {
    fn observe(&self, graph: &Graph, event: &Event) -> anyhow::Result<()> {
        if self.chain.is_closed() {
            return Ok(());
        }
        let echo = graph.applying() == Some(&self.id);

        match (&event.kind, &event.args) {
            (EventKind::Destroyed, EventArgs::Snapshot(snapshot)) => {
                if self.synced.lock().remove(&event.target).is_some() && !echo {
                    self.chain.enqueue(BackendOp::Delete(snapshot.to_link()));
                }
            }
            (EventKind::Created, _) => self.reconcile(graph, &event.target, echo),
            (EventKind::OneSetted(field) | EventKind::OneDeleted(field), _) => {
                self.reconcile(graph, &event.target, echo);
                if *field == Field::Type {
                    self.reconcile_typed(graph, &event.target, echo);
                }
            }
            (EventKind::Marked | EventKind::Unmarked, EventArgs::Marker { storage, marker }) if storage == &self.id => {
                self.reconcile(graph, &event.target, echo);
                if marker.is_inherited() {
                    self.reconcile_typed(graph, &event.target, echo);
                }
            }
            (EventKind::DataSetted, _) => self.reconcile_data(graph, &event.target, echo),
            _ => {}
        }
        Ok(())
    }

    /// Bring the medium in line with whether `id` is stored now.
    ///
    /// An update identical to what the medium already holds is not sent.
    fn reconcile(&self, graph: &Graph, id: &AssocId, echo: bool) {
        let current = graph.snapshot(id).filter(|_| graph.is_stored(id, &self.id, None));
        let mut synced = self.synced.lock();
        let unchanged = synced.get(id).map(|sent| current.as_ref() == Some(sent));
        let op = match (current, unchanged) {
            (Some(_), Some(true)) | (None, None) => None,
            (Some(snapshot), None) => {
                let op = BackendOp::Insert(snapshot.to_link());
                synced.insert(id.clone(), snapshot);
                Some(op)
            }
            (Some(snapshot), Some(false)) => {
                let op = BackendOp::Update(snapshot.to_link());
                synced.insert(id.clone(), snapshot);
                Some(op)
            }
            (None, Some(_)) => {
                let sent = synced.remove(id);
                graph.snapshot(id).or(sent).map(|s| BackendOp::Delete(s.to_link()))
            }
        };
        drop(synced);

        if let (Some(op), false) = (op, echo) {
            debug!(storage = %self.id, id = %id, operation = op.name(), "queueing backend operation");
            self.chain.enqueue(op);
        }
    }

    /// Reconcile every association whose type chain passes through `id`
    fn reconcile_typed(&self, graph: &Graph, id: &AssocId, echo: bool) {
        let mut visited: HashSet<AssocId> = HashSet::new();
        let mut queue: VecDeque<AssocId> = graph.typed(id).into();
        while let Some(next) = queue.pop_front() {
            if !visited.insert(next.clone()) {
                continue;
            }
            self.reconcile(graph, &next, echo);
            queue.extend(graph.typed(&next));
        }
    }

    fn reconcile_data(&self, graph: &Graph, id: &AssocId, echo: bool) {
        let current = graph.snapshot(id).filter(|_| graph.is_stored(id, &self.id, None));
        let mut synced = self.synced.lock();
        let unchanged = synced.get(id).map(|sent| current.as_ref() == Some(sent));
        match (current, unchanged) {
            (Some(_), Some(true)) => {}
            (Some(snapshot), Some(false)) => {
                let link = snapshot.to_link();
                synced.insert(id.clone(), snapshot);
                drop(synced);
                if !echo {
                    self.chain.enqueue(BackendOp::DataChanged(link));
                }
            }
            _ => {
                drop(synced);
                self.reconcile(graph, id, echo);
            }
        }
    }

    /// Record what the medium holds after an incoming dump or delta
    fn absorb<'a>(&self, graph: &Graph, incoming: impl IntoIterator<Item = &'a AssocId>) {
        let stored = |id: &AssocId| graph.snapshot(id).filter(|_| graph.is_stored(id, &self.id, None));
        let mut synced = self.synced.lock();
        synced.retain(|id, _| graph.contains(id) && graph.is_stored(id, &self.id, None));
        for id in incoming {
            let id = graph.local_id(id);
            if let Some(snapshot) = stored(id) {
                synced.insert(id.clone(), snapshot);
            }
        }
    }
}

/// Storage association bound to one medium
pub struct Storage {
    shared: Arc<Shared>,
    lifecycle: Lifecycle,
    listener: Option<SubscriptionHandle>,
    soft_errors: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("id", &self.shared.id)
            .field("stage", &self.lifecycle.stage())
            .field("watching", &self.listener.is_some())
            .field("chain", &self.shared.chain)
            .finish()
    }
}

impl Storage {
    /// Create (or adopt) a Storage association and start its operation chain.
    ///
    /// Must run inside a tokio runtime. The storage is not watching the graph
    /// until [`Storage::mount`].
    pub fn new(graph: &mut Graph, backend: Arc<dyn StorageBackend>, options: StorageOptions) -> Result<Self> {
        let (id, created) = match &options.existing {
            Some(existing) => {
                if !graph.is_storage(existing) {
                    let received = match graph.type_of(existing) {
                        Some(type_id) => format!("{existing} of type {type_id}"),
                        None if graph.contains(existing) => format!("untyped association {existing}"),
                        None => format!("unknown association {existing}"),
                    };
                    return Err(GraphError::NotAStorage { received }.into());
                }
                (existing.clone(), false)
            }
            None => {
                let storage_type = graph.system().storage.clone();
                (graph.new_typed(&storage_type)?, true)
            }
        };

        let errors = Arc::new(ErrorLog::new(options.max_recorded_errors));
        let chain = match OperationChain::spawn(id.clone(), backend, errors.clone()) {
            Ok(chain) => chain,
            Err(err) => {
                if created {
                    graph.destroy(&id)?;
                }
                return Err(err);
            }
        };

        let shared = Arc::new(Shared { id: id.clone(), synced: Mutex::new(HashMap::new()), chain, errors });
        let effect_shared = shared.clone();
        let lifecycle = Lifecycle::new(id.clone()).with_effect(Box::new(move |_graph: &Graph, stage: Stage| {
            effect_shared.chain.enqueue(BackendOp::Stage(stage));
            Ok(())
        }));

        if options.default_marking {
            graph.default_marking(&id)?;
        }
        if let Some(dump) = &options.initial_dump {
            let report = delta::apply_subscription(graph, dump, &id)?;
            debug!(storage = %id, inserted = report.inserted, updated = report.updated, "initial dump applied");
            shared.absorb(graph, dump.links.iter().map(|link| &link.id));
        }

        info!(storage = %id, adopted = !created, "storage created");
        Ok(Self { shared, lifecycle, listener: None, soft_errors: options.soft_errors })
    }

    /// Storage association id
    pub fn id(&self) -> &AssocId {
        &self.shared.id
    }

    /// Current lifecycle stage
    pub fn stage(&self) -> Option<Stage> {
        self.lifecycle.stage()
    }

    /// Whether the storage is mounted
    pub fn is_mounted(&self) -> bool {
        self.lifecycle.is_mounted()
    }

    /// Whether the storage was destroyed
    pub fn is_destroyed(&self) -> bool {
        self.shared.chain.is_closed()
    }

    /// Errors recorded so far, oldest first
    pub fn errors(&self) -> Vec<String> {
        self.shared.errors.entries()
    }

    /// Mount, start watching and push stored associations the medium does not hold yet
    pub fn mount(&mut self, graph: &mut Graph) -> Result<()> {
        self.ensure_alive()?;
        self.lifecycle.mount(graph)?;
        self.watch(graph);
        self.push_unsynced(graph);
        Ok(())
    }

    /// `Remounting → Mounted`, re-pushing anything not yet synced
    pub fn remount(&mut self, graph: &mut Graph) -> Result<()> {
        self.ensure_alive()?;
        self.lifecycle.remount(graph)?;
        self.watch(graph);
        self.push_unsynced(graph);
        Ok(())
    }

    /// Stop watching and move to `Unmounted`
    pub fn unmount(&mut self, graph: &mut Graph) -> Result<()> {
        self.detach(graph);
        self.lifecycle.unmount(graph)
    }

    /// Attach the graph listener translating mutations into backend calls
    pub fn watch(&mut self, graph: &Graph) {
        if self.listener.is_some() {
            return;
        }
        let shared = self.shared.clone();
        self.listener = Some(graph.events().on_any(move |graph, event| shared.observe(graph, event)));
    }

    /// Current dump of the stored associations
    pub fn generate_dump(&self, graph: &Graph) -> Result<StorageDump> {
        delta::generate_dump(graph, &self.shared.id)
    }

    /// Apply a full dump received from the medium
    pub fn apply_external_dump(&mut self, graph: &mut Graph, dump: &StorageDump) -> Result<SubscriptionReport> {
        self.ensure_alive()?;
        match delta::apply_subscription(graph, dump, &self.shared.id) {
            Ok(report) => {
                self.shared.absorb(graph, dump.links.iter().map(|link| &link.id));
                Ok(report)
            }
            Err(err) => self.soft_fail(graph, err).map(|_| SubscriptionReport::default()),
        }
    }

    /// Apply one delta received from the medium
    pub fn apply_external_delta(&mut self, graph: &mut Graph, incoming: &StorageDelta) -> Result<ApplyOutcome> {
        self.ensure_alive()?;
        match delta::apply_delta(graph, incoming, &self.shared.id, false) {
            Ok(outcome) => {
                self.shared.absorb(graph, incoming.target());
                Ok(outcome)
            }
            Err(err) => self.soft_fail(graph, err).map(|_| ApplyOutcome::Skipped),
        }
    }

    /// Wait until every operation queued so far has reached the backend
    pub async fn flush(&self) -> Result<()> {
        self.shared.chain.flush().await
    }

    /// Detach, unmount, notify the backend and remove the storage from the graph.
    ///
    /// Operations already queued still run; later ones are skipped.
    pub fn destroy(&mut self, graph: &mut Graph) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        self.detach(graph);
        if self.lifecycle.is_mounted() {
            self.lifecycle.unmount(graph)?;
        }
        self.shared.chain.enqueue(BackendOp::Destroy);
        self.shared.chain.close();

        if let Some(link) = self.lifecycle.link().cloned() {
            if graph.contains(&link) {
                graph.destroy(&link)?;
            }
        }
        if graph.contains(&self.shared.id) {
            graph.destroy(&self.shared.id)?;
        }
        info!(storage = %self.shared.id, "storage destroyed");
        Ok(())
    }

    fn detach(&mut self, graph: &Graph) {
        if let Some(handle) = self.listener.take() {
            graph.events().off(handle);
        }
    }

    fn push_unsynced(&self, graph: &Graph) {
        let mut synced = self.shared.synced.lock();
        for id in graph.stored_ids(&self.shared.id) {
            if synced.contains_key(&id) {
                continue;
            }
            if let Some(snapshot) = graph.snapshot(&id) {
                self.shared.chain.enqueue(BackendOp::Insert(snapshot.to_link()));
                synced.insert(id, snapshot);
            }
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::invalid_argument(format!("storage {} was destroyed", self.shared.id)));
        }
        Ok(())
    }

    /// In soft mode, protocol errors are recorded and the storage unmounts
    fn soft_fail(&mut self, graph: &mut Graph, err: Error) -> Result<()> {
        if !self.soft_errors || !err.is_protocol_error() {
            return Err(err);
        }
        warn!(storage = %self.shared.id, error = %err, "protocol error, unmounting storage");
        self.shared.errors.push(err.to_string());
        if self.lifecycle.is_mounted() {
            self.unmount(graph)?;
        } else {
            self.detach(graph);
        }
        Ok(())
    }
}
