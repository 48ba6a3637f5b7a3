//! Association graph: identity, relation indices, payloads and events.
//!
//! A [`Graph`] is an isolated arena. Every association has a stable id, a
//! sequence number, timestamps and up to four One-side links (`type`, `from`,
//! `to`, `value`) whose Many sides (`typed`, `out`, `in`, `valued`) are
//! maintained automatically. Mutations queue events which are dispatched to
//! listeners once the mutation has completed.

pub mod allocator;
pub mod events;
pub mod handlers;
pub mod lifecycle;
pub mod relation;


use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

pub use allocator::{IdAllocator, SequenceAllocator};
pub use events::{Event, EventArgs, EventBus, EventCategory, EventKind, Handler, SubscriptionHandle};
pub use handlers::{ArrayHandler, DataHandler, ScalarHandler};
pub use lifecycle::{Lifecycle, Stage};
pub use relation::{Field, Relation, Relations};

use crate::constants::{BUILTIN_TYPES, LIFESTAGE_NAMES, SYSTEM_ID_SEPARATOR};
use crate::core::config::GraphConfig;
use crate::storage::markers::{MarkerCatalog, StorageMarker};
use crate::system::metrics;
use crate::types::{AssocId, Data, DataKind, Error, GraphError, Result, StorageLink, SyncError};

/// Current time in milliseconds since the epoch
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Ids of the root and built-in associations of one graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemIds {
    /// Root association
    pub root: AssocId,
    /// `String` type
    pub string: AssocId,
    /// `Number` type
    pub number: AssocId,
    /// `Function` type
    pub function: AssocId,
    /// `Array` type
    pub array: AssocId,
    /// `Storage` type
    pub storage: AssocId,
    /// `Lifestate` type
    pub lifestate: AssocId,
    stages: [AssocId; 5],
}

impl SystemIds {
    /// Derive every system id from the root id
    pub fn derive(root: &AssocId) -> Self {
        let named = |name: &str| AssocId::new(format!("{root}{SYSTEM_ID_SEPARATOR}{name}"));
        let [string, number, function, array, storage, lifestate] = BUILTIN_TYPES.map(named);
        Self {
            root: root.clone(),
            string,
            number,
            function,
            array,
            storage,
            lifestate,
            stages: LIFESTAGE_NAMES.map(named),
        }
    }

    /// Stage node
    pub fn stage(&self, stage: Stage) -> &AssocId {
        let index = match stage {
            Stage::Mounting => 0,
            Stage::Mounted => 1,
            Stage::Remounting => 2,
            Stage::Unmounting => 3,
            Stage::Unmounted => 4,
        };
        &self.stages[index]
    }

    /// Built-in type ids in creation order
    pub fn types(&self) -> [&AssocId; 6] {
        [&self.string, &self.number, &self.function, &self.array, &self.storage, &self.lifestate]
    }

    /// Every system id in creation order
    pub fn all(&self) -> Vec<&AssocId> {
        std::iter::once(&self.root)
            .chain(self.types())
            .chain(self.stages.iter())
            .collect()
    }

    /// Whether `id` is a system association of this graph
    pub fn contains(&self, id: &AssocId) -> bool {
        self.all().into_iter().any(|system| system == id)
    }

    /// Root of the graph whose built-in `id` would be, judged by the `<root>:<Name>` shape
    pub fn root_of(id: &AssocId) -> Option<AssocId> {
        let (root, name) = id.as_str().rsplit_once(SYSTEM_ID_SEPARATOR)?;
        let builtin = BUILTIN_TYPES.contains(&name) || LIFESTAGE_NAMES.contains(&name);
        (builtin && !root.is_empty()).then(|| AssocId::new(root))
    }
}

#[derive(Debug, Clone)]
struct Record {
    sequence: u64,
    created_at: i64,
    updated_at: i64,
    protected: bool,
    data: Option<Data>,
}

/// Point-in-time copy of one association
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationSnapshot {
    /// Association id
    pub id: AssocId,
    /// Sequence number
    pub sequence: u64,
    /// `type` link
    pub type_id: Option<AssocId>,
    /// `from` link
    pub from: Option<AssocId>,
    /// `to` link
    pub to: Option<AssocId>,
    /// `value` link
    pub value: Option<AssocId>,
    /// Own payload
    pub data: Option<Data>,
    /// Creation time (ms)
    pub created_at: i64,
    /// Last own-field mutation (ms)
    pub updated_at: i64,
    /// Exempt from reconciliation deletes
    pub protected: bool,
}

impl AssociationSnapshot {
    /// Wire projection
    pub fn to_link(&self) -> StorageLink {
        let mut link = StorageLink::new(self.id.clone());
        link.type_id = self.type_id.clone();
        link.from = self.from.clone();
        link.to = self.to.clone();
        link.value = self.value.clone();
        link.created_at = self.created_at;
        link.updated_at = self.updated_at;
        link.sequence = Some(self.sequence);
        link.set_data(self.data.as_ref());
        link.protected = self.protected.then_some(true);
        link
    }
}

/// In-memory associative graph
pub struct Graph {
    system: SystemIds,
    ids: IdAllocator,
    sequences: SequenceAllocator,
    records: HashMap<AssocId, Record>,
    relations: Relations,
    markers: MarkerCatalog,
    data_handlers: HashMap<AssocId, Arc<dyn DataHandler>>,
    events: EventBus,
    pending: Vec<Event>,
    applying: Option<AssocId>,
    /// System ids of other graphs, keyed to ours
    foreign: HashMap<AssocId, AssocId>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("root", &self.system.root)
            .field("associations", &self.records.len())
            .field("events", &self.events)
            .finish()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Graph with a fresh random root
    pub fn new() -> Self {
        Self::with_config(&GraphConfig::default())
    }

    /// Graph with a fixed root id. Two graphs with the same root agree on every system id.
    pub fn with_root(root: impl Into<AssocId>) -> Self {
        Self::build(root.into(), Vec::new())
    }

    /// Graph from configuration (root id and id seed pool)
    pub fn with_config(config: &GraphConfig) -> Self {
        let root = config
            .root_id
            .as_deref()
            .map(AssocId::new)
            .unwrap_or_else(AssocId::generate);
        Self::build(root, config.seed_ids.iter().map(AssocId::new).collect())
    }

    /// Graph with a fixed root whose fresh ids are drawn from `seeds` first
    pub fn with_seeds(root: impl Into<AssocId>, seeds: impl IntoIterator<Item = AssocId>) -> Self {
        Self::build(root.into(), seeds.into_iter().collect())
    }

    fn build(root: AssocId, seeds: Vec<AssocId>) -> Self {
        let system = SystemIds::derive(&root);
        let mut graph = Self {
            system,
            ids: IdAllocator::with_seeds(seeds),
            sequences: SequenceAllocator::new(),
            records: HashMap::new(),
            relations: Relations::new(),
            markers: MarkerCatalog::new(),
            data_handlers: HashMap::new(),
            events: EventBus::new(),
            pending: Vec::new(),
            applying: None,
            foreign: HashMap::new(),
        };
        graph.install_system();
        graph
    }

    fn install_system(&mut self) {
        let system = self.system.clone();
        self.install(&system.root, None);
        for builtin in system.types() {
            self.install(builtin, Some(&system.root));
        }
        for stage in Stage::ALL {
            self.install(system.stage(stage), Some(&system.lifestate));
        }

        for (id, kind) in [
            (&system.string, DataKind::String),
            (&system.number, DataKind::Number),
            (&system.function, DataKind::Function),
        ] {
            self.data_handlers.insert(id.clone(), Arc::new(ScalarHandler(kind)));
        }
        self.data_handlers.insert(system.array.clone(), Arc::new(ArrayHandler));
    }

    fn install(&mut self, id: &AssocId, type_id: Option<&AssocId>) {
        self.ids.claim(id);
        let sequence = self.sequences.allocate(id);
        let now = now_ms();
        self.records.insert(
            id.clone(),
            Record { sequence, created_at: now, updated_at: now, protected: true, data: None },
        );
        if let Some(type_id) = type_id {
            self.relations.get_mut(Field::Type).set_one(id, Some(type_id));
        }
    }

    // ---- accessors ----

    /// Root association
    pub fn root(&self) -> &AssocId {
        &self.system.root
    }

    /// System association ids
    pub fn system(&self) -> &SystemIds {
        &self.system
    }

    /// Whether `id` is a system association
    pub fn is_system(&self, id: &AssocId) -> bool {
        self.system.contains(id)
    }

    /// Listener registry
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Storage marker catalog
    pub fn markers(&self) -> &MarkerCatalog {
        &self.markers
    }

    /// Whether `id` exists
    pub fn contains(&self, id: &AssocId) -> bool {
        self.records.contains_key(id)
    }

    /// Number of live associations
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Never true: the system associations always exist
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Live ids, unordered
    pub fn ids(&self) -> impl Iterator<Item = &AssocId> {
        self.records.keys()
    }

    /// Live ids ordered by sequence number
    pub fn ids_by_sequence(&self) -> Vec<AssocId> {
        let mut ids: Vec<(u64, &AssocId)> =
            self.records.iter().map(|(id, record)| (record.sequence, id)).collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// Sequence number recorded for `id`, including destroyed ids
    pub fn sequence(&self, id: &AssocId) -> Option<u64> {
        self.sequences.get(id)
    }

    /// Highest sequence number handed out so far
    pub fn max_sequence(&self) -> Option<u64> {
        self.sequences.max()
    }

    /// Creation time of `id` (ms)
    pub fn created_at(&self, id: &AssocId) -> Option<i64> {
        self.records.get(id).map(|r| r.created_at)
    }

    /// Last own-field mutation of `id` (ms)
    pub fn updated_at(&self, id: &AssocId) -> Option<i64> {
        self.records.get(id).map(|r| r.updated_at)
    }

    /// Whether `id` is exempt from reconciliation deletes
    pub fn is_protected(&self, id: &AssocId) -> bool {
        self.records.get(id).map_or(false, |r| r.protected)
    }

    /// Payload of `id`
    pub fn data(&self, id: &AssocId) -> Option<&Data> {
        self.records.get(id).and_then(|r| r.data.as_ref())
    }

    /// One side of `field` on `id`
    pub fn link(&self, id: &AssocId, field: Field) -> Option<&AssocId> {
        self.relations.get(field).get_one(id)
    }

    /// `type` link of `id`
    pub fn type_of(&self, id: &AssocId) -> Option<&AssocId> {
        self.link(id, Field::Type)
    }

    /// `from` link of `id`
    pub fn from_of(&self, id: &AssocId) -> Option<&AssocId> {
        self.link(id, Field::From)
    }

    /// `to` link of `id`
    pub fn to_of(&self, id: &AssocId) -> Option<&AssocId> {
        self.link(id, Field::To)
    }

    /// `value` link of `id`
    pub fn value_of(&self, id: &AssocId) -> Option<&AssocId> {
        self.link(id, Field::Value)
    }

    /// Many side of `field` on `id`, unordered
    pub fn many<'a>(&'a self, id: &AssocId, field: Field) -> impl Iterator<Item = &'a AssocId> + 'a {
        self.relations.get(field).get_many(id).into_iter().flatten()
    }

    fn many_sorted(&self, id: &AssocId, field: Field) -> Vec<AssocId> {
        let mut ids: Vec<AssocId> = self.many(id, field).cloned().collect();
        ids.sort_by_key(|id| self.sequences.get(id));
        ids
    }

    /// Associations whose `type` is `id`, by sequence
    pub fn typed(&self, id: &AssocId) -> Vec<AssocId> {
        self.many_sorted(id, Field::Type)
    }

    /// Associations whose `from` is `id`, by sequence
    pub fn out(&self, id: &AssocId) -> Vec<AssocId> {
        self.many_sorted(id, Field::From)
    }

    /// Associations whose `to` is `id` (the `in` set), by sequence
    pub fn incoming(&self, id: &AssocId) -> Vec<AssocId> {
        self.many_sorted(id, Field::To)
    }

    /// Associations whose `value` is `id`, by sequence
    pub fn valued(&self, id: &AssocId) -> Vec<AssocId> {
        self.many_sorted(id, Field::Value)
    }

    /// Whether `ancestor` appears on the type chain of `id`
    pub fn is_a(&self, id: &AssocId, ancestor: &AssocId) -> bool {
        let mut visited = HashSet::new();
        let mut current = self.type_of(id);
        while let Some(type_id) = current {
            if type_id == ancestor {
                return true;
            }
            if !visited.insert(type_id) {
                return false;
            }
            current = self.type_of(type_id);
        }
        false
    }

    /// Follow `value` links to the first association without one.
    ///
    /// A cycle without a terminal resolves to `id` itself.
    pub fn resolved_value(&self, id: &AssocId) -> Option<&AssocId> {
        let (start, _) = self.records.get_key_value(id)?;
        let mut visited = HashSet::new();
        let mut current = start;
        loop {
            visited.insert(current);
            match self.value_of(current) {
                None => return Some(current),
                Some(next) if visited.contains(next) => return Some(start),
                Some(next) => current = next,
            }
        }
    }

    /// Payload of [`Graph::resolved_value`]
    pub fn resolved_data(&self, id: &AssocId) -> Option<&Data> {
        self.resolved_value(id).and_then(|resolved| self.data(resolved))
    }

    /// Copy of the current state of `id`
    pub fn snapshot(&self, id: &AssocId) -> Option<AssociationSnapshot> {
        let record = self.records.get(id)?;
        Some(AssociationSnapshot {
            id: id.clone(),
            sequence: record.sequence,
            type_id: self.type_of(id).cloned(),
            from: self.from_of(id).cloned(),
            to: self.to_of(id).cloned(),
            value: self.value_of(id).cloned(),
            data: record.data.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            protected: record.protected,
        })
    }

    /// Storage currently applying an incoming dump or delta
    pub fn applying(&self) -> Option<&AssocId> {
        self.applying.as_ref()
    }

    /// Map the system ids of a graph rooted at `root` onto this graph's own.
    ///
    /// Returns whether the root was new. Links received from that graph go
    /// through [`Graph::local_id`] before they are applied, so its `String`
    /// type resolves to ours and its root is never imported.
    pub fn adopt_foreign_root(&mut self, root: &AssocId) -> bool {
        if root == &self.system.root || self.foreign.contains_key(root) {
            return false;
        }
        let ours = self.system.clone();
        let theirs = SystemIds::derive(root);
        for (their_id, our_id) in theirs.all().into_iter().zip(ours.all()) {
            self.foreign.insert(their_id.clone(), our_id.clone());
        }
        debug!(root = %root, local = %ours.root, "foreign root adopted");
        true
    }

    /// This graph's id for `id`: our system id for an adopted foreign one, else `id`
    pub fn local_id<'a>(&'a self, id: &'a AssocId) -> &'a AssocId {
        self.foreign.get(id).unwrap_or(id)
    }

    pub(crate) fn set_applying(&mut self, storage: Option<AssocId>) -> Option<AssocId> {
        std::mem::replace(&mut self.applying, storage)
    }

    // ---- creation and destruction ----

    /// New untyped association
    pub fn new_association(&mut self) -> AssocId {
        let id = self.ids.next_id();
        self.insert_record(&id, None, None);
        self.flush_events();
        id
    }

    /// New association with `type` set
    pub fn new_typed(&mut self, type_id: &AssocId) -> Result<AssocId> {
        if !self.contains(type_id) {
            return Err(self.not_found(type_id));
        }
        let id = self.ids.next_id();
        self.insert_record(&id, None, None);
        self.set_link(&id, Field::Type, Some(type_id))?;
        Ok(id)
    }

    /// Create `id` with an explicit sequence and creation time if it does not exist.
    ///
    /// Returns whether the association was created. Existing ids are checked
    /// against `sequence`; a disagreement is an error.
    pub fn materialize(
        &mut self,
        id: &AssocId,
        sequence: Option<u64>,
        created_at: Option<i64>,
    ) -> Result<bool> {
        if self.contains(id) {
            if let Some(sequence) = sequence {
                self.sequences.assign(id, Some(sequence))?;
            }
            return Ok(false);
        }
        self.ids.claim(id);
        let sequence = self.sequences.assign(id, sequence)?;
        self.insert_record(id, Some(sequence), created_at);
        self.flush_events();
        Ok(true)
    }

    fn insert_record(&mut self, id: &AssocId, sequence: Option<u64>, created_at: Option<i64>) {
        let sequence = sequence.unwrap_or_else(|| self.sequences.allocate(id));
        let created_at = created_at.unwrap_or_else(now_ms);
        self.records.insert(
            id.clone(),
            Record { sequence, created_at, updated_at: created_at, protected: false, data: None },
        );
        metrics::record_association_created();
        debug!(id = %id, sequence, "association created");
        self.queue(id.clone(), EventKind::Created, EventArgs::None);
    }

    /// Destroy `id`.
    ///
    /// Own links are removed (targets lose `id` from their Many sides), own Many
    /// sets are dropped without unlinking referrers, markers and listeners are
    /// removed. The sequence number stays recorded.
    pub fn destroy(&mut self, id: &AssocId) -> Result<()> {
        if self.is_system(id) {
            return Err(GraphError::SystemAssociation { id: id.clone() }.into());
        }
        let snapshot = self.snapshot(id).ok_or_else(|| self.not_found(id))?;

        for field in Field::ALL {
            if let Some(previous) = self.relations.get_mut(field).delete(id) {
                self.queue(previous, EventKind::ManyDeleted(field), EventArgs::Member(id.clone()));
            }
            self.relations.get_mut(field).drop_many(id);
        }
        self.markers.remove_all(id);
        self.markers.remove_storage(id);
        self.data_handlers.remove(id);
        self.records.remove(id);

        metrics::record_association_destroyed();
        debug!(id = %id, "association destroyed");
        self.queue(id.clone(), EventKind::Destroyed, EventArgs::Snapshot(Box::new(snapshot)));
        self.flush_events();
        self.events.forget(id);
        Ok(())
    }

    /// Flag `id` as exempt from deletion during reconciliation
    pub fn set_protected(&mut self, id: &AssocId, protected: bool) -> Result<()> {
        let record = self.record_mut(id)?;
        record.protected = protected;
        Ok(())
    }

    /// Overwrite `updated_at`, used when applying a link from a storage
    pub(crate) fn restore_updated_at(&mut self, id: &AssocId, updated_at: i64) -> Result<()> {
        self.record_mut(id)?.updated_at = updated_at;
        Ok(())
    }

    // ---- links ----

    /// Set or clear one link.
    ///
    /// Fires, in order: `{field}Setted`/`{field}Deleted` on `id`,
    /// `{many}Deleted` on the previous target, `{many}Added` on the new target,
    /// `{many}Changed` on every association sharing `id`'s Many set, and a
    /// propagating `dataChanged` when the `value` link moved.
    pub fn set_link(&mut self, id: &AssocId, field: Field, target: Option<&AssocId>) -> Result<()> {
        if !self.contains(id) {
            return Err(self.not_found(id));
        }
        if let Some(target) = target {
            if !self.contains(target) {
                return Err(SyncError::UnresolvedLink {
                    id: id.clone(),
                    field: field.one_name(),
                    target: target.clone(),
                }
                .into());
            }
        }
        if self.link(id, field) == target {
            return Ok(());
        }

        let resolved_before = (field == Field::Value).then(|| self.resolved_data(id).cloned());
        let previous = self.relations.get_mut(field).set_one(id, target);
        self.touch(id);
        debug!(id = %id, field = %field, target = ?target, "link set");

        let args = EventArgs::Link { previous: previous.clone(), current: target.cloned() };
        match target {
            Some(_) => self.queue(id.clone(), EventKind::OneSetted(field), args),
            None => self.queue(id.clone(), EventKind::OneDeleted(field), args),
        }
        if let Some(previous) = previous {
            self.queue(previous, EventKind::ManyDeleted(field), EventArgs::Member(id.clone()));
        }
        if let Some(target) = target {
            self.queue(target.clone(), EventKind::ManyAdded(field), EventArgs::Member(id.clone()));
        }
        for referrer in self.many_sorted(id, field) {
            self.queue(referrer, EventKind::ManyChanged(field), EventArgs::Member(id.clone()));
        }
        if let Some(before) = resolved_before {
            let after = self.resolved_data(id).cloned();
            self.queue(
                id.clone(),
                EventKind::DataChanged,
                EventArgs::Data { previous: before, current: after },
            );
        }

        self.flush_events();
        Ok(())
    }

    /// Set or clear the `type` link of `id`
    pub fn set_type(&mut self, id: &AssocId, target: Option<&AssocId>) -> Result<()> {
        self.set_link(id, Field::Type, target)
    }

    /// Set or clear the `from` link of `id`
    pub fn set_from(&mut self, id: &AssocId, target: Option<&AssocId>) -> Result<()> {
        self.set_link(id, Field::From, target)
    }

    /// Set or clear the `to` link of `id`
    pub fn set_to(&mut self, id: &AssocId, target: Option<&AssocId>) -> Result<()> {
        self.set_link(id, Field::To, target)
    }

    /// Set or clear the `value` link of `id`
    pub fn set_value(&mut self, id: &AssocId, target: Option<&AssocId>) -> Result<()> {
        self.set_link(id, Field::Value, target)
    }

    // ---- data ----

    /// Attach a payload capability to a type association
    pub fn register_data_handler(&mut self, type_id: &AssocId, handler: Arc<dyn DataHandler>) -> Result<()> {
        if !self.contains(type_id) {
            return Err(self.not_found(type_id));
        }
        self.data_handlers.insert(type_id.clone(), handler);
        Ok(())
    }

    /// Nearest data handler on the type chain of `id`
    pub fn data_handler(&self, id: &AssocId) -> Option<Arc<dyn DataHandler>> {
        let mut visited = HashSet::new();
        let mut current = self.type_of(id);
        while let Some(type_id) = current {
            if let Some(handler) = self.data_handlers.get(type_id) {
                return Some(handler.clone());
            }
            if !visited.insert(type_id) {
                return None;
            }
            current = self.type_of(type_id);
        }
        None
    }

    /// Replace (or clear with `None`) the payload of `id`
    pub fn set_data(&mut self, id: &AssocId, data: Option<Data>) -> Result<()> {
        if !self.contains(id) {
            return Err(self.not_found(id));
        }
        if let Some(data) = &data {
            let handler = self
                .data_handler(id)
                .ok_or_else(|| GraphError::NoDataHandler { id: id.clone() })?;
            handler.check(id, data)?;
        }

        let record = self.record_mut(id)?;
        if record.data == data {
            return Ok(());
        }
        let previous = std::mem::replace(&mut record.data, data.clone());
        self.touch(id);

        self.queue(
            id.clone(),
            EventKind::DataSetted,
            EventArgs::Data { previous: previous.clone(), current: data.clone() },
        );
        self.queue(id.clone(), EventKind::DataChanged, EventArgs::Data { previous, current: data });
        self.flush_events();
        Ok(())
    }

    /// Append an item to an array payload; returns its index
    pub fn data_add(&mut self, id: &AssocId, item: Data) -> Result<usize> {
        self.require_items(id)?;
        if item.kind() == DataKind::Array {
            return Err(Error::invalid_argument(format!("array items must be scalar on {id}")));
        }

        let record = self.record_mut(id)?;
        let previous = record.data.clone();
        let items = match record.data.get_or_insert_with(|| Data::Array(Vec::new())) {
            Data::Array(items) => items,
            other => {
                return Err(GraphError::PayloadKind {
                    id: id.clone(),
                    expected: DataKind::Array,
                    received: other.kind(),
                }
                .into())
            }
        };
        items.push(item.clone());
        let index = items.len() - 1;
        let current = record.data.clone();
        self.touch(id);

        self.queue(id.clone(), EventKind::DataAdd, EventArgs::Item { index, item });
        self.queue(id.clone(), EventKind::DataChanged, EventArgs::Data { previous, current });
        self.flush_events();
        Ok(index)
    }

    /// Remove the first item equal to `item`; returns whether one was removed
    pub fn data_delete(&mut self, id: &AssocId, item: &Data) -> Result<bool> {
        self.require_items(id)?;
        let record = self.record_mut(id)?;
        let previous = record.data.clone();
        let Some(Data::Array(items)) = record.data.as_mut() else {
            return Ok(false);
        };
        let Some(index) = items.iter().position(|existing| existing == item) else {
            return Ok(false);
        };
        let removed = items.remove(index);
        let current = record.data.clone();
        self.touch(id);

        self.queue(id.clone(), EventKind::DataDelete, EventArgs::Item { index, item: removed });
        self.queue(id.clone(), EventKind::DataChanged, EventArgs::Data { previous, current });
        self.flush_events();
        Ok(true)
    }

    /// Empty an array payload
    pub fn data_clear(&mut self, id: &AssocId) -> Result<()> {
        self.require_items(id)?;
        let record = self.record_mut(id)?;
        let previous = record.data.clone();
        match record.data.as_mut() {
            Some(Data::Array(items)) if !items.is_empty() => items.clear(),
            _ => return Ok(()),
        }
        let current = record.data.clone();
        self.touch(id);

        self.queue(id.clone(), EventKind::DataClear, EventArgs::None);
        self.queue(id.clone(), EventKind::DataChanged, EventArgs::Data { previous, current });
        self.flush_events();
        Ok(())
    }

    fn require_items(&self, id: &AssocId) -> Result<()> {
        if !self.contains(id) {
            return Err(self.not_found(id));
        }
        let handler = self
            .data_handler(id)
            .ok_or_else(|| GraphError::NoDataHandler { id: id.clone() })?;
        if !handler.supports_items() {
            return Err(GraphError::PayloadKind {
                id: id.clone(),
                expected: DataKind::Array,
                received: handler.kind(),
            }
            .into());
        }
        Ok(())
    }

    // ---- storage markers ----

    /// Whether `id` is a Storage association (its type chain reaches `Storage`)
    pub fn is_storage(&self, id: &AssocId) -> bool {
        self.contains(id) && self.is_a(id, &self.system.storage)
    }

    fn require_storage(&self, storage: &AssocId) -> Result<()> {
        if self.is_storage(storage) {
            return Ok(());
        }
        let received = match (self.contains(storage), self.type_of(storage)) {
            (false, _) => format!("unknown association {storage}"),
            (true, Some(type_id)) => format!("{storage} of type {type_id}"),
            (true, None) => format!("untyped association {storage}"),
        };
        Err(GraphError::NotAStorage { received }.into())
    }

    /// Mark `id` for `storage`; returns whether the marker was new
    pub fn set_marker(&mut self, id: &AssocId, storage: &AssocId, marker: StorageMarker) -> Result<bool> {
        self.require_storage(storage)?;
        if !self.contains(id) {
            return Err(self.not_found(id));
        }
        let added = self.markers.set(id, storage, marker);
        if added {
            self.queue(
                id.clone(),
                EventKind::Marked,
                EventArgs::Marker { storage: storage.clone(), marker },
            );
            self.flush_events();
        }
        Ok(added)
    }

    /// Remove a marker; returns whether it was present
    pub fn delete_marker(&mut self, id: &AssocId, storage: &AssocId, marker: StorageMarker) -> Result<bool> {
        self.require_storage(storage)?;
        let removed = self.markers.delete(id, storage, marker);
        if removed {
            self.queue(
                id.clone(),
                EventKind::Unmarked,
                EventArgs::Marker { storage: storage.clone(), marker },
            );
            self.flush_events();
        }
        Ok(removed)
    }

    /// Remove every marker `id` carries for `storage`
    pub fn unmark(&mut self, id: &AssocId, storage: &AssocId) -> Result<()> {
        let markers: Vec<StorageMarker> = self
            .markers
            .get(id, storage)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for marker in markers {
            self.delete_marker(id, storage, marker)?;
        }
        Ok(())
    }

    /// Whether `id` belongs to `storage`.
    ///
    /// With `marker`, only that marker set directly on `id` counts. Otherwise a
    /// direct true marker includes, a direct false marker excludes, and the
    /// nearest `typedTrue`/`typedFalse` on the type chain decides.
    pub fn is_stored(&self, id: &AssocId, storage: &AssocId, marker: Option<StorageMarker>) -> bool {
        if let Some(marker) = marker {
            return self.markers.has(id, storage, marker);
        }
        if let Some(direct) = self.markers.get(id, storage) {
            if direct.contains(&StorageMarker::OneTrue) || direct.contains(&StorageMarker::TypedTrue) {
                return true;
            }
            if direct.contains(&StorageMarker::OneFalse) || direct.contains(&StorageMarker::TypedFalse) {
                return false;
            }
        }

        let mut visited = HashSet::new();
        let mut current = self.type_of(id);
        while let Some(type_id) = current {
            if !visited.insert(type_id) {
                break;
            }
            if self.markers.has(type_id, storage, StorageMarker::TypedTrue) {
                return true;
            }
            if self.markers.has(type_id, storage, StorageMarker::TypedFalse) {
                return false;
            }
            current = self.type_of(type_id);
        }
        false
    }

    /// Every association stored in `storage`, by sequence
    pub fn stored_ids(&self, storage: &AssocId) -> Vec<AssocId> {
        let mut candidates: HashSet<&AssocId> = HashSet::new();
        let mut queue: VecDeque<&AssocId> = VecDeque::new();
        for id in self.markers.marked_for(storage) {
            if candidates.insert(id) && self.markers.has(id, storage, StorageMarker::TypedTrue) {
                queue.push_back(id);
            }
        }
        while let Some(type_id) = queue.pop_front() {
            for typed in self.many(type_id, Field::Type) {
                if candidates.insert(typed) {
                    queue.push_back(typed);
                }
            }
        }

        let mut stored: Vec<(u64, AssocId)> = candidates
            .into_iter()
            .filter(|id| self.contains(id) && self.is_stored(id, storage, None))
            .filter_map(|id| self.sequences.get(id).map(|sequence| (sequence, id.clone())))
            .collect();
        stored.sort_unstable();
        stored.into_iter().map(|(_, id)| id).collect()
    }

    /// Mark the root and every association typed by the root as `oneTrue`
    pub fn default_marking(&mut self, storage: &AssocId) -> Result<()> {
        self.require_storage(storage)?;
        let root = self.system.root.clone();
        let mut targets = vec![root.clone()];
        targets.extend(self.typed(&root));
        for id in targets {
            self.set_marker(&id, storage, StorageMarker::OneTrue)?;
        }
        Ok(())
    }

    // ---- internals ----

    fn record_mut(&mut self, id: &AssocId) -> Result<&mut Record> {
        match self.records.get_mut(id) {
            Some(record) => Ok(record),
            None => Err(GraphError::AssociationNotFound { id: id.clone() }.into()),
        }
    }

    fn not_found(&self, id: &AssocId) -> Error {
        GraphError::AssociationNotFound { id: id.clone() }.into()
    }

    fn touch(&mut self, id: &AssocId) {
        if let Some(record) = self.records.get_mut(id) {
            record.updated_at = now_ms().max(record.updated_at);
        }
    }

    fn queue(&mut self, target: AssocId, kind: EventKind, args: EventArgs) {
        self.pending.push(Event::new(target, kind, args));
    }

    fn flush_events(&mut self) {
        let batch = std::mem::take(&mut self.pending);
        for event in &batch {
            self.events.dispatch(&*self, event);
        }
    }
}
