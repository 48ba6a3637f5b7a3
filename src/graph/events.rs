//! Event bus and value-chain propagation.
//!
//! Mutations queue [`Event`]s on the graph; once the mutation completes they are
//! dispatched here. Targeted listeners are keyed by `(id, kind)`, global
//! listeners see every primary event. Propagating kinds are re-dispatched to
//! every association whose `value` points at the target, recursively.

use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{error, trace};

use super::{AssociationSnapshot, Field, Graph};
use crate::storage::markers::StorageMarker;
use crate::system::metrics;
use crate::types::{AssocId, Data};

/// Event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// One side set (`typeSetted`, `fromSetted`, ...)
    OneSetted(Field),
    /// One side removed (`typeDeleted`, ...)
    OneDeleted(Field),
    /// Member added to a Many set (`typedAdded`, `outAdded`, ...)
    ManyAdded(Field),
    /// Member removed from a Many set (`typedDeleted`, ...)
    ManyDeleted(Field),
    /// An association sharing this id's Many set changed its own link
    ManyChanged(Field),
    /// Association materialized
    Created,
    /// Association destroyed
    Destroyed,
    /// Payload replaced
    DataSetted,
    /// Payload (or value chain) changed
    DataChanged,
    /// Array item appended
    DataAdd,
    /// Array item removed
    DataDelete,
    /// Array emptied
    DataClear,
    /// Storage marker set
    Marked,
    /// Storage marker removed
    Unmarked,
}

/// Whether an event stays on its target or travels up `valued` chains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    /// Delivered to the target only
    Local,
    /// Delivered to the target and every association reaching it through `value`
    Propagating,
}

impl EventKind {
    /// Canonical event name
    pub fn name(&self) -> &'static str {
        use Field::*;
        match self {
            EventKind::OneSetted(Type) => "typeSetted",
            EventKind::OneSetted(From) => "fromSetted",
            EventKind::OneSetted(To) => "toSetted",
            EventKind::OneSetted(Value) => "valueSetted",
            EventKind::OneDeleted(Type) => "typeDeleted",
            EventKind::OneDeleted(From) => "fromDeleted",
            EventKind::OneDeleted(To) => "toDeleted",
            EventKind::OneDeleted(Value) => "valueDeleted",
            EventKind::ManyAdded(Type) => "typedAdded",
            EventKind::ManyAdded(From) => "outAdded",
            EventKind::ManyAdded(To) => "inAdded",
            EventKind::ManyAdded(Value) => "valuedAdded",
            EventKind::ManyDeleted(Type) => "typedDeleted",
            EventKind::ManyDeleted(From) => "outDeleted",
            EventKind::ManyDeleted(To) => "inDeleted",
            EventKind::ManyDeleted(Value) => "valuedDeleted",
            EventKind::ManyChanged(Type) => "typedChanged",
            EventKind::ManyChanged(From) => "outChanged",
            EventKind::ManyChanged(To) => "inChanged",
            EventKind::ManyChanged(Value) => "valuedChanged",
            EventKind::Created => "created",
            EventKind::Destroyed => "destroyed",
            EventKind::DataSetted => "dataSetted",
            EventKind::DataChanged => "dataChanged",
            EventKind::DataAdd => "dataAdd",
            EventKind::DataDelete => "dataDelete",
            EventKind::DataClear => "dataClear",
            EventKind::Marked => "marked",
            EventKind::Unmarked => "unmarked",
        }
    }

    /// Propagation category
    pub fn category(&self) -> EventCategory {
        match self {
            EventKind::DataChanged
            | EventKind::DataAdd
            | EventKind::DataDelete
            | EventKind::DataClear => EventCategory::Propagating,
            _ => EventCategory::Local,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event payload
#[derive(Debug, Clone, PartialEq)]
pub enum EventArgs {
    /// No payload
    None,
    /// One-side change on the target
    Link {
        /// Previous target
        previous: Option<AssocId>,
        /// Current target
        current: Option<AssocId>,
    },
    /// Many-side change: `member` joined, left or changed
    Member(AssocId),
    /// Payload replacement
    Data {
        /// Previous payload
        previous: Option<Data>,
        /// Current payload
        current: Option<Data>,
    },
    /// Array item added or removed at `index`
    Item {
        /// Position in the array
        index: usize,
        /// Item
        item: Data,
    },
    /// Storage marker change
    Marker {
        /// Storage association
        storage: AssocId,
        /// Marker
        marker: StorageMarker,
    },
    /// Last state of a destroyed association
    Snapshot(Box<AssociationSnapshot>),
}

/// A dispatched event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Association the event is delivered to
    pub target: AssocId,
    /// Association the change happened on (differs from `target` when propagated)
    pub origin: AssocId,
    /// Kind
    pub kind: EventKind,
    /// Payload
    pub args: EventArgs,
}

impl Event {
    /// Primary event on `target`
    pub fn new(target: AssocId, kind: EventKind, args: EventArgs) -> Self {
        Self { origin: target.clone(), target, kind, args }
    }

    /// Whether this event was delivered through value-chain propagation
    pub fn is_propagated(&self) -> bool {
        self.target != self.origin
    }

    fn retarget(&self, target: AssocId) -> Self {
        Self {
            target,
            origin: self.origin.clone(),
            kind: self.kind,
            args: self.args.clone(),
        }
    }
}

/// Handler closure. Gets read-only access to the graph.
pub type Handler = Arc<dyn Fn(&Graph, &Event) -> anyhow::Result<()> + Send + Sync>;

/// Disposer handle returned by registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

#[derive(Clone)]
struct Listener {
    handle: SubscriptionHandle,
    once: bool,
    handler: Handler,
}

type ListenerKey = (AssocId, EventKind);

/// Per-graph listener registry
pub struct EventBus {
    next_handle: AtomicU64,
    targeted: DashMap<ListenerKey, Vec<Listener>>,
    global: Mutex<Vec<Listener>>,
    locations: DashMap<SubscriptionHandle, Option<ListenerKey>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("targeted", &self.targeted.len())
            .field("global", &self.global.lock().len())
            .finish()
    }
}

impl EventBus {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            targeted: DashMap::new(),
            global: Mutex::new(Vec::new()),
            locations: DashMap::new(),
        }
    }

    /// Listen for `kind` on `id`
    pub fn on<F>(&self, id: &AssocId, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Graph, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Some((id.clone(), kind)), false, Arc::new(handler))
    }

    /// Listen for the next `kind` on `id` only
    pub fn once<F>(&self, id: &AssocId, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Graph, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Some((id.clone(), kind)), true, Arc::new(handler))
    }

    /// Listen for every primary event of the graph
    pub fn on_any<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Graph, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(None, false, Arc::new(handler))
    }

    /// Remove a listener. Returns false when the handle is unknown or already fired.
    pub fn off(&self, handle: SubscriptionHandle) -> bool {
        let Some((_, location)) = self.locations.remove(&handle) else {
            return false;
        };
        match location {
            Some(key) => {
                let mut removed = false;
                if let Some(mut listeners) = self.targeted.get_mut(&key) {
                    let before = listeners.len();
                    listeners.retain(|l| l.handle != handle);
                    removed = listeners.len() != before;
                }
                self.targeted.remove_if(&key, |_, listeners| listeners.is_empty());
                removed
            }
            None => {
                let mut global = self.global.lock();
                let before = global.len();
                global.retain(|l| l.handle != handle);
                global.len() != before
            }
        }
    }

    /// Number of targeted listeners registered for `id`
    pub fn listener_count(&self, id: &AssocId) -> usize {
        self.targeted
            .iter()
            .filter(|entry| &entry.key().0 == id)
            .map(|entry| entry.value().len())
            .sum()
    }

    /// Drop every targeted registration of `id`
    pub fn forget(&self, id: &AssocId) {
        self.targeted.retain(|key, _| &key.0 != id);
        self.locations
            .retain(|_, location| location.as_ref().map_or(true, |key| &key.0 != id));
    }

    fn register(&self, key: Option<ListenerKey>, once: bool, handler: Handler) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let listener = Listener { handle, once, handler };
        match &key {
            Some(key) => self.targeted.entry(key.clone()).or_default().push(listener),
            None => self.global.lock().push(listener),
        }
        self.locations.insert(handle, key);
        handle
    }

    /// Snapshot the handlers for `key`, removing `once` listeners before they run.
    fn take_targeted(&self, key: &ListenerKey) -> Vec<Handler> {
        let mut fired_once = Vec::new();
        let handlers = match self.targeted.get_mut(key) {
            Some(mut listeners) => {
                let handlers = listeners.iter().map(|l| l.handler.clone()).collect();
                listeners.retain(|l| {
                    if l.once {
                        fired_once.push(l.handle);
                    }
                    !l.once
                });
                handlers
            }
            None => Vec::new(),
        };
        if !fired_once.is_empty() {
            self.targeted.remove_if(key, |_, listeners| listeners.is_empty());
            for handle in fired_once {
                self.locations.remove(&handle);
            }
        }
        handlers
    }

    fn global_handlers(&self) -> Vec<Handler> {
        self.global.lock().iter().map(|l| l.handler.clone()).collect()
    }

    /// Deliver one primary event: targeted listeners, global listeners, then the
    /// value chain for propagating kinds.
    pub(crate) fn dispatch(&self, graph: &Graph, event: &Event) {
        trace!(target = %event.target, kind = %event.kind, "dispatching event");
        self.deliver(graph, event, self.take_targeted(&(event.target.clone(), event.kind)));
        self.deliver(graph, event, self.global_handlers());

        if event.kind.category() == EventCategory::Propagating {
            let mut visited = HashSet::new();
            visited.insert(event.target.clone());
            self.propagate(graph, event, &mut visited);
        }
    }

    fn propagate(&self, graph: &Graph, event: &Event, visited: &mut HashSet<AssocId>) {
        let referrers: Vec<AssocId> = graph.many(&event.target, Field::Value).cloned().collect();
        for referrer in referrers {
            if !visited.insert(referrer.clone()) {
                continue;
            }
            let forwarded = event.retarget(referrer);
            self.deliver(graph, &forwarded, self.take_targeted(&(forwarded.target.clone(), forwarded.kind)));
            self.propagate(graph, &forwarded, visited);
        }
    }

    fn deliver(&self, graph: &Graph, event: &Event, handlers: Vec<Handler>) {
        for handler in handlers {
            metrics::record_event_dispatched();
            match catch_unwind(AssertUnwindSafe(|| handler(graph, event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    metrics::record_handler_failure();
                    error!(id = %event.target, kind = %event.kind, error = %err, "event handler failed");
                }
                Err(_) => {
                    metrics::record_handler_failure();
                    error!(id = %event.target, kind = %event.kind, "event handler panicked");
                }
            }
        }
    }
}
