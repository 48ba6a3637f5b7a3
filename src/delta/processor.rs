//! Delta application and subscription reconciliation.
//!
//! Every entry point runs under the graph's re-entrancy guard: while a storage
//! applies incoming links, its own outbound listeners see `graph.applying()`
//! pointing at it and do not write the change back.
//!
//! Incoming links may come from a graph with another root. Its root (the
//! untyped link at `ROOT_SEQUENCE`) and its `<root>:<Name>` built-ins are
//! adopted and rewritten to this graph's own system ids before anything is
//! applied.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use super::sort::sort_dump;
use crate::constants::{MAX_SEQUENCE, ROOT_SEQUENCE};
use crate::graph::{Field, Graph, SystemIds};
use crate::storage::markers::StorageMarker;
use crate::system::metrics;
use crate::types::{
    AssocId, Data, DeltaOperation, GraphError, Result, StorageDelta, StorageDump, StorageLink, SyncError,
};

/// Result of applying one delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOutcome {
    /// Association created
    Inserted,
    /// Existing association changed
    Updated,
    /// Association destroyed
    Deleted,
    /// Nothing to do
    Skipped,
}

impl ApplyOutcome {
    /// Lowercase name, used as metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Inserted => "inserted",
            ApplyOutcome::Updated => "updated",
            ApplyOutcome::Deleted => "deleted",
            ApplyOutcome::Skipped => "skipped",
        }
    }
}

/// Counts of a dump application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionReport {
    /// Associations created
    pub inserted: usize,
    /// Associations changed
    pub updated: usize,
    /// Associations destroyed
    pub deleted: usize,
    /// Links left untouched
    pub skipped: usize,
}

impl SubscriptionReport {
    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Inserted => self.inserted += 1,
            ApplyOutcome::Updated => self.updated += 1,
            ApplyOutcome::Deleted => self.deleted += 1,
            ApplyOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Inserted + updated + deleted
    pub fn changes(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// A graph rebuilt from a dump together with the storage that holds it
#[derive(Debug)]
pub struct Restored {
    /// Rebuilt graph
    pub graph: Graph,
    /// Storage association every restored link is marked for
    pub storage: AssocId,
    /// What the initial subscription did
    pub report: SubscriptionReport,
}

fn require_storage(graph: &Graph, storage: &AssocId) -> Result<()> {
    if graph.is_storage(storage) {
        Ok(())
    } else {
        Err(GraphError::NotAStorage { received: storage.to_string() }.into())
    }
}

fn guarded<T>(graph: &mut Graph, storage: &AssocId, apply: impl FnOnce(&mut Graph) -> Result<T>) -> Result<T> {
    let previous = graph.set_applying(Some(storage.clone()));
    let result = apply(graph);
    graph.set_applying(previous);
    result
}

/// Apply one insert/update/delete for `storage`.
///
/// Insert and update both upsert. Unless `skip_validation`, every reference of
/// an incoming link must be the root or already stored in `storage`. An update
/// that changes nothing is skipped without events.
pub fn apply_delta(
    graph: &mut Graph,
    delta: &StorageDelta,
    storage: &AssocId,
    skip_validation: bool,
) -> Result<ApplyOutcome> {
    require_storage(graph, storage)?;
    let outcome = guarded(graph, storage, |graph| match delta.operation {
        DeltaOperation::Insert | DeltaOperation::Update => {
            let link = delta.link.as_ref().ok_or_else(|| {
                SyncError::MalformedDelta(format!("{} delta without link", delta.operation.as_str()))
            })?;
            check_sequence(link)?;
            adopt_foreign_system(graph, link);
            let link = localize(graph, link);
            if !skip_validation {
                validate_references(graph, &link, storage)?;
            }
            upsert_link(graph, &link, storage)
        }
        DeltaOperation::Delete => {
            let id = delta
                .target()
                .ok_or_else(|| SyncError::MalformedDelta("delete delta without id".to_string()))?;
            let id = graph.local_id(id).clone();
            delete_link(graph, &id, storage)
        }
    })?;

    metrics::record_delta(outcome.as_str());
    debug!(storage = %storage, operation = delta.operation.as_str(), outcome = outcome.as_str(), "delta applied");
    Ok(outcome)
}

/// Reconcile `storage` with a full dump, last writer wins.
///
/// An empty dump clears every non-protected association stored for `storage`.
/// Otherwise links that are new, strictly newer, or different at an equal
/// timestamp are upserted in dependency order, then stored associations absent
/// from the dump are destroyed unless protected.
pub fn apply_subscription(graph: &mut Graph, dump: &StorageDump, storage: &AssocId) -> Result<SubscriptionReport> {
    require_storage(graph, storage)?;
    let report = guarded(graph, storage, |graph| {
        let mut report = fold_links(graph, dump, storage)?;

        let present: HashSet<AssocId> = dump.links.iter().map(|link| graph.local_id(&link.id).clone()).collect();
        for id in graph.stored_ids(storage) {
            if present.contains(&id) || graph.is_protected(&id) || graph.is_system(&id) {
                continue;
            }
            report.record(delete_link(graph, &id, storage)?);
        }
        Ok(report)
    })?;

    metrics::record_subscription();
    debug!(storage = %storage, ?report, "subscription applied");
    Ok(report)
}

/// Fold a dump into `storage` like [`apply_subscription`] without the deletion phase
pub fn merge_dump(graph: &mut Graph, dump: &StorageDump, storage: &AssocId) -> Result<SubscriptionReport> {
    require_storage(graph, storage)?;
    let report = guarded(graph, storage, |graph| fold_links(graph, dump, storage))?;
    debug!(storage = %storage, ?report, "dump merged");
    Ok(report)
}

/// Rebuild a graph from a dump.
///
/// The root is the untyped link carrying the root sequence number (or the first
/// untyped link); the dump's id list seeds the allocator.
pub fn restore(dump: &StorageDump) -> Result<Restored> {
    for link in &dump.links {
        check_sequence(link)?;
    }
    let root = dump
        .links
        .iter()
        .find(|link| link.type_id.is_none() && link.sequence == Some(ROOT_SEQUENCE))
        .or_else(|| dump.links.iter().find(|link| link.type_id.is_none()))
        .map(|link| link.id.clone());
    let mut graph = match root {
        Some(root) => Graph::with_seeds(root, dump.ids.iter().flatten().cloned()),
        None if dump.is_empty() => Graph::new(),
        None => return Err(SyncError::MalformedDelta("dump has no untyped root link".to_string()).into()),
    };

    // Keep the storage out of the dump's sequence range.
    let above = dump
        .links
        .iter()
        .filter_map(|link| link.sequence)
        .chain(graph.max_sequence())
        .max()
        .map(|max| max + 1);
    let storage = AssocId::generate();
    graph.materialize(&storage, above, None)?;
    let storage_type = graph.system().storage.clone();
    graph.set_type(&storage, Some(&storage_type))?;
    graph.default_marking(&storage)?;

    let report = apply_subscription(&mut graph, dump, &storage)?;
    Ok(Restored { graph, storage, report })
}

fn fold_links(graph: &mut Graph, dump: &StorageDump, storage: &AssocId) -> Result<SubscriptionReport> {
    let mut report = SubscriptionReport::default();
    if dump.is_empty() {
        return Ok(report);
    }

    for link in &dump.links {
        check_sequence(link)?;
        adopt_foreign_system(graph, link);
    }

    let links: Vec<StorageLink> = dump.links.iter().map(|link| localize(graph, link)).collect();
    let mut incoming = Vec::new();
    for link in links {
        if should_apply(graph, &link) {
            incoming.push(link);
        } else {
            mark(graph, &link, storage)?;
            report.record(ApplyOutcome::Skipped);
            metrics::record_delta_skipped();
        }
    }

    for link in sort_dump(incoming, true)? {
        let outcome = upsert_link(graph, &link, storage)?;
        metrics::record_delta(outcome.as_str());
        report.record(outcome);
    }
    Ok(report)
}

/// Last-writer-wins selection
fn should_apply(graph: &Graph, link: &StorageLink) -> bool {
    match graph.updated_at(&link.id) {
        None => true,
        Some(0) => true,
        Some(local) if link.updated_at > local => true,
        Some(local) if link.updated_at == local => differs(graph, link),
        Some(_) => false,
    }
}

fn check_sequence(link: &StorageLink) -> Result<()> {
    match link.sequence {
        Some(received) if received > MAX_SEQUENCE => {
            Err(SyncError::SequenceOutOfRange { id: link.id.clone(), received }.into())
        }
        _ => Ok(()),
    }
}

/// Learn the root of any other graph whose system ids `link` carries
fn adopt_foreign_system(graph: &mut Graph, link: &StorageLink) {
    if link.type_id.is_none() && link.sequence == Some(ROOT_SEQUENCE) {
        graph.adopt_foreign_root(&link.id);
    }
    let roots: Vec<AssocId> = std::iter::once(&link.id)
        .chain(link.references())
        .filter(|id| !graph.contains(graph.local_id(id)))
        .filter_map(SystemIds::root_of)
        .collect();
    for root in roots {
        graph.adopt_foreign_root(&root);
    }
}

/// Copy of `link` with foreign system ids replaced by this graph's own
fn localize(graph: &Graph, link: &StorageLink) -> StorageLink {
    let mut local = link.clone();
    local.id = graph.local_id(&link.id).clone();
    for slot in [&mut local.type_id, &mut local.from, &mut local.to, &mut local.value] {
        if let Some(id) = slot {
            let translated = graph.local_id(id).clone();
            *id = translated;
        }
    }
    if local.id != link.id {
        // System ids keep the sequence numbers this graph gave them.
        local.sequence = None;
    }
    local
}

fn validate_references(graph: &Graph, link: &StorageLink, storage: &AssocId) -> Result<()> {
    for reference in link.references() {
        if reference == graph.root() || reference == &link.id || graph.is_stored(reference, storage, None) {
            continue;
        }
        return Err(SyncError::MissingDependency { id: link.id.clone(), dependency: reference.clone() }.into());
    }
    Ok(())
}

fn link_field(link: &StorageLink, field: Field) -> Option<&AssocId> {
    match field {
        Field::Type => link.type_id.as_ref(),
        Field::From => link.from.as_ref(),
        Field::To => link.to.as_ref(),
        Field::Value => link.value.as_ref(),
    }
}

/// Payload the link asks for, `None` meaning keep the local one.
///
/// Arrays never travel over the wire, so a link without payload leaves a local
/// array in place.
fn incoming_data(graph: &Graph, link: &StorageLink) -> Option<Option<Data>> {
    let incoming = link.data();
    let local = graph.data(&link.id);
    match (local, &incoming) {
        (Some(Data::Array(_)), None) => None,
        (local, incoming) if local == incoming.as_ref() => None,
        _ => Some(incoming),
    }
}

/// Whether applying `link` would change the local association
fn differs(graph: &Graph, link: &StorageLink) -> bool {
    if !graph.contains(&link.id) {
        return true;
    }
    Field::ALL
        .into_iter()
        .any(|field| graph.link(&link.id, field) != link_field(link, field))
        || incoming_data(graph, link).is_some()
        || (!graph.is_system(&link.id) && graph.is_protected(&link.id) != link.is_protected())
}

fn upsert_link(graph: &mut Graph, link: &StorageLink, storage: &AssocId) -> Result<ApplyOutcome> {
    let id = &link.id;
    let created = graph.materialize(id, link.sequence, Some(link.created_at))?;

    if !created && !differs(graph, link) {
        mark(graph, link, storage)?;
        return Ok(ApplyOutcome::Skipped);
    }

    for field in Field::ALL {
        graph.set_link(id, field, link_field(link, field))?;
    }
    if let Some(data) = incoming_data(graph, link) {
        graph.set_data(id, data)?;
    }
    if !graph.is_system(id) {
        graph.set_protected(id, link.is_protected())?;
    }
    graph.restore_updated_at(id, link.updated_at)?;
    mark(graph, link, storage)?;

    Ok(if created { ApplyOutcome::Inserted } else { ApplyOutcome::Updated })
}

fn mark(graph: &mut Graph, link: &StorageLink, storage: &AssocId) -> Result<()> {
    if !graph.contains(&link.id) {
        return Ok(());
    }
    // System types stay `oneTrue` so their instances are not swept in.
    let marker = if link.type_id.as_ref() == Some(graph.root()) && !graph.is_system(&link.id) {
        StorageMarker::TypedTrue
    } else {
        StorageMarker::OneTrue
    };
    graph.set_marker(&link.id, storage, marker)?;
    Ok(())
}

fn delete_link(graph: &mut Graph, id: &AssocId, storage: &AssocId) -> Result<ApplyOutcome> {
    if !graph.contains(id) {
        return Ok(ApplyOutcome::Skipped);
    }
    if graph.is_system(id) {
        warn!(id = %id, "refusing to delete a system association");
        return Ok(ApplyOutcome::Skipped);
    }
    graph.unmark(id, storage)?;
    graph.destroy(id)?;
    Ok(ApplyOutcome::Deleted)
}
