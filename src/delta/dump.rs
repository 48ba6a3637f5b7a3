//! Dump generation.

use tracing::debug;

use crate::graph::Graph;
use crate::types::{AssocId, GraphError, Result, StorageDump};

/// Project every association stored in `storage` (directly marked or inherited
/// through the type chain), ordered by sequence.
///
/// The dump carries the id list so a restoring graph can seed its allocator.
pub fn generate_dump(graph: &Graph, storage: &AssocId) -> Result<StorageDump> {
    if !graph.is_storage(storage) {
        return Err(GraphError::NotAStorage { received: storage.to_string() }.into());
    }

    let ids = graph.stored_ids(storage);
    let links = ids
        .iter()
        .filter_map(|id| graph.snapshot(id))
        .map(|snapshot| snapshot.to_link())
        .collect::<Vec<_>>();
    debug!(storage = %storage, links = links.len(), "dump generated");

    Ok(StorageDump { ids: Some(ids), links })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::markers::StorageMarker;
    use crate::types::Data;

    #[test]
    fn dump_is_ordered_by_sequence_and_projects_payloads() {
        let mut graph = Graph::with_root("root");
        let storage_type = graph.system().storage.clone();
        let storage = graph.new_typed(&storage_type).unwrap();
        graph.default_marking(&storage).unwrap();

        let string = graph.system().string.clone();
        let name = graph.new_typed(&string).unwrap();
        graph.set_data(&name, Some(Data::from("ada"))).unwrap();
        graph.set_marker(&name, &storage, StorageMarker::OneTrue).unwrap();

        let dump = generate_dump(&graph, &storage).unwrap();
        let sequences: Vec<u64> = dump.links.iter().filter_map(|l| l.sequence).collect();
        let mut sorted = sequences.clone();
        sorted.sort_unstable();
        assert_eq!(sequences, sorted);

        assert_eq!(dump.links[0].id.as_str(), "root");
        let last = dump.links.last().unwrap();
        assert_eq!(last.id, name);
        assert_eq!(last.string.as_deref(), Some("ada"));
        assert_eq!(last.type_id.as_ref(), Some(&string));
        assert_eq!(dump.ids.as_ref().map(Vec::len), Some(dump.links.len()));
    }

    #[test]
    fn non_storage_argument_is_rejected() {
        let mut graph = Graph::new();
        let plain = graph.new_association();
        assert!(generate_dump(&graph, &plain).unwrap_err().is_invariant_violation());
    }
}
