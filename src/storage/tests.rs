use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::*;
use crate::types::{Data, DeltaOperation, StorageLink};

/// Backend recording every call as `"<call> <id>"`
#[derive(Default)]
struct Recording {
    calls: Mutex<Vec<String>>,
    fail_inserts: bool,
}

impl Recording {
    fn failing() -> Self {
        Self { fail_inserts: true, ..Self::default() }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn push(&self, call: &str, link: &StorageLink) {
        self.calls.lock().push(format!("{call} {}", link.id));
    }
}

#[async_trait]
impl StorageBackend for Recording {
    async fn on_link_insert(&self, link: StorageLink) -> anyhow::Result<()> {
        if self.fail_inserts {
            anyhow::bail!("medium unavailable");
        }
        self.push("insert", &link);
        Ok(())
    }

    async fn on_link_update(&self, link: StorageLink) -> anyhow::Result<()> {
        self.push("update", &link);
        Ok(())
    }

    async fn on_link_delete(&self, link: StorageLink) -> anyhow::Result<()> {
        self.push("delete", &link);
        Ok(())
    }

    async fn on_data_changed(&self, link: StorageLink) -> anyhow::Result<()> {
        self.push("data", &link);
        Ok(())
    }

    async fn on_stage(&self, stage: Stage) -> anyhow::Result<()> {
        self.calls.lock().push(format!("stage {stage}"));
        Ok(())
    }

    async fn on_destroy(&self) -> anyhow::Result<()> {
        self.calls.lock().push("destroy".to_string());
        Ok(())
    }
}

fn malformed() -> StorageDelta {
    StorageDelta { operation: DeltaOperation::Insert, id: None, link: None }
}

#[tokio::test]
async fn two_graphs_converge_through_a_memory_backend() {
    let medium = Arc::new(MemoryBackend::new());
    let deltas = medium.subscribe();

    let mut alice = Graph::with_root("shared");
    let mut alice_storage = Storage::new(&mut alice, medium.clone(), StorageOptions::default()).unwrap();
    alice_storage.mount(&mut alice).unwrap();

    let root = alice.root().clone();
    let string = alice.system().string.clone();
    let user_type = alice.new_typed(&root).unwrap();
    alice.set_marker(&user_type, alice_storage.id(), StorageMarker::TypedTrue).unwrap();
    let instance = alice.new_typed(&user_type).unwrap();
    let text = alice.new_typed(&string).unwrap();
    alice.set_marker(&text, alice_storage.id(), StorageMarker::OneTrue).unwrap();
    alice.set_data(&text, Some(Data::from("hello"))).unwrap();
    alice.set_value(&instance, Some(&text)).unwrap();
    alice_storage.flush().await.unwrap();

    assert_eq!(medium.stages(), vec![Stage::Mounting, Stage::Mounted]);

    let mut bob = Graph::with_root("shared");
    let mut bob_storage = Storage::new(&mut bob, Arc::new(MemoryBackend::new()), StorageOptions::default()).unwrap();
    for delta in deltas.drain() {
        bob_storage.apply_external_delta(&mut bob, &delta).unwrap();
    }
    assert_eq!(bob.type_of(&instance), Some(&user_type));
    assert_eq!(bob.resolved_data(&instance), Some(&Data::from("hello")));
    assert_eq!(bob.sequence(&instance), alice.sequence(&instance));

    let mut carol = Graph::with_root("shared");
    let options = StorageOptions::default().with_initial_dump(medium.snapshot());
    let carol_storage = Storage::new(&mut carol, Arc::new(MemoryBackend::new()), options).unwrap();
    assert_eq!(carol.resolved_data(&instance), Some(&Data::from("hello")));
    assert!(carol.is_stored(&instance, carol_storage.id(), None));
}

#[tokio::test]
async fn incoming_changes_are_not_echoed() {
    let mut source = Graph::with_root("shared");
    let source_storage = Storage::new(&mut source, Arc::new(MemoryBackend::new()), StorageOptions::default()).unwrap();
    let string = source.system().string.clone();
    let text = source.new_typed(&string).unwrap();
    source.set_marker(&text, source_storage.id(), StorageMarker::OneTrue).unwrap();
    let link = source.snapshot(&text).unwrap().to_link();

    let backend = Arc::new(Recording::default());
    let mut graph = Graph::with_root("shared");
    let mut storage = Storage::new(&mut graph, backend.clone(), StorageOptions::default()).unwrap();
    storage.mount(&mut graph).unwrap();
    storage.flush().await.unwrap();
    let after_mount = backend.calls().len();
    assert!(backend.calls().contains(&"stage Mounted".to_string()));

    let outcome = storage.apply_external_delta(&mut graph, &StorageDelta::insert(link)).unwrap();
    assert_eq!(outcome, ApplyOutcome::Inserted);
    storage.flush().await.unwrap();
    assert_eq!(backend.calls().len(), after_mount);

    graph.set_data(&text, Some(Data::from("local edit"))).unwrap();
    storage.flush().await.unwrap();
    assert_eq!(backend.calls().last(), Some(&format!("data {text}")));
}

#[tokio::test]
async fn typed_marker_reconciles_existing_instances() {
    let backend = Arc::new(Recording::default());
    let mut graph = Graph::new();
    let mut storage = Storage::new(&mut graph, backend.clone(), StorageOptions::default()).unwrap();
    storage.mount(&mut graph).unwrap();

    let user_type = graph.new_association();
    let instance = graph.new_typed(&user_type).unwrap();
    let nested = graph.new_typed(&instance).unwrap();
    storage.flush().await.unwrap();
    let before = backend.calls().len();

    graph.set_marker(&user_type, storage.id(), StorageMarker::TypedTrue).unwrap();
    graph.delete_marker(&user_type, storage.id(), StorageMarker::TypedTrue).unwrap();
    storage.flush().await.unwrap();

    let calls = backend.calls()[before..].to_vec();
    assert_eq!(
        calls,
        vec![
            format!("insert {user_type}"),
            format!("insert {instance}"),
            format!("insert {nested}"),
            format!("delete {user_type}"),
            format!("delete {instance}"),
            format!("delete {nested}"),
        ]
    );
}

#[tokio::test]
async fn soft_mode_records_protocol_errors_and_unmounts() {
    let mut graph = Graph::new();
    let options = StorageOptions::default().with_soft_errors(true);
    let mut storage = Storage::new(&mut graph, Arc::new(MemoryBackend::new()), options).unwrap();
    storage.mount(&mut graph).unwrap();

    let outcome = storage.apply_external_delta(&mut graph, &malformed()).unwrap();
    assert_eq!(outcome, ApplyOutcome::Skipped);
    assert_eq!(storage.errors().len(), 1);
    assert_eq!(storage.stage(), Some(Stage::Unmounted));
}

#[tokio::test]
async fn strict_mode_returns_protocol_errors() {
    let mut graph = Graph::new();
    let mut storage = Storage::new(&mut graph, Arc::new(MemoryBackend::new()), StorageOptions::default()).unwrap();
    storage.mount(&mut graph).unwrap();

    let err = storage.apply_external_delta(&mut graph, &malformed()).unwrap_err();
    assert!(err.is_protocol_error());
    assert!(storage.errors().is_empty());
    assert!(storage.is_mounted());
}

#[tokio::test]
async fn destroyed_storage_skips_later_operations() {
    let backend = Arc::new(Recording::default());
    let mut graph = Graph::new();
    let mut storage = Storage::new(&mut graph, backend.clone(), StorageOptions::default()).unwrap();
    storage.mount(&mut graph).unwrap();
    let id = storage.id().clone();

    storage.destroy(&mut graph).unwrap();
    let root = graph.root().clone();
    graph.new_typed(&root).unwrap();
    storage.flush().await.unwrap();

    let calls = backend.calls();
    assert_eq!(calls[calls.len() - 3..], ["stage Unmounting", "stage Unmounted", "destroy"]);
    assert!(!graph.contains(&id));
    assert!(storage.is_destroyed());
    assert!(storage.apply_external_delta(&mut graph, &StorageDelta::delete("x")).is_err());
    assert!(storage.destroy(&mut graph).is_ok());
}

#[tokio::test]
async fn backend_failures_are_recorded() {
    let mut graph = Graph::new();
    let mut storage = Storage::new(&mut graph, Arc::new(Recording::failing()), StorageOptions::default()).unwrap();
    storage.mount(&mut graph).unwrap();
    storage.flush().await.unwrap();

    let errors = storage.errors();
    assert!(!errors.is_empty());
    assert!(errors.iter().all(|e| e == "on_link_insert: medium unavailable"));
    assert!(storage.is_mounted());
}

#[tokio::test]
async fn existing_association_must_be_a_storage() {
    let mut graph = Graph::new();
    let plain = graph.new_association();
    let options = StorageOptions::default().with_existing(plain.clone());
    let err = Storage::new(&mut graph, Arc::new(MemoryBackend::new()), options).unwrap_err();
    assert_eq!(err.to_string(), format!("Graph error: Expected a Storage association, received untyped association {plain}"));

    let storage_type = graph.system().storage.clone();
    let existing = graph.new_typed(&storage_type).unwrap();
    let options = StorageOptions::default().with_existing(existing.clone());
    let storage = Storage::new(&mut graph, Arc::new(MemoryBackend::new()), options).unwrap();
    assert_eq!(storage.id(), &existing);
}

#[test]
fn construction_needs_a_runtime() {
    let mut graph = Graph::new();
    let storage_type = graph.system().storage.clone();
    let err = Storage::new(&mut graph, Arc::new(MemoryBackend::new()), StorageOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
    assert!(graph.typed(&storage_type).is_empty());
}

#[tokio::test]
async fn new_instance_of_a_stored_type_is_inserted_once() {
    let backend = Arc::new(Recording::default());
    let mut graph = Graph::new();
    let mut storage = Storage::new(&mut graph, backend.clone(), StorageOptions::default()).unwrap();
    storage.mount(&mut graph).unwrap();
    let user_type = graph.new_association();
    graph.set_marker(&user_type, storage.id(), StorageMarker::TypedTrue).unwrap();
    storage.flush().await.unwrap();
    let before = backend.calls().len();

    let instance = graph.new_typed(&user_type).unwrap();
    graph.set_marker(&instance, storage.id(), StorageMarker::OneTrue).unwrap();
    storage.flush().await.unwrap();

    assert_eq!(backend.calls()[before..], [format!("insert {instance}")]);
}

#[tokio::test]
async fn graphs_with_different_roots_converge_through_a_memory_backend() {
    let medium = Arc::new(MemoryBackend::new());
    let deltas = medium.subscribe();

    let mut alice = Graph::new();
    let mut alice_storage = Storage::new(&mut alice, medium.clone(), StorageOptions::default()).unwrap();
    alice_storage.mount(&mut alice).unwrap();
    let string = alice.system().string.clone();
    let text = alice.new_typed(&string).unwrap();
    alice.set_marker(&text, alice_storage.id(), StorageMarker::OneTrue).unwrap();
    alice.set_data(&text, Some(Data::from("hello"))).unwrap();
    alice_storage.flush().await.unwrap();

    let mut bob = Graph::new();
    let mut bob_storage = Storage::new(&mut bob, Arc::new(MemoryBackend::new()), StorageOptions::default()).unwrap();
    for delta in deltas.drain() {
        bob_storage.apply_external_delta(&mut bob, &delta).unwrap();
    }

    assert_eq!(bob.type_of(&text), Some(&bob.system().string));
    assert_eq!(bob.data(&text), Some(&Data::from("hello")));
    assert!(!bob.contains(alice.root()));
    assert!(bob.is_stored(&text, bob_storage.id(), None));
}
