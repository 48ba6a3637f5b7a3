//! Memory-snapshot medium.
//!
//! Keeps the links it receives keyed by id and broadcasts every accepted change
//! as a [`StorageDelta`] to its subscribers. Several graphs bound to one
//! `MemoryBackend` converge by applying those deltas (or a full snapshot).

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use super::contract::StorageBackend;
use crate::graph::Stage;
use crate::types::{AssocId, StorageDelta, StorageDump, StorageLink};

/// In-memory storage medium
#[derive(Debug, Default)]
pub struct MemoryBackend {
    links: DashMap<AssocId, StorageLink>,
    subscribers: Mutex<Vec<flume::Sender<StorageDelta>>>,
    stages: Mutex<Vec<Stage>>,
}

impl MemoryBackend {
    /// Empty medium
    pub fn new() -> Self {
        Self::default()
    }

    /// Medium preloaded with a dump
    pub fn with_dump(dump: &StorageDump) -> Self {
        let backend = Self::new();
        for link in &dump.links {
            backend.links.insert(link.id.clone(), link.clone());
        }
        backend
    }

    /// Current content ordered by `_i`
    pub fn snapshot(&self) -> StorageDump {
        let mut links: Vec<StorageLink> = self.links.iter().map(|entry| entry.value().clone()).collect();
        links.sort_by(|a, b| {
            (a.sequence.unwrap_or(u64::MAX), &a.id).cmp(&(b.sequence.unwrap_or(u64::MAX), &b.id))
        });
        let ids = links.iter().map(|link| link.id.clone()).collect();
        StorageDump { ids: Some(ids), links }
    }

    /// Receive every change accepted from now on
    pub fn subscribe(&self) -> flume::Receiver<StorageDelta> {
        let (sender, receiver) = flume::unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Stored link
    pub fn get(&self, id: &AssocId) -> Option<StorageLink> {
        self.links.get(id).map(|entry| entry.value().clone())
    }

    /// Number of stored links
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Lifecycle stages reported by bound storages, in order
    pub fn stages(&self) -> Vec<Stage> {
        self.stages.lock().clone()
    }

    fn broadcast(&self, delta: StorageDelta) {
        trace!(operation = delta.operation.as_str(), id = ?delta.target(), "broadcasting delta");
        // Dropped receivers unsubscribe.
        self.subscribers.lock().retain(|subscriber| subscriber.send(delta.clone()).is_ok());
    }

    fn store(&self, link: StorageLink) {
        self.links.insert(link.id.clone(), link);
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn on_link_insert(&self, link: StorageLink) -> anyhow::Result<()> {
        self.store(link.clone());
        self.broadcast(StorageDelta::insert(link));
        Ok(())
    }

    async fn on_link_update(&self, link: StorageLink) -> anyhow::Result<()> {
        self.store(link.clone());
        self.broadcast(StorageDelta::update(link));
        Ok(())
    }

    async fn on_link_delete(&self, link: StorageLink) -> anyhow::Result<()> {
        if self.links.remove(&link.id).is_some() {
            self.broadcast(StorageDelta::delete(link.id));
        }
        Ok(())
    }

    async fn on_data_changed(&self, link: StorageLink) -> anyhow::Result<()> {
        self.on_link_update(link).await
    }

    async fn on_stage(&self, stage: Stage) -> anyhow::Result<()> {
        self.stages.lock().push(stage);
        Ok(())
    }
}
