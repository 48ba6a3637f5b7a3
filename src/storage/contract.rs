//! Backend contract implemented by every storage medium.

use async_trait::async_trait;

use crate::graph::Stage;
use crate::types::StorageLink;

/// Handlers a storage medium supplies.
///
/// Calls for one storage are serialized through its operation chain, so an
/// implementation never sees two operations of the same storage at once.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// A stored association appeared
    async fn on_link_insert(&self, link: StorageLink) -> anyhow::Result<()>;

    /// A stored association changed one of its links
    async fn on_link_update(&self, link: StorageLink) -> anyhow::Result<()>;

    /// A stored association was destroyed or left the storage
    async fn on_link_delete(&self, link: StorageLink) -> anyhow::Result<()>;

    /// A stored association's payload changed
    async fn on_data_changed(&self, link: StorageLink) -> anyhow::Result<()>;

    /// The storage moved to a new lifecycle stage
    async fn on_stage(&self, _stage: Stage) -> anyhow::Result<()> {
        Ok(())
    }

    /// The storage was destroyed; last call the backend receives
    async fn on_destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One queued backend call
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOp {
    /// `on_link_insert`
    Insert(StorageLink),
    /// `on_link_update`
    Update(StorageLink),
    /// `on_link_delete`
    Delete(StorageLink),
    /// `on_data_changed`
    DataChanged(StorageLink),
    /// `on_stage`
    Stage(Stage),
    /// `on_destroy`
    Destroy,
}

impl BackendOp {
    /// Handler name, for logs
    pub fn name(&self) -> &'static str {
        match self {
            BackendOp::Insert(_) => "on_link_insert",
            BackendOp::Update(_) => "on_link_update",
            BackendOp::Delete(_) => "on_link_delete",
            BackendOp::DataChanged(_) => "on_data_changed",
            BackendOp::Stage(_) => "on_stage",
            BackendOp::Destroy => "on_destroy",
        }
    }

    /// Run against `backend`
    pub async fn run(self, backend: &dyn StorageBackend) -> anyhow::Result<()> {
        match self {
            BackendOp::Insert(link) => backend.on_link_insert(link).await,
            BackendOp::Update(link) => backend.on_link_update(link).await,
            BackendOp::Delete(link) => backend.on_link_delete(link).await,
            BackendOp::DataChanged(link) => backend.on_data_changed(link).await,
            BackendOp::Stage(stage) => backend.on_stage(stage).await,
            BackendOp::Destroy => backend.on_destroy().await,
        }
    }
}
