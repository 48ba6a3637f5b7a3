//! Per-storage FIFO of backend operations.
//!
//! One flume channel drained by one tokio task: operations of a storage never
//! interleave, and a slow backend only stalls its own chain. Closing the chain
//! drops the sender, so the worker drains what is queued and then exits.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error};

use super::contract::{BackendOp, StorageBackend};
use crate::system::metrics;
use crate::types::{AssocId, Error, Result};

/// Bounded list of error messages, oldest dropped first
#[derive(Debug)]
pub struct ErrorLog {
    entries: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl ErrorLog {
    /// Log keeping at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self { entries: Mutex::new(VecDeque::new()), capacity: capacity.max(1) }
    }

    /// Append a message
    pub fn push(&self, message: impl Into<String>) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(message.into());
    }

    /// Copy of the current entries, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no error was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

enum Message {
    Op(BackendOp),
    Flush(oneshot::Sender<()>),
}

/// Serialized operation queue of one storage
pub struct OperationChain {
    storage: AssocId,
    /// `None` once closed
    sender: Mutex<Option<flume::Sender<Message>>>,
    stopped: watch::Receiver<bool>,
}

impl std::fmt::Debug for OperationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationChain")
            .field("storage", &self.storage)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl OperationChain {
    /// Start the worker on the current tokio runtime
    pub fn spawn(storage: AssocId, backend: Arc<dyn StorageBackend>, errors: Arc<ErrorLog>) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::internal(format!("storage operation chain needs a tokio runtime: {e}")))?;
        let (sender, receiver) = flume::unbounded::<Message>();
        let (stop, stopped) = watch::channel(false);

        let worker_storage = storage.clone();
        runtime.spawn(async move {
            while let Ok(message) = receiver.recv_async().await {
                match message {
                    Message::Op(op) => {
                        let name = op.name();
                        if let Err(err) = op.run(backend.as_ref()).await {
                            metrics::record_backend_failure();
                            error!(storage = %worker_storage, operation = name, error = %err, "backend operation failed");
                            errors.push(format!("{name}: {err:#}"));
                        }
                    }
                    Message::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!(storage = %worker_storage, "operation chain stopped");
            let _ = stop.send(true);
        });

        Ok(Self { storage, sender: Mutex::new(Some(sender)), stopped })
    }

    /// Queue an operation; skipped once the chain is closed
    pub fn enqueue(&self, op: BackendOp) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Message::Op(op)).is_ok(),
            None => {
                debug!(storage = %self.storage, operation = op.name(), "skipping operation on destroyed storage");
                false
            }
        }
    }

    /// Wait until every operation queued before this call has run.
    ///
    /// On a closed chain this waits for the worker to drain and exit.
    pub async fn flush(&self) -> Result<()> {
        let sender = self.sender.lock().clone();
        match sender {
            Some(sender) => {
                let (done, wait) = oneshot::channel();
                sender
                    .send(Message::Flush(done))
                    .map_err(|_| Error::internal("operation chain worker is gone"))?;
                wait.await.map_err(|_| Error::internal("operation chain worker is gone"))
            }
            None => {
                let mut stopped = self.stopped.clone();
                stopped
                    .wait_for(|stopped| *stopped)
                    .await
                    .map(|_| ())
                    .map_err(|_| Error::internal("operation chain worker is gone"))
            }
        }
    }

    /// Refuse further operations and release the worker once the queue is drained
    pub fn close(&self) {
        self.sender.lock().take();
    }

    /// Whether the chain refuses new operations
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Whether the worker has exited
    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Operations queued and not yet picked up by the worker
    pub fn pending(&self) -> usize {
        self.sender.lock().as_ref().map_or(0, |sender| sender.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StorageLink;
    use async_trait::async_trait;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StorageBackend for Recording {
        async fn on_link_insert(&self, link: StorageLink) -> anyhow::Result<()> {
            tokio::task::yield_now().await;
            self.calls.lock().push(format!("insert {}", link.id));
            Ok(())
        }

        async fn on_link_update(&self, link: StorageLink) -> anyhow::Result<()> {
            self.calls.lock().push(format!("update {}", link.id));
            Ok(())
        }

        async fn on_link_delete(&self, _link: StorageLink) -> anyhow::Result<()> {
            anyhow::bail!("read-only medium")
        }

        async fn on_data_changed(&self, link: StorageLink) -> anyhow::Result<()> {
            self.calls.lock().push(format!("data {}", link.id));
            Ok(())
        }
    }

    #[tokio::test]
    async fn operations_run_in_order_and_failures_are_recorded() {
        let backend = Arc::new(Recording::default());
        let errors = Arc::new(ErrorLog::new(8));
        let chain = OperationChain::spawn(AssocId::new("s"), backend.clone(), errors.clone()).unwrap();

        chain.enqueue(BackendOp::Insert(StorageLink::new("a")));
        chain.enqueue(BackendOp::Update(StorageLink::new("a")));
        chain.enqueue(BackendOp::Delete(StorageLink::new("a")));
        chain.enqueue(BackendOp::DataChanged(StorageLink::new("b")));
        chain.flush().await.unwrap();

        assert_eq!(*backend.calls.lock(), vec!["insert a", "update a", "data b"]);
        assert_eq!(errors.entries(), vec!["on_link_delete: read-only medium".to_string()]);
    }

    #[tokio::test]
    async fn closed_chain_skips_new_operations() {
        let backend = Arc::new(Recording::default());
        let chain = OperationChain::spawn(AssocId::new("s"), backend.clone(), Arc::new(ErrorLog::new(8))).unwrap();
        chain.enqueue(BackendOp::Insert(StorageLink::new("a")));
        chain.close();
        assert!(!chain.enqueue(BackendOp::Insert(StorageLink::new("b"))));
        chain.flush().await.unwrap();
        assert_eq!(*backend.calls.lock(), vec!["insert a"]);
    }

    #[tokio::test]
    async fn closing_releases_the_worker_after_the_queue_drains() {
        let backend = Arc::new(Recording::default());
        let chain = OperationChain::spawn(AssocId::new("s"), backend.clone(), Arc::new(ErrorLog::new(8))).unwrap();
        chain.enqueue(BackendOp::Insert(StorageLink::new("a")));
        chain.enqueue(BackendOp::Insert(StorageLink::new("b")));
        chain.close();
        assert!(chain.is_closed());

        chain.flush().await.unwrap();
        assert!(chain.is_stopped());
        assert_eq!(chain.pending(), 0);
        assert_eq!(*backend.calls.lock(), vec!["insert a", "insert b"]);
    }

    #[test]
    fn spawning_outside_a_runtime_fails() {
        let backend = Arc::new(Recording::default());
        let err = OperationChain::spawn(AssocId::new("s"), backend, Arc::new(ErrorLog::new(1))).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn error_log_drops_oldest() {
        let log = ErrorLog::new(2);
        log.push("a");
        log.push("b");
        log.push("c");
        assert_eq!(log.entries(), vec!["b".to_string(), "c".to_string()]);
    }
}
