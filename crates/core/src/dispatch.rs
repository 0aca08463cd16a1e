use crate::error::IngestError;
use crate::orchestrator::IngestionOrchestrator;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

/// Boundary to the background task queue: work is keyed by document id and
/// delivered at least once to some worker.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, document_id: Uuid) -> Result<(), IngestError>;
}

/// In-process queue standing in for the external dispatcher: a bounded
/// channel drained by [`spawn_worker`].
pub struct LocalDispatcher {
    sender: mpsc::Sender<Uuid>,
}

impl LocalDispatcher {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Uuid>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TaskDispatcher for LocalDispatcher {
    async fn dispatch(&self, document_id: Uuid) -> Result<(), IngestError> {
        self.sender
            .send(document_id)
            .await
            .map_err(|_| IngestError::DispatchFailed(document_id))
    }
}

/// Drain deliveries, one ingestion run each. A failed run is already
/// recorded on its job; the worker only logs and moves on.
pub fn spawn_worker(
    mut receiver: mpsc::Receiver<Uuid>,
    orchestrator: Arc<IngestionOrchestrator>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(document_id) = receiver.recv().await {
            if let Err(error) = orchestrator.run(document_id).await {
                warn!(document_id = %document_id, error = %error, "ingestion run errored");
            }
        }
    })
}
