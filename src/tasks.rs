//! Background task messages and their dispatch.
//!
//! A [`BackgroundTaskMessage`] travels as camelCase JSON:
//!
//! ```json
//! { "taskType": "DocumentUpdate", "indexName": "Orders", "document": { "title": "Doc1", "content": "..." } }
//! { "taskType": "SyncIndex", "indexName": "Orders" }
//! ```
//!
//! [`TaskDispatcher`] is both producer and consumer: it wraps messages into
//! work items on the configured [`TaskQueue`], and routes each message to the
//! orchestrator or the reconciler when it runs. Push-triggered hosts hand raw
//! payloads to [`TaskDispatcher::handle_payload`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::models::IndexDocument;
use crate::orchestrator::RagOrchestrator;
use crate::queue::{work_item, TaskQueue};
use crate::reconcile::{SyncReconciler, DEFAULT_BATCH_SIZE};
use crate::validation::is_valid_index_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    DocumentUpdate,
    SyncIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundTaskMessage {
    pub task_type: TaskType,
    pub index_name: String,
    /// Present only for [`TaskType::DocumentUpdate`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<IndexDocument>,
}

impl BackgroundTaskMessage {
    pub fn document_update(index: impl Into<String>, document: IndexDocument) -> Self {
        Self {
            task_type: TaskType::DocumentUpdate,
            index_name: index.into(),
            document: Some(document),
        }
    }

    pub fn sync_index(index: impl Into<String>) -> Self {
        Self {
            task_type: TaskType::SyncIndex,
            index_name: index.into(),
            document: None,
        }
    }
}

/// Routes messages to their handlers. Cloned into every work item.
#[derive(Clone)]
struct Router {
    orchestrator: Arc<RagOrchestrator>,
    reconciler: Arc<SyncReconciler>,
}

impl Router {
    async fn handle(&self, message: BackgroundTaskMessage) -> Result<()> {
        let index = message.index_name.as_str();
        match message.task_type {
            TaskType::DocumentUpdate => {
                let Some(document) = message.document else {
                    tracing::warn!(index, "document update without a document, skipping");
                    return Ok(());
                };
                tracing::debug!(index, title = %document.title, "handling document update");
                self.orchestrator
                    .upsert_documents(index, vec![document])
                    .await?;
            }
            TaskType::SyncIndex => {
                let report = self.reconciler.sync_index(index).await?;
                tracing::debug!(?report, "handled sync request");
            }
        }
        Ok(())
    }
}

pub struct TaskDispatcher {
    router: Router,
    queue: Arc<dyn TaskQueue>,
    page_size: u32,
}

impl TaskDispatcher {
    pub fn new(
        orchestrator: Arc<RagOrchestrator>,
        reconciler: Arc<SyncReconciler>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            router: Router {
                orchestrator,
                reconciler,
            },
            queue,
            page_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Page size used by [`backfill_metadata`](Self::backfill_metadata).
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Enqueue `message` for later handling.
    pub fn submit(&self, message: BackgroundTaskMessage) -> Result<()> {
        let router = self.router.clone();
        tracing::debug!(
            task = ?message.task_type,
            index = %message.index_name,
            "submitting background task"
        );
        self.queue.enqueue(work_item(move |_signal| async move {
            router.handle(message).await.map_err(anyhow::Error::from)
        }))
    }

    /// Handle `message` on the calling task.
    pub async fn handle(&self, message: BackgroundTaskMessage) -> Result<()> {
        self.router.handle(message).await
    }

    /// Decode and handle one raw queue payload.
    pub async fn handle_payload(&self, payload: &str) -> Result<()> {
        let message: BackgroundTaskMessage = serde_json::from_str(payload)
            .map_err(|e| RagError::InvalidRequest(format!("malformed task payload: {}", e)))?;
        self.handle(message).await
    }

    /// Queue one document update per document of `index`, so enrichment
    /// fills in metadata that is still missing. Returns how many were queued.
    pub async fn backfill_metadata(&self, index: &str) -> Result<usize> {
        let mut submitted = 0;
        let mut page = 1;
        loop {
            let batch = self
                .router
                .orchestrator
                .get_all_documents(index, self.page_size, page)
                .await?;
            if batch.is_empty() {
                break;
            }
            for doc in batch {
                self.submit(BackgroundTaskMessage::document_update(index, doc))?;
                submitted += 1;
            }
            page += 1;
        }
        tracing::info!(index, submitted, "queued metadata backfill");
        Ok(submitted)
    }

    /// Queue a reconciliation pass for `index`.
    pub fn request_sync(&self, index: &str) -> Result<()> {
        if !is_valid_index_name(index) {
            return Err(RagError::InvalidIndexName(index.to_string()));
        }
        self.submit(BackgroundTaskMessage::sync_index(index))
    }
}
