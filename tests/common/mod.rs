//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rag_harness::completion::{
    CompletionGateway, CompletionRequest, CompletionResponse, DisabledCompletion, Message,
};
use rag_harness::gateway::memory::MemorySearchGateway;
use rag_harness::orchestrator::RagOrchestrator;
use rag_harness::reconcile::SyncReconciler;
use rag_harness::store::memory::{MemoryCatalog, MemoryDocumentStore};

/// Completion gateway answering every request with a fixed reply.
pub struct FakeCompletion {
    reply: String,
    calls: AtomicUsize,
}

impl FakeCompletion {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionGateway for FakeCompletion {
    async fn post_completion(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut messages = request.messages;
        messages.push(Message::assistant(self.reply.clone()));
        Ok(CompletionResponse { messages })
    }
}

/// In-memory collaborators wired into an orchestrator and a reconciler.
pub struct Harness {
    pub catalog: Arc<MemoryCatalog>,
    pub store: Arc<MemoryDocumentStore>,
    pub search: Arc<MemorySearchGateway>,
    pub orchestrator: Arc<RagOrchestrator>,
    pub reconciler: Arc<SyncReconciler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_completion(Arc::new(DisabledCompletion))
    }

    pub fn with_completion(completion: Arc<dyn CompletionGateway>) -> Self {
        let catalog = Arc::new(MemoryCatalog::new());
        let store = Arc::new(MemoryDocumentStore::new());
        let search = Arc::new(MemorySearchGateway::new());
        let orchestrator = Arc::new(RagOrchestrator::new(
            catalog.clone(),
            store.clone(),
            search.clone(),
            completion,
        ));
        let reconciler = Arc::new(SyncReconciler::new(
            catalog.clone(),
            store.clone(),
            search.clone(),
        ));
        Self {
            catalog,
            store,
            search,
            orchestrator,
            reconciler,
        }
    }
}

/// Poll `check` until it returns `true` or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
