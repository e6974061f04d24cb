//! Remote search/vector index abstraction.
//!
//! The search service holds a derived replica of every index: a schema (the
//! search index), a data-source binding pointing back at the document store,
//! and an indexer that pulls from that binding on a schedule. Provisioning
//! calls return `Ok(false)` when the service refused the request and `Err`
//! when it could not be reached.
//!
//! | Backend | Type |
//! |---------|------|
//! | In-memory | [`memory::MemorySearchGateway`] |
//! | Weaviate REST | [`weaviate::WeaviateGateway`] |

pub mod memory;
pub mod weaviate;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::SearchConfig;
use crate::models::{IndexDefinition, IndexDocument};

#[async_trait]
pub trait SearchGateway: Send + Sync {
    async fn create_index(&self, def: &IndexDefinition) -> Result<bool>;
    async fn delete_index(&self, name: &str) -> Result<bool>;

    async fn create_datasource(&self, name: &str) -> Result<bool>;
    async fn delete_datasource(&self, name: &str) -> Result<bool>;

    async fn create_indexer(&self, def: &IndexDefinition) -> Result<bool>;
    /// The indexer is identified by the index name and its embedding model.
    async fn delete_indexer(&self, name: &str, embedding_model: &str) -> Result<bool>;
    /// Trigger an indexer run outside its schedule.
    async fn run_indexer(&self, name: &str) -> Result<bool>;

    /// Every document currently held by the remote index.
    async fn get_all_documents(&self, index: &str) -> Result<Vec<IndexDocument>>;
    async fn upsert_document(&self, index: &str, doc: &IndexDocument) -> Result<bool>;
    async fn delete_document(&self, index: &str, id: i64) -> Result<bool>;

    /// Documents relevant to `query`, best first, at most
    /// `def.max_rag_attachments` of them.
    async fn search(&self, def: &IndexDefinition, query: &str) -> Result<Vec<IndexDocument>>;
}

/// Name of the indexer that feeds `index` using `embedding_model`.
pub fn indexer_name(index: &str, embedding_model: &str) -> String {
    let model: String = embedding_model
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!("{}-{}-indexer", index.to_ascii_lowercase(), model)
}

/// Build the gateway selected by `[search] provider`.
pub fn create_gateway(config: &SearchConfig) -> Result<Arc<dyn SearchGateway>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(memory::MemorySearchGateway::new())),
        "weaviate" => Ok(Arc::new(weaviate::WeaviateGateway::new(config)?)),
        other => anyhow::bail!("Unknown search provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexer_name_is_stable_and_sanitized() {
        assert_eq!(
            indexer_name("Orders", "text-embedding-3-large"),
            "orders-text-embedding-3-large-indexer"
        );
        assert_eq!(indexer_name("orders", "Org/Model.v2"), "orders-org-model-v2-indexer");
    }
}
