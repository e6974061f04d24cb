//! In-process search gateway.
//!
//! Keeps each remote index as a map of document id to document. Search is a
//! plain term match over title, content, topic and keywords ranked by the
//! number of matching terms.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{IndexDefinition, IndexDocument};

use super::{indexer_name, SearchGateway};

#[derive(Debug, Default)]
struct State {
    indexes: HashMap<String, BTreeMap<i64, IndexDocument>>,
    datasources: HashSet<String>,
    indexers: HashSet<String>,
    indexer_models: HashMap<String, String>,
    indexer_runs: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct MemorySearchGateway {
    state: RwLock<State>,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl MemorySearchGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn has_index(&self, name: &str) -> bool {
        self.state.read().await.indexes.contains_key(&key(name))
    }

    pub async fn has_datasource(&self, name: &str) -> bool {
        self.state.read().await.datasources.contains(&key(name))
    }

    pub async fn has_indexer(&self, name: &str, embedding_model: &str) -> bool {
        self.state
            .read()
            .await
            .indexers
            .contains(&indexer_name(name, embedding_model))
    }

    /// Ids held by the remote copy of `index`, ascending.
    pub async fn document_ids(&self, index: &str) -> Vec<i64> {
        self.state
            .read()
            .await
            .indexes
            .get(&key(index))
            .map(|docs| docs.keys().copied().collect())
            .unwrap_or_default()
    }

    /// How many times [`run_indexer`](SearchGateway::run_indexer) fired for `index`.
    pub async fn indexer_runs(&self, index: &str) -> usize {
        self.state
            .read()
            .await
            .indexer_runs
            .get(&key(index))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SearchGateway for MemorySearchGateway {
    async fn create_index(&self, def: &IndexDefinition) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.indexes.contains_key(&key(&def.name)) {
            return Ok(false);
        }
        state.indexes.insert(key(&def.name), BTreeMap::new());
        Ok(true)
    }

    async fn delete_index(&self, name: &str) -> Result<bool> {
        self.state.write().await.indexes.remove(&key(name));
        Ok(true)
    }

    async fn create_datasource(&self, name: &str) -> Result<bool> {
        Ok(self.state.write().await.datasources.insert(key(name)))
    }

    async fn delete_datasource(&self, name: &str) -> Result<bool> {
        self.state.write().await.datasources.remove(&key(name));
        Ok(true)
    }

    async fn create_indexer(&self, def: &IndexDefinition) -> Result<bool> {
        let mut state = self.state.write().await;
        let created = state
            .indexers
            .insert(indexer_name(&def.name, &def.embedding_model));
        state
            .indexer_models
            .insert(key(&def.name), def.embedding_model.clone());
        Ok(created)
    }

    async fn delete_indexer(&self, name: &str, embedding_model: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        state.indexers.remove(&indexer_name(name, embedding_model));
        state.indexer_models.remove(&key(name));
        Ok(true)
    }

    async fn run_indexer(&self, name: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.indexer_models.contains_key(&key(name)) {
            return Ok(false);
        }
        *state.indexer_runs.entry(key(name)).or_default() += 1;
        Ok(true)
    }

    async fn get_all_documents(&self, index: &str) -> Result<Vec<IndexDocument>> {
        let state = self.state.read().await;
        let docs = state
            .indexes
            .get(&key(index))
            .ok_or_else(|| anyhow!("search index '{}' does not exist", index))?;
        Ok(docs.values().cloned().collect())
    }

    async fn upsert_document(&self, index: &str, doc: &IndexDocument) -> Result<bool> {
        let mut state = self.state.write().await;
        let docs = state
            .indexes
            .get_mut(&key(index))
            .ok_or_else(|| anyhow!("search index '{}' does not exist", index))?;
        docs.insert(doc.id, doc.clone());
        Ok(true)
    }

    async fn delete_document(&self, index: &str, id: i64) -> Result<bool> {
        let mut state = self.state.write().await;
        let docs = state
            .indexes
            .get_mut(&key(index))
            .ok_or_else(|| anyhow!("search index '{}' does not exist", index))?;
        Ok(docs.remove(&id).is_some())
    }

    async fn search(&self, def: &IndexDefinition, query: &str) -> Result<Vec<IndexDocument>> {
        let state = self.state.read().await;
        let docs = state
            .indexes
            .get(&key(&def.name))
            .ok_or_else(|| anyhow!("search index '{}' does not exist", def.name))?;

        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();

        let mut scored: Vec<(usize, &IndexDocument)> = docs
            .values()
            .filter_map(|doc| {
                let haystack = format!(
                    "{} {} {} {}",
                    doc.title,
                    doc.content,
                    doc.topic.as_deref().unwrap_or_default(),
                    doc.keywords.as_deref().unwrap_or_default()
                )
                .to_lowercase();
                let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (hits > 0).then_some((hits, doc))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.id.cmp(&b.1.id)));
        let limit = usize::try_from(def.max_rag_attachments.max(0)).unwrap_or(0);
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}
