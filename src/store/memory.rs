//! In-memory [`IndexCatalog`] and [`DocumentStore`] for tests and local runs.
//!
//! Collections are `Vec`s kept in id order behind a `tokio::sync::RwLock`.
//! Names are folded to lowercase so the case rules match the SQLite backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{IndexDefinition, IndexDocument};

use super::{DocumentStore, IndexCatalog};

/// In-memory index catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: RwLock<Vec<IndexDefinition>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page_bounds(len: usize, count: u32, page: u32) -> (usize, usize) {
    let skip = (page.max(1) as usize - 1).saturating_mul(count as usize);
    let start = skip.min(len);
    let end = start.saturating_add(count as usize).min(len);
    (start, end)
}

#[async_trait]
impl IndexCatalog for MemoryCatalog {
    async fn get_by_name(&self, name: &str) -> Result<Option<IndexDefinition>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn add(&self, def: &IndexDefinition) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|d| d.name.eq_ignore_ascii_case(&def.name)) {
            bail!("catalog already contains '{}'", def.name);
        }
        entries.push(def.clone());
        Ok(())
    }

    async fn delete(&self, def: &IndexDefinition) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|d| !d.name.eq_ignore_ascii_case(&def.name));
        Ok(entries.len() != before)
    }

    async fn get_all(&self, count: Option<u32>, page: Option<u32>) -> Result<Vec<IndexDefinition>> {
        let entries = self.entries.read().await;
        let Some(count) = count else {
            return Ok(entries.clone());
        };
        let (start, end) = page_bounds(entries.len(), count, page.unwrap_or(1));
        Ok(entries[start..end].to_vec())
    }
}

/// In-memory document collections keyed by lowercase index name.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<IndexDocument>>>,
    next_id: AtomicI64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Whether a collection has been provisioned for `index`.
    pub async fn has_collection(&self, index: &str) -> bool {
        self.collections
            .read()
            .await
            .contains_key(&index.to_ascii_lowercase())
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(index: &str) -> anyhow::Error {
    anyhow!("collection for index '{}' does not exist", index)
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(&self, index: &str, title: &str) -> Result<Option<IndexDocument>> {
        let collections = self.collections.read().await;
        let docs = collections
            .get(&index.to_ascii_lowercase())
            .ok_or_else(|| missing(index))?;
        Ok(docs.iter().find(|d| d.title == title).cloned())
    }

    async fn add(&self, doc: &IndexDocument, index: &str) -> Result<IndexDocument> {
        let mut collections = self.collections.write().await;
        let docs = collections
            .get_mut(&index.to_ascii_lowercase())
            .ok_or_else(|| missing(index))?;
        if docs.iter().any(|d| d.title == doc.title) {
            bail!("title '{}' already exists in index '{}'", doc.title, index);
        }
        let mut stored = doc.clone();
        stored.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        docs.push(stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        existing: &IndexDocument,
        doc: &IndexDocument,
        index: &str,
    ) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let docs = collections
            .get_mut(&index.to_ascii_lowercase())
            .ok_or_else(|| missing(index))?;
        let Some(row) = docs.iter_mut().find(|d| d.id == existing.id) else {
            return Ok(false);
        };
        row.title = doc.title.clone();
        row.content = doc.content.clone();
        row.topic = doc.topic.clone();
        row.keywords = doc.keywords.clone();
        row.source = doc.source.clone();
        row.modified = doc.modified;
        Ok(true)
    }

    async fn delete(&self, doc: &IndexDocument, index: &str) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let docs = collections
            .get_mut(&index.to_ascii_lowercase())
            .ok_or_else(|| missing(index))?;
        let before = docs.len();
        docs.retain(|d| d.id != doc.id);
        Ok(docs.len() != before)
    }

    async fn get_all(&self, index: &str, count: u32, page: u32) -> Result<Vec<IndexDocument>> {
        let collections = self.collections.read().await;
        let docs = collections
            .get(&index.to_ascii_lowercase())
            .ok_or_else(|| missing(index))?;
        let (start, end) = page_bounds(docs.len(), count, page);
        Ok(docs[start..end].to_vec())
    }

    async fn create_collection(&self, index: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.entry(index.to_ascii_lowercase()).or_default();
        Ok(())
    }

    async fn delete_collection(&self, index: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.remove(&index.to_ascii_lowercase());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now;

    #[tokio::test]
    async fn pages_are_one_based_and_end_empty() {
        let store = MemoryDocumentStore::new();
        store.create_collection("Orders").await.unwrap();
        for i in 0..5 {
            let doc = IndexDocument::new(format!("Doc{i}"), "body", "test");
            store.add(&doc, "Orders").await.unwrap();
        }
        assert_eq!(store.get_all("Orders", 2, 1).await.unwrap().len(), 2);
        assert_eq!(store.get_all("Orders", 2, 3).await.unwrap().len(), 1);
        assert!(store.get_all("Orders", 2, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn default_upsert_preserves_created() {
        let store = MemoryDocumentStore::new();
        store.create_collection("orders").await.unwrap();
        let first = store
            .upsert("Orders", IndexDocument::new("Doc1", "v1", "test"), now())
            .await
            .unwrap();
        assert!(first.is_insert());

        let later = now() + chrono::Duration::seconds(5);
        let second = store
            .upsert("Orders", IndexDocument::new("Doc1", "v2", "test"), later)
            .await
            .unwrap();
        assert!(!second.is_insert());
        assert_eq!(second.document().id, first.document().id);
        assert_eq!(second.document().created, first.document().created);
        assert_eq!(second.document().modified, later);

        let stored = store.get_document("Orders", "Doc1").await.unwrap().unwrap();
        assert_eq!(stored.content, "v2");
        assert_eq!(stored.created, first.document().created);
    }

    #[tokio::test]
    async fn missing_collection_is_an_error() {
        let store = MemoryDocumentStore::new();
        assert!(store.get_document("Nope", "x").await.is_err());
    }

    #[tokio::test]
    async fn catalog_names_are_case_insensitive() {
        let catalog = MemoryCatalog::new();
        catalog.add(&IndexDefinition::named("Orders")).await.unwrap();
        assert!(catalog.add(&IndexDefinition::named("ORDERS")).await.is_err());
        assert!(catalog.get_by_name("orders").await.unwrap().is_some());
        assert!(catalog.delete(&IndexDefinition::named("oRdErS")).await.unwrap());
        assert!(catalog.get_all(None, None).await.unwrap().is_empty());
    }
}
