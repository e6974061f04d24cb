//! Storage abstraction for the system of record.
//!
//! [`IndexCatalog`] holds index definitions and [`DocumentStore`] holds the
//! documents of each index in a per-index physical collection. Both have a
//! SQLite backend ([`sqlite`]) and an in-memory backend ([`memory`]).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::models::{IndexDefinition, IndexDocument};

/// Persistent registry of index definitions.
///
/// Names are unique case-insensitively.
#[async_trait]
pub trait IndexCatalog: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<Option<IndexDefinition>>;

    /// Insert a new definition. Fails if the name is taken.
    async fn add(&self, def: &IndexDefinition) -> Result<()>;

    /// Remove a definition. Returns `false` if no row matched.
    async fn delete(&self, def: &IndexDefinition) -> Result<bool>;

    /// List definitions in creation order. `page` is 1-based; `None` for
    /// `count` returns everything.
    async fn get_all(&self, count: Option<u32>, page: Option<u32>) -> Result<Vec<IndexDefinition>>;
}

/// Result of [`DocumentStore::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted(IndexDocument),
    Updated(IndexDocument),
}

impl UpsertOutcome {
    /// The document as stored.
    pub fn document(&self) -> &IndexDocument {
        match self {
            UpsertOutcome::Inserted(doc) | UpsertOutcome::Updated(doc) => doc,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

/// Per-index document collections.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_document`](DocumentStore::get_document) | Look up a document by title |
/// | [`add`](DocumentStore::add) | Insert a new document |
/// | [`update`](DocumentStore::update) | Overwrite an existing document |
/// | [`delete`](DocumentStore::delete) | Remove a document |
/// | [`get_all`](DocumentStore::get_all) | Page through a collection in id order |
/// | [`upsert`](DocumentStore::upsert) | Insert-or-update by title |
/// | [`create_collection`](DocumentStore::create_collection) | Provision a collection |
/// | [`delete_collection`](DocumentStore::delete_collection) | Drop a collection and its rows |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, index: &str, title: &str) -> Result<Option<IndexDocument>>;

    /// Insert `doc`. Returns the stored row with its assigned `id`.
    async fn add(&self, doc: &IndexDocument, index: &str) -> Result<IndexDocument>;

    /// Overwrite the row of `existing` with the fields of `doc`.
    ///
    /// `created` is never rewritten. Returns `false` if the row is gone.
    async fn update(
        &self,
        existing: &IndexDocument,
        doc: &IndexDocument,
        index: &str,
    ) -> Result<bool>;

    /// Returns `false` if the row was already gone.
    async fn delete(&self, doc: &IndexDocument, index: &str) -> Result<bool>;

    /// One page of a collection ordered by `id`. `page` is 1-based.
    async fn get_all(&self, index: &str, count: u32, page: u32) -> Result<Vec<IndexDocument>>;

    async fn create_collection(&self, index: &str) -> Result<()>;

    async fn delete_collection(&self, index: &str) -> Result<()>;

    /// Insert `doc`, or update the row with the same title.
    ///
    /// New rows get `created = modified = now`; existing rows keep their
    /// `id` and `created` and get `modified = now`. Backends with
    /// transactions override this to make the lookup and the write atomic.
    async fn upsert(
        &self,
        index: &str,
        mut doc: IndexDocument,
        now: DateTime<FixedOffset>,
    ) -> Result<UpsertOutcome> {
        match self.get_document(index, &doc.title).await? {
            Some(existing) => {
                doc.id = existing.id;
                doc.created = existing.created;
                doc.modified = now;
                if !self.update(&existing, &doc, index).await? {
                    bail!("document '{}' disappeared during update", doc.title);
                }
                Ok(UpsertOutcome::Updated(doc))
            }
            None => {
                doc.created = now;
                doc.modified = now;
                let stored = self.add(&doc, index).await?;
                Ok(UpsertOutcome::Inserted(stored))
            }
        }
    }
}
