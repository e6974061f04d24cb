//! Reconciliation of the search replica against the document store.
//!
//! A pass enumerates the full primary set `P` from the document store in
//! fixed-size pages, fetches the full remote set `V`, deletes every remote
//! document whose id is not in `P`, then upserts all of `P`. Once the pass
//! completes the remote index holds exactly `P`. Documents written after
//! enumeration are picked up by the next pass.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{RagError, Result};
use crate::gateway::SearchGateway;
use crate::models::IndexDocument;
use crate::store::{DocumentStore, IndexCatalog};
use crate::validation::is_valid_index_name;

/// Default page size when enumerating the document store.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub index: String,
    /// Documents found in the document store.
    pub primary: usize,
    /// Documents found in the search index before the pass.
    pub remote: usize,
    pub deleted: usize,
    pub upserted: usize,
}

pub struct SyncReconciler {
    catalog: Arc<dyn IndexCatalog>,
    store: Arc<dyn DocumentStore>,
    search: Arc<dyn SearchGateway>,
    batch_size: u32,
}

impl SyncReconciler {
    pub fn new(
        catalog: Arc<dyn IndexCatalog>,
        store: Arc<dyn DocumentStore>,
        search: Arc<dyn SearchGateway>,
    ) -> Self {
        Self {
            catalog,
            store,
            search,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn primary_set(&self, index: &str) -> Result<BTreeMap<i64, IndexDocument>> {
        let mut primary = BTreeMap::new();
        let mut page = 1;
        loop {
            let batch = self.store.get_all(index, self.batch_size, page).await?;
            if batch.is_empty() {
                break;
            }
            tracing::debug!(index, page, rows = batch.len(), "read document page");
            primary.extend(batch.into_iter().map(|doc| (doc.id, doc)));
            page += 1;
        }
        Ok(primary)
    }

    /// Run one full pass for `index`.
    pub async fn sync_index(&self, index: &str) -> Result<SyncReport> {
        if !is_valid_index_name(index) {
            return Err(RagError::InvalidIndexName(index.to_string()));
        }
        if self.catalog.get_by_name(index).await?.is_none() {
            return Err(RagError::IndexNotFound(index.to_string()));
        }

        tracing::info!(index, "sync started");
        let primary = self.primary_set(index).await?;

        let remote = self.search.get_all_documents(index).await?;
        let remote_ids: HashSet<i64> = remote.iter().map(|d| d.id).collect();
        tracing::info!(
            index,
            primary = primary.len(),
            remote = remote_ids.len(),
            "sync enumerated both stores"
        );

        let mut report = SyncReport {
            index: index.to_string(),
            primary: primary.len(),
            remote: remote_ids.len(),
            ..SyncReport::default()
        };

        let mut orphans: Vec<i64> = remote_ids
            .iter()
            .copied()
            .filter(|id| !primary.contains_key(id))
            .collect();
        orphans.sort_unstable();

        for id in orphans {
            if self.search.delete_document(index, id).await? {
                report.deleted += 1;
            } else {
                tracing::warn!(index, id, "remote document was already gone");
            }
        }

        for doc in primary.values() {
            if self.search.upsert_document(index, doc).await? {
                report.upserted += 1;
            } else {
                tracing::warn!(index, id = doc.id, title = %doc.title, "remote upsert refused");
            }
        }

        tracing::info!(
            index,
            deleted = report.deleted,
            upserted = report.upserted,
            "sync finished"
        );
        Ok(report)
    }
}
