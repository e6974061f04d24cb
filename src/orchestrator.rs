//! Index lifecycle and document upsert.
//!
//! [`RagOrchestrator`] is the only writer of the catalog and the document
//! store. Provisioning and teardown walk a fixed sequence of steps across the
//! relational store and the search service; the first failing step aborts
//! the operation and completed steps are left in place. Drift between the two
//! stores is repaired later by [`SyncReconciler`](crate::reconcile::SyncReconciler).

use std::sync::Arc;

use crate::completion::{CompletionGateway, CompletionRequest, Message};
use crate::error::{ProvisioningStep, RagError, Result};
use crate::gateway::SearchGateway;
use crate::models::{is_blank, now, IndexDefinition, IndexDocument, METADATA_MAX_CHARS};
use crate::store::{DocumentStore, IndexCatalog};
use crate::validation::{is_valid_index_name, validate_documents, validate_index_definition};

const TOPIC_FORMAT: &str = "a topic";
const KEYWORDS_FORMAT: &str = "a comma separated list of keywords";
const METADATA_SYSTEM_PROMPT: &str =
    "You are a cataloguing assistant. You answer with the requested metadata only.";
const DEFAULT_METADATA_MODEL: &str = "gpt-4o-mini";

pub struct RagOrchestrator {
    catalog: Arc<dyn IndexCatalog>,
    store: Arc<dyn DocumentStore>,
    search: Arc<dyn SearchGateway>,
    completion: Arc<dyn CompletionGateway>,
    metadata_model: String,
}

fn check_name(name: &str) -> Result<()> {
    if is_valid_index_name(name) {
        Ok(())
    } else {
        Err(RagError::InvalidIndexName(name.to_string()))
    }
}

/// Turn a provisioning call result into a step outcome.
fn step(
    index: &str,
    action: &'static str,
    step: ProvisioningStep,
    result: anyhow::Result<bool>,
) -> Result<()> {
    let reason = match result {
        Ok(true) => return Ok(()),
        Ok(false) => "the request was refused".to_string(),
        Err(e) => format!("{:#}", e),
    };
    tracing::error!(index, action, %step, %reason, "provisioning step failed");
    Err(RagError::Provisioning {
        index: index.to_string(),
        action,
        step,
        reason,
    })
}

fn unit(result: anyhow::Result<()>) -> anyhow::Result<bool> {
    result.map(|()| true)
}

/// Trim and cut to at most [`METADATA_MAX_CHARS`] characters.
pub(crate) fn truncate_metadata(text: &str) -> String {
    text.trim().chars().take(METADATA_MAX_CHARS).collect()
}

fn metadata_prompt(format: &str, doc: &IndexDocument) -> String {
    format!(
        "Please create {format} summarizing the below data delimited by triple backticks. \
         Your response should only contain {format} and absolutely no other textual data. \
         Keep it brief.\n\n```\ntitle: {}\ncontent: {}\n```",
        doc.title, doc.content
    )
}

impl RagOrchestrator {
    pub fn new(
        catalog: Arc<dyn IndexCatalog>,
        store: Arc<dyn DocumentStore>,
        search: Arc<dyn SearchGateway>,
        completion: Arc<dyn CompletionGateway>,
    ) -> Self {
        Self {
            catalog,
            store,
            search,
            completion,
            metadata_model: DEFAULT_METADATA_MODEL.to_string(),
        }
    }

    /// Model used for topic and keyword generation.
    pub fn with_metadata_model(mut self, model: impl Into<String>) -> Self {
        self.metadata_model = model.into();
        self
    }

    async fn definition(&self, name: &str) -> Result<IndexDefinition> {
        self.catalog
            .get_by_name(name)
            .await?
            .ok_or_else(|| RagError::IndexNotFound(name.to_string()))
    }

    /// Provision a new index.
    ///
    /// Steps run in order: catalog entry, document collection, search index,
    /// datasource, indexer. A failure reports the step and leaves earlier
    /// steps in place.
    pub async fn create_index(&self, def: &IndexDefinition) -> Result<()> {
        check_name(&def.name)?;
        if let Some(message) = validate_index_definition(def) {
            return Err(RagError::InvalidRequest(message));
        }
        if self.catalog.get_by_name(&def.name).await?.is_some() {
            return Err(RagError::IndexAlreadyExists(def.name.clone()));
        }

        let name = def.name.as_str();
        tracing::info!(index = name, "creating index");

        step(name, "create", ProvisioningStep::CatalogEntry, unit(self.catalog.add(def).await))?;
        step(
            name,
            "create",
            ProvisioningStep::DocumentCollection,
            unit(self.store.create_collection(name).await),
        )?;
        step(
            name,
            "create",
            ProvisioningStep::SearchIndex,
            self.search.create_index(def).await,
        )?;
        step(
            name,
            "create",
            ProvisioningStep::Datasource,
            self.search.create_datasource(name).await,
        )?;
        step(
            name,
            "create",
            ProvisioningStep::Indexer,
            self.search.create_indexer(def).await,
        )?;

        tracing::info!(index = name, "index created");
        Ok(())
    }

    /// Tear down an index: collection, indexer, datasource, search index,
    /// then the catalog entry. Fails fast without compensation.
    pub async fn delete_index(&self, name: &str) -> Result<()> {
        check_name(name)?;
        let def = self.definition(name).await?;
        let name = def.name.as_str();
        tracing::info!(index = name, "deleting index");

        step(
            name,
            "delete",
            ProvisioningStep::DocumentCollection,
            unit(self.store.delete_collection(name).await),
        )?;
        step(
            name,
            "delete",
            ProvisioningStep::Indexer,
            self.search.delete_indexer(name, &def.embedding_model).await,
        )?;
        step(
            name,
            "delete",
            ProvisioningStep::Datasource,
            self.search.delete_datasource(name).await,
        )?;
        step(
            name,
            "delete",
            ProvisioningStep::SearchIndex,
            self.search.delete_index(name).await,
        )?;
        step(
            name,
            "delete",
            ProvisioningStep::CatalogEntry,
            self.catalog.delete(&def).await,
        )?;

        tracing::info!(index = name, "index deleted");
        Ok(())
    }

    pub async fn get_index(&self, name: &str) -> Result<IndexDefinition> {
        check_name(name)?;
        self.definition(name).await
    }

    pub async fn get_all_indexes(
        &self,
        count: Option<u32>,
        page: Option<u32>,
    ) -> Result<Vec<IndexDefinition>> {
        Ok(self.catalog.get_all(count, page).await?)
    }

    /// Insert or update documents by title, generating missing topic and
    /// keywords when the index asks for them.
    ///
    /// Documents are written in input order; the first failed write aborts
    /// and earlier writes stay committed. Returns the number written.
    pub async fn upsert_documents(&self, index: &str, documents: Vec<IndexDocument>) -> Result<usize> {
        check_name(index)?;
        if let Some(message) = validate_documents(&documents) {
            return Err(RagError::InvalidRequest(message));
        }
        let def = self.definition(index).await?;

        let mut written = 0;
        for mut doc in documents {
            let existing = self.store.get_document(index, &doc.title).await?;

            if is_blank(&doc.topic) {
                doc.topic = existing.as_ref().and_then(|e| e.topic.clone());
            }
            if is_blank(&doc.keywords) {
                doc.keywords = existing.as_ref().and_then(|e| e.keywords.clone());
            }
            if def.generate_topic && is_blank(&doc.topic) {
                let topic = self.generate_document_metadata(TOPIC_FORMAT, &doc).await?;
                doc.topic = Some(topic).filter(|t| !t.is_empty());
            }
            if def.generate_keywords && is_blank(&doc.keywords) {
                let keywords = self.generate_document_metadata(KEYWORDS_FORMAT, &doc).await?;
                doc.keywords = Some(keywords).filter(|k| !k.is_empty());
            }

            let title = doc.title.clone();
            match self.store.upsert(index, doc, now()).await {
                Ok(outcome) => {
                    tracing::debug!(
                        index,
                        title = %title,
                        id = outcome.document().id,
                        inserted = outcome.is_insert(),
                        "document upserted"
                    );
                    written += 1;
                }
                Err(e) => {
                    tracing::error!(index, title = %title, error = %e, "document write failed");
                    return Err(RagError::DocumentWrite {
                        index: index.to_string(),
                        title,
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        tracing::info!(index, written, "documents upserted");
        Ok(written)
    }

    /// Delete documents by title, skipping titles that do not exist.
    /// Returns how many were removed.
    pub async fn delete_documents(&self, index: &str, titles: &[String]) -> Result<usize> {
        check_name(index)?;

        let mut removed = 0;
        for title in titles {
            let Some(doc) = self.store.get_document(index, title).await? else {
                tracing::debug!(index, title = %title, "no such document, skipping");
                continue;
            };
            if self.store.delete(&doc, index).await? {
                removed += 1;
            }
        }

        tracing::info!(index, removed, "documents deleted");
        Ok(removed)
    }

    pub async fn get_document(&self, index: &str, title: &str) -> Result<IndexDocument> {
        check_name(index)?;
        self.store
            .get_document(index, title)
            .await?
            .ok_or_else(|| RagError::DocumentNotFound {
                index: index.to_string(),
                title: title.to_string(),
            })
    }

    /// One page of an index's documents in id order. `page` is 1-based.
    pub async fn get_all_documents(
        &self,
        index: &str,
        count: u32,
        page: u32,
    ) -> Result<Vec<IndexDocument>> {
        check_name(index)?;
        self.definition(index).await?;
        Ok(self.store.get_all(index, count, page).await?)
    }

    /// Ask the completion service for `format` (e.g. "a topic") describing
    /// `doc`.
    ///
    /// The answer is trimmed and cut to [`METADATA_MAX_CHARS`] characters;
    /// an answer without assistant content yields an empty string.
    pub async fn generate_document_metadata(
        &self,
        format: &str,
        doc: &IndexDocument,
    ) -> Result<String> {
        let request = CompletionRequest {
            model: self.metadata_model.clone(),
            messages: vec![
                Message::system(METADATA_SYSTEM_PROMPT),
                Message::user(metadata_prompt(format, doc)),
            ],
        };
        let response = self.completion.post_completion(request).await?;
        Ok(response
            .last_assistant_content()
            .map(truncate_metadata)
            .unwrap_or_default())
    }

    /// Run `query` against the index's search replica.
    pub async fn query_index(&self, index: &str, query: &str) -> Result<Vec<IndexDocument>> {
        check_name(index)?;
        if query.trim().is_empty() {
            return Err(RagError::InvalidRequest("the query must not be empty".into()));
        }
        let def = self.definition(index).await?;
        Ok(self.search.search(&def, query).await?)
    }

    /// Trigger the index's indexer outside its schedule.
    pub async fn run_index_update(&self, index: &str) -> Result<()> {
        check_name(index)?;
        let def = self.definition(index).await?;
        tracing::info!(index = %def.name, "running indexer");
        step(
            &def.name,
            "run",
            ProvisioningStep::Indexer,
            self.search.run_indexer(&def.name).await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn prompt_embeds_format_and_fenced_document() {
        let doc = IndexDocument::new("Refunds", "Refunds take 5 days.", "unit");
        let prompt = metadata_prompt("a topic", &doc);
        assert!(prompt.starts_with("Please create a topic summarizing"));
        assert!(prompt.contains("should only contain a topic and absolutely no other"));
        assert!(prompt.ends_with("```\ntitle: Refunds\ncontent: Refunds take 5 days.\n```"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(400);
        let cut = truncate_metadata(&text);
        assert_eq!(cut.chars().count(), METADATA_MAX_CHARS);
        assert_eq!(truncate_metadata("  billing \n"), "billing");
    }

    proptest! {
        #[test]
        fn truncated_metadata_never_exceeds_limit(text in ".{0,1200}") {
            prop_assert!(truncate_metadata(&text).chars().count() <= METADATA_MAX_CHARS);
        }
    }
}
