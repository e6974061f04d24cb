//! Error types returned by the orchestration layer.
//!
//! Expected failures (bad names, missing indexes, partial provisioning) are
//! distinct variants so the API layer can map them to client responses via
//! [`RagError::status_code`]. Anything unexpected travels as
//! [`RagError::Backend`].

use std::fmt;

use thiserror::Error;

/// One step of index provisioning or teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStep {
    CatalogEntry,
    DocumentCollection,
    SearchIndex,
    Datasource,
    Indexer,
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisioningStep::CatalogEntry => "catalog entry",
            ProvisioningStep::DocumentCollection => "document collection",
            ProvisioningStep::SearchIndex => "search index",
            ProvisioningStep::Datasource => "datasource",
            ProvisioningStep::Indexer => "indexer",
        };
        f.write_str(s)
    }
}

/// Errors produced by [`RagOrchestrator`](crate::orchestrator::RagOrchestrator),
/// [`SyncReconciler`](crate::reconcile::SyncReconciler) and the task layer.
#[derive(Debug, Error)]
pub enum RagError {
    /// The index name fails the identifier grammar or is a reserved word.
    #[error("the index name '{0}' is invalid; use letters, digits and underscores and avoid reserved words")]
    InvalidIndexName(String),

    /// The request body failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no index named '{0}' was found")]
    IndexNotFound(String),

    #[error("an index named '{0}' already exists")]
    IndexAlreadyExists(String),

    #[error("no document titled '{title}' exists in index '{index}'")]
    DocumentNotFound { index: String, title: String },

    /// A create/delete step failed. Earlier steps are left in place.
    #[error("failed to {action} the {step} for index '{index}': {reason}")]
    Provisioning {
        index: String,
        action: &'static str,
        step: ProvisioningStep,
        reason: String,
    },

    #[error("failed to write document '{title}' to index '{index}': {reason}")]
    DocumentWrite {
        index: String,
        title: String,
        reason: String,
    },

    /// The task queue cannot perform the requested operation.
    #[error("task queue: {0}")]
    Queue(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl RagError {
    /// HTTP status the API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            RagError::InvalidIndexName(_)
            | RagError::InvalidRequest(_)
            | RagError::IndexAlreadyExists(_) => 400,
            RagError::IndexNotFound(_) | RagError::DocumentNotFound { .. } => 404,
            RagError::Provisioning { .. }
            | RagError::DocumentWrite { .. }
            | RagError::Queue(_)
            | RagError::Backend(_) => 500,
        }
    }
}

/// A convenience result type for orchestration operations.
pub type Result<T> = std::result::Result<T, RagError>;
