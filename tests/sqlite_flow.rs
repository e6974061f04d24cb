//! End-to-end flow on the SQLite catalog and document store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rag_harness::completion::DisabledCompletion;
use rag_harness::config::Config;
use rag_harness::error::RagError;
use rag_harness::gateway::memory::MemorySearchGateway;
use rag_harness::models::{IndexDefinition, IndexDocument, QueryType};
use rag_harness::orchestrator::RagOrchestrator;
use rag_harness::reconcile::SyncReconciler;
use rag_harness::store::sqlite::{SqliteCatalog, SqliteDocumentStore};
use rag_harness::{db, migrate};
use tempfile::TempDir;

fn write_config(dir: &Path) -> Config {
    let config_path = dir.join("rag.toml");
    let db_path = dir.join("data").join("rag.sqlite");
    std::fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}\"\n\n[sync]\nbatch_size = 2\n",
            db_path.display()
        ),
    )
    .unwrap();
    rag_harness::config::load_config(&config_path).unwrap()
}

struct Stack {
    orchestrator: RagOrchestrator,
    reconciler: SyncReconciler,
    search: Arc<MemorySearchGateway>,
}

async fn stack(config: &Config) -> Stack {
    migrate::run_migrations(config).await.unwrap();
    let pool = db::connect(config).await.unwrap();
    let catalog = Arc::new(SqliteCatalog::new(pool.clone()));
    let store = Arc::new(SqliteDocumentStore::new(pool).with_write_retries(config.db.write_retries));
    let search = Arc::new(MemorySearchGateway::new());
    Stack {
        orchestrator: RagOrchestrator::new(
            catalog.clone(),
            store.clone(),
            search.clone(),
            Arc::new(DisabledCompletion),
        ),
        reconciler: SyncReconciler::new(catalog, store, search.clone())
            .with_batch_size(config.sync.batch_size),
        search,
    }
}

#[tokio::test]
async fn index_lifecycle_round_trips_through_sqlite() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let s = stack(&config).await;

    let mut def = IndexDefinition::named("Orders");
    def.query_type = QueryType::VectorSimpleHybrid;
    def.scoring_profile.weights.insert("content".into(), 1.5);
    s.orchestrator.create_index(&def).await.unwrap();
    assert_eq!(s.orchestrator.get_index("orders").await.unwrap(), def);
    assert!(matches!(
        s.orchestrator.create_index(&IndexDefinition::named("ORDERS")).await,
        Err(RagError::IndexAlreadyExists(_))
    ));

    let docs = (0..5)
        .map(|i| IndexDocument::new(format!("Doc{i}"), "first", "sqlite"))
        .collect();
    assert_eq!(s.orchestrator.upsert_documents("Orders", docs).await.unwrap(), 5);
    let before = s.orchestrator.get_document("Orders", "Doc0").await.unwrap();
    assert_eq!(before.created, before.modified);

    tokio::time::sleep(Duration::from_millis(5)).await;
    s.orchestrator
        .upsert_documents("Orders", vec![IndexDocument::new("Doc0", "second", "sqlite")])
        .await
        .unwrap();
    let after = s.orchestrator.get_document("Orders", "Doc0").await.unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.created, before.created);
    assert!(after.modified > after.created);
    assert_eq!(after.content, "second");

    let report = s.reconciler.sync_index("Orders").await.unwrap();
    assert_eq!(report.primary, 5);
    assert_eq!(s.search.document_ids("Orders").await.len(), 5);

    let removed = s
        .orchestrator
        .delete_documents("Orders", &["Doc1".to_string(), "Missing".to_string()])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    let report = s.reconciler.sync_index("Orders").await.unwrap();
    assert_eq!(report.deleted, 1);

    s.orchestrator.delete_index("Orders").await.unwrap();
    assert!(s.orchestrator.get_all_indexes(None, None).await.unwrap().is_empty());
    assert!(s.orchestrator.get_document("Orders", "Doc0").await.is_err());
}

#[tokio::test]
async fn catalog_survives_reconnect() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    {
        let s = stack(&config).await;
        s.orchestrator
            .create_index(&IndexDefinition::named("Invoices"))
            .await
            .unwrap();
        s.orchestrator
            .upsert_documents("Invoices", vec![IndexDocument::new("Inv1", "body", "sqlite")])
            .await
            .unwrap();
    }

    let s = stack(&config).await;
    let all = s.orchestrator.get_all_indexes(Some(10), Some(1)).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "Invoices");
    let doc = s.orchestrator.get_document("Invoices", "Inv1").await.unwrap();
    assert_eq!(doc.source, "sqlite");
}
