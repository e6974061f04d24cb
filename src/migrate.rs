use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the catalog schema on an open pool. Idempotent.
///
/// Per-index document tables are not created here; they are provisioned by
/// [`SqliteDocumentStore::create_collection`](crate::store::sqlite::SqliteDocumentStore).
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            query_type TEXT NOT NULL,
            embedding_model TEXT NOT NULL,
            chunk_overlap REAL NOT NULL,
            indexing_interval_secs INTEGER NOT NULL,
            max_rag_attachments INTEGER NOT NULL,
            generate_topic INTEGER NOT NULL DEFAULT 0,
            generate_keywords INTEGER NOT NULL DEFAULT 0,
            generate_title_vector INTEGER NOT NULL DEFAULT 0,
            generate_content_vector INTEGER NOT NULL DEFAULT 0,
            generate_topic_vector INTEGER NOT NULL DEFAULT 0,
            generate_keyword_vector INTEGER NOT NULL DEFAULT 0,
            scoring_profile TEXT NOT NULL,
            scoring_aggregation TEXT NOT NULL,
            scoring_interpolation TEXT NOT NULL,
            scoring_freshness_boost REAL NOT NULL,
            scoring_boost_duration_days INTEGER NOT NULL,
            scoring_tag_boost REAL NOT NULL,
            scoring_weights TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
