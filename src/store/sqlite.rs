//! SQLite-backed [`IndexCatalog`] and [`DocumentStore`].
//!
//! The catalog lives in the `index_metadata` table created by
//! [`migrate::apply`](crate::migrate::apply). Every index gets its own
//! `docs_<name>` table. Table names are derived only from names that pass
//! [`is_valid_index_name`], so they are safe to interpolate into SQL.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, SecondsFormat};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::models::{IndexDefinition, IndexDocument, ScoringProfile};
use crate::validation::is_valid_index_name;

use super::{DocumentStore, IndexCatalog, UpsertOutcome};

const DOC_COLUMNS: &str = "id, title, content, topic, keywords, source, created, modified";

fn table_name(index: &str) -> Result<String> {
    if !is_valid_index_name(index) {
        bail!("refusing to build a table name from '{}'", index);
    }
    Ok(format!("\"docs_{}\"", index.to_ascii_lowercase()))
}

fn format_ts(ts: &DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, false)
}

fn parse_ts(raw: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).with_context(|| format!("bad timestamp '{}'", raw))
}

fn row_to_document(row: &SqliteRow) -> Result<IndexDocument> {
    let created: String = row.try_get("created")?;
    let modified: String = row.try_get("modified")?;
    Ok(IndexDocument {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        topic: row.try_get("topic")?,
        keywords: row.try_get("keywords")?,
        source: row.try_get("source")?,
        created: parse_ts(&created)?,
        modified: parse_ts(&modified)?,
    })
}

/// SQLite document store.
///
/// Wraps a [`SqlitePool`]; [`upsert`](DocumentStore::upsert) runs its
/// lookup and write in one immediate transaction, retried on lock contention.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    write_retries: u32,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_retries: 3,
        }
    }

    pub fn with_write_retries(mut self, retries: u32) -> Self {
        self.write_retries = retries;
        self
    }

    /// One upsert attempt. `BEGIN IMMEDIATE` takes the write lock before the
    /// lookup, so concurrent writers wait on the busy timeout instead of
    /// failing when a read snapshot is upgraded.
    async fn upsert_once(
        &self,
        table: &str,
        doc: IndexDocument,
        now: DateTime<FixedOffset>,
    ) -> Result<UpsertOutcome> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let written = match write_document(&mut conn, table, doc, now).await {
            Ok(outcome) => sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map(|_| outcome)
                .map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        if written.is_err() {
            if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                tracing::debug!(error = %e, "rollback after failed upsert");
            }
        }
        written
    }
}

async fn write_document(
    conn: &mut SqliteConnection,
    table: &str,
    mut doc: IndexDocument,
    now: DateTime<FixedOffset>,
) -> Result<UpsertOutcome> {
    let existing = sqlx::query(&format!(
        "SELECT {DOC_COLUMNS} FROM {table} WHERE title = ?"
    ))
    .bind(&doc.title)
    .fetch_optional(&mut *conn)
    .await?;

    match existing {
        Some(row) => {
            let existing = row_to_document(&row)?;
            doc.id = existing.id;
            doc.created = existing.created;
            doc.modified = now;
            sqlx::query(&format!(
                "UPDATE {table} SET content = ?, topic = ?, keywords = ?, source = ?, modified = ? WHERE id = ?"
            ))
            .bind(&doc.content)
            .bind(&doc.topic)
            .bind(&doc.keywords)
            .bind(&doc.source)
            .bind(format_ts(&doc.modified))
            .bind(doc.id)
            .execute(&mut *conn)
            .await?;
            Ok(UpsertOutcome::Updated(doc))
        }
        None => {
            doc.created = now;
            doc.modified = now;
            let result = sqlx::query(&format!(
                "INSERT INTO {table} (title, content, topic, keywords, source, created, modified) VALUES (?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&doc.title)
            .bind(&doc.content)
            .bind(&doc.topic)
            .bind(&doc.keywords)
            .bind(&doc.source)
            .bind(format_ts(&doc.created))
            .bind(format_ts(&doc.modified))
            .execute(&mut *conn)
            .await?;
            doc.id = result.last_insert_rowid();
            Ok(UpsertOutcome::Inserted(doc))
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get_document(&self, index: &str, title: &str) -> Result<Option<IndexDocument>> {
        let table = table_name(index)?;
        let row = sqlx::query(&format!(
            "SELECT {DOC_COLUMNS} FROM {table} WHERE title = ?"
        ))
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn add(&self, doc: &IndexDocument, index: &str) -> Result<IndexDocument> {
        let table = table_name(index)?;
        let result = sqlx::query(&format!(
            "INSERT INTO {table} (title, content, topic, keywords, source, created, modified) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.topic)
        .bind(&doc.keywords)
        .bind(&doc.source)
        .bind(format_ts(&doc.created))
        .bind(format_ts(&doc.modified))
        .execute(&self.pool)
        .await?;

        let mut stored = doc.clone();
        stored.id = result.last_insert_rowid();
        Ok(stored)
    }

    async fn update(
        &self,
        existing: &IndexDocument,
        doc: &IndexDocument,
        index: &str,
    ) -> Result<bool> {
        let table = table_name(index)?;
        let result = sqlx::query(&format!(
            "UPDATE {table} SET title = ?, content = ?, topic = ?, keywords = ?, source = ?, modified = ? WHERE id = ?"
        ))
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.topic)
        .bind(&doc.keywords)
        .bind(&doc.source)
        .bind(format_ts(&doc.modified))
        .bind(existing.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, doc: &IndexDocument, index: &str) -> Result<bool> {
        let table = table_name(index)?;
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
            .bind(doc.id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_all(&self, index: &str, count: u32, page: u32) -> Result<Vec<IndexDocument>> {
        let table = table_name(index)?;
        let offset = i64::from(page.max(1) - 1) * i64::from(count);
        let rows = sqlx::query(&format!(
            "SELECT {DOC_COLUMNS} FROM {table} ORDER BY id LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(count))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn create_collection(&self, index: &str) -> Result<()> {
        let table = table_name(index)?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL UNIQUE,
                content TEXT NOT NULL,
                topic TEXT,
                keywords TEXT,
                source TEXT NOT NULL,
                created TEXT NOT NULL,
                modified TEXT NOT NULL
            )
            "#
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_collection(&self, index: &str) -> Result<()> {
        let table = table_name(index)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert(
        &self,
        index: &str,
        doc: IndexDocument,
        now: DateTime<FixedOffset>,
    ) -> Result<UpsertOutcome> {
        let table = table_name(index)?;
        let table = table.as_str();
        let doc = &doc;
        db::with_retry(self.write_retries, || async move {
            self.upsert_once(table, doc.clone(), now).await
        })
        .await
    }
}

/// SQLite index catalog over the `index_metadata` table.
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const CATALOG_COLUMNS: &str = "name, query_type, embedding_model, chunk_overlap, \
    indexing_interval_secs, max_rag_attachments, generate_topic, generate_keywords, \
    generate_title_vector, generate_content_vector, generate_topic_vector, \
    generate_keyword_vector, scoring_profile, scoring_aggregation, scoring_interpolation, \
    scoring_freshness_boost, scoring_boost_duration_days, scoring_tag_boost, scoring_weights";

fn row_to_definition(row: &SqliteRow) -> Result<IndexDefinition> {
    let query_type: String = row.try_get("query_type")?;
    let aggregation: String = row.try_get("scoring_aggregation")?;
    let interpolation: String = row.try_get("scoring_interpolation")?;
    let weights: String = row.try_get("scoring_weights")?;
    let interval: i64 = row.try_get("indexing_interval_secs")?;

    let weights: BTreeMap<String, f64> =
        serde_json::from_str(&weights).context("bad scoring_weights JSON")?;

    Ok(IndexDefinition {
        name: row.try_get("name")?,
        query_type: query_type.parse()?,
        embedding_model: row.try_get("embedding_model")?,
        chunk_overlap: row.try_get("chunk_overlap")?,
        indexing_interval: Duration::from_secs(interval.max(0) as u64),
        max_rag_attachments: row.try_get("max_rag_attachments")?,
        generate_topic: row.try_get("generate_topic")?,
        generate_keywords: row.try_get("generate_keywords")?,
        generate_title_vector: row.try_get("generate_title_vector")?,
        generate_content_vector: row.try_get("generate_content_vector")?,
        generate_topic_vector: row.try_get("generate_topic_vector")?,
        generate_keyword_vector: row.try_get("generate_keyword_vector")?,
        scoring_profile: ScoringProfile {
            name: row.try_get("scoring_profile")?,
            aggregation: aggregation.parse()?,
            interpolation: interpolation.parse()?,
            freshness_boost: row.try_get("scoring_freshness_boost")?,
            boost_duration_days: row.try_get("scoring_boost_duration_days")?,
            tag_boost: row.try_get("scoring_tag_boost")?,
            weights,
        },
    })
}

#[async_trait]
impl IndexCatalog for SqliteCatalog {
    async fn get_by_name(&self, name: &str) -> Result<Option<IndexDefinition>> {
        let row = sqlx::query(&format!(
            "SELECT {CATALOG_COLUMNS} FROM index_metadata WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_definition).transpose()
    }

    async fn add(&self, def: &IndexDefinition) -> Result<()> {
        let profile = &def.scoring_profile;
        let weights = serde_json::to_string(&profile.weights)?;
        let interval = i64::try_from(def.indexing_interval.as_secs())?;

        sqlx::query(&format!(
            "INSERT INTO index_metadata ({CATALOG_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&def.name)
        .bind(def.query_type.to_string())
        .bind(&def.embedding_model)
        .bind(def.chunk_overlap)
        .bind(interval)
        .bind(def.max_rag_attachments)
        .bind(def.generate_topic)
        .bind(def.generate_keywords)
        .bind(def.generate_title_vector)
        .bind(def.generate_content_vector)
        .bind(def.generate_topic_vector)
        .bind(def.generate_keyword_vector)
        .bind(&profile.name)
        .bind(profile.aggregation.to_string())
        .bind(profile.interpolation.to_string())
        .bind(profile.freshness_boost)
        .bind(profile.boost_duration_days)
        .bind(profile.tag_boost)
        .bind(weights)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, def: &IndexDefinition) -> Result<bool> {
        let result = sqlx::query("DELETE FROM index_metadata WHERE name = ?")
            .bind(&def.name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_all(&self, count: Option<u32>, page: Option<u32>) -> Result<Vec<IndexDefinition>> {
        let rows = match count {
            Some(count) => {
                let offset = i64::from(page.unwrap_or(1).max(1) - 1) * i64::from(count);
                sqlx::query(&format!(
                    "SELECT {CATALOG_COLUMNS} FROM index_metadata ORDER BY id LIMIT ? OFFSET ?"
                ))
                .bind(i64::from(count))
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {CATALOG_COLUMNS} FROM index_metadata ORDER BY id"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_definition).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now, QueryType, SearchAggregation};
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn pool(tmp: &TempDir) -> SqlitePool {
        let url = format!("sqlite:{}?mode=rwc", tmp.path().join("rag.sqlite").display());
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        pool
    }

    #[test]
    fn table_name_rejects_unsafe_input() {
        assert_eq!(table_name("Orders").unwrap(), "\"docs_orders\"");
        assert!(table_name("x\"; DROP TABLE index_metadata; --").is_err());
        assert!(table_name("select").is_err());
    }

    #[tokio::test]
    async fn catalog_roundtrips_definition() {
        let tmp = TempDir::new().unwrap();
        let catalog = SqliteCatalog::new(pool(&tmp).await);

        let mut def = IndexDefinition::named("Orders");
        def.query_type = QueryType::VectorSemanticHybrid;
        def.generate_topic = true;
        def.scoring_profile.aggregation = SearchAggregation::Maximum;
        def.scoring_profile.weights.insert("title".into(), 2.5);
        catalog.add(&def).await.unwrap();

        let loaded = catalog.get_by_name("orders").await.unwrap().unwrap();
        assert_eq!(loaded, def);
        assert!(catalog.add(&IndexDefinition::named("ORDERS")).await.is_err());

        catalog.add(&IndexDefinition::named("Invoices")).await.unwrap();
        let page = catalog.get_all(Some(1), Some(2)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "Invoices");

        assert!(catalog.delete(&def).await.unwrap());
        assert!(catalog.get_by_name("Orders").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates_in_place() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteDocumentStore::new(pool(&tmp).await);
        store.create_collection("Orders").await.unwrap();

        let t0 = now();
        let first = store
            .upsert("Orders", IndexDocument::new("Doc1", "v1", "unit"), t0)
            .await
            .unwrap();
        assert!(first.is_insert());
        assert_eq!(first.document().created, first.document().modified);

        let t1 = t0 + chrono::Duration::milliseconds(10);
        let mut revised = IndexDocument::new("Doc1", "v2", "unit");
        revised.topic = Some("billing".into());
        let second = store.upsert("Orders", revised, t1).await.unwrap();
        assert!(!second.is_insert());

        let stored = store.get_document("Orders", "Doc1").await.unwrap().unwrap();
        assert_eq!(stored.id, first.document().id);
        assert_eq!(stored.content, "v2");
        assert_eq!(stored.topic.as_deref(), Some("billing"));
        assert_eq!(stored.created, t0);
        assert_eq!(stored.modified, t1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_all_commit() {
        let tmp = TempDir::new().unwrap();
        let config: crate::config::Config = toml::from_str(&format!(
            "[db]\npath = \"{}\"\nmax_connections = 8\n",
            tmp.path().join("rag.sqlite").display()
        ))
        .unwrap();
        let pool = db::connect(&config).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        let store = std::sync::Arc::new(SqliteDocumentStore::new(pool));
        store.create_collection("Orders").await.unwrap();
        for i in 0..50 {
            let doc = IndexDocument::new(format!("Doc{i}"), "v0", "seed");
            store.add(&doc, "Orders").await.unwrap();
        }

        let mut writers = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            writers.push(tokio::spawn(async move {
                let doc = IndexDocument::new(format!("Doc{i}"), "v1", "unit");
                store.upsert("Orders", doc, now()).await
            }));
        }
        for i in 0..16 {
            let store = store.clone();
            writers.push(tokio::spawn(async move {
                let doc = IndexDocument::new("Shared", format!("rev{i}"), "unit");
                store.upsert("Orders", doc, now()).await
            }));
        }

        let mut failed = 0;
        for writer in writers {
            if writer.await.unwrap().is_err() {
                failed += 1;
            }
        }
        assert_eq!(failed, 0);

        let rows = store.get_all("Orders", 100, 1).await.unwrap();
        assert_eq!(rows.len(), 51);
        assert!(rows
            .iter()
            .filter(|d| d.title != "Shared")
            .all(|d| d.content == "v1"));
    }

    #[tokio::test]
    async fn collections_are_isolated_and_droppable() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteDocumentStore::new(pool(&tmp).await);
        store.create_collection("Orders").await.unwrap();
        store.create_collection("Invoices").await.unwrap();

        for i in 0..3 {
            let doc = IndexDocument::new(format!("Doc{i}"), "body", "unit");
            store.add(&doc, "Orders").await.unwrap();
        }
        assert_eq!(store.get_all("Orders", 2, 1).await.unwrap().len(), 2);
        assert_eq!(store.get_all("Orders", 2, 2).await.unwrap().len(), 1);
        assert!(store.get_all("Orders", 2, 3).await.unwrap().is_empty());
        assert!(store.get_all("Invoices", 10, 1).await.unwrap().is_empty());

        let doc = store.get_document("Orders", "Doc1").await.unwrap().unwrap();
        assert!(store.delete(&doc, "Orders").await.unwrap());
        assert!(!store.delete(&doc, "Orders").await.unwrap());

        store.delete_collection("Orders").await.unwrap();
        assert!(store.get_document("Orders", "Doc0").await.is_err());
    }
}
