//! Weaviate REST gateway.
//!
//! Each index maps to a Weaviate class whose name is the index name with its
//! first letter upper-cased. Documents become objects with a deterministic
//! UUIDv5 derived from the index name and the document id, so repeated
//! upserts overwrite the same object. Weaviate has no separate data-source or
//! indexer concepts; those calls succeed without touching the service.
//!
//! Requests retry on HTTP 429, 5xx and network errors with exponential
//! backoff (1s, 2s, 4s, ...). Other 4xx responses are returned to the caller
//! as refusals.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::SearchConfig;
use crate::models::{IndexDefinition, IndexDocument, QueryType};

use super::SearchGateway;

const VECTORIZER: &str = "text2vec-openai";
const RESULT_FIELDS: &str = "docId title content topic keywords source created modified";

pub struct WeaviateGateway {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    page_size: usize,
}

impl WeaviateGateway {
    /// # Errors
    ///
    /// Returns an error if `search.endpoint` is missing or the HTTP client
    /// cannot be built.
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow!("search.endpoint required for Weaviate provider"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: std::env::var(&config.api_key_env).ok(),
            max_retries: config.max_retries,
            page_size: config.page_size.max(1),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.endpoint, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Send with retry. Non-retryable responses are returned as-is.
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, path, "retrying Weaviate request");
                tokio::time::sleep(delay).await;
            }

            let mut builder = self.request(method.clone(), path);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!("Weaviate API error {}: {}", status, body_text));
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Weaviate request failed after retries")))
    }

    /// Interpret a response as accepted or refused, logging refusals.
    async fn accepted(&self, op: &str, response: Response) -> bool {
        let status = response.status();
        if status.is_success() {
            return true;
        }
        let body_text = response.text().await.unwrap_or_default();
        tracing::warn!(op, %status, body = %body_text, "Weaviate refused request");
        false
    }

    async fn json(&self, response: Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Weaviate API error {}: {}", status, body_text);
        }
        Ok(response.json().await?)
    }
}

/// Weaviate class name for an index.
pub fn class_name(index: &str) -> String {
    let lower = index.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Deterministic object id for document `id` of `index`.
pub fn object_id(index: &str, id: i64) -> Uuid {
    let name = format!("{}/{}", index.to_ascii_lowercase(), id);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

fn text_property(name: &str, vectorize: bool) -> Value {
    json!({
        "name": name,
        "dataType": ["text"],
        "moduleConfig": { VECTORIZER: { "skip": !vectorize } },
    })
}

fn class_schema(def: &IndexDefinition) -> Value {
    json!({
        "class": class_name(&def.name),
        "vectorizer": VECTORIZER,
        "moduleConfig": { VECTORIZER: { "model": def.embedding_model } },
        "properties": [
            { "name": "docId", "dataType": ["int"] },
            text_property("title", def.generate_title_vector),
            text_property("content", def.generate_content_vector),
            text_property("topic", def.generate_topic_vector),
            text_property("keywords", def.generate_keyword_vector),
            text_property("source", false),
            { "name": "created", "dataType": ["date"] },
            { "name": "modified", "dataType": ["date"] },
        ],
    })
}

fn object_properties(doc: &IndexDocument) -> Value {
    json!({
        "docId": doc.id,
        "title": doc.title,
        "content": doc.content,
        "topic": doc.topic,
        "keywords": doc.keywords,
        "source": doc.source,
        "created": doc.created.to_rfc3339(),
        "modified": doc.modified.to_rfc3339(),
    })
}

fn parse_ts(value: Option<&Value>) -> Result<DateTime<FixedOffset>> {
    let raw = value
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing timestamp"))?;
    DateTime::parse_from_rfc3339(raw).with_context(|| format!("bad timestamp '{}'", raw))
}

fn opt_text(props: &Value, field: &str) -> Option<String> {
    props
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Build a document from a Weaviate property map.
fn document_from_properties(props: &Value) -> Result<IndexDocument> {
    let id = props
        .get("docId")
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow!("object without docId"))?;
    Ok(IndexDocument {
        id,
        title: opt_text(props, "title").unwrap_or_default(),
        content: opt_text(props, "content").unwrap_or_default(),
        topic: opt_text(props, "topic"),
        keywords: opt_text(props, "keywords"),
        source: opt_text(props, "source").unwrap_or_default(),
        created: parse_ts(props.get("created"))?,
        modified: parse_ts(props.get("modified"))?,
    })
}

/// Parse one page of `GET /v1/objects`. Returns the documents and the id of
/// the last object, used as the next cursor.
fn parse_object_page(json: &Value) -> Result<(Vec<IndexDocument>, Option<String>)> {
    let objects = json
        .get("objects")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Invalid Weaviate response: missing objects array"))?;

    let mut docs = Vec::with_capacity(objects.len());
    for object in objects {
        let props = object
            .get("properties")
            .ok_or_else(|| anyhow!("Invalid Weaviate response: object without properties"))?;
        docs.push(document_from_properties(props)?);
    }
    let cursor = objects
        .last()
        .and_then(|o| o.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok((docs, cursor))
}

/// GraphQL search operator for the index's query type.
fn search_operator(query_type: QueryType, query: &str) -> String {
    let quoted = Value::String(query.to_string()).to_string();
    match query_type {
        QueryType::Simple | QueryType::Full => format!("bm25: {{ query: {quoted} }}"),
        QueryType::Semantic | QueryType::Vector => {
            format!("nearText: {{ concepts: [{quoted}] }}")
        }
        QueryType::VectorSimpleHybrid => format!("hybrid: {{ query: {quoted}, alpha: 0.5 }}"),
        QueryType::VectorSemanticHybrid => format!("hybrid: {{ query: {quoted}, alpha: 0.75 }}"),
    }
}

fn search_query(def: &IndexDefinition, query: &str) -> String {
    format!(
        "{{ Get {{ {class}({op}, limit: {limit}) {{ {RESULT_FIELDS} }} }} }}",
        class = class_name(&def.name),
        op = search_operator(def.query_type, query),
        limit = def.max_rag_attachments.max(0),
    )
}

fn parse_search_response(class: &str, json: &Value) -> Result<Vec<IndexDocument>> {
    if let Some(errors) = json.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            bail!("Weaviate GraphQL error: {}", Value::Array(errors.clone()));
        }
    }
    let hits = json
        .pointer(&format!("/data/Get/{class}"))
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Invalid Weaviate response: missing data.Get.{}", class))?;
    hits.iter().map(document_from_properties).collect()
}

#[async_trait]
impl SearchGateway for WeaviateGateway {
    async fn create_index(&self, def: &IndexDefinition) -> Result<bool> {
        let body = class_schema(def);
        let response = self.send(Method::POST, "/v1/schema", Some(&body)).await?;
        Ok(self.accepted("create_index", response).await)
    }

    async fn delete_index(&self, name: &str) -> Result<bool> {
        let path = format!("/v1/schema/{}", class_name(name));
        let response = self.send(Method::DELETE, &path, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(true);
        }
        Ok(self.accepted("delete_index", response).await)
    }

    async fn create_datasource(&self, _name: &str) -> Result<bool> {
        Ok(true)
    }

    async fn delete_datasource(&self, _name: &str) -> Result<bool> {
        Ok(true)
    }

    async fn create_indexer(&self, _def: &IndexDefinition) -> Result<bool> {
        Ok(true)
    }

    async fn delete_indexer(&self, _name: &str, _embedding_model: &str) -> Result<bool> {
        Ok(true)
    }

    async fn run_indexer(&self, _name: &str) -> Result<bool> {
        Ok(true)
    }

    async fn get_all_documents(&self, index: &str) -> Result<Vec<IndexDocument>> {
        let class = class_name(index);
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut path = format!("/v1/objects?class={}&limit={}", class, self.page_size);
            if let Some(after) = &cursor {
                path.push_str("&after=");
                path.push_str(after);
            }
            let response = self.send(Method::GET, &path, None).await?;
            let json = self.json(response).await?;
            let (docs, next) = parse_object_page(&json)?;
            let page_len = docs.len();
            all.extend(docs);

            if page_len < self.page_size || next.is_none() {
                break;
            }
            cursor = next;
        }

        tracing::debug!(index, count = all.len(), "listed remote documents");
        Ok(all)
    }

    async fn upsert_document(&self, index: &str, doc: &IndexDocument) -> Result<bool> {
        let class = class_name(index);
        let id = object_id(index, doc.id).to_string();
        let body = json!({
            "class": class,
            "id": id,
            "properties": object_properties(doc),
        });

        let path = format!("/v1/objects/{}/{}", class, id);
        let response = self.send(Method::PUT, &path, Some(&body)).await?;
        if response.status() != StatusCode::NOT_FOUND {
            return Ok(self.accepted("upsert_document", response).await);
        }

        let response = self.send(Method::POST, "/v1/objects", Some(&body)).await?;
        Ok(self.accepted("upsert_document", response).await)
    }

    async fn delete_document(&self, index: &str, id: i64) -> Result<bool> {
        let path = format!("/v1/objects/{}/{}", class_name(index), object_id(index, id));
        let response = self.send(Method::DELETE, &path, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Ok(self.accepted("delete_document", response).await)
    }

    async fn search(&self, def: &IndexDefinition, query: &str) -> Result<Vec<IndexDocument>> {
        let body = json!({ "query": search_query(def, query) });
        let response = self.send(Method::POST, "/v1/graphql", Some(&body)).await?;
        let json = self.json(response).await?;
        parse_search_response(&class_name(&def.name), &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(id: i64, title: &str) -> Value {
        json!({
            "docId": id,
            "title": title,
            "content": "body",
            "topic": null,
            "source": "unit",
            "created": "2024-05-01T10:00:00+02:00",
            "modified": "2024-05-02T10:00:00+02:00",
        })
    }

    #[test]
    fn class_names_capitalize_first_letter() {
        assert_eq!(class_name("orders"), "Orders");
        assert_eq!(class_name("ORDER_lines"), "Order_lines");
        assert_eq!(class_name("_x"), "_x");
    }

    #[test]
    fn object_ids_are_deterministic_per_index() {
        assert_eq!(object_id("Orders", 7), object_id("orders", 7));
        assert_ne!(object_id("orders", 7), object_id("orders", 8));
        assert_ne!(object_id("orders", 7), object_id("invoices", 7));
    }

    #[test]
    fn schema_skips_vectors_that_are_not_generated() {
        let mut def = IndexDefinition::named("Orders");
        def.generate_title_vector = true;
        let schema = class_schema(&def);
        let props = schema["properties"].as_array().unwrap();
        let skip = |name: &str| {
            props.iter().find(|p| p["name"] == name).unwrap()["moduleConfig"][VECTORIZER]["skip"]
                .as_bool()
                .unwrap()
        };
        assert!(!skip("title"));
        assert!(!skip("content"));
        assert!(skip("topic"));
        assert_eq!(schema["moduleConfig"][VECTORIZER]["model"], def.embedding_model);
    }

    #[test]
    fn object_page_yields_documents_and_cursor() {
        let json = json!({
            "objects": [
                { "id": "a", "properties": props(1, "Doc1") },
                { "id": "b", "properties": props(2, "Doc2") },
            ]
        });
        let (docs, cursor) = parse_object_page(&json).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].title, "Doc2");
        assert_eq!(docs[0].topic, None);
        assert_eq!(docs[0].created.offset().local_minus_utc(), 7200);
        assert_eq!(cursor.as_deref(), Some("b"));

        assert!(parse_object_page(&json!({})).is_err());
    }

    #[test]
    fn search_query_escapes_input_and_picks_operator() {
        let mut def = IndexDefinition::named("orders");
        def.query_type = QueryType::Vector;
        let q = search_query(&def, "say \"hi\"");
        assert!(q.contains("Orders(nearText: { concepts: [\"say \\\"hi\\\"\"] }, limit: 3)"));

        def.query_type = QueryType::Simple;
        assert!(search_query(&def, "x").contains("bm25"));
    }

    #[test]
    fn search_response_surfaces_graphql_errors() {
        let ok = json!({ "data": { "Get": { "Orders": [props(3, "Doc3")] } } });
        let hits = parse_search_response("Orders", &ok).unwrap();
        assert_eq!(hits[0].id, 3);

        let err = json!({ "errors": [{ "message": "no such class" }] });
        assert!(parse_search_response("Orders", &err).is_err());
    }
}
