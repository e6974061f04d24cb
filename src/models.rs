//! Core data models used throughout the harness.
//!
//! [`IndexDefinition`] describes how documents in one index are enriched,
//! vectorized and scored. [`IndexDocument`] is a single row of an index's
//! document collection. Both serialize with camelCase field names so they
//! can travel inside queue payloads unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::bail;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Scoring profile name used when a definition does not name one.
pub const DEFAULT_SCORING_PROFILE: &str = "vector-search-profile";
/// Embedding model used when a definition does not name one.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
/// Width of the topic/keywords columns; generated metadata never exceeds it.
pub const METADATA_MAX_CHARS: usize = 255;

/// Current time as a timestamp with offset, the form stored on documents.
pub fn now() -> DateTime<FixedOffset> {
    Utc::now().fixed_offset()
}

/// How queries against an index are executed by the search service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueryType {
    #[default]
    Simple,
    Full,
    Semantic,
    Vector,
    VectorSimpleHybrid,
    VectorSemanticHybrid,
}

/// How per-field scoring function results are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchAggregation {
    #[default]
    Sum,
    Average,
    Minimum,
    Maximum,
    FirstMatching,
}

/// How a boost is interpolated across its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchInterpolation {
    #[default]
    Linear,
    Constant,
    Quadratic,
    Logarithmic,
}

macro_rules! string_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($ty::$variant => f.write_str(stringify!($variant)),)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> anyhow::Result<Self> {
                $(if s.eq_ignore_ascii_case(stringify!($variant)) {
                    return Ok($ty::$variant);
                })+
                bail!("unknown {} '{}'", stringify!($ty), s)
            }
        }
    };
}

string_enum!(QueryType { Simple, Full, Semantic, Vector, VectorSimpleHybrid, VectorSemanticHybrid });
string_enum!(SearchAggregation { Sum, Average, Minimum, Maximum, FirstMatching });
string_enum!(SearchInterpolation { Linear, Constant, Quadratic, Logarithmic });

/// Relevance tuning attached to an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringProfile {
    pub name: String,
    pub aggregation: SearchAggregation,
    pub interpolation: SearchInterpolation,
    pub freshness_boost: f64,
    pub boost_duration_days: i64,
    pub tag_boost: f64,
    /// Field name → weight.
    pub weights: BTreeMap<String, f64>,
}

impl Default for ScoringProfile {
    fn default() -> Self {
        Self {
            name: DEFAULT_SCORING_PROFILE.to_string(),
            aggregation: SearchAggregation::Sum,
            interpolation: SearchInterpolation::Linear,
            freshness_boost: 1.0,
            boost_duration_days: 180,
            tag_boost: 1.0,
            weights: BTreeMap::new(),
        }
    }
}

/// Configuration of one named index.
///
/// Written once by [`RagOrchestrator::create_index`](crate::orchestrator::RagOrchestrator::create_index)
/// and never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexDefinition {
    pub name: String,
    pub query_type: QueryType,
    pub embedding_model: String,
    /// Fraction of each chunk repeated in the next one, in `[0, 1]`.
    pub chunk_overlap: f64,
    /// How often the remote indexer pulls from the data source.
    #[serde(with = "duration_secs")]
    pub indexing_interval: Duration,
    pub max_rag_attachments: i64,
    pub generate_topic: bool,
    pub generate_keywords: bool,
    pub generate_title_vector: bool,
    pub generate_content_vector: bool,
    pub generate_topic_vector: bool,
    pub generate_keyword_vector: bool,
    pub scoring_profile: ScoringProfile,
}

impl Default for IndexDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            query_type: QueryType::Simple,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chunk_overlap: 0.1,
            indexing_interval: Duration::from_secs(3600),
            max_rag_attachments: 3,
            generate_topic: false,
            generate_keywords: false,
            generate_title_vector: false,
            generate_content_vector: true,
            generate_topic_vector: false,
            generate_keyword_vector: false,
            scoring_profile: ScoringProfile::default(),
        }
    }
}

impl IndexDefinition {
    /// A definition with default settings and the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// A document stored in one index's collection.
///
/// `title` is the natural key inside an index; `id` is the surrogate
/// assigned by the document store (0 until the row is first written).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    #[serde(default)]
    pub id: i64,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default = "now")]
    pub created: DateTime<FixedOffset>,
    #[serde(default = "now")]
    pub modified: DateTime<FixedOffset>,
}

impl IndexDocument {
    /// A fresh, unsaved document.
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let ts = now();
        Self {
            id: 0,
            title: title.into(),
            content: content.into(),
            topic: None,
            keywords: None,
            source: source.into(),
            created: ts,
            modified: ts,
        }
    }
}

/// Returns `true` when an optional metadata field holds no usable text.
pub(crate) fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_text_roundtrip_is_case_insensitive() {
        assert_eq!("semantic".parse::<QueryType>().unwrap(), QueryType::Semantic);
        assert_eq!(
            QueryType::VectorSemanticHybrid.to_string(),
            "VectorSemanticHybrid"
        );
        assert_eq!(
            "FIRSTMATCHING".parse::<SearchAggregation>().unwrap(),
            SearchAggregation::FirstMatching
        );
        assert!("cubic".parse::<SearchInterpolation>().is_err());
    }

    #[test]
    fn definition_defaults_fill_missing_fields() {
        let def: IndexDefinition = serde_json::from_str(r#"{"name":"Orders"}"#).unwrap();
        assert_eq!(def.name, "Orders");
        assert_eq!(def.embedding_model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(def.indexing_interval, Duration::from_secs(3600));
        assert_eq!(def.scoring_profile.name, DEFAULT_SCORING_PROFILE);
        assert_eq!(def.scoring_profile.boost_duration_days, 180);
    }

    #[test]
    fn document_json_uses_camel_case() {
        let doc = IndexDocument::new("Doc1", "body", "unit");
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("title").is_some());
        assert!(json.get("created").is_some());
        let back: IndexDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn blank_detects_whitespace() {
        assert!(is_blank(&None));
        assert!(is_blank(&Some("  ".into())));
        assert!(!is_blank(&Some("rust".into())));
    }
}
