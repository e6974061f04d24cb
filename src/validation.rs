//! Input validation for index names, definitions and upsert requests.
//!
//! Index names are interpolated into storage identifiers and route segments,
//! so [`is_valid_index_name`] is the gate every operation passes first.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::models::{IndexDefinition, IndexDocument};

const STORAGE_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TABLE", "WHERE", "FROM",
    "JOIN", "UNION", "ORDER", "GROUP", "HAVING",
];

/// Names that collide with route verbs of the API layer.
const ROUTE_VERBS: &[&str] = &["ALL", "CONFIGURE", "DELETE"];

const MAX_NAME_LEN: usize = 255;
const MAX_INDEXING_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

fn identifier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern"))
}

/// Returns `true` if `name` is usable as an index name.
///
/// ```rust
/// use rag_harness::validation::is_valid_index_name;
///
/// assert!(is_valid_index_name("Orders"));
/// assert!(!is_valid_index_name("drop"));
/// assert!(!is_valid_index_name("1abc"));
/// ```
pub fn is_valid_index_name(name: &str) -> bool {
    if !identifier().is_match(name) {
        return false;
    }
    let reserved = |list: &[&str]| list.iter().any(|kw| kw.eq_ignore_ascii_case(name));
    !reserved(STORAGE_KEYWORDS) && !reserved(ROUTE_VERBS)
}

/// Returns the first problem with `def`, or `None` if it is acceptable.
pub fn validate_index_definition(def: &IndexDefinition) -> Option<String> {
    if def.name.trim().is_empty() || !is_valid_index_name(&def.name) {
        return Some(format!("The index name '{}' is invalid.", def.name));
    }
    if def.name.len() > MAX_NAME_LEN {
        return Some("The index name exceeds the maximum allowed length of 255 characters.".into());
    }
    if def.indexing_interval.is_zero() {
        return Some("IndexingInterval must be a positive value.".into());
    }
    if def.indexing_interval > MAX_INDEXING_INTERVAL {
        return Some("The indexing interval cannot exceed 1 day.".into());
    }
    if def.embedding_model.len() > MAX_NAME_LEN {
        return Some(
            "The EmbeddingModel exceeds the maximum allowed length of 255 characters.".into(),
        );
    }
    if def.max_rag_attachments < 0 {
        return Some("MaxRagAttachments must be a non-negative integer.".into());
    }
    if !(0.0..=1.0).contains(&def.chunk_overlap) {
        return Some("ChunkOverlap must be between 0 and 1 (inclusive).".into());
    }

    let profile = &def.scoring_profile;
    if !profile.name.is_empty() {
        if profile.name.trim().is_empty() {
            return Some("The ScoringProfile name is required.".into());
        }
        if profile.name.len() > MAX_NAME_LEN {
            return Some(
                "The ScoringProfile name exceeds the maximum allowed length of 255 characters."
                    .into(),
            );
        }
        if profile.freshness_boost < 0.0 {
            return Some("FreshnessBoost must be a non-negative value.".into());
        }
        if profile.boost_duration_days < 0 {
            return Some("BoostDurationDays must be a non-negative integer.".into());
        }
        if profile.tag_boost < 0.0 {
            return Some("TagBoost must be a non-negative value.".into());
        }
        for (key, weight) in &profile.weights {
            if key.trim().is_empty() {
                return Some("All weight keys must be non-empty strings.".into());
            }
            if *weight < 0.0 {
                return Some(format!(
                    "The weight value for key '{}' must be a non-negative number.",
                    key
                ));
            }
        }
    }
    None
}

/// Returns the first problem with an upsert batch, or `None`.
pub fn validate_documents(documents: &[IndexDocument]) -> Option<String> {
    if documents.is_empty() {
        return Some("The request must contain at least one document.".into());
    }
    for doc in documents {
        if doc.title.trim().is_empty() {
            return Some("Document title cannot be empty.".into());
        }
        if doc.content.trim().is_empty() {
            return Some("Document content cannot be empty.".into());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_plain_identifiers() {
        for name in ["Orders", "_private", "a1_b2", "Z"] {
            assert!(is_valid_index_name(name), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_reserved_words_in_any_casing() {
        for name in ["DROP", "drop", "Drop", "ALL", "all", "configure", "Delete", "having"] {
            assert!(!is_valid_index_name(name), "{name} should be rejected");
        }
    }

    #[test]
    fn rejects_grammar_violations() {
        for name in ["1abc", "a-b", "", "with space", "semi;colon", "ünicode"] {
            assert!(!is_valid_index_name(name), "{name:?} should be rejected");
        }
    }

    #[test]
    fn definition_checks_ranges() {
        let mut def = IndexDefinition::named("Orders");
        assert_eq!(validate_index_definition(&def), None);

        def.chunk_overlap = 1.5;
        assert!(validate_index_definition(&def).unwrap().contains("ChunkOverlap"));

        def.chunk_overlap = 0.2;
        def.indexing_interval = Duration::from_secs(2 * 24 * 60 * 60);
        assert!(validate_index_definition(&def).unwrap().contains("1 day"));

        def.indexing_interval = Duration::from_secs(60);
        def.scoring_profile.weights.insert("title".into(), -1.0);
        assert!(validate_index_definition(&def).unwrap().contains("title"));
    }

    #[test]
    fn documents_require_title_and_content() {
        assert!(validate_documents(&[]).is_some());
        let blank = IndexDocument::new(" ", "body", "src");
        assert!(validate_documents(&[blank]).unwrap().contains("title"));
        let empty = IndexDocument::new("Doc1", "", "src");
        assert!(validate_documents(&[empty]).unwrap().contains("content"));
    }

    proptest! {
        #[test]
        fn identifiers_outside_reserved_lists_are_valid(name in "[A-Za-z_][A-Za-z0-9_]{0,24}") {
            let upper = name.to_ascii_uppercase();
            let reserved = STORAGE_KEYWORDS.contains(&upper.as_str())
                || ROUTE_VERBS.contains(&upper.as_str());
            prop_assert_eq!(is_valid_index_name(&name), !reserved);
        }

        #[test]
        fn leading_digit_is_always_invalid(name in "[0-9][A-Za-z0-9_]{0,16}") {
            prop_assert!(!is_valid_index_name(&name));
        }
    }
}
