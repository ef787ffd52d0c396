//! Core data models used throughout blog-search.
//!
//! These types represent the indexed sections, ranked hits, and the public
//! request/response shapes of the HTTP API.

use serde::{Deserialize, Serialize};

/// One indexed section of a blog post, produced by the offline indexer.
///
/// Several documents may share a `slug` (one per section of a post).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub heading: String,
    pub embedding: Vec<f32>,
}

/// A ranked document returned by the hybrid executor.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: SearchDocument,
    pub score: f64,
}

/// Public projection of a hit, one per post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicResult {
    pub title: String,
    pub url: String,
    pub score: f64,
}

/// Body accepted by `POST /api/search` and `POST /api/embeddings`.
///
/// `query` is kept as a raw JSON value so that a non-string query can be
/// told apart from a malformed body; see [`SearchQuery::from_body`].
#[derive(Debug, Default, Deserialize)]
pub struct QueryBody {
    #[serde(default)]
    pub query: Option<serde_json::Value>,
}

/// Reasons a request body does not yield a usable query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRejection {
    /// Body unparseable, `query` absent, or `query` not a string.
    Missing,
    /// `query` is empty after newline normalization and trimming.
    Empty,
}

/// A validated, newline-normalized query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery(String);

impl SearchQuery {
    /// Validate a raw request body into a query.
    pub fn from_body(body: &[u8]) -> Result<Self, QueryRejection> {
        let parsed: QueryBody =
            serde_json::from_slice(body).map_err(|_| QueryRejection::Missing)?;
        match parsed.query {
            Some(serde_json::Value::String(s)) => Self::parse(&s),
            _ => Err(QueryRejection::Missing),
        }
    }

    /// Normalize and validate a query string.
    pub fn parse(raw: &str) -> Result<Self, QueryRejection> {
        let normalized = normalize_query(raw);
        if normalized.is_empty() {
            return Err(QueryRejection::Empty);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Collapse newlines to spaces and trim surrounding whitespace.
pub fn normalize_query(raw: &str) -> String {
    raw.replace(['\r', '\n'], " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_newlines() {
        assert_eq!(normalize_query("rust\nasync\r\nrust"), "rust async  rust");
        assert_eq!(normalize_query("  \n  "), "");
    }

    #[test]
    fn test_from_body_valid() {
        let q = SearchQuery::from_body(br#"{"query":"react hooks"}"#).unwrap();
        assert_eq!(q.as_str(), "react hooks");
    }

    #[test]
    fn test_from_body_missing_field() {
        assert_eq!(
            SearchQuery::from_body(br#"{"q":"react"}"#),
            Err(QueryRejection::Missing)
        );
    }

    #[test]
    fn test_from_body_non_string() {
        assert_eq!(
            SearchQuery::from_body(br#"{"query":42}"#),
            Err(QueryRejection::Missing)
        );
        assert_eq!(
            SearchQuery::from_body(br#"{"query":null}"#),
            Err(QueryRejection::Missing)
        );
    }

    #[test]
    fn test_from_body_malformed_or_empty() {
        assert_eq!(SearchQuery::from_body(b""), Err(QueryRejection::Missing));
        assert_eq!(SearchQuery::from_body(b"not json"), Err(QueryRejection::Missing));
    }

    #[test]
    fn test_from_body_empty_query() {
        assert_eq!(
            SearchQuery::from_body(br#"{"query":""}"#),
            Err(QueryRejection::Empty)
        );
        assert_eq!(
            SearchQuery::from_body(br#"{"query":"\n\n  "}"#),
            Err(QueryRejection::Empty)
        );
    }
}
