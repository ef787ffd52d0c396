//! Lazily loaded, process-wide hybrid index.
//!
//! The offline indexer writes a JSON file with one record per post section.
//! [`IndexStore`] reads and parses it on the first search and hands out a
//! shared [`IndexHandle`] from then on. The store is an ordinary value owned
//! by the server state, so tests can build as many independent stores as
//! they like.
//!
//! # File Format
//!
//! Either a bare array of documents or a wrapper object:
//!
//! ```json
//! { "dims": 512, "documents": [
//!   { "slug": "rust-async", "title": "Async Rust", "section": "intro",
//!     "heading": "Why async", "embedding": [0.01, ...] }
//! ] }
//! ```
//!
//! # Concurrency
//!
//! The handle lives in a [`tokio::sync::OnceCell`]. Concurrent first callers
//! all await the same in-flight load, so the file is read at most once per
//! store. A failed load leaves the cell empty: the caller that ran it gets
//! the error and the next caller starts a fresh load.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::models::SearchDocument;

/// Shared handle over a loaded index.
pub type IndexHandle = Arc<HybridIndex>;

/// Where the raw index bytes come from.
#[async_trait]
pub trait IndexSource: Send + Sync {
    /// Human-readable origin, used in log lines and error context.
    fn describe(&self) -> String;
    async fn read(&self) -> Result<Vec<u8>>;
}

/// Reads the index from a JSON file on disk.
pub struct FileIndexSource {
    path: PathBuf,
}

impl FileIndexSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl IndexSource for FileIndexSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn read(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read index file: {}", self.path.display()))
    }
}

/// The in-memory index: documents plus keyword statistics.
#[derive(Debug)]
pub struct HybridIndex {
    documents: Vec<SearchDocument>,
    keyword: KeywordIndex,
    dims: usize,
    fingerprint: String,
    loaded_at: DateTime<Utc>,
}

impl HybridIndex {
    /// Parse raw index bytes, checking every embedding against `dims`.
    pub fn from_bytes(bytes: &[u8], dims: usize) -> Result<Self> {
        let file: Value = serde_json::from_slice(bytes).context("Failed to parse index JSON")?;

        let documents = match file {
            Value::Object(mut wrapper) => {
                if let Some(file_dims) = wrapper.get("dims").and_then(Value::as_u64) {
                    if file_dims != dims as u64 {
                        bail!(
                            "index was built with {}-dimensional embeddings, expected {}",
                            file_dims,
                            dims
                        );
                    }
                }
                wrapper
                    .remove("documents")
                    .context("index object has no \"documents\" field")?
            }
            bare @ Value::Array(_) => bare,
            _ => bail!("index must be a JSON array or an object with \"documents\""),
        };
        let documents: Vec<SearchDocument> =
            serde_json::from_value(documents).context("Failed to parse index documents")?;

        Self::from_documents(documents, dims, fingerprint(bytes))
    }

    /// Build an index from already-parsed documents.
    pub fn from_documents(
        documents: Vec<SearchDocument>,
        dims: usize,
        fingerprint: String,
    ) -> Result<Self> {
        if let Some(bad) = documents.iter().find(|d| d.embedding.len() != dims) {
            bail!(
                "document '{}' has a {}-dimensional embedding, expected {}",
                bad.slug,
                bad.embedding.len(),
                dims
            );
        }

        let keyword = KeywordIndex::build(&documents);

        Ok(Self {
            documents,
            keyword,
            dims,
            fingerprint,
            loaded_at: Utc::now(),
        })
    }

    pub fn documents(&self) -> &[SearchDocument] {
        &self.documents
    }

    pub fn keyword(&self) -> &KeywordIndex {
        &self.keyword
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Hex SHA-256 of the bytes the index was parsed from.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Number of distinct post slugs.
    pub fn distinct_slugs(&self) -> usize {
        let mut slugs: Vec<&str> = self.documents.iter().map(|d| d.slug.as_str()).collect();
        slugs.sort_unstable();
        slugs.dedup();
        slugs.len()
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ============ Keyword statistics ============

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// BM25 term statistics over the text fields of every document.
#[derive(Debug, Default)]
pub struct KeywordIndex {
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<usize>,
    avg_len: f64,
    doc_freq: HashMap<String, usize>,
}

impl KeywordIndex {
    pub fn build(documents: &[SearchDocument]) -> Self {
        let mut term_freqs = Vec::with_capacity(documents.len());
        let mut doc_lens = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let text = format!("{} {} {}", doc.title, doc.section, doc.heading);
            let tokens = tokenize(&text);
            let mut tf: HashMap<String, u32> = HashMap::new();
            for t in &tokens {
                *tf.entry(t.clone()).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lens.push(tokens.len());
            term_freqs.push(tf);
        }

        let avg_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f64 / doc_lens.len() as f64
        };

        Self {
            term_freqs,
            doc_lens,
            avg_len,
            doc_freq,
        }
    }

    /// Score every document against `query`; returns `(position, score)`
    /// for documents with a positive score, in index order.
    pub fn score(&self, query: &str) -> Vec<(usize, f64)> {
        let mut terms = tokenize(query);
        terms.sort_unstable();
        terms.dedup();
        if terms.is_empty() || self.term_freqs.is_empty() {
            return Vec::new();
        }

        let n = self.term_freqs.len() as f64;
        let idf: Vec<(&str, f64)> = terms
            .iter()
            .filter_map(|t| {
                let df = *self.doc_freq.get(t)? as f64;
                Some((t.as_str(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln()))
            })
            .collect();
        if idf.is_empty() {
            return Vec::new();
        }

        self.term_freqs
            .iter()
            .enumerate()
            .filter_map(|(pos, tf)| {
                let len_norm = if self.avg_len > 0.0 {
                    self.doc_lens[pos] as f64 / self.avg_len
                } else {
                    1.0
                };
                let score: f64 = idf
                    .iter()
                    .filter_map(|(term, idf)| {
                        let f = *tf.get(*term)? as f64;
                        Some(
                            idf * (f * (BM25_K1 + 1.0))
                                / (f + BM25_K1 * (1.0 - BM25_B + BM25_B * len_norm)),
                        )
                    })
                    .sum();
                (score > 0.0).then_some((pos, score))
            })
            .collect()
    }
}

/// Lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

// ============ Store ============

/// Owns the lazily loaded [`IndexHandle`].
pub struct IndexStore {
    source: Arc<dyn IndexSource>,
    dims: usize,
    cell: OnceCell<IndexHandle>,
}

impl IndexStore {
    pub fn new(source: Arc<dyn IndexSource>, dims: usize) -> Self {
        Self {
            source,
            dims,
            cell: OnceCell::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(FileIndexSource::new(config.index.path.clone())),
            config.index.dims,
        )
    }

    /// Return the shared handle, loading it on first use.
    pub async fn get_index(&self) -> Result<IndexHandle> {
        let handle = self
            .cell
            .get_or_try_init(|| async {
                let origin = self.source.describe();
                let bytes = self.source.read().await?;
                let index = HybridIndex::from_bytes(&bytes, self.dims)
                    .with_context(|| format!("Failed to load index from {}", origin))?;
                tracing::info!(
                    source = %origin,
                    documents = index.len(),
                    fingerprint = %index.fingerprint(),
                    "search index loaded"
                );
                Ok::<_, anyhow::Error>(Arc::new(index))
            })
            .await?;
        Ok(handle.clone())
    }

    /// The handle if a load has already completed; never triggers one.
    pub fn loaded(&self) -> Option<IndexHandle> {
        self.cell.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn doc(slug: &str, title: &str, heading: &str, embedding: Vec<f32>) -> SearchDocument {
        SearchDocument {
            slug: slug.to_string(),
            title: title.to_string(),
            section: String::new(),
            heading: heading.to_string(),
            embedding,
        }
    }

    struct CountingSource {
        bytes: Vec<u8>,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl IndexSource for CountingSource {
        fn describe(&self) -> String {
            "counting".to_string()
        }

        async fn read(&self) -> Result<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(self.bytes.clone())
        }
    }

    fn counting_source(docs: &[SearchDocument]) -> Arc<CountingSource> {
        Arc::new(CountingSource {
            bytes: serde_json::to_vec(docs).unwrap(),
            reads: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_parse_bare_array() {
        let json = br#"[{"slug":"a","title":"A","section":"s","heading":"h","embedding":[1.0,0.0]}]"#;
        let index = HybridIndex::from_bytes(json, 2).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.documents()[0].slug, "a");
        assert_eq!(index.fingerprint().len(), 64);
    }

    #[test]
    fn test_parse_wrapped_object() {
        let json = br#"{"dims":2,"documents":[{"slug":"a","title":"A","embedding":[1.0,0.0]}]}"#;
        let index = HybridIndex::from_bytes(json, 2).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.documents()[0].section, "");
    }

    #[test]
    fn test_wrapped_dims_mismatch_rejected() {
        let json = br#"{"dims":3,"documents":[]}"#;
        let err = HybridIndex::from_bytes(json, 2).unwrap_err();
        assert!(err.to_string().contains("3-dimensional"));
    }

    #[test]
    fn test_embedding_length_mismatch_names_slug() {
        let json = br#"[{"slug":"short","title":"S","embedding":[1.0]}]"#;
        let err = HybridIndex::from_bytes(json, 2).unwrap_err();
        assert!(err.to_string().contains("short"));
    }

    #[test]
    fn test_bad_wrapped_document_reports_field() {
        let json = br#"{"dims":2,"documents":[{"slug":"a","embedding":[1.0,0.0]}]}"#;
        let err = HybridIndex::from_bytes(json, 2).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("Failed to parse index documents"), "{}", msg);
        assert!(msg.contains("missing field `title`"), "{}", msg);
    }

    #[test]
    fn test_object_without_documents_rejected() {
        let err = HybridIndex::from_bytes(br#"{"dims":2}"#, 2).unwrap_err();
        assert!(err.to_string().contains("documents"));
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(HybridIndex::from_bytes(b"{not json", 2).is_err());
    }

    #[test]
    fn test_distinct_slugs() {
        let docs = vec![
            doc("a", "A", "one", vec![1.0]),
            doc("a", "A", "two", vec![1.0]),
            doc("b", "B", "one", vec![1.0]),
        ];
        let index = HybridIndex::from_documents(docs, 1, String::new()).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.distinct_slugs(), 2);
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("React-Hooks: useEffect, 2024!"),
            vec!["react", "hooks", "useeffect", "2024"]
        );
    }

    #[test]
    fn test_bm25_prefers_matching_documents() {
        let docs = vec![
            doc("rust", "Async Rust", "Executors", vec![1.0]),
            doc("react", "React Hooks", "useEffect", vec![1.0]),
            doc("css", "Grid Layout", "Basics", vec![1.0]),
        ];
        let kw = KeywordIndex::build(&docs);
        let scores = kw.score("rust executors");
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].0, 0);
        assert!(scores[0].1 > 0.0);
        assert!(kw.score("python").is_empty());
        assert!(kw.score("   ").is_empty());
    }

    #[tokio::test]
    async fn test_get_index_twice_reads_once() {
        let source = counting_source(&[doc("a", "A", "h", vec![1.0, 0.0])]);
        let store = IndexStore::new(source.clone(), 2);
        assert!(store.loaded().is_none());

        let first = store.get_index().await.unwrap();
        let second = store.get_index().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        assert!(store.loaded().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_share_one_load() {
        let source = counting_source(&[doc("a", "A", "h", vec![1.0, 0.0])]);
        let store = Arc::new(IndexStore::new(source.clone(), 2));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move { store.get_index().await.unwrap() }));
        }

        let mut handles = Vec::new();
        for t in tasks {
            handles.push(t.await.unwrap());
        }

        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        for h in &handles[1..] {
            assert!(Arc::ptr_eq(&handles[0], h));
        }
    }

    /// Fails the first read, then serves `bytes`.
    struct FlakySource {
        bytes: Vec<u8>,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl IndexSource for FlakySource {
        fn describe(&self) -> String {
            "flaky".to_string()
        }

        async fn read(&self) -> Result<Vec<u8>> {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                bail!("index not published yet");
            }
            Ok(self.bytes.clone())
        }
    }

    #[tokio::test]
    async fn test_failed_load_is_retried_on_next_call() {
        let source = Arc::new(FlakySource {
            bytes: serde_json::to_vec(&[doc("a", "A", "h", vec![1.0, 0.0])]).unwrap(),
            reads: AtomicUsize::new(0),
        });
        let store = IndexStore::new(source.clone(), 2);

        let err = store.get_index().await.unwrap_err();
        assert!(format!("{:#}", err).contains("index not published yet"));
        assert!(store.loaded().is_none());

        let index = store.get_index().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
        assert!(store.loaded().is_some());
    }

    #[tokio::test]
    async fn test_missing_file_propagates_error() {
        let store = IndexStore::new(
            Arc::new(FileIndexSource::new("/nonexistent/search-index.json")),
            512,
        );
        let err = store.get_index().await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read index file"));
        assert!(store.loaded().is_none());
    }
}
