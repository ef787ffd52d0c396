//! Hybrid keyword + vector search and result formatting.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Keyword candidates: BM25 over `title`, `section` and `heading`.
//! 2. Vector candidates: cosine similarity at or above `similarity`.
//! 3. Normalize both sets to `[0, 1]` using min-max normalization.
//! 4. Blend with the configured [`RankingStrategy`]
//!    (default: `score = (1 - α) × keyword + α × semantic`).
//! 5. Sort by score (desc), then index position (asc).
//! 6. Truncate to `limit`.
//!
//! Hits are section-level; [`format_results`] collapses them to one result
//! per post.

use anyhow::Result;
use std::collections::{HashMap, HashSet};

use crate::config::{Config, RetrievalConfig};
use crate::embedding::{cosine_similarity, Embedder};
use crate::index::{IndexHandle, IndexStore};
use crate::models::{PublicResult, SearchHit, SearchQuery};

/// Combines normalized keyword and semantic scores into one ranking score.
pub trait RankingStrategy: Send + Sync {
    fn name(&self) -> &str;
    /// Both inputs are in `[0, 1]`; a channel the document was not retrieved
    /// by contributes `0.0`.
    fn blend(&self, keyword: f64, semantic: f64) -> f64;
}

/// Weighted linear combination: `(1 - α) × keyword + α × semantic`.
#[derive(Debug, Clone, Copy)]
pub struct LinearBlend {
    pub alpha: f64,
}

impl RankingStrategy for LinearBlend {
    fn name(&self) -> &str {
        "linear"
    }

    fn blend(&self, keyword: f64, semantic: f64) -> f64 {
        (1.0 - self.alpha) * keyword + self.alpha * semantic
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    /// Maximum hits to return.
    pub limit: usize,
    /// Minimum cosine similarity for a vector candidate.
    pub similarity: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            limit: 50,
            similarity: 0.5,
        }
    }
}

impl From<&RetrievalConfig> for SearchParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            limit: config.limit,
            similarity: config.similarity,
        }
    }
}

/// Run a hybrid query against a loaded index.
///
/// The caller is responsible for rejecting empty queries and for embedding
/// `term` into `vector`.
pub fn search(
    index: &IndexHandle,
    term: &str,
    vector: &[f32],
    params: &SearchParams,
    ranking: &dyn RankingStrategy,
) -> Vec<SearchHit> {
    let keyword_candidates = index.keyword().score(term);

    let vector_candidates: Vec<(usize, f64)> = index
        .documents()
        .iter()
        .enumerate()
        .filter_map(|(pos, doc)| {
            let sim = cosine_similarity(vector, &doc.embedding) as f64;
            (sim >= params.similarity).then_some((pos, sim))
        })
        .collect();

    if keyword_candidates.is_empty() && vector_candidates.is_empty() {
        return Vec::new();
    }

    let kw_map: HashMap<usize, f64> = normalize_scores(&keyword_candidates).into_iter().collect();
    let vec_map: HashMap<usize, f64> = normalize_scores(&vector_candidates).into_iter().collect();

    let mut positions: Vec<usize> = kw_map.keys().chain(vec_map.keys()).copied().collect();
    positions.sort_unstable();
    positions.dedup();

    let mut scored: Vec<(usize, f64)> = positions
        .into_iter()
        .map(|pos| {
            let k = kw_map.get(&pos).copied().unwrap_or(0.0);
            let v = vec_map.get(&pos).copied().unwrap_or(0.0);
            (pos, ranking.blend(k, v))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(params.limit);

    scored
        .into_iter()
        .map(|(pos, score)| SearchHit {
            document: index.documents()[pos].clone(),
            score,
        })
        .collect()
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[(usize, f64)]) -> Vec<(usize, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|(pos, s)| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            };
            (*pos, norm)
        })
        .collect()
}

/// Collapse hits to one per slug (first seen wins) and project them.
///
/// Hits arrive sorted by descending score, so the kept hit is the best one
/// for its post. Output order follows input order.
pub fn format_results(hits: &[SearchHit], base_url: &str) -> Vec<PublicResult> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut results = Vec::new();
    for hit in hits {
        if !seen.insert(hit.document.slug.as_str()) {
            continue;
        }
        results.push(PublicResult {
            title: hit.document.title.clone(),
            url: format!("{}/posts/{}", base_url, hit.document.slug),
            score: hit.score,
        });
    }
    results
}

/// Everything a search needs besides the query itself.
pub struct SearchEngine<'a> {
    pub index: &'a IndexStore,
    pub embedder: &'a dyn Embedder,
    pub ranking: &'a dyn RankingStrategy,
    pub params: SearchParams,
    pub base_url: &'a str,
}

impl SearchEngine<'_> {
    /// Embed, ensure the index is loaded, search and format.
    pub async fn run(&self, query: &SearchQuery) -> Result<Vec<PublicResult>> {
        let vector = self.embedder.embed(query.as_str()).await?;
        let index = self.index.get_index().await?;
        let hits = search(&index, query.as_str(), &vector, &self.params, self.ranking);
        tracing::debug!(
            query = query.as_str(),
            hits = hits.len(),
            ranking = self.ranking.name(),
            "hybrid search complete"
        );
        Ok(format_results(&hits, self.base_url))
    }
}

/// CLI entry point for `blog-search search`.
pub async fn run_search(
    config: &Config,
    embedder: &dyn Embedder,
    query: &str,
    limit: Option<usize>,
) -> Result<()> {
    let query = match SearchQuery::parse(query) {
        Ok(q) => q,
        Err(_) => {
            println!("No results.");
            return Ok(());
        }
    };

    if !embedder.is_configured() {
        anyhow::bail!(
            "Missing API key: set {} or configure [embedding] provider",
            config.embedding.api_key_env
        );
    }

    let store = IndexStore::from_config(config);
    let ranking = LinearBlend {
        alpha: config.retrieval.hybrid_alpha,
    };
    let mut params = SearchParams::from(&config.retrieval);
    if let Some(limit) = limit {
        params.limit = limit.max(1);
    }

    let engine = SearchEngine {
        index: &store,
        embedder,
        ranking: &ranking,
        params,
        base_url: &config.site.base_url,
    };
    let results = engine.run(&query).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, r) in results.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, r.score, r.title);
        println!("    {}", r.url);
    }

    Ok(())
}
