//! Index statistics.
//!
//! Loads the index exactly as the server would and prints a summary:
//! document and post counts, embedding dimension, file fingerprint, and the
//! posts with the most indexed sections. Used by `blog-search stats` to check
//! a freshly built index before deploying it.

use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;

use crate::config::Config;
use crate::index::{HybridIndex, IndexStore};

/// Section count for one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostStats {
    pub slug: String,
    pub title: String,
    pub sections: usize,
}

/// Posts ordered by section count (desc), then slug (asc).
pub fn post_breakdown(index: &HybridIndex) -> Vec<PostStats> {
    let mut by_slug: HashMap<&str, PostStats> = HashMap::new();
    for doc in index.documents() {
        by_slug
            .entry(doc.slug.as_str())
            .or_insert_with(|| PostStats {
                slug: doc.slug.clone(),
                title: doc.title.clone(),
                sections: 0,
            })
            .sections += 1;
    }

    let mut posts: Vec<PostStats> = by_slug.into_values().collect();
    posts.sort_by(|a, b| b.sections.cmp(&a.sections).then(a.slug.cmp(&b.slug)));
    posts
}

/// Run the stats command: load the index and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = IndexStore::from_config(config);
    let index = store.get_index().await?;


    println!("blog-search index stats");
    println!("=======================");
    println!();
    println!("  Index:       {}", config.index.path.display());
    println!("  Size:        {}", file_size_label(&config.index.path));
    println!("  SHA-256:     {}", index.fingerprint());
    println!();
    println!("  Documents:   {}", index.len());
    println!("  Posts:       {}", index.distinct_slugs());
    println!("  Dimensions:  {}", index.dims());

    let posts = post_breakdown(&index);
    if !posts.is_empty() {
        println!();
        println!("  Most sections:");
        println!("  {:<40} {:>8}   TITLE", "SLUG", "SECTIONS");
        println!("  {}", "-".repeat(72));
        for p in posts.iter().take(10) {
            println!("  {:<40} {:>8}   {}", p.slug, p.sections, p.title);
        }
    }

    println!();
    Ok(())
}

/// Size of the file at `path`, or `unknown` if it cannot be stat'd.
fn file_size_label(path: &Path) -> String {
    match std::fs::metadata(path) {
        Ok(meta) => format_bytes(meta.len()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read index metadata");
            "unknown".to_string()
        }
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
