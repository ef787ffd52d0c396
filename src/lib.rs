//! # blog-search
//!
//! Hybrid keyword + vector search for a statically generated blog.
//!
//! An offline step writes every post section, with a 512-dimensional
//! embedding, into a JSON index file. This crate serves queries against that
//! file: it embeds the query through an external provider, lazily loads the
//! index once per process, blends BM25 and cosine similarity, and collapses
//! section hits into one result per post.
//!
//! ## Architecture
//!
//! ```text
//!   POST /api/search                 POST /api/embeddings
//!         │                                  │
//!         │                         ┌────────▼────────┐
//!         │                         │  Rate Limiter   │
//!         │                         │  LRU + TTL      │
//!         │                         └────────┬────────┘
//!         ▼                                  ▼
//!  ┌─────────────┐                   ┌─────────────┐
//!  │  Embedder   │                   │  Embedder   │──▶ raw vector
//!  └──────┬──────┘                   └─────────────┘
//!         ▼
//!  ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//!  │ IndexStore  │──▶│ Hybrid search│──▶│ Dedupe/format│──▶ results
//!  │ (lazy, once)│   │ BM25 + cosine│   │ one per slug │
//!  └─────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Documents, hits, and request/response shapes |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Lazily loaded index store and keyword statistics |
//! | [`search`] | Hybrid ranking and result formatting |
//! | [`rate_limit`] | Per-client request limiting |
//! | [`server`] | HTTP API |
//! | [`stats`] | Index summary for the CLI |

pub mod config;
pub mod embedding;
pub mod index;
pub mod models;
pub mod rate_limit;
pub mod search;
pub mod server;
pub mod stats;
