//! # linkwell
//!
//! Bookmark content ingestion for multi-tenant organizations.
//!
//! A saved URL is fetched over plain HTTP for an immediate "light" record
//! (title, description, preview image), then rendered in a headless browser
//! to capture the page's full text. Bulk submissions are chunked into jobs
//! on a persisted work queue, and periodic discovery schedules feed new URLs
//! from sources such as GitHub Trending and Hacker News into the same path.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌──────────┐
//! │ Discovery  │──▶│ Dispatcher │──▶│ Work queue │──▶│ Workers  │
//! │ schedules  │   │  (chunks)  │   │  (SQLite)  │   │          │
//! └────────────┘   └────────────┘   └────────────┘   └────┬─────┘
//!                        ▲                                 ▼
//!                  ┌─────┴──────┐                   ┌────────────┐
//!                  │  CLI/HTTP  │──── single URL ──▶│  Ingestor  │
//!                  └────────────┘                   │ fetch+render│
//!                                                   └────┬───────┘
//!                                                        ▼
//!                                                 ┌────────────┐
//!                                                 │   Store    │
//!                                                 │ SQLite+FTS │
//!                                                 └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and status enums |
//! | [`store`] | Storage trait with SQLite and in-memory backends |
//! | [`fetcher`] | Light HTTP fetch and SEO metadata extraction |
//! | [`renderer`] | Headless browser rendering with deadlines |
//! | [`sanitize`] | HTML sanitization and plain-text extraction |
//! | [`ingest`] | Batch and single-URL ingestion |
//! | [`queue`] | Per-organization job status ledger |
//! | [`worker`] | Persisted work queue and worker pool |
//! | [`dispatcher`] | URL validation and chunked job submission |
//! | [`discovery`] | Discovery sources and schedule runs |
//! | [`scheduler`] | Periodic discovery triggers |
//! | [`search`] | Full-text search with relevance cut-off |
//! | [`server`] | JSON HTTP API |

pub mod app;
pub mod background;
pub mod config;
pub mod db;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod fetcher;
pub mod ids;
pub mod import;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod queue;
pub mod renderer;
pub mod sanitize;
pub mod scheduler;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
pub mod worker;
