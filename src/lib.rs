//! NewsHub ingestion service
//!
//! Periodically fetches RSS/Atom feeds for configured publications, normalizes
//! each item into an article (canonical URL, cleaned text, image, topic tags)
//! and upserts the result into SQLite. A small JSON admin API exposes run
//! status and manual triggers.

pub mod canonical;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod ingest;
pub mod item;
pub mod media;
pub mod routes;
pub mod scheduler;
pub mod tagger;
pub mod text;
