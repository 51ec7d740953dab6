//! Core data models used throughout Doc Harvester.
//!
//! These types represent the documents, chunks, and search results that flow
//! through the harvesting and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Raw item produced by a connector before normalization.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content_type: String,
    /// Extracted plain text. Connectors run binary formats through
    /// [`crate::extract`] before building an item.
    pub body: String,
    pub metadata_json: String,
}

/// Normalized document stored in SQLite.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub content_type: String,
    pub body: String,
    pub metadata_json: String,
    pub dedup_hash: String,
}

/// A chunk of a document's body text.
///
/// Besides the text itself a chunk records where it came from: 1-based line
/// references into the stored body, the heading path active at its start,
/// and topic tags derived from that path.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
    pub start_line: i64,
    pub end_line: i64,
    pub section: Option<String>,
    pub tags: Vec<String>,
}

/// A search result returned from the query engine.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub title: Option<String>,
    pub source: String,
    pub source_id: String,
    pub updated_at: i64,
    pub score: f64,
    pub snippet: String,
    pub source_url: Option<String>,
    pub section: Option<String>,
}
