//! Keyword, semantic, and hybrid search over harvested chunks.
//!
//! Keyword search goes through the FTS5 index; semantic search embeds the
//! query and ranks stored vectors by cosine similarity. Hybrid blends the
//! two channels after min-max normalization:
//!
//! ```text
//! score = (1 - alpha) * keyword + alpha * semantic
//! ```
//!
//! Chunk scores are grouped to documents by MAX, so one strongly matching
//! chunk is enough to surface its document.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::models::SearchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keyword" => Ok(SearchMode::Keyword),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => bail!(
                "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
                other
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub source: Option<String>,
    pub since: Option<String>,
    pub limit: Option<i64>,
}

/// Run a search and return ranked document results.
///
/// Shared by the CLI and the HTTP server.
pub async fn search_documents(config: &Config, req: &SearchRequest) -> Result<Vec<SearchResult>> {
    if req.query.trim().is_empty() {
        return Ok(Vec::new());
    }

    // Semantic/hybrid require embeddings
    if req.mode != SearchMode::Keyword && !config.embedding.is_enabled() {
        bail!("This search mode requires embeddings. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let results = search_with_pool(config, &pool, req).await;
    pool.close().await;
    results
}

async fn search_with_pool(
    config: &Config,
    pool: &SqlitePool,
    req: &SearchRequest,
) -> Result<Vec<SearchResult>> {
    let final_limit = req.limit.unwrap_or(config.retrieval.final_limit);

    // Collect candidates from each channel
    let keyword_candidates = if req.mode != SearchMode::Semantic {
        fetch_keyword_candidates(pool, &req.query, config.retrieval.candidate_k_keyword).await?
    } else {
        Vec::new()
    };

    let vector_candidates = if req.mode != SearchMode::Keyword {
        fetch_vector_candidates(pool, config, &req.query, config.retrieval.candidate_k_vector)
            .await?
    } else {
        Vec::new()
    };

    if keyword_candidates.is_empty() && vector_candidates.is_empty() {
        return Ok(Vec::new());
    }

    // Normalize scores per channel
    let norm_keyword = normalize_scores(&keyword_candidates);
    let norm_vector = normalize_scores(&vector_candidates);

    let kw_map: HashMap<&str, f64> = norm_keyword
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();
    let vec_map: HashMap<&str, f64> = norm_vector
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();

    // Merge all unique chunk candidates
    let mut all_chunks: HashMap<String, &ChunkCandidate> = HashMap::new();
    for c in &keyword_candidates {
        all_chunks.entry(c.chunk_id.clone()).or_insert(c);
    }
    for c in &vector_candidates {
        all_chunks.entry(c.chunk_id.clone()).or_insert(c);
    }

    let effective_alpha = match req.mode {
        SearchMode::Keyword => 0.0,
        SearchMode::Semantic => 1.0,
        SearchMode::Hybrid => config.retrieval.hybrid_alpha,
    };

    struct ScoredChunk<'a> {
        document_id: &'a str,
        hybrid_score: f64,
        snippet: &'a str,
        section: Option<&'a str>,
    }

    let scored_chunks: Vec<ScoredChunk> = all_chunks
        .iter()
        .map(|(chunk_id, cand)| {
            let k = kw_map.get(chunk_id.as_str()).copied().unwrap_or(0.0);
            let v = vec_map.get(chunk_id.as_str()).copied().unwrap_or(0.0);
            ScoredChunk {
                document_id: &cand.document_id,
                hybrid_score: (1.0 - effective_alpha) * k + effective_alpha * v,
                snippet: &cand.snippet,
                section: cand.section.as_deref(),
            }
        })
        .collect();

    // Group by document using MAX aggregation
    struct DocResult<'a> {
        doc_score: f64,
        best_snippet: &'a str,
        best_section: Option<&'a str>,
    }

    let mut doc_map: HashMap<&str, DocResult> = HashMap::new();

    for sc in &scored_chunks {
        let entry = doc_map.entry(sc.document_id).or_insert_with(|| DocResult {
            doc_score: sc.hybrid_score,
            best_snippet: sc.snippet,
            best_section: sc.section,
        });
        if sc.hybrid_score > entry.doc_score {
            entry.doc_score = sc.hybrid_score;
            entry.best_snippet = sc.snippet;
            entry.best_section = sc.section;
        }
    }

    // Fetch document metadata and apply filters
    let since_ts = match req.since {
        Some(ref since_str) => {
            let since_date = NaiveDate::parse_from_str(since_str, "%Y-%m-%d")?;
            Some(
                since_date
                    .and_hms_opt(0, 0, 0)
                    .unwrap_or_default()
                    .and_utc()
                    .timestamp(),
            )
        }
        None => None,
    };

    let mut results: Vec<SearchResult> = Vec::new();

    for (doc_id, doc_result) in &doc_map {
        let doc_row = sqlx::query(
            "SELECT id, title, source, source_id, updated_at, source_url FROM documents WHERE id = ?",
        )
        .bind(doc_id)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = doc_row {
            let source: String = row.get("source");
            let updated_at: i64 = row.get("updated_at");

            if let Some(ref src) = req.source {
                if &source != src {
                    continue;
                }
            }
            if let Some(ts) = since_ts {
                if updated_at < ts {
                    continue;
                }
            }

            results.push(SearchResult {
                id: row.get("id"),
                title: row.get("title"),
                source,
                source_id: row.get("source_id"),
                updated_at,
                score: doc_result.doc_score,
                snippet: doc_result.best_snippet.to_string(),
                source_url: row.get("source_url"),
                section: doc_result.best_section.map(|s| s.to_string()),
            });
        }
    }

    // Sort: score desc, updated_at desc, id asc (deterministic)
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.updated_at.cmp(&a.updated_at))
            .then(a.id.cmp(&b.id))
    });

    results.truncate(final_limit.max(0) as usize);

    Ok(results)
}

pub async fn run_search(
    config: &Config,
    query: &str,
    mode: &str,
    source_filter: Option<String>,
    since: Option<String>,
    limit: Option<i64>,
) -> Result<()> {
    let req = SearchRequest {
        query: query.to_string(),
        mode: mode.parse()?,
        source: source_filter,
        since,
        limit,
    };

    let results = search_documents(config, &req).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let title_display = result.title.as_deref().unwrap_or("(untitled)");
        let date = chrono::DateTime::from_timestamp(result.updated_at, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.score,
            result.source,
            title_display
        );
        println!("    updated: {}", date);
        if let Some(ref section) = result.section {
            println!("    section: {}", section);
        }
        if let Some(ref url) = result.source_url {
            println!("    url: {}", url);
        }
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!("    id: {}", result.id);
        println!();
    }

    Ok(())
}

// ============ Candidate types ============

#[derive(Debug, Clone)]
struct ChunkCandidate {
    chunk_id: String,
    document_id: String,
    raw_score: f64,
    snippet: String,
    section: Option<String>,
}

// ============ Keyword search ============

async fn fetch_keyword_candidates(
    pool: &SqlitePool,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let rows = sqlx::query(
        r#"
        SELECT f.chunk_id, f.document_id, f.rank, c.section,
               snippet(chunks_fts, 2, '>>>', '<<<', '...', 48) AS snippet
        FROM chunks_fts f
        JOIN chunks c ON c.id = f.chunk_id
        WHERE chunks_fts MATCH ?
        ORDER BY f.rank
        LIMIT ?
        "#,
    )
    .bind(query)
    .bind(candidate_k)
    .fetch_all(pool)
    .await?;

    let candidates: Vec<ChunkCandidate> = rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                raw_score: -rank, // negate so higher = better
                snippet: row.get("snippet"),
                section: row.get("section"),
            }
        })
        .collect();

    Ok(candidates)
}

// ============ Vector search ============

async fn fetch_vector_candidates(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), &config.embedding, query).await?;

    // Fetch all vectors and compute cosine similarity in Rust
    let rows = sqlx::query(
        r#"
        SELECT cv.chunk_id, cv.document_id, cv.embedding, c.section,
               COALESCE(substr(c.text, 1, 240), '') AS snippet
        FROM chunk_vectors cv
        JOIN chunks c ON c.id = cv.chunk_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<ChunkCandidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            let similarity = embedding::cosine_similarity(&query_vec, &vec) as f64;
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                raw_score: similarity,
                snippet: row.get("snippet"),
                section: row.get("section"),
            }
        })
        .collect();

    // Sort by similarity desc and take top K
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(candidate_k as usize);

    Ok(candidates)
}

// ============ Score normalization ============

/// Min-max normalize raw channel scores to [0, 1].
fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candidate(chunk_id: &str, doc_id: &str, score: f64) -> ChunkCandidate {
        ChunkCandidate {
            chunk_id: chunk_id.to_string(),
            document_id: doc_id.to_string(),
            raw_score: score,
            snippet: String::new(),
            section: None,
        }
    }

    #[test]
    fn normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn normalize_single_candidate_is_one() {
        let candidates = vec![make_candidate("c1", "d1", 5.0)];
        let result = normalize_scores(&candidates);
        assert_eq!(result.len(), 1);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_spreads_over_unit_range() {
        let candidates = vec![
            make_candidate("c1", "d1", 10.0),
            make_candidate("c2", "d2", 5.0),
            make_candidate("c3", "d3", 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_all_equal_yields_one() {
        let candidates = vec![
            make_candidate("c1", "d1", 3.0),
            make_candidate("c2", "d2", 3.0),
        ];
        for (_, score) in normalize_scores(&candidates) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn normalized_scores_stay_in_unit_interval() {
        let candidates = vec![
            make_candidate("c1", "d1", -5.0),
            make_candidate("c2", "d2", 100.0),
            make_candidate("c3", "d3", 42.0),
        ];
        for (_, score) in normalize_scores(&candidates) {
            assert!((0.0..=1.0).contains(&score), "score out of range: {}", score);
        }
    }

    #[test]
    fn search_mode_parses() {
        assert_eq!(SearchMode::from_str("keyword").unwrap(), SearchMode::Keyword);
        assert_eq!(
            SearchMode::from_str("semantic").unwrap(),
            SearchMode::Semantic
        );
        assert_eq!(SearchMode::from_str("hybrid").unwrap(), SearchMode::Hybrid);
        assert!(SearchMode::from_str("fuzzy").is_err());
    }

    #[test]
    fn hybrid_alpha_extremes_follow_single_channel() {
        let kw = vec![
            make_candidate("c1", "d1", 10.0),
            make_candidate("c2", "d2", 5.0),
            make_candidate("c3", "d3", 1.0),
        ];
        let vec_cands = vec![
            make_candidate("c1", "d1", 0.1),
            make_candidate("c2", "d2", 0.9),
        ];

        let kw_map: HashMap<&str, f64> = normalize_scores(&kw)
            .iter()
            .map(|(c, s)| (c.chunk_id.as_str(), *s))
            .collect();
        let vec_map: HashMap<&str, f64> = normalize_scores(&vec_cands)
            .iter()
            .map(|(c, s)| (c.chunk_id.as_str(), *s))
            .collect();

        let order_for = |alpha: f64| {
            let mut scored: Vec<(&str, f64)> = kw
                .iter()
                .map(|c| {
                    let k = kw_map.get(c.chunk_id.as_str()).copied().unwrap_or(0.0);
                    let v = vec_map.get(c.chunk_id.as_str()).copied().unwrap_or(0.0);
                    (c.chunk_id.as_str(), (1.0 - alpha) * k + alpha * v)
                })
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
            scored.into_iter().map(|(id, _)| id).collect::<Vec<_>>()
        };

        // alpha=0 preserves keyword ordering
        assert_eq!(order_for(0.0), vec!["c1", "c2", "c3"]);
        // alpha=1 ranks the chunk with the best vector score first
        assert_eq!(order_for(1.0).first().copied(), Some("c2"));
    }
}
