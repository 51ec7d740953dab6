//! Store integrity checks.
//!
//! `harv qa` re-derives the invariants the pipeline is supposed to maintain
//! and reports anything that drifted: chunk index gaps, stale hashes, line
//! references outside the stored body, split code fences, FTS index
//! mismatches, and orphaned rows. Exits non-zero when violations are found
//! so it can gate automation.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

pub async fn run_qa(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let mut violations = 0u64;

    violations += check_chunk_indices(&pool).await?;
    violations += check_chunk_hashes(&pool).await?;
    violations += check_line_bounds(&pool).await?;
    violations += check_fence_integrity(&pool).await?;
    violations += check_fts_parity(&pool).await?;
    violations += check_orphans(&pool).await?;

    let stale = count_stale_embeddings(&pool).await?;

    pool.close().await;

    println!("qa");
    println!("  violations: {}", violations);
    if stale > 0 {
        println!("  stale embeddings: {} (run `harv embed pending`)", stale);
    }

    if violations > 0 {
        bail!("qa found {} violation(s)", violations);
    }

    println!("ok");
    Ok(())
}

/// Chunk indices must be contiguous from 0 within each document.
async fn check_chunk_indices(pool: &SqlitePool) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        SELECT document_id, COUNT(*) AS n, MIN(chunk_index) AS min_idx, MAX(chunk_index) AS max_idx
        FROM chunks
        GROUP BY document_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut violations = 0u64;
    for row in &rows {
        let doc_id: String = row.get("document_id");
        let n: i64 = row.get("n");
        let min_idx: i64 = row.get("min_idx");
        let max_idx: i64 = row.get("max_idx");
        if min_idx != 0 || max_idx != n - 1 {
            println!(
                "  VIOLATION chunk indices not contiguous: document {} ({} chunks, index range {}..={})",
                doc_id, n, min_idx, max_idx
            );
            violations += 1;
        }
    }
    Ok(violations)
}

/// Stored chunk hashes must match the chunk text.
async fn check_chunk_hashes(pool: &SqlitePool) -> Result<u64> {
    let rows = sqlx::query("SELECT id, text, hash FROM chunks")
        .fetch_all(pool)
        .await?;

    let mut violations = 0u64;
    for row in &rows {
        let id: String = row.get("id");
        let text: String = row.get("text");
        let hash: String = row.get("hash");

        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let expected = format!("{:x}", hasher.finalize());

        if hash != expected {
            println!("  VIOLATION chunk hash mismatch: chunk {}", id);
            violations += 1;
        }
    }
    Ok(violations)
}

/// Line references must be 1-based, ordered, and inside the document body.
async fn check_line_bounds(pool: &SqlitePool) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        SELECT c.id, c.start_line, c.end_line, d.body
        FROM chunks c
        JOIN documents d ON d.id = c.document_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut violations = 0u64;
    for row in &rows {
        let id: String = row.get("id");
        let start_line: i64 = row.get("start_line");
        let end_line: i64 = row.get("end_line");
        let body: String = row.get("body");
        let line_count = body.lines().count().max(1) as i64;

        if start_line < 1 || end_line < start_line || end_line > line_count {
            println!(
                "  VIOLATION line refs out of bounds: chunk {} ({}..{} of {} lines)",
                id, start_line, end_line, line_count
            );
            violations += 1;
        }
    }
    Ok(violations)
}

/// Every chunk must contain an even number of fence delimiter lines, i.e.
/// no fenced code block was split across a chunk boundary.
async fn check_fence_integrity(pool: &SqlitePool) -> Result<u64> {
    let rows = sqlx::query("SELECT id, text FROM chunks")
        .fetch_all(pool)
        .await?;

    let mut violations = 0u64;
    for row in &rows {
        let id: String = row.get("id");
        let text: String = row.get("text");
        let delimiters = text
            .lines()
            .filter(|l| {
                let t = l.trim_start();
                t.starts_with("```") || t.starts_with("~~~")
            })
            .count();
        if delimiters % 2 != 0 {
            println!("  VIOLATION fence split across chunks: chunk {}", id);
            violations += 1;
        }
    }
    Ok(violations)
}

/// The FTS index must mirror the chunks table exactly.
async fn check_fts_parity(pool: &SqlitePool) -> Result<u64> {
    let mut violations = 0u64;

    let missing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM chunks c WHERE NOT EXISTS (SELECT 1 FROM chunks_fts f WHERE f.chunk_id = c.id)",
    )
    .fetch_one(pool)
    .await?;
    if missing > 0 {
        println!("  VIOLATION chunks missing from FTS index: {}", missing);
        violations += 1;
    }

    let extra: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM chunks_fts f WHERE NOT EXISTS (SELECT 1 FROM chunks c WHERE c.id = f.chunk_id)",
    )
    .fetch_one(pool)
    .await?;
    if extra > 0 {
        println!("  VIOLATION stale FTS rows without chunks: {}", extra);
        violations += 1;
    }

    Ok(violations)
}

/// Chunks must reference existing documents; vectors must reference
/// existing chunks.
async fn check_orphans(pool: &SqlitePool) -> Result<u64> {
    let mut violations = 0u64;

    let orphan_chunks: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM chunks c WHERE NOT EXISTS (SELECT 1 FROM documents d WHERE d.id = c.document_id)",
    )
    .fetch_one(pool)
    .await?;
    if orphan_chunks > 0 {
        println!("  VIOLATION orphan chunks: {}", orphan_chunks);
        violations += 1;
    }

    let orphan_vectors: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM chunk_vectors v WHERE NOT EXISTS (SELECT 1 FROM chunks c WHERE c.id = v.chunk_id)",
    )
    .fetch_one(pool)
    .await?;
    if orphan_vectors > 0 {
        println!("  VIOLATION orphan chunk vectors: {}", orphan_vectors);
        violations += 1;
    }

    Ok(violations)
}

/// Embeddings whose stored hash no longer matches the chunk text. Reported
/// but not counted as a violation; `embed pending` repairs them.
async fn count_stale_embeddings(pool: &SqlitePool) -> Result<i64> {
    let stale: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM embeddings e JOIN chunks c ON c.id = e.chunk_id WHERE e.hash != c.hash",
    )
    .fetch_one(pool)
    .await?;
    Ok(stale)
}
