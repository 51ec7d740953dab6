//! Harvest pipeline orchestration.
//!
//! Coordinates the full flow: connector → extraction → chunking → embedding
//! → storage. Supports incremental harvests via checkpoints and inline
//! embedding (non-fatal on failure).

use anyhow::{bail, Result};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::connector_fs;
use crate::connector_http;
use crate::db;
use crate::embed_cmd;
use crate::models::SourceItem;

pub async fn run_harvest(
    config: &Config,
    connector: &str,
    full: bool,
    dry_run: bool,
    since: Option<String>,
    until: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let pool = db::connect(config).await?;

    // Load checkpoint
    let checkpoint: Option<i64> = if full {
        None
    } else {
        get_checkpoint(&pool, connector).await?
    };

    // Scan the appropriate connector
    let (mut items, skipped) = match connector {
        "filesystem" => connector_fs::scan_filesystem(config)?,
        "http" => connector_http::scan_http(config).await?,
        _ => bail!(
            "Unknown connector: '{}'. Available: filesystem, http",
            connector
        ),
    };

    // Filter by checkpoint (skip items not modified since checkpoint)
    if let Some(cp) = checkpoint {
        items.retain(|item| item.updated_at.timestamp() > cp);
    }

    // Apply --since filter
    if let Some(ref since_str) = since {
        let since_date = NaiveDate::parse_from_str(since_str, "%Y-%m-%d")?;
        let since_ts = since_date
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc()
            .timestamp();
        items.retain(|item| item.updated_at.timestamp() >= since_ts);
    }

    // Apply --until filter
    if let Some(ref until_str) = until {
        let until_date = NaiveDate::parse_from_str(until_str, "%Y-%m-%d")?;
        let until_ts = until_date
            .and_hms_opt(23, 59, 59)
            .unwrap_or_default()
            .and_utc()
            .timestamp();
        items.retain(|item| item.updated_at.timestamp() <= until_ts);
    }

    // Apply --limit
    if let Some(lim) = limit {
        items.truncate(lim);
    }

    if dry_run {
        println!("harvest {} (dry-run)", connector);
        println!("  items found: {}", items.len());
        let total_chunks: usize = items
            .iter()
            .map(|item| {
                let profile = config.chunking.profile_for(&item.content_type);
                chunk_document("tmp", &item.body, &profile).len()
            })
            .sum();
        println!("  estimated chunks: {}", total_chunks);
        return Ok(());
    }

    let mut docs_upserted = 0u64;
    let mut chunks_written = 0u64;
    let mut embeddings_written = 0u64;
    let mut embeddings_pending = 0u64;
    let mut max_updated: i64 = checkpoint.unwrap_or(0);

    for item in &items {
        let doc_id = upsert_document(&pool, item).await?;
        let profile = config.chunking.profile_for(&item.content_type);
        let chunks = chunk_document(&doc_id, &item.body, &profile);
        let chunk_count = chunks.len() as u64;
        replace_chunks(&pool, &doc_id, &chunks).await?;

        // Inline embedding (non-fatal)
        let (emb_ok, emb_pending) = embed_cmd::embed_chunks_inline(config, &pool, &chunks).await;
        embeddings_written += emb_ok;
        embeddings_pending += emb_pending;

        docs_upserted += 1;
        chunks_written += chunk_count;

        let ts = item.updated_at.timestamp();
        if ts > max_updated {
            max_updated = ts;
        }
    }

    // Update checkpoint
    set_checkpoint(&pool, connector, max_updated).await?;

    println!("harvest {}", connector);
    println!("  fetched: {} items", items.len());
    println!("  upserted documents: {}", docs_upserted);
    println!("  chunks written: {}", chunks_written);
    if skipped > 0 {
        println!("  extraction skipped: {}", skipped);
    }
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", embeddings_written);
        println!("  embeddings pending: {}", embeddings_pending);
    }
    println!("  checkpoint: {}", max_updated);
    println!("ok");

    pool.close().await;
    Ok(())
}

async fn upsert_document(pool: &SqlitePool, item: &SourceItem) -> Result<String> {
    // Stored bodies are LF-normalized so chunk line references stay valid.
    let body = item.body.replace("\r\n", "\n");

    // Compute dedup hash
    let mut hasher = Sha256::new();
    hasher.update(item.source.as_bytes());
    hasher.update(item.source_id.as_bytes());
    hasher.update(item.updated_at.timestamp().to_le_bytes());
    hasher.update(body.as_bytes());
    let dedup_hash = format!("{:x}", hasher.finalize());

    // Check if document exists
    let existing_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM documents WHERE source = ? AND source_id = ?")
            .bind(&item.source)
            .bind(&item.source_id)
            .fetch_optional(pool)
            .await?;

    let doc_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    sqlx::query(
        r#"
        INSERT INTO documents (id, source, source_id, source_url, title, author, created_at, updated_at, content_type, body, metadata_json, dedup_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source, source_id) DO UPDATE SET
            source_url = excluded.source_url,
            title = excluded.title,
            author = excluded.author,
            updated_at = excluded.updated_at,
            content_type = excluded.content_type,
            body = excluded.body,
            metadata_json = excluded.metadata_json,
            dedup_hash = excluded.dedup_hash
        "#,
    )
    .bind(&doc_id)
    .bind(&item.source)
    .bind(&item.source_id)
    .bind(&item.source_url)
    .bind(&item.title)
    .bind(&item.author)
    .bind(item.created_at.timestamp())
    .bind(item.updated_at.timestamp())
    .bind(&item.content_type)
    .bind(&body)
    .bind(&item.metadata_json)
    .bind(&dedup_hash)
    .execute(pool)
    .await?;

    Ok(doc_id)
}

async fn replace_chunks(
    pool: &SqlitePool,
    document_id: &str,
    chunks: &[crate::models::Chunk],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    // Delete old embeddings for this document's chunks
    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *tx)
    .await?;

    // Delete old FTS entries for this document's chunks
    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    // Delete old chunks
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    // Insert new chunks + FTS entries
    for chunk in chunks {
        let tags_json = serde_json::to_string(&chunk.tags)?;
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, chunk_index, text, hash, start_line, end_line, section, tags_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(chunk.start_line)
        .bind(chunk.end_line)
        .bind(&chunk.section)
        .bind(&tags_json)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn get_checkpoint(pool: &SqlitePool, source: &str) -> Result<Option<i64>> {
    let result: Option<String> =
        sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
            .bind(source)
            .fetch_optional(pool)
            .await?;

    Ok(result.and_then(|s| s.parse::<i64>().ok()))
}

async fn set_checkpoint(pool: &SqlitePool, source: &str, cursor_val: i64) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(source)
    .bind(cursor_val.to_string())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
