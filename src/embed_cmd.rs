use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding;

/// Find and embed chunks that are missing or have stale embeddings.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let model_name = provider.model_name().to_string();
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let pending = find_pending_chunks(&pool, &model_name, limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all chunks up to date");
        pool.close().await;
        return Ok(());
    }

    let total = pending.len();
    let (embedded, failed) = embed_batches(config, &pool, provider.as_ref(), &pending, batch_size).await?;

    println!("embed pending");
    println!("  total pending: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Delete all embeddings and regenerate for all chunks.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let model_name = provider.model_name().to_string();
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    sqlx::query("DELETE FROM chunk_vectors")
        .execute(&pool)
        .await?;
    sqlx::query("DELETE FROM embeddings").execute(&pool).await?;

    println!("embed rebuild: cleared existing embeddings");

    let all_chunks = find_pending_chunks(&pool, &model_name, None).await?;

    if all_chunks.is_empty() {
        println!("  no chunks to embed");
        pool.close().await;
        return Ok(());
    }

    let total = all_chunks.len();
    let (embedded, failed) =
        embed_batches(config, &pool, provider.as_ref(), &all_chunks, batch_size).await?;

    println!("embed rebuild");
    println!("  total chunks: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

async fn embed_batches(
    config: &Config,
    pool: &SqlitePool,
    provider: &dyn embedding::EmbeddingProvider,
    pending: &[PendingChunk],
    batch_size: usize,
) -> Result<(u64, u64)> {
    let model_name = provider.model_name().to_string();
    let mut embedded = 0u64;
    let mut failed = 0u64;

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        match embedding::embed_texts(provider, &config.embedding, &texts).await {
            Ok(vectors) => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    let blob = embedding::vec_to_blob(vec);
                    upsert_embedding(
                        pool,
                        &item.chunk_id,
                        &item.document_id,
                        &model_name,
                        provider.dims(),
                        &item.hash,
                        &blob,
                    )
                    .await?;
                    embedded += 1;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding batch failed");
                failed += batch.len() as u64;
            }
        }
    }

    Ok((embedded, failed))
}

/// Embed chunks during harvest (inline). Non-fatal on failure.
pub async fn embed_chunks_inline(
    config: &Config,
    pool: &SqlitePool,
    chunks: &[crate::models::Chunk],
) -> (u64, u64) {
    if !config.embedding.is_enabled() {
        return (0, 0);
    }

    let provider = match embedding::create_provider(&config.embedding) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "could not create embedding provider");
            return (0, chunks.len() as u64);
        }
    };

    let model_name = provider.model_name().to_string();
    let mut embedded = 0u64;
    let mut pending = 0u64;

    for batch in chunks.chunks(config.embedding.batch_size.max(1)) {
        // Check which chunks need embedding
        let mut need_embedding = Vec::new();
        for chunk in batch {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT hash FROM embeddings WHERE chunk_id = ? AND model = ?")
                    .bind(&chunk.id)
                    .bind(&model_name)
                    .fetch_optional(pool)
                    .await
                    .unwrap_or(None);

            if existing.as_deref() == Some(chunk.hash.as_str()) {
                // Already up to date
                embedded += 1;
                continue;
            }

            need_embedding.push(chunk);
        }

        if need_embedding.is_empty() {
            continue;
        }

        let texts: Vec<String> = need_embedding.iter().map(|c| c.text.clone()).collect();

        match embedding::embed_texts(provider.as_ref(), &config.embedding, &texts).await {
            Ok(vectors) => {
                for (chunk, vec) in need_embedding.iter().zip(vectors.iter()) {
                    let blob = embedding::vec_to_blob(vec);
                    if let Err(e) = upsert_embedding(
                        pool,
                        &chunk.id,
                        &chunk.document_id,
                        &model_name,
                        provider.dims(),
                        &chunk.hash,
                        &blob,
                    )
                    .await
                    {
                        tracing::warn!(chunk_id = %chunk.id, error = %e, "failed to store embedding");
                        pending += 1;
                    } else {
                        embedded += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding batch failed");
                pending += need_embedding.len() as u64;
            }
        }
    }

    (embedded, pending)
}

struct PendingChunk {
    chunk_id: String,
    document_id: String,
    text: String,
    hash: String,
}

/// Chunks that either have no embedding for this model or whose stored hash
/// no longer matches the chunk text hash.
async fn find_pending_chunks(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingChunk>> {
    let limit_val = limit.map(|n| n as i64).unwrap_or(i64::MAX);

    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.document_id, c.text, c.hash
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?
        WHERE e.chunk_id IS NULL OR e.hash != c.hash
        ORDER BY c.document_id, c.chunk_index
        LIMIT ?
        "#,
    )
    .bind(model)
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    let results: Vec<PendingChunk> = rows
        .iter()
        .map(|row| PendingChunk {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            text: row.get("text"),
            hash: row.get("hash"),
        })
        .collect();

    Ok(results)
}

async fn upsert_embedding(
    pool: &SqlitePool,
    chunk_id: &str,
    document_id: &str,
    model: &str,
    dims: usize,
    text_hash: &str,
    blob: &[u8],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO embeddings (chunk_id, model, dims, hash, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            hash = excluded.hash,
            created_at = excluded.created_at
        "#,
    )
    .bind(chunk_id)
    .bind(model)
    .bind(dims as i64)
    .bind(text_hash)
    .bind(now)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
        VALUES (?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            document_id = excluded.document_id,
            embedding = excluded.embedding
        "#,
    )
    .bind(chunk_id)
    .bind(document_id)
    .bind(blob)
    .execute(pool)
    .await?;

    Ok(())
}
