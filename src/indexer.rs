//! The incremental indexing pipeline.
//!
//! Orchestrates discovery → change detection → parsing → chunking →
//! persistence → embedding against an open [`Store`]:
//!
//! 1. deleted paths are removed first (cascading chunks, vectors, edges),
//! 2. each added or modified file is re-parsed and its chunks replaced
//!    whole — old chunks are fully gone before new ones land,
//! 3. new chunks are embedded in batches and their vectors committed in a
//!    single transaction, so readers never observe partial vector state.
//!
//! Parse failures are file-local and non-fatal. Embedding failures abort
//! the embedding phase but leave the store consistent: chunks without
//! vectors stay reachable through FTS, AST, and path search.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::changes;
use crate::chunker::{self, DEFAULT_MAX_TOKENS};
use crate::discovery;
use crate::embedding::Embedder;
use crate::error::{CoreError, Result};
use crate::parser::SourceParser;
use crate::store::Store;

/// Options for one indexing run.
#[derive(Clone, Default)]
pub struct IndexOptions {
    /// Skip the embedding phase; chunks remain searchable via FTS/AST/path.
    pub skip_embedding: bool,
    /// Extra ignore patterns merged into discovery.
    pub extra_ignore: Vec<String>,
    /// Checked between files; cancelling aborts cleanly with no
    /// partial-file writes.
    pub cancel: CancellationToken,
}

/// Outcome of an indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub files_discovered: usize,
    pub files_added: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub files_unchanged: usize,
    pub chunks_created: usize,
    pub vectors_created: usize,
    pub duration_ms: u64,
    pub by_language: HashMap<String, usize>,
}

struct EmbedJob {
    chunk_id: i64,
    text: String,
}

/// Run the pipeline against an open store.
///
/// The caller owns store acquisition (and the dimension/embedder gates that
/// happen there); `embedder` is `None` only when embedding is skipped.
pub async fn run(
    root: &std::path::Path,
    store: &Store,
    embedder: Option<&dyn Embedder>,
    options: &IndexOptions,
) -> Result<IndexStats> {
    let started = Instant::now();
    let mut stats = IndexStats::default();

    let discovered = discovery::discover(root, &options.extra_ignore, true)?;
    stats.files_discovered = discovered.len();
    for file in &discovered {
        *stats.by_language.entry(file.language.clone()).or_insert(0) += 1;
    }

    let changeset = changes::compute_changes(&discovered, store).await?;
    stats.files_added = changeset.added.len();
    stats.files_modified = changeset.modified.len();
    stats.files_deleted = changeset.deleted.len();
    stats.files_unchanged = changeset.unchanged.len();
    info!(
        added = stats.files_added,
        modified = stats.files_modified,
        deleted = stats.files_deleted,
        unchanged = stats.files_unchanged,
        "change detection complete"
    );

    for path in &changeset.deleted {
        check_cancelled(&options.cancel)?;
        store.delete_file(path).await?;
    }

    let by_path: HashMap<&str, &discovery::DiscoveredFile> = discovered
        .iter()
        .map(|f| (f.rel_path.as_str(), f))
        .collect();

    let mut parser = SourceParser::new();
    let mut embed_jobs: Vec<EmbedJob> = Vec::new();

    let mut to_index: Vec<&String> = changeset.added.iter().chain(&changeset.modified).collect();
    to_index.sort();

    for rel_path in to_index {
        check_cancelled(&options.cancel)?;
        let Some(file) = by_path.get(rel_path.as_str()) else {
            continue;
        };
        let Some(hash) = changeset.hashes.get(rel_path) else {
            continue;
        };

        if let Some(existing) = store.get_file(rel_path).await? {
            store.delete_chunks_by_file(existing.id).await?;
        }

        let nodes = parser.parse_file(&file.abs_path, &file.language);
        if nodes.is_empty() {
            debug!("no declarations parsed from {}", rel_path);
        }
        let chunks = chunker::chunk_nodes(&nodes, rel_path, DEFAULT_MAX_TOKENS);

        let file_id = store
            .upsert_file(rel_path, &file.language, hash, file.size as i64)
            .await?;
        if chunks.is_empty() {
            continue;
        }
        let chunk_ids = store.insert_chunks(file_id, &chunks).await?;
        stats.chunks_created += chunk_ids.len();

        for (chunk, chunk_id) in chunks.iter().zip(&chunk_ids) {
            embed_jobs.push(EmbedJob {
                chunk_id: *chunk_id,
                text: embedding_text(rel_path, chunk.parent.as_deref(), &chunk.text),
            });
        }
    }

    if !options.skip_embedding && !embed_jobs.is_empty() {
        check_cancelled(&options.cancel)?;
        let embedder = embedder.ok_or_else(|| {
            CoreError::EmbedderFailed("no embedder available for indexing".to_string())
        })?;

        let texts: Vec<String> = embed_jobs.iter().map(|job| job.text.clone()).collect();
        let report = |done: usize, total: usize| {
            eprintln!("embedding {} / {} chunks", done, total);
        };
        let vectors = embedder.embed(&texts, Some(&report)).await?;
        if vectors.len() != embed_jobs.len() {
            return Err(CoreError::EmbedderFailed(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                embed_jobs.len()
            )));
        }

        let rows: Vec<(i64, Vec<f32>)> = embed_jobs
            .iter()
            .zip(vectors)
            .map(|(job, vector)| (job.chunk_id, vector))
            .collect();
        store.insert_vectors(&rows).await?;
        stats.vectors_created = rows.len();
    } else if options.skip_embedding && !embed_jobs.is_empty() {
        warn!(
            chunks = embed_jobs.len(),
            "embedding skipped; new chunks searchable via fts/ast/path only"
        );
    }

    stats.duration_ms = started.elapsed().as_millis() as u64;
    Ok(stats)
}

/// Text an embedder sees for one chunk: relative path, enclosing scope when
/// present, then the chunk body.
fn embedding_text(rel_path: &str, parent: Option<&str>, text: &str) -> String {
    match parent {
        Some(parent) => format!("{}\n{}\n{}", rel_path, parent, text),
        None => format!("{}\n{}", rel_path, text),
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    Ok(())
}
