//! Single-file embedded store binding metadata, full-text, vectors, and
//! dependency edges.
//!
//! One [`Store`] per project, backed by `.ctx/index.db`. Writes are
//! serialized through SQLite; multi-statement mutations (file delete, chunk
//! insert, vector batch insert) each run inside their own transaction so
//! readers never observe partial state. [`Store::begin`] is exposed for
//! callers composing larger atomic units.
//!
//! Opening a store enforces two gates before any write:
//!
//! - **Dimension safety** — the configured vector dimension must equal the
//!   stored one ([`CoreError::DimensionMismatch`] otherwise). Legacy indices
//!   without the meta row recover their dimension from the vec0 DDL.
//! - **Embedder identity** — the index remembers the `(provider, model,
//!   dimensions)` it was embedded with; reopening under a different embedder
//!   fails with [`CoreError::EmbedderMismatch`].

pub mod schema;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::db;
use crate::embedding::vec_to_blob;
use crate::error::{CoreError, Result};

/// Logical type of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Function,
    Class,
    Method,
    Type,
    Import,
    Constant,
    Config,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Function => "function",
            ChunkType::Class => "class",
            ChunkType::Method => "method",
            ChunkType::Type => "type",
            ChunkType::Import => "import",
            ChunkType::Constant => "constant",
            ChunkType::Config => "config",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(ChunkType::Function),
            "class" => Some(ChunkType::Class),
            "method" => Some(ChunkType::Method),
            "type" => Some(ChunkType::Type),
            "import" => Some(ChunkType::Import),
            "constant" => Some(ChunkType::Constant),
            "config" => Some(ChunkType::Config),
            _ => None,
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file row.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub language: String,
    pub hash: String,
    pub size: i64,
    pub last_indexed: i64,
}

/// Input for inserting a chunk under a file.
#[derive(Debug, Clone)]
pub struct ChunkInput {
    /// Stable content-addressed id: `sha256("path:ls:le")[..16]`.
    pub stable_id: String,
    /// `sha256(text)[..16]`.
    pub content_hash: String,
    pub chunk_type: ChunkType,
    pub name: Option<String>,
    pub parent: Option<String>,
    pub line_start: i64,
    pub line_end: i64,
    pub text: String,
    pub imports: Vec<String>,
    pub exported: bool,
}

/// A chunk row joined with its owning file's path and language.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: i64,
    pub file_id: i64,
    pub stable_id: String,
    pub content_hash: String,
    pub chunk_type: ChunkType,
    pub name: Option<String>,
    pub parent: Option<String>,
    pub line_start: i64,
    pub line_end: i64,
    pub text: String,
    pub imports: Vec<String>,
    pub exported: bool,
    pub file_path: String,
    pub language: String,
}

/// How `search_chunks` matches the `name` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMode {
    Exact,
    Prefix,
    Contains,
}

/// Structured chunk lookup over metadata rather than content.
#[derive(Debug, Clone, Default)]
pub struct ChunkQuery {
    pub name: Option<String>,
    pub name_mode: Option<NameMode>,
    pub chunk_type: Option<ChunkType>,
    pub parent: Option<String>,
    pub language: Option<String>,
}

/// The `(provider, model, dimensions)` tuple an index was embedded with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedderIdentity {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
}

impl fmt::Display for EmbedderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({} dims)", self.provider, self.model, self.dimensions)
    }
}

/// Aggregate counts reported by `ctx status`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub files: i64,
    pub chunks: i64,
    pub vectors: i64,
    pub by_language: Vec<(String, i64)>,
    pub last_indexed: Option<i64>,
}

/// Handle to the project's index database.
pub struct Store {
    pool: SqlitePool,
    dimensions: usize,
}

const META_INDEX_EMBEDDER: &str = "index_embedder";

impl Store {
    /// Open the store, creating the schema when absent.
    ///
    /// `dims` is required for a fresh store; for an existing one it must
    /// match the stored dimension (or be `None` to adopt it). When
    /// `embedder` is supplied the index-embedder gate is enforced, and the
    /// identity is recorded on a fresh, empty store.
    pub async fn open(
        db_path: &Path,
        dims: Option<usize>,
        embedder: Option<&EmbedderIdentity>,
    ) -> Result<Store> {
        let pool = db::connect(db_path, true).await?;

        let stored = match schema::stored_dimensions(&pool).await {
            Ok(stored) => stored,
            Err(err) => {
                pool.close().await;
                return Err(err);
            }
        };
        let dimensions = match (stored, dims) {
            (Some(s), Some(d)) if s != d => {
                pool.close().await;
                return Err(CoreError::DimensionMismatch {
                    stored: s,
                    requested: d,
                });
            }
            (Some(s), _) => s,
            (None, Some(d)) => d,
            (None, None) => {
                pool.close().await;
                return Err(CoreError::ConfigInvalid(
                    "vector dimensions required to create a new index".to_string(),
                ));
            }
        };

        if let Err(err) = schema::create_schema(&pool, dimensions).await {
            pool.close().await;
            return Err(err);
        }

        let store = Store { pool, dimensions };

        if let Some(identity) = embedder {
            if let Err(err) = store.enforce_embedder_gate(identity).await {
                store.close().await;
                return Err(err);
            }
        }

        Ok(store)
    }

    async fn enforce_embedder_gate(&self, identity: &EmbedderIdentity) -> Result<()> {
        if identity.dimensions != self.dimensions {
            return Err(CoreError::DimensionMismatch {
                stored: self.dimensions,
                requested: identity.dimensions,
            });
        }
        match self.index_embedder().await? {
            Some(stored_identity) => {
                if &stored_identity != identity {
                    return Err(CoreError::EmbedderMismatch {
                        stored: stored_identity.to_string(),
                        requested: identity.to_string(),
                    });
                }
            }
            None => {
                // A fresh, empty index adopts the configured embedder.
                if self.count_files().await? == 0 {
                    self.set_index_embedder(identity).await?;
                }
            }
        }
        Ok(())
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub async fn schema_version(&self) -> Result<i64> {
        let value = schema::meta_get(&self.pool, "schema_version")
            .await?
            .unwrap_or_default();
        value
            .parse()
            .map_err(|_| CoreError::DbCorrupted(format!("invalid schema_version: {}", value)))
    }

    /// Embedder identity the index was built with, if recorded.
    pub async fn index_embedder(&self) -> Result<Option<EmbedderIdentity>> {
        match schema::meta_get(&self.pool, META_INDEX_EMBEDDER).await? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CoreError::DbCorrupted(format!("invalid index_embedder meta: {}", e))),
            None => Ok(None),
        }
    }

    pub async fn set_index_embedder(&self, identity: &EmbedderIdentity) -> Result<()> {
        let json = serde_json::to_string(identity)
            .map_err(|e| CoreError::DbCorrupted(e.to_string()))?;
        schema::meta_set(&self.pool, META_INDEX_EMBEDDER, &json).await
    }

    /// Begin a transaction for callers composing multi-operation units.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // ---- files ----

    /// Insert or update a file row; the returned id is stable across updates.
    pub async fn upsert_file(
        &self,
        path: &str,
        language: &str,
        hash: &str,
        size: i64,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO files (path, language, hash, size, last_indexed)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                language = excluded.language,
                hash = excluded.hash,
                size = excluded.size,
                last_indexed = excluded.last_indexed
            RETURNING id
            "#,
        )
        .bind(path)
        .bind(language)
        .bind(hash)
        .bind(size)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT id, path, language, hash, size, last_indexed FROM files WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_file))
    }

    pub async fn all_files(&self) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            "SELECT id, path, language, hash, size, last_indexed FROM files ORDER BY path",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_file).collect())
    }

    pub async fn all_file_paths(&self) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT path FROM files ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Subset of `hashes` whose `(path, hash)` pair is already stored.
    pub async fn get_files_by_hash(&self, hashes: &HashMap<String, String>) -> Result<Vec<String>> {
        let mut matched = Vec::new();
        for file in self.all_files().await? {
            if hashes.get(&file.path) == Some(&file.hash) {
                matched.push(file.path);
            }
        }
        matched.sort();
        Ok(matched)
    }

    /// Delete a file and everything hanging off it: chunks, vectors, FTS
    /// entries, and dependency edges.
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let Some(file) = self.get_file(path).await? else {
            return Ok(());
        };

        let mut tx = self.pool.begin().await?;
        let chunk_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM chunks WHERE file_id = ?")
            .bind(file.id)
            .fetch_all(&mut *tx)
            .await?;

        delete_vectors_tx(&mut tx, &chunk_ids).await?;

        // FTS rows go via the delete trigger, dependency edges via FK cascade.
        sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(file.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(path, chunks = chunk_ids.len(), "deleted file from index");
        Ok(())
    }

    // ---- chunks ----

    /// Insert chunks for a file atomically, returning row ids in input order.
    pub async fn insert_chunks(&self, file_id: i64, chunks: &[ChunkInput]) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let imports = serde_json::to_string(&chunk.imports)
                .map_err(|e| CoreError::DbCorrupted(e.to_string()))?;
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO chunks
                    (file_id, stable_id, content_hash, chunk_type, name, parent,
                     line_start, line_end, text, imports, exported)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(file_id)
            .bind(&chunk.stable_id)
            .bind(&chunk.content_hash)
            .bind(chunk.chunk_type.as_str())
            .bind(&chunk.name)
            .bind(&chunk.parent)
            .bind(chunk.line_start)
            .bind(chunk.line_end)
            .bind(&chunk.text)
            .bind(imports)
            .bind(chunk.exported as i64)
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id);
        }
        tx.commit().await?;
        Ok(ids)
    }

    pub async fn get_chunks_by_file(&self, file_id: i64) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE c.file_id = ? ORDER BY c.line_start",
            CHUNK_SELECT
        ))
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_chunk).collect()
    }

    pub async fn get_chunks_by_ids(&self, ids: &[i64]) -> Result<Vec<ChunkRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(ids.len());
        for batch in ids.chunks(500) {
            let sql = format!(
                "{} WHERE c.id IN ({})",
                CHUNK_SELECT,
                placeholders(batch.len())
            );
            let mut query = sqlx::query(&sql);
            for id in batch {
                query = query.bind(id);
            }
            let rows = query.fetch_all(&self.pool).await?;
            for row in rows {
                out.push(row_to_chunk(row)?);
            }
        }
        Ok(out)
    }

    /// All chunks of the given file paths, ordered by path then line, capped
    /// at `limit`.
    pub async fn get_chunks_by_paths(
        &self,
        paths: &[String],
        limit: usize,
    ) -> Result<Vec<ChunkRecord>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "{} WHERE f.path IN ({}) ORDER BY f.path, c.line_start LIMIT ?",
            CHUNK_SELECT,
            placeholders(paths.len())
        );
        let mut query = sqlx::query(&sql);
        for path in paths {
            query = query.bind(path);
        }
        query = query.bind(limit as i64);
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_chunk).collect()
    }

    /// Remove a file's chunks (and their vectors, FTS rows, dependency
    /// edges), leaving the file row in place.
    pub async fn delete_chunks_by_file(&self, file_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let chunk_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM chunks WHERE file_id = ?")
            .bind(file_id)
            .fetch_all(&mut *tx)
            .await?;
        delete_vectors_tx(&mut tx, &chunk_ids).await?;
        sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Structured metadata lookup (the AST strategy's backend).
    pub async fn search_chunks(&self, query: &ChunkQuery, limit: usize) -> Result<Vec<ChunkRecord>> {
        let mut sql = format!("{} WHERE 1 = 1", CHUNK_SELECT);
        let mut binds: Vec<String> = Vec::new();

        if let Some(name) = &query.name {
            match query.name_mode.unwrap_or(NameMode::Exact) {
                NameMode::Exact => {
                    sql.push_str(" AND c.name = ?");
                    binds.push(name.clone());
                }
                NameMode::Prefix => {
                    sql.push_str(" AND c.name LIKE ? ESCAPE '\\'");
                    binds.push(format!("{}%", escape_like(name)));
                }
                NameMode::Contains => {
                    sql.push_str(" AND c.name LIKE ? ESCAPE '\\'");
                    binds.push(format!("%{}%", escape_like(name)));
                }
            }
        }
        if let Some(chunk_type) = query.chunk_type {
            sql.push_str(" AND c.chunk_type = ?");
            binds.push(chunk_type.as_str().to_string());
        }
        if let Some(parent) = &query.parent {
            sql.push_str(" AND c.parent = ?");
            binds.push(parent.clone());
        }
        if let Some(language) = &query.language {
            sql.push_str(" AND f.language = ?");
            binds.push(language.clone());
        }
        sql.push_str(" ORDER BY c.name, f.path, c.line_start LIMIT ?");

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        q = q.bind(limit as i64);
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_chunk).collect()
    }

    // ---- vectors ----

    pub async fn insert_vector(&self, chunk_id: i64, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;
        sqlx::query("INSERT OR REPLACE INTO chunk_vectors (rowid, embedding) VALUES (?, ?)")
            .bind(chunk_id)
            .bind(vec_to_blob(vector))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert a batch of vectors in one transaction; readers never observe a
    /// partially embedded batch.
    pub async fn insert_vectors(&self, vectors: &[(i64, Vec<f32>)]) -> Result<()> {
        for (_, vector) in vectors {
            self.check_dimensions(vector)?;
        }
        let mut tx = self.pool.begin().await?;
        for (chunk_id, vector) in vectors {
            sqlx::query("INSERT OR REPLACE INTO chunk_vectors (rowid, embedding) VALUES (?, ?)")
                .bind(chunk_id)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_vectors(&self, chunk_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_vectors_tx(&mut tx, chunk_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    /// K-nearest-neighbor search; returns `(chunk_id, distance)` ascending.
    pub async fn knn_search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f64)>> {
        self.check_dimensions(query)?;
        let rows = sqlx::query(
            r#"
            SELECT rowid, distance
            FROM chunk_vectors
            WHERE embedding MATCH ? AND k = ?
            ORDER BY distance
            "#,
        )
        .bind(vec_to_blob(query))
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get::<i64, _>("rowid"), row.get::<f64, _>("distance")))
            .collect())
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(CoreError::DimensionMismatch {
                stored: self.dimensions,
                requested: vector.len(),
            });
        }
        Ok(())
    }

    // ---- full-text ----

    /// FTS MATCH over chunk name/text/parent. `query` must already be
    /// sanitized; rank is BM25-style, lower (more negative) is better.
    pub async fn fts_search(&self, query: &str, limit: usize) -> Result<Vec<(i64, f64)>> {
        let rows = sqlx::query(
            r#"
            SELECT rowid, rank
            FROM chunks_fts
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get::<i64, _>("rowid"), row.get::<f64, _>("rank")))
            .collect())
    }

    // ---- dependencies ----

    pub async fn insert_dep(&self, source: i64, target: i64, relation: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO dependencies (source_chunk_id, target_chunk_id, relation)
             VALUES (?, ?, ?)",
        )
        .bind(source)
        .bind(target)
        .bind(relation)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Edges leaving `source`: `(target_chunk_id, relation)`.
    pub async fn outgoing(&self, source: i64) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query(
            "SELECT target_chunk_id, relation FROM dependencies WHERE source_chunk_id = ?",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("target_chunk_id"), row.get("relation")))
            .collect())
    }

    /// Edges arriving at `target`: `(source_chunk_id, relation)`.
    pub async fn incoming(&self, target: i64) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query(
            "SELECT source_chunk_id, relation FROM dependencies WHERE target_chunk_id = ?",
        )
        .bind(target)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("source_chunk_id"), row.get("relation")))
            .collect())
    }

    /// Batched frontier expansion: targets reachable from any of `sources`.
    pub async fn outgoing_batch(&self, sources: &[i64]) -> Result<Vec<i64>> {
        self.dep_batch(sources, "source_chunk_id", "target_chunk_id")
            .await
    }

    /// Batched reverse expansion: sources pointing at any of `targets`.
    pub async fn incoming_batch(&self, targets: &[i64]) -> Result<Vec<i64>> {
        self.dep_batch(targets, "target_chunk_id", "source_chunk_id")
            .await
    }

    async fn dep_batch(&self, ids: &[i64], from_col: &str, to_col: &str) -> Result<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DISTINCT {} FROM dependencies WHERE {} IN ({}) ORDER BY rowid",
            to_col,
            from_col,
            placeholders(ids.len())
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    // ---- stats / maintenance ----

    pub async fn count_files(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        let last_indexed: Option<i64> = sqlx::query_scalar("SELECT MAX(last_indexed) FROM files")
            .fetch_one(&self.pool)
            .await?;

        let language_rows = sqlx::query(
            "SELECT language, COUNT(*) AS n FROM files GROUP BY language ORDER BY n DESC, language",
        )
        .fetch_all(&self.pool)
        .await?;
        let by_language = language_rows
            .into_iter()
            .map(|row| (row.get::<String, _>("language"), row.get::<i64, _>("n")))
            .collect();

        Ok(StoreStats {
            files,
            chunks,
            vectors,
            by_language,
            last_indexed,
        })
    }

    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

const CHUNK_SELECT: &str = r#"
    SELECT c.id, c.file_id, c.stable_id, c.content_hash, c.chunk_type, c.name,
           c.parent, c.line_start, c.line_end, c.text, c.imports, c.exported,
           f.path AS file_path, f.language
    FROM chunks c
    JOIN files f ON f.id = c.file_id
"#;

async fn delete_vectors_tx(
    tx: &mut Transaction<'static, Sqlite>,
    chunk_ids: &[i64],
) -> Result<()> {
    for batch in chunk_ids.chunks(500) {
        if batch.is_empty() {
            continue;
        }
        let sql = format!(
            "DELETE FROM chunk_vectors WHERE rowid IN ({})",
            placeholders(batch.len())
        );
        let mut query = sqlx::query(&sql);
        for id in batch {
            query = query.bind(id);
        }
        query.execute(&mut **tx).await?;
    }
    Ok(())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn row_to_file(row: SqliteRow) -> FileRecord {
    FileRecord {
        id: row.get("id"),
        path: row.get("path"),
        language: row.get("language"),
        hash: row.get("hash"),
        size: row.get("size"),
        last_indexed: row.get("last_indexed"),
    }
}

fn row_to_chunk(row: SqliteRow) -> Result<ChunkRecord> {
    let chunk_type_raw: String = row.get("chunk_type");
    let chunk_type = ChunkType::parse(&chunk_type_raw)
        .ok_or_else(|| CoreError::DbCorrupted(format!("unknown chunk type: {}", chunk_type_raw)))?;
    let imports_raw: String = row.get("imports");
    let imports: Vec<String> = serde_json::from_str(&imports_raw)
        .map_err(|e| CoreError::DbCorrupted(format!("invalid chunk imports: {}", e)))?;
    Ok(ChunkRecord {
        id: row.get("id"),
        file_id: row.get("file_id"),
        stable_id: row.get("stable_id"),
        content_hash: row.get("content_hash"),
        chunk_type,
        name: row.get("name"),
        parent: row.get("parent"),
        line_start: row.get("line_start"),
        line_end: row.get("line_end"),
        text: row.get("text"),
        imports,
        exported: row.get::<i64, _>("exported") != 0,
        file_path: row.get("file_path"),
        language: row.get("language"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_type_roundtrip() {
        for t in [
            ChunkType::Function,
            ChunkType::Class,
            ChunkType::Method,
            ChunkType::Type,
            ChunkType::Import,
            ChunkType::Constant,
            ChunkType::Config,
        ] {
            assert_eq!(ChunkType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ChunkType::parse("module"), None);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_done"), "50\\%\\_done");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
