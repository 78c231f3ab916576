//! Schema lifecycle for the index database.
//!
//! All DDL is idempotent: plain tables use `CREATE TABLE IF NOT EXISTS`,
//! virtual tables are guarded by `sqlite_master` existence checks (FTS5 and
//! vec0 tables cannot be created conditionally).
//!
//! # Schema
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `meta` | key/value: `schema_version`, `vector_dimensions`, `index_embedder` |
//! | `files` | one row per indexed source file (path, language, hash, size) |
//! | `chunks` | logical code chunks, owned by a file, cascaded on file delete |
//! | `dependencies` | directed chunk→chunk edges, cascaded with either endpoint |
//! | `chunks_fts` | FTS5 over chunk `{name, text, parent}`, trigger-synchronized |
//! | `chunk_vectors` | vec0 virtual table of `float[D]` embeddings, rowid = chunk id |

use sqlx::SqlitePool;

use crate::error::{CoreError, Result};

/// Bumped when the on-disk layout changes incompatibly.
pub const SCHEMA_VERSION: i64 = 1;

/// Create all tables, triggers, and indexes for a store of dimension `dims`.
pub async fn create_schema(pool: &SqlitePool, dims: usize) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            language TEXT NOT NULL,
            hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            last_indexed INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            stable_id TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            chunk_type TEXT NOT NULL,
            name TEXT,
            parent TEXT,
            line_start INTEGER NOT NULL,
            line_end INTEGER NOT NULL,
            text TEXT NOT NULL,
            imports TEXT NOT NULL DEFAULT '[]',
            exported INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dependencies (
            source_chunk_id INTEGER NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
            target_chunk_id INTEGER NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
            relation TEXT NOT NULL DEFAULT 'imports',
            PRIMARY KEY (source_chunk_id, target_chunk_id, relation)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 over chunk name/text/parent, kept in sync by triggers so it can
    // never be independently mutated.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                name,
                text,
                parent,
                content='chunks',
                content_rowid='id'
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER chunks_fts_insert AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, name, text, parent)
                VALUES (new.id, new.name, new.text, new.parent);
            END
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER chunks_fts_delete AFTER DELETE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, name, text, parent)
                VALUES ('delete', old.id, old.name, old.text, old.parent);
            END
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER chunks_fts_update AFTER UPDATE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, name, text, parent)
                VALUES ('delete', old.id, old.name, old.text, old.parent);
                INSERT INTO chunks_fts(rowid, name, text, parent)
                VALUES (new.id, new.name, new.text, new.parent);
            END
            "#,
        )
        .execute(pool)
        .await?;
    }

    // vec0 virtual table; rowid doubles as the chunk row id.
    let vec_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'chunk_vectors'",
    )
    .fetch_one(pool)
    .await?;

    if !vec_exists {
        sqlx::query(&format!(
            "CREATE VIRTUAL TABLE chunk_vectors USING vec0(embedding float[{}])",
            dims
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks(file_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_name ON chunks(name)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dependencies_source ON dependencies(source_chunk_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dependencies_target ON dependencies(target_chunk_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?)")
        .bind(SCHEMA_VERSION.to_string())
        .execute(pool)
        .await?;
    sqlx::query("INSERT OR IGNORE INTO meta (key, value) VALUES ('vector_dimensions', ?)")
        .bind(dims.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Read a meta value.
pub async fn meta_get(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

/// Write a meta value (upsert).
pub async fn meta_set(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO meta (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Dimension recorded in the store, if any.
///
/// Prefers `meta.vector_dimensions`; for legacy indices lacking the meta row,
/// recovers the dimension from the vec0 table's DDL text.
pub async fn stored_dimensions(pool: &SqlitePool) -> Result<Option<usize>> {
    let has_meta: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
    )
    .fetch_one(pool)
    .await?;

    if has_meta {
        if let Some(value) = meta_get(pool, "vector_dimensions").await? {
            let dims: usize = value.parse().map_err(|_| {
                CoreError::DbCorrupted(format!("invalid vector_dimensions meta value: {}", value))
            })?;
            return Ok(Some(dims));
        }
    }

    let ddl: Option<String> = sqlx::query_scalar(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'chunk_vectors'",
    )
    .fetch_optional(pool)
    .await?;

    match ddl {
        Some(sql) => parse_ddl_dimensions(&sql).map(Some),
        None => Ok(None),
    }
}

/// Extract `D` from a `... float[D] ...` vec0 declaration.
fn parse_ddl_dimensions(sql: &str) -> Result<usize> {
    let start = sql
        .find("float[")
        .ok_or_else(|| CoreError::DbCorrupted(format!("unrecognized vector DDL: {}", sql)))?
        + "float[".len();
    let rest = &sql[start..];
    let end = rest
        .find(']')
        .ok_or_else(|| CoreError::DbCorrupted(format!("unrecognized vector DDL: {}", sql)))?;
    rest[..end]
        .trim()
        .parse()
        .map_err(|_| CoreError::DbCorrupted(format!("unrecognized vector DDL: {}", sql)))
}
