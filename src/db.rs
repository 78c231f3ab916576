//! SQLite connection pool with WAL mode, foreign keys, and the sqlite-vec
//! extension registered for vector KNN.

use std::path::Path;
use std::sync::Once;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::Result;

static VEC_EXTENSION: Once = Once::new();

/// Register sqlite-vec for every connection opened by this process.
///
/// Must run before the first pool opens; `Once` makes repeat calls free.
fn register_vec_extension() {
    VEC_EXTENSION.call_once(|| unsafe {
        libsqlite3_sys::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (optionally creating) the database at `db_path`.
///
/// Enables write-ahead journaling and foreign-key enforcement; creates the
/// parent directory when missing.
pub async fn connect(db_path: &Path, create: bool) -> Result<SqlitePool> {
    register_vec_extension();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
