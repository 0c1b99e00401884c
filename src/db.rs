//! Database handle: explicit SQLite pool lifecycle and schema.
//!
//! The pool is constructed once at startup by [`connect`] and passed into
//! everything that needs it; there is no process-global engine hiding behind
//! a lazy initialiser. Close it with [`sqlx::Pool::close`] at shutdown.
//!
//! The schema is applied idempotently on every connect (`CREATE TABLE IF NOT
//! EXISTS`), mirroring a create-on-startup deployment model: pointing the
//! pipeline at an empty file yields a working database.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::Doc2OrderError;

/// Everything the pipeline persists: the document lifecycle row and the
/// order aggregate (header + details). `sales_order_detail.sales_order_id`
/// carries the aggregate's referential integrity; `documents.sales_order_id`
/// is the at-most-once link from a saved document to its order.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    filename        TEXT NOT NULL,
    content_type    TEXT NOT NULL,
    storage_ref     TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'uploaded',
    error           TEXT,
    extracted_json  TEXT,
    sales_order_id  INTEGER REFERENCES sales_order_header(id),
    created_at      TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS sales_order_header (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    revision_number        INTEGER,
    order_date             TEXT,
    due_date               TEXT,
    ship_date              TEXT,
    status                 INTEGER,
    online_order_flag      INTEGER,
    sales_order_number     TEXT,
    purchase_order_number  TEXT,
    sub_total              REAL,
    tax_amt                REAL,
    freight                REAL,
    total_due              REAL
);

CREATE TABLE IF NOT EXISTS sales_order_detail (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    sales_order_id       INTEGER NOT NULL REFERENCES sales_order_header(id),
    order_qty            INTEGER NOT NULL,
    unit_price           REAL NOT NULL,
    unit_price_discount  REAL,
    line_total           REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_detail_order ON sales_order_detail(sales_order_id);
"#;

/// Open (creating if missing) the SQLite database at `path` and make sure
/// the schema exists.
///
/// WAL journaling lets the status query read concurrently with the
/// background task's writes; `foreign_keys` is off by default in SQLite and
/// must be switched on per connection.
pub async fn connect(path: impl AsRef<Path>) -> Result<SqlitePool, Doc2OrderError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Doc2OrderError::Storage {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(Doc2OrderError::Database)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .pragma("foreign_keys", "ON")
        .pragma("busy_timeout", "5000");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::raw_sql(SCHEMA).execute(&pool).await?;
    info!(db = %path.display(), "database ready (SQLite WAL)");

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_creates_schema_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");

        let pool = connect(&path).await.unwrap();
        // Second connect against the same file must not complain.
        let pool2 = connect(&path).await.unwrap();

        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 0);

        pool.close().await;
        pool2.close().await;
    }
}
