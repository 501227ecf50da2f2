use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

use crate::error::SyncError;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

// Per-connection settings; foreign keys and the busy timeout do not persist
// in the database file.
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;
     PRAGMA temp_store = MEMORY;";

pub fn create_pool(db_path: &Path, max_size: u32) -> Result<DbPool, SyncError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(db_path)
        .with_init(|c| c.execute_batch(CONNECTION_PRAGMAS));

    let pool = Pool::builder().max_size(max_size).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;",
    )?;

    Ok(pool)
}

/// A pool over a single in-memory connection. Every checkout sees the same
/// database, so it only ever holds one connection.
pub fn create_memory_pool() -> Result<DbPool, SyncError> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|c| c.execute_batch(CONNECTION_PRAGMAS));

    let pool = Pool::builder().max_size(1).build(manager)?;
    Ok(pool)
}
