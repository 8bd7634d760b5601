//! Low-level database access.
//!
//! SQLite via libsql, tuned for many concurrent workers:
//! WAL mode for concurrent reads during writes, a generous busy timeout
//! for lock contention, and a larger page cache. Migrations are plain SQL
//! applied idempotently at startup.

use crate::Result;
use libsql::{Builder, Connection};
use std::path::{Path, PathBuf};

/// Type alias for database connections.
pub type Db = Connection;

/// Creates a new database connection with migrations applied.
pub async fn new_db_pool(db_path: &str) -> Result<Db> {
    let db_path = PathBuf::from(db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    open_and_migrate(&db_path).await
}

/// Open a database at an explicit path and apply migrations.
/// Used by tests to build isolated databases.
pub async fn open_and_migrate(db_path: &Path) -> Result<Db> {
    let db = Builder::new_local(db_path).build().await?;
    let conn = db.connect()?;

    // Concurrency settings: multiple sync workers, the gateway, and the
    // outbox worker all share this file.
    let _ = conn.execute("PRAGMA journal_mode=WAL;", ()).await;
    let _ = conn.execute("PRAGMA busy_timeout=30000;", ()).await;
    let _ = conn.execute("PRAGMA synchronous=NORMAL;", ()).await;
    let _ = conn.execute("PRAGMA cache_size=-64000;", ()).await;

    run_migrations(&conn).await?;

    Ok(conn)
}

/// Apply all migrations in order. `IF NOT EXISTS` keeps this idempotent.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    let migrations = [include_str!("../../../../../migrations/001_initial_schema.sql")];
    for migration in &migrations {
        conn.execute_batch(migration).await?;
    }
    Ok(())
}
