pub mod repository;
pub mod sqlite;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::Result;

/// Per-store schema files, embedded at build time. Each abstract repository
/// owns its own database file, so each pool applies only its own schema.
pub mod schema {
    pub const TOOLS: &str = include_str!("../../../../migrations/sqlite/tools.sql");
    pub const VALIDATION: &str = include_str!("../../../../migrations/sqlite/validation.sql");
    pub const SCORES: &str = include_str!("../../../../migrations/sqlite/scores.sql");
    pub const ROSTER: &str = include_str!("../../../../migrations/sqlite/roster.sql");
}

/// Open (creating if absent) a SQLite database file and apply `schema_sql`.
pub async fn new_sqlite(path: &str, schema_sql: &str) -> Result<SqlitePool> {
    let pool = SqlitePool::connect(&format!("sqlite:{path}?mode=rwc")).await?;
    run_schema(&pool, schema_sql).await?;
    Ok(pool)
}

/// Open an in-memory SQLite database and apply `schema_sql`. Useful for
/// testing. The pool is capped at one connection: each in-memory
/// connection would otherwise see its own empty database.
pub async fn new_sqlite_memory(schema_sql: &str) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    run_schema(&pool, schema_sql).await?;
    Ok(pool)
}

async fn run_schema(pool: &SqlitePool, schema_sql: &str) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON;").execute(pool).await?;
    for statement in schema_sql.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}
