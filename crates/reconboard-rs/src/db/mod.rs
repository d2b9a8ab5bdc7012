pub mod history;
pub mod hosts;
pub mod jobs;
pub mod seed;
pub mod teams;

use std::{str::FromStr, time::Duration};

use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};

use crate::error::{Result, ServiceError};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn create_pool(url: &str) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    Ok(SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(opts)
        .await?)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    Ok(())
}

/// Opens a transaction that takes the database write lock up front.
///
/// A deferred `BEGIN` that reads before writing cannot upgrade its lock while
/// another writer is active, and SQLite fails it with `SQLITE_BUSY` without
/// honouring the busy timeout. Every read-modify-write goes through here.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Maps a UNIQUE constraint violation to [`ServiceError::Conflict`].
pub(crate) fn unique_conflict(err: sqlx::Error, what: impl FnOnce() -> String) -> ServiceError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => ServiceError::Conflict(what()),
        _ => ServiceError::Database(err),
    }
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("memory url")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("memory pool");
    run_migrations(&pool).await.expect("migrations");
    pool
}

#[cfg(test)]
pub(crate) async fn file_pool() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("reconboard.db").display());
    let pool = create_pool(&url).await.expect("file pool");
    run_migrations(&pool).await.expect("migrations");
    (dir, pool)
}
