//! SQLite storage backend for portcullis.
//!
//! [`SqliteAttemptStore`] keeps account and address counters in two tables so
//! lockouts survive restarts and can be shared by several processes on one
//! host. Every failure is applied inside a write transaction, which SQLite
//! serializes, so concurrent failures for the same key are never lost.
//!
//! ```rust,ignore
//! use portcullis_storage_sqlite::SqliteAttemptStore;
//!
//! let store = SqliteAttemptStore::connect("sqlite://portcullis.db?mode=rwc").await?;
//! store.migrate().await?;
//! ```

pub mod migrations;
mod repositories;

use std::str::FromStr;
use std::time::Duration;

use portcullis_core::{Error, error::StorageError, error::utilities::DatabaseResultExt};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::migrations::{SqliteMigrationManager, migrations};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempt store backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteAttemptStore {
    pool: SqlitePool,
}

impl SqliteAttemptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `url`, creating the file if it is missing.
    ///
    /// In-memory databases are private to a single connection, so the pool
    /// is limited to one connection for `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let options = SqliteConnectOptions::from_str(url)
            .map_db_err_with_context("Invalid SQLite URL")?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let mut pool_options = SqlitePoolOptions::new();
        if url.contains(":memory:") {
            pool_options = pool_options.max_connections(1);
        }

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to SQLite");
            StorageError::Connection(e.to_string())
        })?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await?;
        manager.up(&migrations()).await?;
        Ok(())
    }
}
