//! # Database Connection Pool Module
//!
//! SQLite connection pooling for the playlist store.
//!
//! ## Features
//!
//! - **WAL Mode**: enabled for file databases
//! - **Connection Pooling**: configurable min/max connections with timeouts
//! - **Schema Setup**: tables are created on initialization
//! - **Health Checks**: connection validation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("playlists.db")).await?;
//! let store = SqlitePlaylistStore::new(pool);
//! ```
//!
//! ## Testing
//!
//! ```rust,ignore
//! let pool = create_test_pool().await?;
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS smart_playlists (
    user_id     TEXT NOT NULL,
    local_id    TEXT NOT NULL,
    remote_id   TEXT,
    title       TEXT NOT NULL,
    rules       TEXT NOT NULL,
    sorts       TEXT NOT NULL DEFAULT '[]',
    limit_count INTEGER,
    PRIMARY KEY (user_id, local_id)
);
CREATE INDEX IF NOT EXISTS idx_smart_playlists_remote
    ON smart_playlists (user_id, remote_id);
"#;

/// Database configuration for SQLite connection pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:` URL of the database
    pub database_url: String,

    pub min_connections: u32,

    /// Forced to 1 for in-memory databases, where every connection would
    /// otherwise see its own empty database.
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,

    pub idle_timeout: Option<Duration>,
}

impl DatabaseConfig {
    /// Configuration for a database file. `":memory:"` selects an in-memory database.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        if path.as_os_str() == ":memory:" {
            return Self::in_memory();
        }

        Self {
            database_url: format!("sqlite:{}", path.display()),
            min_connections: 1,
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: None,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Create a configured SQLite connection pool with the schema applied
///
/// # Errors
///
/// Returns an error if the database cannot be opened, the schema cannot be
/// created or the health check fails.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Creating database connection pool"
    );

    let in_memory = config.is_in_memory();
    let mut connect_options =
        SqliteConnectOptions::from_str(&config.database_url).map_err(LibraryError::Database)?;
    connect_options = connect_options
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true);
    if !in_memory {
        connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
    }

    let max_connections = if in_memory { 1 } else { config.max_connections };
    let mut pool_options = SqlitePoolOptions::new()
        .min_connections(config.min_connections.min(max_connections))
        .max_connections(max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout);
    if in_memory {
        // Closing the last connection would drop the database.
        pool_options = pool_options.max_lifetime(None);
    }

    let pool = pool_options
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create connection pool");
            LibraryError::Database(e)
        })?;

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    Ok(pool)
}

/// In-memory pool with the schema applied
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    debug!("Applying playlist schema");

    sqlx::raw_sql(SCHEMA).execute(pool).await.map_err(|e| {
        warn!(error = %e, "Schema setup failed");
        LibraryError::Migration(e.to_string())
    })?;

    Ok(())
}

async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Database health check failed");
        LibraryError::Database(e)
    })?;

    debug!("Database health check passed");
    Ok(())
}
