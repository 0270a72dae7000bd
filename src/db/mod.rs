//! SQLite home of the per-page segment cache.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use tracing::debug;

use crate::core::errors::{AppError, AppResult};

pub mod repositories;

pub const DATABASE_FILE: &str = "foxvox.sqlite";
pub const DATA_DIR_ENV: &str = "FOXVOX_DATA_DIR";

const MAX_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the segment cache. Cheap to clone; every clone shares the pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (or creates) `foxvox.sqlite` under `data_dir` and applies pending migrations.
    pub async fn new(data_dir: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(DATABASE_FILE);
        let options = connect_options(&format!("sqlite:{}", db_path.to_string_lossy().replace('\\', "/")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        debug!(path = %db_path.display(), "segment cache opened");
        Self::migrated(pool).await
    }

    /// Private in-memory cache. A single connection, since every sqlite memory
    /// connection is its own database.
    pub async fn in_memory() -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options("sqlite::memory:")?)
            .await?;
        Self::migrated(pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrated(pool: SqlitePool) -> AppResult<Self> {
        sqlx::migrate!("./src/db/migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

// Store cascades rely on foreign keys, which sqlite enables per connection.
fn connect_options(url: &str) -> AppResult<SqliteConnectOptions> {
    Ok(SqliteConnectOptions::from_str(url)
        .map_err(|err| AppError::Database(err.to_string()))?
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT))
}

/// `base`, else `$FOXVOX_DATA_DIR`, else `./.foxvox`.
pub fn default_data_dir(base: Option<PathBuf>) -> AppResult<PathBuf> {
    if let Some(path) = base {
        return Ok(path);
    }
    if let Some(path) = std::env::var_os(DATA_DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    Ok(std::env::current_dir()?.join(".foxvox"))
}
