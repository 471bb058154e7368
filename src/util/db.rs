use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::reviews::config::StoreConfig;

#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(database_url)
            .context("invalid sqlite database url")?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");
        Ok(Self { pool })
    }

    /// Single-connection in-memory database. The connection is never recycled,
    /// otherwise the data would vanish with it.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Create the summary, catalog and engine-state tables if missing.
    pub async fn create_tables(&self, tables: &StoreConfig) -> Result<()> {
        tables.validate()?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {reviews} (
                product_id INTEGER NOT NULL PRIMARY KEY CHECK (product_id >= 0),
                total_reviews INTEGER NOT NULL DEFAULT 0 CHECK (total_reviews >= 0),
                average_score REAL NOT NULL DEFAULT 0 CHECK (average_score >= 0),
                score_tier TEXT NOT NULL DEFAULT 'nostar'
                    CHECK (score_tier IN ('nostar', 'onestar', 'twostar', 'threestar', 'fourstar', 'fivestar')),
                review_messages TEXT NOT NULL DEFAULT '',
                last_update TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
             );
             CREATE TABLE IF NOT EXISTS {catalog} (
                product_id INTEGER NOT NULL PRIMARY KEY,
                total_reviews INTEGER NOT NULL DEFAULT 0,
                average_score REAL NOT NULL DEFAULT 0,
                score_tier TEXT NOT NULL DEFAULT 'nostar',
                review_messages TEXT NOT NULL DEFAULT ''
             );
             CREATE TABLE IF NOT EXISTS {engines} (
                engine_id TEXT NOT NULL PRIMARY KEY,
                reviews_hash TEXT NOT NULL DEFAULT ''
             );",
            reviews = tables.reviews_table,
            catalog = tables.catalog_table,
            engines = tables.engines_table,
        );
        sqlx::raw_sql(&ddl).execute(&self.pool).await?;
        info!(
            reviews = %tables.reviews_table,
            catalog = %tables.catalog_table,
            "review tables ready"
        );
        Ok(())
    }
}
