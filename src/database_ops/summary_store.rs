use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info, instrument};

use crate::normalization::rating::{ReviewTotal, ScoreTier};
use crate::reviews::config::StoreConfig;
use crate::reviews::error::ProviderError;
use crate::reviews::types::{ProductId, ReviewMessage};
use crate::util::db::Db;

/// Rows per multi-row upsert statement.
pub const BATCH_SIZE: usize = 100;

/// One row of the canonical summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedSummaryRow {
    pub total: ReviewTotal,
    pub review_messages: String,
    pub last_update: DateTime<Utc>,
}

/// Canonical per-product review aggregates. Owns `received_reviews`.
#[derive(Debug, Clone)]
pub struct SummaryStore {
    pool: SqlitePool,
    tables: StoreConfig,
    flushes: Arc<AtomicUsize>,
}

impl SummaryStore {
    pub fn new(db: &Db, tables: StoreConfig) -> Result<Self, ProviderError> {
        tables.validate()?;
        Ok(Self {
            pool: db.pool.clone(),
            tables,
            flushes: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn tables(&self) -> &StoreConfig {
        &self.tables
    }

    /// Upsert statements issued so far by this store.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Remove every row. Only used as the first step of a full resync.
    pub async fn clear(&self) -> Result<(), ProviderError> {
        sqlx::query(&format!("DELETE FROM {}", self.tables.reviews_table))
            .execute(&self.pool)
            .await?;
        info!(table = %self.tables.reviews_table, "cleared existing review totals");
        Ok(())
    }

    /// Persist a batch of totals. With `clear_first` the table is emptied
    /// before anything is written, so a full resync replaces rather than merges.
    /// Every non-key column is overwritten on conflict and messages reset to
    /// empty. Returns the number of records handed in.
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn upsert_totals(
        &self,
        rows: &[ReviewTotal],
        clear_first: bool,
    ) -> Result<usize, ProviderError> {
        if clear_first {
            self.clear().await?;
        }
        let now = Utc::now();
        for chunk in rows.chunks(BATCH_SIZE) {
            self.flush(chunk, now).await?;
        }
        Ok(rows.len())
    }

    async fn flush(&self, chunk: &[ReviewTotal], now: DateTime<Utc>) -> Result<(), ProviderError> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "INSERT INTO {} (product_id, total_reviews, average_score, score_tier, review_messages, last_update) ",
            self.tables.reviews_table
        ));
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(row.product_id().get())
                .push_bind(i64::from(row.total_reviews()))
                .push_bind(row.average_score())
                .push_bind(row.score_tier().as_str())
                .push_bind("")
                .push_bind(now);
        });
        qb.push(
            " ON CONFLICT (product_id)
              DO UPDATE SET total_reviews = excluded.total_reviews,
                            average_score = excluded.average_score,
                            score_tier = excluded.score_tier,
                            review_messages = excluded.review_messages,
                            last_update = excluded.last_update",
        );
        qb.build().execute(&self.pool).await?;
        let flushes = self.flushes.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(rows = chunk.len(), flushes, "flushed review totals");
        Ok(())
    }

    /// Append review text to existing rows, touching only the message column
    /// and the timestamp. Ids without a row are left alone. Returns the number
    /// of products handed in.
    #[instrument(skip(self, reviews), fields(products = reviews.len()))]
    pub async fn append_messages(
        &self,
        reviews: &IndexMap<ProductId, Vec<ReviewMessage>>,
    ) -> Result<usize, ProviderError> {
        let sql = format!(
            "UPDATE {} SET review_messages = CASE WHEN review_messages = '' THEN ? ELSE review_messages || ' ' || ? END, last_update = ? WHERE product_id = ?",
            self.tables.reviews_table
        );
        let now = Utc::now();
        let mut missing = 0usize;
        for (id, messages) in reviews {
            let text = messages
                .iter()
                .map(ReviewMessage::joined)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                continue;
            }
            let res = sqlx::query(&sql)
                .bind(&text)
                .bind(&text)
                .bind(now)
                .bind(id.get())
                .execute(&self.pool)
                .await?;
            if res.rows_affected() == 0 {
                missing += 1;
                debug!(product_id = %id, "no summary row for reviewed product; messages dropped");
            }
        }
        if missing > 0 {
            info!(missing, "review messages for products without totals were not stored");
        }
        Ok(reviews.len())
    }

    pub async fn get(&self, product_id: ProductId) -> Result<Option<PersistedSummaryRow>, ProviderError> {
        let row = sqlx::query(&format!(
            "SELECT product_id, total_reviews, average_score, score_tier, review_messages, last_update FROM {} WHERE product_id = ?",
            self.tables.reviews_table
        ))
        .bind(product_id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| decode_row(&r)).transpose()
    }

    /// Every row ordered by product id.
    pub async fn all_rows(&self) -> Result<Vec<PersistedSummaryRow>, ProviderError> {
        let rows = sqlx::query(&format!(
            "SELECT product_id, total_reviews, average_score, score_tier, review_messages, last_update FROM {} ORDER BY product_id",
            self.tables.reviews_table
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_row).collect()
    }

    pub async fn count(&self) -> Result<i64, ProviderError> {
        let n: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {}",
            self.tables.reviews_table
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<PersistedSummaryRow, ProviderError> {
    let raw_id: i64 = row.try_get("product_id")?;
    let product_id = ProductId::new(raw_id).map_err(|e| decode_error("product_id", e))?;
    let raw_total: i64 = row.try_get("total_reviews")?;
    let total_reviews = u32::try_from(raw_total).map_err(|e| decode_error("total_reviews", e))?;
    let average_score: f64 = row.try_get("average_score")?;
    let stored_tier: String = row.try_get("score_tier")?;
    let total = ReviewTotal::new(product_id, total_reviews, average_score);
    if stored_tier.parse::<ScoreTier>().ok() != Some(total.score_tier()) {
        debug!(product_id = %product_id, stored_tier, derived = %total.score_tier(), "stored tier disagrees with score; using derived tier");
    }
    Ok(PersistedSummaryRow {
        total,
        review_messages: row.try_get("review_messages")?,
        last_update: row.try_get("last_update")?,
    })
}

fn decode_error(
    column: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> ProviderError {
    ProviderError::Persistence(sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    })
}
