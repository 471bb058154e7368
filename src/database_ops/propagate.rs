//! Change detection over the summary table and propagation into the catalog.
//!
//! The fingerprint is cheap to recompute and stable for identical contents, so
//! a run that fetched nothing new leaves the catalog untouched.

use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::{info, instrument};

use crate::database_ops::summary_store::SummaryStore;
use crate::reviews::error::ProviderError;

const ROW_HASH_HEX_LEN: usize = 5;

pub const MSG_DISABLED: &str = "Updating summary is disabled";
pub const MSG_HASH_MATCHES: &str = "Reviews hash matches, skip updating summary";
pub const MSG_UPDATED: &str = "Summary reviews updated";

/// What a propagation attempt did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationOutcome {
    pub success: bool,
    /// The catalog was written.
    pub updated: bool,
    pub message: String,
    /// Fingerprint computed during the attempt, when it got that far.
    pub fingerprint: Option<String>,
}

impl PropagationOutcome {
    fn skipped(success: bool, message: impl Into<String>, fingerprint: Option<String>) -> Self {
        Self {
            success,
            updated: false,
            message: message.into(),
            fingerprint,
        }
    }
}

/// Gate inputs for one propagation attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagationRequest<'a> {
    pub engine_id: &'a str,
    /// Fingerprint stored after the previous successful propagation.
    pub stored_fingerprint: Option<&'a str>,
    pub force: bool,
    pub skip_hash_check: bool,
    pub allow_propagation: bool,
    /// Last error of the run, already known to be fatal.
    pub fatal_error: Option<&'a str>,
}

fn sha1_hex(input: &[u8]) -> String {
    format!("{:x}", Sha1::digest(input))
}

/// Digest of every `(product_id, total_reviews, average_score)` triple, in
/// product id order. Each row contributes the first five hex characters of its
/// own digest; the result is the digest of their concatenation.
pub async fn fingerprint(store: &SummaryStore) -> Result<String, ProviderError> {
    let rows = store.all_rows().await?;
    let mut joined = String::with_capacity(rows.len() * ROW_HASH_HEX_LEN);
    for row in &rows {
        let t = &row.total;
        let row_hash = sha1_hex(
            format!(
                "{}{}{}",
                t.product_id(),
                t.total_reviews(),
                t.average_score()
            )
            .as_bytes(),
        );
        joined.push_str(&row_hash[..ROW_HASH_HEX_LEN]);
    }
    Ok(sha1_hex(joined.as_bytes()))
}

/// Fingerprint recorded for `engine_id` by the last successful propagation.
pub async fn stored_fingerprint(
    store: &SummaryStore,
    engine_id: &str,
) -> Result<Option<String>, ProviderError> {
    let hash: Option<String> = sqlx::query_scalar(&format!(
        "SELECT reviews_hash FROM {} WHERE engine_id = ?",
        store.tables().engines_table
    ))
    .bind(engine_id)
    .fetch_optional(store.pool())
    .await?;
    Ok(hash)
}

/// Copy the summary into the catalog when the gates allow it.
///
/// Gates are checked in order: propagation enabled, last error not fatal,
/// fingerprint changed (unless forced or the provider skips the check). The
/// catalog update and the fingerprint write share one transaction.
#[instrument(skip(store, req), fields(engine_id = %req.engine_id, force = req.force))]
pub async fn propagate(
    store: &SummaryStore,
    req: &PropagationRequest<'_>,
) -> Result<PropagationOutcome, ProviderError> {
    if !req.allow_propagation {
        return Ok(PropagationOutcome::skipped(false, MSG_DISABLED, None));
    }
    if let Some(err) = req.fatal_error {
        return Ok(PropagationOutcome::skipped(
            false,
            format!("Last error is fatal, skip updating summary: {err}"),
            None,
        ));
    }

    let current = fingerprint(store).await?;
    if !req.force && !req.skip_hash_check && req.stored_fingerprint == Some(current.as_str()) {
        info!(fingerprint = %current, "summary unchanged");
        return Ok(PropagationOutcome::skipped(true, MSG_HASH_MATCHES, Some(current)));
    }

    let tables = store.tables();
    let mut tx = store.pool().begin().await?;
    let copied = sqlx::query(&format!(
        "UPDATE {catalog}
            SET total_reviews = r.total_reviews,
                average_score = r.average_score,
                score_tier = r.score_tier,
                review_messages = r.review_messages
           FROM {reviews} AS r
          WHERE {catalog}.product_id = r.product_id",
        catalog = tables.catalog_table,
        reviews = tables.reviews_table,
    ))
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let zeroed = sqlx::query(&format!(
        "UPDATE {catalog}
            SET total_reviews = 0, average_score = 0, score_tier = 'nostar', review_messages = ''
          WHERE product_id NOT IN (SELECT product_id FROM {reviews})",
        catalog = tables.catalog_table,
        reviews = tables.reviews_table,
    ))
    .execute(&mut *tx)
    .await?
    .rows_affected();

    sqlx::query(&format!(
        "INSERT INTO {} (engine_id, reviews_hash) VALUES (?, ?)
         ON CONFLICT (engine_id) DO UPDATE SET reviews_hash = excluded.reviews_hash",
        tables.engines_table
    ))
    .bind(req.engine_id)
    .bind(&current)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    info!(copied, zeroed, fingerprint = %current, "catalog review summary updated");
    Ok(PropagationOutcome {
        success: true,
        updated: true,
        message: MSG_UPDATED.to_string(),
        fingerprint: Some(current),
    })
}
