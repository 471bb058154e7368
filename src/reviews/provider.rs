//! Provider-agnostic sync engine: paginate, normalize, persist, then decide
//! whether the catalog needs the new summary.

use tracing::{debug, info, instrument, warn};

use crate::database_ops::propagate::{self, PropagationOutcome, PropagationRequest};
use crate::database_ops::summary_store::SummaryStore;
use crate::normalization::messages::ReviewCollector;
use crate::normalization::rating::{normalize_total, normalize_totals, ReviewTotal};
use crate::reviews::adapter::FetchAdapter;
use crate::reviews::config::EngineConfig;
use crate::reviews::diagnostics::{DebugChannel, DebugSelection, Diagnostics, LogSink};
use crate::reviews::error::{ErrorClass, FetchError, FetchTarget, ProviderError};
use crate::reviews::registry::ProviderProfile;
use crate::reviews::retry::{RetryCall, RetryGovernor};
use crate::reviews::types::{Cursor, ProductId};

const MSG_UPDATE_FAILED: &str = "Failed to update summary reviews!";

/// Pages left before testing mode stops a run; `None` means unlimited.
#[derive(Debug, Clone, Copy)]
struct PageBudget(Option<u32>);

impl PageBudget {
    /// Count one processed page; true when the run should stop.
    fn spend(&mut self) -> bool {
        match self.0.as_mut() {
            Some(left) => {
                *left = left.saturating_sub(1);
                *left == 0
            }
            None => false,
        }
    }
}

/// Whether the current operation has failed since its last success.
#[derive(Debug, Default)]
struct Recovery {
    failed: bool,
}

pub struct ReviewsProvider {
    profile: ProviderProfile,
    config: EngineConfig,
    adapter: Box<dyn FetchAdapter>,
    store: SummaryStore,
    governor: RetryGovernor,
    diagnostics: Diagnostics,
    totals_count: usize,
    totals_fetched: bool,
    reviews_count: usize,
    last_message: Option<String>,
}

impl std::fmt::Debug for ReviewsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewsProvider")
            .field("provider", &self.profile.kind)
            .field("engine_id", &self.config.engine_id)
            .field("totals_count", &self.totals_count)
            .field("reviews_count", &self.reviews_count)
            .field("last_error", &self.governor.last_error())
            .finish_non_exhaustive()
    }
}

impl ReviewsProvider {
    /// Fails with [`ProviderError::Validation`] naming the first required
    /// field that is missing or blank, unless `check_required` is off.
    pub fn new(
        profile: ProviderProfile,
        config: EngineConfig,
        adapter: Box<dyn FetchAdapter>,
        store: SummaryStore,
        check_required: bool,
    ) -> Result<Self, ProviderError> {
        if check_required {
            if let Some(missing) = config.missing_fields(profile.required_fields).first() {
                return Err(ProviderError::Validation((*missing).to_string()));
            }
        }
        let mut diagnostics = Diagnostics::new(profile.kind.name(), config.engine_id.clone());
        diagnostics.set_debug(config.options.debug.clone());
        let governor = RetryGovernor::new(config.retry, profile.fatal_error_set());
        Ok(Self {
            profile,
            config,
            adapter,
            store,
            governor,
            diagnostics,
            totals_count: 0,
            totals_fetched: false,
            reviews_count: 0,
            last_message: None,
        })
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &SummaryStore {
        &self.store
    }

    pub fn governor(&self) -> &RetryGovernor {
        &self.governor
    }

    pub fn last_error(&self) -> Option<&str> {
        self.governor.last_error()
    }

    /// Short human-readable status of the most recent operation.
    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    pub fn totals_count(&self) -> usize {
        self.totals_count
    }

    pub fn reviews_count(&self) -> usize {
        self.reviews_count
    }

    pub fn set_log_sink(&mut self, sink: LogSink) {
        self.diagnostics.set_sink(sink);
    }

    pub fn set_debug(&mut self, debug: DebugSelection) {
        self.config.options.debug = debug.clone();
        self.diagnostics.set_debug(debug);
    }

    /// Stop every paginated operation after `pages` processed pages.
    pub fn set_testing(&mut self, pages: Option<u32>) {
        self.config.options.testing = pages;
    }

    fn log(&mut self, message: &str) {
        self.diagnostics.log(message, &[]);
        self.last_message = Some(message.to_string());
    }

    /// Record a failed request and ask the governor whether to try again.
    async fn handle_failure(
        &mut self,
        err: FetchError,
        target: FetchTarget,
        cursor: &Cursor,
        recovery: &mut Recovery,
    ) -> bool {
        let signature = err.signature(target);
        let class = err.class(|m| self.governor.fatal_errors().matches(m));
        debug!(
            target: "reviews",
            feed = %target,
            %cursor,
            ?class,
            error = %err,
            "fetch failed"
        );
        self.governor.record_error(err.error_value(target));

        let mut call = RetryCall::default();
        if let Some(detail) = err.detail() {
            call = call.context(detail);
        }
        let granted = self
            .governor
            .should_retry(&signature, call, &mut self.diagnostics)
            .await;
        recovery.failed = true;
        if !granted {
            let outcome = if class == ErrorClass::FatalProvider || self.governor.is_last_error_fatal() {
                "aborted on fatal error"
            } else {
                "aborted"
            };
            warn!(target: "reviews", feed = %target, %cursor, signature = %signature, "{outcome}");
        }
        self.last_message = Some(signature);
        granted
    }

    /// A request succeeded: every retry budget starts over, and the error
    /// this operation recorded is dropped.
    fn recovered(&mut self, recovery: &mut Recovery) {
        self.governor.reset(None);
        if std::mem::take(&mut recovery.failed) {
            self.governor.clear_error();
        }
    }

    /// Walk the totals feed from the start and persist every page. Retry
    /// counters and the last error start clean. The first persisted page
    /// replaces the table contents. Returns how many products
    /// were stored, including after an abort.
    #[instrument(skip(self), fields(provider = %self.profile.kind, engine_id = %self.config.engine_id))]
    pub async fn fetch_all_totals(&mut self) -> Result<usize, ProviderError> {
        self.governor.reset(None);
        self.governor.clear_error();
        self.totals_count = 0;
        let mut cleared = false;
        let mut cursor = Cursor::Start;
        let mut budget = PageBudget(self.config.options.testing);
        let mut recovery = Recovery::default();
        let mut completed = false;

        loop {
            self.diagnostics
                .debug(DebugChannel::Request, format_args!("totals {cursor}"));
            let fetched = self.adapter.next_totals_page(&cursor).await;
            let page = match fetched {
                Ok(page) => page,
                Err(err) => {
                    if self.handle_failure(err, FetchTarget::Totals, &cursor, &mut recovery).await {
                        continue;
                    }
                    break;
                }
            };
            if self.diagnostics.is_enabled(DebugChannel::Response) {
                let body = serde_json::to_string(&page.rows).unwrap_or_default();
                self.diagnostics.debug(DebugChannel::Response, body);
            }
            let rows = match normalize_totals(&page.rows) {
                Ok(rows) => rows,
                Err(err) => {
                    if self.handle_failure(err, FetchTarget::Totals, &cursor, &mut recovery).await {
                        continue;
                    }
                    break;
                }
            };
            self.recovered(&mut recovery);

            self.store.upsert_totals(&rows, !cleared).await?;
            cleared = true;
            self.totals_count += rows.len();
            self.diagnostics.debug(
                DebugChannel::Products,
                format_args!("{} products on {cursor}, {} total", rows.len(), self.totals_count),
            );

            if page.exhausted {
                completed = true;
                break;
            }
            if budget.spend() {
                info!(target: "reviews", pages = ?self.config.options.testing, "testing budget spent; stopping totals run");
                completed = true;
                break;
            }
            if page.next == cursor {
                warn!(target: "reviews", %cursor, "adapter returned the same cursor twice; treating feed as exhausted");
                completed = true;
                break;
            }
            cursor = page.next;
        }

        self.totals_fetched = true;
        if completed {
            self.last_message = Some(format!("Fetched totals for {} products", self.totals_count));
        }
        info!(
            target: "reviews",
            count = self.totals_count,
            completed,
            flushes = self.store.flush_count(),
            "totals run finished"
        );
        Ok(self.totals_count)
    }

    /// Totals for one product. Uses the adapter's single-item lookup when it
    /// has one; otherwise runs the full totals fetch once per provider and
    /// reads the stored row. Unknown products get zero totals.
    #[instrument(skip(self), fields(provider = %self.profile.kind))]
    pub async fn fetch_one_total(&mut self, product_id: ProductId) -> Result<ReviewTotal, ProviderError> {
        if self.adapter.supports_single_item() {
            let cursor = Cursor::Start;
            let mut recovery = Recovery::default();
            loop {
                self.diagnostics
                    .debug(DebugChannel::Request, format_args!("product {product_id}"));
                let fetched = self.adapter.single_item(product_id).await;
                let result = match fetched {
                    Ok(None) => {
                        self.recovered(&mut recovery);
                        return Ok(ReviewTotal::zero(product_id));
                    }
                    Ok(Some(raw)) => normalize_total(&raw).and_then(|total| {
                        if total.product_id() == product_id {
                            Ok(total)
                        } else {
                            Err(FetchError::Malformed(format!(
                                "asked for product {product_id}, got {}",
                                total.product_id()
                            )))
                        }
                    }),
                    Err(err) => Err(err),
                };
                match result {
                    Ok(total) => {
                        self.recovered(&mut recovery);
                        self.diagnostics.debug(
                            DebugChannel::Product,
                            format_args!("{product_id}: {} reviews, {}", total.total_reviews(), total.score_tier()),
                        );
                        return Ok(total);
                    }
                    Err(err) => {
                        if !self
                            .handle_failure(err, FetchTarget::Totals, &cursor, &mut recovery)
                            .await
                        {
                            return Ok(ReviewTotal::zero(product_id));
                        }
                    }
                }
            }
        }

        if !self.totals_fetched {
            self.fetch_all_totals().await?;
        }
        let total = self
            .store
            .get(product_id)
            .await?
            .map(|row| row.total)
            .unwrap_or_else(|| ReviewTotal::zero(product_id));
        Ok(total)
    }

    /// Walk the review-text feed, merge messages of products sharing a SKU and
    /// append them to the stored rows. Whatever was collected before an abort
    /// is still stored. Returns the number of reviews kept.
    #[instrument(skip(self), fields(provider = %self.profile.kind, engine_id = %self.config.engine_id))]
    pub async fn fetch_all_reviews(&mut self) -> Result<usize, ProviderError> {
        // A fatal totals error stays recorded so it still blocks propagation.
        self.governor.reset(None);
        self.reviews_count = 0;
        let mut collector = ReviewCollector::default();
        let mut cursor = Cursor::Start;
        let mut budget = PageBudget(self.config.options.testing);
        let mut recovery = Recovery::default();
        let mut completed = false;

        loop {
            self.diagnostics
                .debug(DebugChannel::Request, format_args!("reviews {cursor}"));
            let fetched = self.adapter.next_reviews_page(&cursor).await;
            let page = match fetched {
                Ok(page) => page,
                Err(err) => {
                    if self.handle_failure(err, FetchTarget::Reviews, &cursor, &mut recovery).await {
                        continue;
                    }
                    break;
                }
            };
            let kept = match collector.push_page(&page.rows) {
                Ok(kept) => kept,
                Err(err) => {
                    if self.handle_failure(err, FetchTarget::Reviews, &cursor, &mut recovery).await {
                        continue;
                    }
                    break;
                }
            };
            self.recovered(&mut recovery);
            self.reviews_count += kept;
            self.diagnostics.debug(
                DebugChannel::Products,
                format_args!("{kept} of {} reviews kept on {cursor}", page.rows.len()),
            );

            if page.exhausted {
                completed = true;
                break;
            }
            if budget.spend() {
                info!(target: "reviews", pages = ?self.config.options.testing, "testing budget spent; stopping reviews run");
                completed = true;
                break;
            }
            if page.next == cursor {
                warn!(target: "reviews", %cursor, "adapter returned the same cursor twice; treating feed as exhausted");
                completed = true;
                break;
            }
            cursor = page.next;
        }

        let merged = collector.into_merged();
        let products = self.store.append_messages(&merged).await?;
        if completed {
            self.last_message = Some(format!(
                "Fetched {} reviews for {products} products",
                self.reviews_count
            ));
        }
        info!(
            target: "reviews",
            reviews = self.reviews_count,
            products,
            completed,
            "reviews run finished"
        );
        Ok(self.reviews_count)
    }

    /// One cheap request against the vendor. Never persists anything.
    pub async fn test_connectivity(&mut self) -> bool {
        match self.adapter.health_check().await {
            Ok(true) => {
                self.last_message = Some("Connection OK".to_string());
                true
            }
            Ok(false) => {
                self.log("Connection test failed");
                false
            }
            Err(err) => {
                let message = format!("Connection test failed: {err}");
                self.log(&message);
                false
            }
        }
    }

    pub async fn fingerprint(&self) -> Result<String, ProviderError> {
        propagate::fingerprint(&self.store).await
    }

    /// Copy the summary into the catalog if the run allows it. On success the
    /// new fingerprint replaces the one held in the engine config.
    #[instrument(skip(self), fields(provider = %self.profile.kind, engine_id = %self.config.engine_id))]
    pub async fn propagate(&mut self, force: bool) -> Result<PropagationOutcome, ProviderError> {
        let fatal_error = if self.governor.is_last_error_fatal() {
            self.governor.last_error().map(str::to_string)
        } else {
            None
        };
        let request = PropagationRequest {
            engine_id: &self.config.engine_id,
            stored_fingerprint: self.config.reviews_hash.as_deref(),
            force: force || self.config.options.force,
            skip_hash_check: self.profile.skip_hash_check,
            allow_propagation: self.config.allow_propagation,
            fatal_error: fatal_error.as_deref(),
        };
        let outcome = match propagate::propagate(&self.store, &request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.diagnostics.log(MSG_UPDATE_FAILED, &[err.to_string()]);
                self.last_message = Some(MSG_UPDATE_FAILED.to_string());
                return Err(err);
            }
        };

        if outcome.updated {
            self.config.reviews_hash = outcome.fingerprint.clone();
            self.last_message = Some(outcome.message.clone());
        } else {
            self.log(&outcome.message);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::database_ops::propagate::{MSG_HASH_MATCHES, MSG_UPDATED};
    use crate::normalization::rating::ScoreTier;
    use crate::reviews::error::ERROR_RESPONSE_HEADER_NOT_OK;
    use crate::reviews::registry::ProviderKind;
    use crate::reviews::types::{Page, RawReview, RawTotal};
    use crate::test_support::{engine_config, memory_store, pid, seed_catalog, ScriptedAdapter};

    const JUDGEME_FATAL: &str = "Shop does not enable review aggregate feed.";

    async fn provider_with(
        kind: ProviderKind,
        adapter: ScriptedAdapter,
    ) -> (ReviewsProvider, Arc<Mutex<Vec<String>>>) {
        provider_with_config(kind, engine_config(kind.name()), adapter).await
    }

    async fn provider_with_config(
        kind: ProviderKind,
        config: EngineConfig,
        adapter: ScriptedAdapter,
    ) -> (ReviewsProvider, Arc<Mutex<Vec<String>>>) {
        let calls = adapter.calls();
        let store = memory_store().await;
        let provider =
            ReviewsProvider::new(kind.profile(), config, Box::new(adapter), store, false).unwrap();
        (provider, calls)
    }

    fn capture(provider: &mut ReviewsProvider) -> Arc<Mutex<Vec<String>>> {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        provider.set_log_sink(Box::new(move |m| sink.lock().unwrap().push(m.to_string())));
        lines
    }

    fn totals_page(ids: &[(&str, i64, f64)], next: Option<u32>) -> Result<Page<RawTotal>, FetchError> {
        let rows = ids
            .iter()
            .map(|(id, n, s)| RawTotal::new(*id, *n, *s))
            .collect();
        Ok(match next {
            Some(p) => Page::more(rows, Cursor::Page(p)),
            None => Page::last(rows),
        })
    }

    #[tokio::test]
    async fn single_page_run_then_propagate_once() {
        let mut config = engine_config("socialshopwave");
        config.reviews_hash = Some(String::new());
        let adapter = ScriptedAdapter::new().totals(totals_page(&[("1", 10, 4.8)], None));
        let (mut provider, _) =
            provider_with_config(ProviderKind::Socialshopwave, config, adapter).await;
        seed_catalog(provider.store(), &[1]).await;

        assert_eq!(provider.fetch_all_totals().await.unwrap(), 1);
        let row = provider.store().get(pid(1)).await.unwrap().unwrap();
        assert_eq!(row.total.score_tier(), ScoreTier::Five);

        let first = provider.propagate(false).await.unwrap();
        assert!(first.success && first.updated);
        assert_eq!(first.message, MSG_UPDATED);
        assert_eq!(provider.config().reviews_hash, first.fingerprint);

        let second = provider.propagate(false).await.unwrap();
        assert!(second.success && !second.updated);
        assert_eq!(second.message, MSG_HASH_MATCHES);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_and_cleared() {
        let adapter = ScriptedAdapter::new()
            .totals(Err(FetchError::Status(503)))
            .totals(Err(FetchError::Transport("connection reset".into())))
            .totals(totals_page(&[("1", 1, 1.0), ("2", 2, 2.0)], Some(2)))
            .totals(totals_page(&[("3", 3, 3.0)], None));
        let (mut provider, calls) = provider_with(ProviderKind::Socialshopwave, adapter).await;

        assert_eq!(provider.fetch_all_totals().await.unwrap(), 3);
        assert_eq!(provider.last_error(), None);
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            ["totals start", "totals start", "totals start", "totals page 2"]
        );
        assert_eq!(
            provider
                .governor()
                .attempts("RESPONSE header is not 200 OK when getting totals"),
            0
        );
    }

    #[tokio::test]
    async fn exhausted_retries_keep_partial_count_and_block_propagation() {
        let mut adapter = ScriptedAdapter::new().totals(totals_page(&[("1", 4, 4.0), ("2", 1, 2.0)], Some(2)));
        for _ in 0..6 {
            adapter = adapter.totals(Err(FetchError::Status(500)));
        }
        let (mut provider, calls) = provider_with(ProviderKind::Socialshopwave, adapter).await;
        let lines = capture(&mut provider);

        assert_eq!(provider.fetch_all_totals().await.unwrap(), 2);
        assert_eq!(calls.lock().unwrap().len(), 7);
        assert_eq!(provider.last_error(), Some(ERROR_RESPONSE_HEADER_NOT_OK));
        assert_eq!(provider.store().count().await.unwrap(), 2);

        let last_line = lines.lock().unwrap().last().cloned().unwrap();
        assert!(
            last_line.starts_with(
                "In socialshopwave for engine 7: RESPONSE header is not 200 OK when getting totals, too many retries, break"
            ),
            "{last_line}"
        );

        let outcome = provider.propagate(true).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            "Last error is fatal, skip updating summary: RESPONSE header is not 200 OK"
        );
    }

    #[tokio::test]
    async fn second_run_gets_a_fresh_retry_budget() {
        let mut adapter = ScriptedAdapter::new();
        for _ in 0..6 {
            adapter = adapter.totals(Err(FetchError::Status(500)));
        }
        let adapter = adapter
            .totals(Err(FetchError::Status(500)))
            .totals(totals_page(&[("1", 2, 4.0)], None));
        let (mut provider, calls) = provider_with(ProviderKind::Socialshopwave, adapter).await;

        assert_eq!(provider.fetch_all_totals().await.unwrap(), 0);
        assert_eq!(calls.lock().unwrap().len(), 6);

        assert_eq!(provider.fetch_all_totals().await.unwrap(), 1);
        assert_eq!(calls.lock().unwrap().len(), 8);
        assert_eq!(provider.last_error(), None);
    }

    #[tokio::test]
    async fn clean_rerun_lifts_the_fatal_error_from_an_aborted_run() {
        let mut config = engine_config("socialshopwave");
        config.reviews_hash = Some(String::new());
        let mut adapter = ScriptedAdapter::new();
        for _ in 0..6 {
            adapter = adapter.totals(Err(FetchError::Status(500)));
        }
        let adapter = adapter.totals(totals_page(&[("1", 10, 4.8)], None));
        let (mut provider, _) =
            provider_with_config(ProviderKind::Socialshopwave, config, adapter).await;
        seed_catalog(provider.store(), &[1]).await;

        provider.fetch_all_totals().await.unwrap();
        assert!(provider.governor().is_last_error_fatal());

        assert_eq!(provider.fetch_all_totals().await.unwrap(), 1);
        assert_eq!(provider.last_error(), None);
        let outcome = provider.propagate(false).await.unwrap();
        assert!(outcome.success && outcome.updated, "{}", outcome.message);
        assert_eq!(outcome.message, MSG_UPDATED);
    }

    #[tokio::test]
    async fn review_run_keeps_a_fatal_totals_error() {
        let mut adapter = ScriptedAdapter::new()
            .reviews(Ok(Page::last(vec![review("1", "A", "Good")])));
        for _ in 0..6 {
            adapter = adapter.totals(Err(FetchError::Status(500)));
        }
        let (mut provider, _) = provider_with(ProviderKind::Socialshopwave, adapter).await;

        provider.fetch_all_totals().await.unwrap();
        provider.fetch_all_reviews().await.unwrap();
        assert_eq!(provider.last_error(), Some(ERROR_RESPONSE_HEADER_NOT_OK));
        assert!(!provider.propagate(true).await.unwrap().success);
    }

    #[tokio::test]
    async fn vendor_fatal_message_aborts_immediately() {
        let adapter = ScriptedAdapter::new()
            .totals(Err(FetchError::Vendor(JUDGEME_FATAL.into())))
            .totals(totals_page(&[("1", 1, 5.0)], None));
        let (mut provider, calls) = provider_with(ProviderKind::Judgeme, adapter).await;

        assert_eq!(provider.fetch_all_totals().await.unwrap(), 0);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(provider.last_error(), Some(JUDGEME_FATAL));
        assert!(provider.governor().is_last_error_fatal());
    }

    #[tokio::test]
    async fn malformed_page_is_retried_without_partial_writes() {
        let adapter = ScriptedAdapter::new()
            .totals(totals_page(&[("1", 1, 4.0), ("abc", 1, 4.0)], None))
            .totals(totals_page(&[("1", 1, 4.0)], None));
        let (mut provider, calls) = provider_with(ProviderKind::Socialshopwave, adapter).await;

        assert_eq!(provider.fetch_all_totals().await.unwrap(), 1);
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(provider.store().flush_count(), 1);
    }

    #[tokio::test]
    async fn testing_mode_stops_after_budget() {
        let adapter = ScriptedAdapter::new()
            .totals(totals_page(&[("1", 1, 4.0)], Some(2)))
            .totals(totals_page(&[("2", 1, 4.0)], Some(3)))
            .totals(totals_page(&[("3", 1, 4.0)], None));
        let (mut provider, calls) = provider_with(ProviderKind::Socialshopwave, adapter).await;
        provider.set_testing(Some(1));

        assert_eq!(provider.fetch_all_totals().await.unwrap(), 1);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fresh_run_replaces_previous_rows() {
        let adapter = ScriptedAdapter::new()
            .totals(totals_page(&[("1", 1, 4.0), ("2", 1, 4.0)], None))
            .totals(totals_page(&[("3", 1, 4.0)], None));
        let (mut provider, _) = provider_with(ProviderKind::Socialshopwave, adapter).await;

        provider.fetch_all_totals().await.unwrap();
        provider.fetch_all_totals().await.unwrap();
        let rows = provider.store().all_rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total.product_id(), pid(3));
    }

    #[tokio::test]
    async fn single_total_falls_back_to_one_memoized_full_run() {
        let adapter = ScriptedAdapter::new().totals(totals_page(&[("1", 6, 3.2)], None));
        let (mut provider, calls) = provider_with(ProviderKind::Socialshopwave, adapter).await;

        let one = provider.fetch_one_total(pid(1)).await.unwrap();
        assert_eq!(one.total_reviews(), 6);
        assert_eq!(one.score_tier(), ScoreTier::Three);

        let missing = provider.fetch_one_total(pid(2)).await.unwrap();
        assert_eq!(missing, ReviewTotal::zero(pid(2)));
        assert_eq!(calls.lock().unwrap().as_slice(), ["totals start"]);
    }

    #[tokio::test]
    async fn single_total_uses_lookup_when_supported() {
        let adapter = ScriptedAdapter::new().single(RawTotal::new("5", 3, 4.0));
        let (mut provider, calls) = provider_with(ProviderKind::Socialshopwave, adapter).await;

        let found = provider.fetch_one_total(pid(5)).await.unwrap();
        assert_eq!(found.score_tier(), ScoreTier::Four);
        let unknown = provider.fetch_one_total(pid(6)).await.unwrap();
        assert_eq!(unknown, ReviewTotal::zero(pid(6)));
        assert_eq!(calls.lock().unwrap().as_slice(), ["single 5", "single 6"]);
        assert_eq!(provider.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_lookup_table_gives_zero_without_a_full_run() {
        let adapter = ScriptedAdapter::new()
            .single_lookup()
            .totals(totals_page(&[("9", 4, 4.0)], None));
        let (mut provider, calls) = provider_with(ProviderKind::Socialshopwave, adapter).await;

        let total = provider.fetch_one_total(pid(9)).await.unwrap();
        assert_eq!(total, ReviewTotal::zero(pid(9)));
        assert_eq!(calls.lock().unwrap().as_slice(), ["single 9"]);
    }

    #[tokio::test]
    async fn missing_required_field_is_a_validation_error() {
        let store = memory_store().await;
        let err = ReviewsProvider::new(
            ProviderKind::Judgeme.profile(),
            engine_config("judgeme").with_field("judgeme_domain", " "),
            Box::new(ScriptedAdapter::new()),
            store.clone(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(ref f) if f == "judgeme_domain"));
        assert_eq!(err.to_string(), "Required engine_data field is empty: judgeme_domain");

        assert!(ReviewsProvider::new(
            ProviderKind::Judgeme.profile(),
            engine_config("judgeme"),
            Box::new(ScriptedAdapter::new()),
            store,
            false,
        )
        .is_ok());
    }

    fn review(id: &str, sku: &str, title: &str) -> RawReview {
        RawReview {
            product_id: Some(id.into()),
            sku: Some(sku.into()),
            title: Some(title.into()),
            body: None,
            hidden: false,
        }
    }

    #[tokio::test]
    async fn reviews_sharing_a_sku_are_merged_before_storing() {
        let adapter = ScriptedAdapter::new()
            .reviews(Ok(Page::more(vec![review("100", "X", "Soft")], Cursor::Page(2))))
            .reviews(Ok(Page::more(vec![review("101", "X", "Warm")], Cursor::Page(3))))
            .reviews(Ok(Page::last(Vec::new())));
        let (mut provider, _) = provider_with(ProviderKind::Stampedio, adapter).await;
        provider
            .store()
            .upsert_totals(
                &[ReviewTotal::new(pid(100), 1, 5.0), ReviewTotal::new(pid(101), 1, 4.0)],
                true,
            )
            .await
            .unwrap();

        assert_eq!(provider.fetch_all_reviews().await.unwrap(), 2);
        for id in [100, 101] {
            let row = provider.store().get(pid(id)).await.unwrap().unwrap();
            assert_eq!(row.review_messages, "Soft Warm");
        }
    }

    #[tokio::test]
    async fn aborted_review_run_still_stores_what_it_collected() {
        let mut adapter = ScriptedAdapter::new()
            .reviews(Ok(Page::more(vec![review("1", "A", "Good")], Cursor::Page(2))));
        for _ in 0..6 {
            adapter = adapter.reviews(Err(FetchError::Decode("unexpected eof".into())));
        }
        let (mut provider, _) = provider_with(ProviderKind::Stampedio, adapter).await;
        provider
            .store()
            .upsert_totals(&[ReviewTotal::new(pid(1), 1, 5.0)], true)
            .await
            .unwrap();

        assert_eq!(provider.fetch_all_reviews().await.unwrap(), 1);
        assert_eq!(provider.last_error(), Some("Unable to decode reviews json"));
        let row = provider.store().get(pid(1)).await.unwrap().unwrap();
        assert_eq!(row.review_messages, "Good");
    }

    #[tokio::test]
    async fn connectivity_failures_are_reported_not_raised() {
        let adapter = ScriptedAdapter::new().health(Err(FetchError::Status(401)));
        let (mut provider, _) = provider_with(ProviderKind::Judgeme, adapter).await;
        let lines = capture(&mut provider);

        assert!(!provider.test_connectivity().await);
        assert_eq!(
            lines.lock().unwrap().as_slice(),
            ["In judgeme for engine 7: Connection test failed: unexpected HTTP status 401"]
        );
        assert_eq!(provider.store().count().await.unwrap(), 0);

        let adapter = ScriptedAdapter::new();
        let (mut provider, _) = provider_with(ProviderKind::Judgeme, adapter).await;
        assert!(provider.test_connectivity().await);
        assert_eq!(provider.last_message(), Some("Connection OK"));
    }

    #[tokio::test]
    async fn disabled_propagation_is_reported() {
        let mut config = engine_config("socialshopwave");
        config.allow_propagation = false;
        let (mut provider, _) =
            provider_with_config(ProviderKind::Socialshopwave, config, ScriptedAdapter::new()).await;
        let outcome = provider.propagate(true).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(provider.last_message(), Some("Updating summary is disabled"));
    }
}
