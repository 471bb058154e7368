//! Shared fixtures for unit tests: an in-memory store and a scripted adapter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::database_ops::summary_store::SummaryStore;
use crate::reviews::adapter::FetchAdapter;
use crate::reviews::config::{EngineConfig, StoreConfig};
use crate::reviews::error::FetchError;
use crate::reviews::types::{Cursor, Page, ProductId, RawReview, RawTotal};
use crate::util::db::Db;

pub fn pid(n: i64) -> ProductId {
    ProductId::new(n).unwrap()
}

pub async fn memory_store() -> SummaryStore {
    let db = Db::in_memory().await.unwrap();
    let tables = StoreConfig::default();
    db.create_tables(&tables).await.unwrap();
    SummaryStore::new(&db, tables).unwrap()
}

/// Insert empty catalog rows for the given ids.
pub async fn seed_catalog(store: &SummaryStore, ids: &[i64]) {
    for id in ids {
        sqlx::query("INSERT INTO product_summary (product_id) VALUES (?)")
            .bind(id)
            .execute(store.pool())
            .await
            .unwrap();
    }
}

/// Engine config with retry waits disabled.
pub fn engine_config(provider: &str) -> EngineConfig {
    let mut config = EngineConfig::new("7", provider);
    config.retry.delay = Duration::ZERO;
    config
}

type Script<T> = Mutex<VecDeque<Result<Page<T>, FetchError>>>;

/// Adapter that replays queued responses and records the cursors it saw.
/// Running out of script yields an exhausted empty page.
#[derive(Default)]
pub struct ScriptedAdapter {
    totals: Script<RawTotal>,
    reviews: Script<RawReview>,
    singles: Option<HashMap<i64, RawTotal>>,
    healthy: Option<Result<bool, FetchError>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(self, page: Result<Page<RawTotal>, FetchError>) -> Self {
        self.totals.lock().unwrap().push_back(page);
        self
    }

    pub fn reviews(self, page: Result<Page<RawReview>, FetchError>) -> Self {
        self.reviews.lock().unwrap().push_back(page);
        self
    }

    pub fn single(mut self, row: RawTotal) -> Self {
        let id = row.product_id.parse().unwrap();
        self.singles.get_or_insert_with(HashMap::new).insert(id, row);
        self
    }

    pub fn single_lookup(mut self) -> Self {
        self.singles.get_or_insert_with(HashMap::new);
        self
    }

    pub fn health(mut self, result: Result<bool, FetchError>) -> Self {
        self.healthy = Some(result);
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl FetchAdapter for ScriptedAdapter {
    async fn next_totals_page(&self, cursor: &Cursor) -> Result<Page<RawTotal>, FetchError> {
        self.record(format!("totals {cursor}"));
        self.totals
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Page::last(Vec::new())))
    }

    async fn next_reviews_page(&self, cursor: &Cursor) -> Result<Page<RawReview>, FetchError> {
        self.record(format!("reviews {cursor}"));
        self.reviews
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Page::last(Vec::new())))
    }

    fn supports_single_item(&self) -> bool {
        self.singles.is_some()
    }

    async fn single_item(&self, product_id: ProductId) -> Result<Option<RawTotal>, FetchError> {
        self.record(format!("single {product_id}"));
        Ok(self
            .singles
            .as_ref()
            .and_then(|m| m.get(&product_id.get()).cloned()))
    }

    async fn health_check(&self) -> Result<bool, FetchError> {
        self.record("health".to_string());
        self.healthy.clone().unwrap_or(Ok(true))
    }
}
