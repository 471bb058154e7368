use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::reviews::diagnostics::DebugSelection;
use crate::reviews::error::ProviderError;
use crate::reviews::registry::ProviderKind;
use crate::util::env as env_util;

pub const MAX_RETRIES: u32 = 5;
pub const RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            delay: RETRY_DELAY,
        }
    }
}

/// Per-run switches coming from the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Stop each paginated operation after this many processed pages.
    pub testing: Option<u32>,
    pub force: bool,
    pub debug: DebugSelection,
}

/// Table names used by the summary store and the propagator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub reviews_table: String,
    pub catalog_table: String,
    pub engines_table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reviews_table: "received_reviews".into(),
            catalog_table: "product_summary".into(),
            engines_table: "engines_extra".into(),
        }
    }
}

impl StoreConfig {
    /// Table names are interpolated into SQL, so only `[A-Za-z0-9_]` is allowed.
    pub fn validate(&self) -> Result<(), ProviderError> {
        for name in [&self.reviews_table, &self.catalog_table, &self.engines_table] {
            let valid = !name.is_empty()
                && !name.starts_with(|c: char| c.is_ascii_digit())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(ProviderError::InvalidIdentifier(name.clone()));
            }
        }
        Ok(())
    }
}

/// Everything an engine run needs from the outside world. Built once and moved
/// into the provider; nothing outside the owning run mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub engine_id: String,
    pub provider: String,
    pub fields: BTreeMap<String, String>,
    /// Fingerprint stored after the last successful propagation.
    pub reviews_hash: Option<String>,
    pub allow_propagation: bool,
    pub options: RunOptions,
    pub retry: RetryPolicy,
    pub store: StoreConfig,
}

impl EngineConfig {
    pub fn new(engine_id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            engine_id: engine_id.into(),
            provider: provider.into(),
            fields: BTreeMap::new(),
            reviews_hash: None,
            allow_propagation: true,
            options: RunOptions::default(),
            retry: RetryPolicy::default(),
            store: StoreConfig::default(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Field value, treating blank strings as absent.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn missing_fields<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|k| self.field(k).is_none())
            .collect()
    }

    /// Build the configuration from `REVIEWS_*` environment variables.
    ///
    /// Provider fields are read from the upper-cased field name, e.g.
    /// `judgeme_domain` comes from `JUDGEME_DOMAIN`.
    pub fn from_env() -> Result<Self> {
        env_util::init_env();
        let provider = env_util::env_req("REVIEWS_PROVIDER")?;
        let kind: ProviderKind = provider.parse()?;
        let engine_id = env_util::env_req("REVIEWS_ENGINE_ID")?;

        let mut config = Self::new(engine_id, kind.name());
        let profile = kind.profile();
        for key in profile
            .required_fields
            .iter()
            .chain(profile.optional_fields.iter())
        {
            if let Some(value) = env_util::env_opt(&key.to_ascii_uppercase()) {
                config.fields.insert((*key).to_string(), value);
            }
        }

        config.reviews_hash = env_util::env_opt("REVIEWS_HASH");
        config.allow_propagation = env_util::env_flag("REVIEWS_ALLOW_PROPAGATION", true);
        config.options.testing = env_util::env_parse_opt("REVIEWS_TESTING");
        config.options.force = env_util::env_flag("REVIEWS_FORCE", false);
        if let Some(raw) = env_util::env_opt("REVIEWS_DEBUG") {
            config.options.debug = raw.parse().context("REVIEWS_DEBUG")?;
        }
        config.retry.max_retries = env_util::env_parse("REVIEWS_MAX_RETRIES", MAX_RETRIES);
        config.retry.delay = Duration::from_secs(env_util::env_parse(
            "REVIEWS_RETRY_DELAY_SECS",
            RETRY_DELAY.as_secs(),
        ));
        if let Some(t) = env_util::env_opt("REVIEWS_TABLE") {
            config.store.reviews_table = t;
        }
        if let Some(t) = env_util::env_opt("REVIEWS_CATALOG_TABLE") {
            config.store.catalog_table = t;
        }
        if let Some(t) = env_util::env_opt("REVIEWS_ENGINES_TABLE") {
            config.store.engines_table = t;
        }
        config.store.validate()?;

        info!(
            target = "config",
            engine_id = %config.engine_id,
            provider = %config.provider,
            fields = config.fields.len(),
            testing = ?config.options.testing,
            "engine configuration loaded"
        );
        Ok(config)
    }
}
