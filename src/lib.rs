pub mod database_ops;
pub mod normalization;
pub mod reviews;
pub mod tracing;

pub mod util {
    pub mod db;
    pub mod env;
}

#[cfg(test)]
pub(crate) mod test_support;

pub use database_ops::propagate::{fingerprint, PropagationOutcome};
pub use database_ops::summary_store::{PersistedSummaryRow, SummaryStore};
pub use normalization::rating::{ReviewTotal, ScoreTier};
pub use reviews::adapter::FetchAdapter;
pub use reviews::config::EngineConfig;
pub use reviews::error::{FetchError, ProviderError};
pub use reviews::provider::ReviewsProvider;
pub use reviews::registry::ProviderKind;
pub use reviews::types::{Cursor, Page, ProductId, RawReview, RawTotal, ReviewMessage};
