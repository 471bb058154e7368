use async_trait::async_trait;

use crate::reviews::error::FetchError;
use crate::reviews::types::{Cursor, Page, ProductId, RawReview, RawTotal};

/// Vendor-specific request/response handling. Implementations build requests,
/// decode payloads and extract fields; the engine owns pagination, retries,
/// validation and persistence.
#[async_trait]
pub trait FetchAdapter: Send + Sync {
    async fn next_totals_page(&self, cursor: &Cursor) -> Result<Page<RawTotal>, FetchError>;

    /// Providers without a review-text feed report an empty, exhausted page.
    async fn next_reviews_page(&self, _cursor: &Cursor) -> Result<Page<RawReview>, FetchError> {
        Ok(Page::last(Vec::new()))
    }

    fn supports_single_item(&self) -> bool {
        false
    }

    async fn single_item(&self, _product_id: ProductId) -> Result<Option<RawTotal>, FetchError> {
        Ok(None)
    }

    /// Cheapest request that proves credentials and endpoint work.
    async fn health_check(&self) -> Result<bool, FetchError>;
}
