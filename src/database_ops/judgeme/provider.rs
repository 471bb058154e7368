use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{redirect, Client, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::reviews::adapter::FetchAdapter;
use crate::reviews::config::EngineConfig;
use crate::reviews::error::FetchError;
use crate::reviews::types::{Cursor, Page, RawReview, RawTotal};

pub const TOTALS_FEED_URL: &str = "https://judge.me/api/reviews/aggregate_feed";
pub const REVIEWS_FEED_URL: &str = "https://judge.me/api/v1/reviews";

const TIMEOUT_SECS: u64 = 30;

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Judge.me feeds.
///
/// - `GET /api/reviews/aggregate_feed?shop_domain=...` returns every product's
///   totals in one list, so the totals feed is a single page.
/// - `GET /api/v1/reviews?shop_domain=...&api_token=...&per_page=N&page=P`
///   returns review text page by page until `reviews` comes back empty.
///
/// Either endpoint answers `{"error": "..."}` when the shop is misconfigured.
#[derive(Debug, Clone)]
pub struct JudgemeAdapter {
    http: Client,
    health_client: Client,
    totals_url: String,
    reviews_url: String,
    shop_domain: String,
    api_token: Option<String>,
    per_page: usize,
}

impl JudgemeAdapter {
    pub fn new(config: &EngineConfig, per_page: usize) -> Result<Self> {
        let shop_domain = config
            .field("judgeme_domain")
            .ok_or_else(|| anyhow!("judgeme_domain is not configured"))?
            .trim()
            .to_string();
        let http = Client::builder()
            .user_agent(concat!("review-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()?;
        // The connectivity check accepts a redirect as proof of life.
        let health_client = Client::builder()
            .user_agent(concat!("review-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            health_client,
            totals_url: TOTALS_FEED_URL.to_string(),
            reviews_url: REVIEWS_FEED_URL.to_string(),
            shop_domain,
            api_token: config.field("judgeme_api_token").map(str::to_string),
            per_page: per_page.max(1),
        })
    }

    /// Point the adapter at other hosts, e.g. a local mock.
    pub fn with_base_urls(mut self, totals_url: &str, reviews_url: &str) -> Self {
        self.totals_url = totals_url.trim_end_matches('/').to_string();
        self.reviews_url = reviews_url.trim_end_matches('/').to_string();
        self
    }

    fn totals_feed_url(&self) -> Result<Url, FetchError> {
        Url::parse_with_params(&self.totals_url, &[("shop_domain", self.shop_domain.as_str())])
            .map_err(|e| FetchError::Transport(format!("invalid totals url: {e}")))
    }

    fn reviews_feed_url(&self, page: u32) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.reviews_url)
            .map_err(|e| FetchError::Transport(format!("invalid reviews url: {e}")))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("shop_domain", &self.shop_domain);
            if let Some(token) = self.api_token.as_deref() {
                q.append_pair("api_token", token);
            }
            q.append_pair("per_page", &self.per_page.to_string());
            q.append_pair("page", &page.to_string());
        }
        Ok(url)
    }

    async fn get_body(&self, url: Url) -> Result<String, FetchError> {
        let resp = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.without_url().to_string()))?;
        let status = resp.status();
        debug!(target: "reviews::debug", channel = "headers", %status, headers = ?resp.headers());
        if status != StatusCode::OK {
            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 500);
            debug!(target: "reviews::debug", channel = "response", %status, body = %body);
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.without_url().to_string()))?;
        debug!(
            target: "reviews::debug",
            channel = "response",
            bytes = body.len(),
            body = %truncate_for_log(body.clone(), 2000)
        );
        Ok(body)
    }
}

fn value_as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    if let Some(s) = v.as_str() {
        return s.trim().parse::<f64>().ok();
    }
    None
}

fn value_as_i64(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    if let Some(s) = v.as_str() {
        return s.trim().parse::<i64>().ok();
    }
    None
}

fn is_truthy(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty() && s != "0" && s != "false",
        _ => false,
    }
}

fn is_empty_json(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Bool(b) => !b,
        Value::Number(_) => false,
    }
}

fn vendor_error(v: &Value) -> Option<String> {
    v.get("error")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn decode(body: &str) -> Result<Value, FetchError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    if value.is_null() {
        return Err(FetchError::Decode("null document".to_string()));
    }
    if is_empty_json(&value) {
        return Err(FetchError::Empty);
    }
    if let Some(msg) = vendor_error(&value) {
        return Err(FetchError::Vendor(msg));
    }
    Ok(value)
}

/// Parse the aggregate feed. The product id comes from `skus`, falling back
/// to `sku`.
pub fn parse_totals_feed(body: &str) -> Result<Vec<RawTotal>, FetchError> {
    let feed = decode(body)?;
    let rows = feed
        .as_array()
        .ok_or_else(|| FetchError::Malformed("aggregate feed is not a list".to_string()))?;

    rows.iter()
        .map(|row| {
            let product_id = row
                .get("skus")
                .and_then(value_as_string)
                .or_else(|| row.get("sku").and_then(value_as_string))
                .ok_or_else(|| FetchError::Malformed(format!("row without sku: {row}")))?;
            let total_reviews = row
                .get("total_review")
                .and_then(value_as_i64)
                .ok_or_else(|| {
                    FetchError::Malformed(format!("product {product_id}: missing total_review"))
                })?;
            let average_score = row
                .get("review_average")
                .and_then(value_as_f64)
                .ok_or_else(|| {
                    FetchError::Malformed(format!("product {product_id}: missing review_average"))
                })?;
            Ok(RawTotal::new(product_id, total_reviews, average_score))
        })
        .collect()
}

/// Parse one page of the reviews feed. An empty `reviews` list means the feed
/// is done.
pub fn parse_reviews_page(body: &str) -> Result<Vec<RawReview>, FetchError> {
    let feed = decode(body)?;
    let Some(reviews) = feed.get("reviews").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    Ok(reviews
        .iter()
        .map(|r| RawReview {
            product_id: r.get("product_external_id").and_then(value_as_string),
            sku: None,
            title: r.get("title").and_then(Value::as_str).map(str::to_string),
            body: r.get("body").and_then(Value::as_str).map(str::to_string),
            hidden: is_truthy(r.get("hidden")),
        })
        .collect())
}

#[async_trait]
impl FetchAdapter for JudgemeAdapter {
    async fn next_totals_page(&self, _cursor: &Cursor) -> Result<Page<RawTotal>, FetchError> {
        let url = self.totals_feed_url()?;
        debug!(target: "reviews::debug", channel = "request", url = %url);
        let body = self.get_body(url).await?;
        Ok(Page::last(parse_totals_feed(&body)?))
    }

    async fn next_reviews_page(&self, cursor: &Cursor) -> Result<Page<RawReview>, FetchError> {
        let page = match cursor {
            Cursor::Start => 1,
            Cursor::Page(n) => *n,
            Cursor::Token(t) => {
                return Err(FetchError::Malformed(format!("unexpected cursor token {t:?}")))
            }
        };
        let url = self.reviews_feed_url(page)?;
        // The query carries the api token; only the page goes to the log.
        debug!(target: "reviews::debug", channel = "request", feed = "reviews", page);
        let body = self.get_body(url).await?;
        let rows = parse_reviews_page(&body)?;
        if rows.is_empty() {
            return Ok(Page::last(rows));
        }
        Ok(Page::more(rows, Cursor::Page(page + 1)))
    }

    async fn health_check(&self) -> Result<bool, FetchError> {
        let url = self.totals_feed_url()?;
        let resp = self
            .health_client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.without_url().to_string()))?;
        let status = resp.status();
        debug!(target: "reviews::debug", channel = "headers", %status, headers = ?resp.headers());
        Ok(status == StatusCode::OK || status == StatusCode::FOUND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(token: Option<&str>) -> JudgemeAdapter {
        let mut config = EngineConfig::new("3", "judgeme").with_field("judgeme_domain", "shop.example.com");
        if let Some(t) = token {
            config = config.with_field("judgeme_api_token", t);
        }
        JudgemeAdapter::new(&config, 10).unwrap()
    }

    #[test]
    fn requires_a_shop_domain() {
        let config = EngineConfig::new("3", "judgeme");
        assert!(JudgemeAdapter::new(&config, 10).is_err());
    }

    #[test]
    fn builds_feed_urls() {
        let a = adapter(Some("s3cr3t"));
        assert_eq!(
            a.totals_feed_url().unwrap().as_str(),
            "https://judge.me/api/reviews/aggregate_feed?shop_domain=shop.example.com"
        );
        assert_eq!(
            a.reviews_feed_url(2).unwrap().as_str(),
            "https://judge.me/api/v1/reviews?shop_domain=shop.example.com&api_token=s3cr3t&per_page=10&page=2"
        );
        let anonymous = adapter(None).reviews_feed_url(1).unwrap();
        assert!(!anonymous.as_str().contains("api_token"));
    }

    #[test]
    fn base_urls_can_point_at_another_host() {
        let a = adapter(None).with_base_urls(
            "http://127.0.0.1:8080/aggregate_feed/",
            "http://127.0.0.1:8080/reviews",
        );
        assert_eq!(
            a.totals_feed_url().unwrap().as_str(),
            "http://127.0.0.1:8080/aggregate_feed?shop_domain=shop.example.com"
        );
        assert_eq!(
            a.reviews_feed_url(1).unwrap().as_str(),
            "http://127.0.0.1:8080/reviews?shop_domain=shop.example.com&per_page=10&page=1"
        );
    }

    #[test]
    fn parses_aggregate_feed_rows() {
        let body = r#"[
            {"skus": "101", "sku": "ignored", "total_review": 4, "review_average": 4.5},
            {"sku": 202, "total_review": "2", "review_average": "3.25"}
        ]"#;
        let rows = parse_totals_feed(body).unwrap();
        assert_eq!(
            rows,
            vec![RawTotal::new("101", 4, 4.5), RawTotal::new("202", 2, 3.25)]
        );
    }

    #[test]
    fn maps_feed_failures() {
        assert!(matches!(parse_totals_feed("<html>"), Err(FetchError::Decode(_))));
        assert!(matches!(parse_totals_feed("null"), Err(FetchError::Decode(_))));
        assert_eq!(parse_totals_feed("[]"), Err(FetchError::Empty));
        assert_eq!(
            parse_totals_feed(r#"{"error": "Shop does not enable review aggregate feed."}"#),
            Err(FetchError::Vendor(
                "Shop does not enable review aggregate feed.".to_string()
            ))
        );
        assert!(matches!(
            parse_totals_feed(r#"[{"total_review": 1, "review_average": 5}]"#),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn parses_review_pages() {
        let body = r#"{"current_page": 1, "reviews": [
            {"product_external_id": 77, "title": "Great", "body": "Love it", "hidden": false},
            {"product_external_id": null, "title": "Orphan", "body": "x"},
            {"product_external_id": "78", "title": "Spam", "body": "y", "hidden": true}
        ]}"#;
        let rows = parse_reviews_page(body).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].product_id.as_deref(), Some("77"));
        assert_eq!(rows[0].title.as_deref(), Some("Great"));
        assert_eq!(rows[1].product_id, None);
        assert!(rows[2].hidden);

        assert!(parse_reviews_page(r#"{"current_page": 9, "reviews": []}"#)
            .unwrap()
            .is_empty());
        assert_eq!(parse_reviews_page("{}"), Err(FetchError::Empty));
    }
}
