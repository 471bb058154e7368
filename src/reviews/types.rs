use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical product identifier: a non-negative integer that fits the
/// `INTEGER` primary key of the summary table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid product id: {0:?}")]
pub struct InvalidProductId(pub String);

impl ProductId {
    pub fn new(id: i64) -> Result<Self, InvalidProductId> {
        if id < 0 {
            return Err(InvalidProductId(id.to_string()));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl FromStr for ProductId {
    type Err = InvalidProductId;

    /// Only plain base-10 digits are accepted; vendors sending `"12a"`,
    /// `"+12"` or `"1.0"` are rejected instead of coerced.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidProductId(raw.to_string()));
        }
        trimmed
            .parse::<i64>()
            .map(Self)
            .map_err(|_| InvalidProductId(raw.to_string()))
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pagination state handed back and forth between the engine and an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Cursor {
    #[default]
    Start,
    Page(u32),
    Token(String),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Start => write!(f, "start"),
            Cursor::Page(n) => write!(f, "page {n}"),
            Cursor::Token(t) => write!(f, "token {t}"),
        }
    }
}

/// One adapter response: the rows, where to continue, and whether the feed ended.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub next: Cursor,
    pub exhausted: bool,
}

impl<T> Page<T> {
    pub fn more(rows: Vec<T>, next: Cursor) -> Self {
        Self {
            rows,
            next,
            exhausted: false,
        }
    }

    pub fn last(rows: Vec<T>) -> Self {
        Self {
            rows,
            next: Cursor::Start,
            exhausted: true,
        }
    }
}

/// Vendor totals row after field extraction but before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTotal {
    pub product_id: String,
    pub total_reviews: i64,
    pub average_score: f64,
}

impl RawTotal {
    pub fn new(product_id: impl Into<String>, total_reviews: i64, average_score: f64) -> Self {
        Self {
            product_id: product_id.into(),
            total_reviews,
            average_score,
        }
    }
}

/// Vendor review row after field extraction but before validation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawReview {
    pub product_id: Option<String>,
    pub sku: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReviewMessage {
    pub title: Option<String>,
    pub body: Option<String>,
}

impl ReviewMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            body: Some(body.into()),
        }
    }

    /// Title and body joined by a space, skipping blank parts.
    pub fn joined(&self) -> String {
        [self.title.as_deref(), self.body.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
