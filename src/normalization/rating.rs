use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::reviews::error::FetchError;
use crate::reviews::types::{ProductId, RawTotal};

/// Discrete star bucket derived from an average score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScoreTier {
    #[default]
    #[serde(rename = "nostar")]
    None,
    #[serde(rename = "onestar")]
    One,
    #[serde(rename = "twostar")]
    Two,
    #[serde(rename = "threestar")]
    Three,
    #[serde(rename = "fourstar")]
    Four,
    #[serde(rename = "fivestar")]
    Five,
}

impl ScoreTier {
    /// Low side open, high side closed. The top bucket reaches 5.1 to absorb
    /// vendor rounding above 5.0.
    pub fn classify(score: f64) -> Self {
        if 0.0 < score && score <= 1.75 {
            ScoreTier::One
        } else if 1.75 < score && score <= 2.75 {
            ScoreTier::Two
        } else if 2.75 < score && score <= 3.75 {
            ScoreTier::Three
        } else if 3.75 < score && score <= 4.75 {
            ScoreTier::Four
        } else if 4.75 < score && score <= 5.1 {
            ScoreTier::Five
        } else {
            ScoreTier::None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScoreTier::None => "nostar",
            ScoreTier::One => "onestar",
            ScoreTier::Two => "twostar",
            ScoreTier::Three => "threestar",
            ScoreTier::Four => "fourstar",
            ScoreTier::Five => "fivestar",
        }
    }
}

impl FromStr for ScoreTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nostar" => Ok(ScoreTier::None),
            "onestar" => Ok(ScoreTier::One),
            "twostar" => Ok(ScoreTier::Two),
            "threestar" => Ok(ScoreTier::Three),
            "fourstar" => Ok(ScoreTier::Four),
            "fivestar" => Ok(ScoreTier::Five),
            other => Err(format!("unknown score tier {other:?}")),
        }
    }
}

impl fmt::Display for ScoreTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized aggregate for one product. The tier is derived at construction
/// and there is no way to set it independently of the score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewTotal {
    product_id: ProductId,
    total_reviews: u32,
    average_score: f64,
    score_tier: ScoreTier,
}

impl ReviewTotal {
    pub fn new(product_id: ProductId, total_reviews: u32, average_score: f64) -> Self {
        Self {
            product_id,
            total_reviews,
            average_score,
            score_tier: ScoreTier::classify(average_score),
        }
    }

    /// Zero totals for a product nobody reported on.
    pub fn zero(product_id: ProductId) -> Self {
        Self::new(product_id, 0, 0.0)
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn total_reviews(&self) -> u32 {
        self.total_reviews
    }

    pub fn average_score(&self) -> f64 {
        self.average_score
    }

    pub fn score_tier(&self) -> ScoreTier {
        self.score_tier
    }
}

fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

/// Validate one raw totals row.
pub fn normalize_total(raw: &RawTotal) -> Result<ReviewTotal, FetchError> {
    let product_id: ProductId = raw
        .product_id
        .parse()
        .map_err(|e| FetchError::Malformed(format!("{e}")))?;
    let total_reviews = u32::try_from(raw.total_reviews).map_err(|_| {
        FetchError::Malformed(format!(
            "product {product_id}: total reviews {} out of range",
            raw.total_reviews
        ))
    })?;
    if !raw.average_score.is_finite() || raw.average_score < 0.0 {
        return Err(FetchError::Malformed(format!(
            "product {product_id}: average score {} is not a non-negative number",
            raw.average_score
        )));
    }
    Ok(ReviewTotal::new(
        product_id,
        total_reviews,
        round_score(raw.average_score),
    ))
}

/// Validate a page of raw totals. Any non-conforming row fails the whole page;
/// a repeated product id keeps the last reported values.
pub fn normalize_totals(rows: &[RawTotal]) -> Result<Vec<ReviewTotal>, FetchError> {
    let mut out: IndexMap<ProductId, ReviewTotal> = IndexMap::with_capacity(rows.len());
    for raw in rows {
        let total = normalize_total(raw)?;
        out.insert(total.product_id(), total);
    }
    Ok(out.into_values().collect())
}
