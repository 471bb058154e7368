//! Closed set of supported review providers and their static profiles.

use std::fmt;
use std::str::FromStr;

use crate::database_ops::judgeme::provider::JudgemeAdapter;
use crate::database_ops::summary_store::SummaryStore;
use crate::reviews::adapter::FetchAdapter;
use crate::reviews::config::EngineConfig;
use crate::reviews::error::ProviderError;
use crate::reviews::provider::ReviewsProvider;
use crate::reviews::retry::FatalErrorSet;

const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Alireviews,
    Conversio,
    Internal,
    Judgeme,
    LooxReviews,
    Okendo,
    ProductReviews,
    Rivyo,
    Shopperapproved,
    Socialshopwave,
    Stampedio,
    Yotpo,
    YotpoV2,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 13] = [
        ProviderKind::Alireviews,
        ProviderKind::Conversio,
        ProviderKind::Internal,
        ProviderKind::Judgeme,
        ProviderKind::LooxReviews,
        ProviderKind::Okendo,
        ProviderKind::ProductReviews,
        ProviderKind::Rivyo,
        ProviderKind::Shopperapproved,
        ProviderKind::Socialshopwave,
        ProviderKind::Stampedio,
        ProviderKind::Yotpo,
        ProviderKind::YotpoV2,
    ];

    /// Name as stored in engine configuration.
    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::Alireviews => "alireviews",
            ProviderKind::Conversio => "conversio",
            ProviderKind::Internal => "internal",
            ProviderKind::Judgeme => "judgeme",
            ProviderKind::LooxReviews => "loox_reviews",
            ProviderKind::Okendo => "okendo",
            ProviderKind::ProductReviews => "product_reviews",
            ProviderKind::Rivyo => "rivyo",
            ProviderKind::Shopperapproved => "shopperapproved",
            ProviderKind::Socialshopwave => "socialshopwave",
            ProviderKind::Stampedio => "stampedio",
            ProviderKind::Yotpo => "yotpo",
            ProviderKind::YotpoV2 => "yotpo_v2",
        }
    }

    pub fn profile(self) -> ProviderProfile {
        let base = ProviderProfile {
            kind: self,
            required_fields: &[],
            optional_fields: &[],
            fatal_errors: &[],
            skip_hash_check: false,
            page_size: DEFAULT_PAGE_SIZE,
        };
        match self {
            ProviderKind::Alireviews => ProviderProfile {
                required_fields: &["shopify_access_token", "name"],
                fatal_errors: &["Cannot find review"],
                page_size: 100,
                ..base
            },
            ProviderKind::Conversio => ProviderProfile {
                required_fields: &["conversio_api_key"],
                ..base
            },
            ProviderKind::Internal => ProviderProfile {
                skip_hash_check: true,
                ..base
            },
            ProviderKind::Judgeme => ProviderProfile {
                required_fields: &["judgeme_domain"],
                optional_fields: &["judgeme_api_token"],
                fatal_errors: &["Shop does not enable review aggregate feed."],
                page_size: 10,
                ..base
            },
            ProviderKind::LooxReviews => ProviderProfile {
                required_fields: &["shopify_access_token"],
                fatal_errors: &["Unavailable Shop", "Invalid API key or access token"],
                ..base
            },
            ProviderKind::Okendo => ProviderProfile {
                required_fields: &["okendo_user_id"],
                ..base
            },
            ProviderKind::ProductReviews => ProviderProfile {
                required_fields: &["shopify_access_token"],
                fatal_errors: &["Unavailable Shop", "This store is unavailable"],
                ..base
            },
            ProviderKind::Rivyo => ProviderProfile {
                required_fields: &["shopify_access_token"],
                fatal_errors: &["Invalid Store Name or access denied."],
                page_size: 100,
                ..base
            },
            ProviderKind::Shopperapproved => ProviderProfile {
                required_fields: &["shopperapproved_site_id", "shopperapproved_token"],
                ..base
            },
            ProviderKind::Socialshopwave => ProviderProfile {
                optional_fields: &["name"],
                ..base
            },
            ProviderKind::Stampedio => ProviderProfile {
                required_fields: &[
                    "stampedio_client_id",
                    "stampedio_secret_key",
                    "stampedio_domain",
                ],
                page_size: 32,
                ..base
            },
            ProviderKind::Yotpo => ProviderProfile {
                required_fields: &["yotpo_api_key", "yotpo_api_secret"],
                page_size: 100,
                ..base
            },
            ProviderKind::YotpoV2 => ProviderProfile {
                required_fields: &["yotpo_v2_account_id", "yotpo_v2_access_token"],
                page_size: 200,
                ..base
            },
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| ProviderError::UnknownProvider(s.to_string()))
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static facts about one provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderProfile {
    pub kind: ProviderKind,
    pub required_fields: &'static [&'static str],
    pub optional_fields: &'static [&'static str],
    pub fatal_errors: &'static [&'static str],
    /// Providers whose summary must be propagated on every run.
    pub skip_hash_check: bool,
    pub page_size: usize,
}

impl ProviderProfile {
    pub fn fatal_error_set(&self) -> FatalErrorSet {
        FatalErrorSet::with_provider(self.fatal_errors)
    }
}

/// Resolve `config.provider` and build a provider around the given adapter.
///
/// With `check_required` unset the required-field checklist is skipped, which
/// lets operators check a half-configured engine.
pub fn load(
    config: EngineConfig,
    adapter: Box<dyn FetchAdapter>,
    store: SummaryStore,
    check_required: bool,
) -> Result<ReviewsProvider, ProviderError> {
    let kind: ProviderKind = config.provider.parse()?;
    ReviewsProvider::new(kind.profile(), config, adapter, store, check_required)
}

/// HTTP adapter for the providers this crate ships one for.
pub fn adapter_for(
    kind: ProviderKind,
    config: &EngineConfig,
) -> Result<Box<dyn FetchAdapter>, ProviderError> {
    match kind {
        ProviderKind::Judgeme => {
            let adapter = JudgemeAdapter::new(config, kind.profile().page_size)
                .map_err(|e| ProviderError::AdapterUnavailable(format!("{kind}: {e}")))?;
            Ok(Box::new(adapter))
        }
        other => Err(ProviderError::AdapterUnavailable(other.to_string())),
    }
}
