use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

/// Sets up the global tracing subscriber with a fmt formatter and env filter.
///
/// The caller provides a fallback filter string that is used when `RUST_LOG` is
/// not set. Output goes to stderr so `--json` results on stdout stay clean.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

/// Default filter for the CLI: engine messages at `warn`, run summaries at
/// `info`, per-channel debug output only when asked for.
pub fn default_filter(debug: bool) -> &'static str {
    if debug {
        "info,review_sync=debug,reviews=info,reviews::debug=debug,sqlx=warn"
    } else {
        "warn,review_sync=info,reviews=info,sqlx=warn"
    }
}
