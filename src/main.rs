use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use review_sync::database_ops::propagate::stored_fingerprint;
use review_sync::reviews::diagnostics::DebugSelection;
use review_sync::reviews::registry::{self, ProviderKind};
use review_sync::tracing::{default_filter, init_tracing};
use review_sync::util::db::Db;
use review_sync::util::env as env_util;
use review_sync::{EngineConfig, ProductId, ReviewsProvider, SummaryStore};
use serde_json::{json, Value};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "review-sync", version, about = "Sync product review totals from a review provider")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Stop each paginated fetch after N pages
    #[arg(long, global = true)]
    testing: Option<u32>,
    /// Debug channels: ALL or a comma list of request,response,headers,products,product
    #[arg(long, global = true)]
    debug: Option<DebugSelection>,
    /// Print a JSON report on stdout instead of plain lines
    #[arg(long, global = true)]
    json: bool,
    /// Override REVIEWS_DATABASE_URL / DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,
    /// Skip the required engine field check
    #[arg(long, global = true)]
    no_check: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List supported providers and their required fields
    Providers,
    /// Create the review tables if missing
    InitDb,
    /// Check the provider endpoint without touching the database
    TestConnect,
    /// Fetch all review totals
    Totals {
        /// Propagate into the catalog afterwards
        #[arg(long)]
        update: bool,
        /// Propagate even if the fingerprint did not change
        #[arg(long)]
        force: bool,
    },
    /// Fetch review text and attach it to stored totals
    Reviews,
    /// Totals for a single product
    Product { id: ProductId },
    /// Copy stored totals into the catalog table
    Propagate {
        #[arg(long)]
        force: bool,
    },
    /// Print the fingerprint of the stored totals
    Fingerprint,
}

/// Accumulates what a command produced for the final report.
struct Report {
    json: bool,
    fields: serde_json::Map<String, Value>,
}

impl Report {
    fn new(json: bool, command: &str) -> Self {
        let mut fields = serde_json::Map::new();
        fields.insert("command".into(), json!(command));
        Self { json, fields }
    }

    fn set(&mut self, key: &str, value: Value) {
        if !self.json {
            match &value {
                Value::String(s) => println!("{key}: {s}"),
                other => println!("{key}: {other}"),
            }
        }
        self.fields.insert(key.to_string(), value);
    }

    fn finish(mut self, provider: Option<&ReviewsProvider>, messages: &[String]) -> Result<()> {
        if let Some(p) = provider {
            self.fields.insert("last_error".into(), json!(p.last_error()));
            self.fields.insert("last_message".into(), json!(p.last_message()));
        }
        if self.json {
            self.fields.insert("messages".into(), json!(messages));
            println!("{}", serde_json::to_string_pretty(&Value::Object(self.fields))?);
        } else if let Some(p) = provider {
            if let Some(err) = p.last_error() {
                println!("last_error: {err}");
            }
        }
        Ok(())
    }
}

fn print_providers(json_out: bool) -> Result<()> {
    let rows: Vec<Value> = ProviderKind::ALL
        .iter()
        .map(|kind| {
            let p = kind.profile();
            json!({
                "name": kind.name(),
                "required_fields": p.required_fields,
                "optional_fields": p.optional_fields,
                "fatal_errors": p.fatal_errors,
                "skip_hash_check": p.skip_hash_check,
                "adapter": matches!(kind, ProviderKind::Judgeme),
            })
        })
        .collect();
    if json_out {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for kind in ProviderKind::ALL {
        let p = kind.profile();
        println!("{:<16} {}", kind.name(), p.required_fields.join(", "));
    }
    Ok(())
}

async fn open_store(cli: &Cli, config: &EngineConfig) -> Result<SummaryStore> {
    let url = cli
        .global
        .database_url
        .clone()
        .unwrap_or_else(env_util::db_url);
    let max_conns: u32 = env_util::env_parse("DB_MAX_CONNS", 4);
    let db = Db::connect(&url, max_conns)
        .await
        .context("Db::connect failed")?;
    db.create_tables(&config.store).await?;
    Ok(SummaryStore::new(&db, config.store.clone())?)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_util::init_env();
    let cli = Cli::parse();
    init_tracing(default_filter(cli.global.debug.is_some()))?;

    if let Command::Providers = cli.command {
        print_providers(cli.global.json)?;
        return Ok(ExitCode::SUCCESS);
    }

    env_util::preflight_check(
        "review-sync",
        &["REVIEWS_PROVIDER", "REVIEWS_ENGINE_ID"],
        &[
            "REVIEWS_PROVIDER",
            "REVIEWS_ENGINE_ID",
            "REVIEWS_DATABASE_URL",
            "DATABASE_URL",
            "REVIEWS_ALLOW_PROPAGATION",
            "REVIEWS_TESTING",
            "REVIEWS_DEBUG",
        ],
    )?;
    let mut config = EngineConfig::from_env()?;
    if cli.global.testing.is_some() {
        config.options.testing = cli.global.testing;
    }
    if let Some(debug) = cli.global.debug.clone() {
        config.options.debug = debug;
    }

    let store = open_store(&cli, &config).await?;
    if let Command::InitDb = cli.command {
        let mut report = Report::new(cli.global.json, "init-db");
        report.set("tables", json!([
            config.store.reviews_table,
            config.store.catalog_table,
            config.store.engines_table,
        ]));
        report.finish(None, &[])?;
        return Ok(ExitCode::SUCCESS);
    }
    if config.reviews_hash.is_none() {
        config.reviews_hash = stored_fingerprint(&store, &config.engine_id).await?;
    }

    let kind: ProviderKind = config.provider.parse()?;
    let adapter = registry::adapter_for(kind, &config)?;
    let mut provider = registry::load(config, adapter, store, !cli.global.no_check)?;

    let messages = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = messages.clone();
    let json_out = cli.global.json;
    provider.set_log_sink(Box::new(move |m| {
        if !json_out {
            eprintln!("{m}");
        }
        if let Ok(mut lines) = sink.lock() {
            lines.push(m.to_string());
        }
    }));

    let mut ok = true;
    let mut report;
    match cli.command {
        Command::Providers | Command::InitDb => return Ok(ExitCode::SUCCESS),
        Command::TestConnect => {
            report = Report::new(json_out, "test-connect");
            ok = provider.test_connectivity().await;
            report.set("connected", json!(ok));
        }
        Command::Totals { update, force } => {
            report = Report::new(json_out, "totals");
            let count = provider.fetch_all_totals().await?;
            report.set("totals", json!(count));
            if update {
                let outcome = provider.propagate(force).await?;
                ok = outcome.success;
                report.set("propagation", serde_json::to_value(&outcome)?);
            }
        }
        Command::Reviews => {
            report = Report::new(json_out, "reviews");
            let count = provider.fetch_all_reviews().await?;
            report.set("reviews", json!(count));
        }
        Command::Product { id } => {
            report = Report::new(json_out, "product");
            let total = provider.fetch_one_total(id).await?;
            report.set("product", serde_json::to_value(&total)?);
        }
        Command::Propagate { force } => {
            report = Report::new(json_out, "propagate");
            let outcome = provider.propagate(force).await?;
            ok = outcome.success;
            report.set("propagation", serde_json::to_value(&outcome)?);
        }
        Command::Fingerprint => {
            report = Report::new(json_out, "fingerprint");
            report.set("fingerprint", json!(provider.fingerprint().await?));
            report.set("stored", json!(provider.config().reviews_hash));
        }
    }

    let lines = messages.lock().map(|l| l.clone()).unwrap_or_default();
    report.finish(Some(&provider), &lines)?;
    if ok {
        info!(engine_id = %provider.config().engine_id, "done");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(engine_id = %provider.config().engine_id, "finished with failures");
        Ok(ExitCode::FAILURE)
    }
}
