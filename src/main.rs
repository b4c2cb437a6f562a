use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use skills_index::{Config, Context, EsClient, RebuildJob, SqliteStore};

/// Rebuild the search index from the relational store.
///
/// Configuration is read from the file named by `SKILLS_INDEX_CONFIG`
/// (default `config/default.yaml`) plus `ES_HOST`, `SQLITE_PATH`,
/// `ES_MAX_BULK_SIZE` and `ES_MAX_BATCH_SIZE`.
#[derive(Parser, Debug)]
#[command(name = "skills-index-rebuild")]
#[command(version, about = "Delete and repopulate the skills search index")]
struct Cli {}

async fn run() -> skills_index::Result<()> {
    let config = Config::load()?;
    tracing::info!(
        database = %config.database.path.display(),
        es = %config.es.host,
        "starting index rebuild"
    );

    let store = Arc::new(SqliteStore::open(&config.database.path)?);
    let index = Arc::new(EsClient::new(&config.es.host)?);
    let ctx = Context::new(store, index, config)?;

    let report = RebuildJob::new(ctx).run().await?;
    if report.has_failures() {
        tracing::warn!("index rebuild finished with per-type failures, see log above");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let _cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "index rebuild aborted");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
