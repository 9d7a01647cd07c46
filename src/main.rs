//! sitesearch - distributed multi-stage website ingestion and indexing
//! pipeline orchestrator.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let default_filter = if sitesearch::cli::is_verbose() {
        "sitesearch=debug,info"
    } else {
        "sitesearch=info,warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    sitesearch::cli::run().await
}
