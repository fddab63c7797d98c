use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("coderag_indexer=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    coderag_indexer::cli::run().await
}
