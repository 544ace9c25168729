use pubsub_aggregator::app::{open_store, Aggregator};
use pubsub_aggregator::config::Settings;
use pubsub_aggregator::executor::registry::ProcessorRegistry;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pubsub_aggregator=info,tower_http=info")),
        )
        .init();

    // 1. Configuration:
    let settings = Settings::from_env()?;

    // 2. Store:
    let store = open_store(&settings).await?;

    // 3. Processing step. Topic-specific processors go here; everything else
    //    is acknowledged as done.
    let registry = ProcessorRegistry::new();
    registry.set_fallback(|event| async move {
        tracing::trace!(topic = %event.topic, event_id = %event.event_id, "acknowledged");
        Ok(())
    });

    // 4. Workers + reclaimer:
    let aggregator = Aggregator::start(
        store,
        registry,
        settings.executor_config(),
        settings.max_publish_batch,
    );

    // 5. HTTP server:
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    tracing::info!("HTTP server listening on {}", settings.bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, aggregator.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining workers");
    aggregator.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
