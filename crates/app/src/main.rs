use std::sync::Arc;

use anyhow::Context;
use tokio_stream::StreamExt;

use stockroom_app::build_mediator;
use stockroom_infra::{AppConfig, BroadcastNotifier, OutboxDispatcher, PostgresStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockroom_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let notifier = Arc::new(BroadcastNotifier::new(config.realtime_channel_capacity));
    let mediator = Arc::new(build_mediator(notifier.clone()));

    // Stand-in for the client hub: echo every realtime push into the log.
    let mut realtime = Box::pin(notifier.subscribe());
    tokio::spawn(async move {
        while let Some(message) = realtime.next().await {
            tracing::info!(method = %message.method, payload = %message.payload, "realtime push");
        }
    });

    let database_url = config
        .require_database_url()
        .context("the outbox worker needs a database")?;
    let store = PostgresStore::connect(database_url)
        .await
        .context("failed to connect to postgres")?;
    store.migrate().await.context("failed to apply schema")?;

    let dispatcher =
        Arc::new(OutboxDispatcher::new(store, mediator, config.outbox.clone())).spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutting down");
    let stats = dispatcher.stats();
    dispatcher.shutdown().await;
    tracing::info!(
        cycles = stats.cycles,
        processed = stats.processed,
        dead_lettered = stats.dead_lettered,
        "outbox dispatcher summary"
    );

    Ok(())
}
