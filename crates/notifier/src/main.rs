use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use eventline_events::{EventMapper, NotificationService, SinkFanout};
use eventline_infra::consumer::{ConsumerGroupRunner, RunnerConfig};
use eventline_infra::log::KafkaConsumerGroup;
use eventline_infra::schema::{HttpSchemaRegistry, SchemaResolver};
use eventline_infra::PipelineConfig;
use eventline_notifier::BroadcastHub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eventline_observability::init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        brokers = %config.bootstrap_servers(),
        topic = %config.topic,
        group = %config.group_id,
        registry = %config.schema_registry_url,
        "starting notification service"
    );

    let registry = HttpSchemaRegistry::new(&config.schema_registry_url)?;
    let resolver = Arc::new(SchemaResolver::new(Arc::new(registry)));
    let group = KafkaConsumerGroup::new(&config.bootstrap_servers(), &config.group_id)
        .context("failed to create kafka consumer")?;

    let hub = Arc::new(BroadcastHub::default());
    let fanout = SinkFanout::new(config.sink_timeout);
    fanout.register(hub.clone());
    let notifications = Arc::new(NotificationService::new(fanout));

    let runner = Arc::new(ConsumerGroupRunner::new(
        Arc::new(group),
        resolver,
        EventMapper::default(),
        notifications,
        RunnerConfig::new(config.topic.clone()),
    ));

    let shutdown = CancellationToken::new();
    let consumer = runner.spawn(shutdown.clone());

    let app = eventline_notifier::app::build_app(hub.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("failed to bind 0.0.0.0:{}", config.http_port))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let server_stop = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_stop.cancelled().await })
            .await
    });

    // The runner owns signal handling; once it has drained, stop HTTP too.
    let consumed = consumer.wait().await;
    shutdown.cancel();
    hub.close();

    server.await??;
    consumed?;
    tracing::info!("notification service stopped");
    Ok(())
}
