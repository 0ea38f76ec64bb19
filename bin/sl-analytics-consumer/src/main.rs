//! Analytics consumer process
//!
//! Subscribes the durable `shopping_analytics` queue to checkout events and
//! accumulates spend statistics. Competes independently of the notification
//! consumer; redeliveries are deduplicated per list.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sl_events::{AnalyticsProcessor, ConsumerConfig, EventConsumer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Starting analytics consumer");

    let config = ConsumerConfig {
        amqp_url: rabbitmq_url(),
        ..Default::default()
    };

    let processor = Arc::new(AnalyticsProcessor::new());
    let consumer = EventConsumer::new(config, processor.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let consumer_task = tokio::spawn(async move {
        consumer.run(shutdown_rx).await;
    });

    shutdown_signal().await;
    info!("Shutdown signal received...");

    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(10), consumer_task).await;

    info!(
        events = processor.events_processed(),
        revenue = processor.total_revenue(),
        "Analytics consumer stopped"
    );
    Ok(())
}

fn rabbitmq_url() -> String {
    std::env::var("RABBITMQ_URL").unwrap_or_else(|_| "amqp://127.0.0.1:5672/%2f".to_string())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
