//! Checkout publish tool
//!
//! Emits a checkout event onto the broker the way the list service does on
//! purchase completion. Pass a JSON file path to publish a specific event;
//! without arguments a sample event is published. Useful for driving the
//! consumers during development.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sl_common::{CheckoutEvent, CheckoutItem};
use sl_events::{AmqpEventPublisher, EventPublisher};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let amqp_url =
        std::env::var("RABBITMQ_URL").unwrap_or_else(|_| "amqp://127.0.0.1:5672/%2f".to_string());

    let event = match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading event file {}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing event file {}", path))?
        }
        None => sample_event(),
    };

    let publisher = AmqpEventPublisher::new(amqp_url);
    publisher
        .publish_checkout(&event)
        .await
        .context("publishing checkout event")?;

    info!(
        list_id = %event.list_id,
        estimated_total = event.summary.estimated_total,
        "Checkout event published"
    );
    Ok(())
}

fn sample_event() -> CheckoutEvent {
    CheckoutEvent::new(
        "demo-list-1",
        "demo-user-1",
        vec![
            CheckoutItem {
                item_id: "rice-5kg".to_string(),
                item_name: "Rice 5kg".to_string(),
                quantity: 1.0,
                unit: "un".to_string(),
                estimated_price: 25.90,
                purchased: true,
            },
            CheckoutItem {
                item_id: "beans-1kg".to_string(),
                item_name: "Black Beans 1kg".to_string(),
                quantity: 2.0,
                unit: "un".to_string(),
                estimated_price: 8.30,
                purchased: false,
            },
        ],
    )
    .with_user_email("demo-user-1@example.com")
}
