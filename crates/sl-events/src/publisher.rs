//! Checkout event publishing
//!
//! One short-lived connection and channel per publish; nothing mutable is
//! shared between concurrent publishes. The publish is fire-and-forget: the
//! caller learns whether the attempt reached the broker, not whether the
//! broker confirmed it.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, info};

use sl_common::{CheckoutEvent, CHECKOUT_COMPLETED};

use crate::{EventError, Result, DELIVERY_MODE_PERSISTENT, EXCHANGE};

/// Seam the list service's checkout flow publishes through; mockable in
/// tests and for broker-less development.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_checkout(&self, event: &CheckoutEvent) -> Result<()>;
}

/// Publishes checkout events onto the durable `shopping_events` topic
/// exchange.
pub struct AmqpEventPublisher {
    amqp_url: String,
}

impl AmqpEventPublisher {
    pub fn new(amqp_url: impl Into<String>) -> Self {
        Self {
            amqp_url: amqp_url.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_checkout(&self, event: &CheckoutEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)?;

        let connection = Connection::connect(&self.amqp_url, ConnectionProperties::default())
            .await
            .map_err(|e| EventError::Delivery(format!("broker connect: {}", e)))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| EventError::Delivery(format!("channel open: {}", e)))?;

        channel
            .exchange_declare(
                EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| EventError::Delivery(format!("exchange declare: {}", e)))?;

        // The returned confirm is deliberately not awaited: the checkout
        // flow only requires the publish attempt.
        let _confirm = channel
            .basic_publish(
                EXCHANGE,
                CHECKOUT_COMPLETED,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| EventError::Delivery(format!("publish: {}", e)))?;

        info!(
            list_id = %event.list_id,
            user_id = %event.user_id,
            estimated_total = event.summary.estimated_total,
            "Checkout event published"
        );

        // Best effort; the broker already has the message.
        if let Err(e) = connection.close(200, "publish complete").await {
            debug!(error = %e, "Publisher connection close failed");
        }

        Ok(())
    }
}
