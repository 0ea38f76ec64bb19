//! Checkout event pipeline
//!
//! Decouples purchase completion from downstream processing over a topic
//! exchange:
//! - AmqpEventPublisher: durable, persistent publish of checkout events
//! - EventConsumer: competing durable-queue subscriber with manual acks,
//!   poison handling and redelivery idempotence
//! - AnalyticsProcessor / NotificationProcessor: the two shipped consumers
//!
//! Delivery is at-least-once; consumers deduplicate on list id so a
//! redelivered event never double-counts or double-sends.

pub mod analytics;
pub mod consumer;
pub mod dedup;
pub mod notification;
pub mod publisher;

pub use analytics::{AnalyticsProcessor, ANALYTICS_QUEUE};
pub use consumer::{ConsumerConfig, EventConsumer, EventProcessor, ProcessingError};
pub use dedup::IdempotencyLedger;
pub use notification::{NotificationProcessor, NOTIFICATION_QUEUE};
pub use publisher::{AmqpEventPublisher, EventPublisher};

/// Topic exchange every checkout event goes through.
pub const EXCHANGE: &str = "shopping_events";

/// Binding pattern shared by all checkout consumers.
pub const BINDING_PATTERN: &str = "list.checkout.#";

/// AMQP delivery mode 2: persist messages across broker restarts.
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Message delivery failure: {0}")]
    Delivery(String),

    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EventError>;
