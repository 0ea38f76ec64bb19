//! Competing event consumers
//!
//! Each consumer declares its own durable queue bound to the shared topic
//! exchange and consumes with explicit acknowledgment. Decisions per
//! delivery:
//! - unparsable payload: nack without requeue (poison, dropped)
//! - duplicate list id: ack without side effects (redelivery)
//! - handler success: ack
//! - transient handler failure: bounded retries with backoff, then dropped
//!
//! The outer loop reconnects with a delay whenever the broker connection is
//! lost and stops on the shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use metrics::counter;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use sl_common::CheckoutEvent;

use crate::dedup::IdempotencyLedger;
use crate::{Result, BINDING_PATTERN, EXCHANGE};

/// Handler failure classification; only transient failures are retried.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Permanent failure: {0}")]
    Permanent(String),
}

/// One downstream handler (analytics, notification, ...). Must be idempotent
/// per list id; the runner additionally shields it from redeliveries.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Short name used for consumer tags and logging.
    fn name(&self) -> &str;

    /// Durable queue this processor consumes from.
    fn queue(&self) -> &str;

    async fn process(&self, event: &CheckoutEvent) -> std::result::Result<(), ProcessingError>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub amqp_url: String,
    /// Unacked deliveries the broker may hand this consumer at once.
    pub prefetch: u16,
    /// Attempts per event before a transient failure is given up on.
    pub retry_attempts: u32,
    /// Base backoff between attempts, multiplied by the attempt number.
    pub retry_backoff: Duration,
    /// Pause before reconnecting after a lost broker connection.
    pub reconnect_delay: Duration,
    /// Size of the recent-window used for redelivery deduplication.
    pub ledger_capacity: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            amqp_url: "amqp://127.0.0.1:5672/%2f".to_string(),
            prefetch: 8,
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            reconnect_delay: Duration::from_secs(5),
            ledger_capacity: crate::dedup::DEFAULT_LEDGER_CAPACITY,
        }
    }
}

/// What to tell the broker about one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Ack,
    /// Nack without requeue: the message is not coming back.
    Drop,
}

/// Durable-queue subscriber driving one processor.
pub struct EventConsumer {
    config: ConsumerConfig,
    processor: Arc<dyn EventProcessor>,
    ledger: IdempotencyLedger,
}

impl EventConsumer {
    pub fn new(config: ConsumerConfig, processor: Arc<dyn EventProcessor>) -> Self {
        let ledger = IdempotencyLedger::new(config.ledger_capacity);
        Self {
            config,
            processor,
            ledger,
        }
    }

    /// Consume until the shutdown signal fires, reconnecting on broker
    /// failures.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            let session = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(consumer = %self.processor.name(), "Consumer shutting down");
                    return;
                }
                session = self.open_session() => session,
            };

            match session {
                Ok((connection, _channel, mut deliveries)) => {
                    info!(
                        consumer = %self.processor.name(),
                        queue = %self.processor.queue(),
                        "Consumer waiting for messages"
                    );

                    loop {
                        tokio::select! {
                            _ = shutdown_rx.recv() => {
                                info!(consumer = %self.processor.name(), "Consumer shutting down");
                                let _ = connection.close(200, "shutdown").await;
                                return;
                            }
                            delivery = deliveries.next() => {
                                match delivery {
                                    Some(Ok(delivery)) => self.handle_delivery(delivery).await,
                                    Some(Err(e)) => {
                                        error!(
                                            consumer = %self.processor.name(),
                                            error = %e,
                                            "Consume error, reconnecting"
                                        );
                                        break;
                                    }
                                    None => {
                                        warn!(
                                            consumer = %self.processor.name(),
                                            "Delivery stream ended, reconnecting"
                                        );
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(
                        consumer = %self.processor.name(),
                        error = %e,
                        "Broker connection failed"
                    );
                }
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(consumer = %self.processor.name(), "Consumer shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn open_session(&self) -> Result<(Connection, Channel, lapin::Consumer)> {
        let connection =
            Connection::connect(&self.config.amqp_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

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
            .await?;

        channel
            .queue_declare(
                self.processor.queue(),
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_bind(
                self.processor.queue(),
                EXCHANGE,
                BINDING_PATTERN,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                self.processor.queue(),
                &format!("{}-consumer", self.processor.name()),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok((connection, channel, consumer))
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        let verdict = self.judge(&delivery.data).await;

        let broker_result = match verdict {
            Verdict::Ack => delivery.ack(BasicAckOptions::default()).await,
            Verdict::Drop => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
            }
        };

        if let Err(e) = broker_result {
            warn!(
                consumer = %self.processor.name(),
                error = %e,
                "Failed to settle delivery"
            );
        }
    }

    /// Decide a delivery's fate. Split from the broker plumbing so the whole
    /// policy is testable without a running broker.
    async fn judge(&self, payload: &[u8]) -> Verdict {
        let event = match decode_event(payload) {
            Ok(event) => event,
            Err(e) => {
                // Poison: it will not parse next time either. Dropped, no
                // dead-letter exchange is configured.
                warn!(
                    consumer = %self.processor.name(),
                    error = %e,
                    "Malformed payload, dropping"
                );
                counter!("sl_events_consumed_total",
                    "consumer" => self.processor.name().to_string(), "result" => "poison")
                .increment(1);
                return Verdict::Drop;
            }
        };

        if !self.ledger.first_sighting(&event.list_id) {
            debug!(
                consumer = %self.processor.name(),
                list_id = %event.list_id,
                "Duplicate delivery, acknowledging without effects"
            );
            counter!("sl_events_consumed_total",
                "consumer" => self.processor.name().to_string(), "result" => "duplicate")
            .increment(1);
            return Verdict::Ack;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.processor.process(&event).await {
                Ok(()) => {
                    counter!("sl_events_consumed_total",
                        "consumer" => self.processor.name().to_string(), "result" => "processed")
                    .increment(1);
                    return Verdict::Ack;
                }
                Err(ProcessingError::Permanent(message)) => {
                    warn!(
                        consumer = %self.processor.name(),
                        list_id = %event.list_id,
                        error = %message,
                        "Permanent processing failure, dropping"
                    );
                    counter!("sl_events_consumed_total",
                        "consumer" => self.processor.name().to_string(), "result" => "failed")
                    .increment(1);
                    return Verdict::Drop;
                }
                Err(ProcessingError::Transient(message)) if attempt < self.config.retry_attempts => {
                    warn!(
                        consumer = %self.processor.name(),
                        list_id = %event.list_id,
                        attempt = attempt,
                        error = %message,
                        "Transient processing failure, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(ProcessingError::Transient(message)) => {
                    error!(
                        consumer = %self.processor.name(),
                        list_id = %event.list_id,
                        attempts = attempt,
                        error = %message,
                        "Retries exhausted, dropping"
                    );
                    counter!("sl_events_consumed_total",
                        "consumer" => self.processor.name().to_string(), "result" => "failed")
                    .increment(1);
                    return Verdict::Drop;
                }
            }
        }
    }
}

/// Decode one wire payload into a checkout event.
pub fn decode_event(payload: &[u8]) -> std::result::Result<CheckoutEvent, serde_json::Error> {
    serde_json::from_slice(payload)
}
