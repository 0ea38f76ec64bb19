//! Notification consumer
//!
//! Sends (well, logs) the checkout receipt for every completed list. The
//! recipient comes from the event when the list service knew the address,
//! otherwise a conventional fallback is derived from the user id.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use sl_common::CheckoutEvent;

use crate::consumer::{EventProcessor, ProcessingError};

pub const NOTIFICATION_QUEUE: &str = "shopping_notifications";

pub struct NotificationProcessor {
    notifications_sent: AtomicU64,
}

impl NotificationProcessor {
    pub fn new() -> Self {
        Self {
            notifications_sent: AtomicU64::new(0),
        }
    }

    pub fn notifications_sent(&self) -> u64 {
        self.notifications_sent.load(Ordering::SeqCst)
    }
}

impl Default for NotificationProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Receipt recipient for an event.
pub fn receipt_address(event: &CheckoutEvent) -> String {
    event
        .user_email
        .clone()
        .unwrap_or_else(|| format!("{}@example.com", event.user_id))
}

#[async_trait]
impl EventProcessor for NotificationProcessor {
    fn name(&self) -> &str {
        "notification"
    }

    fn queue(&self) -> &str {
        NOTIFICATION_QUEUE
    }

    async fn process(&self, event: &CheckoutEvent) -> Result<(), ProcessingError> {
        let recipient = receipt_address(event);

        info!(
            list_id = %event.list_id,
            recipient = %recipient,
            purchased_items = event.summary.purchased_items,
            "Sending checkout receipt"
        );

        self.notifications_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_prefers_event_email() {
        let event = CheckoutEvent::new("L1", "u42", vec![]).with_user_email("ana@example.org");
        assert_eq!(receipt_address(&event), "ana@example.org");
    }

    #[test]
    fn recipient_falls_back_to_user_id() {
        let event = CheckoutEvent::new("L1", "u42", vec![]);
        assert_eq!(receipt_address(&event), "u42@example.com");
    }

    #[tokio::test]
    async fn processing_counts_notifications() {
        let processor = NotificationProcessor::new();
        processor
            .process(&CheckoutEvent::new("L1", "u1", vec![]))
            .await
            .unwrap();
        assert_eq!(processor.notifications_sent(), 1);
    }
}
