//! Analytics consumer
//!
//! Records the spend of every completed checkout. The total is derived from
//! the item lines when present, otherwise from the published summary.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use sl_common::{round_currency, CheckoutEvent};

use crate::consumer::{EventProcessor, ProcessingError};

pub const ANALYTICS_QUEUE: &str = "shopping_analytics";

/// Accumulates checkout spend totals.
pub struct AnalyticsProcessor {
    events_processed: AtomicU64,
    /// Kept in cents so the running total stays a plain atomic.
    revenue_cents: AtomicU64,
}

impl AnalyticsProcessor {
    pub fn new() -> Self {
        Self {
            events_processed: AtomicU64::new(0),
            revenue_cents: AtomicU64::new(0),
        }
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::SeqCst)
    }

    pub fn total_revenue(&self) -> f64 {
        self.revenue_cents.load(Ordering::SeqCst) as f64 / 100.0
    }
}

impl Default for AnalyticsProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Spend for one checkout: item lines win over the precomputed summary.
pub fn list_total(event: &CheckoutEvent) -> f64 {
    if !event.items.is_empty() {
        let total = event
            .items
            .iter()
            .map(|item| item.estimated_price * item.quantity)
            .sum();
        return round_currency(total);
    }
    round_currency(event.summary.estimated_total)
}

#[async_trait]
impl EventProcessor for AnalyticsProcessor {
    fn name(&self) -> &str {
        "analytics"
    }

    fn queue(&self) -> &str {
        ANALYTICS_QUEUE
    }

    async fn process(&self, event: &CheckoutEvent) -> Result<(), ProcessingError> {
        let total = list_total(event);

        self.events_processed.fetch_add(1, Ordering::SeqCst);
        self.revenue_cents
            .fetch_add((total * 100.0).round() as u64, Ordering::SeqCst);

        info!(
            list_id = %event.list_id,
            user_id = %event.user_id,
            total = total,
            "Recorded checkout spend"
        );

        Ok(())
    }
}
