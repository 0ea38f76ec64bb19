use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Checkout Event Wire Types
// ============================================================================

/// Event name and routing key for a completed checkout.
pub const CHECKOUT_COMPLETED: &str = "list.checkout.completed";

/// Message emitted once per completed checkout. Immutable after publishing;
/// every bound queue receives its own copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutEvent {
    pub event: String,
    pub list_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub items: Vec<CheckoutItem>,
    pub summary: CheckoutSummary,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItem {
    pub item_id: String,
    pub item_name: String,
    pub quantity: f64,
    pub unit: String,
    pub estimated_price: f64,
    pub purchased: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSummary {
    pub total_items: u32,
    pub purchased_items: u32,
    pub estimated_total: f64,
}

impl CheckoutEvent {
    /// Build a checkout event, deriving the summary from the item lines.
    pub fn new(
        list_id: impl Into<String>,
        user_id: impl Into<String>,
        items: Vec<CheckoutItem>,
    ) -> Self {
        let summary = CheckoutSummary::from_items(&items);
        Self {
            event: CHECKOUT_COMPLETED.to_string(),
            list_id: list_id.into(),
            user_id: user_id.into(),
            user_email: None,
            items,
            summary,
            timestamp: Utc::now(),
        }
    }

    pub fn with_user_email(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }
}

impl CheckoutSummary {
    pub fn from_items(items: &[CheckoutItem]) -> Self {
        let estimated_total: f64 = items
            .iter()
            .map(|item| item.estimated_price * item.quantity)
            .sum();

        Self {
            total_items: items.len() as u32,
            purchased_items: items.iter().filter(|item| item.purchased).count() as u32,
            estimated_total: round_currency(estimated_total),
        }
    }
}

/// Round to cents, matching what list summaries store.
pub fn round_currency(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

// ============================================================================
// Service Registry Types
// ============================================================================

/// Registration payload a service announces itself with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub url: String,
    pub version: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
}

/// A registered service as the registry tracks it. Created on registration,
/// health flag toggled by probes and failed proxy attempts, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    pub name: String,
    pub url: String,
    pub version: String,
    pub endpoints: Vec<String>,
    pub healthy: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

impl ServiceEntry {
    pub fn from_info(name: impl Into<String>, info: ServiceInfo) -> Self {
        Self {
            name: name.into(),
            url: info.url,
            version: info.version,
            endpoints: info.endpoints,
            healthy: true,
            last_checked_at: None,
            registered_at: Utc::now(),
        }
    }
}

/// Aggregate registry view, computed fresh on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_services: usize,
    pub healthy_services: usize,
    pub unhealthy_services: usize,
    pub last_updated_at: DateTime<Utc>,
}

// ============================================================================
// HTTP Error Envelope
// ============================================================================

/// Uniform error body every gateway failure is mapped into. Callers never
/// see raw transport errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
    /// Seconds until a circuit-open rejection is worth retrying.
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub status: u16,
}

impl ErrorBody {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                status,
            },
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }
}
