//! Fan-out aggregation endpoints
//!
//! Search and dashboard each call several dependencies concurrently, every
//! branch with its own timeout, and merge whatever succeeded. A failed
//! branch drops its fields from the merged object instead of failing the
//! whole request; the contract is best-effort, not completeness.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use sl_registry::ServiceRegistry;

use crate::error::GatewayError;
use crate::Result;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Timeout applied to each fan-out branch independently.
    pub call_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(15),
        }
    }
}

/// Concurrent fan-out over registered dependencies with partial-result
/// merging.
pub struct Aggregator {
    registry: Arc<ServiceRegistry>,
    client: reqwest::Client,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(registry: Arc<ServiceRegistry>, config: AggregatorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("http client: {}", e)))?;

        Ok(Self {
            registry,
            client,
            config,
        })
    }

    /// Cross-service search: items from the item service, the caller's lists
    /// from the list service filtered locally by the search term.
    pub async fn search(
        &self,
        term: &str,
        authorization: Option<&HeaderValue>,
    ) -> Result<Value> {
        let items_query = [("q", term)];
        let items_branch = self.fetch_json("item-service", "/search", &items_query, None);
        let lists_branch = self.fetch_json("list-service", "/lists", &[], authorization);

        // Both branches always run to completion; neither can cancel the other.
        let (items, lists) = tokio::join!(items_branch, lists_branch);

        let mut merged = json!({
            "searchTerm": term,
            "timestamp": Utc::now(),
        });

        if let Some(items) = items {
            merged["items"] = items;
        }
        if let Some(lists) = lists {
            merged["lists"] = filter_lists(lists, term);
        }

        Ok(merged)
    }

    /// Account dashboard: profile plus list statistics for the caller.
    pub async fn dashboard(&self, authorization: &HeaderValue) -> Result<Value> {
        let user_branch = self.fetch_json("user-service", "/users/me", &[], Some(authorization));
        let lists_branch = self.fetch_json("list-service", "/lists", &[], Some(authorization));

        let (user, lists) = tokio::join!(user_branch, lists_branch);

        let mut merged = json!({
            "user": user.unwrap_or(Value::Null),
            "timestamp": Utc::now(),
        });

        if let Some(Value::Array(lists)) = lists {
            merged["lists"] = json!({
                "total": lists.len(),
                "active": count_by_status(&lists, "active"),
                "completed": count_by_status(&lists, "completed"),
                "items": sum_summary(&lists, "totalItems"),
            });
            merged["statistics"] = json!({
                "totalEstimated": sum_summary(&lists, "estimatedTotal"),
                "purchasedItems": sum_summary(&lists, "purchasedItems"),
            });
        }

        Ok(merged)
    }

    /// One fan-out branch: discover the service, GET the path, decode JSON.
    /// Any failure (unknown service, transport error, non-2xx, bad JSON)
    /// resolves to None so the merge simply omits the branch.
    async fn fetch_json(
        &self,
        service: &str,
        path: &str,
        query: &[(&str, &str)],
        authorization: Option<&HeaderValue>,
    ) -> Option<Value> {
        let entry = match self.registry.discover(service) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(service = %service, error = %e, "Aggregation branch skipped");
                return None;
            }
        };

        let url = format!("{}{}", entry.url.trim_end_matches('/'), path);
        let mut request = self
            .client
            .get(&url)
            .timeout(self.config.call_timeout)
            .query(query);
        if let Some(auth) = authorization {
            request = request.header(header::AUTHORIZATION, auth);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => match response.json().await {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(service = %service, error = %e, "Aggregation branch returned bad JSON");
                    None
                }
            },
            Ok(response) => {
                debug!(
                    service = %service,
                    status = response.status().as_u16(),
                    "Aggregation branch answered with error status"
                );
                None
            }
            Err(e) => {
                warn!(service = %service, error = %e, "Aggregation branch failed");
                None
            }
        }
    }
}

/// Keep only lists whose name or description contains the term,
/// case-insensitive.
fn filter_lists(lists: Value, term: &str) -> Value {
    let needle = term.to_lowercase();
    let matches = |list: &Value, field: &str| {
        list.get(field)
            .and_then(Value::as_str)
            .map(|text| text.to_lowercase().contains(&needle))
            .unwrap_or(false)
    };

    match lists {
        Value::Array(entries) => Value::Array(
            entries
                .into_iter()
                .filter(|list| matches(list, "name") || matches(list, "description"))
                .collect(),
        ),
        _ => Value::Array(Vec::new()),
    }
}

fn count_by_status(lists: &[Value], status: &str) -> usize {
    lists
        .iter()
        .filter(|list| list.get("status").and_then(Value::as_str) == Some(status))
        .count()
}

fn sum_summary(lists: &[Value], field: &str) -> f64 {
    let total: f64 = lists
        .iter()
        .filter_map(|list| list.get("summary"))
        .filter_map(|summary| summary.get(field))
        .filter_map(Value::as_f64)
        .sum();
    sl_common::round_currency(total)
}
