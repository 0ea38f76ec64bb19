//! Gateway coordination layer
//!
//! Fronts the shopping-list services with:
//! - CircuitBreakerSet: per-dependency failure gating (CLOSED/OPEN/HALF_OPEN)
//! - ProxyRouter: prefix-rewriting request forwarding with uniform error
//!   mapping and breaker/registry feedback
//! - Aggregator: concurrent fan-out endpoints (search, dashboard) that merge
//!   partial results
//! - HTTP surface: health, registry introspection, proxied routes

pub mod aggregate;
pub mod breaker;
pub mod error;
pub mod proxy;
pub mod routes;

pub use aggregate::{Aggregator, AggregatorConfig};
pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreakerSet, CircuitState, Gate};
pub use error::GatewayError;
pub use proxy::{ProxyConfig, ProxyOutcome, ProxyRouter};
pub use routes::{create_router, AppState};

pub type Result<T> = std::result::Result<T, GatewayError>;
