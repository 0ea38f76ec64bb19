//! Per-dependency circuit breakers
//!
//! One independent automaton per downstream service. A breaker trips OPEN
//! after three consecutive transport-level failures and fails fast until the
//! cooldown elapses, at which point the next call is admitted as a HALF_OPEN
//! probe. There is no single-flight lock around the HALF_OPEN probe:
//! concurrent requests observing the expired cooldown may all pass through.
//! Dependencies here are internal and safe to double-probe.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before probing again.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of the pre-call gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Call may proceed (CLOSED, or HALF_OPEN probe).
    Allow,
    /// Fail fast; retry after the remaining cooldown.
    Open { retry_after: Duration },
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_until: Option<Instant>,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_until: None,
        }
    }
}

/// Serializable view of one breaker for the health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Remaining cooldown in seconds while OPEN.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// All per-dependency breakers, keyed by service name. Entries are created
/// lazily in CLOSED on first use.
pub struct CircuitBreakerSet {
    entries: DashMap<String, BreakerEntry>,
    config: BreakerConfig,
}

impl CircuitBreakerSet {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Gate a call to `service`. Must be consulted before every proxied
    /// attempt. An expired OPEN flips to HALF_OPEN here and admits the call.
    pub fn check(&self, service: &str) -> Gate {
        let mut entry = self.entries.entry(service.to_string()).or_default();

        match entry.state {
            CircuitState::Open => {
                let now = Instant::now();
                match entry.opened_until {
                    Some(until) if now < until => Gate::Open {
                        retry_after: until - now,
                    },
                    _ => {
                        info!(service = %service, "Circuit cooldown elapsed, probing (HALF_OPEN)");
                        entry.state = CircuitState::HalfOpen;
                        entry.consecutive_failures = 0;
                        entry.opened_until = None;
                        Gate::Allow
                    }
                }
            }
            CircuitState::Closed | CircuitState::HalfOpen => Gate::Allow,
        }
    }

    /// Record the outcome of an attempted call. Must be called exactly once
    /// per attempt that passed the gate.
    pub fn record(&self, service: &str, success: bool) {
        let mut entry = self.entries.entry(service.to_string()).or_default();

        if success {
            if entry.state != CircuitState::Closed {
                info!(service = %service, "Circuit closed after successful call");
            }
            entry.state = CircuitState::Closed;
            entry.consecutive_failures = 0;
            entry.opened_until = None;
            return;
        }

        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.config.failure_threshold {
            warn!(
                service = %service,
                failures = entry.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit opened"
            );
            entry.state = CircuitState::Open;
            entry.opened_until = Some(Instant::now() + self.config.cooldown);
        }
    }

    /// Current state of one breaker, CLOSED if it has never been used.
    pub fn state(&self, service: &str) -> CircuitState {
        self.entries
            .get(service)
            .map(|entry| entry.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Snapshot of every breaker for introspection.
    pub fn snapshot(&self) -> HashMap<String, BreakerSnapshot> {
        let now = Instant::now();
        self.entries
            .iter()
            .map(|entry| {
                let value = entry.value();
                let retry_after_secs = match (value.state, value.opened_until) {
                    (CircuitState::Open, Some(until)) if until > now => {
                        Some((until - now).as_secs_f64().ceil() as u64)
                    }
                    _ => None,
                };
                (
                    entry.key().clone(),
                    BreakerSnapshot {
                        state: value.state,
                        consecutive_failures: value.consecutive_failures,
                        retry_after_secs,
                    },
                )
            })
            .collect()
    }
}

impl Default for CircuitBreakerSet {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

/// Seconds a caller should wait before retrying, rounded up so a nearly
/// elapsed cooldown still reports at least one second.
pub fn retry_after_secs(remaining: Duration) -> u64 {
    remaining.as_secs_f64().ceil() as u64
}
