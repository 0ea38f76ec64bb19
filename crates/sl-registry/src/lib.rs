//! Service registry for the gateway
//!
//! Tracks every downstream service by name with:
//! - ServiceRegistry: in-memory directory (register, discover, stats)
//! - HealthProber: periodic liveness sweep over registered services
//!
//! The registry is an owned store injected where needed; nothing in this
//! crate reaches for ambient global state.

pub mod prober;
pub mod registry;

pub use prober::{HealthProber, ProberConfig};
pub use registry::ServiceRegistry;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Service not registered: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
