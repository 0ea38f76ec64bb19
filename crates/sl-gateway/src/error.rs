//! Gateway Error Types
//!
//! Every failure a caller can observe is mapped into the uniform JSON
//! envelope; raw transport errors never leave the gateway.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use sl_common::ErrorBody;
use sl_registry::RegistryError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Service {service} temporarily unavailable (Circuit Breaker OPEN)")]
    CircuitOpen { service: String, retry_after: u64 },

    #[error("Service {service} unavailable")]
    ServiceUnavailable { service: String },

    #[error("Service {service} timeout")]
    Timeout { service: String },

    #[error("Query parameter \"{0}\" is required")]
    MissingQueryParam(&'static str),

    #[error("Authorization required")]
    AuthorizationRequired,

    #[error("Endpoint not found: {0}")]
    RouteNotFound(String),

    #[error("Internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::CircuitOpen { .. } | GatewayError::ServiceUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::MissingQueryParam(_) => StatusCode::BAD_REQUEST,
            GatewayError::AuthorizationRequired => StatusCode::UNAUTHORIZED,
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(service) => GatewayError::ServiceUnavailable { service },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = ErrorBody::new(status.as_u16(), self.to_string());

        let retry_after = match &self {
            GatewayError::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        };
        if let Some(seconds) = retry_after {
            body = body.with_retry_after(seconds);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = seconds.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let open = GatewayError::CircuitOpen {
            service: "item-service".to_string(),
            retry_after: 8,
        };
        assert_eq!(open.status(), StatusCode::SERVICE_UNAVAILABLE);

        let timeout = GatewayError::Timeout {
            service: "item-service".to_string(),
        };
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);

        assert_eq!(
            GatewayError::MissingQueryParam("q").status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn registry_miss_maps_to_service_unavailable() {
        let err: GatewayError = RegistryError::NotFound("user-service".to_string()).into();
        assert!(matches!(
            err,
            GatewayError::ServiceUnavailable { ref service } if service == "user-service"
        ));
    }
}
