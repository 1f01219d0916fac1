//! Error taxonomy for the gateway.
//!
//! Every failure is reported synchronously to the caller as `{"error": <message>}`.
//! Nothing is retried and nothing here is fatal to the process.
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing or mismatched caller credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// The shared application secret is not configured on the server.
    #[error("Missing APP_SECRET.")]
    MissingSecret,

    /// Some other server-side credential or setting is absent.
    #[error("{0}")]
    Misconfigured(String),

    /// Malformed body, missing field or wrong content type.
    #[error("{0}")]
    InvalidInput(String),

    /// The upstream could not be reached at all (connect error, reset, ...).
    #[error("Upstream request failed.")]
    UpstreamUnavailable(String),

    /// A caller-supplied resource could not be fetched before the upstream call.
    #[error("{message}")]
    UpstreamFetch {
        status: StatusCode,
        message: String,
    },

    /// The upstream answered with a non-success status.
    #[error("{message}")]
    Upstream {
        status: StatusCode,
        message: String,
    },

    /// One of the account deletion steps was rejected by the identity provider.
    #[error("{message}")]
    DeletionFailed { message: String, details: String },

    #[error("Internal server error.")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamFetch { status, .. } | GatewayError::Upstream { status, .. } => {
                forwardable(*status)
            }
            GatewayError::MissingSecret
            | GatewayError::Misconfigured(_)
            | GatewayError::UpstreamUnavailable(_)
            | GatewayError::DeletionFailed { .. }
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Only error statuses are passed through, anything else collapses to 500.
fn forwardable(status: StatusCode) -> StatusCode {
    if status.is_client_error() || status.is_server_error() {
        status
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            GatewayError::UpstreamUnavailable(cause) | GatewayError::Internal(cause) => {
                error!(%status, cause = %cause, "{}", self)
            }
            GatewayError::DeletionFailed { details, .. } => {
                error!(%status, details = %details, "{}", self)
            }
            _ if status.is_server_error() => error!(%status, "{}", self),
            _ => warn!(%status, "{}", self),
        }

        let body = match &self {
            GatewayError::DeletionFailed { message, details } => json!({
                "error": message,
                "details": details,
            }),
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
