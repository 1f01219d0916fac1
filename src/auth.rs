/// Access guard for the application endpoints.
///
/// Callers present the shared secret either as `Authorization: Bearer <token>` or, for
/// clients that cannot set `Authorization`, in the `x-app-token` header.
use axum::http::{HeaderMap, header::AUTHORIZATION};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::errors::GatewayError;
use crate::settings::Settings;

pub const APP_TOKEN_HEADER: &str = "x-app-token";

/// A wrapper around String that uses constant-time equality comparison
/// to prevent timing attacks on secret validation.
#[derive(Clone)]
pub struct ConstantTimeString(String);

impl From<&str> for ConstantTimeString {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ConstantTimeString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq for ConstantTimeString {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for ConstantTimeString {}

impl std::fmt::Debug for ConstantTimeString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConstantTimeString(<redacted>)")
    }
}

/// Pulls the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Bearer header first, then the custom token header.
pub fn extract_credential(headers: &HeaderMap) -> Option<&str> {
    bearer_token(headers).or_else(|| {
        headers
            .get(APP_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|token| !token.is_empty())
    })
}

/// Rejects the request unless it carries exactly the configured shared secret.
pub fn authorize(headers: &HeaderMap, settings: &Settings) -> Result<(), GatewayError> {
    let secret = settings
        .app_secret
        .as_deref()
        .filter(|secret| !secret.is_empty())
        .ok_or(GatewayError::MissingSecret)?;

    let Some(credential) = extract_credential(headers) else {
        debug!("No credential presented");
        return Err(GatewayError::Unauthenticated("Unauthorized.".into()));
    };

    if ConstantTimeString::from(credential) == ConstantTimeString::from(secret) {
        Ok(())
    } else {
        debug!("Credential did not match the shared secret");
        Err(GatewayError::Unauthenticated("Unauthorized.".into()))
    }
}
