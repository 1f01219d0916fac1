//! Client for the external identity provider (Supabase-style auth and REST APIs).
//!
//! Two trust domains meet here: the caller's own token, which only proves who they are,
//! and the service key, which can delete anyone. Each request carries exactly one of them.
use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Method, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::client::HttpClient;
use crate::errors::GatewayError;
use crate::relay;
use crate::settings::IdentitySettings;

const API_KEY_HEADER: &str = "apikey";

#[derive(Debug, Deserialize)]
struct User {
    id: String,
}

#[derive(Debug)]
pub struct IdentityClient<'a, T> {
    settings: &'a IdentitySettings,
    http: &'a T,
}

impl<'a, T: HttpClient + Send + Sync> IdentityClient<'a, T> {
    pub fn new(settings: &'a IdentitySettings, http: &'a T) -> Self {
        Self { settings, http }
    }

    /// Resolves the caller's token to their user id.
    #[instrument(skip_all)]
    pub async fn current_user(&self, user_token: &str) -> Result<String, GatewayError> {
        let unauthorized = || GatewayError::Unauthenticated("Unauthorized.".into());

        let req = self
            .request(Method::GET, self.settings.route("auth/v1/user")?)
            .header(API_KEY_HEADER, &self.settings.public_key)
            .header(header::AUTHORIZATION, format!("Bearer {user_token}"))
            .body(Body::empty())
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        let response = self.http.request(req).await.map_err(|e| {
            warn!(error = %e, "Identity provider unreachable while resolving user");
            unauthorized()
        })?;
        let buffered = relay::read_to_bytes(response).await?;
        if !buffered.status.is_success() {
            debug!(status = %buffered.status, "Identity provider rejected user token");
            return Err(unauthorized());
        }

        match serde_json::from_slice::<User>(&buffered.body) {
            Ok(user) if !user.id.is_empty() => Ok(user.id),
            _ => Err(unauthorized()),
        }
    }

    /// Removes every row the application stores for the user.
    #[instrument(skip(self))]
    pub async fn delete_user_data(&self, user_id: &str) -> Result<(), GatewayError> {
        let body = serde_json::to_vec(&json!({ "p_user_id": user_id }))
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        let req = self
            .privileged(Method::POST, self.settings.route("rest/v1/rpc/delete_user_data")?)?
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        self.expect_success(req, "Failed to delete user data.").await
    }

    /// Removes the user's identity itself.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, user_id: &str) -> Result<(), GatewayError> {
        let mut url = Url::parse(&self.settings.route("auth/v1/admin/users/")?)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Internal("identity URL cannot be a base".into()))?
            .pop_if_empty()
            .push(user_id);

        let req = self
            .privileged(Method::DELETE, url.to_string())?
            .body(Body::empty())
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        self.expect_success(req, "Failed to delete auth user.").await
    }

    fn request(&self, method: Method, uri: String) -> axum::http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    fn privileged(
        &self,
        method: Method,
        uri: String,
    ) -> Result<axum::http::request::Builder, GatewayError> {
        let bearer = HeaderValue::try_from(format!("Bearer {}", self.settings.service_key))
            .map_err(|_| GatewayError::Misconfigured("Invalid service key.".into()))?;
        Ok(self
            .request(method, uri)
            .header(API_KEY_HEADER, &self.settings.service_key)
            .header(header::AUTHORIZATION, bearer))
    }

    async fn expect_success(&self, req: Request, message: &str) -> Result<(), GatewayError> {
        let failed = |details: String| GatewayError::DeletionFailed {
            message: message.to_owned(),
            details,
        };

        let response: Response = self
            .http
            .request(req)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let buffered = relay::read_to_bytes(response).await?;
        if buffered.status.is_success() {
            Ok(())
        } else {
            Err(failed(provider_message(buffered.status, &buffered.text())))
        }
    }
}

/// The provider's own error message, falling back to the raw body or the status text.
fn provider_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        ["message", "msg", "error_description", "error"]
            .iter()
            .find_map(|key| value.get(key).and_then(Value::as_str).map(str::to_owned))
    });
    from_json
        .or_else(|| Some(body.trim().to_owned()).filter(|text| !text.is_empty()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_owned())
}
