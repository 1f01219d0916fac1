//! The per-request handler pipeline.
//!
//! Every route runs the same ordered stages: guard, normalize, invoke, relay. Each
//! [`Endpoint`] keeps its own field-level rules in `normalize`; the pipeline only fixes
//! the order and converts the first failure into the caller's response.
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, Method, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{debug, error, instrument};

use crate::client::HttpClient;
use crate::errors::GatewayError;
use crate::settings::Settings;
use crate::{AppState, auth};

#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// Used in tracing spans.
    const NAME: &'static str;

    /// Whether the generative-AI service credential must be configured.
    const NEEDS_UPSTREAM_KEY: bool = true;

    /// Validated request parameters.
    type Params: Send;

    /// Whatever the invoke stage produced, usually the upstream response.
    type Outcome: Send;

    /// Access control. Defaults to the shared application secret.
    fn guard(headers: &HeaderMap, settings: &Settings) -> Result<(), GatewayError> {
        auth::authorize(headers, settings)
    }

    async fn normalize(req: Request) -> Result<Self::Params, GatewayError>;

    async fn invoke<T>(
        state: &AppState<T>,
        params: Self::Params,
    ) -> Result<Self::Outcome, GatewayError>
    where
        T: HttpClient + Send + Sync;

    async fn relay(outcome: Self::Outcome) -> Result<Response, GatewayError>;
}

/// Drives a request through all stages of `E`, stopping at the first error.
#[instrument(skip_all, fields(endpoint = E::NAME))]
pub async fn run<E, T>(state: &AppState<T>, req: Request) -> Response
where
    E: Endpoint,
    T: HttpClient + Send + Sync,
{
    match stages::<E, T>(state, req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn stages<E, T>(state: &AppState<T>, req: Request) -> Result<Response, GatewayError>
where
    E: Endpoint,
    T: HttpClient + Send + Sync,
{
    E::guard(req.headers(), &state.settings)?;
    if E::NEEDS_UPSTREAM_KEY {
        state.settings.require_upstream_key()?;
    }

    let params = E::normalize(req).await?;
    debug!("Request normalized");
    let outcome = E::invoke(state, params).await?;
    E::relay(outcome).await
}

/// Builds a request to a fixed upstream route, authenticated with the service credential.
pub fn upstream_request(
    settings: &Settings,
    route: &str,
    content_type: &str,
    accept: Option<&'static str>,
    body: Bytes,
) -> Result<Request, GatewayError> {
    let key = settings.require_upstream_key()?;
    let uri = settings.upstream_route(route)?;

    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {key}"))
        .header(header::CONTENT_TYPE, content_type);
    if let Some(accept) = accept {
        builder = builder.header(header::ACCEPT, accept);
    }

    builder
        .body(Body::from(body))
        .map_err(|e| GatewayError::Internal(format!("building upstream request: {e}")))
}

/// Sends exactly one request; transport failures become [`GatewayError::UpstreamUnavailable`].
pub async fn send<T: HttpClient + Send + Sync>(
    client: &T,
    req: Request,
) -> Result<Response, GatewayError> {
    let uri = req.uri().clone();
    client.request(req).await.map_err(|e| {
        error!(%uri, error = %e, "Error forwarding request to upstream");
        GatewayError::UpstreamUnavailable(e.to_string())
    })
}
