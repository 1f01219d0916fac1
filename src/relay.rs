//! Response relay: hands upstream responses back to the caller.
//!
//! The streaming path forwards the upstream body as it arrives. Only the image edit
//! endpoint reads a body fully, through [`read_to_bytes`].
use axum::{
    body::Bytes,
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::Response,
};
use tracing::debug;

use crate::errors::GatewayError;

/// Upper bound for bodies the gateway inspects rather than streams.
pub const MAX_BUFFERED_BODY: usize = 64 * 1024 * 1024;

/// Forwards status and body unchanged, keeping the upstream content type when it sent one.
pub fn stream(upstream: Response, default_content_type: &'static str) -> Response {
    let (parts, body) = upstream.into_parts();
    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(default_content_type));

    debug!(status = %parts.status, ?content_type, "Relaying upstream body");

    let mut response = Response::new(body);
    *response.status_mut() = parts.status;
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}

/// A fully read upstream response.
#[derive(Debug)]
pub struct Buffered {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl Buffered {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub async fn read_to_bytes(upstream: Response) -> Result<Buffered, GatewayError> {
    let (parts, body) = upstream.into_parts();
    let body = axum::body::to_bytes(body, MAX_BUFFERED_BODY)
        .await
        .map_err(|e| GatewayError::UpstreamUnavailable(format!("reading upstream body: {e}")))?;
    Ok(Buffered {
        status: parts.status,
        content_type: parts.headers.get(CONTENT_TYPE).cloned(),
        body,
    })
}
