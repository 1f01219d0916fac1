//! One [`crate::pipeline::Endpoint`] per route.
use axum::{
    extract::Request,
    http::{HeaderMap, header::CONTENT_TYPE},
};
use serde_json::{Map, Value};

use crate::errors::GatewayError;

pub mod account;
pub mod chat;
pub mod image_edit;
pub mod speech;
pub mod transcription;
pub mod upload;

pub use account::DeleteAccount;
pub use chat::Chat;
pub use image_edit::ImageEdit;
pub use speech::Speech;
pub use transcription::Transcription;
pub use upload::Upload;

/// Inbound bodies larger than this are rejected.
pub const MAX_REQUEST_BODY: usize = 64 * 1024 * 1024;

pub(crate) async fn read_body(req: Request) -> Result<bytes::Bytes, GatewayError> {
    axum::body::to_bytes(req.into_body(), MAX_REQUEST_BODY)
        .await
        .map_err(|_| GatewayError::InvalidInput("Invalid request body.".into()))
}

/// Parses the body as a JSON object. `null` counts as an empty object.
pub(crate) async fn read_json_object(req: Request) -> Result<Map<String, Value>, GatewayError> {
    let bytes = read_body(req).await?;
    json_object(&bytes)
}

pub(crate) fn json_object(bytes: &[u8]) -> Result<Map<String, Value>, GatewayError> {
    match serde_json::from_slice(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(_) | Err(_) => Err(GatewayError::InvalidInput("Invalid JSON body.".into())),
    }
}

/// A string field whose trimmed value is non-empty.
pub(crate) fn non_empty_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

pub(crate) fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}
