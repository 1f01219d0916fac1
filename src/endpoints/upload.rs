//! `POST /upload`: turns base64 image data into a data URL.
//!
//! Accepts a JSON body, a multipart form or plain text. Nothing is stored and no upstream
//! is called; the caller gets back a transport-agnostic `{imageUrl}`.
use async_trait::async_trait;
use axum::{
    Json,
    extract::{FromRequest, Multipart, Request},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::json;
use tracing::debug;

use super::{content_type, json_object, non_empty_str, read_body};
use crate::AppState;
use crate::client::HttpClient;
use crate::errors::GatewayError;
use crate::media::{self, DEFAULT_UPLOAD_MIME};
use crate::pipeline::Endpoint;

/// JSON keys checked for the payload, in order.
const JSON_KEYS: [&str; 3] = ["base64", "imageBase64", "image"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// Base64 text, with or without a `data:` prefix.
    Base64(String),
    /// Raw bytes from a multipart file part.
    Binary { mime: String, bytes: Bytes },
}

impl UploadSource {
    pub fn into_data_url(self) -> String {
        match self {
            UploadSource::Base64(text) => media::to_data_url(&text, DEFAULT_UPLOAD_MIME),
            UploadSource::Binary { mime, bytes } => {
                format!("data:{mime};base64,{}", media::encode(&bytes))
            }
        }
    }
}

fn missing_base64() -> GatewayError {
    GatewayError::InvalidInput("Missing base64.".into())
}

/// The payload after any `data:` prefix must decode as base64.
fn base64_source(text: &str) -> Result<UploadSource, GatewayError> {
    let text = text.trim();
    media::decode_inline(text, DEFAULT_UPLOAD_MIME)?;
    Ok(UploadSource::Base64(text.to_owned()))
}

fn from_json(bytes: &[u8]) -> Result<UploadSource, GatewayError> {
    let body = json_object(bytes)?;
    JSON_KEYS
        .iter()
        .find_map(|key| non_empty_str(&body, key))
        .ok_or_else(missing_base64)
        .and_then(base64_source)
}

fn from_text(bytes: &[u8]) -> Result<UploadSource, GatewayError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| GatewayError::InvalidInput("Invalid request body.".into()))?
        .trim();
    if text.is_empty() {
        return Err(missing_base64());
    }
    if text.starts_with('{') {
        return from_json(text.as_bytes());
    }
    base64_source(text)
}

async fn from_multipart(req: Request) -> Result<UploadSource, GatewayError> {
    let invalid = || GatewayError::InvalidInput("Invalid form data.".into());
    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|_| invalid())?;

    while let Some(field) = multipart.next_field().await.map_err(|_| invalid())? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let declared = field
                    .content_type()
                    .filter(|mime| mime.starts_with("image/"))
                    .map(str::to_owned);
                let bytes = field.bytes().await.map_err(|_| invalid())?;
                if bytes.is_empty() {
                    continue;
                }
                let mime = declared
                    .or_else(|| media::sniff_mime(&bytes).map(str::to_owned))
                    .unwrap_or_else(|| DEFAULT_UPLOAD_MIME.to_owned());
                return Ok(UploadSource::Binary { mime, bytes });
            }
            Some(key) if JSON_KEYS.contains(&key) => {
                let text = field.text().await.map_err(|_| invalid())?;
                if !text.trim().is_empty() {
                    return base64_source(&text);
                }
            }
            _ => continue,
        }
    }
    Err(missing_base64())
}

pub struct Upload;

#[async_trait]
impl Endpoint for Upload {
    const NAME: &'static str = "upload";
    const NEEDS_UPSTREAM_KEY: bool = false;

    type Params = UploadSource;
    type Outcome = String;

    async fn normalize(req: Request) -> Result<UploadSource, GatewayError> {
        let kind = content_type(req.headers()).to_owned();
        if kind.contains("multipart/form-data") {
            return from_multipart(req).await;
        }
        let bytes = read_body(req).await?;
        if kind.contains("application/json") {
            from_json(&bytes)
        } else {
            from_text(&bytes)
        }
    }

    async fn invoke<T>(_state: &AppState<T>, source: UploadSource) -> Result<String, GatewayError>
    where
        T: HttpClient + Send + Sync,
    {
        let url = source.into_data_url();
        debug!(length = url.len(), "Built data URL");
        Ok(url)
    }

    async fn relay(image_url: String) -> Result<Response, GatewayError> {
        Ok(Json(json!({ "imageUrl": image_url })).into_response())
    }
}
