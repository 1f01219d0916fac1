//! `POST /tts`: text to speech, relaying the audio stream.
use async_trait::async_trait;
use axum::{extract::Request, response::Response};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::instrument;

use super::read_json_object;
use crate::AppState;
use crate::client::HttpClient;
use crate::errors::GatewayError;
use crate::pipeline::{self, Endpoint};
use crate::relay;

pub const ROUTE: &str = "v1/audio/speech";

pub const DEFAULT_VOICE: &str = "onyx";
pub const DEFAULT_MODEL: &str = "tts-1";
pub const DEFAULT_FORMAT: &str = "mp3";

/// Also the upstream payload, field for field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeechRequest {
    pub model: String,
    pub voice: String,
    pub input: String,
    pub format: String,
}

impl SpeechRequest {
    pub fn from_body(body: &Map<String, Value>) -> Result<Self, GatewayError> {
        // `text` wins whenever it is a string, even an empty one.
        let input = match (body.get("text"), body.get("input")) {
            (Some(Value::String(text)), _) => text.as_str(),
            (_, Some(Value::String(input))) => input.as_str(),
            _ => "",
        };
        if input.trim().is_empty() {
            return Err(GatewayError::InvalidInput("Missing text.".into()));
        }

        let selector = |key: &str, default: &str| {
            body.get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_owned()
        };

        Ok(Self {
            model: selector("model", DEFAULT_MODEL),
            voice: selector("voice", DEFAULT_VOICE),
            input: input.to_owned(),
            format: selector("format", DEFAULT_FORMAT),
        })
    }
}

pub struct Speech;

#[async_trait]
impl Endpoint for Speech {
    const NAME: &'static str = "speech";

    type Params = SpeechRequest;
    type Outcome = Response;

    async fn normalize(req: Request) -> Result<SpeechRequest, GatewayError> {
        let body = read_json_object(req).await?;
        SpeechRequest::from_body(&body)
    }

    #[instrument(skip_all, fields(model = %params.model, voice = %params.voice))]
    async fn invoke<T>(state: &AppState<T>, params: SpeechRequest) -> Result<Response, GatewayError>
    where
        T: HttpClient + Send + Sync,
    {
        let body = serde_json::to_vec(&params).map_err(|e| GatewayError::Internal(e.to_string()))?;
        let req = pipeline::upstream_request(
            &state.settings,
            ROUTE,
            "application/json",
            Some("audio/mpeg"),
            body.into(),
        )?;
        pipeline::send(&state.http_client, req).await
    }

    async fn relay(upstream: Response) -> Result<Response, GatewayError> {
        Ok(relay::stream(upstream, "audio/mpeg"))
    }
}
