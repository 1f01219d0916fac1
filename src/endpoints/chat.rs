//! `POST /chat`: streamed chat completions with server-side system prompts.
use async_trait::async_trait;
use axum::{extract::Request, response::Response};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::read_json_object;
use crate::AppState;
use crate::client::HttpClient;
use crate::errors::GatewayError;
use crate::pipeline::{self, Endpoint};
use crate::relay;

pub const ROUTE: &str = "v1/chat/completions";

/// Caller-supplied credentials that must never be forwarded.
const STRIPPED_FIELDS: [&str; 2] = ["apiKey", "openaiApiKey"];

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Value>,
    /// Every other top-level field, passed through untouched.
    pub params: Map<String, Value>,
}

impl ChatRequest {
    pub fn from_body(mut body: Map<String, Value>) -> Self {
        for field in STRIPPED_FIELDS {
            body.remove(field);
        }
        let messages = match body.remove("messages") {
            Some(Value::Array(messages)) => messages,
            _ => Vec::new(),
        };
        Self {
            messages,
            params: body,
        }
    }

    /// The upstream payload: system messages first, then the caller's, always streamed.
    pub fn into_payload(self, system: Vec<Value>) -> Value {
        let mut payload = self.params;
        let mut messages = system;
        messages.extend(self.messages);
        payload.insert("messages".into(), Value::Array(messages));
        payload.insert("stream".into(), Value::Bool(true));
        Value::Object(payload)
    }
}

pub struct Chat;

#[async_trait]
impl Endpoint for Chat {
    const NAME: &'static str = "chat";

    type Params = ChatRequest;
    type Outcome = Response;

    async fn normalize(req: Request) -> Result<ChatRequest, GatewayError> {
        let body = read_json_object(req).await?;
        Ok(ChatRequest::from_body(body))
    }

    #[instrument(skip_all, fields(messages = params.messages.len()))]
    async fn invoke<T>(state: &AppState<T>, params: ChatRequest) -> Result<Response, GatewayError>
    where
        T: HttpClient + Send + Sync,
    {
        let system = state
            .settings
            .system_messages()
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        debug!(system_messages = system.len(), "Prepending system messages");

        let body = serde_json::to_vec(&params.into_payload(system))
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        let req = pipeline::upstream_request(
            &state.settings,
            ROUTE,
            "application/json",
            Some("text/event-stream"),
            body.into(),
        )?;
        pipeline::send(&state.http_client, req).await
    }

    async fn relay(upstream: Response) -> Result<Response, GatewayError> {
        Ok(relay::stream(upstream, "text/event-stream"))
    }
}
