/// Axum handlers for the gateway routes
use crate::AppState;
use crate::client::HttpClient;
use crate::endpoints::{Chat, DeleteAccount, ImageEdit, Speech, Transcription, Upload};
use crate::errors::GatewayError;
use crate::pipeline;
use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::instrument;

#[instrument(skip(state, req))]
pub async fn chat<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
    req: Request,
) -> Response {
    pipeline::run::<Chat, T>(&state, req).await
}

#[instrument(skip(state, req))]
pub async fn speech<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
    req: Request,
) -> Response {
    pipeline::run::<Speech, T>(&state, req).await
}

#[instrument(skip(state, req))]
pub async fn transcription<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
    req: Request,
) -> Response {
    pipeline::run::<Transcription, T>(&state, req).await
}

#[instrument(skip(state, req))]
pub async fn image_edit<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
    req: Request,
) -> Response {
    pipeline::run::<ImageEdit, T>(&state, req).await
}

#[instrument(skip(state, req))]
pub async fn upload<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
    req: Request,
) -> Response {
    pipeline::run::<Upload, T>(&state, req).await
}

#[instrument(skip(state, req))]
pub async fn delete_account<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
    req: Request,
) -> Response {
    pipeline::run::<DeleteAccount, T>(&state, req).await
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found." }))).into_response()
}

pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed." })),
    )
        .into_response()
}

/// Turns a handler panic into the generic 500 response.
pub fn internal_error(panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let cause = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    GatewayError::Internal(format!("handler panicked: {cause}")).into_response()
}
