//! AI Gateway - a thin authenticated relay in front of generative-AI APIs
//!
//! Each route validates the inbound request, turns it into exactly one call to a fixed
//! upstream route, and relays the answer back with CORS headers attached. Nothing is
//! stored between requests.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::post;
use axum_prometheus::{
    GenericMetricLayer, Handle, PrometheusMetricLayerBuilder,
    metrics_exporter_prometheus::PrometheusHandle,
};
use std::borrow::Cow;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{info, instrument};

pub mod auth;
pub mod client;
pub mod cors;
pub mod endpoints;
pub mod errors;
pub mod handlers;
pub mod identity;
pub mod media;
pub mod multipart;
pub mod pipeline;
pub mod relay;
pub mod settings;

use client::{HttpClient, HyperClient, PoolConfig};
use settings::Settings;

/// The main application state: the upstream HTTP client and the immutable settings
#[derive(Clone, Debug)]
pub struct AppState<T: HttpClient> {
    pub http_client: T,
    pub settings: Arc<Settings>,
}

impl AppState<HyperClient> {
    /// Create a new AppState with the default Hyper client
    pub fn new(settings: Settings, pool: PoolConfig) -> Self {
        let http_client = client::create_hyper_client(pool);
        Self {
            http_client,
            settings: Arc::new(settings),
        }
    }
}

impl<T: HttpClient> AppState<T> {
    /// Create a new AppState with a custom HTTP client (useful for testing)
    pub fn with_client(settings: Settings, http_client: T) -> Self {
        Self {
            http_client,
            settings: Arc::new(settings),
        }
    }
}

/// Build the main router for the gateway
/// This creates routes for:
/// - `/chat` - Streamed chat completions
/// - `/tts` - Speech synthesis
/// - `/stt` - Transcription
/// - `/image-edit` - Image edits
/// - `/upload` - Base64 to data URL
/// - `/delete-account` - End-user account deletion
#[instrument(skip(state))]
pub fn build_router<T: HttpClient + Clone + Send + Sync + 'static>(state: AppState<T>) -> Router {
    info!("Building router");
    Router::new()
        .route(
            "/chat",
            post(handlers::chat).fallback(handlers::method_not_allowed),
        )
        .route(
            "/tts",
            post(handlers::speech).fallback(handlers::method_not_allowed),
        )
        .route(
            "/stt",
            post(handlers::transcription).fallback(handlers::method_not_allowed),
        )
        .route(
            "/image-edit",
            post(handlers::image_edit).fallback(handlers::method_not_allowed),
        )
        .route(
            "/upload",
            post(handlers::upload).fallback(handlers::method_not_allowed),
        )
        .route(
            "/delete-account",
            post(handlers::delete_account).fallback(handlers::method_not_allowed),
        )
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(endpoints::MAX_REQUEST_BODY))
        .layer(CatchPanicLayer::custom(handlers::internal_error))
        .layer(middleware::from_fn(cors::preflight))
        .layer(cors::allow_headers())
        .layer(cors::allow_methods())
        .layer(cors::allow_origin())
        .with_state(state)
}

/// Builds a router for the metrics endpoint.
#[instrument(skip(handle))]
pub fn build_metrics_router(handle: PrometheusHandle) -> Router {
    info!("Building metrics router");
    Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

type MetricsLayerAndHandle = (
    GenericMetricLayer<'static, PrometheusHandle, Handle>,
    PrometheusHandle,
);

/// Builds a layer and handle for prometheus metrics collection.
///
/// # Parameters
/// - `prefix`: A string prefix for the metrics, either a string literal or an owned string.
pub fn build_metrics_layer_and_handle(
    prefix: impl Into<Cow<'static, str>>,
) -> MetricsLayerAndHandle {
    info!("Building metrics layer");
    PrometheusMetricLayerBuilder::new()
        .with_prefix(prefix)
        .enable_response_body_size(true)
        .with_endpoint_label_type(axum_prometheus::EndpointLabel::Exact)
        .with_default_metrics()
        .build_pair()
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use std::sync::Mutex;

    type Responder = dyn Fn(&MockRequest) -> Option<axum::response::Response> + Send + Sync;

    /// Records every outbound request and answers from a closure. A `None` answer
    /// simulates a transport failure.
    pub struct MockHttpClient {
        pub requests: Arc<Mutex<Vec<MockRequest>>>,
        responder: Arc<Responder>,
    }

    #[derive(Debug, Clone)]
    pub struct MockRequest {
        pub method: String,
        pub uri: String,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl MockRequest {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        }

        pub fn json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.body).unwrap()
        }

        pub fn body_text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    impl MockHttpClient {
        pub fn new(status: StatusCode, body: &str) -> Self {
            Self::with_content_type(status, None, body.as_bytes())
        }

        pub fn with_content_type(
            status: StatusCode,
            content_type: Option<&'static str>,
            body: &[u8],
        ) -> Self {
            let body = body.to_vec();
            Self::from_fn(move |_| {
                let mut builder = axum::response::Response::builder().status(status);
                if let Some(content_type) = content_type {
                    builder = builder.header("content-type", content_type);
                }
                Some(builder.body(axum::body::Body::from(body.clone())).unwrap())
            })
        }

        pub fn new_streaming(status: StatusCode, chunks: Vec<String>) -> Self {
            Self::from_fn(move |_| {
                use axum::body::Body;
                use futures_util::stream;

                let stream = stream::iter(
                    chunks
                        .clone()
                        .into_iter()
                        .map(|chunk| Ok::<_, std::io::Error>(chunk.into_bytes())),
                );

                Some(
                    axum::response::Response::builder()
                        .status(status)
                        .header("content-type", "text/event-stream")
                        .body(Body::from_stream(stream))
                        .unwrap(),
                )
            })
        }

        /// Every request fails at the transport level.
        pub fn unreachable() -> Self {
            Self::from_fn(|_| None)
        }

        pub fn from_fn(
            responder: impl Fn(&MockRequest) -> Option<axum::response::Response>
            + Send
            + Sync
            + 'static,
        ) -> Self {
            Self {
                requests: Arc::new(Mutex::new(Vec::new())),
                responder: Arc::new(responder),
            }
        }

        pub fn get_requests(&self) -> Vec<MockRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl std::fmt::Debug for MockHttpClient {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockHttpClient")
                .field("requests", &self.requests)
                .field("responder", &"<closure>")
                .finish()
        }
    }

    impl Clone for MockHttpClient {
        fn clone(&self) -> Self {
            Self {
                requests: Arc::clone(&self.requests),
                responder: Arc::clone(&self.responder),
            }
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn request(
            &self,
            req: axum::extract::Request,
        ) -> Result<axum::response::Response, client::ClientError> {
            let method = req.method().to_string();
            let uri = req.uri().to_string();
            let headers = req
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();

            let body = axum::body::to_bytes(req.into_body(), usize::MAX)
                .await
                .map_err(|e| Box::new(e) as client::ClientError)?
                .to_vec();

            let mock_request = MockRequest {
                method,
                uri,
                headers,
                body,
            };
            let response = (self.responder)(&mock_request);
            self.requests.lock().unwrap().push(mock_request);

            response.ok_or_else(|| "connection refused".into())
        }
    }
}
