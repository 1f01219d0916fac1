//! Fixed CORS policy. Every response carries the same three headers and every `OPTIONS`
//! request is answered with an empty 204 before authentication or routing.
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::set_header::SetResponseHeaderLayer;

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "POST, OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type, Authorization, X-App-Token";

pub async fn preflight(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    next.run(req).await
}

fn fixed(name: HeaderName, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(name, HeaderValue::from_static(value))
}

pub fn allow_origin() -> SetResponseHeaderLayer<HeaderValue> {
    fixed(header::ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW_ORIGIN)
}

pub fn allow_methods() -> SetResponseHeaderLayer<HeaderValue> {
    fixed(header::ACCESS_CONTROL_ALLOW_METHODS, ALLOW_METHODS)
}

pub fn allow_headers() -> SetResponseHeaderLayer<HeaderValue> {
    fixed(header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOW_HEADERS)
}
