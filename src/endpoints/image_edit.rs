//! `POST /image-edit`: prompt-driven image edits.
//!
//! Unlike the other routes the upstream answer is read in full, so it can be reshaped
//! into `{imageBase64}` or `{imageUrl}` for the caller.
use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    extract::Request,
    http::{
        HeaderValue, Method, StatusCode,
        header::{CONTENT_TYPE, LOCATION},
    },
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{non_empty_str, read_json_object};
use crate::AppState;
use crate::client::HttpClient;
use crate::errors::GatewayError;
use crate::media::{self, DEFAULT_EDIT_MIME, InlineImage};
use crate::multipart::Form;
use crate::pipeline::{self, Endpoint};
use crate::relay::{self, Buffered};

pub const ROUTE: &str = "v1/images/edits";

pub const DEFAULT_MODEL: &str = "gpt-image-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Fetched by the gateway before the edit call.
    Remote(Url),
    Inline(InlineImage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEditRequest {
    pub prompt: String,
    pub image: ImageSource,
    pub mask: InlineImage,
    pub model: String,
    pub size: Option<String>,
}

fn missing(field: &str) -> GatewayError {
    GatewayError::InvalidInput(format!("Missing {field}."))
}

impl ImageEditRequest {
    pub fn from_body(body: &Map<String, Value>) -> Result<Self, GatewayError> {
        let prompt = non_empty_str(body, "prompt")
            .ok_or_else(|| missing("prompt"))?
            .trim()
            .to_owned();

        // A URL takes precedence over inline bytes when both are supplied.
        let image = match (
            non_empty_str(body, "imageUrl"),
            non_empty_str(body, "imageBase64"),
        ) {
            (Some(url), _) => ImageSource::Remote(parse_image_url(url.trim())?),
            (None, Some(base64)) => {
                ImageSource::Inline(media::decode_inline(base64, DEFAULT_EDIT_MIME)?)
            }
            (None, None) => return Err(missing("image")),
        };

        let mask = non_empty_str(body, "maskBase64").ok_or_else(|| missing("mask"))?;
        let mask = media::decode_inline(mask, DEFAULT_EDIT_MIME)?;

        let model = non_empty_str(body, "model")
            .map(|model| model.trim().to_owned())
            .unwrap_or_else(|| DEFAULT_MODEL.to_owned());
        let size = body.get("size").and_then(Value::as_str).map(str::to_owned);

        Ok(Self {
            prompt,
            image,
            mask,
            model,
            size,
        })
    }

    fn into_form(self, image: InlineImage) -> Form {
        let image_name = image.file_name("image");
        let mask_name = self.mask.file_name("mask");
        Form::new()
            .text("model", self.model)
            .text("prompt", self.prompt)
            .file("image", image_name, image.mime, image.bytes)
            .file("mask", mask_name, self.mask.mime, self.mask.bytes)
            .text_opt("size", self.size)
    }
}

fn parse_image_url(raw: &str) -> Result<Url, GatewayError> {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        _ => Err(GatewayError::InvalidInput("Invalid imageUrl.".into())),
    }
}

/// Redirect hops followed when fetching a caller-supplied image.
pub const MAX_IMAGE_REDIRECTS: usize = 5;

fn fetch_failed(status: StatusCode) -> GatewayError {
    GatewayError::UpstreamFetch {
        status,
        message: "Failed to fetch image.".into(),
    }
}

/// Downloads a caller-supplied image, following up to [`MAX_IMAGE_REDIRECTS`]
/// redirects. No credentials are attached.
#[instrument(skip_all, fields(url = %url))]
async fn fetch_image<T: HttpClient + Send + Sync>(
    client: &T,
    url: &Url,
) -> Result<InlineImage, GatewayError> {
    let mut current = url.clone();
    let mut hops = 0;

    let response = loop {
        let req = Request::builder()
            .method(Method::GET)
            .uri(current.as_str())
            .body(Body::empty())
            .map_err(|_| GatewayError::InvalidInput("Invalid imageUrl.".into()))?;

        let response = client.request(req).await.map_err(|e| {
            warn!(error = %e, "Image fetch failed");
            fetch_failed(StatusCode::INTERNAL_SERVER_ERROR)
        })?;

        if !response.status().is_redirection() {
            break response;
        }
        let Some(next) = redirect_target(&current, &response) else {
            warn!(status = %response.status(), "Image fetch redirect without usable location");
            return Err(fetch_failed(StatusCode::INTERNAL_SERVER_ERROR));
        };
        hops += 1;
        if hops > MAX_IMAGE_REDIRECTS {
            warn!(hops, "Image fetch exceeded redirect limit");
            return Err(fetch_failed(StatusCode::INTERNAL_SERVER_ERROR));
        }
        debug!(location = %next, "Following image redirect");
        current = next;
    };

    let status = response.status();
    let content_type = response.headers().get(CONTENT_TYPE).cloned();
    let body = axum::body::to_bytes(response.into_body(), relay::MAX_BUFFERED_BODY)
        .await
        .map_err(|e| {
            warn!(error = %e, "Reading fetched image failed");
            fetch_failed(StatusCode::INTERNAL_SERVER_ERROR)
        })?;
    let fetched = Buffered {
        status,
        content_type,
        body,
    };
    if !fetched.status.is_success() {
        warn!(status = %fetched.status, "Image fetch returned non-success");
        return Err(fetch_failed(fetched.status));
    }

    let declared = fetched
        .content_type
        .as_ref()
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|mime| mime.starts_with("image/"))
        .map(str::to_owned);
    let mime = declared
        .or_else(|| media::sniff_mime(&fetched.body).map(str::to_owned))
        .unwrap_or_else(|| DEFAULT_EDIT_MIME.to_owned());

    debug!(%mime, size_bytes = fetched.body.len(), "Fetched source image");
    Ok(InlineImage {
        mime,
        bytes: fetched.body,
    })
}

/// Resolves a `Location` header against the URL that produced it. Only http(s) targets
/// are followed.
fn redirect_target(current: &Url, response: &Response) -> Option<Url> {
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    current
        .join(location.trim())
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Reshapes a successful upstream payload for the caller.
pub fn reshape(payload: Value) -> Value {
    let first = payload.get("data").and_then(|data| data.get(0));
    if let Some(b64) = first
        .and_then(|item| item.get("b64_json"))
        .and_then(Value::as_str)
    {
        return json!({ "imageBase64": format!("data:image/png;base64,{b64}") });
    }
    if let Some(url) = first.and_then(|item| item.get("url")).and_then(Value::as_str) {
        return json!({ "imageUrl": url });
    }
    payload
}

fn interpret(upstream: Buffered) -> Result<Response, GatewayError> {
    if !upstream.status.is_success() {
        let text = upstream.text();
        let message = if text.trim().is_empty() {
            "Image edit failed.".to_owned()
        } else {
            text
        };
        return Err(GatewayError::Upstream {
            status: upstream.status,
            message,
        });
    }

    match serde_json::from_slice::<Value>(&upstream.body) {
        Ok(payload) => Ok(Json(reshape(payload)).into_response()),
        Err(e) => {
            // The raw text goes back unchanged, flagged as a gateway error.
            warn!(error = %e, "Upstream image edit response was not JSON");
            let content_type = upstream
                .content_type
                .unwrap_or_else(|| HeaderValue::from_static("text/plain; charset=utf-8"));
            Ok((
                StatusCode::BAD_GATEWAY,
                [(CONTENT_TYPE, content_type)],
                upstream.body,
            )
                .into_response())
        }
    }
}

pub struct ImageEdit;

#[async_trait]
impl Endpoint for ImageEdit {
    const NAME: &'static str = "image_edit";

    type Params = ImageEditRequest;
    type Outcome = Response;

    async fn normalize(req: Request) -> Result<ImageEditRequest, GatewayError> {
        let body = read_json_object(req).await?;
        ImageEditRequest::from_body(&body)
    }

    #[instrument(skip_all, fields(model = %params.model))]
    async fn invoke<T>(
        state: &AppState<T>,
        params: ImageEditRequest,
    ) -> Result<Response, GatewayError>
    where
        T: HttpClient + Send + Sync,
    {
        let image = match &params.image {
            ImageSource::Remote(url) => fetch_image(&state.http_client, url).await?,
            ImageSource::Inline(image) => image.clone(),
        };

        let form = params.into_form(image);
        let req = pipeline::upstream_request(
            &state.settings,
            ROUTE,
            &form.content_type(),
            None,
            form.into_bytes(),
        )?;
        pipeline::send(&state.http_client, req).await
    }

    async fn relay(upstream: Response) -> Result<Response, GatewayError> {
        let buffered = relay::read_to_bytes(upstream).await?;
        interpret(buffered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockHttpClient, MockRequest};
    use bytes::Bytes;
    use rstest::rstest;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nrest";

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn png_b64() -> String {
        media::encode(PNG)
    }

    #[test]
    fn test_url_takes_precedence() {
        let request = ImageEditRequest::from_body(&body(json!({
            "prompt": "add a hat",
            "imageUrl": "https://cdn.example.com/cat.png",
            "imageBase64": png_b64(),
            "maskBase64": png_b64(),
        })))
        .unwrap();
        assert_eq!(
            request.image,
            ImageSource::Remote("https://cdn.example.com/cat.png".parse().unwrap())
        );
        assert_eq!(request.model, DEFAULT_MODEL);
        assert_eq!(request.size, None);
    }

    #[test]
    fn test_inline_image_and_options() {
        let request = ImageEditRequest::from_body(&body(json!({
            "prompt": "add a hat",
            "imageUrl": "  ",
            "imageBase64": format!("data:image/png;base64,{}", png_b64()),
            "maskBase64": png_b64(),
            "model": "dall-e-2",
            "size": "512x512",
        })))
        .unwrap();
        let ImageSource::Inline(image) = &request.image else {
            panic!("expected inline image");
        };
        assert_eq!(image.bytes.as_ref(), PNG);
        assert_eq!(request.model, "dall-e-2");
        assert_eq!(request.size.as_deref(), Some("512x512"));
    }

    #[rstest]
    #[case::no_prompt(json!({"imageBase64": "AAAA", "maskBase64": "AAAA"}), "Missing prompt.")]
    #[case::blank_prompt(json!({"prompt": " ", "imageBase64": "AAAA", "maskBase64": "AAAA"}), "Missing prompt.")]
    #[case::no_image(json!({"prompt": "p", "maskBase64": "AAAA"}), "Missing image.")]
    #[case::no_mask(json!({"prompt": "p", "imageBase64": "AAAA"}), "Missing mask.")]
    #[case::bad_url(json!({"prompt": "p", "imageUrl": "ftp://x/y.png", "maskBase64": "AAAA"}), "Invalid imageUrl.")]
    #[case::bad_base64(json!({"prompt": "p", "imageBase64": "@@@", "maskBase64": "AAAA"}), "Invalid base64 data.")]
    fn test_validation_failures(#[case] input: Value, #[case] message: &str) {
        let err = ImageEditRequest::from_body(&body(input)).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
        assert_eq!(err.to_string(), message);
    }

    #[test]
    fn test_reshape_variants() {
        assert_eq!(
            reshape(json!({"data": [{"b64_json": "QUJD"}]})),
            json!({"imageBase64": "data:image/png;base64,QUJD"})
        );
        assert_eq!(
            reshape(json!({"data": [{"url": "https://img.example.com/1.png"}]})),
            json!({"imageUrl": "https://img.example.com/1.png"})
        );
        assert_eq!(
            reshape(json!({"created": 1, "data": []})),
            json!({"created": 1, "data": []})
        );
    }

    #[tokio::test]
    async fn test_interpret_non_json_success_is_proxied_as_error() {
        let response = interpret(Buffered {
            status: StatusCode::OK,
            content_type: None,
            body: Bytes::from_static(b"<html>oops</html>"),
        })
        .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"<html>oops</html>");
    }

    #[test]
    fn test_interpret_upstream_error_keeps_status_and_text() {
        let err = interpret(Buffered {
            status: StatusCode::BAD_REQUEST,
            content_type: None,
            body: Bytes::from_static(br#"{"error":{"message":"bad mask"}}"#),
        })
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), r#"{"error":{"message":"bad mask"}}"#);
    }

    fn image_response(status: StatusCode, location: Option<&str>, body: Body) -> Response {
        let mut builder = Response::builder().status(status);
        if let Some(location) = location {
            builder = builder.header(LOCATION, location);
        }
        builder.body(body).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_follows_relative_redirect() {
        let client = MockHttpClient::from_fn(|req: &MockRequest| {
            Some(if req.uri == "https://cdn.example.com/a/cat" {
                image_response(StatusCode::FOUND, Some("../b/cat.jpg"), Body::empty())
            } else {
                image_response(StatusCode::OK, None, Body::from(vec![0xFF, 0xD8, 0xFF, 0xE0]))
            })
        });

        let url = "https://cdn.example.com/a/cat".parse().unwrap();
        let image = fetch_image(&client, &url).await.unwrap();
        assert_eq!(image.mime, "image/jpeg");

        let requests = client.get_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].method, "GET");
        assert_eq!(requests[1].uri, "https://cdn.example.com/b/cat.jpg");
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_redirect_limit() {
        let client = MockHttpClient::from_fn(|_| {
            Some(image_response(
                StatusCode::MOVED_PERMANENTLY,
                Some("https://cdn.example.com/loop"),
                Body::empty(),
            ))
        });

        let url = "https://cdn.example.com/loop".parse().unwrap();
        let err = fetch_image(&client, &url).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamFetch { .. }));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Failed to fetch image.");
        assert_eq!(client.get_requests().len(), MAX_IMAGE_REDIRECTS + 1);
    }

    #[rstest]
    #[case::no_location(None)]
    #[case::non_http_location(Some("ftp://files.example.com/cat.png"))]
    #[tokio::test]
    async fn test_fetch_rejects_unusable_redirect(#[case] location: Option<&'static str>) {
        let client = MockHttpClient::from_fn(move |_| {
            Some(image_response(StatusCode::SEE_OTHER, location, Body::empty()))
        });

        let url = "https://cdn.example.com/cat.png".parse().unwrap();
        let err = fetch_image(&client, &url).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamFetch { .. }));
        assert_eq!(client.get_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_body_failure_is_a_fetch_error() {
        let client = MockHttpClient::from_fn(|_| {
            let chunks = futures_util::stream::iter(vec![
                Ok(Bytes::from_static(b"\x89PNG")),
                Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            ]);
            Some(image_response(StatusCode::OK, None, Body::from_stream(chunks)))
        });

        let url = "https://cdn.example.com/cat.png".parse().unwrap();
        let err = fetch_image(&client, &url).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::UpstreamFetch {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                ..
            }
        ));
        assert_eq!(err.to_string(), "Failed to fetch image.");
    }

    #[test]
    fn test_form_names_files_by_mime() {
        let request = ImageEditRequest::from_body(&body(json!({
            "prompt": "p",
            "imageBase64": png_b64(),
            "maskBase64": png_b64(),
        })))
        .unwrap();
        let ImageSource::Inline(image) = request.image.clone() else {
            panic!("expected inline image");
        };
        let bytes = request.into_form(image).into_bytes();
        let form = String::from_utf8_lossy(&bytes);
        assert!(form.contains("name=\"image\"; filename=\"image.png\"\r\nContent-Type: image/png"));
        assert!(form.contains("name=\"mask\"; filename=\"mask.png\"\r\nContent-Type: image/png"));
        assert!(form.contains("name=\"model\"\r\n\r\ngpt-image-1\r\n"));
        assert!(!form.contains("name=\"size\""));
    }
}
