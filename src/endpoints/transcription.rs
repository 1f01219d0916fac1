//! `POST /stt`: speech to text from a multipart audio upload.
use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Multipart, Request},
    response::Response,
};
use bytes::Bytes;
use tracing::{debug, instrument};

use super::content_type;
use crate::AppState;
use crate::client::HttpClient;
use crate::errors::GatewayError;
use crate::multipart::Form;
use crate::pipeline::{self, Endpoint};
use crate::relay;

pub const ROUTE: &str = "v1/audio/transcriptions";

pub const DEFAULT_MODEL: &str = "gpt-4o-mini-transcribe";
pub const DEFAULT_FILE_NAME: &str = "audio.m4a";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Optional selectors; each is forwarded only when present and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TranscriptionOptions {
    pub model: Option<String>,
    pub language: Option<String>,
    pub prompt: Option<String>,
    pub temperature: Option<String>,
    pub response_format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionRequest {
    pub file: AudioFile,
    pub options: TranscriptionOptions,
}

impl TranscriptionOptions {
    /// Trimmed model, falling back to the default when absent or blank.
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }
}

impl TranscriptionRequest {
    fn into_form(self) -> Form {
        let Self { file, options } = self;
        let model = options.model().to_owned();
        Form::new()
            .file("file", file.file_name, file.content_type, file.data)
            .text("model", model)
            .text_opt("language", options.language)
            .text_opt("prompt", options.prompt)
            .text_opt("temperature", options.temperature)
            .text_opt("response_format", options.response_format)
    }
}

fn invalid_form() -> GatewayError {
    GatewayError::InvalidInput("Invalid form data.".into())
}

/// Keeps the first value of a repeated field; empty values count as absent.
fn set_once(slot: &mut Option<String>, value: String) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value);
    }
}

pub struct Transcription;

#[async_trait]
impl Endpoint for Transcription {
    const NAME: &'static str = "transcription";

    type Params = TranscriptionRequest;
    type Outcome = Response;

    async fn normalize(req: Request) -> Result<TranscriptionRequest, GatewayError> {
        if !content_type(req.headers()).contains("multipart/form-data") {
            return Err(GatewayError::InvalidInput(
                "Expected multipart/form-data.".into(),
            ));
        }

        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|_| invalid_form())?;

        let mut file = None;
        let mut options = TranscriptionOptions::default();
        while let Some(field) = multipart.next_field().await.map_err(|_| invalid_form())? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            match name.as_str() {
                // Only a part that looks like a file counts as the audio upload.
                "file" if field.file_name().is_some() || field.content_type().is_some() => {
                    let file_name = field
                        .file_name()
                        .filter(|name| !name.is_empty())
                        .unwrap_or(DEFAULT_FILE_NAME)
                        .to_owned();
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_owned();
                    let data = field.bytes().await.map_err(|_| invalid_form())?;
                    if file.is_none() {
                        file = Some(AudioFile {
                            file_name,
                            content_type,
                            data,
                        });
                    }
                }
                "model" | "language" | "prompt" | "temperature" | "response_format" => {
                    let value = field.text().await.map_err(|_| invalid_form())?;
                    let slot = match name.as_str() {
                        "model" => &mut options.model,
                        "language" => &mut options.language,
                        "prompt" => &mut options.prompt,
                        "temperature" => &mut options.temperature,
                        _ => &mut options.response_format,
                    };
                    set_once(slot, value);
                }
                _ => continue,
            }
        }

        let file = file.ok_or_else(|| GatewayError::InvalidInput("Missing audio file.".into()))?;
        debug!(
            file_name = %file.file_name,
            size_bytes = file.data.len(),
            model = options.model(),
            "Transcription upload parsed"
        );
        Ok(TranscriptionRequest { file, options })
    }

    #[instrument(skip_all)]
    async fn invoke<T>(
        state: &AppState<T>,
        request: TranscriptionRequest,
    ) -> Result<Response, GatewayError>
    where
        T: HttpClient + Send + Sync,
    {
        let form = request.into_form();
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
        Ok(relay::stream(upstream, "application/json"))
    }
}
