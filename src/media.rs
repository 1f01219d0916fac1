//! Data URL and inline image helpers.
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;

use crate::errors::GatewayError;

pub const DEFAULT_UPLOAD_MIME: &str = "image/jpeg";
pub const DEFAULT_EDIT_MIME: &str = "image/png";

/// A decoded inline image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime: String,
    pub bytes: Bytes,
}

impl InlineImage {
    /// A filename with an extension matching the MIME type, for multipart parts.
    pub fn file_name(&self, stem: &str) -> String {
        format!("{stem}.{}", extension(&self.mime))
    }
}

/// Splits `data:<mime>;base64,<payload>` into its MIME type and payload.
/// Returns `None` when the input is not a base64 data URL.
pub fn split_data_url(input: &str) -> Option<(&str, &str)> {
    let rest = input.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    Some((mime, payload))
}

/// Wraps base64 text as a data URL; text already carrying a `data:` prefix is kept as is.
pub fn to_data_url(base64_text: &str, default_mime: &str) -> String {
    let trimmed = base64_text.trim();
    if trimmed.starts_with("data:") {
        trimmed.to_owned()
    } else {
        format!("data:{default_mime};base64,{trimmed}")
    }
}

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes either a data URL or bare base64. The MIME type comes from the data URL
/// when present, otherwise from the decoded bytes' magic prefix.
pub fn decode_inline(input: &str, default_mime: &str) -> Result<InlineImage, GatewayError> {
    let trimmed = input.trim();
    let (declared, payload) = match split_data_url(trimmed) {
        Some((mime, payload)) => (Some(mime), payload),
        None => (None, trimmed),
    };

    // Some clients wrap long base64 lines.
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|_| GatewayError::InvalidInput("Invalid base64 data.".into()))?;

    let mime = declared
        .filter(|mime| !mime.is_empty())
        .map(str::to_owned)
        .or_else(|| sniff_mime(&bytes).map(str::to_owned))
        .unwrap_or_else(|| default_mime.to_owned());

    Ok(InlineImage {
        mime,
        bytes: Bytes::from(bytes),
    })
}

/// Image MIME type by literal magic prefix.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

fn extension(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "png",
    }
}
