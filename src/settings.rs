//! Immutable gateway settings.
//!
//! Built once at startup and handed to every handler through [`crate::AppState`]. Absent
//! credentials are allowed here; the endpoints that need them fail per request instead.
use bon::Builder;
use serde::Serialize;
use url::Url;

use crate::errors::GatewayError;

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/";

/// A single chat message prepended to every chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemMessage {
    pub role: &'static str,
    pub content: String,
}

/// Credentials for the external identity provider used by account deletion.
///
/// The public key authenticates as the calling end user, the service key carries the
/// administrative privileges needed to remove their data. The two must never be swapped.
#[derive(Clone, Builder)]
pub struct IdentitySettings {
    pub url: Url,
    #[builder(into)]
    pub public_key: String,
    #[builder(into)]
    pub service_key: String,
}

impl std::fmt::Debug for IdentitySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySettings")
            .field("url", &self.url.as_str())
            .field("public_key", &"<redacted>")
            .field("service_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Builder)]
pub struct Settings {
    /// Base URL of the generative-AI API. Fixed routes are joined onto it.
    #[builder(default = default_upstream_url())]
    pub upstream_url: Url,
    /// Service credential sent as a bearer token on every upstream call.
    #[builder(into)]
    pub upstream_key: Option<String>,
    /// Shared secret every caller of the application endpoints must present.
    #[builder(into)]
    pub app_secret: Option<String>,
    #[builder(into)]
    pub prompt_brain: Option<String>,
    #[builder(into)]
    pub prompt_tech: Option<String>,
    pub identity: Option<IdentitySettings>,
}

fn default_upstream_url() -> Url {
    Url::parse(DEFAULT_UPSTREAM_URL).expect("default upstream URL is valid")
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("upstream_url", &self.upstream_url.as_str())
            .field("upstream_key", &self.upstream_key.as_ref().map(|_| "<redacted>"))
            .field("app_secret", &self.app_secret.as_ref().map(|_| "<redacted>"))
            .field("prompt_brain", &self.prompt_brain.as_ref().map(String::len))
            .field("prompt_tech", &self.prompt_tech.as_ref().map(String::len))
            .field("identity", &self.identity)
            .finish()
    }
}

impl Settings {
    /// The configured system prompts, brain first then tech, skipping blank ones.
    pub fn system_messages(&self) -> Vec<SystemMessage> {
        [&self.prompt_brain, &self.prompt_tech]
            .into_iter()
            .flatten()
            .map(|prompt| prompt.trim())
            .filter(|prompt| !prompt.is_empty())
            .map(|prompt| SystemMessage {
                role: "system",
                content: prompt.to_owned(),
            })
            .collect()
    }

    pub fn require_upstream_key(&self) -> Result<&str, GatewayError> {
        self.upstream_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| GatewayError::Misconfigured("Missing OPENAI_API_KEY.".into()))
    }

    pub fn require_identity(&self) -> Result<&IdentitySettings, GatewayError> {
        self.identity.as_ref().ok_or_else(|| {
            GatewayError::Misconfigured("Missing Supabase environment variables.".into())
        })
    }

    /// Joins a fixed route such as `v1/audio/speech` onto the upstream base URL.
    pub fn upstream_route(&self, route: &str) -> Result<String, GatewayError> {
        join_route(&self.upstream_url, route)
    }
}

impl IdentitySettings {
    pub fn route(&self, route: &str) -> Result<String, GatewayError> {
        join_route(&self.url, route)
    }
}

fn join_route(base: &Url, route: &str) -> Result<String, GatewayError> {
    // Url::join drops the last path segment unless the base ends with '/'.
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(route.trim_start_matches('/'))
        .map(|url| url.to_string())
        .map_err(|e| GatewayError::Internal(format!("invalid upstream route {route}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_messages_order_and_blank_filtering() {
        let settings = Settings::builder()
            .prompt_brain("  be brief  ")
            .prompt_tech("know rust")
            .build();
        assert_eq!(
            settings.system_messages(),
            vec![
                SystemMessage {
                    role: "system",
                    content: "be brief".into()
                },
                SystemMessage {
                    role: "system",
                    content: "know rust".into()
                },
            ]
        );

        let only_tech = Settings::builder()
            .prompt_brain("   ")
            .prompt_tech("know rust")
            .build();
        assert_eq!(only_tech.system_messages().len(), 1);
        assert_eq!(only_tech.system_messages()[0].content, "know rust");

        assert!(Settings::builder().build().system_messages().is_empty());
    }

    #[test]
    fn test_upstream_route_keeps_base_path() {
        let settings = Settings::builder()
            .upstream_url("http://localhost:8080/openai".parse().unwrap())
            .build();
        assert_eq!(
            settings.upstream_route("/v1/audio/speech").unwrap(),
            "http://localhost:8080/openai/v1/audio/speech"
        );

        let default = Settings::builder().build();
        assert_eq!(
            default.upstream_route("v1/chat/completions").unwrap(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_missing_credentials_are_reported() {
        let settings = Settings::builder().upstream_key("").build();
        assert!(matches!(
            settings.require_upstream_key(),
            Err(GatewayError::Misconfigured(_))
        ));
        assert!(settings.require_identity().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = Settings::builder()
            .upstream_key("sk-live")
            .app_secret("hunter2")
            .build();
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("sk-live"));
        assert!(!rendered.contains("hunter2"));
    }
}
