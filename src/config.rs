//! Configuration parsing and validation for the gateway binary
//!
//! Every value can come from a command-line flag or from the environment. Credentials are
//! optional at startup; an endpoint whose credential is missing answers 500 per request.
use ai_gateway::client::PoolConfig;
use ai_gateway::settings::{DEFAULT_UPSTREAM_URL, IdentitySettings, Settings};
use anyhow::anyhow;
use clap::{ArgAction, Parser};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// The port on which the gateway will listen.
    #[arg(short = 'p', long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// The port on which the metrics server will listen.
    #[arg(long, env = "METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Whether to enable the metrics endpoint.
    #[arg(short = 'm', long, env = "METRICS", default_value_t = true, action = ArgAction::Set)]
    pub metrics: bool,

    /// The prefix to use for metrics.
    #[arg(long, default_value = "gateway")]
    pub metrics_prefix: String,

    /// Base URL of the generative-AI API.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_UPSTREAM_URL)]
    pub upstream_url: Url,

    /// Service credential for the generative-AI API.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub upstream_key: Option<String>,

    /// Shared secret callers must present.
    #[arg(long, env = "APP_SECRET", hide_env_values = true)]
    pub app_secret: Option<String>,

    #[arg(long, env = "PROMPT_BRAIN", hide_env_values = true)]
    pub prompt_brain: Option<String>,

    #[arg(long, env = "PROMPT_TECH", hide_env_values = true)]
    pub prompt_tech: Option<String>,

    /// Base URL of the identity provider used by account deletion.
    #[arg(long, env = "SUPABASE_URL")]
    pub identity_url: Option<Url>,

    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    pub identity_public_key: Option<String>,

    #[arg(long, env = "SERVICE_ROLE_KEY", hide_env_values = true)]
    pub identity_service_key: Option<String>,

    /// Older name for the service key, read when `SERVICE_ROLE_KEY` is unset.
    #[arg(long, env = "SUPABASE_SERVICE_ROLE_KEY", hide = true, hide_env_values = true)]
    pub legacy_service_key: Option<String>,

    /// Maximum number of idle HTTP connections to keep alive per upstream host.
    #[arg(long, default_value_t = 100)]
    pub pool_max_idle_per_host: usize,

    /// How long (in seconds) to keep idle HTTP connections alive.
    #[arg(long, default_value_t = 90)]
    pub pool_idle_timeout_secs: u64,
}

impl Config {
    pub fn validate(self) -> Result<Self, anyhow::Error> {
        let urls = std::iter::once(&self.upstream_url).chain(self.identity_url.as_ref());
        for url in urls {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(anyhow!("URL '{}' must use http or https", url));
            }
        }
        Ok(self)
    }

    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            max_idle_per_host: self.pool_max_idle_per_host,
            idle_timeout: Duration::from_secs(self.pool_idle_timeout_secs),
        }
    }

    /// Identity settings exist only when all three values are present and non-empty.
    fn identity(&self) -> Option<IdentitySettings> {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());

        let url = self.identity_url.clone()?;
        let public_key = non_empty(&self.identity_public_key)?;
        let service_key =
            non_empty(&self.identity_service_key).or_else(|| non_empty(&self.legacy_service_key))?;

        Some(
            IdentitySettings::builder()
                .url(url)
                .public_key(public_key)
                .service_key(service_key)
                .build(),
        )
    }

    pub fn settings(&self) -> Settings {
        Settings::builder()
            .upstream_url(self.upstream_url.clone())
            .maybe_upstream_key(self.upstream_key.clone())
            .maybe_app_secret(self.app_secret.clone())
            .maybe_prompt_brain(self.prompt_brain.clone())
            .maybe_prompt_tech(self.prompt_tech.clone())
            .maybe_identity(self.identity())
            .build()
    }
}
