// chat-gateway/crates/chat-gateway/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::{info, warn};

/// Longest accepted rate-limit window (seven days).
pub const MAX_RATE_LIMIT_WINDOW_SECONDS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub public_app_url: String,
    pub allowed_origins: Vec<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub gotrue_url: String,
    pub gotrue_api_key: Option<String>,
    pub database_path: String,
    pub chat_requests_per_window: u32,
    pub image_requests_per_window: u32,
    pub auth_requests_per_window: u32,
    pub rate_limit_window_seconds: u64,
    pub download_allowed_hosts: Vec<String>,
    pub session_cookie_max_age_seconds: i64,
    pub app_env: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset keys take their defaults;
    /// a set key that fails to parse is an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let optional = |key: &str| -> Option<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let openai_api_key = optional("OPENAI_API_KEY");
        if openai_api_key.is_none() {
            warn!("OPENAI_API_KEY not set; chat and image generation will be unavailable");
        }

        Ok(Self {
            api_host: get("API_HOST", "127.0.0.1"),
            api_port: parse_var("API_PORT", &get("API_PORT", "8000"))?,
            public_app_url: get("PUBLIC_APP_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            allowed_origins: split_list(&get("ALLOWED_ORIGINS", "")),
            openai_api_key,
            openai_base_url: get("OPENAI_BASE_URL", "https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            gotrue_url: get("GOTRUE_URL", "http://127.0.0.1:9999")
                .trim_end_matches('/')
                .to_string(),
            gotrue_api_key: optional("GOTRUE_API_KEY"),
            database_path: get("DATABASE_PATH", "./data/chat.db"),
            chat_requests_per_window: parse_var(
                "RATE_LIMIT_REQUESTS_PER_MINUTE",
                &get("RATE_LIMIT_REQUESTS_PER_MINUTE", "60"),
            )?,
            image_requests_per_window: parse_var(
                "RATE_LIMIT_IMAGE_REQUESTS_PER_MINUTE",
                &get("RATE_LIMIT_IMAGE_REQUESTS_PER_MINUTE", "10"),
            )?,
            auth_requests_per_window: parse_var(
                "RATE_LIMIT_AUTH_REQUESTS_PER_MINUTE",
                &get("RATE_LIMIT_AUTH_REQUESTS_PER_MINUTE", "5"),
            )?,
            rate_limit_window_seconds: parse_window_seconds(&get("RATE_LIMIT_WINDOW_SECONDS", "60"))?,
            download_allowed_hosts: split_list(&get("DOWNLOAD_ALLOWED_HOSTS", ""))
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            session_cookie_max_age_seconds: parse_var(
                "SESSION_COOKIE_MAX_AGE_SECONDS",
                &get("SESSION_COOKIE_MAX_AGE_SECONDS", "604800"),
            )?,
            app_env: get("APP_ENV", "development"),
        })
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Environment: {}", self.app_env);
        info!("- Public App URL: {}", self.public_app_url);
        info!("- Extra Allowed Origins: {:?}", self.allowed_origins);
        info!("- OpenAI Base URL: {}", self.openai_base_url);
        info!("- OpenAI API Key: {}", if self.openai_api_key.is_some() { "set" } else { "missing" });
        info!("- Identity Provider: {}", self.gotrue_url);
        info!("- Database: {}", self.database_path);
        info!(
            "- Rate Limits (per {}s): chat {}, image {}, auth {}",
            self.rate_limit_window_seconds,
            self.chat_requests_per_window,
            self.image_requests_per_window,
            self.auth_requests_per_window
        );
        if self.download_allowed_hosts.is_empty() {
            info!("- Download Hosts: any");
        } else {
            info!("- Download Hosts: {:?}", self.download_allowed_hosts);
        }
        if self.is_production() && !self.secure_cookies() {
            warn!("APP_ENV is production but PUBLIC_APP_URL is not https; session cookies will not be Secure");
        }
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    /// Session cookies get `Secure` when the app is served over https.
    pub fn secure_cookies(&self) -> bool {
        self.public_app_url.starts_with("https://")
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .with_context(|| format!("Invalid value for {}: {:?}", key, raw))
}

/// Window length in seconds: non-zero, at most seven days, and
/// representable as a `chrono::Duration`.
fn parse_window_seconds(raw: &str) -> Result<u64> {
    let secs: u64 = parse_var("RATE_LIMIT_WINDOW_SECONDS", raw)?;
    if secs == 0 {
        anyhow::bail!("RATE_LIMIT_WINDOW_SECONDS must be greater than zero");
    }
    if secs > MAX_RATE_LIMIT_WINDOW_SECONDS {
        anyhow::bail!(
            "RATE_LIMIT_WINDOW_SECONDS must be at most {} (got {})",
            MAX_RATE_LIMIT_WINDOW_SECONDS,
            secs
        );
    }
    let signed = i64::try_from(secs).context("RATE_LIMIT_WINDOW_SECONDS out of range")?;
    chrono::Duration::try_seconds(signed).context("RATE_LIMIT_WINDOW_SECONDS out of range")?;
    Ok(secs)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
