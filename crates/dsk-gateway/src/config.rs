//! Configuration from environment variables.
//!
//! **Environment variables:**
//! - `HOST` / `PORT`: bind address (default: 127.0.0.1:8000)
//! - `DSK_AUTH_TOKEN`: backend bearer token (required to serve)
//! - `DSK_BASE_URL`: backend base URL (default: https://chat.deepseek.com)
//! - `DSK_COOKIES_PATH`: cookie artifact written by the refresh command
//! - `DSK_REFRESH_COMMAND`: refresh program and arguments, whitespace separated
//! - `DSK_REFRESH_TIMEOUT_SECS`: refresh bound (default: 180)
//! - `REQUEST_TIMEOUT_SECS`: backend request timeout (default: 300)
//! - `DSK_MODELS`: comma-separated advertised model ids (default: deepseek-chat)
//! - `DSK_THINKING` / `DSK_SEARCH`: backend completion flags
//! - `LOG_FORMAT`: `json` switches the log output to JSON lines

use std::path::PathBuf;
use std::time::Duration;

use dsk_auth::{default_artifact_path, CommandRefresher};
use dsk_providers::BackendConfig;

pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_REFRESH_COMMAND: &str = "python3 dsk/bypass.py";

#[derive(Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub auth_token: Option<String>,
    pub base_url: String,
    pub cookies_path: PathBuf,
    pub refresh_command: String,
    pub refresh_timeout: Duration,
    pub request_timeout: Duration,
    pub models: Vec<String>,
    pub thinking_enabled: bool,
    pub search_enabled: bool,
    pub json_logs: bool,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("cookies_path", &self.cookies_path)
            .field("refresh_command", &self.refresh_command)
            .field("refresh_timeout", &self.refresh_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("models", &self.models)
            .field("thinking_enabled", &self.thinking_enabled)
            .field("search_enabled", &self.search_enabled)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset, blank, or unparseable
    /// values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let parsed = |key: &str, default: u64| {
            get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let flag = |key: &str, default: bool| {
            get(key)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(default)
        };

        let models: Vec<String> = get("DSK_MODELS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: get("PORT").and_then(|p| p.parse().ok()).unwrap_or(8000),
            auth_token: get("DSK_AUTH_TOKEN"),
            base_url: get("DSK_BASE_URL")
                .unwrap_or_else(|| dsk_providers::DEFAULT_BASE_URL.to_string()),
            cookies_path: get("DSK_COOKIES_PATH")
                .map(PathBuf::from)
                .or_else(default_artifact_path)
                .unwrap_or_else(|| PathBuf::from("cookies.json")),
            refresh_command: get("DSK_REFRESH_COMMAND")
                .unwrap_or_else(|| DEFAULT_REFRESH_COMMAND.to_string()),
            refresh_timeout: Duration::from_secs(parsed("DSK_REFRESH_TIMEOUT_SECS", 180)),
            request_timeout: Duration::from_secs(parsed("REQUEST_TIMEOUT_SECS", 300)),
            models: if models.is_empty() {
                vec![DEFAULT_MODEL.to_string()]
            } else {
                models
            },
            thinking_enabled: flag("DSK_THINKING", true),
            search_enabled: flag("DSK_SEARCH", false),
            json_logs: get("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        }
    }

    /// Model reported when a request names none.
    pub fn default_model(&self) -> &str {
        self.models
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_MODEL)
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            request_timeout: self.request_timeout,
            ..BackendConfig::default().with_base_url(self.base_url.clone())
        }
    }

    /// The subprocess refresher; `None` when no command is configured.
    pub fn refresher(&self) -> Option<CommandRefresher> {
        CommandRefresher::from_command_line(&self.refresh_command, self.cookies_path.clone())
            .map(|r| r.with_timeout(self.refresh_timeout))
    }
}
