//! Backend client configuration

use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://chat.deepseek.com";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    /// Whole-request timeout, stream body included.
    pub request_timeout: Duration,
    /// Sent when the cookie artifact carries no user agent.
    pub default_user_agent: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(300),
            default_user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl BackendConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url_trimmed(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
