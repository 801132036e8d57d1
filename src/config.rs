//! Request configuration for the Qernel API client.
//!
//! `QernelConfig` is immutable for the lifetime of a client. The API key may
//! be supplied explicitly or through the `QERNEL_API_KEY` environment
//! variable; a missing key is a warning, not a startup failure — requests go
//! out unauthenticated and the server rejects them itself.

use std::time::Duration;

use crate::error::QernelError;

/// Environment variable consulted when no API key is passed explicitly.
pub const API_KEY_ENV: &str = "QERNEL_API_KEY";

/// Default base URL for the hosted Qernel API.
pub const DEFAULT_API_URL: &str = "https://d3nt1x9f8mnu77.cloudfront.net";

/// Configuration for [`QernelClient`](crate::client::QernelClient).
#[derive(Debug, Clone)]
pub struct QernelConfig {
    /// Base URL of the Qernel API (no trailing slash).
    pub api_url: String,
    /// API key sent as `x-api-key` on every request, when present.
    pub api_key: Option<String>,
    /// Budget for plain requests (connectivity probe, artifact downloads),
    /// including warm-up retries.
    pub timeout: Duration,
    /// Budget for establishing the SSE stream, including warm-up retries.
    /// Longer than `timeout` since cold starts live inside it.
    pub stream_timeout: Duration,
    /// Maximum retry attempts for non-streaming calls that retry on a
    /// count rather than a deadline.
    pub max_retries: u32,
}

impl Default for QernelConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl QernelConfig {
    /// Create a configuration for the given base URL, resolving the API key
    /// from [`API_KEY_ENV`] if set.
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        Self {
            api_url,
            api_key,
            timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(120),
            max_retries: 3,
        }
    }

    /// Set an explicit API key, overriding any environment-provided value.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the plain-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the streaming timeout.
    pub fn with_stream_timeout(mut self, stream_timeout: Duration) -> Self {
        self.stream_timeout = stream_timeout;
        self
    }

    /// Headers sent on every request. The API key is included only when
    /// configured.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("Content-Type", "application/json".to_string()),
            ("Accept", "application/json".to_string()),
        ];
        if let Some(key) = &self.api_key {
            headers.push(("x-api-key", key.clone()));
        }
        headers
    }

    /// Masked rendering of the API key for logs: `abcd...wxyz` for long
    /// keys, `[set]` for short ones, `[missing]` when absent.
    pub fn masked_api_key(&self) -> String {
        match &self.api_key {
            None => "[missing]".to_string(),
            Some(key) if key.len() < 12 => "[set]".to_string(),
            Some(key) => format!("{}...{}", &key[..4], &key[key.len() - 4..]),
        }
    }

    /// Hard validation for callers that want to fail fast on a missing key.
    /// The client itself only logs a warning (see [`crate::client`]).
    pub fn validate(&self) -> Result<(), QernelError> {
        if self.api_key.is_none() {
            return Err(QernelError::Config(format!(
                "API key is required; set {} or pass api_key explicitly",
                API_KEY_ENV
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_stripped() {
        let config = QernelConfig::new("https://example.com/");
        assert_eq!(config.api_url, "https://example.com");
    }

    #[test]
    fn test_defaults() {
        let config = QernelConfig::new("https://example.com");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.stream_timeout, Duration::from_secs(120));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_headers_without_key() {
        let mut config = QernelConfig::new("https://example.com");
        config.api_key = None;
        let headers = config.headers();
        assert_eq!(headers.len(), 2);
        assert!(!headers.iter().any(|(name, _)| *name == "x-api-key"));
    }

    #[test]
    fn test_headers_with_key() {
        let config = QernelConfig::new("https://example.com").with_api_key("secret-key-123");
        let headers = config.headers();
        assert!(headers
            .iter()
            .any(|(name, value)| *name == "x-api-key" && value == "secret-key-123"));
    }

    #[test]
    fn test_masked_api_key() {
        let mut config = QernelConfig::new("https://example.com");
        config.api_key = None;
        assert_eq!(config.masked_api_key(), "[missing]");

        let config = config.with_api_key("short");
        assert_eq!(config.masked_api_key(), "[set]");

        let config = QernelConfig::new("https://example.com").with_api_key("abcdefghijklmnop");
        assert_eq!(config.masked_api_key(), "abcd...mnop");
    }

    #[test]
    fn test_validate_missing_key() {
        let mut config = QernelConfig::new("https://example.com");
        config.api_key = None;
        assert!(matches!(config.validate(), Err(QernelError::Config(_))));

        let config = config.with_api_key("k-123456789012");
        assert!(config.validate().is_ok());
    }
}
