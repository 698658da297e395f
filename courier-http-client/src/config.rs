//! Session configuration.

use http::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use url::Url;

use crate::request::HeaderMergeStrategy;
use crate::retry::RetryPolicy;
use crate::transport::TransportConfig;
use crate::{HttpClientError, Result};

/// Session configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Base URL relative targets are resolved against.
    pub base_url: Option<String>,
    /// Headers sent with every request.
    pub default_headers: Vec<(String, String)>,
    /// How per-call headers combine with the default headers.
    pub header_merge: HeaderMergeStrategy,
    /// Retry policy; `None` disables retries.
    pub retry: Option<RetryPolicy>,
    /// Settings for the default transport.
    pub transport: TransportConfig,
}

impl SessionConfig {
    /// Create a new configuration builder.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Parse the base URL, if set.
    pub fn parsed_base_url(&self) -> Result<Option<Url>> {
        self.base_url
            .as_deref()
            .map(|base| {
                Url::parse(base).map_err(|e| {
                    HttpClientError::InvalidRequest(format!("invalid base URL `{base}`: {e}"))
                })
            })
            .transpose()
    }

    /// Parse the default headers.
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(self.default_headers.len());
        for (name, value) in &self.default_headers {
            let name = HeaderName::try_from(name.as_str()).map_err(|e| {
                HttpClientError::InvalidRequest(format!("invalid header name `{name}`: {e}"))
            })?;
            let value = HeaderValue::try_from(value.as_str()).map_err(|e| {
                HttpClientError::InvalidRequest(format!("invalid value for `{name}`: {e}"))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Builder for session configuration.
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set the base URL for all requests.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Add a default header for all requests.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Keep the default header when a call sets the same header.
    pub fn preserve_default_headers(mut self) -> Self {
        self.config.header_merge = HeaderMergeStrategy::PreserveOriginal;
        self
    }

    /// Set the header merge strategy.
    pub fn header_merge(mut self, strategy: HeaderMergeStrategy) -> Self {
        self.config.header_merge = strategy;
        self
    }

    /// Set retry configuration.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = Some(policy);
        self
    }

    /// Set the default request timeout.
    ///
    /// Applies to every attempt that has no per-request timeout, whichever
    /// transport the session uses.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.connect_timeout = timeout;
        self
    }

    /// Set the connection pool idle timeout.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum idle connections per host.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.transport.pool_max_idle_per_host = max;
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.transport.user_agent = user_agent.into();
        self
    }

    /// Enable or disable gzip compression.
    pub fn gzip(mut self, enable: bool) -> Self {
        self.config.transport.gzip = enable;
        self
    }

    /// Enable or disable brotli compression.
    pub fn brotli(mut self, enable: bool) -> Self {
        self.config.transport.brotli = enable;
        self
    }

    /// Enable or disable following redirects.
    pub fn follow_redirects(mut self, enable: bool) -> Self {
        self.config.transport.follow_redirects = enable;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.transport.max_redirects = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_fields() {
        let config = SessionConfig::builder()
            .base_url("https://api.example.com/v1")
            .default_header("x-client", "courier")
            .preserve_default_headers()
            .retry(RetryPolicy::new(2, Duration::from_millis(50)))
            .timeout(Duration::from_secs(60))
            .follow_redirects(false)
            .build();

        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com/v1"));
        assert_eq!(config.header_merge, HeaderMergeStrategy::PreserveOriginal);
        assert_eq!(config.retry.as_ref().map(|r| r.max_retries), Some(2));
        assert_eq!(config.transport.timeout, Duration::from_secs(60));
        assert!(!config.transport.follow_redirects);
        assert_eq!(config.header_map().unwrap()["x-client"], "courier");
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert!(config.base_url.is_none());
        assert!(config.retry.is_none());
        assert_eq!(config.header_merge, HeaderMergeStrategy::Override);
        assert!(config.transport.gzip);
        assert!(config.transport.brotli);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let config = SessionConfig::builder().base_url("not a url").build();
        assert!(matches!(
            config.parsed_base_url(),
            Err(HttpClientError::InvalidRequest(_))
        ));

        let config = SessionConfig::builder()
            .default_header("bad header", "x")
            .build();
        assert!(config.header_map().is_err());
    }
}
