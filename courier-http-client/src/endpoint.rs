//! Declarative endpoint descriptions.

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::codec::{self, Codec};
use crate::request::{HeaderMergeStrategy, merge_headers, resolve_target};
use crate::{HttpClientError, Request, Result};

/// Describes one API call: where it goes, how, and with what payload.
///
/// An endpoint is plain data. [`Endpoint::to_request`] turns it into a
/// [`Request`]; building twice from the same inputs yields equal requests.
#[derive(Debug, Clone)]
pub struct Endpoint<P = ()> {
    method: Method,
    path: String,
    base_url: Option<String>,
    headers: HeaderMap,
    timeout: Option<Duration>,
    authenticated: bool,
    payload: Option<P>,
}

impl Endpoint<()> {
    /// Create an endpoint without payload.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            base_url: None,
            headers: HeaderMap::new(),
            timeout: None,
            authenticated: true,
            payload: None,
        }
    }

    /// GET endpoint.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST endpoint.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// PUT endpoint.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// PATCH endpoint.
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// DELETE endpoint.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }
}

impl<P> Endpoint<P> {
    /// Attach a typed payload.
    pub fn payload<Q>(self, payload: Q) -> Endpoint<Q> {
        Endpoint {
            method: self.method,
            path: self.path,
            base_url: self.base_url,
            headers: self.headers,
            timeout: self.timeout,
            authenticated: self.authenticated,
            payload: Some(payload),
        }
    }

    /// Use `base_url` instead of the session's base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Add a per-request header; it wins over session headers under the
    /// default merge strategy.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Override the timeout for this endpoint.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Never attach session credentials to this endpoint.
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Relative or absolute path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Per-request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Payload, if any.
    pub fn payload_ref(&self) -> Option<&P> {
        self.payload.as_ref()
    }
}

impl<P: Serialize> Endpoint<P> {
    /// Build the request for this endpoint.
    ///
    /// `session_base` and `session_headers` are the session-wide defaults;
    /// an explicit endpoint base URL replaces the former.
    pub fn to_request(
        &self,
        session_base: Option<&Url>,
        session_headers: &HeaderMap,
        merge: HeaderMergeStrategy,
        codec: &dyn Codec,
    ) -> Result<Request> {
        let explicit_base = self
            .base_url
            .as_deref()
            .map(|base| {
                Url::parse(base).map_err(|e| {
                    HttpClientError::InvalidRequest(format!("invalid base URL `{base}`: {e}"))
                })
            })
            .transpose()?;
        let target = resolve_target(explicit_base.as_ref().or(session_base), &self.path)?;

        let payload = self
            .payload
            .as_ref()
            .map(|p| codec::encode_payload(codec, p))
            .transpose()?;

        let headers = merge_headers(session_headers, &self.headers, merge);
        let mut request = Request::build(
            target.as_str(),
            self.method.clone(),
            payload.as_ref(),
            headers,
            codec,
        )?;

        if let Some(timeout) = self.timeout {
            request = request.with_timeout(timeout);
        }
        if !self.authenticated {
            request = request.without_auth();
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsonCodec;
    use serde_json::json;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Search {
        page_size: u32,
        cursor: Option<String>,
    }

    fn session_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-client", HeaderValue::from_static("session"));
        headers
    }

    #[test]
    fn test_get_endpoint_encodes_query_with_key_strategy() {
        let base = Url::parse("https://api.example.com/v1").unwrap();
        let endpoint = Endpoint::get("items").payload(Search {
            page_size: 20,
            cursor: None,
        });

        let request = endpoint
            .to_request(
                Some(&base),
                &HeaderMap::new(),
                HeaderMergeStrategy::Override,
                &JsonCodec::snake_case(),
            )
            .unwrap();

        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/v1/items?page_size=20"
        );
    }

    #[test]
    fn test_post_endpoint_puts_payload_in_body() {
        let base = Url::parse("https://api.example.com").unwrap();
        let endpoint = Endpoint::post("/items").payload(json!({"name": "widget"}));

        let request = endpoint
            .to_request(
                Some(&base),
                &HeaderMap::new(),
                HeaderMergeStrategy::Override,
                &JsonCodec::new(),
            )
            .unwrap();

        assert_eq!(request.url().as_str(), "https://api.example.com/items");
        assert_eq!(request.body().unwrap().as_ref(), br#"{"name":"widget"}"#);
    }

    #[test]
    fn test_endpoint_overrides() {
        let session_base = Url::parse("https://api.example.com").unwrap();
        let endpoint = Endpoint::get("status")
            .base_url("https://status.example.com")
            .header(
                HeaderName::from_static("x-client"),
                HeaderValue::from_static("endpoint"),
            )
            .timeout(Duration::from_secs(2))
            .unauthenticated();

        let request = endpoint
            .to_request(
                Some(&session_base),
                &session_headers(),
                HeaderMergeStrategy::Override,
                &JsonCodec::new(),
            )
            .unwrap();

        assert_eq!(request.url().as_str(), "https://status.example.com/status");
        assert_eq!(request.headers()["x-client"], "endpoint");
        assert_eq!(request.timeout(), Some(Duration::from_secs(2)));
        assert!(!request.is_authenticated());

        let preserved = endpoint
            .to_request(
                Some(&session_base),
                &session_headers(),
                HeaderMergeStrategy::PreserveOriginal,
                &JsonCodec::new(),
            )
            .unwrap();
        assert_eq!(preserved.headers()["x-client"], "session");
    }

    #[test]
    fn test_building_twice_is_identical() {
        let base = Url::parse("https://api.example.com").unwrap();
        let endpoint = Endpoint::put("items/7")
            .payload(json!({"b": [1, 2], "a": {"nested": true}, "c": null}));
        let codec = JsonCodec::new();

        let first = endpoint
            .to_request(Some(&base), &session_headers(), HeaderMergeStrategy::Override, &codec)
            .unwrap();
        let second = endpoint
            .to_request(Some(&base), &session_headers(), HeaderMergeStrategy::Override, &codec)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.body(), second.body());
    }

    #[test]
    fn test_relative_path_without_base_fails() {
        let result = Endpoint::get("items").to_request(
            None,
            &HeaderMap::new(),
            HeaderMergeStrategy::Override,
            &JsonCodec::new(),
        );
        assert!(matches!(result, Err(HttpClientError::InvalidRequest(_))));
    }
}
