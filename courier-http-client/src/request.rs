//! Requests and request building.

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::codec::{self, Codec};
use crate::{HttpClientError, Response, Result, Session};

/// Identifier assigned to an execution when it enters the session.
///
/// Every attempt of the same execution carries the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How per-call headers combine with session-wide headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderMergeStrategy {
    /// The per-call value wins on collision.
    #[default]
    Override,
    /// The session value wins on collision.
    PreserveOriginal,
}

/// Merge session headers with per-call headers.
pub fn merge_headers(
    session: &HeaderMap,
    call: &HeaderMap,
    strategy: HeaderMergeStrategy,
) -> HeaderMap {
    let mut merged = session.clone();
    for name in call.keys() {
        if strategy == HeaderMergeStrategy::PreserveOriginal && merged.contains_key(name) {
            continue;
        }
        merged.remove(name);
        for value in call.get_all(name) {
            merged.append(name.clone(), value.clone());
        }
    }
    merged
}

/// Resolve `target` against an optional base URL.
///
/// Absolute targets are used as-is. Relative targets are appended to the base
/// path, so `users` under `https://api.example.com/v1` becomes
/// `https://api.example.com/v1/users`.
pub fn resolve_target(base: Option<&Url>, target: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(target) {
        return Ok(url);
    }

    let base = base.ok_or_else(|| {
        HttpClientError::InvalidRequest(format!("relative target `{target}` without a base URL"))
    })?;

    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(target.trim_start_matches('/'))?)
}

/// Whether `method` carries its payload in the query string.
pub fn encodes_in_query(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::DELETE | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// A wire-ready HTTP request.
///
/// Transformations consume the request and return a new value; a request
/// shared between executions is cloned, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    authenticated: bool,
}

impl Request {
    /// Create a request with no headers and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            authenticated: true,
        }
    }

    /// Build a request from a target, method, encoded payload and headers.
    ///
    /// For read methods a JSON object payload is flattened into query
    /// parameters appended after any existing ones; `null` members are
    /// dropped. For write methods the payload is serialized into the body.
    pub fn build(
        target: &str,
        method: Method,
        payload: Option<&Value>,
        headers: HeaderMap,
        codec: &dyn Codec,
    ) -> Result<Self> {
        let url = Url::parse(target)?;
        let mut request = Self::new(method, url).with_headers(headers);

        let Some(payload) = payload.filter(|p| !p.is_null()) else {
            return Ok(request);
        };

        if encodes_in_query(&request.method) {
            append_query(&mut request.url, payload)?;
        } else {
            let body = codec.serialize(payload)?;
            if !request.headers.contains_key(CONTENT_TYPE) {
                let content_type = HeaderValue::from_str(codec.content_type())
                    .map_err(|e| HttpClientError::Internal(format!("codec content type: {e}")))?;
                request.headers.insert(CONTENT_TYPE, content_type);
            }
            request.body = Some(body);
        }

        Ok(request)
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Request body, if any.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Per-request timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the session may attach credentials to this request.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Return a copy with `name` set to `value`, replacing earlier values.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Return a copy with `headers` added; later values replace earlier ones.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Return a copy with the given body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Return a copy with the given timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Return a copy with the given URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = url;
        self
    }

    /// Return a copy that never receives session credentials.
    pub fn without_auth(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// Return a copy carrying `Authorization: Bearer <token>`.
    pub fn with_bearer(self, token: &str) -> Result<Self> {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| HttpClientError::InvalidRequest(format!("invalid bearer token: {e}")))?;
        Ok(self.with_header(AUTHORIZATION, value))
    }
}

fn append_query(url: &mut Url, payload: &Value) -> Result<()> {
    let Value::Object(members) = payload else {
        return Err(HttpClientError::InvalidRequest(
            "query payload must be a JSON object".to_string(),
        ));
    };

    let mut pairs = Vec::with_capacity(members.len());
    for (key, value) in members {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                pairs.extend(
                    items
                        .iter()
                        .filter(|item| !item.is_null())
                        .map(|item| (key.as_str(), query_value(item))),
                );
            }
            other => pairs.push((key.as_str(), query_value(other))),
        }
    }

    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    Ok(())
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fluent request builder bound to a [`Session`].
pub struct RequestBuilder<'a> {
    session: &'a Session,
    method: Method,
    target: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    payload: Option<Value>,
    body: Option<(Bytes, &'static str)>,
    timeout: Option<Duration>,
    authenticated: bool,
    error: Option<HttpClientError>,
}

impl<'a> RequestBuilder<'a> {
    /// Create a new request builder.
    pub(crate) fn new(session: &'a Session, method: Method, target: String) -> Self {
        Self {
            session,
            method,
            target,
            headers: HeaderMap::new(),
            query: Vec::new(),
            payload: None,
            body: None,
            timeout: None,
            authenticated: true,
            error: None,
        }
    }

    fn fail(mut self, error: HttpClientError) -> Self {
        self.error.get_or_insert(error);
        self
    }

    /// Add a header to the request.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        match (
            HeaderName::try_from(name),
            HeaderValue::try_from(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
                self
            }
            _ => self.fail(HttpClientError::InvalidRequest(format!("invalid header `{name}`"))),
        }
    }

    /// Add multiple headers to the request.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add multiple query parameters.
    pub fn queries<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.query.push((k.into(), v.into()));
        }
        self
    }

    /// Attach a typed payload: query parameters for read methods, a body for
    /// write methods.
    pub fn payload<T: Serialize + ?Sized>(mut self, payload: &T) -> Self {
        match codec::encode_payload(self.session.codec(), payload) {
            Ok(value) => {
                self.payload = Some(value);
                self
            }
            Err(e) => self.fail(e.into()),
        }
    }

    /// Set the request body as raw bytes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some((body.into(), "application/octet-stream"));
        self
    }

    /// Set the request body as text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body = Some((Bytes::from(text.into()), "text/plain; charset=utf-8"));
        self
    }

    /// Set the request body as form data.
    pub fn form<T: Serialize>(mut self, form: &T) -> Self {
        match serde_urlencoded::to_string(form) {
            Ok(encoded) => {
                self.body = Some((Bytes::from(encoded), "application/x-www-form-urlencoded"));
                self
            }
            Err(e) => self.fail(HttpClientError::InvalidRequest(format!("form encoding: {e}"))),
        }
    }

    /// Set a custom timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send without session credentials.
    pub fn without_auth(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// Set bearer authentication explicitly.
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.header("Authorization", value)
    }

    /// Set basic authentication.
    pub fn basic_auth(self, username: impl AsRef<str>, password: Option<impl AsRef<str>>) -> Self {
        use base64::Engine;
        let credentials = match password {
            Some(p) => format!("{}:{}", username.as_ref(), p.as_ref()),
            None => format!("{}:", username.as_ref()),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        self.header("Authorization", format!("Basic {encoded}"))
    }

    /// Build the request without sending it.
    pub fn build(self) -> Result<Request> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let config = self.session.config();
        let mut url = resolve_target(self.session.base_url(), &self.target)?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }

        let headers = merge_headers(
            self.session.default_headers(),
            &self.headers,
            config.header_merge,
        );

        let mut request = Request::build(
            url.as_str(),
            self.method,
            self.payload.as_ref(),
            headers,
            self.session.codec(),
        )?;

        if let Some((body, content_type)) = self.body {
            if !request.headers.contains_key(CONTENT_TYPE) {
                request
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
            request.body = Some(body);
        }
        if let Some(timeout) = self.timeout {
            request.timeout = Some(timeout);
        }
        if !self.authenticated {
            request = request.without_auth();
        }

        Ok(request)
    }

    /// Send the request.
    pub async fn send(self) -> Result<Response> {
        let session = self.session;
        session.execute(self.build()?).await
    }

    /// Send the request and decode the body.
    pub async fn send_json<T: DeserializeOwned>(self) -> Result<T> {
        let session = self.session;
        let response = session.execute(self.build()?).await?;
        response.decode(session.codec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsonCodec;
    use serde_json::json;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_read_methods_flatten_payload_into_query() {
        let codec = JsonCodec::new();
        let payload = json!({"a": 1, "b": null});

        for method in [
            Method::GET,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
            Method::TRACE,
        ] {
            let request = Request::build(
                "https://api.example.com/items",
                method,
                Some(&payload),
                HeaderMap::new(),
                &codec,
            )
            .unwrap();

            assert_eq!(request.url().query(), Some("a=1"));
            assert!(request.body().is_none());
        }
    }

    #[test]
    fn test_write_methods_put_payload_in_body() {
        let codec = JsonCodec::new();
        let payload = json!({"a": 1, "b": null});

        for method in [Method::POST, Method::PUT, Method::PATCH] {
            let request = Request::build(
                "https://api.example.com/items",
                method,
                Some(&payload),
                HeaderMap::new(),
                &codec,
            )
            .unwrap();

            assert_eq!(request.url().query(), None);
            let body: Value = serde_json::from_slice(request.body().unwrap()).unwrap();
            assert_eq!(body, payload);
            assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
        }
    }

    #[test]
    fn test_existing_query_is_preserved() {
        let codec = JsonCodec::new();
        let request = Request::build(
            "https://api.example.com/search?q=rust",
            Method::GET,
            Some(&json!({"exact": true, "label": "x y", "page": 2, "tags": ["a", "b"]})),
            HeaderMap::new(),
            &codec,
        )
        .unwrap();

        assert_eq!(
            request.url().query(),
            Some("q=rust&exact=true&label=x+y&page=2&tags=a&tags=b")
        );
    }

    #[test]
    fn test_empty_payload_leaves_url_untouched() {
        let codec = JsonCodec::new();
        let request = Request::build(
            "https://api.example.com/items",
            Method::GET,
            Some(&json!({})),
            HeaderMap::new(),
            &codec,
        )
        .unwrap();
        assert_eq!(request.url().as_str(), "https://api.example.com/items");
    }

    #[test]
    fn test_non_object_query_payload_is_rejected() {
        let codec = JsonCodec::new();
        let result = Request::build(
            "https://api.example.com/items",
            Method::GET,
            Some(&json!([1, 2])),
            HeaderMap::new(),
            &codec,
        );
        assert!(matches!(result, Err(HttpClientError::InvalidRequest(_))));
    }

    #[test]
    fn test_malformed_target_is_invalid_request() {
        let codec = JsonCodec::new();
        let result = Request::build("not a url", Method::GET, None, HeaderMap::new(), &codec);
        assert!(matches!(result, Err(HttpClientError::InvalidRequest(_))));
    }

    #[test]
    fn test_header_merge_strategies() {
        let session = headers(&[("x", "1"), ("accept", "application/json")]);
        let call = headers(&[("x", "2")]);

        let merged = merge_headers(&session, &call, HeaderMergeStrategy::Override);
        assert_eq!(merged["x"], "2");
        assert_eq!(merged["accept"], "application/json");

        let merged = merge_headers(&session, &call, HeaderMergeStrategy::PreserveOriginal);
        assert_eq!(merged["x"], "1");
    }

    #[test]
    fn test_resolve_target() {
        let base = Url::parse("https://api.example.com/v1").unwrap();

        let url = resolve_target(Some(&base), "users").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/users");

        let url = resolve_target(Some(&base), "/users/7").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/users/7");

        let url = resolve_target(Some(&base), "https://other.example.com/x").unwrap();
        assert_eq!(url.as_str(), "https://other.example.com/x");

        assert!(matches!(
            resolve_target(None, "users"),
            Err(HttpClientError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_transformations_return_new_values() {
        let original = Request::new(Method::GET, Url::parse("https://api.example.com").unwrap());
        let changed = original
            .clone()
            .with_header(HeaderName::from_static("x-trace"), HeaderValue::from_static("1"))
            .with_timeout(Duration::from_secs(5));

        assert!(original.headers().is_empty());
        assert_eq!(original.timeout(), None);
        assert_eq!(changed.headers()["x-trace"], "1");
        assert_eq!(changed.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_bearer_header() {
        let request = Request::new(Method::GET, Url::parse("https://api.example.com").unwrap())
            .with_bearer("abc")
            .unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer abc");
        assert!(
            Request::new(Method::GET, Url::parse("https://api.example.com").unwrap())
                .with_bearer("bad\ntoken")
                .is_err()
        );
    }
}
