//! Request adapters and response interceptors.
//!
//! Adapters run synchronously in registration order before a request is
//! sent. Response interceptors run sequentially, in the same order, over the
//! outcome of every attempt. Neither can re-enter the session; the only way
//! to ask for another attempt is [`AttemptResult::schedule_retry`].

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use crate::transport::TransportError;
use crate::{HttpClientError, Request, RequestId, Response, Result};

/// Outcome of one attempt, threaded through the response interceptors.
#[derive(Debug)]
pub struct AttemptResult {
    /// Execution the attempt belongs to.
    pub request_id: Option<RequestId>,
    /// Zero-based attempt index within the execution.
    pub attempt: u32,
    /// Request as it was sent.
    pub request: Request,
    /// Response or transport failure.
    pub outcome: std::result::Result<Response, TransportError>,
    retry: Option<Duration>,
}

impl AttemptResult {
    /// Create a result with no execution id and no retry directive.
    pub fn new(request: Request, outcome: std::result::Result<Response, TransportError>) -> Self {
        Self {
            request_id: None,
            attempt: 0,
            request,
            outcome,
            retry: None,
        }
    }

    pub(crate) fn for_attempt(
        request_id: RequestId,
        attempt: u32,
        request: Request,
        outcome: std::result::Result<Response, TransportError>,
    ) -> Self {
        Self {
            request_id: Some(request_id),
            attempt,
            request,
            outcome,
            retry: None,
        }
    }

    /// Whether the transport produced a response.
    pub fn is_response(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The response, if the transport produced one.
    pub fn response(&self) -> Option<&Response> {
        self.outcome.as_ref().ok()
    }

    /// The transport failure, if any.
    pub fn error(&self) -> Option<&TransportError> {
        self.outcome.as_ref().err()
    }

    /// Ask the session for another attempt after at least `delay`.
    pub fn schedule_retry(&mut self, delay: Duration) {
        self.retry = Some(delay);
    }

    /// Withdraw a pending retry request.
    pub fn cancel_retry(&mut self) {
        self.retry = None;
    }

    /// Requested retry delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry
    }
}

/// Interceptor trait for adapting requests and rewriting attempt outcomes.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Adapt the request before it is sent.
    fn adapt(&self, request: Request) -> Result<Request> {
        Ok(request)
    }

    /// Inspect or rewrite the outcome of an attempt.
    async fn intercept(&self, result: AttemptResult) -> AttemptResult {
        result
    }

    /// Called once when the execution `request_id` reaches a terminal outcome.
    fn finish(&self, _request_id: RequestId) {}
}

/// Ordered, append-only list of interceptors.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Arc<RwLock<Vec<Arc<dyn Interceptor>>>>,
}

impl InterceptorChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor. Executions already in flight keep the list they
    /// started with.
    pub fn register(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.write().push(interceptor);
    }

    /// Number of registered interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.read().len()
    }

    /// Whether no interceptor is registered.
    pub fn is_empty(&self) -> bool {
        self.interceptors.read().is_empty()
    }

    /// Copy of the current interceptor list.
    pub fn snapshot(&self) -> Pipeline {
        Pipeline {
            interceptors: self.interceptors.read().clone(),
        }
    }

    /// Run every adapter in registration order.
    pub fn adapt(&self, request: Request) -> Result<Request> {
        self.snapshot().adapt(request)
    }

    /// Run every response interceptor in registration order.
    pub async fn intercept(&self, result: AttemptResult) -> AttemptResult {
        self.snapshot().intercept(result).await
    }
}

/// Interceptors fixed for the lifetime of one execution.
#[derive(Clone)]
pub struct Pipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Pipeline {
    /// Run every adapter, each receiving the previous output.
    pub fn adapt(&self, request: Request) -> Result<Request> {
        self.interceptors
            .iter()
            .try_fold(request, |request, interceptor| interceptor.adapt(request))
    }

    /// Thread the attempt result through every interceptor in turn.
    pub async fn intercept(&self, mut result: AttemptResult) -> AttemptResult {
        for interceptor in &self.interceptors {
            result = interceptor.intercept(result).await;
        }
        result
    }

    /// Notify every interceptor that the execution is over.
    pub fn finish(&self, request_id: RequestId) {
        for interceptor in &self.interceptors {
            interceptor.finish(request_id);
        }
    }
}

/// Adapter built from a closure.
pub struct AdaptFn<F> {
    adapt: F,
}

/// Wrap a closure as a request adapter.
pub fn adapt_fn<F>(adapt: F) -> AdaptFn<F>
where
    F: Fn(Request) -> Result<Request> + Send + Sync,
{
    AdaptFn { adapt }
}

#[async_trait]
impl<F> Interceptor for AdaptFn<F>
where
    F: Fn(Request) -> Result<Request> + Send + Sync,
{
    fn adapt(&self, request: Request) -> Result<Request> {
        (self.adapt)(request)
    }
}

/// Logging interceptor that logs requests and attempt outcomes.
pub struct LoggingInterceptor {
    log_headers: bool,
    log_body: bool,
}

impl LoggingInterceptor {
    /// Create a new logging interceptor.
    pub fn new() -> Self {
        Self {
            log_headers: false,
            log_body: false,
        }
    }

    /// Enable logging of headers.
    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }

    /// Enable logging of body.
    pub fn with_body(mut self) -> Self {
        self.log_body = true;
        self
    }

    fn log_header_map(&self, kind: &'static str, headers: &HeaderMap) {
        if !self.log_headers {
            return;
        }
        for (name, value) in headers {
            if name == http::header::AUTHORIZATION {
                tracing::trace!(header = %name, kind, "<redacted>");
            } else {
                tracing::trace!(header = %name, value = ?value, kind, "Header");
            }
        }
    }
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn adapt(&self, request: Request) -> Result<Request> {
        tracing::debug!(
            method = %request.method(),
            url = %request.url(),
            "Sending HTTP request"
        );
        self.log_header_map("request", request.headers());
        if self.log_body
            && let Some(body) = request.body()
        {
            tracing::trace!(body = %String::from_utf8_lossy(body), "Request body");
        }
        Ok(request)
    }

    async fn intercept(&self, result: AttemptResult) -> AttemptResult {
        match &result.outcome {
            Ok(response) => {
                tracing::debug!(
                    attempt = result.attempt,
                    status = %response.status(),
                    "Received HTTP response"
                );
                self.log_header_map("response", response.headers());
                if self.log_body {
                    tracing::trace!(
                        body = %String::from_utf8_lossy(response.bytes()),
                        "Response body"
                    );
                }
            }
            Err(error) => {
                tracing::debug!(attempt = result.attempt, error = %error, "HTTP attempt failed");
            }
        }
        result
    }
}

/// Adds a fixed set of headers to every request.
pub struct HeaderInterceptor {
    headers: HeaderMap,
    overwrite: bool,
}

impl HeaderInterceptor {
    /// Create an interceptor that sets `headers`, replacing existing values.
    pub fn new(headers: HeaderMap) -> Self {
        Self {
            headers,
            overwrite: true,
        }
    }

    /// Create an interceptor with a single header.
    pub fn single(name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| HttpClientError::InvalidRequest(format!("invalid header name: {e}")))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| HttpClientError::InvalidRequest(format!("invalid header value: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(name, value);
        Ok(Self::new(headers))
    }

    /// Only add headers the request does not already carry.
    pub fn keep_existing(mut self) -> Self {
        self.overwrite = false;
        self
    }
}

#[async_trait]
impl Interceptor for HeaderInterceptor {
    fn adapt(&self, request: Request) -> Result<Request> {
        let mut extra = HeaderMap::new();
        for (name, value) in &self.headers {
            if self.overwrite || !request.headers().contains_key(name) {
                extra.insert(name.clone(), value.clone());
            }
        }
        Ok(request.with_headers(extra))
    }
}
