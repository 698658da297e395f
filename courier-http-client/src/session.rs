//! Session: executes requests through the interceptor chain.

use http::header::AUTHORIZATION;
use http::{HeaderMap, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, warn};
use url::Url;

use crate::auth::AuthService;
use crate::codec::{Codec, JsonCodec};
use crate::error::{FailureDiagnostics, StatusClassifier};
use crate::interceptor::{AttemptResult, Interceptor, InterceptorChain, Pipeline};
use crate::retry::RetryInterceptor;
use crate::transport::{ReqwestTransport, Transport, TransportError, TransportErrorKind};
use crate::{
    Endpoint, HttpClientError, Request, RequestBuilder, RequestId, Response, Result, SessionConfig,
};

/// Executes requests: adapters, auth injection, transport, response
/// interceptors, retries and outcome classification.
///
/// Cloning a session is cheap; clones share the transport, the interceptor
/// chain and the auth service.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn Transport>,
    config: Arc<SessionConfig>,
    base_url: Option<Url>,
    default_headers: HeaderMap,
    codec: Arc<dyn Codec>,
    interceptors: InterceptorChain,
    auth: Option<Arc<dyn AuthService>>,
    classifier: Option<Arc<dyn StatusClassifier>>,
}

impl Session {
    /// Create a session over the default reqwest transport.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Create a session builder.
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Parsed base URL.
    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Headers sent with every request.
    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    /// Payload codec.
    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Interceptor chain. Interceptors registered here apply to executions
    /// started afterwards.
    pub fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    /// Append an interceptor to the chain.
    pub fn register_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.register(interceptor);
    }

    /// Auth service, if configured.
    pub fn auth(&self) -> Option<&Arc<dyn AuthService>> {
        self.auth.as_ref()
    }

    /// Create a GET request builder.
    pub fn get(&self, target: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::GET, target.into())
    }

    /// Create a POST request builder.
    pub fn post(&self, target: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::POST, target.into())
    }

    /// Create a PUT request builder.
    pub fn put(&self, target: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PUT, target.into())
    }

    /// Create a PATCH request builder.
    pub fn patch(&self, target: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PATCH, target.into())
    }

    /// Create a DELETE request builder.
    pub fn delete(&self, target: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::DELETE, target.into())
    }

    /// Create a HEAD request builder.
    pub fn head(&self, target: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::HEAD, target.into())
    }

    /// Create a request builder with a custom method.
    pub fn request(&self, method: Method, target: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, target.into())
    }

    /// Build the request for `endpoint` with this session's defaults.
    pub fn build_request<P: Serialize>(&self, endpoint: &Endpoint<P>) -> Result<Request> {
        endpoint.to_request(
            self.base_url.as_ref(),
            &self.default_headers,
            self.config.header_merge,
            self.codec(),
        )
    }

    /// Call `endpoint` and decode the response body.
    pub async fn send<T, P>(&self, endpoint: &Endpoint<P>) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let response = self.send_raw(endpoint).await?;
        response.decode(self.codec())
    }

    /// Call `endpoint` and decode the value nested under `key`.
    pub async fn send_wrapped<T, P>(&self, endpoint: &Endpoint<P>, key: &str) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let response = self.send_raw(endpoint).await?;
        response.decode_wrapped(self.codec(), key)
    }

    /// Call `endpoint` and return the raw response.
    pub async fn send_raw<P: Serialize>(&self, endpoint: &Endpoint<P>) -> Result<Response> {
        let request = self.build_request(endpoint)?;
        self.execute(request).await
    }

    /// Execute a request.
    ///
    /// Exactly one terminal outcome is returned; retried attempts are only
    /// visible as latency.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.run(request, None).await
    }

    /// Execute a request that stops when `cancel` fires.
    ///
    /// Cancelling interrupts the transport call or a pending retry delay and
    /// yields [`HttpClientError::Cancelled`]. It has no effect once the
    /// execution has completed.
    pub async fn execute_with_cancel(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.run(request, Some(cancel)).await
    }

    async fn run(&self, request: Request, cancel: Option<&CancellationToken>) -> Result<Response> {
        let request_id = RequestId::new();
        let pipeline = self.interceptors.snapshot();
        let span = debug_span!(
            "http_request",
            request_id = %request_id,
            method = %request.method(),
            url = %request.url(),
        );

        let outcome = self
            .drive(request_id, &pipeline, request, cancel)
            .instrument(span)
            .await;
        pipeline.finish(request_id);
        outcome
    }

    async fn drive(
        &self,
        request_id: RequestId,
        pipeline: &Pipeline,
        request: Request,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response> {
        let request = pipeline.adapt(request)?;
        let mut attempt = 0u32;

        loop {
            let sent = self.authorize(request.clone())?;
            let outcome = self.send_once(&sent, cancel).await;
            if outcome
                .as_ref()
                .is_err_and(|e| e.kind() == TransportErrorKind::Cancelled)
            {
                debug!(attempt, "Request cancelled");
                return Err(HttpClientError::Cancelled);
            }

            let result = pipeline
                .intercept(AttemptResult::for_attempt(request_id, attempt, sent, outcome))
                .await;

            if let Some(delay) = result.retry_after() {
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying request"
                );
                wait(delay, cancel).await?;
                attempt += 1;
                continue;
            }

            return self.classify(result.request, result.outcome).await;
        }
    }

    fn authorize(&self, request: Request) -> Result<Request> {
        if !request.is_authenticated() || request.headers().contains_key(AUTHORIZATION) {
            return Ok(request);
        }
        let Some(token) = self.auth.as_ref().and_then(|a| a.token_store().token()) else {
            return Ok(request);
        };
        if token.is_expired() {
            debug!("Sending request with an expired access token");
        }
        request.with_bearer(token.access_token())
    }

    async fn send_once(
        &self,
        request: &Request,
        cancel: Option<&CancellationToken>,
    ) -> std::result::Result<Response, TransportError> {
        // Requests without their own timeout fall back to the session default,
        // whatever transport is installed.
        let limit = request.timeout().unwrap_or(self.config.transport.timeout);
        let call = async {
            tokio::time::timeout(limit, self.transport.execute(request))
                .await
                .unwrap_or_else(|_| Err(TransportError::timeout(limit)))
        };

        match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(TransportError::new(
                    TransportErrorKind::Cancelled,
                    "cancelled by caller",
                )),
                outcome = call => outcome,
            },
            None => call.await,
        }
    }

    async fn classify(
        &self,
        request: Request,
        outcome: std::result::Result<Response, TransportError>,
    ) -> Result<Response> {
        let response = outcome.map_err(HttpClientError::from_transport)?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            warn!(url = %request.url(), "Request unauthorized");
            if let Some(auth) = &self.auth {
                auth.request_authentication().await;
            }
            return Err(HttpClientError::Unauthorized(Box::new(
                FailureDiagnostics::new(&request, &response),
            )));
        }

        if !status.is_success() {
            debug!(status = %status, "Request failed");
            if let Some(classifier) = &self.classifier
                && let Some(error) = classifier.classify(&request, &response)
            {
                return Err(error);
            }
            return Err(HttpClientError::HttpFailure(Box::new(
                FailureDiagnostics::new(&request, &response),
            )));
        }

        Ok(response)
    }
}

async fn wait(delay: Duration, cancel: Option<&CancellationToken>) -> Result<()> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(HttpClientError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        },
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    transport: Option<Arc<dyn Transport>>,
    codec: Option<Arc<dyn Codec>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    auth: Option<Arc<dyn AuthService>>,
    classifier: Option<Arc<dyn StatusClassifier>>,
}

impl SessionBuilder {
    /// Create a builder for `config`.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            transport: None,
            codec: None,
            interceptors: Vec::new(),
            auth: None,
            classifier: None,
        }
    }

    /// Use a custom transport instead of reqwest.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom codec. Defaults to [`JsonCodec`].
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Register an interceptor.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Attach bearer tokens from `auth` and report 401s to it.
    pub fn auth(mut self, auth: Arc<dyn AuthService>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Map non-2xx responses to caller-defined errors.
    pub fn classifier(mut self, classifier: Arc<dyn StatusClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Build the session.
    ///
    /// A retry policy in the configuration installs a [`RetryInterceptor`]
    /// after the interceptors registered on this builder.
    pub fn build(self) -> Result<Session> {
        let base_url = self.config.parsed_base_url()?;
        let default_headers = self.config.header_map()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config.transport)?),
        };

        let interceptors = InterceptorChain::new();
        for interceptor in self.interceptors {
            interceptors.register(interceptor);
        }
        if let Some(policy) = self.config.retry.clone()
            && policy.max_retries > 0
        {
            interceptors.register(Arc::new(RetryInterceptor::new(policy)));
        }

        Ok(Session {
            transport,
            config: Arc::new(self.config),
            base_url,
            default_headers,
            codec: self.codec.unwrap_or_else(|| Arc::new(JsonCodec::new())),
            interceptors,
            auth: self.auth,
            classifier: self.classifier,
        })
    }
}
