//! HTTP client error types.
//!
//! Every execution ends in exactly one of these variants. Callers are expected
//! to match on them; [`HttpClientError::is_retryable`] and friends cover the
//! common questions.

use http::{HeaderMap, HeaderValue, Method, StatusCode};
use thiserror::Error;

use crate::codec::CodecError;
use crate::transport::{TransportError, TransportErrorKind};
use crate::{Request, Response};

/// Result type for HTTP client operations.
pub type Result<T> = std::result::Result<T, HttpClientError>;

/// Boxed error used for caller-defined domain failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Maximum number of body bytes kept in [`FailureDiagnostics`].
const BODY_SNIPPET_LIMIT: usize = 1024;

/// Headers whose values never appear in diagnostics.
const REDACTED_HEADERS: [http::HeaderName; 3] = [
    http::header::AUTHORIZATION,
    http::header::COOKIE,
    http::header::PROXY_AUTHORIZATION,
];

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// The request could not be built (malformed target, bad header, ...).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A response arrived but could not be interpreted, or a wrapped payload
    /// was missing its key.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The body could not be decoded into the expected shape.
    #[error("Invalid data: {0}")]
    InvalidData(#[from] CodecError),

    /// The transport reported a connectivity failure.
    #[error("Network connection lost: {0}")]
    NetworkLost(#[source] TransportError),

    /// The server answered 401. Re-authentication has been requested.
    #[error("Unauthorized: {} {}", .0.method, .0.url)]
    Unauthorized(Box<FailureDiagnostics>),

    /// Any other non-2xx status.
    #[error("HTTP {} for {} {}", .0.status, .0.method, .0.url)]
    HttpFailure(Box<FailureDiagnostics>),

    /// A status mapped to a caller-defined error by a [`StatusClassifier`].
    #[error(transparent)]
    Domain(BoxError),

    /// The execution was cancelled by the caller.
    #[error("Request cancelled")]
    Cancelled,

    /// Contract violation inside the pipeline (programmer error).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HttpClientError {
    /// Build an error from a transport failure.
    pub fn from_transport(error: TransportError) -> Self {
        match error.kind() {
            TransportErrorKind::Connect | TransportErrorKind::Timeout | TransportErrorKind::Io => {
                Self::NetworkLost(error)
            }
            TransportErrorKind::Malformed => Self::InvalidResponse(error.to_string()),
            TransportErrorKind::Request => Self::InvalidRequest(error.to_string()),
            TransportErrorKind::Cancelled => Self::Cancelled,
        }
    }

    /// Wrap a caller-defined error.
    pub fn domain(error: impl Into<BoxError>) -> Self {
        Self::Domain(error.into())
    }

    /// Check if this error is eligible for retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkLost(_))
    }

    /// Check if this is a connectivity failure.
    pub fn is_network_lost(&self) -> bool {
        matches!(self, Self::NetworkLost(_))
    }

    /// Check if the server answered 401.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::NetworkLost(e) if e.kind() == TransportErrorKind::Timeout)
    }

    /// Get the HTTP status code if a response was received.
    pub fn status_code(&self) -> Option<u16> {
        self.diagnostics().map(|d| d.status.as_u16())
    }

    /// Get the request/response details for status failures.
    pub fn diagnostics(&self) -> Option<&FailureDiagnostics> {
        match self {
            Self::Unauthorized(d) | Self::HttpFailure(d) => Some(d),
            _ => None,
        }
    }
}

impl From<url::ParseError> for HttpClientError {
    fn from(error: url::ParseError) -> Self {
        Self::InvalidRequest(error.to_string())
    }
}

impl From<serde_json::Error> for HttpClientError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidData(CodecError::Json(error))
    }
}

/// Request and response details captured for a failed status.
#[derive(Debug, Clone)]
pub struct FailureDiagnostics {
    /// Request method.
    pub method: Method,
    /// Request URL.
    pub url: url::Url,
    /// Request headers, with credentials redacted.
    pub request_headers: HeaderMap,
    /// Leading part of the request body, if any.
    pub request_body: Option<String>,
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub response_headers: HeaderMap,
    /// Leading part of the response body.
    pub response_body: String,
}

impl FailureDiagnostics {
    /// Capture diagnostics from the attempt that produced `response`.
    pub fn new(request: &Request, response: &Response) -> Self {
        Self {
            method: request.method().clone(),
            url: request.url().clone(),
            request_headers: redact(request.headers()),
            request_body: request.body().map(|b| snippet(b)),
            status: response.status(),
            response_headers: redact(response.headers()),
            response_body: snippet(response.bytes()),
        }
    }
}

fn redact(headers: &HeaderMap) -> HeaderMap {
    let mut headers = headers.clone();
    for name in REDACTED_HEADERS.iter() {
        if headers.contains_key(name) {
            headers.insert(name, HeaderValue::from_static("<redacted>"));
        }
    }
    headers
}

fn snippet(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= BODY_SNIPPET_LIMIT {
        return text.into_owned();
    }
    let mut end = BODY_SNIPPET_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Maps non-2xx responses to caller-defined errors.
///
/// Returning `None` keeps the generic [`HttpClientError::HttpFailure`]. A 401
/// is always reported as [`HttpClientError::Unauthorized`] and never reaches
/// the classifier.
pub trait StatusClassifier: Send + Sync {
    /// Classify a failed response.
    fn classify(&self, request: &Request, response: &Response) -> Option<HttpClientError>;
}

impl<F> StatusClassifier for F
where
    F: Fn(&Request, &Response) -> Option<HttpClientError> + Send + Sync,
{
    fn classify(&self, request: &Request, response: &Response) -> Option<HttpClientError> {
        self(request, response)
    }
}
