//! # Courier HTTP Client
//!
//! A client-side HTTP request pipeline: typed requests built from declarative
//! endpoints, a composable interceptor chain, retries on transient network
//! failures, and bearer-token authentication with coordinated refresh on 401.
//!
//! ## Features
//!
//! - **Endpoints**: Declarative method/path/payload descriptions turned into requests
//! - **Interceptors**: Request adapters and asynchronous response interceptors
//! - **Retry**: Per-execution retry budget for network failures, with backoff
//! - **Authentication**: Bearer injection and single-flight token refresh
//! - **Classification**: Sum-type errors with request/response diagnostics
//! - **Cancellation**: One token cancels the transport call and pending retries
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use courier_http_client::{Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::new(
//!         SessionConfig::builder()
//!             .base_url("https://api.example.com/v1")
//!             .build(),
//!     )?;
//!
//!     let response = session.get("users").query("page", "2").send().await?;
//!
//!     println!("Status: {}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Endpoints, Retry and Authentication
//!
//! ```rust,no_run
//! use courier_http_client::{
//!     AuthCoordinator, AuthError, Endpoint, RetryPolicy, Session, SessionConfig, Token,
//!     TokenRefresher,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Refresh;
//!
//! #[async_trait::async_trait]
//! impl TokenRefresher for Refresh {
//!     async fn refresh(&self, _current: Option<Arc<Token>>) -> Result<Token, AuthError> {
//!         Ok(Token::new("fresh-token"))
//!     }
//! }
//!
//! #[derive(serde::Deserialize)]
//! struct User {
//!     id: u64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::builder()
//!         .base_url("https://api.example.com")
//!         .retry(RetryPolicy::exponential(3, Duration::from_millis(100)))
//!         .build();
//!
//!     let session = Session::builder(config)
//!         .auth(Arc::new(AuthCoordinator::new(Arc::new(Refresh))))
//!         .build()?;
//!
//!     // Network failures are retried; a 401 triggers a token refresh and is
//!     // reported as `HttpClientError::Unauthorized`.
//!     let user: User = session.send_wrapped(&Endpoint::get("users/7"), "data").await?;
//!     println!("User {}", user.id);
//!     Ok(())
//! }
//! ```

mod auth;
mod codec;
mod config;
mod endpoint;
mod error;
mod interceptor;
mod registry;
mod request;
mod response;
mod retry;
mod session;
mod transport;

pub use auth::{AuthCoordinator, AuthError, AuthService, Token, TokenRefresher, TokenStore};
pub use codec::{
    Codec, CodecError, JsonCodec, KeyStrategy, decode_payload, decode_value, encode_payload,
    to_camel_case, to_snake_case,
};
pub use config::{SessionConfig, SessionConfigBuilder};
pub use endpoint::Endpoint;
pub use error::{BoxError, FailureDiagnostics, HttpClientError, Result, StatusClassifier};
pub use interceptor::{
    AdaptFn, AttemptResult, HeaderInterceptor, Interceptor, InterceptorChain, LoggingInterceptor,
    Pipeline, adapt_fn,
};
pub use registry::ClientRegistry;
pub use request::{
    HeaderMergeStrategy, Request, RequestBuilder, RequestId, encodes_in_query, merge_headers,
    resolve_target,
};
pub use response::{Response, unwrap_envelope};
pub use retry::{BackoffStrategy, RetryInterceptor, RetryLedger, RetryPolicy, RetryState};
pub use session::{Session, SessionBuilder};
pub use transport::{
    ReqwestTransport, Transport, TransportConfig, TransportError, TransportErrorKind,
};

// Re-export common types
pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use tokio_util::sync::CancellationToken;
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use courier_http_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::auth::{AuthCoordinator, AuthService, Token, TokenRefresher, TokenStore};
    pub use crate::codec::{Codec, JsonCodec, KeyStrategy};
    pub use crate::config::{SessionConfig, SessionConfigBuilder};
    pub use crate::endpoint::Endpoint;
    pub use crate::error::{HttpClientError, Result, StatusClassifier};
    pub use crate::interceptor::{AttemptResult, Interceptor, LoggingInterceptor, adapt_fn};
    pub use crate::registry::ClientRegistry;
    pub use crate::request::{HeaderMergeStrategy, Request, RequestBuilder};
    pub use crate::response::Response;
    pub use crate::retry::{BackoffStrategy, RetryPolicy};
    pub use crate::session::Session;
    pub use crate::transport::{Transport, TransportError};
    pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
    pub use tokio_util::sync::CancellationToken;
}
