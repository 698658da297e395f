// Courier - typed HTTP API client pipeline for Rust
//
// This library builds requests from declarative endpoints, runs them through
// an interceptor chain, retries transient network failures and keeps bearer
// tokens fresh.

// Re-export the pipeline
pub use courier_http_client::*;

// Re-export async_trait for implementing Transport, Interceptor and AuthService
pub use async_trait::async_trait;

/// Prelude for common imports.
///
/// ```
/// use courier::prelude::*;
/// ```
pub mod prelude {
    pub use courier_http_client::prelude::*;

    pub use async_trait::async_trait;
}
