//! Bearer tokens, the token store and re-authentication coordination.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No refresh token is available to obtain a new access token.
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// The refresh call failed.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Access token with optional refresh token and expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<SystemTime>,
}

impl Token {
    /// Create a token with only an access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Attach a refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Set an absolute expiry.
    pub fn with_expiry(mut self, expires_at: SystemTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the expiry relative to now.
    pub fn expires_in(self, lifetime: Duration) -> Self {
        self.with_expiry(SystemTime::now() + lifetime)
    }

    /// Access token.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Refresh token, if any.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Expiry, if known.
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    /// Whether the token is known to be expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= SystemTime::now())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Holds the current token.
///
/// Reads return a snapshot of the whole token, so a concurrent refresh is
/// observed either entirely or not at all.
#[derive(Debug, Default)]
pub struct TokenStore {
    token: RwLock<Option<Arc<Token>>>,
}

impl TokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `token`.
    pub fn with_token(token: Token) -> Self {
        Self {
            token: RwLock::new(Some(Arc::new(token))),
        }
    }

    /// Snapshot of the current token.
    pub fn token(&self) -> Option<Arc<Token>> {
        self.token.read().clone()
    }

    /// Current access token.
    pub fn access_token(&self) -> Option<String> {
        self.token().map(|t| t.access_token.clone())
    }

    /// Current refresh token.
    pub fn refresh_token(&self) -> Option<String> {
        self.token().and_then(|t| t.refresh_token.clone())
    }

    /// Replace the current token.
    pub fn set(&self, token: Token) {
        self.replace(Arc::new(token));
    }

    fn replace(&self, token: Arc<Token>) {
        *self.token.write() = Some(token);
    }

    /// Remove the current token.
    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

/// Source of credentials for a session.
///
/// `request_authentication` is called once for every 401 the session
/// observes; implementations are responsible for coalescing concurrent calls
/// into a single refresh.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Store the session reads bearer tokens from.
    fn token_store(&self) -> &TokenStore;

    /// Obtain fresh credentials. The effect is visible through
    /// [`AuthService::token_store`] once this returns.
    async fn request_authentication(&self);
}

/// Performs the actual token refresh call.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange the current token (if any) for a new one.
    async fn refresh(&self, current: Option<Arc<Token>>) -> Result<Token, AuthError>;
}

type RefreshOutcome = Result<Arc<Token>, Arc<AuthError>>;
type InFlightRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// [`AuthService`] that coalesces concurrent re-authentication requests.
///
/// While a refresh is in flight every caller awaits the same future and
/// receives the same outcome. A failed refresh clears the store.
pub struct AuthCoordinator {
    store: Arc<TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    in_flight: Mutex<Option<InFlightRefresh>>,
    refreshes: Arc<AtomicU64>,
}

impl AuthCoordinator {
    /// Create a coordinator with an empty store.
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self::with_store(Arc::new(TokenStore::new()), refresher)
    }

    /// Create a coordinator around an existing store.
    pub fn with_store(store: Arc<TokenStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            in_flight: Mutex::new(None),
            refreshes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared handle to the token store.
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Number of refresh calls actually issued.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Refresh the token, joining a refresh already in flight.
    ///
    /// ```
    /// use courier_http_client::{AuthCoordinator, AuthError, Token, TokenRefresher};
    /// use std::sync::Arc;
    ///
    /// struct Static;
    ///
    /// #[async_trait::async_trait]
    /// impl TokenRefresher for Static {
    ///     async fn refresh(&self, _current: Option<Arc<Token>>) -> Result<Token, AuthError> {
    ///         Ok(Token::new("fresh"))
    ///     }
    /// }
    ///
    /// # tokio_test::block_on(async {
    /// let coordinator = AuthCoordinator::new(Arc::new(Static));
    /// let token = coordinator.authenticate().await.unwrap();
    /// assert_eq!(token.access_token(), "fresh");
    /// assert_eq!(coordinator.store().access_token().as_deref(), Some("fresh"));
    /// # });
    /// ```
    pub async fn authenticate(&self) -> RefreshOutcome {
        let refresh = {
            let mut slot = self.in_flight.lock();
            if slot.is_some() {
                debug!("Joining in-flight token refresh");
            }
            slot.get_or_insert_with(|| self.start_refresh()).clone()
        };

        let outcome = refresh.clone().await;

        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&refresh)) {
            *slot = None;
        }
        outcome
    }

    fn start_refresh(&self) -> InFlightRefresh {
        let store = Arc::clone(&self.store);
        let refresher = Arc::clone(&self.refresher);
        let refreshes = Arc::clone(&self.refreshes);

        async move {
            refreshes.fetch_add(1, Ordering::Relaxed);
            match refresher.refresh(store.token()).await {
                Ok(token) => {
                    let token = Arc::new(token);
                    store.replace(Arc::clone(&token));
                    info!("Access token refreshed");
                    Ok(token)
                }
                Err(error) => {
                    store.clear();
                    warn!(error = %error, "Token refresh failed, credentials cleared");
                    Err(Arc::new(error))
                }
            }
        }
        .boxed()
        .shared()
    }
}

#[async_trait]
impl AuthService for AuthCoordinator {
    fn token_store(&self) -> &TokenStore {
        &self.store
    }

    async fn request_authentication(&self) {
        // Failures are logged by the refresh itself and surface as an empty store.
        let _ = self.authenticate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingRefresher {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingRefresher {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, current: Option<Arc<Token>>) -> Result<Token, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(AuthError::RefreshFailed("invalid_grant".into()));
            }
            let refresh = current
                .and_then(|t| t.refresh_token().map(str::to_owned))
                .ok_or(AuthError::MissingRefreshToken)?;
            Ok(Token::new(format!("access-{n}")).with_refresh_token(refresh))
        }
    }

    #[test]
    fn test_token_store_access() {
        let store = TokenStore::with_token(Token::new("a").with_refresh_token("r"));
        assert_eq!(store.access_token().as_deref(), Some("a"));
        assert_eq!(store.refresh_token().as_deref(), Some("r"));

        store.set(Token::new("b"));
        assert_eq!(store.access_token().as_deref(), Some("b"));
        assert_eq!(store.refresh_token(), None);

        store.clear();
        assert_eq!(store.access_token(), None);
    }

    #[test]
    fn test_token_expiry_and_debug() {
        let expired = Token::new("secret").with_expiry(SystemTime::UNIX_EPOCH);
        assert!(expired.is_expired());
        assert!(!Token::new("secret").is_expired());
        assert!(!Token::new("x").expires_in(Duration::from_secs(60)).is_expired());
        assert!(!format!("{expired:?}").contains("secret"));
    }

    #[tokio::test]
    async fn test_concurrent_authentication_refreshes_once() {
        let refresher = Arc::new(CountingRefresher::new(Duration::from_millis(50)));
        let coordinator = Arc::new(AuthCoordinator::with_store(
            Arc::new(TokenStore::with_token(Token::new("stale").with_refresh_token("r"))),
            refresher.clone(),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.request_authentication().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.refresh_count(), 1);
        assert_eq!(
            coordinator.token_store().access_token().as_deref(),
            Some("access-1")
        );
    }

    #[tokio::test]
    async fn test_sequential_authentication_refreshes_again() {
        let refresher = Arc::new(CountingRefresher::new(Duration::ZERO));
        let coordinator = AuthCoordinator::with_store(
            Arc::new(TokenStore::with_token(Token::new("stale").with_refresh_token("r"))),
            refresher.clone(),
        );

        coordinator.request_authentication().await;
        coordinator.request_authentication().await;

        assert_eq!(coordinator.refresh_count(), 2);
        assert_eq!(coordinator.store().access_token().as_deref(), Some("access-2"));
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_store() {
        let mut refresher = CountingRefresher::new(Duration::ZERO);
        refresher.fail = true;
        let coordinator = AuthCoordinator::with_store(
            Arc::new(TokenStore::with_token(Token::new("stale").with_refresh_token("r"))),
            Arc::new(refresher),
        );

        let error = coordinator.authenticate().await.unwrap_err();
        assert!(matches!(*error, AuthError::RefreshFailed(_)));
        assert_eq!(coordinator.store().access_token(), None);
    }
}
