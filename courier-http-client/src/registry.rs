//! Registry of API clients sharing one session.

use parking_lot::RwLock;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::{HttpClientError, Result, Session};

type AnyClient = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&Session) -> AnyClient + Send + Sync>;

/// Registry of typed API clients, keyed by client type.
///
/// Factories are registered up front; each client is built on first lookup
/// and shared afterwards. Registration is append-only.
pub struct ClientRegistry {
    session: Session,
    factories: RwLock<HashMap<TypeId, Factory>>,
    clients: RwLock<HashMap<TypeId, AnyClient>>,
}

impl ClientRegistry {
    /// Create an empty registry over `session`.
    pub fn new(session: Session) -> Self {
        Self {
            session,
            factories: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Session handed to every factory.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Register the factory for client type `C`.
    ///
    /// Returns `false` and keeps the existing factory if `C` is already
    /// registered.
    pub fn register<C, F>(&self, factory: F) -> bool
    where
        C: Send + Sync + 'static,
        F: Fn(&Session) -> C + Send + Sync + 'static,
    {
        let mut factories = self.factories.write();
        if factories.contains_key(&TypeId::of::<C>()) {
            return false;
        }
        factories.insert(
            TypeId::of::<C>(),
            Arc::new(move |session: &Session| Arc::new(factory(session)) as AnyClient),
        );
        debug!(client = type_name::<C>(), "Registered API client");
        true
    }

    /// Whether a factory for `C` is registered.
    pub fn contains<C: 'static>(&self) -> bool {
        self.factories.read().contains_key(&TypeId::of::<C>())
    }

    /// Get the client of type `C`, building it on first use.
    pub fn get<C: Send + Sync + 'static>(&self) -> Result<Arc<C>> {
        let key = TypeId::of::<C>();
        if let Some(client) = self.clients.read().get(&key) {
            return downcast(Arc::clone(client));
        }

        let factory = self
            .factories
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| {
                HttpClientError::Internal(format!(
                    "no client registered for `{}`",
                    type_name::<C>()
                ))
            })?;

        // Built outside the lock; a concurrent build of the same type loses.
        let built = factory(&self.session);
        let client = Arc::clone(self.clients.write().entry(key).or_insert(built));
        downcast(client)
    }
}

fn downcast<C: Send + Sync + 'static>(client: AnyClient) -> Result<Arc<C>> {
    client.downcast::<C>().map_err(|_| {
        HttpClientError::Internal(format!("client type mismatch for `{}`", type_name::<C>()))
    })
}
