//! Process-wide session registry.
//!
//! One concurrent map from session id to session handle. Ids are minted
//! from `Uuid::new_v4()` (CSPRNG-backed): the id is the sole routing key, so
//! it must be unguessable. Removal is atomic with respect to lookups; a
//! request racing a teardown either resolves the live handle or observes
//! the entry gone, never a half-removed record.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::capability::CapabilityInvoker;
use crate::metrics;
use crate::transport::session::Session;

/// Registry of live sessions, shared across all request handlers.
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<Session>>,
    invoker: Arc<dyn CapabilityInvoker>,
}

impl SessionRegistry {
    /// Create an empty registry backed by the given capability surface.
    pub fn new(invoker: Arc<dyn CapabilityInvoker>) -> Self {
        Self {
            sessions: DashMap::new(),
            invoker,
        }
    }

    /// Mint a fresh session and insert it.
    ///
    /// The returned session is still `Uninitialized`; the caller runs the
    /// handshake through it before the id is revealed to the client.
    pub fn create(&self) -> Arc<Session> {
        let mut id = Uuid::new_v4();
        // v4 collisions are not a practical concern, but an id is never
        // reused while live, so re-mint on the off chance.
        while self.sessions.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let session = Arc::new(Session::new(id, Arc::clone(&self.invoker)));
        self.sessions.insert(id, Arc::clone(&session));

        metrics::SESSIONS_CREATED.inc();
        metrics::SESSIONS_ACTIVE.inc();
        info!(session_id = %id, active = self.sessions.len(), "Session created");
        session
    }

    /// Look up a live session.
    pub fn get(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(&entry))
    }

    /// Remove a session record. Returns the handle if it was live.
    ///
    /// The caller closes the returned session; removal itself only makes
    /// the id unroutable.
    pub fn remove(&self, id: &Uuid) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            metrics::SESSIONS_CLOSED.inc();
            metrics::SESSIONS_ACTIVE.dec();
            info!(session_id = %id, active = self.sessions.len(), "Session removed");
        }
        removed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every session. Used on graceful shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some(session) = self.remove(&id) {
                session.close().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ProcedureMap;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(ProcedureMap::with_builtins()))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = registry();
        let session = registry.create();

        let found = registry.get(&session.id()).expect("session should be live");
        assert_eq!(found.id(), session.id());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let registry = registry();
        let a = registry.create();
        let b = registry.create();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_makes_id_unroutable() {
        let registry = registry();
        let session = registry.create();
        let id = session.id();

        assert!(registry.remove(&id).is_some());
        assert!(registry.get(&id).is_none());
        // Second removal observes the entry gone.
        assert!(registry.remove(&id).is_none());
    }

    #[tokio::test]
    async fn test_unknown_id_resolves_nothing() {
        let registry = registry();
        registry.create();

        let unknown = Uuid::new_v4();
        assert!(registry.get(&unknown).is_none());
        // Lookup of an unknown id never creates a record.
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_all() {
        let registry = registry();
        let a = registry.create();
        let b = registry.create();

        registry.shutdown().await;
        assert!(registry.is_empty());
        assert!(a.is_closed().await);
        assert!(b.is_closed().await);
    }
}
