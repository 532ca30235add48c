//! Concurrent map of live sessions

use super::{Session, SessionDeps, SessionError};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

pub type SharedSession = Arc<Mutex<Session>>;

pub struct SessionStore {
    sessions: DashMap<Uuid, SharedSession>,
    deps: SessionDeps,
}

impl SessionStore {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            sessions: DashMap::new(),
            deps,
        }
    }

    /// Start a new, empty session
    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        let session = Session::new(id, self.deps.clone());
        self.sessions.insert(id, Arc::new(Mutex::new(session)));
        tracing::info!(session = %id, live = self.sessions.len(), "Session created");
        id
    }

    pub fn get(&self, id: Uuid) -> Result<SharedSession, SessionError> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(SessionError::NotFound(id))
    }

    pub fn remove(&self, id: Uuid) -> Result<(), SessionError> {
        self.sessions
            .remove(&id)
            .map(|_| tracing::info!(session = %id, "Session removed"))
            .ok_or(SessionError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions idle for longer than `ttl`
    ///
    /// Sessions that are busy answering are never reaped.
    pub fn reap_idle(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| match session.try_lock() {
            Ok(guard) => guard.idle_for() < ttl,
            Err(_) => true,
        });
        let reaped = before.saturating_sub(self.sessions.len());
        if reaped > 0 {
            tracing::info!(reaped, live = self.sessions.len(), "Reaped idle sessions");
        }
        reaped
    }
}
