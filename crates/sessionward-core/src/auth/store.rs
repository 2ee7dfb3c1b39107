//! The single writable owner of the session triple.
//!
//! Every mutation is synchronous and visible to the next `get()`. Listeners
//! run after the mutation, outside the internal locks, with the new snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::persist::SessionPersistence;
use super::session::{BootstrapStatus, PersistedSession, Session};
use crate::api::ApiError;
use crate::models::{Credential, Profile};

type Listener = Arc<dyn Fn(&Session) + Send + Sync>;
type Listeners = Mutex<Vec<(u64, Listener)>>;

pub struct SessionStore {
    session: watch::Sender<Session>,
    status: watch::Sender<BootstrapStatus>,
    listeners: Arc<Listeners>,
    next_listener_id: AtomicU64,
    persistence: Option<Arc<dyn SessionPersistence>>,
    /// Serializes mutate-then-persist so the record follows mutation order
    writes: Mutex<()>,
}

/// Handle returned by [`SessionStore::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// In-memory store that starts empty.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Store backed by `persistence`, seeded from its record.
    ///
    /// Stale or unreadable records are discarded; the store then starts empty.
    pub fn restore(persistence: Arc<dyn SessionPersistence>, max_age: Option<Duration>) -> Self {
        let store = Self::build(Some(Arc::clone(&persistence)));

        match persistence.load() {
            Ok(Some(record)) if !record.is_stale(max_age) => {
                debug!(
                    has_user = record.user.is_some(),
                    saved_at = %record.saved_at,
                    "Session restored"
                );
                store.session.send_replace(record.into_session());
            }
            Ok(Some(record)) => {
                debug!(saved_at = %record.saved_at, "Persisted session is stale, discarding");
                if let Err(e) = persistence.clear() {
                    warn!(error = %e, "Failed to remove stale session");
                }
            }
            Ok(None) => debug!("No persisted session"),
            Err(e) => warn!(error = %e, "Failed to load persisted session"),
        }

        store
    }

    fn build(persistence: Option<Arc<dyn SessionPersistence>>) -> Self {
        let (session, _) = watch::channel(Session::empty());
        let (status, _) = watch::channel(BootstrapStatus::Unknown);
        Self {
            session,
            status,
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
            persistence,
            writes: Mutex::new(()),
        }
    }

    // ===== Reads =====

    pub fn get(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.session.borrow().credential.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_authenticated()
    }

    /// Receiver for async consumers; always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    // ===== Mutations =====

    pub fn set_credential(&self, credential: Credential) {
        self.mutate(|session| {
            if session.credential.as_ref() == Some(&credential) {
                return false;
            }
            session.credential = Some(credential);
            true
        });
    }

    /// Attach the identity of the current credential holder.
    ///
    /// Fails with `Validation` when no credential is held.
    pub fn set_user(&self, profile: Profile) -> Result<(), ApiError> {
        let mut rejected = false;
        self.mutate(|session| {
            if session.credential.is_none() {
                rejected = true;
                return false;
            }
            if session.user.as_ref() == Some(&profile) {
                return false;
            }
            session.user = Some(profile);
            true
        });

        if rejected {
            return Err(ApiError::Validation(
                "cannot attach a profile without a credential".into(),
            ));
        }
        Ok(())
    }

    /// Write a rotated credential and, when given, a fresh profile in one step.
    pub fn apply_refresh(&self, credential: Credential, user: Option<Profile>) {
        self.mutate(|session| {
            let before = session.clone();
            session.credential = Some(credential);
            if let Some(user) = user {
                session.user = Some(user);
            }
            *session != before
        });
    }

    pub fn clear(&self) {
        self.mutate(|session| {
            if session.is_empty() {
                return false;
            }
            *session = Session::empty();
            true
        });
    }

    fn mutate(&self, modify: impl FnOnce(&mut Session) -> bool) {
        let write = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot = None;
        self.session.send_if_modified(|session| {
            let changed = modify(session);
            if changed {
                snapshot = Some(session.clone());
            }
            changed
        });
        let Some(snapshot) = snapshot else {
            return;
        };
        self.persist(&snapshot);
        drop(write);

        self.notify(&snapshot);
    }

    fn persist(&self, snapshot: &Session) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let result = match PersistedSession::from_session(snapshot) {
            Some(record) => persistence.save(&record),
            None => persistence.clear(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist session");
        }
    }

    fn notify(&self, snapshot: &Session) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }

    // ===== Bootstrap status =====

    pub fn status(&self) -> BootstrapStatus {
        *self.status.borrow()
    }

    /// True while the startup identity probe is in flight.
    pub fn loading(&self) -> bool {
        self.status().is_loading()
    }

    pub fn set_status(&self, status: BootstrapStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(?previous, ?status, "Bootstrap status changed");
        }
    }

    /// Wait until bootstrap has resolved either way.
    pub async fn wait_until_settled(&self) -> BootstrapStatus {
        let mut status = self.status.subscribe();
        let settled = status.wait_for(BootstrapStatus::is_settled).await;
        match settled {
            Ok(settled) => *settled,
            // The sender lives as long as `self`, so this is unreachable in practice
            Err(_) => BootstrapStatus::Unauthenticated,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
