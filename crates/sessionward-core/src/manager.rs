//! Facade wiring the session components together.
//!
//! One `SessionManager` owns one store; the transport, refresh operation,
//! bootstrapper and guard all share it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::auth::{
    BootstrapStatus, Bootstrapper, GuardDecision, RouteContext, RouteGuard, Session, SessionStore,
};
use crate::config::Config;
use crate::models::{Credential, Profile};

pub struct SessionManager {
    config: Config,
    store: Arc<SessionStore>,
    client: ApiClient,
    bootstrapper: Bootstrapper,
    guard: RouteGuard,
}

impl SessionManager {
    pub fn new(config: Config) -> Result<Self, ApiError> {
        config.validate()?;

        let store = Arc::new(match config.persistence_backend() {
            Some(persistence) => SessionStore::restore(persistence, config.max_session_age()),
            None => SessionStore::new(),
        });
        debug!(
            persistence = ?config.persistence,
            restored = store.is_authenticated(),
            "Session store ready"
        );

        Self::with_store(config, store)
    }

    /// Build around an existing store (e.g. one restored by the caller).
    pub fn with_store(config: Config, store: Arc<SessionStore>) -> Result<Self, ApiError> {
        let client = ApiClient::new(&config, Arc::clone(&store))?;
        let bootstrapper = Bootstrapper::new(client.clone());
        let guard = RouteGuard::new(
            Arc::clone(&store),
            client.refresh_operation().clone(),
            config.login_route.clone(),
            config.bootstrap_wait_timeout(),
        );

        Ok(Self {
            config,
            store,
            client,
            bootstrapper,
            guard,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn route_guard(&self) -> &RouteGuard {
        &self.guard
    }

    pub fn session(&self) -> Session {
        self.store.get()
    }

    pub async fn bootstrap(&self) -> BootstrapStatus {
        self.bootstrapper.bootstrap().await
    }

    pub async fn guard(&self, route: &RouteContext) -> GuardDecision {
        self.guard.guard(route).await
    }

    /// Where to send the browser to start the provider login flow.
    pub fn login_url(&self) -> String {
        self.config.url(&self.config.login_path)
    }

    /// Adopt a credential issued by the login flow and fetch its identity.
    ///
    /// On failure the session is cleared.
    pub async fn login(&self, credential: Credential) -> Result<Profile, ApiError> {
        self.store.set_credential(credential);
        self.store.set_status(BootstrapStatus::Loading);

        let result = match self.client.fetch_profile().await {
            Ok(profile) => self.store.set_user(profile.clone()).map(|()| profile),
            Err(e) => Err(e),
        };

        match result {
            Ok(profile) => {
                info!("Logged in");
                self.store.set_status(BootstrapStatus::Authenticated);
                Ok(profile)
            }
            Err(e) => {
                warn!(error = %e, "Login failed, clearing session");
                self.store.clear();
                self.store.set_status(BootstrapStatus::Unauthenticated);
                Err(e)
            }
        }
    }

    /// End the session. The server call is best effort; local state is
    /// cleared regardless of its outcome.
    pub async fn logout(&self) {
        if let Err(e) = self.client.logout().await {
            warn!(error = %e, "Logout request failed, clearing local session anyway");
        }
        self.store.clear();
        self.store.set_status(BootstrapStatus::Unauthenticated);
        info!("Logged out");
    }
}
