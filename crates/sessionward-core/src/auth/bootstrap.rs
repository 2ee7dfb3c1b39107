use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{BootstrapStatus, SessionStore};
use crate::api::ApiClient;

/// Resolves, once, whether a prior session is still valid.
pub struct Bootstrapper {
    client: ApiClient,
    store: Arc<SessionStore>,
    resolved: OnceCell<BootstrapStatus>,
}

impl Bootstrapper {
    pub fn new(client: ApiClient) -> Self {
        let store = Arc::clone(client.store());
        Self {
            client,
            store,
            resolved: OnceCell::new(),
        }
    }

    /// Probe identity and settle the store's bootstrap status.
    ///
    /// Never fails: any probe or refresh failure resolves to
    /// `Unauthenticated` with an empty session. Concurrent and repeated
    /// calls share the first run's result.
    pub async fn bootstrap(&self) -> BootstrapStatus {
        *self.resolved.get_or_init(|| self.run()).await
    }

    async fn run(&self) -> BootstrapStatus {
        self.store.set_status(BootstrapStatus::Loading);
        debug!(has_credential = self.store.is_authenticated(), "Resolving session");

        let status = match self.client.fetch_profile().await {
            Ok(profile) => match self.store.set_user(profile) {
                Ok(()) => {
                    info!("Session resolved: authenticated");
                    BootstrapStatus::Authenticated
                }
                Err(e) => {
                    warn!(error = %e, "Identity probe succeeded without a bearer credential");
                    self.store.clear();
                    BootstrapStatus::Unauthenticated
                }
            },
            Err(e) => {
                info!(error = %e, "Session resolved: unauthenticated");
                self.store.clear();
                BootstrapStatus::Unauthenticated
            }
        };

        self.store.set_status(status);
        status
    }
}
