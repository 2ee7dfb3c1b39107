//! Gate evaluated before entering a route.
//!
//! Policy: public routes pass untouched. For protected routes the guard
//! waits for bootstrap to settle (bounded by a timeout), then evaluates
//! once: an authenticated session is allowed, otherwise one coalesced
//! refresh decides between allow and redirect.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{RefreshOperation, SessionStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RouteContext {
    pub path: String,
    pub protected: bool,
}

impl RouteContext {
    pub fn protected(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            protected: true,
        }
    }

    pub fn public(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            protected: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct RedirectTarget {
    pub to: String,
    /// Route to come back to after login
    pub return_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GuardDecision {
    Allow,
    Redirect(RedirectTarget),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum GuardState {
    /// Bootstrap has not settled
    #[default]
    Unknown,
    /// Refresh in flight
    Checking,
    ResolvedAuthenticated,
    ResolvedUnauthenticated,
}

pub struct RouteGuard {
    store: Arc<SessionStore>,
    refresh: RefreshOperation,
    login_route: String,
    bootstrap_wait: Duration,
    state: Mutex<GuardState>,
}

impl RouteGuard {
    pub fn new(
        store: Arc<SessionStore>,
        refresh: RefreshOperation,
        login_route: impl Into<String>,
        bootstrap_wait: Duration,
    ) -> Self {
        Self {
            store,
            refresh,
            login_route: login_route.into(),
            bootstrap_wait,
            state: Mutex::new(GuardState::Unknown),
        }
    }

    /// State reached by the most recent evaluation.
    pub fn state(&self) -> GuardState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: GuardState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn redirect(&self, route: &RouteContext) -> GuardDecision {
        self.set_state(GuardState::ResolvedUnauthenticated);
        GuardDecision::Redirect(RedirectTarget {
            to: self.login_route.clone(),
            return_to: (route.path != self.login_route).then(|| route.path.clone()),
        })
    }

    fn allow(&self) -> GuardDecision {
        self.set_state(GuardState::ResolvedAuthenticated);
        GuardDecision::Allow
    }

    pub async fn guard(&self, route: &RouteContext) -> GuardDecision {
        if !route.protected {
            return GuardDecision::Allow;
        }

        if !self.store.status().is_settled() {
            self.set_state(GuardState::Unknown);
            debug!(path = %route.path, "Waiting for bootstrap before deciding");
            match tokio::time::timeout(self.bootstrap_wait, self.store.wait_until_settled()).await {
                Ok(status) => debug!(path = %route.path, ?status, "Bootstrap settled"),
                Err(_) => {
                    warn!(
                        path = %route.path,
                        waited_ms = self.bootstrap_wait.as_millis() as u64,
                        "Bootstrap did not settle in time, redirecting"
                    );
                    return self.redirect(route);
                }
            }
        }

        if self.store.is_authenticated() {
            return self.allow();
        }

        self.set_state(GuardState::Checking);
        match self.refresh.refresh().await {
            Ok(_) => self.allow(),
            Err(e) => {
                debug!(path = %route.path, error = %e, "No session, redirecting to login");
                self.redirect(route)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use reqwest::Client;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::auth::BootstrapStatus;
    use crate::models::Credential;

    const REFRESH_PATH: &str = "/api/auth/refresh-token";

    fn guard_for(server: &MockServer, wait: Duration) -> (RouteGuard, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new());
        let refresh = RefreshOperation::new(
            Client::new(),
            format!("{}{}", server.uri(), REFRESH_PATH),
            Arc::clone(&store),
        );
        (RouteGuard::new(Arc::clone(&store), refresh, "/auth/login", wait), store)
    }

    async fn mount_refresh(server: &MockServer, status: u16, expected: u64) {
        let template = if status == 200 {
            ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok2"}))
        } else {
            ResponseTemplate::new(status)
        };
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(template)
            .expect(expected)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_public_route_always_allowed() {
        let server = MockServer::start().await;
        mount_refresh(&server, 401, 0).await;
        let (guard, _store) = guard_for(&server, Duration::from_secs(5));

        let decision = guard.guard(&RouteContext::public("/")).await;
        assert_eq!(decision, GuardDecision::Allow);
    }

    #[tokio::test]
    async fn test_authenticated_allowed_without_refresh() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200, 0).await;
        let (guard, store) = guard_for(&server, Duration::from_secs(5));
        store.set_credential(Credential::new("tok1").unwrap());
        store.set_status(BootstrapStatus::Authenticated);

        let decision = guard.guard(&RouteContext::protected("/profile")).await;
        assert_eq!(decision, GuardDecision::Allow);
        assert_eq!(guard.state(), GuardState::ResolvedAuthenticated);
    }

    #[tokio::test]
    async fn test_unauthenticated_refresh_success_allows() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200, 1).await;
        let (guard, store) = guard_for(&server, Duration::from_secs(5));
        store.set_status(BootstrapStatus::Unauthenticated);

        let decision = guard.guard(&RouteContext::protected("/profile")).await;
        assert!(decision.is_allowed());
        assert_eq!(store.credential().unwrap().as_str(), "tok2");
    }

    #[tokio::test]
    async fn test_unauthenticated_refresh_failure_redirects() {
        let server = MockServer::start().await;
        mount_refresh(&server, 401, 1).await;
        let (guard, store) = guard_for(&server, Duration::from_secs(5));
        store.set_status(BootstrapStatus::Unauthenticated);

        let decision = guard.guard(&RouteContext::protected("/profile")).await;
        assert_eq!(
            decision,
            GuardDecision::Redirect(RedirectTarget {
                to: "/auth/login".into(),
                return_to: Some("/profile".into()),
            })
        );
        assert_eq!(guard.state(), GuardState::ResolvedUnauthenticated);
    }

    #[tokio::test]
    async fn test_waits_for_bootstrap_while_loading() {
        let server = MockServer::start().await;
        mount_refresh(&server, 401, 0).await;
        let (guard, store) = guard_for(&server, Duration::from_secs(5));
        store.set_status(BootstrapStatus::Loading);

        let guard = Arc::new(guard);
        let pending = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move { guard.guard(&RouteContext::protected("/profile")).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());
        assert_eq!(guard.state(), GuardState::Unknown);

        store.set_credential(Credential::new("tok1").unwrap());
        store.set_status(BootstrapStatus::Authenticated);

        assert_eq!(pending.await.unwrap(), GuardDecision::Allow);
    }

    #[tokio::test]
    async fn test_bootstrap_wait_timeout_redirects() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200, 0).await;
        let (guard, store) = guard_for(&server, Duration::from_millis(20));
        store.set_status(BootstrapStatus::Loading);

        let decision = guard.guard(&RouteContext::protected("/profile")).await;
        assert!(!decision.is_allowed());
    }

    #[test]
    fn test_redirect_to_login_route_has_no_return() {
        let store = Arc::new(SessionStore::new());
        let refresh = RefreshOperation::new(Client::new(), "http://127.0.0.1:9/refresh", Arc::clone(&store));
        let guard = RouteGuard::new(store, refresh, "/auth/login", Duration::from_secs(1));
        let decision = guard.redirect(&RouteContext::protected("/auth/login"));
        assert_eq!(
            decision,
            GuardDecision::Redirect(RedirectTarget {
                to: "/auth/login".into(),
                return_to: None,
            })
        );
    }

    #[test]
    fn test_decision_serialization() {
        let json = serde_json::to_value(GuardDecision::Redirect(RedirectTarget {
            to: "/auth/login".into(),
            return_to: Some("/profile".into()),
        }))
        .unwrap();
        assert_eq!(
            json,
            json!({"decision": "redirect", "to": "/auth/login", "returnTo": "/profile"})
        );
        assert_eq!(
            serde_json::to_value(GuardDecision::Allow).unwrap(),
            json!({"decision": "allow"})
        );
    }
}
