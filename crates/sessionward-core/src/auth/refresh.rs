//! Single-flight credential refresh.
//!
//! At most one refresh is in flight per store. Callers that arrive while one
//! is pending join it and receive the same outcome. The network call runs on
//! its own task, so it completes even if every waiter goes away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use tracing::{debug, info, warn};

use super::SessionStore;
use crate::api::ApiError;
use crate::models::{decode_payload, Credential, RefreshGrant};

type RefreshOutcome = Result<Credential, String>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Handle to the refresh endpoint. Clone is cheap; clones share the pending slot.
#[derive(Clone)]
pub struct RefreshOperation {
    inner: Arc<RefreshInner>,
}

struct RefreshInner {
    http: Client,
    url: String,
    store: Arc<SessionStore>,
    pending: Mutex<Option<(u64, PendingRefresh)>>,
    next_id: AtomicU64,
    calls: AtomicU64,
}

impl RefreshOperation {
    pub fn new(http: Client, url: impl Into<String>, store: Arc<SessionStore>) -> Self {
        Self {
            inner: Arc::new(RefreshInner {
                http,
                url: url.into(),
                store,
                pending: Mutex::new(None),
                next_id: AtomicU64::new(0),
                calls: AtomicU64::new(0),
            }),
        }
    }

    /// Obtain a fresh credential, joining any refresh already in flight.
    ///
    /// On failure the store has been cleared and the error is `SessionExpired`.
    pub async fn refresh(&self) -> Result<Credential, ApiError> {
        self.join_or_start().await.map_err(ApiError::SessionExpired)
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock_pending().is_some()
    }

    /// Number of refresh requests actually sent to the server.
    pub fn network_calls(&self) -> u64 {
        self.inner.calls.load(Ordering::Relaxed)
    }

    fn join_or_start(&self) -> PendingRefresh {
        let mut slot = self.inner.lock_pending();
        if let Some((id, pending)) = slot.as_ref() {
            debug!(refresh_id = id, "Joining in-flight refresh");
            return pending.clone();
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(refresh_id = id, "Starting refresh");

        let task = {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let outcome = inner.perform().await;
                let outcome = inner.publish(outcome);
                inner.release(id);
                outcome
            })
        };

        let inner = Arc::clone(&self.inner);
        let pending = task
            .map(move |joined| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The task died before publishing; leave nothing half-done
                    inner.store.clear();
                    inner.release(id);
                    Err(format!("refresh task failed: {}", e))
                }
            })
            .boxed()
            .shared();

        *slot = Some((id, pending.clone()));
        pending
    }
}

impl RefreshInner {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<(u64, PendingRefresh)>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, id: u64) {
        let mut slot = self.lock_pending();
        if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
            *slot = None;
        }
    }

    async fn perform(&self) -> Result<RefreshGrant, String> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let response = self
            .http
            .post(&self.url)
            .send()
            .await
            .map_err(|e| format!("refresh request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "refresh rejected with status {}: {}",
                status,
                ApiError::truncate_body(&body)
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read refresh response: {}", e))?;
        decode_payload::<RefreshGrant>(&body).map_err(|e| e.to_string())
    }

    /// Write the outcome to the store before any waiter observes it.
    fn publish(&self, outcome: Result<RefreshGrant, String>) -> RefreshOutcome {
        match outcome {
            Ok(grant) => {
                info!(with_user = grant.user.is_some(), "Credential refreshed");
                self.store
                    .apply_refresh(grant.credential.clone(), grant.user);
                Ok(grant.credential)
            }
            Err(reason) => {
                warn!(reason = %reason, "Refresh failed, clearing session");
                self.store.clear();
                Err(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::models::Profile;

    const REFRESH_PATH: &str = "/api/auth/refresh-token";

    async fn operation(server: &MockServer) -> (RefreshOperation, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new());
        let op = RefreshOperation::new(
            Client::new(),
            format!("{}{}", server.uri(), REFRESH_PATH),
            Arc::clone(&store),
        );
        (op, store)
    }

    #[tokio::test]
    async fn test_refresh_success_updates_store() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 200,
                "success": true,
                "data": {"access_token": "tok2", "user": {"email": "a@b.com"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (op, store) = operation(&server).await;
        store.set_credential(Credential::new("tok1").unwrap());

        let credential = op.refresh().await.unwrap();
        assert_eq!(credential.as_str(), "tok2");

        let session = store.get();
        assert_eq!(session.credential().unwrap().as_str(), "tok2");
        assert_eq!(session.user(), Some(&Profile::new("a@b.com")));
        assert!(!op.is_pending());
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_store() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "status": 401, "success": false, "message": "Please login again"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (op, store) = operation(&server).await;
        store.set_credential(Credential::new("tok1").unwrap());
        store.set_user(Profile::new("a@b.com")).unwrap();

        let result = op.refresh().await;
        assert!(matches!(result, Err(ApiError::SessionExpired(reason)) if reason.contains("401")));
        assert!(store.get().is_empty());
        assert!(!op.is_pending());
    }

    #[tokio::test]
    async fn test_refresh_undecodable_body_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let (op, store) = operation(&server).await;
        store.set_credential(Credential::new("tok1").unwrap());

        assert!(matches!(op.refresh().await, Err(ApiError::SessionExpired(_))));
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_coalesce() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok2"}))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (op, _store) = operation(&server).await;
        let other = op.clone();
        let (a, b, c) = tokio::join!(op.refresh(), op.refresh(), other.refresh());

        assert_eq!(a.unwrap().as_str(), "tok2");
        assert_eq!(b.unwrap().as_str(), "tok2");
        assert_eq!(c.unwrap().as_str(), "tok2");
        assert_eq!(op.network_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;

        let (op, _store) = operation(&server).await;
        let (a, b) = tokio::join!(op.refresh(), op.refresh());

        match (a, b) {
            (Err(ApiError::SessionExpired(a)), Err(ApiError::SessionExpired(b))) => assert_eq!(a, b),
            other => panic!("expected two rejections, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sequential_refreshes_each_hit_the_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok2"})))
            .expect(2)
            .mount(&server)
            .await;

        let (op, _store) = operation(&server).await;
        op.refresh().await.unwrap();
        op.refresh().await.unwrap();
        assert_eq!(op.network_calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_completes_when_waiter_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok2"}))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (op, store) = operation(&server).await;
        let abandoned = tokio::time::timeout(Duration::from_millis(10), op.refresh()).await;
        assert!(abandoned.is_err());
        assert!(op.is_pending());

        // A late caller joins the same flight
        let credential = op.refresh().await.unwrap();
        assert_eq!(credential.as_str(), "tok2");
        assert_eq!(store.credential().unwrap().as_str(), "tok2");
        assert_eq!(op.network_calls(), 1);
    }
}
