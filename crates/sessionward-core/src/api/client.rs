//! Credential transport for the application API.
//!
//! Every request carries the store's current credential. A 401 triggers one
//! coalesced refresh and a single replay; a second 401 on the replay is
//! final. Rate-limited requests are retried with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::{ApiError, ApiRequest, Attempt};
use crate::auth::{RefreshOperation, SessionStore};
use crate::config::Config;
use crate::models::{decode_payload, Credential, Profile};

/// API client bound to one session store.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    store: Arc<SessionStore>,
    refresh: RefreshOperation,
    identity_path: String,
    logout_path: String,
    max_rate_limit_retries: u32,
    initial_backoff_ms: u64,
}

impl ApiClient {
    pub fn new(config: &Config, store: Arc<SessionStore>) -> Result<Self, ApiError> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .cookie_store(true)
            .build()?;

        let refresh = RefreshOperation::new(
            client.clone(), // Cheap clone, shares connection pool and cookies
            config.url(&config.refresh_path),
            Arc::clone(&store),
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            store,
            refresh,
            identity_path: config.identity_path.clone(),
            logout_path: config.logout_path.clone(),
            max_rate_limit_retries: config.max_rate_limit_retries,
            initial_backoff_ms: config.rate_limit_backoff_ms,
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn refresh_operation(&self) -> &RefreshOperation {
        &self.refresh
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_headers(credential: Option<&Credential>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(credential) = credential {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {}", credential.as_str()))
                .map_err(|_| {
                    ApiError::Validation("credential contains characters not allowed in a header".into())
                })?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            ApiError::InvalidResponse(format!(
                "Failed to parse JSON response from {}: {}: {}",
                path,
                e,
                ApiError::truncate_body(&body)
            ))
        })
    }

    /// Build and send one attempt, backing off on 429.
    /// The credential is read from the store right before each send and
    /// returned with the response.
    async fn dispatch(
        &self,
        request: &ApiRequest,
        attempt: Attempt,
    ) -> Result<(Response, Option<Credential>), ApiError> {
        let mut retries = 0;
        let mut backoff_ms = self.initial_backoff_ms;

        loop {
            let credential = self.store.credential();
            let mut builder = self
                .client
                .request(request.method().clone(), self.url(request.path()))
                .headers(Self::auth_headers(credential.as_ref())?);
            if !request.query_pairs().is_empty() {
                builder = builder.query(request.query_pairs());
            }
            if let Some(body) = request.body() {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            debug!(
                method = %request.method(),
                path = request.path(),
                ?attempt,
                status = response.status().as_u16(),
                "Request sent"
            );

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok((response, credential));
            }

            // Rate limited
            retries += 1;
            if retries > self.max_rate_limit_retries {
                return Err(ApiError::RateLimited);
            }
            warn!(path = request.path(), retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2; // Exponential backoff
        }
    }

    /// Send a request with the current credential.
    ///
    /// A 401 on the first attempt refreshes the credential (joining any
    /// refresh already in flight) and replays the request once. If the
    /// refresh fails the session is cleared and `Unauthorized` is returned
    /// without resending. If the store already holds a different credential
    /// than the one sent, that refresh has happened and the request is
    /// replayed without another.
    pub async fn send(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let mut attempt = Attempt::Initial;

        loop {
            let (response, sent) = self.dispatch(request, attempt).await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Self::check_response(response).await;
            }

            match attempt {
                Attempt::Replay => {
                    warn!(path = request.path(), "Replayed request still unauthorized");
                    return Err(ApiError::Unauthorized);
                }
                Attempt::Initial => {
                    let current = self.store.credential();
                    if current != sent {
                        if current.is_none() {
                            debug!(path = request.path(), "Session ended while in flight");
                            return Err(ApiError::Unauthorized);
                        }
                        debug!(path = request.path(), "Credential already rotated, replaying");
                        attempt = Attempt::Replay;
                        continue;
                    }

                    debug!(path = request.path(), "Unauthorized, refreshing credential");
                    if let Err(e) = self.refresh.refresh().await {
                        warn!(path = request.path(), error = %e, "Refresh failed, not replaying");
                        return Err(ApiError::Unauthorized);
                    }
                    attempt = Attempt::Replay;
                }
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(&ApiRequest::get(path)).await?;
        Self::read_json(response, path).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.send(&ApiRequest::post(path).json(body)?).await?;
        Self::read_json(response, path).await
    }

    /// POST without a body, discarding the response body.
    pub async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        self.send(&ApiRequest::post(path)).await?;
        Ok(())
    }

    // ===== Auth Endpoints =====

    /// Ask the server who the current credential belongs to.
    pub async fn fetch_profile(&self) -> Result<Profile, ApiError> {
        let response = self.send(&ApiRequest::get(self.identity_path.as_str())).await?;
        let body = response.text().await?;
        let profile: Profile = decode_payload(&body)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Tell the server the session is over. Never refreshes: a 401 here
    /// just means the server already forgot us.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let request = ApiRequest::post(self.logout_path.as_str());
        let (response, _) = self.dispatch(&request, Attempt::Replay).await?;
        Self::check_response(response).await?;
        Ok(())
    }
}
