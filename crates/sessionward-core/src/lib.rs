//! Client-side session core.
//!
//! Tracks whether the user is authenticated, holds the short-lived bearer
//! credential, refreshes it transparently when a request comes back 401 and
//! gates protected routes until the session state is resolved. The
//! presentation layer drives it through [`SessionManager`] and renders from
//! the [`auth::SessionStore`].

pub mod api;
pub mod auth;
pub mod config;
pub mod manager;
pub mod models;

pub use api::{ApiClient, ApiError, ApiRequest, Attempt};
pub use auth::{
    BootstrapStatus, GuardDecision, GuardState, RedirectTarget, RouteContext, Session,
    SessionStore, SessionView,
};
pub use config::{Config, PersistenceMode};
pub use manager::SessionManager;
pub use models::{Credential, Profile};
