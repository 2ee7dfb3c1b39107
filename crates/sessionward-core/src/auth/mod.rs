//! Session lifecycle: the store, refresh, bootstrap and route guard.
//!
//! This module provides:
//! - `SessionStore`: single owner of the credential/profile pair, with
//!   subscriptions and the bootstrap status
//! - `RefreshOperation`: coalesced credential refresh
//! - `Bootstrapper`: one-time startup resolution of the session
//! - `RouteGuard`: allow/redirect decisions for protected routes
//! - `SessionPersistence`: durable session record (file or OS keychain)

pub mod bootstrap;
pub mod guard;
pub mod persist;
pub mod refresh;
pub mod session;
pub mod store;

pub use bootstrap::Bootstrapper;
pub use guard::{GuardDecision, GuardState, RedirectTarget, RouteContext, RouteGuard};
pub use persist::{FileSessionPersistence, KeyringSessionPersistence, SessionPersistence};
pub use refresh::RefreshOperation;
pub use session::{BootstrapStatus, PersistedSession, Session, SessionView};
pub use store::{SessionStore, Subscription};
