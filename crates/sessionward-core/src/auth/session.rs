use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Credential, Profile};

/// Snapshot of the session triple.
///
/// `is_authenticated` is derived from the credential rather than stored, so
/// it cannot drift. A profile is only ever present alongside a credential;
/// the store enforces that on every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(into = "SessionView")]
pub struct Session {
    pub(crate) credential: Option<Credential>,
    pub(crate) user: Option<Profile>,
}

impl Session {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn user(&self) -> Option<&Profile> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.credential.is_none() && self.user.is_none()
    }
}

/// Serialized shape handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub credential: Option<String>,
    pub is_authenticated: bool,
    pub user: Option<Profile>,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        Self {
            is_authenticated: session.is_authenticated(),
            credential: session.credential.map(String::from),
            user: session.user,
        }
    }
}

/// Where the startup resolution stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStatus {
    /// Bootstrap has not started yet
    #[default]
    Unknown,
    /// Identity probe in flight; render a neutral loading state
    Loading,
    Authenticated,
    Unauthenticated,
}

impl BootstrapStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, BootstrapStatus::Loading)
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            BootstrapStatus::Authenticated | BootstrapStatus::Unauthenticated
        )
    }
}

/// On-disk (or keychain) form of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub credential: Credential,
    #[serde(default)]
    pub user: Option<Profile>,
    pub saved_at: DateTime<Utc>,
}

impl PersistedSession {
    /// Build a record from a snapshot; `None` when there is nothing to keep.
    pub fn from_session(session: &Session) -> Option<Self> {
        session.credential.clone().map(|credential| Self {
            credential,
            user: session.user.clone(),
            saved_at: Utc::now(),
        })
    }

    pub fn into_session(self) -> Session {
        Session {
            credential: Some(self.credential),
            user: self.user,
        }
    }

    /// Records older than `max_age` are not trusted on restore.
    pub fn is_stale(&self, max_age: Option<Duration>) -> bool {
        match max_age {
            Some(max_age) => Utc::now() - self.saved_at > max_age,
            None => false,
        }
    }
}
