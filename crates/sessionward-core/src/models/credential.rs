use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::ApiError;

/// An opaque bearer token.
///
/// The client never inspects the token; it only holds it and forwards it in
/// the `Authorization` header. `Debug` is redacted so tokens never end up in
/// logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Result<Self, ApiError> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(ApiError::Validation("credential must not be empty".into()));
        }
        if trimmed.len() != token.len() {
            return Err(ApiError::Validation(
                "credential must not carry surrounding whitespace".into(),
            ));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Credential {
    type Error = ApiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Credential> for String {
    fn from(credential: Credential) -> Self {
        credential.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}
