use serde::{de::DeserializeOwned, Deserialize};

use super::{Credential, Profile};
use crate::api::ApiError;

/// Payload of a successful refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshGrant {
    #[serde(alias = "access_token")]
    pub credential: Credential,
    #[serde(default)]
    pub user: Option<Profile>,
}

/// The server wraps payloads as `{ status, success, message, data }`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload<T> {
    Enveloped(Envelope<T>),
    Bare(T),
}

/// Decode a response body that is either enveloped or a bare payload.
pub fn decode_payload<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    let payload: Payload<T> = serde_json::from_str(body).map_err(|e| {
        ApiError::InvalidResponse(format!(
            "{}: {}",
            e,
            ApiError::truncate_body(body)
        ))
    })?;

    match payload {
        Payload::Enveloped(envelope) if envelope.success == Some(false) => {
            Err(ApiError::InvalidResponse(format!(
                "server reported failure (status {}): {}",
                envelope.status.map(|s| s.to_string()).unwrap_or_else(|| "?".into()),
                envelope.message.unwrap_or_default()
            )))
        }
        Payload::Enveloped(envelope) => Ok(envelope.data),
        Payload::Bare(data) => Ok(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_enveloped_profile() {
        let body = r#"{"status": 200, "success": true, "data": {"user_id": 1, "email": "a@b.com", "name": "A"}}"#;
        let profile: Profile = decode_payload(body).unwrap();
        assert_eq!(profile.email, "a@b.com");
        assert_eq!(profile.user_id, Some(1));
    }

    #[test]
    fn test_decode_bare_profile() {
        let profile: Profile = decode_payload(r#"{"email": "a@b.com"}"#).unwrap();
        assert_eq!(profile, Profile::new("a@b.com"));
    }

    #[test]
    fn test_decode_reported_failure() {
        let body = r#"{"status": 401, "success": false, "message": "Please login again", "data": null}"#;
        let result: Result<Option<Profile>, _> = decode_payload(body);
        assert!(matches!(result, Err(ApiError::InvalidResponse(msg)) if msg.contains("Please login again")));
    }

    #[test]
    fn test_decode_refresh_grant_aliases() {
        let grant: RefreshGrant = decode_payload(r#"{"access_token": "tok2"}"#).unwrap();
        assert_eq!(grant.credential.as_str(), "tok2");
        assert!(grant.user.is_none());

        let grant: RefreshGrant =
            decode_payload(r#"{"data": {"credential": "tok3", "user": {"email": "a@b.com"}}}"#).unwrap();
        assert_eq!(grant.credential.as_str(), "tok3");
        assert_eq!(grant.user.map(|u| u.email).as_deref(), Some("a@b.com"));
    }

    #[test]
    fn test_decode_rejects_empty_credential() {
        let result: Result<RefreshGrant, _> = decode_payload(r#"{"access_token": ""}"#);
        assert!(matches!(result, Err(ApiError::InvalidResponse(_))));
    }

    #[test]
    fn test_decode_garbage() {
        let result: Result<Profile, _> = decode_payload("<html>oops</html>");
        assert!(matches!(result, Err(ApiError::InvalidResponse(_))));
    }
}
