//! Data models exchanged with the authentication API.
//!
//! - `Credential`: opaque bearer token, never decoded client-side
//! - `Profile`: identity record returned by the identity probe
//! - `RefreshGrant`: payload of a successful refresh
//! - Response envelope decoding shared by all endpoints

pub mod credential;
pub mod envelope;
pub mod profile;

pub use credential::Credential;
pub use envelope::{decode_payload, RefreshGrant};
pub use profile::Profile;
