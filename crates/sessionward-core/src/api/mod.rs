//! HTTP side of the session core.
//!
//! `ApiClient` is the credential transport: it attaches the bearer
//! credential to every request and performs the refresh-and-replay-once
//! cycle on 401.

pub mod client;
pub mod error;
pub mod request;

pub use client::ApiClient;
pub use error::ApiError;
pub use request::{ApiRequest, Attempt};
