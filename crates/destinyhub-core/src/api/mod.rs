//! REST API client module for Bungie.net platform services.
//!
//! `ApiClient` attaches the application's API key and, for authenticated
//! calls, the bearer token owned by the `SessionManager`. A rejected token
//! is refreshed and the request retried once before the caller is told to
//! log in again.

pub mod client;
pub mod error;
pub mod probe;

pub use client::{ApiClient, ApiRequest, ApiResponse};
pub use error::ApiError;
pub use probe::PlatformProbe;
