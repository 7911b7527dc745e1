//! Core library for Destiny Hub.
//!
//! This crate owns everything that is not presentation:
//! - `auth`: OAuth session lifecycle (login, resume, refresh, logout)
//! - `api`: the authenticated Bungie.net platform client
//! - `models`: typed platform payloads (players, profiles, equipment)
//! - `config`: client identity and persisted user preferences

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, PlatformProbe};
pub use auth::{
    AccessToken, AuthError, CredentialRecord, CredentialStore, FileCredentialStore,
    HttpTokenAuthority, KeyringCredentialStore, LivenessProbe, LoopbackListener, MemoryCredentialStore,
    SessionManager, SessionState, TokenAuthority,
};
pub use config::{ClientConfig, Config, CredentialBackend, SavedAccount};
