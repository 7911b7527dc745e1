//! Authentication module for the Bungie.net OAuth session.
//!
//! This module provides:
//! - `CredentialStore`: persistence for the token pair (file, keychain, memory)
//! - `TokenAuthority`: authorization-code and refresh-token exchanges
//! - `LoopbackListener`: one-shot local HTTP endpoint for the OAuth redirect
//! - `SessionManager`: the session state machine tying the above together
//!
//! Every authenticated request obtains its token from
//! `SessionManager::ensure_valid_token`, which refreshes at most once per
//! expiry no matter how many callers are waiting.

pub mod authority;
pub mod credentials;
pub mod error;
pub mod listener;
pub mod session;

pub use authority::{HttpTokenAuthority, TokenAuthority};
pub use credentials::{
    CredentialRecord, CredentialStore, FileCredentialStore, KeyringCredentialStore,
    MemoryCredentialStore, StoreError,
};
pub use error::AuthError;
pub use listener::{AuthorizationCallback, ListenerError, ListenerHandle, LoopbackListener};
pub use session::{AccessToken, LivenessProbe, SessionManager, SessionState};
