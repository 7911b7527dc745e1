use thiserror::Error;

use super::credentials::StoreError;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The identity provider refused the grant (bad or replayed code, dead refresh token).
    #[error("Token request rejected: {0}")]
    Rejected(String),

    #[error("Malformed token response: {0}")]
    MalformedResponse(String),

    #[error("Timed out waiting for the authorization redirect")]
    Timeout,

    #[error("Authorization callback state did not match this login attempt")]
    StateMismatch,

    #[error("Login required")]
    RequiresLogin,

    #[error("Network error talking to the identity provider: {0}")]
    Transport(String),

    #[error("Loopback listener failed: {0}")]
    Listener(#[source] std::io::Error),

    #[error("Credential store failed: {0}")]
    Storage(#[from] StoreError),

    #[error("Invalid OAuth configuration: {0}")]
    InvalidConfig(String),

    #[error("Already signed in - log out first")]
    AlreadyAuthenticated,

    #[error("A login is already in progress")]
    LoginInProgress,
}

impl AuthError {
    /// True when only an interactive login can recover.
    pub fn requires_login(&self) -> bool {
        matches!(self, AuthError::RequiresLogin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AuthError::Rejected("400 Bad Request: invalid_grant".to_string());
        assert_eq!(
            err.to_string(),
            "Token request rejected: 400 Bad Request: invalid_grant"
        );

        let err = AuthError::Transport("connection reset".to_string());
        assert_eq!(
            err.to_string(),
            "Network error talking to the identity provider: connection reset"
        );
    }

    #[test]
    fn test_requires_login() {
        assert!(AuthError::RequiresLogin.requires_login());
        assert!(!AuthError::Timeout.requires_login());
        assert!(!AuthError::StateMismatch.requires_login());
    }
}
