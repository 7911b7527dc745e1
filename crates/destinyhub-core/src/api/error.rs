use thiserror::Error;

use crate::auth::AuthError;

#[derive(Error, Debug)]
pub enum ApiError {
    /// No usable session; only an interactive login recovers.
    #[error("Login required")]
    RequiresLogin,

    #[error("Upstream returned {status}: {detail}")]
    Upstream { status: u16, detail: String },

    /// HTTP succeeded but the platform envelope carried an error code.
    #[error("Bungie.net error {code} ({status}): {message}")]
    Platform {
        code: i32,
        status: String,
        message: String,
    },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn upstream(status: reqwest::StatusCode, body: &str) -> Self {
        ApiError::Upstream {
            status: status.as_u16(),
            detail: Self::truncate_body(body),
        }
    }

    /// Worth retrying later without signing in again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Upstream { .. } | ApiError::Platform { .. } | ApiError::Transport(_) => true,
            ApiError::RequiresLogin | ApiError::InvalidResponse(_) => false,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Transport(detail) => ApiError::Transport(detail),
            _ => ApiError::RequiresLogin,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.to_string())
    }
}
