//! Token endpoint exchanges.
//!
//! `HttpTokenAuthority` maps the two OAuth grants onto HTTP and back. It keeps
//! no state and never retries; what to do with a failure is the session's call.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::credentials::CredentialRecord;
use super::error::AuthError;
use crate::config::ClientConfig;

/// Token endpoint request timeout in seconds.
const TOKEN_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 300;

#[async_trait]
pub trait TokenAuthority: Send + Sync {
    /// Trade a one-time authorization code for a token pair.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<CredentialRecord, AuthError>;

    /// Trade a refresh token for a new access token.
    ///
    /// `Err(AuthError::Rejected)` means the refresh token itself is dead.
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialRecord, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    refresh_expires_in: Option<u64>,
    membership_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

pub struct HttpTokenAuthority {
    client: Client,
    config: Arc<ClientConfig>,
}

impl HttpTokenAuthority {
    pub fn new(config: Arc<ClientConfig>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TOKEN_REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self::with_client(client, config))
    }

    /// Share an existing connection pool.
    pub fn with_client(client: Client, config: Arc<ClientConfig>) -> Self {
        Self { client, config }
    }

    async fn post_grant(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let mut form = form.to_vec();
        form.push(("client_id", self.config.client_id.as_str()));
        if let Some(ref secret) = self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .client
            .post(&self.config.token_url)
            .header("X-API-Key", &self.config.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        debug!(status = %status, "Token endpoint responded");

        if !status.is_success() {
            let detail = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(TokenErrorResponse {
                    error_description: Some(description),
                    ..
                }) => description,
                Ok(TokenErrorResponse {
                    error: Some(error), ..
                }) => error,
                _ => truncate(&body),
            };
            // 5xx says nothing about the grant itself; keep the credentials.
            if status.is_server_error() {
                warn!(status = %status, detail = %detail, "Token endpoint unavailable");
                return Err(AuthError::Transport(format!("{}: {}", status, detail)));
            }
            warn!(status = %status, detail = %detail, "Token request rejected");
            return Err(AuthError::Rejected(format!("{}: {}", status, detail)));
        }

        serde_json::from_str(&body).map_err(|e| AuthError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl TokenAuthority for HttpTokenAuthority {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<CredentialRecord, AuthError> {
        info!("Exchanging authorization code");
        let data = self
            .post_grant(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .await?;

        let access_token = non_empty(data.access_token)
            .ok_or_else(|| AuthError::MalformedResponse("missing access_token".to_string()))?;
        let refresh_token = non_empty(data.refresh_token)
            .ok_or_else(|| AuthError::MalformedResponse("missing refresh_token".to_string()))?;

        Ok(CredentialRecord {
            access_token,
            refresh_token,
            obtained_at: Utc::now(),
            expires_in: data.expires_in,
            refresh_expires_in: data.refresh_expires_in,
            membership_id: data.membership_id,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<CredentialRecord, AuthError> {
        info!("Refreshing access token");
        let data = self
            .post_grant(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;

        let access_token = non_empty(data.access_token)
            .ok_or_else(|| AuthError::MalformedResponse("missing access_token".to_string()))?;

        // Rotation is optional: keep the old refresh token when none is returned.
        let rotated = non_empty(data.refresh_token);
        if rotated.is_none() {
            debug!("Refresh response kept the existing refresh token");
        }

        Ok(CredentialRecord {
            access_token,
            refresh_token: rotated.unwrap_or_else(|| refresh_token.to_string()),
            obtained_at: Utc::now(),
            expires_in: data.expires_in,
            refresh_expires_in: data.refresh_expires_in,
            membership_id: data.membership_id,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        body.to_string()
    } else {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }
}
