use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::client::API_KEY_HEADER;
use crate::auth::{AccessToken, LivenessProbe};
use crate::config::ClientConfig;
use crate::models::BungieResponse;

/// A probe that times out reports the token as dead.
const PROBE_TIMEOUT_SECS: u64 = 10;

const CURRENT_USER_PATH: &str = "User/GetCurrentBungieNetUser/";

/// Checks a stored access token against `User/GetCurrentBungieNetUser/`.
#[derive(Clone)]
pub struct PlatformProbe {
    client: Client,
    config: Arc<ClientConfig>,
}

impl PlatformProbe {
    pub fn new(config: Arc<ClientConfig>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: Arc<ClientConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl LivenessProbe for PlatformProbe {
    async fn is_alive(&self, token: &AccessToken) -> bool {
        let url = format!(
            "{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            CURRENT_USER_PATH
        );
        let response = match self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .bearer_auth(token.as_str())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Liveness probe failed");
                return false;
            }
        };

        if !response.status().is_success() {
            debug!(status = %response.status(), "Liveness probe rejected");
            return false;
        }

        match response.json::<BungieResponse<serde_json::Value>>().await {
            Ok(envelope) => envelope.is_success(),
            Err(e) => {
                debug!(error = %e, "Liveness probe returned an unreadable body");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_for(server: &mockito::ServerGuard) -> PlatformProbe {
        let mut config = ClientConfig::new("49198", "test-api-key");
        config.api_base_url = format!("{}/Platform", server.url());
        PlatformProbe::new(Arc::new(config)).unwrap()
    }

    #[tokio::test]
    async fn test_live_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/Platform/User/GetCurrentBungieNetUser/")
            .match_header("authorization", "Bearer live")
            .match_header("x-api-key", "test-api-key")
            .with_status(200)
            .with_body(r#"{"Response": {"membershipId": "1"}, "ErrorCode": 1}"#)
            .create_async()
            .await;

        assert!(probe_for(&server).is_alive(&AccessToken::new("live")).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Platform/User/GetCurrentBungieNetUser/")
            .with_status(401)
            .create_async()
            .await;

        assert!(!probe_for(&server).is_alive(&AccessToken::new("dead")).await);
    }

    #[tokio::test]
    async fn test_platform_error_counts_as_dead() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Platform/User/GetCurrentBungieNetUser/")
            .with_status(200)
            .with_body(r#"{"ErrorCode": 99, "ErrorStatus": "WebAuthRequired"}"#)
            .create_async()
            .await;

        assert!(!probe_for(&server).is_alive(&AccessToken::new("dead")).await);
    }
}
