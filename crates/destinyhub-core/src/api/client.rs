//! API client for the Bungie.net platform.
//!
//! Every outbound call goes through `ApiClient::call` (bearer token managed by
//! the `SessionManager`) or `ApiClient::call_public` (API key only).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::auth::{AccessToken, SessionManager};
use crate::config::ClientConfig;
use crate::models::{
    BungieName, BungieNetUser, BungieResponse, CharacterResponse, ItemDefinition, ProfileResponse,
    UserInfoCard,
};

use super::probe::PlatformProbe;
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Header carrying the application's API key on every platform request.
pub(crate) const API_KEY_HEADER: &str = "X-API-Key";

/// Membership type wildcard: search across all platforms.
const ALL_MEMBERSHIP_TYPES: i32 = -1;

/// Profile (100) and Characters (200).
const PROFILE_COMPONENTS: &str = "100,200";

/// CharacterEquipment (205) and ItemInstances (300).
const EQUIPMENT_COMPONENTS: &str = "205,300";

/// A platform request, relative to the configured API base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post_json<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("request body: {}", e)))?;
        Ok(Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        })
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A successful (2xx) response body.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Unwrap the platform envelope, surfacing a non-success `ErrorCode` as
    /// `ApiError::Platform`.
    pub fn into_platform<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        let envelope: BungieResponse<T> = self.json()?;
        if !envelope.is_success() {
            return Err(ApiError::Platform {
                code: envelope.error_code,
                status: envelope.error_status,
                message: envelope.message,
            });
        }
        envelope
            .response
            .ok_or_else(|| ApiError::InvalidResponse("envelope has no Response".to_string()))
    }
}

/// Authenticated client for Bungie.net.
pub struct ApiClient {
    client: Client,
    config: Arc<ClientConfig>,
    session: Arc<SessionManager>,
    definitions: RwLock<HashMap<u32, ItemDefinition>>,
}

impl ApiClient {
    pub fn new(config: Arc<ClientConfig>, session: Arc<SessionManager>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client, config, session))
    }

    pub fn with_client(
        client: Client,
        config: Arc<ClientConfig>,
        session: Arc<SessionManager>,
    ) -> Self {
        Self {
            client,
            config,
            session,
            definitions: RwLock::new(HashMap::new()),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Liveness probe sharing this client's connection pool.
    pub fn probe(&self) -> PlatformProbe {
        PlatformProbe::with_client(self.client.clone(), self.config.clone())
    }

    /// Issue `request` with the current bearer token.
    ///
    /// A 401 marks the token unauthorized and the request is retried exactly
    /// once with a freshly obtained token. A second 401 means the session can
    /// no longer be trusted and surfaces as `RequiresLogin`.
    pub async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let token = self.session.ensure_valid_token().await?;
        let response = self.send(request, Some(&token)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check_response(response).await;
        }

        warn!(path = %request.path, "Access token rejected, retrying with a fresh token");
        self.session.mark_unauthorized(&token).await;

        let token = self.session.ensure_valid_token().await?;
        let response = self.send(request, Some(&token)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(path = %request.path, "Fresh access token rejected as well");
            self.session.mark_unauthorized(&token).await;
            return Err(ApiError::RequiresLogin);
        }
        Self::check_response(response).await
    }

    /// Issue `request` with the API key only. Never touches the session.
    pub async fn call_public(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let response = self.send(request, None).await?;
        Self::check_response(response).await
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn build(&self, request: &ApiRequest, token: Option<&AccessToken>) -> RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .header(API_KEY_HEADER, &self.config.api_key);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        builder
    }

    async fn send(
        &self,
        request: &ApiRequest,
        token: Option<&AccessToken>,
    ) -> Result<reqwest::Response, ApiError> {
        debug!(method = %request.method, path = %request.path, "Platform request");
        self.build(request, token).send().await.map_err(|e| {
            warn!(path = %request.path, error = %e, "Platform request failed");
            ApiError::from(e)
        })
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<ApiResponse, ApiError> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(ApiResponse {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(ApiError::upstream(status, &body))
        }
    }

    // ===== Data Fetching Methods =====

    /// The signed-in Bungie.net account.
    pub async fn current_user(&self) -> Result<BungieNetUser, ApiError> {
        self.call(&ApiRequest::get("User/GetCurrentBungieNetUser/"))
            .await?
            .into_platform()
    }

    /// Destiny memberships matching a global Bungie name, across platforms.
    pub async fn search_player(&self, name: &BungieName) -> Result<Vec<UserInfoCard>, ApiError> {
        let request = ApiRequest::post_json(
            format!(
                "Destiny2/SearchDestinyPlayerByBungieName/{}/",
                ALL_MEMBERSHIP_TYPES
            ),
            name,
        )?;
        self.call_public(&request).await?.into_platform()
    }

    pub async fn fetch_profile(
        &self,
        membership_type: i32,
        membership_id: &str,
    ) -> Result<ProfileResponse, ApiError> {
        let request = ApiRequest::get(format!(
            "Destiny2/{}/Profile/{}/",
            membership_type, membership_id
        ))
        .query("components", PROFILE_COMPONENTS);
        self.call(&request).await?.into_platform()
    }

    pub async fn fetch_character_equipment(
        &self,
        membership_type: i32,
        membership_id: &str,
        character_id: &str,
    ) -> Result<CharacterResponse, ApiError> {
        let request = ApiRequest::get(format!(
            "Destiny2/{}/Profile/{}/Character/{}/",
            membership_type, membership_id, character_id
        ))
        .query("components", EQUIPMENT_COMPONENTS);
        self.call(&request).await?.into_platform()
    }

    /// Manifest definition for an item hash. Cached for the life of the client.
    pub async fn item_definition(&self, hash: u32) -> Result<ItemDefinition, ApiError> {
        if let Some(definition) = self.definitions.read().await.get(&hash) {
            return Ok(definition.clone());
        }

        let request = ApiRequest::get(format!(
            "Destiny2/Manifest/DestinyInventoryItemDefinition/{}/",
            hash
        ));
        let definition: ItemDefinition = self.call_public(&request).await?.into_platform()?;

        self.definitions
            .write()
            .await
            .insert(hash, definition.clone());
        Ok(definition)
    }
}
