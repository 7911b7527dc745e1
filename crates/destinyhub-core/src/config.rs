//! Application configuration management.
//!
//! Two kinds of configuration live here:
//! - `ClientConfig`: the OAuth client identity and endpoints, read once from
//!   the environment at startup and immutable afterwards.
//! - `Config`: user preferences (saved account, credential backend), stored at
//!   `~/.config/destinyhub/config.json`.

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
const APP_NAME: &str = "destinyhub";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Public client id registered for Destiny Hub on bungie.net
pub const DEFAULT_CLIENT_ID: &str = "49198";

pub const DEFAULT_AUTH_URL: &str = "https://www.bungie.net/en/OAuth/Authorize";

pub const DEFAULT_TOKEN_URL: &str = "https://www.bungie.net/Platform/App/OAuth/token/";

pub const DEFAULT_API_BASE_URL: &str = "https://www.bungie.net/Platform";

/// Ports tried, in order, for the loopback redirect listener.
pub const DEFAULT_CALLBACK_PORTS: (u16, u16) = (8000, 8999);

/// OAuth client identity and endpoints.
#[derive(Clone)]
pub struct ClientConfig {
    pub client_id: String,
    /// Only set for confidential clients.
    pub client_secret: Option<String>,
    pub api_key: String,
    pub auth_url: String,
    pub token_url: String,
    /// Pinned redirect URI. When unset the loopback listener's own address is used.
    pub redirect_uri: Option<String>,
    pub api_base_url: String,
    /// `None` lets the OS pick any free port.
    pub callback_ports: Option<(u16, u16)>,
}

impl ClientConfig {
    pub fn new(client_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            api_key: api_key.into(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            redirect_uri: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            callback_ports: Some(DEFAULT_CALLBACK_PORTS),
        }
    }

    /// Load from `BUNGIE_*` environment variables.
    ///
    /// Call `dotenvy::dotenv()` first if a `.env` file should be honored.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("BUNGIE_API_KEY")
            .context("BUNGIE_API_KEY is required (set it in the environment or .env)")?;
        let client_id = get("BUNGIE_CLIENT_ID").unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let mut config = Self::new(client_id, api_key);
        config.client_secret = get("BUNGIE_CLIENT_SECRET");
        if let Some(url) = get("BUNGIE_AUTH_URL") {
            config.auth_url = url;
        }
        if let Some(url) = get("BUNGIE_TOKEN_URL") {
            config.token_url = url;
        }
        if let Some(url) = get("BUNGIE_API_BASE_URL") {
            config.api_base_url = url;
        }
        config.redirect_uri = get("BUNGIE_REDIRECT_URI");

        config.validate()?;
        Ok(config)
    }

    /// Check that every endpoint is a parseable absolute URL.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.auth_url)
            .with_context(|| format!("Invalid authorization URL: {}", self.auth_url))?;
        Url::parse(&self.token_url)
            .with_context(|| format!("Invalid token URL: {}", self.token_url))?;
        Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid API base URL: {}", self.api_base_url))?;
        if let Some(ref uri) = self.redirect_uri {
            Url::parse(uri).with_context(|| format!("Invalid redirect URI: {}", uri))?;
        }
        if let Some((start, end)) = self.callback_ports {
            anyhow::ensure!(start <= end, "Invalid callback port range {}-{}", start, end);
        }
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("api_key", &"<redacted>")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("api_base_url", &self.api_base_url)
            .field("callback_ports", &self.callback_ports)
            .finish()
    }
}

/// Where OAuth credentials are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
}

/// The Destiny account the user last selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedAccount {
    pub membership_id: String,
    pub membership_type: i32,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub last_bungie_name: Option<String>,
    #[serde(default)]
    pub account: Option<SavedAccount>,
    #[serde(default)]
    pub credential_backend: CredentialBackend,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(serde_json::from_str(&contents).context("Failed to parse config file")?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for credentials and log files.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir =
            dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}
