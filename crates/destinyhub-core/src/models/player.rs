//! Player identity and profile models.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum digits in the numeric suffix of a Bungie name.
const MAX_NAME_CODE_DIGITS: usize = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BungieNameError {
    #[error("Bungie name must look like Name#1234")]
    MissingCode,

    #[error("Bungie name is empty")]
    EmptyName,

    #[error("Invalid Bungie name code: {0}")]
    InvalidCode(String),
}

/// A global Bungie name such as `Guardian#0042`.
///
/// Serializes to the body `SearchDestinyPlayerByBungieName` expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BungieName {
    pub display_name: String,
    pub display_name_code: u16,
}

impl FromStr for BungieName {
    type Err = BungieNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, code) = s.trim().rsplit_once('#').ok_or(BungieNameError::MissingCode)?;
        if name.trim().is_empty() {
            return Err(BungieNameError::EmptyName);
        }
        let valid_code = !code.is_empty()
            && code.len() <= MAX_NAME_CODE_DIGITS
            && code.chars().all(|c| c.is_ascii_digit());
        if !valid_code {
            return Err(BungieNameError::InvalidCode(code.to_string()));
        }
        let display_name_code = code
            .parse()
            .map_err(|_| BungieNameError::InvalidCode(code.to_string()))?;

        Ok(Self {
            display_name: name.to_string(),
            display_name_code,
        })
    }
}

impl fmt::Display for BungieName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:04}", self.display_name, self.display_name_code)
    }
}

/// One Destiny membership (platform account) returned by player search.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfoCard {
    pub membership_id: String,
    pub membership_type: i32,
    #[serde(default)]
    pub display_name: String,
    pub bungie_global_display_name: Option<String>,
    pub bungie_global_display_name_code: Option<u16>,
}

impl UserInfoCard {
    pub fn bungie_name(&self) -> Option<BungieName> {
        Some(BungieName {
            display_name: self.bungie_global_display_name.clone()?,
            display_name_code: self.bungie_global_display_name_code?,
        })
    }
}

/// The signed-in Bungie.net account (`User/GetCurrentBungieNetUser/`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BungieNetUser {
    pub membership_id: String,
    #[serde(default)]
    pub display_name: String,
    pub unique_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ComponentData<T> {
    data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    pub user_info: UserInfoCard,
    pub date_last_played: Option<DateTime<Utc>>,
    #[serde(default)]
    pub character_ids: Vec<String>,
}

/// `Destiny2/{type}/Profile/{id}/?components=100,200`
#[derive(Debug, Deserialize)]
pub struct ProfileResponse {
    profile: Option<ComponentData<ProfileData>>,
    characters: Option<ComponentData<HashMap<String, CharacterComponent>>>,
}

impl ProfileResponse {
    pub fn profile(&self) -> Option<&ProfileData> {
        self.profile.as_ref().and_then(|c| c.data.as_ref())
    }

    pub fn characters(&self) -> Vec<&CharacterComponent> {
        self.characters
            .as_ref()
            .and_then(|c| c.data.as_ref())
            .map(|map| map.values().collect())
            .unwrap_or_default()
    }

    /// The character the player used most recently.
    pub fn last_played_character(&self) -> Option<&CharacterComponent> {
        self.characters()
            .into_iter()
            .max_by_key(|c| c.date_last_played)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterComponent {
    pub character_id: String,
    pub membership_id: String,
    pub membership_type: i32,
    pub date_last_played: DateTime<Utc>,
    #[serde(default)]
    pub light: i32,
    #[serde(default)]
    pub class_type: i32,
    #[serde(default)]
    pub race_type: i32,
}

impl CharacterComponent {
    pub fn class_name(&self) -> &'static str {
        match self.class_type {
            0 => "Titan",
            1 => "Hunter",
            2 => "Warlock",
            _ => "Unknown",
        }
    }

    pub fn race_name(&self) -> &'static str {
        match self.race_type {
            0 => "Human",
            1 => "Awoken",
            2 => "Exo",
            _ => "Unknown",
        }
    }
}
