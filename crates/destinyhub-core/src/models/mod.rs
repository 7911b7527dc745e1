//! Data models for Bungie.net platform responses.
//!
//! - `BungieResponse`: the envelope every platform endpoint wraps its payload in
//! - `BungieName`, `UserInfoCard`, `ProfileResponse`: player lookup
//! - `CharacterResponse`, `EquippedItem`, `ItemDefinition`: gear

pub mod envelope;
pub mod equipment;
pub mod player;

pub use envelope::{BungieResponse, PLATFORM_SUCCESS};
pub use equipment::{
    CharacterResponse, DisplayProperties, EquipmentSlot, EquippedItem, ItemDefinition,
};
pub use player::{
    BungieName, BungieNameError, BungieNetUser, CharacterComponent, ProfileData, ProfileResponse,
    UserInfoCard,
};
