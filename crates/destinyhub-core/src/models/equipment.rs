//! Character equipment and item definition models.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Equipment slot a character item sits in, keyed by inventory bucket hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentSlot {
    Kinetic,
    Energy,
    Power,
    Helmet,
    Gauntlets,
    Chest,
    Legs,
    ClassItem,
    Ghost,
}

impl EquipmentSlot {
    pub const ALL: [EquipmentSlot; 9] = [
        EquipmentSlot::Kinetic,
        EquipmentSlot::Energy,
        EquipmentSlot::Power,
        EquipmentSlot::Helmet,
        EquipmentSlot::Gauntlets,
        EquipmentSlot::Chest,
        EquipmentSlot::Legs,
        EquipmentSlot::ClassItem,
        EquipmentSlot::Ghost,
    ];

    pub fn from_bucket_hash(hash: u32) -> Option<Self> {
        match hash {
            1498876634 => Some(EquipmentSlot::Kinetic),
            2465295065 => Some(EquipmentSlot::Energy),
            953998645 => Some(EquipmentSlot::Power),
            3448274439 => Some(EquipmentSlot::Helmet),
            3551918588 => Some(EquipmentSlot::Gauntlets),
            14239492 => Some(EquipmentSlot::Chest),
            20886954 => Some(EquipmentSlot::Legs),
            1585787867 => Some(EquipmentSlot::ClassItem),
            4023194814 => Some(EquipmentSlot::Ghost),
            _ => None,
        }
    }

    pub fn is_weapon(self) -> bool {
        matches!(
            self,
            EquipmentSlot::Kinetic | EquipmentSlot::Energy | EquipmentSlot::Power
        )
    }

    pub fn is_armor(self) -> bool {
        matches!(
            self,
            EquipmentSlot::Helmet
                | EquipmentSlot::Gauntlets
                | EquipmentSlot::Chest
                | EquipmentSlot::Legs
                | EquipmentSlot::ClassItem
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            EquipmentSlot::Kinetic => "Kinetic",
            EquipmentSlot::Energy => "Energy",
            EquipmentSlot::Power => "Power",
            EquipmentSlot::Helmet => "Helmet",
            EquipmentSlot::Gauntlets => "Gauntlets",
            EquipmentSlot::Chest => "Chest",
            EquipmentSlot::Legs => "Legs",
            EquipmentSlot::ClassItem => "Class Item",
            EquipmentSlot::Ghost => "Ghost",
        }
    }
}

impl fmt::Display for EquipmentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Deserialize)]
struct ComponentData<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct EquipmentData {
    #[serde(default)]
    items: Vec<ItemComponent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemComponent {
    item_hash: u32,
    item_instance_id: Option<String>,
    bucket_hash: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ItemComponents {
    instances: Option<ComponentData<HashMap<String, ItemInstance>>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemInstance {
    primary_stat: Option<PrimaryStat>,
}

#[derive(Debug, Clone, Deserialize)]
struct PrimaryStat {
    value: i32,
}

/// `Destiny2/{type}/Profile/{id}/Character/{cid}/?components=205,300`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterResponse {
    equipment: Option<ComponentData<EquipmentData>>,
    #[serde(default)]
    item_components: ItemComponents,
}

/// An item worn by a character, joined with its instance data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquippedItem {
    pub item_hash: u32,
    pub instance_id: Option<String>,
    pub bucket_hash: u32,
    pub slot: Option<EquipmentSlot>,
    /// Power level from the instance's primary stat, when instanced.
    pub power: Option<i32>,
}

impl CharacterResponse {
    /// Equipped items with instance power attached, in slot order. Items in
    /// buckets outside the known slots (emblems, ships, ...) sort last.
    pub fn equipped_items(&self) -> Vec<EquippedItem> {
        let instances = self
            .item_components
            .instances
            .as_ref()
            .and_then(|c| c.data.as_ref());

        let mut items: Vec<EquippedItem> = self
            .equipment
            .as_ref()
            .and_then(|c| c.data.as_ref())
            .map(|data| data.items.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|item| {
                let power = item
                    .item_instance_id
                    .as_ref()
                    .and_then(|id| instances?.get(id))
                    .and_then(|instance| instance.primary_stat.as_ref())
                    .map(|stat| stat.value);
                EquippedItem {
                    item_hash: item.item_hash,
                    instance_id: item.item_instance_id.clone(),
                    bucket_hash: item.bucket_hash,
                    slot: EquipmentSlot::from_bucket_hash(item.bucket_hash),
                    power,
                }
            })
            .collect();

        items.sort_by_key(|item| (item.slot.is_none(), item.slot));
        items
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayProperties {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub icon: Option<String>,
}

/// Manifest entry from `DestinyInventoryItemDefinition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDefinition {
    pub hash: u32,
    #[serde(default)]
    pub display_properties: DisplayProperties,
    #[serde(default)]
    pub item_type_display_name: String,
}

impl ItemDefinition {
    pub fn name(&self) -> &str {
        &self.display_properties.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHARACTER_JSON: &str = r#"{
        "equipment": {"data": {"items": [
            {"itemHash": 300, "itemInstanceId": "9003", "bucketHash": 3448274439},
            {"itemHash": 100, "itemInstanceId": "9001", "bucketHash": 1498876634},
            {"itemHash": 500, "bucketHash": 4274335291},
            {"itemHash": 200, "itemInstanceId": "9002", "bucketHash": 2465295065}
        ]}},
        "itemComponents": {"instances": {"data": {
            "9001": {"primaryStat": {"statHash": 1480404414, "value": 1810}},
            "9003": {"primaryStat": {"statHash": 3897883278, "value": 1805}}
        }}}
    }"#;

    #[test]
    fn test_bucket_hash_classification() {
        assert_eq!(EquipmentSlot::from_bucket_hash(953998645), Some(EquipmentSlot::Power));
        assert_eq!(EquipmentSlot::from_bucket_hash(4023194814), Some(EquipmentSlot::Ghost));
        assert_eq!(EquipmentSlot::from_bucket_hash(42), None);

        let weapons = EquipmentSlot::ALL.iter().filter(|s| s.is_weapon()).count();
        let armor = EquipmentSlot::ALL.iter().filter(|s| s.is_armor()).count();
        assert_eq!(weapons, 3);
        assert_eq!(armor, 5);
        assert!(!EquipmentSlot::Ghost.is_weapon() && !EquipmentSlot::Ghost.is_armor());
    }

    #[test]
    fn test_equipped_items_join_instances() {
        let response: CharacterResponse = serde_json::from_str(CHARACTER_JSON).unwrap();
        let items = response.equipped_items();

        let hashes: Vec<u32> = items.iter().map(|i| i.item_hash).collect();
        assert_eq!(hashes, vec![100, 200, 300, 500]);

        assert_eq!(items[0].slot, Some(EquipmentSlot::Kinetic));
        assert_eq!(items[0].power, Some(1810));
        // Instance missing from the instances component.
        assert_eq!(items[1].power, None);
        assert_eq!(items[2].power, Some(1805));
        // Emblem bucket: not an equipment slot, no instance.
        assert_eq!(items[3].slot, None);
        assert_eq!(items[3].power, None);
    }

    #[test]
    fn test_equipped_items_missing_components() {
        let response: CharacterResponse = serde_json::from_str("{}").unwrap();
        assert!(response.equipped_items().is_empty());
    }

    #[test]
    fn test_parse_item_definition() {
        let json = r#"{"hash": 1363886209, "itemTypeDisplayName": "Auto Rifle",
            "displayProperties": {"name": "Gjallarhorn", "description": "", "icon": "/img/x.jpg", "hasIcon": true},
            "inventory": {"tierTypeName": "Exotic"}}"#;
        let def: ItemDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.name(), "Gjallarhorn");
        assert_eq!(def.item_type_display_name, "Auto Rifle");
        assert_eq!(def.display_properties.icon.as_deref(), Some("/img/x.jpg"));
    }
}
