//! Typed entities stored in the single table.
//!
//! Each entity knows its primary key and index key and converts to and from
//! a storage `Item`. Attributes are stored under camelCase names; absent
//! optional fields are omitted so `attribute_not_exists` conditions see them
//! as missing.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::{keys, Item, Key, StorageError};

/// Attribute names referenced by conditions and updates.
pub mod attr {
    pub const POINTS: &str = "points";
    pub const PLAYED_AT: &str = "playedAt";
    pub const PLAYED_POSITION: &str = "playedPosition";
    pub const VALUE: &str = "value";
    pub const OWNER_ID: &str = "ownerId";
    pub const RANK: &str = "rank";
    pub const CODE: &str = "code";
    pub const GROUP_ID: &str = "groupId";
    pub const CAST_AT: &str = "castAt";
}

/// A value persisted as one item.
pub trait Entity: Serialize + DeserializeOwned {
    /// Primary key of this entity.
    fn key(&self) -> Key;

    /// Index key. Defaults to the inverted primary key.
    fn index_key(&self) -> Option<Key> {
        Some(self.key().inverted())
    }

    fn to_item(&self) -> Result<Item, StorageError> {
        let attributes = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(StorageError::Malformed(format!(
                    "entity serialized to non-object: {}",
                    other
                )))
            }
            Err(e) => return Err(StorageError::Malformed(e.to_string())),
        };
        Ok(Item {
            key: self.key(),
            index_key: self.index_key(),
            attributes,
        })
    }

    fn from_item(item: &Item) -> Result<Self, StorageError> {
        serde_json::from_value(Value::Object(item.attributes.clone())).map_err(|e| {
            StorageError::Malformed(format!("{}/{}: {}", item.key.pk, item.key.sk, e))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub points: i64,
}

impl Entity for User {
    fn key(&self) -> Key {
        Key::user_profile(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Entity for Group {
    fn key(&self) -> Key {
        Key::group_profile(&self.id)
    }
}

/// Join code for a group, indexed under `CODE#<code>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCode {
    pub group_id: String,
    pub code: String,
}

impl Entity for GroupCode {
    fn key(&self) -> Key {
        Key::group_code(&self.group_id)
    }

    fn index_key(&self) -> Option<Key> {
        Some(Key::new(keys::code(&self.code), keys::group(&self.group_id)))
    }
}

impl GroupCode {
    /// Unindexed `CODE#<code>` / `#CODE` row claiming the code for this group.
    pub fn reservation(&self) -> Result<Item, StorageError> {
        let mut item = self.to_item()?;
        item.key = Key::code_reservation(&self.code);
        item.index_key = None;
        Ok(item)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub group_id: String,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
}

impl Entity for Membership {
    fn key(&self) -> Key {
        Key::membership(&self.group_id, &self.user_id)
    }
}

/// A track, keyed by its catalog id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub played_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub played_position: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Song {
    pub fn is_played(&self) -> bool {
        self.played_position.is_some()
    }
}

impl Entity for Song {
    fn key(&self) -> Key {
        Key::song_profile(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub user_id: String,
    pub song_id: String,
    pub rank: u8,
    pub cast_at: DateTime<Utc>,
}

impl Entity for Vote {
    fn key(&self) -> Key {
        Key::vote(&self.user_id, &self.song_id)
    }
}

/// The global play position counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayCounter {
    #[serde(default)]
    pub value: i64,
}

impl Entity for PlayCounter {
    fn key(&self) -> Key {
        Key::play_counter()
    }

    fn index_key(&self) -> Option<Key> {
        None
    }
}

/// Parse the user id out of a vote item found through the index.
pub fn voter_id(item: &Item) -> Option<&str> {
    keys::strip(&item.key.pk, keys::USER_PREFIX)
}
