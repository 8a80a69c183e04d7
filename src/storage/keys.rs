//! Key composition for the single table.
//!
//! | Entity      | pk              | sk              | index (gsi_pk / gsi_sk) |
//! |-------------|-----------------|-----------------|-------------------------|
//! | User        | `USER#<id>`     | `#PROFILE`      | inverted                |
//! | Group       | `GROUP#<id>`    | `#PROFILE`      | inverted                |
//! | GroupCode   | `GROUP#<id>`    | `#CODE`         | `CODE#<code>` / `GROUP#<id>` |
//! | Membership  | `GROUP#<id>`    | `USER#<id>`     | inverted                |
//! | Song        | `SONG#<id>`     | `#PROFILE`      | inverted                |
//! | Vote        | `USER#<id>`     | `SONG#<id>`     | inverted                |
//! | PlayCounter | `PLAYCOUNT`     | `CURRENT`       | none                    |

use super::Key;

pub const PROFILE: &str = "#PROFILE";
pub const CODE: &str = "#CODE";

pub const USER_PREFIX: &str = "USER#";
pub const GROUP_PREFIX: &str = "GROUP#";
pub const SONG_PREFIX: &str = "SONG#";
pub const CODE_PREFIX: &str = "CODE#";

pub const PLAY_COUNT_PK: &str = "PLAYCOUNT";
pub const PLAY_COUNT_SK: &str = "CURRENT";

pub fn user(id: &str) -> String {
    format!("{USER_PREFIX}{id}")
}

pub fn group(id: &str) -> String {
    format!("{GROUP_PREFIX}{id}")
}

pub fn song(id: &str) -> String {
    format!("{SONG_PREFIX}{id}")
}

pub fn code(code: &str) -> String {
    format!("{CODE_PREFIX}{code}")
}

/// Strip an entity prefix, returning the bare id.
pub fn strip<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    value.strip_prefix(prefix).filter(|id| !id.is_empty())
}

impl Key {
    pub fn user_profile(user_id: &str) -> Self {
        Key::new(user(user_id), PROFILE)
    }

    pub fn group_profile(group_id: &str) -> Self {
        Key::new(group(group_id), PROFILE)
    }

    pub fn group_code(group_id: &str) -> Self {
        Key::new(group(group_id), CODE)
    }

    /// Reservation row that makes a join code unique.
    pub fn code_reservation(code_value: &str) -> Self {
        Key::new(code(code_value), CODE)
    }

    pub fn membership(group_id: &str, user_id: &str) -> Self {
        Key::new(group(group_id), user(user_id))
    }

    pub fn song_profile(song_id: &str) -> Self {
        Key::new(song(song_id), PROFILE)
    }

    pub fn vote(user_id: &str, song_id: &str) -> Self {
        Key::new(user(user_id), song(song_id))
    }

    pub fn play_counter() -> Self {
        Key::new(PLAY_COUNT_PK, PLAY_COUNT_SK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_key_inverts_to_voter_lookup() {
        let key = Key::vote("u1", "123");
        assert_eq!(key.pk, "USER#u1");
        assert_eq!(key.sk, "SONG#123");

        let index = key.inverted();
        assert_eq!(index.pk, "SONG#123");
        assert_eq!(index.sk, "USER#u1");
    }

    #[test]
    fn test_membership_inverts_to_groups_for_user() {
        let index = Key::membership("g1", "u1").inverted();
        assert_eq!(index.pk, "USER#u1");
        assert_eq!(index.sk, "GROUP#g1");
    }

    #[test]
    fn test_strip() {
        assert_eq!(strip("USER#u1", USER_PREFIX), Some("u1"));
        assert_eq!(strip("USER#", USER_PREFIX), None);
        assert_eq!(strip("SONG#9", USER_PREFIX), None);
    }
}
