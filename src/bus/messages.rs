//! Message bodies exchanged between stages. Flat JSON, unversioned.

use serde::{Deserialize, Serialize};

/// Monitor state carried by the `self-requeue` queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequeueMessage {
    /// Song id seen on the previous poll, `null` when idle.
    #[serde(rename = "songID", default)]
    pub song_id: Option<String>,
}

impl RequeueMessage {
    pub fn idle() -> Self {
        Self { song_id: None }
    }

    pub fn tracking(song_id: impl Into<String>) -> Self {
        Self {
            song_id: Some(song_id.into()),
        }
    }
}

/// A song that has just been stamped as played.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringTrigger {
    #[serde(rename = "songID")]
    pub song_id: String,
}

/// Points owed to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub points: i64,
    /// Song the points were earned on, for logging.
    #[serde(rename = "songID", default, skip_serializing_if = "Option::is_none")]
    pub song_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_wire_format() {
        let json = serde_json::to_string(&RequeueMessage::tracking("123")).unwrap();
        assert_eq!(json, r#"{"songID":"123"}"#);

        let idle: RequeueMessage = serde_json::from_str(r#"{"songID":null}"#).unwrap();
        assert_eq!(idle, RequeueMessage::idle());
        let empty: RequeueMessage = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, RequeueMessage::idle());
    }

    #[test]
    fn test_score_entry_wire_format() {
        let entry: ScoreEntry = serde_json::from_str(r#"{"userID":"u1","points":101}"#).unwrap();
        assert_eq!(entry.user_id, "u1");
        assert_eq!(entry.points, 101);
        assert!(entry.song_id.is_none());

        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"userID":"u1","points":101}"#);
    }

    #[test]
    fn test_scoring_trigger_requires_song_id() {
        assert!(serde_json::from_str::<ScoringTrigger>("{}").is_err());
    }
}
