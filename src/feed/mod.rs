//! Now-playing feed.
//!
//! The station publishes what is on air plus the time it expects to update
//! next. Responses are validated into `NowPlaying` here; nothing past this
//! module sees the raw JSON.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::MonitorConfig;

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;

/// Errors that can occur while reading the feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Feed request failed: {0}")]
    Transport(String),

    #[error("Feed returned HTTP {0}")]
    Status(u16),

    #[error("Malformed feed response: {0}")]
    Malformed(String),
}

/// The track currently on air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiringTrack {
    /// Station-side id, informational only.
    pub id: Option<String>,
    pub title: String,
    pub artist: String,
    pub release: Option<String>,
    pub played: Option<DateTime<Utc>>,
}

/// One poll of the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    /// `None` when nothing is airing.
    pub track: Option<AiringTrack>,
    /// When the station expects to publish its next update.
    pub next_updated: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RawFeed {
    #[serde(default, alias = "now-playing")]
    now_playing: Option<RawTrack>,
    #[serde(default)]
    next_updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    release: Option<String>,
    #[serde(default)]
    played: Option<String>,
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate a feed response body.
///
/// A missing or unparseable `next_updated` becomes `now`, which the monitor
/// turns into its floor delay. A record without both title and artist counts
/// as nothing airing.
pub fn parse_feed(body: &str, now: DateTime<Utc>) -> Result<NowPlaying> {
    let raw: RawFeed =
        serde_json::from_str(body).map_err(|e| FeedError::Malformed(e.to_string()))?;

    let next_updated = raw
        .next_updated
        .as_deref()
        .and_then(parse_time)
        .unwrap_or(now);

    let track = raw.now_playing.and_then(|t| {
        let title = non_empty(t.title)?;
        let artist = non_empty(t.artist)?;
        let id = match t.id {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Some(AiringTrack {
            id,
            title,
            artist,
            release: non_empty(t.release),
            played: t.played.as_deref().and_then(parse_time),
        })
    });

    Ok(NowPlaying {
        track,
        next_updated,
    })
}

/// Source of now-playing information.
#[async_trait]
pub trait NowPlayingFeed: Send + Sync {
    async fn now_playing(&self, now: DateTime<Utc>) -> Result<NowPlaying>;
}

/// Feed read over HTTP GET.
pub struct HttpFeed {
    client: Client,
    url: String,
}

impl HttpFeed {
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: config.feed_url.clone(),
        })
    }
}

#[async_trait]
impl NowPlayingFeed for HttpFeed {
    #[tracing::instrument(name = "feed.now_playing", skip_all, fields(url = %self.url))]
    async fn now_playing(&self, now: DateTime<Utc>) -> Result<NowPlaying> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        let parsed = parse_feed(&body, now)?;

        debug!(
            airing = parsed.track.is_some(),
            next_updated = %parsed.next_updated,
            "Polled feed"
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn test_parse_airing_track() {
        let body = r#"{
            "now_playing": {
                "id": 991,
                "title": "Regret",
                "artist": "New Order",
                "release": "Republic",
                "played": "2024-05-01T11:58:00Z"
            },
            "next_updated": "2024-05-01T12:00:45Z"
        }"#;

        let parsed = parse_feed(body, now()).unwrap();
        let track = parsed.track.unwrap();
        assert_eq!(track.id.as_deref(), Some("991"));
        assert_eq!(track.title, "Regret");
        assert_eq!(track.artist, "New Order");
        assert_eq!(track.release.as_deref(), Some("Republic"));
        assert!(track.played.is_some());
        assert_eq!(parsed.next_updated, now() + chrono::Duration::seconds(45));
    }

    #[test]
    fn test_parse_accepts_hyphenated_alias() {
        let body = r#"{"now-playing":{"title":"Regret","artist":"New Order"},"next_updated":"2024-05-01T12:00:45Z"}"#;
        let parsed = parse_feed(body, now()).unwrap();
        assert_eq!(parsed.track.unwrap().title, "Regret");
    }

    #[test]
    fn test_parse_nothing_airing() {
        let body = r#"{"now_playing":null,"next_updated":"2024-05-01T12:00:45Z"}"#;
        assert!(parse_feed(body, now()).unwrap().track.is_none());
    }

    #[test]
    fn test_track_without_artist_is_nothing_airing() {
        let body = r#"{"now_playing":{"title":"Station ID","artist":"  "}}"#;
        assert!(parse_feed(body, now()).unwrap().track.is_none());
    }

    #[test]
    fn test_missing_next_updated_defaults_to_now() {
        let parsed = parse_feed(r#"{"now_playing":null}"#, now()).unwrap();
        assert_eq!(parsed.next_updated, now());

        let parsed = parse_feed(r#"{"next_updated":"soon"}"#, now()).unwrap();
        assert_eq!(parsed.next_updated, now());
    }

    #[test]
    fn test_malformed_body() {
        assert!(matches!(
            parse_feed("<html>", now()),
            Err(FeedError::Malformed(_))
        ));
    }
}
