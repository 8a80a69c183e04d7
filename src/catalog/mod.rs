//! Music catalog search.
//!
//! Resolves a title/artist pair to a stable catalog track. Only the top
//! search result is used.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::CatalogConfig;

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors that can occur during catalog search.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Catalog request failed: {0}")]
    Transport(String),

    #[error("Catalog returned HTTP {0}")]
    Status(u16),

    #[error("Malformed catalog response: {0}")]
    Malformed(String),
}

/// A resolved catalog track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTrack {
    pub id: String,
    pub title: String,
    /// Artist names joined with ", ".
    pub artist: String,
    pub album: String,
    pub artwork_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Option<SearchTracks>,
}

#[derive(Debug, Deserialize)]
struct SearchTracks {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: String,
    name: String,
    #[serde(default)]
    artists: Vec<Named>,
    album: Option<SearchAlbum>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SearchAlbum {
    #[serde(default)]
    name: String,
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
}

/// Field-qualified search text for a title/artist pair.
pub fn search_query(title: &str, artist: &str) -> String {
    format!("track:{} artist:{}", title.trim(), artist.trim())
}

/// Validate a search response body and take its top item.
pub fn parse_search(body: &str) -> Result<Option<CatalogTrack>> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| CatalogError::Malformed(e.to_string()))?;

    let Some(item) = response
        .tracks
        .and_then(|tracks| tracks.items.into_iter().next())
    else {
        return Ok(None);
    };

    if item.id.is_empty() {
        return Err(CatalogError::Malformed("top item has an empty id".to_string()));
    }

    let artist = item
        .artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let (album, artwork_url) = match item.album {
        Some(album) => (album.name, album.images.into_iter().next().map(|i| i.url)),
        None => (String::new(), None),
    };

    Ok(Some(CatalogTrack {
        id: item.id,
        title: item.name,
        artist,
        album,
        artwork_url,
    }))
}

/// Track lookup by title and artist.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Top match, or `None` when the catalog has no result.
    async fn search(&self, title: &str, artist: &str) -> Result<Option<CatalogTrack>>;
}

/// Catalog searched over HTTP.
pub struct HttpCatalog {
    client: Client,
    config: CatalogConfig,
}

impl HttpCatalog {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CatalogError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    #[tracing::instrument(name = "catalog.search", skip_all, fields(title = %title, artist = %artist))]
    async fn search(&self, title: &str, artist: &str) -> Result<Option<CatalogTrack>> {
        let q = search_query(title, artist);
        let mut params = vec![("q", q.as_str()), ("type", "track"), ("limit", "1")];
        if let Some(ref market) = self.config.market {
            params.push(("market", market.as_str()));
        }

        let mut request = self.client.get(&self.config.search_url).query(&params);
        if let Some(ref token) = self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;
        let track = parse_search(&body)?;

        debug!(resolved = ?track.as_ref().map(|t| &t.id), "Catalog search finished");
        Ok(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_query() {
        assert_eq!(
            search_query(" Regret ", "New Order"),
            "track:Regret artist:New Order"
        );
    }

    #[test]
    fn test_parse_top_item() {
        let body = r#"{"tracks":{"items":[
            {"id":"123","name":"Regret","artists":[{"name":"New Order"},{"name":"Guest"}],
             "album":{"name":"Republic","images":[{"url":"https://img/large"},{"url":"https://img/small"}]}},
            {"id":"456","name":"Regret (Live)","artists":[{"name":"New Order"}]}
        ]}}"#;

        let track = parse_search(body).unwrap().unwrap();
        assert_eq!(track.id, "123");
        assert_eq!(track.title, "Regret");
        assert_eq!(track.artist, "New Order, Guest");
        assert_eq!(track.album, "Republic");
        assert_eq!(track.artwork_url.as_deref(), Some("https://img/large"));
    }

    #[test]
    fn test_parse_no_results() {
        assert!(parse_search(r#"{"tracks":{"items":[]}}"#).unwrap().is_none());
        assert!(parse_search("{}").unwrap().is_none());
    }

    #[test]
    fn test_parse_item_without_album() {
        let body = r#"{"tracks":{"items":[{"id":"7","name":"Intro","artists":[]}]}}"#;
        let track = parse_search(body).unwrap().unwrap();
        assert_eq!(track.album, "");
        assert!(track.artwork_url.is_none());
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_search(r#"{"tracks":{"items":[{"name":"no id"}]}}"#),
            Err(CatalogError::Malformed(_))
        ));
    }
}
