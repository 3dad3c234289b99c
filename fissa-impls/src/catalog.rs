//! Read access to the music provider's catalog, used to pick tracks before they are queued.

use fissa_core::{encode_query_value, CatalogConfig};
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// The access token was rejected, it has to be refreshed by the caller
    #[error("Access token was rejected")]
    Unauthorized,

    #[error("Resource was not found")]
    NotFound,

    #[error("Request failed with status {0}")]
    Http(u16),

    #[error("Failed to fetch resource: {0}")]
    FetchError(String),

    #[error("Failed to parse resource: {0}")]
    ParseError(String),
}

/// A track as listed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTrack {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub image: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    /// Null for tracks that were removed from the provider
    track: Option<ProviderTrack>,
}

#[derive(Debug, Deserialize)]
struct SavedItem {
    track: ProviderTrack,
}

#[derive(Debug, Deserialize)]
struct ProviderTrack {
    /// Null for local files
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<Artist>,
    album: Option<Album>,
    #[serde(default)]
    duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Album {
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
    width: Option<u32>,
}

/// Lists tracks from the provider's web api on behalf of the user
pub struct Catalog {
    client: Client,
    config: CatalogConfig,
    access_token: String,
}

impl Catalog {
    pub fn new(config: &CatalogConfig, access_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            config: config.clone(),
            access_token: access_token.into(),
        }
    }

    /// Lists every playable track in a playlist
    pub async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<CatalogTrack>, CatalogError> {
        let url = format!(
            "{}/playlists/{}/tracks?limit={}",
            self.base_url(),
            encode_query_value(playlist_id),
            self.config.page_size
        );

        let items: Vec<PlaylistItem> = self.paginate(url).await?;

        Ok(items
            .into_iter()
            .filter_map(|i| i.track)
            .filter_map(ProviderTrack::into_catalog_track)
            .collect())
    }

    /// Lists the tracks the user saved to their library
    pub async fn saved_tracks(&self) -> Result<Vec<CatalogTrack>, CatalogError> {
        let url = format!("{}/me/tracks?limit={}", self.base_url(), self.config.page_size);

        let items: Vec<SavedItem> = self.paginate(url).await?;

        Ok(items
            .into_iter()
            .filter_map(|i| i.track.into_catalog_track())
            .collect())
    }

    /// Follows `next` links until the listing ends or the page cap is hit
    async fn paginate<T: DeserializeOwned>(&self, first: String) -> Result<Vec<T>, CatalogError> {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages >= self.config.max_pages {
                warn!(
                    "Stopped listing after {} pages, the provider kept returning more",
                    pages
                );
                break;
            }

            let page: Page<T> = self.fetch(&url).await?;
            pages += 1;

            items.extend(page.items);
            next = page.next;
        }

        debug!("Listed {} items over {} pages", items.len(), pages);
        Ok(items)
    }

    async fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<T, CatalogError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| CatalogError::FetchError(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| CatalogError::ParseError(e.to_string())),
            StatusCode::UNAUTHORIZED => Err(CatalogError::Unauthorized),
            StatusCode::NOT_FOUND => Err(CatalogError::NotFound),
            status => Err(CatalogError::Http(status.as_u16())),
        }
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }
}

impl ProviderTrack {
    fn into_catalog_track(self) -> Option<CatalogTrack> {
        let image = self.album.and_then(|a| {
            // Prefer the biggest image
            a.images
                .into_iter()
                .max_by_key(|i| i.width.unwrap_or_default())
                .map(|i| i.url)
        });

        Some(CatalogTrack {
            id: self.id?,
            name: self.name,
            artists: self.artists.into_iter().map(|a| a.name).collect(),
            image,
            duration_ms: self.duration_ms,
        })
    }
}
