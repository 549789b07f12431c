use crate::error::ResolveError;
use crate::model::{MediaAsset, MediaKind, SpeciesKey};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Resolves one best-ranked media asset for a species. Pure lookups:
/// resolvers never touch the cache, only the orchestrator writes it.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    fn kind(&self) -> MediaKind;
    async fn resolve(&self, key: &SpeciesKey) -> Result<MediaAsset, ResolveError>;
}

/// General image search backend (Unsplash-style), keyed by common name.
#[derive(Debug, Clone)]
pub struct ImageSearchResolver {
    client: Client,
    access_key: String,
    base_url: String,
}

const IMAGE_SEARCH_BASE_URL: &str = "https://api.unsplash.com";

impl ImageSearchResolver {
    pub fn new(access_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build image search HTTP client")?;
        Ok(Self {
            client,
            access_key,
            base_url: IMAGE_SEARCH_BASE_URL.to_string(),
        })
    }
}

#[async_trait]
impl MediaResolver for ImageSearchResolver {
    fn kind(&self) -> MediaKind {
        MediaKind::Photo
    }

    async fn resolve(&self, key: &SpeciesKey) -> Result<MediaAsset, ResolveError> {
        let url = format!("{}/search/photos", self.base_url);
        let query = format!("{} bird", key.common_name);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Client-ID {}", self.access_key))
            .query(&[("query", query.as_str()), ("per_page", "1")])
            .send()
            .await
            .context("failed to call image search")?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(anyhow!("image search error {status}").into());
        }

        let json: Value = response
            .json()
            .await
            .context("failed to decode image search JSON")?;

        first_search_photo(&json).ok_or_else(|| ResolveError::NotFound {
            kind: MediaKind::Photo,
            query,
        })
    }
}

fn first_search_photo(root: &Value) -> Option<MediaAsset> {
    let result = root.get("results")?.as_array()?.first()?;
    let url = result.pointer("/urls/regular").and_then(Value::as_str)?;
    let contributor = result.pointer("/user/name").and_then(Value::as_str)?;
    let contributor_url = result
        .pointer("/user/links/html")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(MediaAsset {
        url: url.to_string(),
        contributor: contributor.to_string(),
        contributor_url: contributor_url.to_string(),
    })
}

/// Bird-media library backend (Macaulay-style): photo, audio and video by
/// species code, ranked by the library's own rating.
#[derive(Debug, Clone)]
pub struct LibraryResolver {
    client: Client,
    base_url: String,
    kind: MediaKind,
}

const LIBRARY_BASE_URL: &str = "https://search.macaulaylibrary.org";

impl LibraryResolver {
    pub fn new(kind: MediaKind, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build media library HTTP client")?;
        Ok(Self {
            client,
            base_url: LIBRARY_BASE_URL.to_string(),
            kind,
        })
    }

    fn media_type(&self) -> &'static str {
        match self.kind {
            MediaKind::Photo => "photo",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

#[async_trait]
impl MediaResolver for LibraryResolver {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn resolve(&self, key: &SpeciesKey) -> Result<MediaAsset, ResolveError> {
        let url = format!("{}/api/v2/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("taxonCode", key.species_code.as_str()),
                ("mediaType", self.media_type()),
                ("sort", "rating_rank_desc"),
                ("count", "1"),
            ])
            .send()
            .await
            .context("failed to call media library")?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(anyhow!("media library error {status}").into());
        }

        let json: Value = response
            .json()
            .await
            .context("failed to decode media library JSON")?;

        first_library_asset(&json).ok_or_else(|| ResolveError::NotFound {
            kind: self.kind,
            query: key.species_code.clone(),
        })
    }
}

fn first_library_asset(root: &Value) -> Option<MediaAsset> {
    let item = root.pointer("/results/content")?.as_array()?.first()?;
    let url = item
        .get("mediaUrl")
        .or_else(|| item.get("previewUrl"))
        .and_then(Value::as_str)?;
    let contributor = item
        .get("userDisplayName")
        .and_then(Value::as_str)
        .unwrap_or("Unknown contributor");
    let contributor_url = item
        .get("userProfileUrl")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(MediaAsset {
        url: url.to_string(),
        contributor: contributor.to_string(),
        contributor_url: contributor_url.to_string(),
    })
}
