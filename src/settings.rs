use crate::model::{Coordinates, PhotoBackend};
use crate::store::{KvStore, Namespace, SightingCache};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const PREFS_KEY: &str = "preferences";

/// Daily window during which autoplay stays off. Hours are 0-23 and the
/// window may wrap midnight (e.g. 22..7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl QuietHours {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour == self.end_hour {
            return false;
        }
        if self.start_hour < self.end_hour {
            (self.start_hour..self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// User preferences, persisted in the synced namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_region")]
    pub region: Coordinates,
    #[serde(default = "default_true")]
    pub autoplay: bool,
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
    #[serde(default)]
    pub video_mode: bool,
    #[serde(default = "default_backend")]
    pub photo_backend: PhotoBackend,
    #[serde(default)]
    pub muted: bool,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

fn default_region() -> Coordinates {
    // Central Park, a reliable source of sightings for first runs.
    Coordinates {
        lat: 40.7812,
        lng: -73.9665,
    }
}

fn default_true() -> bool {
    true
}

fn default_backend() -> PhotoBackend {
    PhotoBackend::BirdLibrary
}

fn default_volume() -> f32 {
    0.8
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            region: default_region(),
            autoplay: true,
            quiet_hours: None,
            video_mode: false,
            photo_backend: default_backend(),
            muted: false,
            volume: default_volume(),
        }
    }
}

/// Read/write access to preferences. Changing the photo backend also
/// invalidates the sighting cache, since cached entries are keyed by it.
#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn KvStore>,
    cache: SightingCache,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let cache = SightingCache::new(store.clone());
        Self { store, cache }
    }

    pub async fn load(&self) -> Result<Preferences> {
        match self.store.get(Namespace::Synced, PREFS_KEY).await? {
            Some(value) => {
                serde_json::from_value(value).context("stored preferences are malformed")
            }
            None => Ok(Preferences::default()),
        }
    }

    pub async fn save(&self, prefs: &Preferences) -> Result<()> {
        let value = serde_json::to_value(prefs)?;
        self.store.put(Namespace::Synced, PREFS_KEY, value).await
    }

    pub async fn set_photo_backend(&self, backend: PhotoBackend) -> Result<()> {
        let mut prefs = self.load().await?;
        if prefs.photo_backend == backend {
            return Ok(());
        }
        prefs.photo_backend = backend;
        self.save(&prefs).await?;
        self.cache.invalidate().await?;
        info!(%backend, "photo backend changed, sighting cache invalidated");
        Ok(())
    }
}
