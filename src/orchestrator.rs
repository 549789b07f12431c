use crate::error::{FetchError, ResolveError};
use crate::model::{
    BirdRecord, CacheEntry, Coordinates, MediaAsset, PhotoBackend, SpeciesKey,
};
use crate::resolvers::MediaResolver;
use crate::sightings::SightingProvider;
use crate::store::{SightingCache, ViewHistory};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Composes the sighting provider, media resolvers and cache into one
/// idempotent "get current bird" operation. Runs in the background context;
/// the only writer of the sighting cache and view history.
pub struct FetchOrchestrator {
    sightings: Arc<dyn SightingProvider>,
    image_search: Arc<dyn MediaResolver>,
    library_photo: Arc<dyn MediaResolver>,
    audio: Arc<dyn MediaResolver>,
    video: Arc<dyn MediaResolver>,
    cache: SightingCache,
    history: ViewHistory,
}

impl FetchOrchestrator {
    pub fn new(
        sightings: Arc<dyn SightingProvider>,
        image_search: Arc<dyn MediaResolver>,
        library_photo: Arc<dyn MediaResolver>,
        audio: Arc<dyn MediaResolver>,
        video: Arc<dyn MediaResolver>,
        cache: SightingCache,
        history: ViewHistory,
    ) -> Self {
        Self {
            sightings,
            image_search,
            library_photo,
            audio,
            video,
            cache,
            history,
        }
    }

    fn photo_resolver(&self, backend: PhotoBackend) -> &dyn MediaResolver {
        match backend {
            PhotoBackend::ImageSearch => self.image_search.as_ref(),
            PhotoBackend::BirdLibrary => self.library_photo.as_ref(),
        }
    }

    /// Cache-first fetch: at most one provider call per calendar day per
    /// backend choice. The photo is mandatory; audio and video degrade to
    /// absence.
    pub async fn get_current_bird(
        &self,
        coords: Coordinates,
        backend: PhotoBackend,
        video_mode: bool,
    ) -> Result<BirdRecord, FetchError> {
        let now = Utc::now();
        let today = now.date_naive();

        match self.cache.get().await {
            Ok(Some(entry)) if entry.is_valid(today, backend) => {
                debug!(species = %entry.record.species_code, "sighting cache hit");
                return Ok(entry.record);
            }
            Ok(_) => {}
            Err(err) => warn!("sighting cache unreadable, treating as miss: {err:#}"),
        }

        let sighting = self
            .sightings
            .recent_sighting(coords)
            .await
            .map_err(FetchError::Provider)?
            .ok_or(FetchError::NoSighting { coords })?;

        let key = SpeciesKey {
            species_code: sighting.species_code.clone(),
            common_name: sighting.common_name.clone(),
        };

        let (photo, audio) = tokio::join!(
            self.photo_resolver(backend).resolve(&key),
            self.audio.resolve(&key),
        );

        let image = photo.map_err(|err| {
            warn!(species = %key.species_code, "photo resolution failed: {err}");
            FetchError::MediaUnavailable {
                species: sighting.common_name.clone(),
            }
        })?;

        let audio = match audio {
            Ok(asset) => Some(asset),
            Err(err) => {
                warn!(species = %key.species_code, "audio unavailable, continuing without: {err}");
                None
            }
        };

        let video = if video_mode {
            match self.video.resolve(&key).await {
                Ok(asset) => Some(asset),
                Err(err) => {
                    warn!(species = %key.species_code, "video unavailable, continuing without: {err}");
                    None
                }
            }
        } else {
            None
        };

        let reference_url = sighting.reference_url();
        let record = BirdRecord {
            common_name: sighting.common_name,
            scientific_name: sighting.scientific_name,
            location: sighting.location,
            reference_url,
            species_code: sighting.species_code,
            image,
            audio,
            video,
            photo_backend: backend,
            video_mode,
            fetched_at: now,
        };

        self.cache
            .put(&CacheEntry::new(record.clone(), today))
            .await
            .map_err(FetchError::Provider)?;
        self.history
            .append(&record, now)
            .await
            .map_err(FetchError::Provider)?;

        info!(species = %record.species_code, %backend, "resolved bird of the day");
        Ok(record)
    }

    /// On-demand video resolution for a mode switch. On success the cached
    /// record gains the asset too (add-only, species-checked).
    pub async fn resolve_video(&self, key: &SpeciesKey) -> Result<MediaAsset, ResolveError> {
        let asset = self.video.resolve(key).await?;
        self.attach_to_cache(key, |record| record.attach_video(asset.clone()))
            .await;
        Ok(asset)
    }

    /// On-demand audio resolution, same contract as `resolve_video`.
    pub async fn resolve_audio(&self, key: &SpeciesKey) -> Result<MediaAsset, ResolveError> {
        let asset = self.audio.resolve(key).await?;
        self.attach_to_cache(key, |record| record.attach_audio(asset.clone()))
            .await;
        Ok(asset)
    }

    async fn attach_to_cache<F>(&self, key: &SpeciesKey, attach: F)
    where
        F: FnOnce(&mut BirdRecord) -> bool,
    {
        let entry = match self.cache.get().await {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(err) => {
                warn!("cache unreadable while attaching media: {err:#}");
                return;
            }
        };
        if entry.record.species_code != key.species_code {
            return;
        }
        let mut entry = entry;
        if attach(&mut entry.record) {
            if let Err(err) = self.cache.put(&entry).await {
                warn!("failed to write resolved media back to cache: {err:#}");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::error::ResolveError;
    use crate::model::{Coordinates, MediaAsset, MediaKind, SpeciesKey};
    use crate::resolvers::MediaResolver;
    use crate::sightings::{Sighting, SightingProvider};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    pub fn sighting(name: &str, code: &str) -> Sighting {
        Sighting {
            common_name: name.to_string(),
            scientific_name: format!("{name}us"),
            species_code: code.to_string(),
            location: "The Ramble".to_string(),
        }
    }

    pub fn asset(url: &str) -> MediaAsset {
        MediaAsset {
            url: url.to_string(),
            contributor: "Contributor".to_string(),
            contributor_url: "https://example.org/contributor".to_string(),
        }
    }

    pub struct FixedSightings {
        pub sighting: Option<Sighting>,
        pub calls: AtomicU32,
    }

    impl FixedSightings {
        pub fn some(sighting: Sighting) -> Self {
            Self {
                sighting: Some(sighting),
                calls: AtomicU32::new(0),
            }
        }

        pub fn none() -> Self {
            Self {
                sighting: None,
                calls: AtomicU32::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SightingProvider for FixedSightings {
        async fn recent_sighting(&self, _coords: Coordinates) -> Result<Option<Sighting>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.sighting.clone())
        }
    }

    pub struct FixedResolver {
        pub kind: MediaKind,
        pub asset: Option<MediaAsset>,
        pub calls: AtomicU32,
    }

    impl FixedResolver {
        pub fn found(kind: MediaKind, asset: MediaAsset) -> Self {
            Self {
                kind,
                asset: Some(asset),
                calls: AtomicU32::new(0),
            }
        }

        pub fn missing(kind: MediaKind) -> Self {
            Self {
                kind,
                asset: None,
                calls: AtomicU32::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MediaResolver for FixedResolver {
        fn kind(&self) -> MediaKind {
            self.kind
        }

        async fn resolve(&self, key: &SpeciesKey) -> Result<MediaAsset, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.asset.clone().ok_or_else(|| ResolveError::NotFound {
                kind: self.kind,
                query: key.species_code.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FetchOrchestrator;
    use super::test_support::{FixedResolver, FixedSightings, asset, sighting};
    use crate::error::FetchError;
    use crate::model::{Coordinates, MediaKind, PhotoBackend};
    use crate::store::{MemoryKvStore, SightingCache, ViewHistory};
    use std::sync::Arc;

    const COORDS: Coordinates = Coordinates {
        lat: 40.7812,
        lng: -73.9665,
    };

    struct Fixture {
        sightings: Arc<FixedSightings>,
        image_search: Arc<FixedResolver>,
        library_photo: Arc<FixedResolver>,
        audio: Arc<FixedResolver>,
        video: Arc<FixedResolver>,
        cache: SightingCache,
        history: ViewHistory,
        orchestrator: FetchOrchestrator,
    }

    fn fixture(
        sightings: FixedSightings,
        library_photo: FixedResolver,
        audio: FixedResolver,
        video: FixedResolver,
    ) -> Fixture {
        let store = Arc::new(MemoryKvStore::new());
        let cache = SightingCache::new(store.clone());
        let history = ViewHistory::new(store);
        let sightings = Arc::new(sightings);
        let image_search = Arc::new(FixedResolver::found(
            MediaKind::Photo,
            asset("https://images.example/search.jpg"),
        ));
        let library_photo = Arc::new(library_photo);
        let audio = Arc::new(audio);
        let video = Arc::new(video);
        let orchestrator = FetchOrchestrator::new(
            sightings.clone(),
            image_search.clone(),
            library_photo.clone(),
            audio.clone(),
            video.clone(),
            cache.clone(),
            history.clone(),
        );
        Fixture {
            sightings,
            image_search,
            library_photo,
            audio,
            video,
            cache,
            history,
            orchestrator,
        }
    }

    fn default_fixture() -> Fixture {
        fixture(
            FixedSightings::some(sighting("House Wren", "houwre")),
            FixedResolver::found(MediaKind::Photo, asset("https://cdn.example/photo")),
            FixedResolver::found(MediaKind::Audio, asset("https://cdn.example/audio")),
            FixedResolver::found(MediaKind::Video, asset("https://cdn.example/video")),
        )
    }

    #[tokio::test]
    async fn no_sighting_fails_without_mutating_storage() {
        let f = fixture(
            FixedSightings::none(),
            FixedResolver::found(MediaKind::Photo, asset("https://cdn.example/photo")),
            FixedResolver::found(MediaKind::Audio, asset("https://cdn.example/audio")),
            FixedResolver::missing(MediaKind::Video),
        );

        let err = f
            .orchestrator
            .get_current_bird(COORDS, PhotoBackend::BirdLibrary, false)
            .await
            .expect_err("should fail");
        assert!(matches!(err, FetchError::NoSighting { .. }));

        assert!(f.cache.get().await.expect("cache").is_none());
        assert!(f.history.list().await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn record_carries_sighting_details_and_reference_url() {
        let f = default_fixture();

        let record = f
            .orchestrator
            .get_current_bird(COORDS, PhotoBackend::BirdLibrary, false)
            .await
            .expect("fetch");

        assert_eq!(record.common_name, "House Wren");
        assert_eq!(record.location, "The Ramble");
        assert_eq!(record.reference_url, "https://ebird.org/species/houwre");
    }

    #[tokio::test]
    async fn second_fetch_same_day_hits_cache() {
        let f = default_fixture();

        let first = f
            .orchestrator
            .get_current_bird(COORDS, PhotoBackend::BirdLibrary, false)
            .await
            .expect("first fetch");
        let second = f
            .orchestrator
            .get_current_bird(COORDS, PhotoBackend::BirdLibrary, false)
            .await
            .expect("second fetch");

        assert_eq!(first, second);
        assert_eq!(f.sightings.call_count(), 1);
        assert_eq!(f.history.list().await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn backend_change_forces_one_extra_provider_call() {
        let f = default_fixture();

        f.orchestrator
            .get_current_bird(COORDS, PhotoBackend::BirdLibrary, false)
            .await
            .expect("library fetch");
        f.orchestrator
            .get_current_bird(COORDS, PhotoBackend::ImageSearch, false)
            .await
            .expect("search fetch");

        assert_eq!(f.sightings.call_count(), 2);
        assert_eq!(f.image_search.call_count(), 1);
        assert_eq!(f.library_photo.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_audio_degrades_to_none() {
        let f = fixture(
            FixedSightings::some(sighting("House Wren", "houwre")),
            FixedResolver::found(MediaKind::Photo, asset("https://cdn.example/photo")),
            FixedResolver::missing(MediaKind::Audio),
            FixedResolver::missing(MediaKind::Video),
        );

        let record = f
            .orchestrator
            .get_current_bird(COORDS, PhotoBackend::BirdLibrary, false)
            .await
            .expect("fetch");

        assert!(record.audio.is_none());
        assert!(record.video.is_none());
        assert_eq!(record.image.url, "https://cdn.example/photo");
    }

    #[tokio::test]
    async fn missing_photo_aborts_without_side_effects() {
        let f = fixture(
            FixedSightings::some(sighting("House Wren", "houwre")),
            FixedResolver::missing(MediaKind::Photo),
            FixedResolver::found(MediaKind::Audio, asset("https://cdn.example/audio")),
            FixedResolver::missing(MediaKind::Video),
        );

        let err = f
            .orchestrator
            .get_current_bird(COORDS, PhotoBackend::BirdLibrary, false)
            .await
            .expect_err("should fail");
        assert!(matches!(err, FetchError::MediaUnavailable { .. }));

        assert!(f.cache.get().await.expect("cache").is_none());
        assert!(f.history.list().await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn video_resolved_only_in_video_mode() {
        let f = default_fixture();

        let record = f
            .orchestrator
            .get_current_bird(COORDS, PhotoBackend::BirdLibrary, false)
            .await
            .expect("fetch");
        assert!(record.video.is_none());
        assert_eq!(f.video.call_count(), 0);

        f.cache.invalidate().await.expect("invalidate");
        let record = f
            .orchestrator
            .get_current_bird(COORDS, PhotoBackend::BirdLibrary, true)
            .await
            .expect("video fetch");
        assert!(record.video.is_some());
        assert_eq!(f.video.call_count(), 1);
    }

    #[tokio::test]
    async fn on_demand_video_attaches_to_cached_record() {
        let f = default_fixture();

        let record = f
            .orchestrator
            .get_current_bird(COORDS, PhotoBackend::BirdLibrary, false)
            .await
            .expect("fetch");
        assert!(record.video.is_none());

        let resolved = f
            .orchestrator
            .resolve_video(&record.species_key())
            .await
            .expect("resolve video");
        assert_eq!(resolved.url, "https://cdn.example/video");

        let cached = f.cache.get().await.expect("cache").expect("entry");
        assert_eq!(cached.record.video.as_ref(), Some(&resolved));
        // History stays untouched by on-demand resolution.
        assert_eq!(f.history.list().await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn on_demand_audio_for_other_species_leaves_cache_alone() {
        let f = default_fixture();
        f.orchestrator
            .get_current_bird(COORDS, PhotoBackend::BirdLibrary, false)
            .await
            .expect("fetch");

        let other = crate::model::SpeciesKey {
            species_code: "amerob".to_string(),
            common_name: "American Robin".to_string(),
        };
        f.orchestrator
            .resolve_audio(&other)
            .await
            .expect("resolve audio");

        let cached = f.cache.get().await.expect("cache").expect("entry");
        assert_eq!(cached.record.species_code, "houwre");
        assert_eq!(f.audio.call_count(), 2);
    }
}
