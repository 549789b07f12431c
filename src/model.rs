use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Geographic point used to query the sighting provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4}", self.lat, self.lng)
    }
}

/// Species handle carried across the transport boundary for on-demand
/// media resolution. The code keys the bird-media library; the common
/// name keys general image search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesKey {
    pub species_code: String,
    pub common_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Photo => write!(f, "photo"),
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// One external media asset: a URL plus attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub url: String,
    pub contributor: String,
    pub contributor_url: String,
}

/// Which photo backend produced (or should produce) the image asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhotoBackend {
    ImageSearch,
    BirdLibrary,
}

impl fmt::Display for PhotoBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoBackend::ImageSearch => write!(f, "image-search"),
            PhotoBackend::BirdLibrary => write!(f, "bird-library"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseBackendError;

impl fmt::Display for ParseBackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected 'image-search' or 'bird-library'")
    }
}

impl std::error::Error for ParseBackendError {}

impl FromStr for PhotoBackend {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image-search" => Ok(PhotoBackend::ImageSearch),
            "bird-library" => Ok(PhotoBackend::BirdLibrary),
            _ => Err(ParseBackendError),
        }
    }
}

/// A fully resolved bird: sighting details plus media assets.
///
/// Immutable once constructed except for `attach_audio`/`attach_video`,
/// which only ever fill a missing slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirdRecord {
    pub common_name: String,
    pub scientific_name: String,
    pub location: String,
    pub species_code: String,
    pub reference_url: String,
    pub image: MediaAsset,
    pub audio: Option<MediaAsset>,
    pub video: Option<MediaAsset>,
    pub photo_backend: PhotoBackend,
    pub video_mode: bool,
    pub fetched_at: DateTime<Utc>,
}

impl BirdRecord {
    pub fn species_key(&self) -> SpeciesKey {
        SpeciesKey {
            species_code: self.species_code.clone(),
            common_name: self.common_name.clone(),
        }
    }

    /// Fills the audio slot if it is empty. Returns whether the record changed.
    pub fn attach_audio(&mut self, asset: MediaAsset) -> bool {
        if self.audio.is_some() {
            return false;
        }
        self.audio = Some(asset);
        true
    }

    /// Fills the video slot if it is empty. Returns whether the record changed.
    pub fn attach_video(&mut self, asset: MediaAsset) -> bool {
        if self.video.is_some() {
            return false;
        }
        self.video = Some(asset);
        true
    }
}

/// Single-slot cache payload: one record plus the calendar day and photo
/// backend that produced it. Validity is an equality check, not a TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub record: BirdRecord,
    pub date: String,
    pub backend: PhotoBackend,
}

impl CacheEntry {
    pub fn new(record: BirdRecord, today: NaiveDate) -> Self {
        let backend = record.photo_backend;
        Self {
            record,
            date: date_stamp(today),
            backend,
        }
    }

    pub fn is_valid(&self, today: NaiveDate, backend: PhotoBackend) -> bool {
        self.date == date_stamp(today) && self.backend == backend
    }
}

/// One entry of the view history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub record: BirdRecord,
    pub resolved_at: DateTime<Utc>,
}

pub fn date_stamp(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
pub(crate) fn test_record(name: &str) -> BirdRecord {
    BirdRecord {
        common_name: name.to_string(),
        scientific_name: format!("{name}us scientificus"),
        location: "Backyard Pond".to_string(),
        species_code: name.to_ascii_lowercase().replace(' ', ""),
        reference_url: format!("https://example.org/species/{name}"),
        image: MediaAsset {
            url: format!("https://img.example.org/{name}.jpg"),
            contributor: "A. Photographer".to_string(),
            contributor_url: "https://example.org/people/ap".to_string(),
        },
        audio: None,
        video: None,
        photo_backend: PhotoBackend::BirdLibrary,
        video_mode: false,
        fetched_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheEntry, MediaAsset, PhotoBackend, test_record};
    use chrono::NaiveDate;

    fn asset(url: &str) -> MediaAsset {
        MediaAsset {
            url: url.to_string(),
            contributor: "B. Recorder".to_string(),
            contributor_url: "https://example.org/people/br".to_string(),
        }
    }

    #[test]
    fn attach_only_fills_missing_slots() {
        let mut record = test_record("Wren");
        assert!(record.attach_audio(asset("https://a.example/1.mp3")));
        assert!(!record.attach_audio(asset("https://a.example/2.mp3")));
        assert_eq!(
            record.audio.as_ref().map(|a| a.url.as_str()),
            Some("https://a.example/1.mp3")
        );

        assert!(record.attach_video(asset("https://v.example/1.mp4")));
        assert!(!record.attach_video(asset("https://v.example/2.mp4")));
    }

    #[test]
    fn cache_entry_validity_checks_day_and_backend() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).expect("date");
        let next = NaiveDate::from_ymd_opt(2025, 6, 2).expect("date");
        let entry = CacheEntry::new(test_record("Robin"), day);

        assert!(entry.is_valid(day, PhotoBackend::BirdLibrary));
        assert!(!entry.is_valid(next, PhotoBackend::BirdLibrary));
        assert!(!entry.is_valid(day, PhotoBackend::ImageSearch));
    }

    #[test]
    fn backend_round_trips_through_from_str() {
        assert_eq!(
            "image-search".parse::<PhotoBackend>(),
            Ok(PhotoBackend::ImageSearch)
        );
        assert_eq!(
            "bird-library".parse::<PhotoBackend>(),
            Ok(PhotoBackend::BirdLibrary)
        );
        assert!("flickr".parse::<PhotoBackend>().is_err());
    }
}
