use crate::model::Coordinates;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// One raw sighting as reported by the provider, before media resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub common_name: String,
    pub scientific_name: String,
    pub species_code: String,
    pub location: String,
}

impl Sighting {
    pub fn reference_url(&self) -> String {
        format!("https://ebird.org/species/{}", self.species_code)
    }
}

#[async_trait]
pub trait SightingProvider: Send + Sync {
    /// The single most relevant recent sighting near the given point, or
    /// `None` when the area is quiet.
    async fn recent_sighting(&self, coords: Coordinates) -> Result<Option<Sighting>>;
}

/// eBird "recent nearby observations" client. The provider's own ordering
/// is trusted; the first observation wins.
#[derive(Debug, Clone)]
pub struct EbirdClient {
    client: Client,
    api_key: String,
    base_url: String,
}

const EBIRD_BASE_URL: &str = "https://api.ebird.org";
const SEARCH_RADIUS_KM: u32 = 25;

impl EbirdClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build sighting HTTP client")?;
        Ok(Self {
            client,
            api_key,
            base_url: EBIRD_BASE_URL.to_string(),
        })
    }
}

#[async_trait]
impl SightingProvider for EbirdClient {
    async fn recent_sighting(&self, coords: Coordinates) -> Result<Option<Sighting>> {
        let url = format!("{}/v2/data/obs/geo/recent", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("X-eBirdApiToken", &self.api_key)
            .query(&[
                ("lat", format!("{:.4}", coords.lat)),
                ("lng", format!("{:.4}", coords.lng)),
                ("dist", SEARCH_RADIUS_KM.to_string()),
                ("maxResults", "10".to_string()),
            ])
            .send()
            .await
            .context("failed to call sighting provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("sighting provider error {status}: {body}");
        }

        let json: Value = response
            .json()
            .await
            .context("failed to decode sighting provider JSON")?;

        Ok(first_sighting(&json))
    }
}

/// Keyless stand-in used when no eBird API key is configured: always
/// reports the same well-known bird so the rest of the pipeline can run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleSightings;

#[async_trait]
impl SightingProvider for SampleSightings {
    async fn recent_sighting(&self, _coords: Coordinates) -> Result<Option<Sighting>> {
        Ok(Some(Sighting {
            common_name: "Northern Cardinal".to_string(),
            scientific_name: "Cardinalis cardinalis".to_string(),
            species_code: "norcar".to_string(),
            location: "Sample data (no eBird API key)".to_string(),
        }))
    }
}

fn first_sighting(root: &Value) -> Option<Sighting> {
    let observations = root.as_array()?;
    for obs in observations {
        let common_name = obs.get("comName").and_then(Value::as_str);
        let scientific_name = obs.get("sciName").and_then(Value::as_str);
        let species_code = obs.get("speciesCode").and_then(Value::as_str);
        let location = obs.get("locName").and_then(Value::as_str).unwrap_or("");

        if let (Some(common_name), Some(scientific_name), Some(species_code)) =
            (common_name, scientific_name, species_code)
        {
            return Some(Sighting {
                common_name: common_name.to_string(),
                scientific_name: scientific_name.to_string(),
                species_code: species_code.to_string(),
                location: location.to_string(),
            });
        }
    }
    None
}
