use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// Build/deploy-time configuration: API credentials and plumbing knobs.
/// User preferences live in the synced key-value store, not here.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub http_timeout: Duration,
    pub ebird_api_key: Option<String>,
    pub image_search_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    data_dir: Option<PathBuf>,
    #[serde(default)]
    http_timeout_secs: Option<u64>,
    #[serde(default)]
    keys: KeySection,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct KeySection {
    #[serde(default)]
    ebird: Option<String>,
    #[serde(default)]
    image_search: Option<String>,
}

impl Config {
    /// Loads `birdtab.toml`, falling back to defaults when the file is
    /// absent. Environment variables override file-supplied credentials.
    pub fn load(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            toml::from_str::<ConfigFile>(&text)
                .with_context(|| format!("failed to parse config {} (expected TOML)", path.display()))?
        } else {
            ConfigFile::default()
        };

        let ebird_api_key = env_key("EBIRD_API_KEY").or(file.keys.ebird);
        let image_search_key = env_key("IMAGE_SEARCH_KEY").or(file.keys.image_search);

        Ok(Self {
            data_dir: file
                .data_dir
                .unwrap_or_else(crate::paths::default_data_dir),
            http_timeout: Duration::from_secs(
                file.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
            ebird_api_key,
            image_search_key,
        })
    }
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
