use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const DEFAULT_STORE_URL: &str = "https://research.gene.com/wobbegong/api/v1";
pub const DEFAULT_INDEX_URL: &str = "https://research.gene.com/sewerrat/api/v1";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_MAX_CONCURRENT_CONVERSIONS: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

const CONFIG_FILE_NAME: &str = "kira-ce.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store_url: Option<String>,
    #[serde(default)]
    pub index_url: Option<String>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub poll_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_concurrent_conversions: Option<usize>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub store_url: String,
    pub index_url: String,
    pub poll_interval: Duration,
    pub poll_timeout: Option<Duration>,
    pub max_concurrent_conversions: usize,
    pub request_timeout: Duration,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ConfigLoader::resolve_config(Config::default())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads an explicit config file, or `kira-ce.json` from the working
    /// directory, or the per-user config file, falling back to defaults when
    /// none of the implicit locations exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config = match path {
            Some(path) => Self::read(Utf8PathBuf::from(path))?,
            None => match Self::implicit_locations()
                .into_iter()
                .find(|candidate| candidate.as_std_path().exists())
            {
                Some(found) => Self::read(found)?,
                None => Config::default(),
            },
        };

        let mut resolved = Self::resolve_config(config);
        Self::apply_env(&mut resolved);
        Ok(resolved)
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        ResolvedConfig {
            store_url: trim_base_url(
                config
                    .store_url
                    .unwrap_or_else(|| DEFAULT_STORE_URL.to_string()),
            ),
            index_url: trim_base_url(
                config
                    .index_url
                    .unwrap_or_else(|| DEFAULT_INDEX_URL.to_string()),
            ),
            poll_interval: Duration::from_millis(
                config.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            poll_timeout: config.poll_timeout_secs.map(Duration::from_secs),
            max_concurrent_conversions: config
                .max_concurrent_conversions
                .unwrap_or(DEFAULT_MAX_CONCURRENT_CONVERSIONS)
                .max(1),
            request_timeout: Duration::from_secs(
                config
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
        }
    }

    fn read(path: Utf8PathBuf) -> Result<Config, KiraError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| KiraError::ConfigRead(path.to_string()))?;
        serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))
    }

    fn implicit_locations() -> Vec<Utf8PathBuf> {
        let mut locations = vec![Utf8PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(user) = BaseDirs::new().and_then(|dirs| {
            Utf8PathBuf::from_path_buf(
                dirs.config_dir()
                    .join("kira-cell-explorer")
                    .join(CONFIG_FILE_NAME),
            )
            .ok()
        }) {
            locations.push(user);
        }
        locations
    }

    fn apply_env(resolved: &mut ResolvedConfig) {
        if let Ok(url) = std::env::var("KIRA_CE_STORE_URL") {
            if !url.trim().is_empty() {
                resolved.store_url = trim_base_url(url.trim().to_string());
            }
        }
        if let Ok(url) = std::env::var("KIRA_CE_INDEX_URL") {
            if !url.trim().is_empty() {
                resolved.index_url = trim_base_url(url.trim().to_string());
            }
        }
    }
}

fn trim_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
