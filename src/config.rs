use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    ReplayError,
    api::track::DEFAULT_TRACK_PADDING,
    laps::DEFAULT_GRACE_WINDOW,
};

const CONFIG_DIR_NAME: &str = "race-replay";
const CONFIG_FILE_NAME: &str = "config.json";

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_WEBSOCKET_PATH: &str = "/ws-f1/websocket";
pub const DEFAULT_HEALTH_WINDOW_MS: u64 = 2000;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ReplayConfig {
    /// REST base URL; the websocket endpoint is derived from it
    pub api_base_url: String,
    pub websocket_path: String,
    /// How long before lap 1's recorded start lap 1 is already reported
    pub lap_grace_window_s: u64,
    /// A connection is healthy when a batch arrived within this window
    pub health_window_ms: u64,
    pub track_padding: f64,
    /// Drop pushed batches this far from the latest requested time; unset keeps every batch
    pub stale_push_tolerance_s: Option<u64>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            websocket_path: DEFAULT_WEBSOCKET_PATH.to_string(),
            lap_grace_window_s: DEFAULT_GRACE_WINDOW.as_secs(),
            health_window_ms: DEFAULT_HEALTH_WINDOW_MS,
            track_padding: DEFAULT_TRACK_PADDING,
            stale_push_tolerance_s: None,
        }
    }
}

impl ReplayConfig {
    pub fn lap_grace_window(&self) -> Duration {
        Duration::from_secs(self.lap_grace_window_s)
    }

    pub fn health_window(&self) -> Duration {
        Duration::from_millis(self.health_window_ms)
    }

    pub fn stale_push_tolerance(&self) -> Option<Duration> {
        self.stale_push_tolerance_s.map(Duration::from_secs)
    }

    /// Where `from_local_file` and `save` look, under the platform config directory.
    pub fn default_path() -> Result<PathBuf, ReplayError> {
        let config_dir = dirs::config_dir().ok_or(ReplayError::NoConfigDir)?;
        Ok(config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load the user's config file, if one has been saved.
    pub fn from_local_file() -> Result<Option<Self>, ReplayError> {
        Self::from_file(&Self::default_path()?)
    }

    pub fn from_file(config_path: &Path) -> Result<Option<Self>, ReplayError> {
        if !config_path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(config_path)
            .map_err(|e| ReplayError::ConfigIOError { source: e })?;
        serde_json::from_reader(file)
            .map(Some)
            .map_err(|e| ReplayError::ConfigSerializeError { source: e })
    }

    pub fn save(&self) -> Result<(), ReplayError> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<(), ReplayError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ReplayError::ConfigIOError { source: e })?;
        }

        let file = std::fs::File::create(config_path)
            .map_err(|e| ReplayError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| ReplayError::ConfigSerializeError { source: e })
    }
}
