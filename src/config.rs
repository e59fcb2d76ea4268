// SPDX-License-Identifier: GPL-3.0-only

//! Provider configuration, loaded from a JSON file

use crate::constants::{
    DEFAULT_BUFFER_COUNT, DEFAULT_DEVICE_KIND, DEFAULT_FRAME_RATE, DEFAULT_READ_TIMEOUT,
    DEFAULT_STOP_WAIT, IlluminationMode,
};
use crate::errors::{ProviderError, ProviderResult};
use crate::media::formats::VideoSubtype;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Pixel encoding a candidate format must carry to be selected
    pub required_subtype: VideoSubtype,
    /// Longest `stop(wait = true)` blocks for the in-flight read step
    pub stop_wait_ms: u64,
    /// Number of mmap buffers requested from V4L2
    pub buffer_count: u32,
    /// Per-read V4L2 timeout
    pub read_timeout_ms: u64,
    /// Device category advertised to the host
    pub device_kind: String,
    /// Illumination tag policy of the transform stage
    pub illumination: IlluminationMode,
    /// Frame rate assumed when the device reports none
    pub default_frame_rate: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            required_subtype: VideoSubtype::Yuy2,
            stop_wait_ms: DEFAULT_STOP_WAIT.as_millis() as u64,
            buffer_count: DEFAULT_BUFFER_COUNT,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            device_kind: DEFAULT_DEVICE_KIND.to_string(),
            illumination: IlluminationMode::default(),
            default_frame_rate: DEFAULT_FRAME_RATE,
        }
    }
}

impl ProviderConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> ProviderResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProviderError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        info!(path = %path.display(), "Loaded provider configuration");
        Ok(config)
    }

    /// Load from `path` when given, otherwise from the default location if a
    /// file exists there, otherwise defaults
    pub fn load_or_default(path: Option<&Path>) -> ProviderResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No configuration file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// `$XDG_CONFIG_HOME/frame-provider/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("frame-provider").join("config.json"))
    }

    pub fn stop_wait(&self) -> Duration {
        Duration::from_millis(self.stop_wait_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    fn validate(&self) -> ProviderResult<()> {
        if self.buffer_count == 0 {
            return Err(ProviderError::Config(
                "buffer_count must be at least 1".to_string(),
            ));
        }
        if self.default_frame_rate == 0 {
            return Err(ProviderError::Config(
                "default_frame_rate must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
