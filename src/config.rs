// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::types::SourceType;
use crate::constants::{ring, timing};
use crate::errors::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Directory name under the user config dir
const CONFIG_DIR: &str = "gst-capture-ring";

/// File name of the persisted configuration
const CONFIG_FILE: &str = "config.json";

/// Capture session configuration
///
/// Missing fields take their defaults, so a partial JSON file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Requested frame width
    pub width: u32,
    /// Requested frame height
    pub height: u32,
    /// Camera feeding the pipeline
    pub source: SourceType,
    /// Full launch description replacing the default one for `source`
    pub launch: Option<String>,
    /// Number of capture ring slots (also used for the conversion pool)
    pub ring_buffers: usize,
    /// How long the consumer waits for a new frame
    pub acquire_timeout_ms: u64,
    /// Require unified host/device memory for conversion output
    pub zero_copy: bool,
    /// Convert every captured frame to float RGBA
    pub convert: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            width: ring::DEFAULT_WIDTH,
            height: ring::DEFAULT_HEIGHT,
            source: SourceType::default(),
            launch: None,
            ring_buffers: ring::RING_BUFFERS,
            acquire_timeout_ms: timing::DEFAULT_ACQUIRE_TIMEOUT_MS,
            zero_copy: false,
            convert: false,
        }
    }
}

impl Config {
    /// Location of the configuration file, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Read and validate a configuration file
    pub fn load(path: &Path) -> CaptureResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CaptureError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| CaptureError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load from `path` (or the default location), using defaults when the
    /// file does not exist
    pub fn load_or_default(path: Option<&Path>) -> CaptureResult<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        Self::load(&path)
    }

    /// Write the configuration as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> CaptureResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> CaptureResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Config(format!(
                "frame size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.ring_buffers < ring::MIN_RING_BUFFERS {
            return Err(CaptureError::Config(format!(
                "ring_buffers must be at least {}, got {}",
                ring::MIN_RING_BUFFERS,
                self.ring_buffers
            )));
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"width": 640}"#).unwrap();
        assert_eq!(config.width, 640);
        assert_eq!(config.height, ring::DEFAULT_HEIGHT);
        assert_eq!(config.ring_buffers, ring::RING_BUFFERS);
        assert!(config.launch.is_none());
    }

    #[test]
    fn test_validate_ring_size() {
        let config = Config {
            ring_buffers: 1,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CaptureError::Config(_))));
    }
}
