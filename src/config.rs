//! Session configuration loaded from TOML and environment variables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::SessionError;
use crate::timeouts::{DEFAULT_TIMEOUT, NAVIGATION_TIMEOUT};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Baseline timeout for element interaction, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub default_ms: u64,
    /// Baseline timeout for page navigation, in milliseconds.
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: default_timeout_ms(),
            navigation_ms: default_navigation_timeout_ms(),
        }
    }
}

/// Where screenshots and recordings land when the caller does not name a
/// destination.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactConfig {
    /// Directory for saved artifacts; a fresh temporary directory per file
    /// when absent.
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
    #[serde(default = "default_recording_fps")]
    pub recording_fps: u32,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            temp_prefix: default_temp_prefix(),
            recording_fps: default_recording_fps(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT
}

fn default_navigation_timeout_ms() -> u64 {
    NAVIGATION_TIMEOUT
}

fn default_temp_prefix() -> String {
    "browser-session".to_string()
}

fn default_recording_fps() -> u32 {
    30
}

impl SessionConfig {
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    fn load_from_env(&mut self) {
        if let Ok(timeout) = std::env::var("SESSION_DEFAULT_TIMEOUT_MS")
            && let Ok(timeout) = timeout.parse()
        {
            self.timeouts.default_ms = timeout;
        }
        if let Ok(timeout) = std::env::var("SESSION_NAVIGATION_TIMEOUT_MS")
            && let Ok(timeout) = timeout.parse()
        {
            self.timeouts.navigation_ms = timeout;
        }
        if let Ok(dir) = std::env::var("SESSION_OUTPUT_DIR") {
            self.artifacts.output_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeouts.default_ms == 0 {
            return Err(SessionError::Config(
                "timeouts.default_ms must be greater than 0".into(),
            ));
        }
        if self.timeouts.navigation_ms == 0 {
            return Err(SessionError::Config(
                "timeouts.navigation_ms must be greater than 0".into(),
            ));
        }
        if self.artifacts.recording_fps == 0 {
            return Err(SessionError::Config(
                "artifacts.recording_fps must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
