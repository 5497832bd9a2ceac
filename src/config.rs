use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV: &str = "SCENEBRIDGE_CONFIG";

const DEFAULT_FLUSH_RATE_HZ: u32 = 60;
const DEFAULT_PIXEL_RATIO: f64 = 1.0;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read session config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("flush_rate_hz must be greater than zero")]
    ZeroFlushRate,
    #[error("pixel_ratio must be positive, got {0}")]
    InvalidPixelRatio(f64),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    flush_rate_hz: Option<u32>,
    pixel_ratio: Option<f64>,
    log_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub flush_rate_hz: u32,
    pub pixel_ratio: f64,
    pub log_filter: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            flush_rate_hz: DEFAULT_FLUSH_RATE_HZ,
            pixel_ratio: DEFAULT_PIXEL_RATIO,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl SessionConfig {
    /// Reads `config_path` if it is given and exists; missing keys and a
    /// missing file fall back to defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let raw = match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)?;
                if contents.trim().is_empty() {
                    RawConfig::default()
                } else {
                    serde_yaml::from_str(&contents)?
                }
            }
            _ => RawConfig::default(),
        };

        let config = Self {
            flush_rate_hz: raw.flush_rate_hz.unwrap_or(DEFAULT_FLUSH_RATE_HZ),
            pixel_ratio: raw.pixel_ratio.unwrap_or(DEFAULT_PIXEL_RATIO),
            log_filter: raw
                .log_filter
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Uses the file named by `SCENEBRIDGE_CONFIG`, if set.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Some(Path::new(&path))),
            None => Self::load(None),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_rate_hz == 0 {
            return Err(ConfigError::ZeroFlushRate);
        }
        if self.pixel_ratio.is_nan() || self.pixel_ratio <= 0.0 {
            return Err(ConfigError::InvalidPixelRatio(self.pixel_ratio));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Result<Duration, ConfigError> {
        if self.flush_rate_hz == 0 {
            return Err(ConfigError::ZeroFlushRate);
        }
        Ok(Duration::from_secs_f64(1.0 / f64::from(self.flush_rate_hz)))
    }
}
