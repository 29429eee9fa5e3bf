use crate::assess::soft_spot::DEFAULT_TOLERANCE_M;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_REPORT_RETENTION_DAYS: u64 = 30;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_WEATHER_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_WEATHER_CACHE_TTL_SECS: u64 = 3600;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub aggregation: Option<AggregationSection>,
    #[serde(default)]
    pub retention: Option<RetentionSection>,
    #[serde(default)]
    pub site: Option<SiteSection>,
    #[serde(default)]
    pub weather: Option<WeatherSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationSection {
    /// Soft-spot tolerance radius in meters (default: 5.0)
    pub tolerance_m: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetentionSection {
    pub report_days: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeatherSection {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

impl Config {
    pub fn log_level(&self) -> &str {
        non_empty(Some(self.logging.level.as_str())).unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    /// Soft-spot tolerance; non-positive values fall back to the default.
    pub fn tolerance_m(&self) -> f64 {
        self.aggregation
            .as_ref()
            .and_then(|a| a.tolerance_m)
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(DEFAULT_TOLERANCE_M)
    }

    pub fn report_retention(&self) -> Duration {
        let days = self
            .retention
            .as_ref()
            .and_then(|r| r.report_days)
            .unwrap_or(DEFAULT_REPORT_RETENTION_DAYS);
        Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY))
    }

    pub fn sweep_interval(&self) -> Duration {
        let secs = self
            .retention
            .as_ref()
            .and_then(|r| r.sweep_interval_secs)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
        Duration::from_secs(secs)
    }

    pub fn site_path(&self) -> Option<&Path> {
        let path = self.site.as_ref()?.path.as_deref()?;
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        }
    }

    pub fn weather_endpoint(&self) -> Option<&str> {
        non_empty(self.weather.as_ref()?.endpoint.as_deref())
    }

    pub fn weather_api_key(&self) -> Option<&str> {
        non_empty(self.weather.as_ref()?.api_key.as_deref())
    }

    pub fn weather_timeout(&self) -> Duration {
        let millis = self
            .weather
            .as_ref()
            .and_then(|w| w.timeout_ms)
            .unwrap_or(DEFAULT_WEATHER_TIMEOUT_MS);
        Duration::from_millis(millis)
    }

    pub fn weather_cache_ttl(&self) -> Duration {
        let secs = self
            .weather
            .as_ref()
            .and_then(|w| w.cache_ttl_secs)
            .unwrap_or(DEFAULT_WEATHER_CACHE_TTL_SECS);
        Duration::from_secs(secs)
    }
}
