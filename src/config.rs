//! Runtime configuration from ~/.discovery-locator/config.toml.
//!
//! Every field has a default, so a partial file (or none at all) works.

use crate::location::PositionOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// ~/.discovery-locator (or ./.discovery-locator without a home directory).
pub fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".discovery-locator")
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub positioning: PositioningConfig,
    pub geocoding: GeocodingConfig,
    pub geoip: GeoIpConfig,
    pub discovery: DiscoveryConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PositioningConfig {
    pub high_accuracy: bool,
    pub timeout_ms: u64,
    /// 0 = never reuse a cached fix.
    pub maximum_age_ms: u64,
    /// gpsd socket; unset means no local GPS daemon.
    pub gpsd_addr: Option<String>,
}

impl Default for PositioningConfig {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout_ms: 10_000,
            maximum_age_ms: 0,
            gpsd_addr: None,
        }
    }
}

impl PositioningConfig {
    pub fn options(&self) -> PositionOptions {
        PositionOptions {
            enable_high_accuracy: self.high_accuracy,
            timeout: Duration::from_millis(self.timeout_ms),
            maximum_age: Duration::from_millis(self.maximum_age_ms),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GeocodingConfig {
    pub base_url: String,
    pub language: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".into(),
            language: "en".into(),
            timeout_secs: 5,
            user_agent: format!("DiscoveryLocator/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GeoIpConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ipapi.co".into(),
            timeout_secs: 5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Store resolutions and use the last one as a final fallback tier.
    pub enabled: bool,
    pub path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Peers whose `X-Forwarded-For` header is believed. Empty means the
    /// socket peer is always the client.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        app_dir().join("config.toml")
    }

    /// A missing or broken file yields defaults.
    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Self::default();
            }
        };

        match toml::from_str(&content) {
            Ok(config) => {
                info!(path = %path.display(), "configuration loaded");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                Self::default()
            }
        }
    }

    /// Write the current settings out so users have a file to edit.
    pub fn write_to(&self, path: &Path) -> Result<(), String> {
        let toml_string = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        fs::write(path, toml_string).map_err(|e| e.to_string())
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache
            .path
            .clone()
            .unwrap_or_else(crate::location::LocationCache::default_path)
    }
}
