//! File-based last-known-location store at ~/.discovery-locator/last_location.json.
//!
//! One entry per source ("gps", "ip"); the freshest entry feeds the
//! optional last-known tier. TTL: 30 days.
//! Missing fields default gracefully so older files keep loading.

use super::types::{Known, LocationSource, Place, Resolution};
use crate::geo::Coordinate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CACHE_TTL_MS: i64 = 30 * 24 * 3600 * 1000; // 30 days in ms

#[derive(Serialize, Deserialize, Clone, Debug)]
struct CacheEntry {
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    accuracy: Option<f64>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    timestamp: i64,
}

impl CacheEntry {
    fn from_resolution(resolution: &Resolution, timestamp: i64) -> Option<Self> {
        let coordinate = resolution.coordinate();
        let place = resolution.place();
        if coordinate.is_none() && place.is_none() {
            return None;
        }
        Some(Self {
            latitude: coordinate.map(|c| c.latitude()),
            longitude: coordinate.map(|c| c.longitude()),
            accuracy: coordinate.and_then(|c| c.accuracy()),
            country_code: place.map(|p| p.country_code.clone()),
            country_name: place.and_then(|p| p.country_name.clone()),
            city: place.and_then(|p| p.city.clone()),
            region: place.and_then(|p| p.region.clone()),
            timestamp,
        })
    }

    /// Rebuild as a cache-sourced resolution. Invalid stored coordinates are dropped.
    fn to_resolution(&self) -> Option<Resolution> {
        let coordinate = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Coordinate::new(lat, lon, self.accuracy).ok(),
            _ => None,
        };
        let place = self
            .country_code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(|cc| Place {
                country_code: cc.to_ascii_uppercase(),
                country_name: self.country_name.clone(),
                city: self.city.clone(),
                region: self.region.clone(),
            });

        let source = LocationSource::Cache;
        match (coordinate, place) {
            (Some(coordinate), Some(place)) => Some(Resolution::Full { coordinate, place, source }),
            (Some(c), None) => Some(Resolution::Partial { known: Known::Coordinate(c), source }),
            (None, Some(p)) => Some(Resolution::Partial { known: Known::Place(p), source }),
            (None, None) => None,
        }
    }

    fn is_fresh(&self, now: i64) -> bool {
        now - self.timestamp <= CACHE_TTL_MS
    }
}

/// The last-known-location cache.
pub struct LocationCache {
    path: PathBuf,
    entries: HashMap<String, CacheEntry>,
}

impl LocationCache {
    /// Load cache from `path`; missing or unreadable files start empty.
    pub fn load_from(path: PathBuf) -> Self {
        let entries = Self::read_file(&path).unwrap_or_default();
        debug!(path = %path.display(), entries = entries.len(), "location cache loaded");
        Self { path, entries }
    }

    pub fn default_path() -> PathBuf {
        crate::config::app_dir().join("last_location.json")
    }

    fn read_file(path: &Path) -> Option<HashMap<String, CacheEntry>> {
        let data = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&data) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable location cache");
                None
            }
        }
    }

    /// The freshest non-expired entry, re-labelled with `LocationSource::Cache`.
    pub fn most_recent(&self) -> Option<Resolution> {
        let now = chrono::Utc::now().timestamp_millis();
        self.entries
            .values()
            .filter(|e| e.is_fresh(now))
            .max_by_key(|e| e.timestamp)
            .and_then(CacheEntry::to_resolution)
    }

    /// Remember a network-derived resolution and persist to disk.
    /// `NoData` and cache-sourced results are not stored.
    pub fn put(&mut self, resolution: &Resolution) {
        let source = resolution.source();
        if matches!(source, LocationSource::Cache | LocationSource::None) {
            return;
        }
        let now = chrono::Utc::now().timestamp_millis();
        if let Some(entry) = CacheEntry::from_resolution(resolution, now) {
            self.entries.insert(source.to_string(), entry);
            self.persist();
        }
    }

    fn persist(&self) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let written = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(&self.path, json).map_err(|e| e.to_string()));
        if let Err(e) = written {
            warn!(path = %self.path.display(), error = %e, "could not persist location cache");
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_cache() -> (LocationCache, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_location.json");
        (LocationCache::load_from(path), dir)
    }

    fn gps_full() -> Resolution {
        Resolution::Full {
            coordinate: Coordinate::new(59.3293, 18.0686, Some(10.0)).unwrap(),
            place: Place::new("se").with_city("Stockholm"),
            source: LocationSource::Gps,
        }
    }

    #[test]
    fn test_cache_put_most_recent() {
        let (mut cache, _dir) = test_cache();
        cache.put(&gps_full());

        let result = cache.most_recent().unwrap();
        assert_eq!(result.source(), LocationSource::Cache);
        assert_eq!(result.country_code(), Some("SE"));
        assert_eq!(result.city(), Some("Stockholm"));
        assert!((result.coordinate().unwrap().latitude() - 59.3293).abs() < 0.001);
    }

    #[test]
    fn test_cache_skips_no_data() {
        let (mut cache, _dir) = test_cache();
        cache.put(&Resolution::NoData);
        assert!(cache.is_empty());
        assert!(cache.most_recent().is_none());
    }

    #[test]
    fn test_cache_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_location.json");

        {
            let mut cache = LocationCache::load_from(path.clone());
            cache.put(&Resolution::Partial {
                known: Known::Place(Place::new("JP").with_city("Tokyo")),
                source: LocationSource::Ip,
            });
        }

        let cache2 = LocationCache::load_from(path);
        let result = cache2.most_recent().unwrap();
        assert_eq!(result.country_code(), Some("JP"));
        assert!(result.coordinate().is_none());
        assert_eq!(result.tier(), "partial");
    }

    #[test]
    fn test_most_recent_prefers_newer() {
        let (mut cache, _dir) = test_cache();
        cache.put(&Resolution::Partial {
            known: Known::Place(Place::new("FR")),
            source: LocationSource::Ip,
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        cache.put(&gps_full());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.most_recent().unwrap().country_code(), Some("SE"));
    }

    #[test]
    fn test_expired_entries_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_location.json");
        fs::write(
            &path,
            r#"{"ip": {"country_code": "DE", "timestamp": 0}}"#,
        )
        .unwrap();

        let cache = LocationCache::load_from(path);
        assert_eq!(cache.len(), 1);
        assert!(cache.most_recent().is_none());
    }

    #[test]
    fn test_sparse_entry_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_location.json");
        fs::write(
            &path,
            r#"{"gps": {"latitude": 46.8182, "longitude": 8.2275, "timestamp": 9999999999999}}"#,
        )
        .unwrap();

        let cache = LocationCache::load_from(path);
        let result = cache.most_recent().unwrap();
        assert!(result.country_code().is_none());
        assert_eq!(result.coordinate().unwrap().longitude(), 8.2275);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_location.json");
        fs::write(&path, "{not json").unwrap();
        assert!(LocationCache::load_from(path).is_empty());
    }
}
