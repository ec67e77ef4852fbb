//! Core types for the location subsystem.

use crate::geo::Coordinate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How a location was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    Gps,
    Ip,
    Cache,
    None,
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gps => write!(f, "gps"),
            Self::Ip => write!(f, "ip"),
            Self::Cache => write!(f, "cache"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Administrative attribution from reverse geocoding or GeoIP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    /// ISO 3166-1 alpha-2, upper-case.
    pub country_code: String,
    #[serde(default)]
    pub country_name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl Place {
    pub fn new(country_code: &str) -> Self {
        Self {
            country_code: country_code.trim().to_ascii_uppercase(),
            country_name: None,
            city: None,
            region: None,
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }
}

/// What a partial resolution did learn.
#[derive(Debug, Clone, PartialEq)]
pub enum Known {
    /// A fix whose country attribution failed.
    Coordinate(Coordinate),
    /// A coarse place without a fix (GeoIP).
    Place(Place),
}

/// Outcome of one `resolve()` call.
///
/// Every tier of the fallback chain maps onto one of these variants, so
/// callers have to decide what to do with partial and empty answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Full {
        coordinate: Coordinate,
        place: Place,
        source: LocationSource,
    },
    Partial {
        known: Known,
        source: LocationSource,
    },
    NoData,
}

impl Resolution {
    pub fn source(&self) -> LocationSource {
        match self {
            Self::Full { source, .. } | Self::Partial { source, .. } => *source,
            Self::NoData => LocationSource::None,
        }
    }

    pub fn coordinate(&self) -> Option<&Coordinate> {
        match self {
            Self::Full { coordinate, .. } => Some(coordinate),
            Self::Partial { known: Known::Coordinate(c), .. } => Some(c),
            _ => None,
        }
    }

    pub fn place(&self) -> Option<&Place> {
        match self {
            Self::Full { place, .. } => Some(place),
            Self::Partial { known: Known::Place(p), .. } => Some(p),
            _ => None,
        }
    }

    pub fn country_code(&self) -> Option<&str> {
        self.place().map(|p| p.country_code.as_str())
    }

    pub fn city(&self) -> Option<&str> {
        self.place().and_then(|p| p.city.as_deref())
    }

    /// "full", "partial" or "none".
    pub fn tier(&self) -> &'static str {
        match self {
            Self::Full { .. } => "full",
            Self::Partial { .. } => "partial",
            Self::NoData => "none",
        }
    }

    /// Flatten into the serialisable record.
    pub fn to_resolved(&self) -> ResolvedLocation {
        ResolvedLocation {
            coordinate: self.coordinate().copied(),
            country_code: self.country_code().map(str::to_string),
            city: self.city().map(str::to_string),
            source: self.source(),
        }
    }
}

/// Flat, serialisable view of a [`Resolution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub coordinate: Option<Coordinate>,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub source: LocationSource,
}

impl ResolvedLocation {
    pub fn display_line(&self) -> String {
        let place = match (&self.city, &self.country_code) {
            (Some(city), Some(cc)) => format!("{}, {}", city, cc),
            (None, Some(cc)) => cc.clone(),
            (Some(city), None) => city.clone(),
            (None, None) => "Unknown place".to_string(),
        };
        match &self.coordinate {
            Some(c) => format!("\u{1F4CD} {} \u{2014} {} [{}]", place, c, self.source),
            None => format!("\u{1F4CD} {} [{}]", place, self.source),
        }
    }
}

/// Options handed to the platform positioning capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest acceptable cached fix. Zero means a fresh fix is required.
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::ZERO,
        }
    }
}

/// Which step of the chain an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Gps,
    ReverseGeocode,
    GeoIp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gps => write!(f, "GPS"),
            Self::ReverseGeocode => write!(f, "reverse geocode"),
            Self::GeoIp => write!(f, "GeoIP"),
        }
    }
}

/// Location resolution errors. All of them are recoverable inside the
/// resolver; they only surface from the individual providers.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationError {
    PermissionDenied,
    Timeout { stage: Stage, after: Duration },
    ServiceUnavailable(String),
    NoMatch(String),
    InvalidResponse(String),
}

impl fmt::Display for LocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "Location permission denied"),
            Self::Timeout { stage, after } => {
                write!(f, "{} timed out after {:.1}s", stage, after.as_secs_f64())
            }
            Self::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            Self::NoMatch(msg) => write!(f, "No match: {}", msg),
            Self::InvalidResponse(msg) => write!(f, "Invalid API response: {}", msg),
        }
    }
}

impl std::error::Error for LocationError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord() -> Coordinate {
        Coordinate::new(46.8182, 8.2275, Some(8.0)).unwrap()
    }

    #[test]
    fn test_full_flattens_everything() {
        let r = Resolution::Full {
            coordinate: coord(),
            place: Place::new("ch").with_city("Bern"),
            source: LocationSource::Gps,
        };
        let flat = r.to_resolved();
        assert_eq!(flat.coordinate, Some(coord()));
        assert_eq!(flat.country_code.as_deref(), Some("CH"));
        assert_eq!(flat.city.as_deref(), Some("Bern"));
        assert_eq!(flat.source, LocationSource::Gps);
        assert_eq!(r.tier(), "full");
    }

    #[test]
    fn test_partial_coordinate_has_no_country() {
        let r = Resolution::Partial {
            known: Known::Coordinate(coord()),
            source: LocationSource::Gps,
        };
        assert_eq!(r.coordinate(), Some(&coord()));
        assert_eq!(r.country_code(), None);
        assert_eq!(r.tier(), "partial");
    }

    #[test]
    fn test_partial_place_has_no_coordinate() {
        let r = Resolution::Partial {
            known: Known::Place(Place::new("FR")),
            source: LocationSource::Ip,
        };
        let flat = r.to_resolved();
        assert!(flat.coordinate.is_none());
        assert_eq!(flat.country_code.as_deref(), Some("FR"));
    }

    #[test]
    fn test_no_data() {
        let flat = Resolution::NoData.to_resolved();
        assert_eq!(flat.source, LocationSource::None);
        assert!(flat.coordinate.is_none() && flat.country_code.is_none() && flat.city.is_none());
    }

    #[test]
    fn test_source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&LocationSource::Ip).unwrap(), "\"ip\"");
        assert_eq!(serde_json::to_string(&LocationSource::None).unwrap(), "\"none\"");
    }

    #[test]
    fn test_position_options_default() {
        let o = PositionOptions::default();
        assert!(o.enable_high_accuracy);
        assert_eq!(o.timeout, Duration::from_secs(10));
        assert_eq!(o.maximum_age, Duration::ZERO);
    }
}
