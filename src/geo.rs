//! Coordinate validation and great-circle distance.
//!
//! Distances use the haversine formula on a spherical Earth (R = 6371 km).
//! Displayed distances are rounded to whole kilometres.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A validated WGS84 position, optionally with a horizontal accuracy in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy: Option<f64>,
}

// Deserialized values go through `Coordinate::new` like everything else.
#[derive(Deserialize)]
struct RawCoordinate {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy: Option<f64>,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = GeoError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.latitude, raw.longitude, raw.accuracy)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeoError {
    InvalidCoordinate { latitude: f64, longitude: f64 },
    InvalidAccuracy(f64),
}

impl fmt::Display for GeoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCoordinate { latitude, longitude } => write!(
                f,
                "Invalid coordinates ({}, {}). Lat: -90..90, Lon: -180..180",
                latitude, longitude
            ),
            Self::InvalidAccuracy(a) => write!(f, "Invalid accuracy: {} m", a),
        }
    }
}

impl std::error::Error for GeoError {}

/// True when both values are finite and inside the WGS84 ranges (bounds inclusive).
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64, accuracy: Option<f64>) -> Result<Self, GeoError> {
        if !is_valid_coordinate(latitude, longitude) {
            return Err(GeoError::InvalidCoordinate { latitude, longitude });
        }
        if let Some(a) = accuracy {
            if !a.is_finite() || a < 0.0 {
                return Err(GeoError::InvalidAccuracy(a));
            }
        }
        Ok(Self { latitude, longitude, accuracy })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Horizontal accuracy in metres, when the source reported one.
    pub fn accuracy(&self) -> Option<f64> {
        self.accuracy
    }

    /// Rounded great-circle distance to `other`, in kilometres.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        distance_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_coords(self.latitude, self.longitude))?;
        if let Some(a) = self.accuracy {
            write!(f, " (\u{00B1}{:.0} m)", a)?;
        }
        Ok(())
    }
}

/// Unrounded haversine distance in kilometres. Inputs are not validated.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Clamp guards sqrt(1 - a) against a drifting a hair above 1.0 for antipodes.
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Haversine distance rounded to the nearest whole kilometre.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine_km(lat1, lon1, lat2, lon2).round()
}

/// Format as `21.4225°N, 39.8262°E`.
pub fn format_coords(lat: f64, lon: f64) -> String {
    let ns = if lat >= 0.0 { 'N' } else { 'S' };
    let ew = if lon >= 0.0 { 'E' } else { 'W' };
    format!("{:.4}\u{00B0}{}, {:.4}\u{00B0}{}", lat.abs(), ns, lon.abs(), ew)
}
