//! Discovery backend: push the resolved position, fetch nearby profiles,
//! and rank them by distance.
//!
//! Authentication is a bearer token owned by the caller; nothing here
//! stores it.

use crate::geo::Coordinate;
use crate::location::Resolution;
use crate::policy::{CountryPolicy, CountryPolicyTable};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

// ─── Plan ───────────────────────────────────────────────────────

/// Origin and radius for one discovery query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryPlan {
    pub origin: Option<Coordinate>,
    pub policy: CountryPolicy,
    pub radius_km: u32,
    /// True when the user's own radius replaced the country default.
    pub overridden: bool,
}

impl DiscoveryPlan {
    /// Country default radius for the resolution, unless the user picked
    /// one. A zero override is ignored.
    pub fn from_resolution(
        resolution: &Resolution,
        table: &CountryPolicyTable,
        user_radius_km: Option<u32>,
    ) -> Self {
        let policy = table.lookup(resolution.country_code()).clone();
        let user = user_radius_km.filter(|r| *r > 0);
        Self {
            origin: resolution.coordinate().copied(),
            radius_km: user.unwrap_or(policy.default_radius_km),
            overridden: user.is_some(),
            policy,
        }
    }
}

// ─── Profiles ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

impl DiscoveryProfile {
    fn position(&self) -> Option<Coordinate> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Coordinate::new(lat, lon, None).ok(),
            _ => None,
        }
    }
}

/// Annotate with rounded distance from `origin`, drop profiles beyond
/// `radius_km`, nearest first (ties by id). Profiles without a usable
/// position are kept at the end in their original order.
pub fn rank_by_distance(
    profiles: Vec<DiscoveryProfile>,
    origin: &Coordinate,
    radius_km: u32,
) -> Vec<DiscoveryProfile> {
    let limit = f64::from(radius_km);
    let mut located = Vec::new();
    let mut unlocated = Vec::new();

    for mut profile in profiles {
        match profile.position() {
            Some(position) => {
                let d = origin.distance_to(&position);
                if d <= limit {
                    profile.distance_km = Some(d);
                    located.push(profile);
                }
            }
            None => {
                profile.distance_km = None;
                unlocated.push(profile);
            }
        }
    }

    located.sort_by(|a, b| {
        let (da, db) = (a.distance_km.unwrap_or(f64::MAX), b.distance_km.unwrap_or(f64::MAX));
        da.partial_cmp(&db).unwrap_or(Ordering::Equal).then_with(|| a.id.cmp(&b.id))
    });
    located.extend(unlocated);
    located
}

// ─── Client ─────────────────────────────────────────────────────

#[derive(Debug)]
pub enum DiscoveryError {
    Network(String),
    Status(u16, String),
    InvalidResponse(String),
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Status(code, body) => write!(f, "Backend returned {}: {}", code, body),
            Self::InvalidResponse(msg) => write!(f, "Invalid backend response: {}", msg),
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl From<ureq::Error> for DiscoveryError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(code, response) => {
                let body = response.into_string().unwrap_or_default();
                Self::Status(code, body)
            }
            ureq::Error::Transport(t) => Self::Network(t.to_string()),
        }
    }
}

#[derive(Serialize)]
struct LocationUpdate {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProfilesBody {
    List(Vec<DiscoveryProfile>),
    Wrapped { profiles: Vec<DiscoveryProfile> },
}

pub struct DiscoveryClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl DiscoveryClient {
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// PUT /discovery-settings with the new search origin.
    pub fn update_location(&self, coordinate: &Coordinate) -> Result<(), DiscoveryError> {
        let url = format!("{}/discovery-settings", self.base_url);
        self.agent
            .put(&url)
            .set("Authorization", &self.authorization())
            .send_json(LocationUpdate {
                latitude: coordinate.latitude(),
                longitude: coordinate.longitude(),
            })?;
        info!(%coordinate, "discovery origin updated");
        Ok(())
    }

    /// GET /profiles/discover?radius=N
    pub fn discover(&self, radius_km: u32) -> Result<Vec<DiscoveryProfile>, DiscoveryError> {
        let url = format!("{}/profiles/discover", self.base_url);
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &self.authorization())
            .query("radius", &radius_km.to_string())
            .call()?;

        let body: ProfilesBody = response
            .into_json()
            .map_err(|e| DiscoveryError::InvalidResponse(e.to_string()))?;
        let profiles = match body {
            ProfilesBody::List(p) | ProfilesBody::Wrapped { profiles: p } => p,
        };
        debug!(count = profiles.len(), radius_km, "profiles fetched");
        Ok(profiles)
    }
}
