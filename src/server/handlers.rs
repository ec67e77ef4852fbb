use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::geo::{distance_km, is_valid_coordinate};
use crate::location::{
    IpApiLocator, LocationResolver, NominatimGeocoder, ReportedPosition, ResolvedLocation,
};
use crate::policy::CountryPolicy;

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

#[derive(Debug)]
pub(super) struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError(status, msg.into())
}

// ─── GET /api/resolve ────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ResolveQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub accuracy: Option<f64>,
    pub radius: Option<u32>,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub tier: &'static str,
    pub location: ResolvedLocation,
    pub policy: CountryPolicy,
    pub radius_km: u32,
}

/// Resolve with the fix the client reported (if any), falling back to
/// GeoIP on the client's address.
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<ResolveQuery>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let start = Instant::now();

    let position = match (params.lat, params.lon) {
        (Some(lat), Some(lon)) => {
            if !is_valid_coordinate(lat, lon) {
                return Err(api_error(
                    StatusCode::BAD_REQUEST,
                    "Invalid coordinates. Lat: -90..90, Lon: -180..180",
                ));
            }
            ReportedPosition::new(lat, lon, params.accuracy)
        }
        (None, None) => ReportedPosition::denied(),
        _ => {
            return Err(api_error(StatusCode::BAD_REQUEST, "Provide both 'lat' and 'lon', or neither"));
        }
    };

    let config = &state.config;
    let client_ip = client_ip(&headers, peer, &config.server.trusted_proxies);
    let geoip = IpApiLocator::from_config(&config.geoip, &config.geocoding.user_agent)
        .with_client_ip(Some(client_ip));
    let resolver = LocationResolver::standard(
        config,
        Arc::new(position),
        Arc::new(NominatimGeocoder::from_config(&config.geocoding)),
        Arc::new(geoip),
    );

    let resolution = resolver.resolve().await;
    let plan = crate::discovery::DiscoveryPlan::from_resolution(&resolution, &state.policies, params.radius);

    info!(
        client = %client_ip,
        tier = resolution.tier(),
        source = %resolution.source(),
        radius_km = plan.radius_km,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "GET /api/resolve"
    );

    Ok(Json(ResolveResponse {
        tier: resolution.tier(),
        location: resolution.to_resolved(),
        radius_km: plan.radius_km,
        policy: plan.policy,
    }))
}

// ─── GET /api/policy/{code} ──────────────────────────────────────

pub async fn policy(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Json<CountryPolicy> {
    Json(state.policies.lookup(Some(&code)).clone())
}

// ─── GET /api/policies ───────────────────────────────────────────

pub async fn policy_list(State(state): State<Arc<AppState>>) -> Json<Vec<CountryPolicy>> {
    let mut all: Vec<CountryPolicy> = state.policies.entries().cloned().collect();
    all.push(state.policies.default_policy().clone());
    Json(all)
}

// ─── GET /api/distance ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct DistanceQuery {
    pub lat1: Option<f64>,
    pub lon1: Option<f64>,
    pub lat2: Option<f64>,
    pub lon2: Option<f64>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct DistanceResponse {
    pub distance_km: f64,
}

pub async fn distance(Query(params): Query<DistanceQuery>) -> Result<Json<DistanceResponse>, ApiError> {
    let (lat1, lon1, lat2, lon2) = match (params.lat1, params.lon1, params.lat2, params.lon2) {
        (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
        _ => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "Provide 'lat1', 'lon1', 'lat2' and 'lon2' parameters",
            ));
        }
    };
    if !is_valid_coordinate(lat1, lon1) || !is_valid_coordinate(lat2, lon2) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Invalid coordinates. Lat: -90..90, Lon: -180..180",
        ));
    }

    Ok(Json(DistanceResponse {
        distance_km: distance_km(lat1, lon1, lat2, lon2),
    }))
}

// ─── Helpers ─────────────────────────────────────────────────────

/// The socket peer, unless that peer is a trusted proxy; then the first
/// hop of its `X-Forwarded-For` header.
fn client_ip(headers: &HeaderMap, peer: SocketAddr, trusted_proxies: &[IpAddr]) -> IpAddr {
    if !trusted_proxies.contains(&peer.ip()) {
        return peer.ip();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or_else(|| peer.ip())
}
