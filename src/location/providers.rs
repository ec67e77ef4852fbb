//! Location capabilities: device positioning, reverse geocoding and GeoIP.
//!
//! Providers are blocking (ureq, std::net); the strategies run them on
//! tokio's blocking pool and bound each call with a timeout.

use super::types::{LocationError, Place, PositionOptions, Stage};
use crate::config::{GeoIpConfig, GeocodingConfig};
use crate::geo::Coordinate;
use serde::Deserialize;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{IpAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Raw position report, not yet validated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in metres.
    pub accuracy: Option<f64>,
}

/// Platform positioning capability.
pub trait PositionProvider: Send + Sync {
    fn current_position(&self, options: &PositionOptions) -> Result<Fix, LocationError>;
}

/// Coordinates → country and city.
pub trait ReverseGeocoder: Send + Sync {
    fn reverse(&self, coordinate: &Coordinate, language: &str) -> Result<Place, LocationError>;
}

/// Caller's public IP → approximate place.
pub trait GeoIpProvider: Send + Sync {
    fn locate(&self) -> Result<Place, LocationError>;
}

// ─── Reported position ──────────────────────────────────────────

/// A fix handed over by the device (CLI flags, HTTP query). No fix means
/// the user did not grant location access.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportedPosition {
    fix: Option<Fix>,
}

impl ReportedPosition {
    pub fn new(latitude: f64, longitude: f64, accuracy: Option<f64>) -> Self {
        Self {
            fix: Some(Fix { latitude, longitude, accuracy }),
        }
    }

    pub fn denied() -> Self {
        Self { fix: None }
    }
}

impl PositionProvider for ReportedPosition {
    fn current_position(&self, _options: &PositionOptions) -> Result<Fix, LocationError> {
        self.fix.ok_or(LocationError::PermissionDenied)
    }
}

// ─── gpsd ───────────────────────────────────────────────────────

pub const DEFAULT_GPSD_ADDR: &str = "127.0.0.1:2947";

const GPSD_WATCH: &str = "?WATCH={\"enable\":true,\"json\":true};\n";
const GPSD_POLL: &str = "?POLL;\n";

/// Reads fixes from a local gpsd daemon over its JSON socket protocol.
#[derive(Debug, Clone)]
pub struct GpsdPosition {
    addr: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub(crate) struct GpsdTpv {
    #[serde(default)]
    mode: u8,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    epx: Option<f64>,
    #[serde(default)]
    epy: Option<f64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "class")]
pub(crate) enum GpsdReport {
    #[serde(rename = "TPV")]
    Tpv(GpsdTpv),
    #[serde(rename = "POLL")]
    Poll {
        #[serde(default)]
        tpv: Vec<GpsdTpv>,
    },
    #[serde(other)]
    Other,
}

impl GpsdTpv {
    /// A usable fix: 3D when high accuracy is requested, otherwise 2D or better.
    fn to_fix(&self, high_accuracy: bool) -> Option<Fix> {
        let required_mode = if high_accuracy { 3 } else { 2 };
        if self.mode < required_mode {
            return None;
        }
        let accuracy = match (self.epx, self.epy) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (Some(e), None) | (None, Some(e)) => Some(e),
            (None, None) => None,
        };
        Some(Fix {
            latitude: self.lat?,
            longitude: self.lon?,
            accuracy,
        })
    }

    fn age(&self) -> Option<Duration> {
        let time = chrono::DateTime::parse_from_rfc3339(self.time.as_deref()?).ok()?;
        (chrono::Utc::now() - time.with_timezone(&chrono::Utc)).to_std().ok()
    }
}

pub(crate) fn parse_gpsd_line(line: &str) -> Option<GpsdReport> {
    serde_json::from_str(line).ok()
}

impl GpsdPosition {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Default for GpsdPosition {
    fn default() -> Self {
        Self::new(DEFAULT_GPSD_ADDR)
    }
}

impl PositionProvider for GpsdPosition {
    fn current_position(&self, options: &PositionOptions) -> Result<Fix, LocationError> {
        let unavailable = |msg: String| LocationError::ServiceUnavailable(format!("gpsd {}: {}", self.addr, msg));
        let timed_out = || LocationError::Timeout { stage: Stage::Gps, after: options.timeout };

        let addr = self
            .addr
            .to_socket_addrs()
            .map_err(|e| unavailable(e.to_string()))?
            .next()
            .ok_or_else(|| unavailable("no address".into()))?;

        let mut stream = TcpStream::connect_timeout(&addr, options.timeout)
            .map_err(|e| unavailable(e.to_string()))?;
        stream
            .set_read_timeout(Some(options.timeout))
            .map_err(|e| unavailable(e.to_string()))?;

        // A cached report is only acceptable when the caller allows one.
        let allow_cached = !options.maximum_age.is_zero();
        let mut command = GPSD_WATCH.to_string();
        if allow_cached {
            command.push_str(GPSD_POLL);
        }
        stream
            .write_all(command.as_bytes())
            .map_err(|e| unavailable(e.to_string()))?;

        let deadline = Instant::now() + options.timeout;
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            if Instant::now() >= deadline {
                return Err(timed_out());
            }
            let line = match line {
                Ok(l) => l,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(timed_out());
                }
                Err(e) => return Err(unavailable(e.to_string())),
            };
            trace!(line = %line, "gpsd report");

            match parse_gpsd_line(&line) {
                Some(GpsdReport::Tpv(tpv)) => {
                    if let Some(fix) = tpv.to_fix(options.enable_high_accuracy) {
                        return Ok(fix);
                    }
                }
                Some(GpsdReport::Poll { tpv }) if allow_cached => {
                    let cached = tpv.iter().find(|t| {
                        t.age().is_some_and(|age| age <= options.maximum_age)
                    });
                    if let Some(fix) = cached.and_then(|t| t.to_fix(options.enable_high_accuracy)) {
                        debug!("using cached gpsd fix");
                        return Ok(fix);
                    }
                }
                _ => {}
            }
        }

        Err(unavailable("connection closed before a fix".into()))
    }
}

// ─── Nominatim reverse geocoding ────────────────────────────────

#[derive(Deserialize, Debug, Clone, Default)]
pub(crate) struct NominatimReverse {
    #[serde(default)]
    address: Option<NominatimAddress>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub(crate) struct NominatimAddress {
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    town: Option<String>,
    #[serde(default)]
    village: Option<String>,
    #[serde(default)]
    municipality: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

pub(crate) fn place_from_nominatim(body: NominatimReverse) -> Result<Place, LocationError> {
    let address = match body.address {
        Some(a) => a,
        None => {
            let why = body.error.unwrap_or_else(|| "no address in response".into());
            return Err(LocationError::NoMatch(why));
        }
    };

    let code = address
        .country_code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| LocationError::NoMatch("address without country_code".into()))?;

    let city = address
        .city
        .or(address.town)
        .or(address.village)
        .or(address.municipality)
        .or_else(|| address.state.clone());

    Ok(Place {
        country_code: code.trim().to_ascii_uppercase(),
        country_name: address.country,
        city,
        region: address.state,
    })
}

/// Reverse geocoding through an OpenStreetMap Nominatim instance.
pub struct NominatimGeocoder {
    agent: ureq::Agent,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn from_config(config: &GeocodingConfig) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(config.timeout_secs))
                .user_agent(&config.user_agent)
                .build(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl ReverseGeocoder for NominatimGeocoder {
    fn reverse(&self, coordinate: &Coordinate, language: &str) -> Result<Place, LocationError> {
        let url = format!("{}/reverse", self.base_url);
        let response = self
            .agent
            .get(&url)
            .query("lat", &coordinate.latitude().to_string())
            .query("lon", &coordinate.longitude().to_string())
            .query("format", "jsonv2")
            .query("accept-language", language)
            .call()
            .map_err(|e| LocationError::ServiceUnavailable(e.to_string()))?;

        let body: NominatimReverse = response
            .into_json()
            .map_err(|e| LocationError::InvalidResponse(e.to_string()))?;

        place_from_nominatim(body)
    }
}

// ─── IP-based geolocation ───────────────────────────────────────

#[derive(Deserialize, Debug, Clone, Default)]
pub(crate) struct IpApiResult {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: Option<String>,
}

pub(crate) fn place_from_ipapi(r: IpApiResult) -> Result<Place, LocationError> {
    if r.error {
        return Err(LocationError::ServiceUnavailable(
            r.reason.unwrap_or_else(|| "GeoIP lookup failed".into()),
        ));
    }

    let code = r
        .country_code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| LocationError::NoMatch(format!(
            "no country for {}",
            r.ip.as_deref().unwrap_or("caller")
        )))?;

    Ok(Place {
        country_code: code.trim().to_ascii_uppercase(),
        country_name: r.country_name,
        city: r.city,
        region: r.region,
    })
}

/// GeoIP through ipapi.co. Without a client IP the service geolocates
/// the address the request comes from.
pub struct IpApiLocator {
    agent: ureq::Agent,
    base_url: String,
    client_ip: Option<IpAddr>,
}

impl IpApiLocator {
    pub fn from_config(geoip: &GeoIpConfig, user_agent: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(geoip.timeout_secs))
                .user_agent(user_agent)
                .build(),
            base_url: geoip.base_url.trim_end_matches('/').to_string(),
            client_ip: None,
        }
    }

    /// Look up a specific address instead of the requester's.
    pub fn with_client_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.client_ip = ip.filter(|ip| !ip.is_loopback());
        self
    }

    fn url(&self) -> String {
        match self.client_ip {
            Some(ip) => format!("{}/{}/json/", self.base_url, ip),
            None => format!("{}/json/", self.base_url),
        }
    }
}

impl GeoIpProvider for IpApiLocator {
    fn locate(&self) -> Result<Place, LocationError> {
        let response = self
            .agent
            .get(&self.url())
            .call()
            .map_err(|e| LocationError::ServiceUnavailable(e.to_string()))?;

        let r: IpApiResult = response
            .into_json()
            .map_err(|e| LocationError::InvalidResponse(e.to_string()))?;

        place_from_ipapi(r)
    }
}
