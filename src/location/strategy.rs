//! Fallback tiers. Each strategy either produces a [`Resolution`] or
//! reports why it could not, and the resolver moves on to the next one.

use super::providers::{GeoIpProvider, PositionProvider, ReverseGeocoder};
use super::types::{
    Known, LocationError, LocationSource, Place, PositionOptions, Resolution, Stage,
};
use crate::geo::Coordinate;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait LocationStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn attempt(&self) -> BoxFuture<'_, Result<Resolution, LocationError>>;
}

/// Run a blocking provider call on the blocking pool, giving up after `limit`.
///
/// A call that times out keeps running in the background until its own
/// I/O returns; only the wait is abandoned.
pub(crate) async fn run_blocking<T, F>(stage: Stage, limit: Duration, f: F) -> Result<T, LocationError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, LocationError> + Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(LocationError::ServiceUnavailable(format!("{} task failed: {}", stage, join))),
        Err(_) => Err(LocationError::Timeout { stage, after: limit }),
    }
}

/// A place only counts once it names a country.
fn attributed(place: Place) -> Result<Place, LocationError> {
    if place.country_code.trim().is_empty() {
        return Err(LocationError::NoMatch("response has no country code".into()));
    }
    Ok(place)
}

// ─── GPS + reverse geocode ──────────────────────────────────────

/// Device fix, then country attribution. A fix whose geocoding fails is
/// still returned as a partial resolution.
pub struct GpsStrategy {
    position: Arc<dyn PositionProvider>,
    geocoder: Arc<dyn ReverseGeocoder>,
    options: PositionOptions,
    geocode_timeout: Duration,
    language: String,
}

impl GpsStrategy {
    pub fn new(position: Arc<dyn PositionProvider>, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        Self {
            position,
            geocoder,
            options: PositionOptions::default(),
            geocode_timeout: Duration::from_secs(5),
            language: "en".to_string(),
        }
    }

    pub fn with_options(mut self, options: PositionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_geocode_timeout(mut self, timeout: Duration) -> Self {
        self.geocode_timeout = timeout;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

impl LocationStrategy for GpsStrategy {
    fn name(&self) -> &'static str {
        "gps"
    }

    fn attempt(&self) -> BoxFuture<'_, Result<Resolution, LocationError>> {
        Box::pin(async move {
            let position = Arc::clone(&self.position);
            let options = self.options;
            let fix = run_blocking(Stage::Gps, options.timeout, move || {
                position.current_position(&options)
            })
            .await?;

            let coordinate = Coordinate::new(fix.latitude, fix.longitude, fix.accuracy)
                .map_err(|e| LocationError::InvalidResponse(e.to_string()))?;
            debug!(%coordinate, "GPS fix acquired");

            let geocoder = Arc::clone(&self.geocoder);
            let language = self.language.clone();
            let geocoded = run_blocking(Stage::ReverseGeocode, self.geocode_timeout, move || {
                geocoder.reverse(&coordinate, &language)
            })
            .await;

            match geocoded.and_then(attributed) {
                Ok(place) => Ok(Resolution::Full {
                    coordinate,
                    place,
                    source: LocationSource::Gps,
                }),
                Err(e) => {
                    warn!(error = %e, "reverse geocoding failed, keeping bare coordinate");
                    Ok(Resolution::Partial {
                        known: Known::Coordinate(coordinate),
                        source: LocationSource::Gps,
                    })
                }
            }
        })
    }
}

// ─── GeoIP ──────────────────────────────────────────────────────

pub struct GeoIpStrategy {
    provider: Arc<dyn GeoIpProvider>,
    timeout: Duration,
}

impl GeoIpStrategy {
    pub fn new(provider: Arc<dyn GeoIpProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }
}

impl LocationStrategy for GeoIpStrategy {
    fn name(&self) -> &'static str {
        "geoip"
    }

    fn attempt(&self) -> BoxFuture<'_, Result<Resolution, LocationError>> {
        Box::pin(async move {
            let provider = Arc::clone(&self.provider);
            let place = run_blocking(Stage::GeoIp, self.timeout, move || provider.locate())
                .await
                .and_then(attributed)?;
            Ok(Resolution::Partial {
                known: Known::Place(place),
                source: LocationSource::Ip,
            })
        })
    }
}

// ─── Last known location ────────────────────────────────────────

/// Replays a previously stored resolution. Built from a cache snapshot so
/// resolving never touches the disk.
pub struct LastKnownStrategy {
    last: Option<Resolution>,
}

impl LastKnownStrategy {
    pub fn new(last: Option<Resolution>) -> Self {
        Self { last }
    }

    pub fn from_cache(cache: &super::cache::LocationCache) -> Self {
        Self::new(cache.most_recent())
    }
}

impl LocationStrategy for LastKnownStrategy {
    fn name(&self) -> &'static str {
        "last-known"
    }

    fn attempt(&self) -> BoxFuture<'_, Result<Resolution, LocationError>> {
        Box::pin(async move {
            self.last
                .clone()
                .ok_or_else(|| LocationError::NoMatch("no cached location".into()))
        })
    }
}
