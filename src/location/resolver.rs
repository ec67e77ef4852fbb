//! Location resolver: runs the fallback chain.
//!
//! Standard chain:  GPS (+ reverse geocode) → GeoIP → no data
//! Optional tier:   last known location, appended after GeoIP

use super::providers::{GeoIpProvider, PositionProvider, ReverseGeocoder};
use super::strategy::{GeoIpStrategy, GpsStrategy, LocationStrategy};
use super::types::Resolution;
use crate::config::Config;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// An ordered list of strategies. Tried first to last; the first one that
/// learns anything wins.
pub struct LocationResolver {
    strategies: Vec<Box<dyn LocationStrategy>>,
}

impl LocationResolver {
    pub fn new(strategies: Vec<Box<dyn LocationStrategy>>) -> Self {
        Self { strategies }
    }

    /// GPS then GeoIP, with timeouts and language taken from `config`.
    pub fn standard(
        config: &Config,
        position: Arc<dyn PositionProvider>,
        geocoder: Arc<dyn ReverseGeocoder>,
        geoip: Arc<dyn GeoIpProvider>,
    ) -> Self {
        let gps = GpsStrategy::new(position, geocoder)
            .with_options(config.positioning.options())
            .with_geocode_timeout(Duration::from_secs(config.geocoding.timeout_secs))
            .with_language(config.geocoding.language.clone());
        let geoip = GeoIpStrategy::new(geoip, Duration::from_secs(config.geoip.timeout_secs));

        Self::new(vec![Box::new(gps), Box::new(geoip)])
    }

    /// Append a tier after the existing ones.
    pub fn with_strategy(mut self, strategy: impl LocationStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// One pass over the chain. Never fails: exhausting every tier yields
    /// [`Resolution::NoData`].
    pub async fn resolve(&self) -> Resolution {
        for strategy in &self.strategies {
            match strategy.attempt().await {
                Ok(Resolution::NoData) => {
                    warn!(strategy = strategy.name(), "strategy returned no data");
                }
                Ok(resolution) => {
                    info!(
                        strategy = strategy.name(),
                        tier = resolution.tier(),
                        source = %resolution.source(),
                        country = resolution.country_code().unwrap_or("-"),
                        "location resolved"
                    );
                    return resolution;
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "strategy failed, falling back");
                }
            }
        }

        warn!("every location strategy failed");
        Resolution::NoData
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::location::providers::{Fix, ReportedPosition};
    use crate::location::strategy::LastKnownStrategy;
    use crate::location::types::{Known, LocationError, LocationSource, Place, PositionOptions};
    use crate::policy::CountryPolicyTable;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeGeocoder {
        result: Result<Place, LocationError>,
        calls: AtomicUsize,
    }

    impl FakeGeocoder {
        fn new(result: Result<Place, LocationError>) -> Arc<Self> {
            Arc::new(Self { result, calls: AtomicUsize::new(0) })
        }
    }

    impl ReverseGeocoder for FakeGeocoder {
        fn reverse(&self, _c: &Coordinate, _language: &str) -> Result<Place, LocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct FakeGeoIp {
        result: Result<Place, LocationError>,
        calls: AtomicUsize,
    }

    impl FakeGeoIp {
        fn new(result: Result<Place, LocationError>) -> Arc<Self> {
            Arc::new(Self { result, calls: AtomicUsize::new(0) })
        }
    }

    impl GeoIpProvider for FakeGeoIp {
        fn locate(&self) -> Result<Place, LocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    /// Never answers within the GPS timeout.
    struct StalledPosition;

    impl PositionProvider for StalledPosition {
        fn current_position(&self, _o: &PositionOptions) -> Result<Fix, LocationError> {
            std::thread::sleep(Duration::from_millis(400));
            Ok(Fix { latitude: 1.0, longitude: 1.0, accuracy: None })
        }
    }

    fn network_down() -> LocationError {
        LocationError::ServiceUnavailable("network unreachable".into())
    }

    fn resolver(
        position: Arc<dyn PositionProvider>,
        geocoder: Arc<dyn ReverseGeocoder>,
        geoip: Arc<dyn GeoIpProvider>,
    ) -> LocationResolver {
        LocationResolver::standard(&Config::default(), position, geocoder, geoip)
    }

    #[tokio::test]
    async fn test_gps_denied_falls_back_to_ip() {
        let geocoder = FakeGeocoder::new(Ok(Place::new("CH")));
        let geoip = FakeGeoIp::new(Ok(Place::new("FR")));
        let r = resolver(Arc::new(ReportedPosition::denied()), geocoder.clone(), geoip.clone());

        let resolution = r.resolve().await;
        let flat = resolution.to_resolved();
        assert_eq!(flat.coordinate, None);
        assert_eq!(flat.country_code.as_deref(), Some("FR"));
        assert_eq!(flat.source, LocationSource::Ip);
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(geoip.calls.load(Ordering::SeqCst), 1);

        let table = CountryPolicyTable::builtin();
        assert_eq!(table.lookup(resolution.country_code()).default_radius_km, 50);
    }

    #[tokio::test]
    async fn test_gps_fix_survives_geocode_failure() {
        let geocoder = FakeGeocoder::new(Err(network_down()));
        let geoip = FakeGeoIp::new(Ok(Place::new("FR")));
        let position = Arc::new(ReportedPosition::new(46.8182, 8.2275, None));
        let r = resolver(position, geocoder.clone(), geoip.clone());

        let resolution = r.resolve().await;
        assert_eq!(
            resolution,
            Resolution::Partial {
                known: Known::Coordinate(Coordinate::new(46.8182, 8.2275, None).unwrap()),
                source: LocationSource::Gps,
            }
        );
        assert_eq!(resolution.to_resolved().country_code, None);
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(geoip.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gps_and_geocode_success_is_full() {
        let geocoder = FakeGeocoder::new(Ok(Place::new("ch").with_city("Sarnen")));
        let geoip = FakeGeoIp::new(Err(network_down()));
        let position = Arc::new(ReportedPosition::new(46.8182, 8.2275, Some(6.0)));
        let r = resolver(position, geocoder, geoip.clone());

        let resolution = r.resolve().await;
        assert_eq!(resolution.tier(), "full");
        assert_eq!(resolution.source(), LocationSource::Gps);
        assert_eq!(resolution.country_code(), Some("CH"));
        assert_eq!(resolution.city(), Some("Sarnen"));
        assert_eq!(geoip.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_geoip_blank_country_is_not_a_result() {
        let geocoder = FakeGeocoder::new(Ok(Place::new("CH")));
        let geoip = FakeGeoIp::new(Ok(Place::new("  ")));
        let r = resolver(Arc::new(ReportedPosition::denied()), geocoder, geoip.clone());

        let resolution = r.resolve().await;
        assert_eq!(resolution, Resolution::NoData);
        assert_eq!(resolution.to_resolved().source, LocationSource::None);
        assert_eq!(resolution.to_resolved().country_code, None);
        assert_eq!(geoip.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_geocoded_blank_country_keeps_bare_coordinate() {
        let geocoder = FakeGeocoder::new(Ok(Place::new("").with_city("Nowhere")));
        let geoip = FakeGeoIp::new(Ok(Place::new("FR")));
        let position = Arc::new(ReportedPosition::new(46.8182, 8.2275, None));
        let r = resolver(position, geocoder, geoip.clone());

        let resolution = r.resolve().await;
        assert_eq!(
            resolution,
            Resolution::Partial {
                known: Known::Coordinate(Coordinate::new(46.8182, 8.2275, None).unwrap()),
                source: LocationSource::Gps,
            }
        );
        assert_eq!(resolution.country_code(), None);
        assert_eq!(geoip.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_everything_fails_is_no_data() {
        let r = resolver(
            Arc::new(ReportedPosition::denied()),
            FakeGeocoder::new(Err(network_down())),
            FakeGeoIp::new(Err(network_down())),
        );

        let resolution = r.resolve().await;
        assert_eq!(resolution, Resolution::NoData);
        assert_eq!(resolution.source(), LocationSource::None);

        let table = CountryPolicyTable::builtin();
        assert_eq!(table.lookup(resolution.country_code()).default_radius_km, 25);
    }

    #[tokio::test]
    async fn test_invalid_fix_treated_as_gps_failure() {
        let geocoder = FakeGeocoder::new(Ok(Place::new("CH")));
        let r = resolver(
            Arc::new(ReportedPosition::new(f64::NAN, 8.0, None)),
            geocoder.clone(),
            FakeGeoIp::new(Ok(Place::new("DE"))),
        );

        let resolution = r.resolve().await;
        assert_eq!(resolution.source(), LocationSource::Ip);
        assert_eq!(resolution.country_code(), Some("DE"));
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gps_timeout_falls_back() {
        let mut config = Config::default();
        config.positioning.timeout_ms = 50;
        let r = LocationResolver::standard(
            &config,
            Arc::new(StalledPosition),
            FakeGeocoder::new(Ok(Place::new("CH"))),
            FakeGeoIp::new(Ok(Place::new("SA"))),
        );

        let resolution = r.resolve().await;
        assert_eq!(resolution.source(), LocationSource::Ip);
        assert_eq!(resolution.country_code(), Some("SA"));
    }

    #[tokio::test]
    async fn test_last_known_tier() {
        let cached = Resolution::Partial {
            known: Known::Place(Place::new("NO")),
            source: LocationSource::Cache,
        };
        let r = resolver(
            Arc::new(ReportedPosition::denied()),
            FakeGeocoder::new(Err(network_down())),
            FakeGeoIp::new(Err(network_down())),
        )
        .with_strategy(LastKnownStrategy::new(Some(cached.clone())));

        assert_eq!(r.strategy_names(), vec!["gps", "geoip", "last-known"]);
        assert_eq!(r.resolve().await, cached);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_are_independent() {
        let geoip = FakeGeoIp::new(Ok(Place::new("FR")));
        let r = Arc::new(resolver(
            Arc::new(ReportedPosition::denied()),
            FakeGeocoder::new(Err(network_down())),
            geoip.clone(),
        ));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let r = Arc::clone(&r);
                tokio::spawn(async move { r.resolve().await })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().country_code(), Some("FR"));
        }
        assert_eq!(geoip.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let r = LocationResolver::new(Vec::new());
        assert_eq!(r.resolve().await, Resolution::NoData);
    }
}
