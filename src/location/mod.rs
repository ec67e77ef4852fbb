//! Location subsystem.
//!
//! Resolves the device's position through an ordered fallback chain
//! (GPS with reverse geocoding, then GeoIP, optionally a last known
//! location) and always produces some [`Resolution`].

pub mod cache;
pub mod providers;
pub mod resolver;
pub mod strategy;
pub mod types;

pub use cache::LocationCache;
pub use providers::{
    Fix, GeoIpProvider, GpsdPosition, IpApiLocator, NominatimGeocoder, PositionProvider,
    ReportedPosition, ReverseGeocoder,
};
pub use resolver::LocationResolver;
pub use strategy::{GeoIpStrategy, GpsStrategy, LastKnownStrategy, LocationStrategy};
pub use types::{
    Known, LocationError, LocationSource, Place, PositionOptions, Resolution, ResolvedLocation,
    Stage,
};
