//! Discovery Locator: where is the user, and how far should discovery look?
//!
//! * [`geo`]: coordinate validation and haversine distance
//! * [`policy`]: per-country default discovery radius
//! * [`location`]: GPS → reverse geocode → GeoIP fallback chain
//! * [`discovery`]: backend client and distance ranking

pub mod config;
pub mod discovery;
pub mod geo;
pub mod location;
pub mod logging;
pub mod policy;
pub mod server;

#[cfg(test)]
mod test_server;
