//! Geolocation port. Building the database is out of scope; the pipeline
//! only issues lookups.

use std::net::IpAddr;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

pub trait GeoLookup: Send + Sync + 'static {
    fn lookup(&self, ip: IpAddr) -> Option<GeoPoint>;
}

/// Default lookup that knows nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopGeo;

impl GeoLookup for NoopGeo {
    fn lookup(&self, _ip: IpAddr) -> Option<GeoPoint> {
        None
    }
}
