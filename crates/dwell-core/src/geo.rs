//! Great-circle distance and fix validation.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS-84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
  pub lat: f64,
  pub lon: f64,
}

impl Coordinate {
  pub fn new(lat: f64, lon: f64) -> Self { Self { lat, lon } }

  pub fn distance_m(&self, other: &Coordinate) -> f64 {
    haversine_m(*self, *other)
  }
}

/// Haversine distance between two coordinates, in metres.
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
  let lat1 = a.lat.to_radians();
  let lat2 = b.lat.to_radians();
  let d_lat = (b.lat - a.lat).to_radians();
  let d_lon = (b.lon - a.lon).to_radians();

  let h = (d_lat / 2.0).sin().powi(2)
    + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

  2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Whether `lat`/`lon` describe a usable fix.
///
/// Exactly `0,0` is the telemetry source's "no fix" sentinel and is never a
/// real position.
pub fn is_valid_fix(lat: f64, lon: f64) -> bool {
  if !lat.is_finite() || !lon.is_finite() {
    return false;
  }
  if lat == 0.0 && lon == 0.0 {
    return false;
  }
  (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Running arithmetic mean of coordinates, updated one member at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningCentroid {
  lat_sum: f64,
  lon_sum: f64,
  count:   usize,
}

impl RunningCentroid {
  pub fn push(&mut self, c: Coordinate) {
    self.lat_sum += c.lat;
    self.lon_sum += c.lon;
    self.count += 1;
  }

  pub fn len(&self) -> usize { self.count }

  pub fn is_empty(&self) -> bool { self.count == 0 }

  /// The current mean, or `None` before the first member.
  pub fn centroid(&self) -> Option<Coordinate> {
    (self.count > 0).then(|| Coordinate {
      lat: self.lat_sum / self.count as f64,
      lon: self.lon_sum / self.count as f64,
    })
  }
}
