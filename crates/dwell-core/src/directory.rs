//! An in-memory [`LocationDirectory`] over a fixed list of known locations.

use std::{convert::Infallible, future::Future};

use crate::{
  geo::{self, Coordinate},
  ports::LocationDirectory,
  visit::{Location, NearbyLocation},
};

#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
  locations: Vec<Location>,
}

impl StaticDirectory {
  /// Locations without a usable fix are dropped.
  pub fn new(locations: Vec<Location>) -> Self {
    let locations = locations
      .into_iter()
      .filter(|l| geo::is_valid_fix(l.lat, l.lon))
      .collect();
    Self { locations }
  }

  pub fn locations(&self) -> &[Location] { &self.locations }

  /// Locations within `radius_m`, nearest first; ties broken by id.
  pub fn within(&self, point: Coordinate, radius_m: f64) -> Vec<NearbyLocation> {
    let mut hits: Vec<NearbyLocation> = self
      .locations
      .iter()
      .filter_map(|l| {
        let distance_m = point.distance_m(&l.position());
        (distance_m <= radius_m).then(|| NearbyLocation {
          location: l.clone(),
          distance_m,
        })
      })
      .collect();
    hits.sort_by(|a, b| {
      a.distance_m
        .total_cmp(&b.distance_m)
        .then_with(|| a.location.id.cmp(&b.location.id))
    });
    hits
  }
}

impl LocationDirectory for StaticDirectory {
  type Error = Infallible;

  fn nearby(
    &self,
    lat: f64,
    lon: f64,
    radius_m: f64,
  ) -> impl Future<Output = Result<Vec<NearbyLocation>, Self::Error>> + Send + '_ {
    let hits = self.within(Coordinate::new(lat, lon), radius_m);
    async move { Ok(hits) }
  }
}
