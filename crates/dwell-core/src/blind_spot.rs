//! Configured exclusion zones (home depots, the owner's driveway) where dwells
//! are expected and never worth recording.

use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlindSpot {
  #[serde(default = "default_name")]
  pub name:     String,
  pub lat:      f64,
  pub lon:      f64,
  pub radius_m: f64,
}

fn default_name() -> String { "unnamed blind spot".to_owned() }

/// A blind spot that matched, with the distance to its centre.
#[derive(Debug, Clone, PartialEq)]
pub struct BlindSpotHit<'a> {
  pub spot:       &'a BlindSpot,
  pub distance_m: f64,
}

impl BlindSpot {
  pub fn center(&self) -> Coordinate { Coordinate::new(self.lat, self.lon) }

  /// Inclusive of the boundary.
  pub fn contains(&self, point: Coordinate) -> bool {
    self.center().distance_m(&point) <= self.radius_m
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlindSpots(Vec<BlindSpot>);

impl BlindSpots {
  pub fn new(spots: Vec<BlindSpot>) -> Self { Self(spots) }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = &BlindSpot> { self.0.iter() }

  /// The first configured spot containing `point`.
  pub fn containing(&self, point: Coordinate) -> Option<BlindSpotHit<'_>> {
    self.0.iter().find_map(|spot| {
      let distance_m = spot.center().distance_m(&point);
      (distance_m <= spot.radius_m).then_some(BlindSpotHit { spot, distance_m })
    })
  }
}
