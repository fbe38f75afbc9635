//! Live-mode visit types: known locations, observations and confirmed
//! visits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinate;

// ─── Locations ───────────────────────────────────────────────────────────────

/// A known place a vehicle can visit (a customer site, a depot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
  pub id:   String,
  pub name: String,
  pub lat:  f64,
  pub lon:  f64,
}

impl Location {
  pub fn position(&self) -> Coordinate { Coordinate::new(self.lat, self.lon) }
}

/// A [`Location`] returned by a proximity query, with its distance from the
/// query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyLocation {
  #[serde(flatten)]
  pub location:   Location,
  pub distance_m: f64,
}

/// The vehicle side of one poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleFix {
  pub vehicle_id:   String,
  pub vehicle_name: String,
  pub lat:          f64,
  pub lon:          f64,
}

// ─── Observations ────────────────────────────────────────────────────────────

/// One row per poll per (vehicle, nearest location) pair.
///
/// `location` is `None` when nothing was nearby; such rows keep the vehicle's
/// trail but never contribute to a visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
  pub observation_id: Uuid,
  pub vehicle_id:     String,
  pub vehicle_name:   String,
  pub vehicle_lat:    f64,
  pub vehicle_lon:    f64,
  pub location:       Option<NearbyLocation>,
  pub observed_at:    DateTime<Utc>,
}

impl Observation {
  pub fn new(
    fix: &VehicleFix,
    location: Option<NearbyLocation>,
    observed_at: DateTime<Utc>,
  ) -> Self {
    Self {
      observation_id: Uuid::new_v4(),
      vehicle_id: fix.vehicle_id.clone(),
      vehicle_name: fix.vehicle_name.clone(),
      vehicle_lat: fix.lat,
      vehicle_lon: fix.lon,
      location,
      observed_at,
    }
  }
}

// ─── Confirmed visits ────────────────────────────────────────────────────────

/// A (vehicle, location) dwell that crossed the minimum-duration threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedVisit {
  pub visit_id:            Uuid,
  pub vehicle_id:          String,
  pub location_id:         String,
  pub start_time:          DateTime<Utc>,
  /// `None` while the vehicle is still there.
  pub end_time:            Option<DateTime<Utc>>,
  pub duration_minutes:    i64,
  pub side_effect_created: bool,
  /// Identifier the calendar sink returned, if any.
  pub side_effect_id:      Option<String>,
  pub created_at:          DateTime<Utc>,
}

impl ConfirmedVisit {
  pub fn is_open(&self) -> bool { self.end_time.is_none() }
}

// ─── State ───────────────────────────────────────────────────────────────────

/// Where a (vehicle, location) pair sits in the confirmation state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VisitState {
  NoVisit,
  Pending { duration_minutes: i64 },
  Confirmed { visit: ConfirmedVisit },
  Ended { visit: ConfirmedVisit },
}

/// Aggregate of recent observations for one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairActivity {
  pub vehicle_id:        String,
  pub vehicle_name:      String,
  pub location_id:       String,
  pub location_name:     String,
  pub first_seen:        DateTime<Utc>,
  pub last_seen:         DateTime<Utc>,
  pub observation_count: u64,
  pub avg_distance_m:    f64,
}

impl PairActivity {
  /// Minutes between the first and last observation.
  pub fn duration_minutes(&self) -> i64 {
    (self.last_seen - self.first_seen).num_minutes()
  }
}
