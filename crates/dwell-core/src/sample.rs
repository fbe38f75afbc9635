//! Sample — one timestamped position report from a device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{self, Coordinate};

/// A single position report.
///
/// `speed_kmh` and `battery_pct` are optional because trackers omit them
/// freely; a missing speed is "unknown", never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
  pub device_id:   String,
  /// Unix seconds.
  pub timestamp:   i64,
  pub lat:         f64,
  pub lon:         f64,
  #[serde(default)]
  pub speed_kmh:   Option<f64>,
  #[serde(default)]
  pub battery_pct: Option<f64>,
}

impl Sample {
  /// False for the `0,0` "no fix" sentinel and for garbage coordinates.
  pub fn has_fix(&self) -> bool { geo::is_valid_fix(self.lat, self.lon) }

  pub fn position(&self) -> Coordinate { Coordinate::new(self.lat, self.lon) }
}

/// Whole minutes between two unix timestamps, rounded half away from zero.
pub fn elapsed_minutes(from: i64, to: i64) -> i64 {
  ((to - from) as f64 / 60.0).round() as i64
}

/// Convert unix seconds to a UTC instant; `None` when out of range.
pub fn to_datetime(unix: i64) -> Option<DateTime<Utc>> {
  DateTime::from_timestamp(unix, 0)
}
