//! Motion classifier: speed → moving / stopped.
//!
//! Two thresholds are used by callers. [`STATIONARY_KMH`] is the
//! fine-grained "effectively stationary" cut used by the live estimator;
//! [`DWELL_CANDIDATE_KMH`] is the coarse "not a dwell candidate" cut used to
//! skip expensive analysis and by the historical segmenter.

use serde::{Deserialize, Serialize};

/// Below this a vehicle is effectively stationary.
pub const STATIONARY_KMH: f64 = 1.0;

/// At or above this a sample can never belong to a dwell.
pub const DWELL_CANDIDATE_KMH: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Motion {
  Moving,
  Stopped,
  /// No speed was reported.
  Unknown,
}

impl Motion {
  /// Conservative reading: anything not positively stopped counts as moving.
  pub fn counts_as_moving(self) -> bool { !matches!(self, Self::Stopped) }
}

pub fn is_moving(speed_kmh: f64, threshold_kmh: f64) -> bool {
  speed_kmh >= threshold_kmh
}

pub fn classify(speed_kmh: Option<f64>, threshold_kmh: f64) -> Motion {
  match speed_kmh {
    Some(v) if v.is_finite() => {
      if is_moving(v, threshold_kmh) {
        Motion::Moving
      } else {
        Motion::Stopped
      }
    }
    _ => Motion::Unknown,
  }
}
