//! Live stop-duration estimator.
//!
//! Answers "how long has this vehicle been stopped, right now?" from the
//! current report and a bounded window of recent reports (newest first).
//! The scan is anchored to the newest valid fix rather than a centroid: it
//! stays O(window) and is not dragged around by slow drift over a long stop.

use serde::{Deserialize, Serialize};

use crate::{
  motion::{self, DWELL_CANDIDATE_KMH, STATIONARY_KMH},
  sample::{self, Sample},
};

/// Tunables for [`estimate_stop_minutes`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopEstimatorConfig {
  /// A current speed at or above this skips the scan entirely.
  pub fast_exit_kmh:     f64,
  /// Window samples must be below this to extend the stop.
  pub stationary_kmh:    f64,
  /// Maximum distance from the anchor that still counts as the same spot.
  pub drift_tolerance_m: f64,
}

impl Default for StopEstimatorConfig {
  fn default() -> Self {
    Self {
      fast_exit_kmh:     DWELL_CANDIDATE_KMH,
      stationary_kmh:    STATIONARY_KMH,
      drift_tolerance_m: 50.0,
    }
  }
}

/// Minutes the vehicle has been continuously stopped up to `current`.
///
/// `recent` must be ordered newest first. Samples without a fix are skipped
/// without ending the scan; a gap between samples never resets it, since
/// elapsed wall-clock time is what counts.
pub fn estimate_stop_minutes(
  current: &Sample,
  recent: &[Sample],
  config: &StopEstimatorConfig,
) -> i64 {
  let current_motion = motion::classify(current.speed_kmh, config.fast_exit_kmh);
  if current_motion.counts_as_moving() {
    return 0;
  }

  let mut valid = recent.iter().filter(|s| s.has_fix());
  let Some(anchor) = valid.clone().next().map(Sample::position) else {
    return 0;
  };

  let now = current.timestamp;
  let mut stop_start = now;

  for s in &mut valid {
    let stopped =
      !motion::classify(s.speed_kmh, config.stationary_kmh).counts_as_moving();
    let within = anchor.distance_m(&s.position()) <= config.drift_tolerance_m;
    if !(stopped && within) {
      break;
    }
    stop_start = stop_start.min(s.timestamp);
  }

  sample::elapsed_minutes(stop_start, now).max(0)
}
