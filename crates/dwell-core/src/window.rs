//! Windowed movement analyzer.
//!
//! Aggregates the trailing few minutes of samples into a single snapshot:
//! did the vehicle move, is it stopped, for how long, and which way is the
//! battery heading. Movement is judged on the *cumulative* path length so
//! that stationary jitter, which a point-to-point check reads as constant
//! micro-movement, stays below the threshold.

use serde::{Deserialize, Serialize};

use crate::{
  motion,
  sample::{self, Sample},
};

/// Direction of the battery level across the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryTrend {
  Increasing,
  Decreasing,
  Stable,
  #[default]
  Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
  /// Cumulative path length above which the window counts as movement.
  pub movement_threshold_m: f64,
  /// The latest sample must be below this for the vehicle to be stopped.
  pub stopped_kmh:          f64,
  /// Minimum number of battery readings before a trend is reported.
  pub battery_min_readings: usize,
  /// Swing in percentage points between head and tail means.
  pub battery_swing_pct:    f64,
}

impl Default for WindowConfig {
  fn default() -> Self {
    Self {
      movement_threshold_m: 50.0,
      stopped_kmh:          2.0,
      battery_min_readings: 3,
      battery_swing_pct:    2.0,
    }
  }
}

/// Aggregate view over one analysis window.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MovementSnapshot {
  pub stopped:               bool,
  pub stop_duration_minutes: i64,
  pub movement_detected:     bool,
  pub battery_trend:         BatteryTrend,
  /// Mean of the reported speeds; 0 when none were reported.
  pub average_speed_kmh:     f64,
  pub sample_count:          usize,
  pub total_movement_m:      f64,
  /// Battery level of the newest sample, if it reported one.
  pub current_battery_pct:   Option<f64>,
}

/// Analyse `samples` (any order; sorted internally by timestamp) as of `now`.
///
/// Never fails: an empty window yields [`MovementSnapshot::default`].
pub fn analyze(samples: &[Sample], now: i64, config: &WindowConfig) -> MovementSnapshot {
  if samples.is_empty() {
    return MovementSnapshot::default();
  }

  let mut ordered: Vec<&Sample> = samples.iter().collect();
  ordered.sort_by_key(|s| s.timestamp);

  let fixes: Vec<&Sample> = ordered.iter().copied().filter(|s| s.has_fix()).collect();
  let total_movement_m: f64 = fixes
    .windows(2)
    .map(|w| w[0].position().distance_m(&w[1].position()))
    .sum();
  let movement_detected = total_movement_m > config.movement_threshold_m;

  let speeds: Vec<f64> = ordered
    .iter()
    .filter_map(|s| s.speed_kmh)
    .filter(|v| v.is_finite())
    .collect();
  let average_speed_kmh = if speeds.is_empty() {
    0.0
  } else {
    speeds.iter().sum::<f64>() / speeds.len() as f64
  };

  let latest = ordered[ordered.len() - 1];
  let latest_stopped = !motion::classify(latest.speed_kmh, config.stopped_kmh)
    .counts_as_moving();
  let stopped = !movement_detected && latest_stopped;

  let stop_duration_minutes = if stopped {
    let run_start = ordered
      .iter()
      .rev()
      .take_while(|s| {
        !motion::classify(s.speed_kmh, config.stopped_kmh).counts_as_moving()
      })
      .last()
      .map_or(latest.timestamp, |s| s.timestamp);
    sample::elapsed_minutes(run_start, now).max(0)
  } else {
    0
  };

  let readings: Vec<f64> = ordered
    .iter()
    .filter_map(|s| s.battery_pct)
    .filter(|v| v.is_finite())
    .collect();

  MovementSnapshot {
    stopped,
    stop_duration_minutes,
    movement_detected,
    battery_trend: battery_trend(&readings, config),
    average_speed_kmh,
    sample_count: samples.len(),
    total_movement_m,
    current_battery_pct: latest.battery_pct,
  }
}

/// Compare the mean of the first readings to the mean of the last ones.
pub fn battery_trend(readings: &[f64], config: &WindowConfig) -> BatteryTrend {
  let n = config.battery_min_readings.max(1);
  if readings.len() < n {
    return BatteryTrend::Unknown;
  }

  let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
  let head = mean(&readings[..n]);
  let tail = mean(&readings[readings.len() - n..]);

  if tail > head + config.battery_swing_pct {
    BatteryTrend::Increasing
  } else if tail < head - config.battery_swing_pct {
    BatteryTrend::Decreasing
  } else {
    BatteryTrend::Stable
  }
}
