//! Per-poll live decision: should a visit be created now?
//!
//! Combines the stop estimate, the window snapshot and a best-effort
//! engine-state guess. The result is only a proposal; the confirmation gate
//! still has to agree before anything is written.

use serde::{Deserialize, Serialize};

use crate::{
  motion::{DWELL_CANDIDATE_KMH, STATIONARY_KMH},
  window::{BatteryTrend, MovementSnapshot},
};

// ─── Engine state ────────────────────────────────────────────────────────────

/// Best guess at the ignition state. Never ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
  Running,
  Off,
  Unknown,
}

/// A charging battery or a high level while stopped suggests the engine is
/// idling; a draining one suggests it is off.
pub fn infer_engine_state(snapshot: &MovementSnapshot) -> EngineState {
  if snapshot.average_speed_kmh > DWELL_CANDIDATE_KMH {
    return EngineState::Running;
  }
  let Some(battery) = snapshot.current_battery_pct else {
    return EngineState::Unknown;
  };
  if !snapshot.stopped {
    return EngineState::Unknown;
  }
  match snapshot.battery_trend {
    BatteryTrend::Increasing => EngineState::Running,
    _ if battery > 85.0 => EngineState::Running,
    BatteryTrend::Decreasing => EngineState::Off,
    _ => EngineState::Unknown,
  }
}

// ─── Decision ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
  /// Stop length that suffices when another signal backs it up.
  pub min_stop_minutes:  i64,
  /// Stop length that suffices on its own.
  pub long_stop_minutes: i64,
  pub stationary_kmh:    f64,
}

impl Default for DecisionConfig {
  fn default() -> Self {
    Self {
      min_stop_minutes:  5,
      long_stop_minutes: 10,
      stationary_kmh:    STATIONARY_KMH,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
  EngineOff,
  BatteryDraining,
  LongStop,
  Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveDecision {
  pub create:       bool,
  pub reason:       DecisionReason,
  pub engine:       EngineState,
  pub stop_minutes: i64,
}

/// Rules are tried in order; the first match wins.
pub fn decide(
  stop_minutes: i64,
  snapshot: &MovementSnapshot,
  config: &DecisionConfig,
) -> LiveDecision {
  let engine = infer_engine_state(snapshot);
  let still = !snapshot.movement_detected;

  let reason = if engine == EngineState::Off && stop_minutes >= config.min_stop_minutes {
    DecisionReason::EngineOff
  } else if still
    && stop_minutes >= config.min_stop_minutes
    && snapshot.battery_trend == BatteryTrend::Decreasing
  {
    DecisionReason::BatteryDraining
  } else if still
    && stop_minutes >= config.long_stop_minutes
    && snapshot.average_speed_kmh < config.stationary_kmh
  {
    DecisionReason::LongStop
  } else {
    DecisionReason::Waiting
  };

  LiveDecision {
    create: reason != DecisionReason::Waiting,
    reason,
    engine,
    stop_minutes,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parked(trend: BatteryTrend, battery: Option<f64>) -> MovementSnapshot {
    MovementSnapshot {
      stopped: true,
      movement_detected: false,
      battery_trend: trend,
      current_battery_pct: battery,
      sample_count: 10,
      ..Default::default()
    }
  }

  #[test]
  fn engine_state_heuristic() {
    let driving = MovementSnapshot { average_speed_kmh: 30.0, ..Default::default() };
    assert_eq!(infer_engine_state(&driving), EngineState::Running);

    assert_eq!(
      infer_engine_state(&parked(BatteryTrend::Increasing, Some(50.0))),
      EngineState::Running
    );
    assert_eq!(
      infer_engine_state(&parked(BatteryTrend::Stable, Some(90.0))),
      EngineState::Running
    );
    assert_eq!(
      infer_engine_state(&parked(BatteryTrend::Decreasing, Some(70.0))),
      EngineState::Off
    );
    assert_eq!(
      infer_engine_state(&parked(BatteryTrend::Stable, Some(70.0))),
      EngineState::Unknown
    );
    assert_eq!(
      infer_engine_state(&parked(BatteryTrend::Decreasing, None)),
      EngineState::Unknown
    );
  }

  #[test]
  fn engine_off_after_short_stop() {
    let d = decide(5, &parked(BatteryTrend::Decreasing, Some(70.0)), &DecisionConfig::default());
    assert!(d.create);
    assert_eq!(d.reason, DecisionReason::EngineOff);
    assert_eq!(d.engine, EngineState::Off);
  }

  #[test]
  fn draining_battery_without_a_level() {
    let d = decide(6, &parked(BatteryTrend::Decreasing, None), &DecisionConfig::default());
    assert_eq!(d.reason, DecisionReason::BatteryDraining);
  }

  #[test]
  fn long_stop_needs_ten_minutes() {
    let cfg = DecisionConfig::default();
    let snap = parked(BatteryTrend::Unknown, None);
    assert_eq!(decide(9, &snap, &cfg).reason, DecisionReason::Waiting);
    let d = decide(10, &snap, &cfg);
    assert!(d.create);
    assert_eq!(d.reason, DecisionReason::LongStop);
  }

  #[test]
  fn movement_blocks_everything_but_engine_off() {
    let moving = MovementSnapshot {
      movement_detected: true,
      battery_trend: BatteryTrend::Decreasing,
      ..Default::default()
    };
    let d = decide(30, &moving, &DecisionConfig::default());
    assert!(!d.create);
    assert_eq!(d.reason, DecisionReason::Waiting);
  }
}
