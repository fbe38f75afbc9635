//! Live monitor: one polling tick per vehicle.
//!
//! Each tick fetches the recent sample window and the trailing analysis
//! window, runs the stop estimator and the window analyzer, proposes a
//! decision, and feeds the nearest known location through the confirmation
//! gate. A visit is only written to the sink when the decision proposes one
//! *and* the gate reports it due. Vehicles whose visit location is no longer
//! nearby get their visits ended.
//!
//! Upstream fetch failures carry no information: the tick stops early and
//! neither resets nor ends anything.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
  Error, Result,
  decision::{self, DecisionConfig, LiveDecision},
  gate::{ConfirmOutcome, GateDecision, VisitGate},
  live::{self, StopEstimatorConfig},
  ports::{Device, LocationDirectory, TelemetrySource, VisitRecord, VisitSink},
  sample::Sample,
  store::VisitStore,
  visit::{ConfirmedVisit, NearbyLocation, VehicleFix},
  window::{self, MovementSnapshot, WindowConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
  /// Locations further away than this are not "nearby".
  pub proximity_radius_m: f64,
  /// Size of the newest-first window handed to the stop estimator.
  pub recent_samples:     usize,
  /// Length of the trailing window handed to the analyzer.
  pub window_minutes:     i64,
  /// Evaluate everything but never write to the sink or confirm.
  pub dry_run:            bool,
  pub estimator:          StopEstimatorConfig,
  pub window:             WindowConfig,
  pub decision:           DecisionConfig,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      proximity_radius_m: 500.0,
      recent_samples:     100,
      window_minutes:     30,
      dry_run:            false,
      estimator:          StopEstimatorConfig::default(),
      window:             WindowConfig::default(),
      decision:           DecisionConfig::default(),
    }
  }
}

/// What the tick did about a visit.
#[derive(Debug, Clone, PartialEq)]
pub enum VisitAction {
  /// Decision or gate said not yet.
  None,
  Created { location_id: String, side_effect_id: String },
  /// Dry run: a visit would have been created.
  WouldCreate { location_id: String },
  /// The sink already had it; the gate was confirmed without a new entry.
  AlreadyInSink { location_id: String },
  AlreadyConfirmed { location_id: String },
}

/// Everything a tick learned about one vehicle.
#[derive(Debug, Clone)]
pub struct PollReport {
  pub vehicle_id:   String,
  pub vehicle_name: String,
  /// `None` when the telemetry or the directory could not be reached or the
  /// vehicle has no fix; nothing else below is then populated.
  pub analysis:     Option<Analysis>,
  pub action:       VisitAction,
  pub ended:        Vec<ConfirmedVisit>,
}

#[derive(Debug, Clone)]
pub struct Analysis {
  pub current:      Sample,
  pub stop_minutes: i64,
  pub snapshot:     MovementSnapshot,
  pub decision:     LiveDecision,
  pub nearby:       Vec<NearbyLocation>,
  pub gate:         GateDecision,
}

impl PollReport {
  fn no_data(device: &Device) -> Self {
    Self {
      vehicle_id:   device.id.clone(),
      vehicle_name: device.name.clone(),
      analysis:     None,
      action:       VisitAction::None,
      ended:        Vec::new(),
    }
  }
}

pub struct Monitor<T, D, K, S> {
  telemetry: T,
  directory: D,
  sink:      K,
  gate:      VisitGate<S>,
  config:    MonitorConfig,
  locks:     Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<T, D, K, S> Monitor<T, D, K, S>
where
  T: TelemetrySource,
  D: LocationDirectory,
  K: VisitSink,
  S: VisitStore,
{
  pub fn new(
    telemetry: T,
    directory: D,
    sink: K,
    gate: VisitGate<S>,
    config: MonitorConfig,
  ) -> Self {
    Self {
      telemetry,
      directory,
      sink,
      gate,
      config,
      locks: Mutex::new(HashMap::new()),
    }
  }

  pub fn gate(&self) -> &VisitGate<S> { &self.gate }

  pub fn sink(&self) -> &K { &self.sink }

  pub fn telemetry(&self) -> &T { &self.telemetry }

  pub fn directory(&self) -> &D { &self.directory }

  async fn vehicle_lock(&self, vehicle_id: &str) -> Arc<Mutex<()>> {
    let mut locks = self.locks.lock().await;
    locks.entry(vehicle_id.to_owned()).or_default().clone()
  }

  /// Poll every device the telemetry source lists, one after another.
  ///
  /// A failure on one vehicle is logged and does not stop the others.
  pub async fn poll_fleet(&self, now: DateTime<Utc>) -> Result<Vec<PollReport>> {
    let devices = self.telemetry.devices().await.map_err(Error::telemetry)?;
    let mut reports = Vec::with_capacity(devices.len());
    for device in &devices {
      match self.poll_vehicle(device, now).await {
        Ok(report) => reports.push(report),
        Err(e) => {
          tracing::error!(vehicle_id = %device.id, error = %e, "poll failed");
        }
      }
    }
    Ok(reports)
  }

  /// One tick for one vehicle. Holds the vehicle's lock throughout.
  ///
  /// Fails only when the sink or the gate fail while a visit is being
  /// created; the next tick retries.
  pub async fn poll_vehicle(&self, device: &Device, now: DateTime<Utc>) -> Result<PollReport> {
    let lock = self.vehicle_lock(&device.id).await;
    let _guard = lock.lock().await;

    let Some(analysis) = self.analyse(device, now).await else {
      return Ok(PollReport::no_data(device));
    };

    let action = self.act(device, &analysis, now).await?;

    let nearby_ids: Vec<String> =
      analysis.nearby.iter().map(|n| n.location.id.clone()).collect();
    let ended = match self.gate.end_departed(&device.id, &nearby_ids, now).await {
      Ok(ended) => ended,
      Err(e) => {
        tracing::warn!(vehicle_id = %device.id, error = %e, "could not end departed visits");
        Vec::new()
      }
    };

    Ok(PollReport {
      vehicle_id: device.id.clone(),
      vehicle_name: device.name.clone(),
      analysis: Some(analysis),
      action,
      ended,
    })
  }

  async fn analyse(&self, device: &Device, now: DateTime<Utc>) -> Option<Analysis> {
    let recent = match self
      .telemetry
      .fetch_recent(device.id.clone(), self.config.recent_samples)
      .await
    {
      Ok(samples) => samples,
      Err(e) => {
        tracing::warn!(vehicle_id = %device.id, error = %e, "recent samples unavailable");
        return None;
      }
    };
    let Some(current) = recent.iter().find(|s| s.has_fix()).cloned() else {
      tracing::debug!(vehicle_id = %device.id, "no fix in recent samples");
      return None;
    };

    let trailing = match self
      .telemetry
      .fetch_last_minutes(device.id.clone(), self.config.window_minutes, now.timestamp())
      .await
    {
      Ok(samples) => samples,
      Err(e) => {
        tracing::warn!(vehicle_id = %device.id, error = %e, "analysis window unavailable");
        return None;
      }
    };

    let nearby = match self
      .directory
      .nearby(current.lat, current.lon, self.config.proximity_radius_m)
      .await
    {
      Ok(nearby) => nearby,
      Err(e) => {
        tracing::warn!(vehicle_id = %device.id, error = %e, "location directory unavailable");
        return None;
      }
    };

    let stop_minutes = live::estimate_stop_minutes(&current, &recent, &self.config.estimator);
    let snapshot = window::analyze(&trailing, now.timestamp(), &self.config.window);
    let decision = decision::decide(stop_minutes, &snapshot, &self.config.decision);

    let fix = VehicleFix {
      vehicle_id:   device.id.clone(),
      vehicle_name: device.name.clone(),
      lat:          current.lat,
      lon:          current.lon,
    };
    let gate = self.gate.observe(&fix, nearby.first(), now).await;

    tracing::debug!(
      vehicle_id = %device.id,
      stop_minutes,
      movement = snapshot.movement_detected,
      create = decision.create,
      nearby = nearby.len(),
      "vehicle analysed"
    );

    Some(Analysis { current, stop_minutes, snapshot, decision, nearby, gate })
  }

  async fn act(
    &self,
    device: &Device,
    analysis: &Analysis,
    now: DateTime<Utc>,
  ) -> Result<VisitAction> {
    if !analysis.decision.create {
      return Ok(VisitAction::None);
    }
    let (location_id, started_at) = match &analysis.gate {
      GateDecision::Due { location_id, started_at, .. } => (location_id.clone(), *started_at),
      GateDecision::AlreadyConfirmed { visit } => {
        return Ok(VisitAction::AlreadyConfirmed { location_id: visit.location_id.clone() });
      }
      _ => return Ok(VisitAction::None),
    };
    let Some(nearest) = analysis.nearby.first() else {
      return Ok(VisitAction::None);
    };

    if self.config.dry_run {
      tracing::info!(vehicle_id = %device.id, location_id = %location_id, "dry run: visit would be created");
      return Ok(VisitAction::WouldCreate { location_id });
    }

    let exists = self
      .sink
      .has_existing_visit(device.id.clone(), location_id.clone(), started_at)
      .await
      .map_err(Error::sink)?;
    if exists {
      self.gate.confirm(&device.id, &location_id, started_at, None, now).await?;
      return Ok(VisitAction::AlreadyInSink { location_id });
    }

    let side_effect_id = self
      .sink
      .record_visit(VisitRecord {
        vehicle_id:   device.id.clone(),
        vehicle_name: device.name.clone(),
        location:     nearest.location.clone(),
        start_time:   started_at,
        end_time:     now,
      })
      .await
      .map_err(Error::sink)?;

    match self
      .gate
      .confirm(&device.id, &location_id, started_at, Some(side_effect_id.clone()), now)
      .await?
    {
      ConfirmOutcome::Confirmed(_) => Ok(VisitAction::Created { location_id, side_effect_id }),
      ConfirmOutcome::AlreadyConfirmed(_) => Ok(VisitAction::AlreadyConfirmed { location_id }),
    }
  }
}
