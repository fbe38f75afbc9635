//! Ports to the external collaborators: the telemetry source, the location
//! directory and the calendar sink.
//!
//! The engine components never call these; the live monitor and the replay
//! workflow do, and treat every failure at this boundary as "no new
//! information" (monitor) or as fatal to the run (replay sink).

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  sample::Sample,
  visit::{Location, NearbyLocation},
};

/// A tracked vehicle as the telemetry source lists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
  pub id:   String,
  pub name: String,
}

pub trait TelemetrySource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn devices(
    &self,
  ) -> impl Future<Output = Result<Vec<Device>, Self::Error>> + Send + '_;

  /// Every sample with `start <= timestamp <= end`, oldest first.
  fn fetch_range(
    &self,
    device_id: String,
    start: i64,
    end: i64,
  ) -> impl Future<Output = Result<Vec<Sample>, Self::Error>> + Send + '_;

  /// The `n` most recent samples, newest first.
  fn fetch_recent(
    &self,
    device_id: String,
    n: usize,
  ) -> impl Future<Output = Result<Vec<Sample>, Self::Error>> + Send + '_;

  /// Samples from the trailing `minutes` before `now`, oldest first.
  fn fetch_last_minutes(
    &self,
    device_id: String,
    minutes: i64,
    now: i64,
  ) -> impl Future<Output = Result<Vec<Sample>, Self::Error>> + Send + '_ {
    self.fetch_range(device_id, now - minutes * 60, now)
  }
}

pub trait LocationDirectory: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Known locations within `radius_m` of the point, nearest first.
  fn nearby(
    &self,
    lat: f64,
    lon: f64,
    radius_m: f64,
  ) -> impl Future<Output = Result<Vec<NearbyLocation>, Self::Error>> + Send + '_;
}

/// What the calendar sink persists for one visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
  pub vehicle_id:   String,
  pub vehicle_name: String,
  pub location:     Location,
  pub start_time:   DateTime<Utc>,
  pub end_time:     DateTime<Utc>,
}

pub trait VisitSink: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist the visit and return the sink's identifier for it.
  fn record_visit(
    &self,
    record: VisitRecord,
  ) -> impl Future<Output = Result<String, Self::Error>> + Send + '_;

  /// Whether the sink already holds a visit for the pair starting at
  /// `start_time`.
  fn has_existing_visit(
    &self,
    vehicle_id: String,
    location_id: String,
    start_time: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}
