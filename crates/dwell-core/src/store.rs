//! The `VisitStore` trait: persistence for the visit confirmation gate.
//!
//! The trait is implemented by storage backends (e.g. `dwell-store-sqlite`).
//! The gate and the live monitor depend on this abstraction, not on any
//! concrete backend, and hold no other state of their own.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::visit::{ConfirmedVisit, Observation, PairActivity};

/// Abstraction over a persisted observation log and confirmed-visit table.
///
/// Backends need not be safe for concurrent writers on the same (vehicle,
/// location) pair; callers serialize per vehicle.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait VisitStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Observations ──────────────────────────────────────────────────────

  /// Append one observation row.
  fn record_observation(
    &self,
    observation: Observation,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Timestamp of the earliest observation of the pair at or after `since`.
  fn first_observation_since(
    &self,
    vehicle_id: String,
    location_id: String,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<DateTime<Utc>>, Self::Error>> + Send + '_;

  /// Delete observations older than `older_than`, then trim the oldest rows
  /// until at most `max_rows` remain. Returns the number of rows deleted.
  fn prune_observations(
    &self,
    older_than: DateTime<Utc>,
    max_rows: u64,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Per-pair aggregates over observations at or after `since`, most
  /// recently seen first. Observations without a location are ignored.
  fn active_pairs(
    &self,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<PairActivity>, Self::Error>> + Send + '_;

  // ── Confirmed visits ──────────────────────────────────────────────────

  /// The newest visit of the pair without an end time.
  fn open_visit(
    &self,
    vehicle_id: String,
    location_id: String,
  ) -> impl Future<Output = Result<Option<ConfirmedVisit>, Self::Error>> + Send + '_;

  /// Every open visit of the vehicle, at any location.
  fn open_visits(
    &self,
    vehicle_id: String,
  ) -> impl Future<Output = Result<Vec<ConfirmedVisit>, Self::Error>> + Send + '_;

  /// The newest visit of the pair, open or ended.
  fn latest_visit(
    &self,
    vehicle_id: String,
    location_id: String,
  ) -> impl Future<Output = Result<Option<ConfirmedVisit>, Self::Error>> + Send + '_;

  /// The newest visit of the pair that started at or after `since` and has
  /// its side effect created.
  fn confirmed_since(
    &self,
    vehicle_id: String,
    location_id: String,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<ConfirmedVisit>, Self::Error>> + Send + '_;

  fn insert_visit(
    &self,
    visit: ConfirmedVisit,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Flag the visit's side effect as created and refresh its duration.
  /// Fails if the visit does not exist.
  fn mark_side_effect(
    &self,
    visit_id: Uuid,
    side_effect_id: Option<String>,
    duration_minutes: i64,
  ) -> impl Future<Output = Result<ConfirmedVisit, Self::Error>> + Send + '_;

  /// Record the end of a visit. Fails if the visit does not exist.
  fn close_visit(
    &self,
    visit_id: Uuid,
    end_time: DateTime<Utc>,
    duration_minutes: i64,
  ) -> impl Future<Output = Result<ConfirmedVisit, Self::Error>> + Send + '_;
}
