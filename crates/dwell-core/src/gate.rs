//! Visit confirmation gate.
//!
//! Debounces the live side effect across polls. Every poll records an
//! observation of the vehicle and its nearest known location; the pair's
//! dwell duration is `now` minus its earliest observation in the trailing
//! lookback window. Only once that crosses the minimum does the gate report
//! the visit as due, and a visit confirmed within the dedup window is never
//! due again.
//!
//! ```text
//! no-visit ──first observation──▶ pending ──duration ≥ min──▶ (due)
//!                                                              │ confirm
//!                                  ended ◀──vehicle left── confirmed
//! ```
//!
//! The gate holds no state of its own; everything lives in the injected
//! [`VisitStore`]. Callers must serialize polls per vehicle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  sample,
  store::VisitStore,
  visit::{
    ConfirmedVisit, NearbyLocation, Observation, PairActivity, VehicleFix,
    VisitState,
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
  pub min_visit_minutes: i64,
  /// Only observations this recent count toward a pending visit.
  pub lookback_minutes:  i64,
  /// A visit confirmed this recently suppresses another confirmation.
  pub dedup_hours:       i64,
  /// Observations older than this are pruned.
  pub retention_hours:   i64,
  /// Hard cap on persisted observations; oldest go first.
  pub max_observations:  u64,
}

impl Default for GateConfig {
  fn default() -> Self {
    Self {
      min_visit_minutes: 5,
      lookback_minutes:  120,
      dedup_hours:       24,
      retention_hours:   24,
      max_observations:  1000,
    }
  }
}

/// Outcome of one [`VisitGate::observe`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
  /// No known location nearby; only the vehicle's trail was recorded.
  NothingNearby,
  Pending {
    location_id:       String,
    duration_minutes:  i64,
    remaining_minutes: i64,
  },
  /// Threshold crossed and not yet confirmed: the caller may fire the side
  /// effect and then call [`VisitGate::confirm`].
  Due {
    location_id:      String,
    duration_minutes: i64,
    started_at:       DateTime<Utc>,
  },
  AlreadyConfirmed { visit: ConfirmedVisit },
  /// Persistence failed this poll; treat as "duration unknown".
  Unknown { location_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
  Confirmed(ConfirmedVisit),
  /// A visit for the pair was already confirmed within the dedup window;
  /// nothing was written.
  AlreadyConfirmed(ConfirmedVisit),
}

pub struct VisitGate<S> {
  store:  S,
  config: GateConfig,
}

impl<S: VisitStore> VisitGate<S> {
  pub fn new(store: S, config: GateConfig) -> Self { Self { store, config } }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &GateConfig { &self.config }

  /// Record one poll for `fix` and evaluate the pair with `nearest`.
  ///
  /// Never fails: persistence errors are logged and reported as
  /// [`GateDecision::Unknown`]. Retention cleanup runs after the decision.
  pub async fn observe(
    &self,
    fix: &VehicleFix,
    nearest: Option<&NearbyLocation>,
    now: DateTime<Utc>,
  ) -> GateDecision {
    let observation = Observation::new(fix, nearest.cloned(), now);

    let decision = match nearest {
      None => {
        if let Err(e) = self.store.record_observation(observation).await {
          tracing::warn!(vehicle_id = %fix.vehicle_id, error = %e, "failed to record observation");
        }
        GateDecision::NothingNearby
      }
      Some(location) => {
        let location_id = location.location.id.clone();
        match self.evaluate(fix, &location_id, observation, now).await {
          Ok(decision) => decision,
          Err(e) => {
            tracing::warn!(
              vehicle_id = %fix.vehicle_id,
              location_id = %location_id,
              error = %e,
              "visit tracking unavailable this poll"
            );
            GateDecision::Unknown { location_id }
          }
        }
      }
    };

    if let Err(e) = self.cleanup(now).await {
      tracing::warn!(error = %e, "observation cleanup failed");
    }

    decision
  }

  async fn evaluate(
    &self,
    fix: &VehicleFix,
    location_id: &str,
    observation: Observation,
    now: DateTime<Utc>,
  ) -> Result<GateDecision, S::Error> {
    self.store.record_observation(observation).await?;

    if let Some(visit) = self.already_confirmed(&fix.vehicle_id, location_id, now).await? {
      tracing::debug!(
        vehicle_id = %fix.vehicle_id,
        location_id,
        visit_id = %visit.visit_id,
        "visit already confirmed"
      );
      return Ok(GateDecision::AlreadyConfirmed { visit });
    }

    let started_at = self
      .pending_since(&fix.vehicle_id, location_id, now)
      .await?
      .unwrap_or(now);
    let duration_minutes =
      sample::elapsed_minutes(started_at.timestamp(), now.timestamp()).max(0);

    if duration_minutes < self.config.min_visit_minutes {
      tracing::debug!(
        vehicle_id = %fix.vehicle_id,
        location_id,
        duration_minutes,
        "visit pending"
      );
      return Ok(GateDecision::Pending {
        location_id: location_id.to_owned(),
        duration_minutes,
        remaining_minutes: self.config.min_visit_minutes - duration_minutes,
      });
    }

    tracing::info!(
      vehicle_id = %fix.vehicle_id,
      location_id,
      duration_minutes,
      "visit due"
    );
    Ok(GateDecision::Due {
      location_id: location_id.to_owned(),
      duration_minutes,
      started_at,
    })
  }

  /// The pair's confirmed visit, if any: an open visit whose side effect
  /// exists (regardless of age), else one confirmed within the dedup window.
  async fn already_confirmed(
    &self,
    vehicle_id: &str,
    location_id: &str,
    now: DateTime<Utc>,
  ) -> Result<Option<ConfirmedVisit>, S::Error> {
    if let Some(open) = self
      .store
      .open_visit(vehicle_id.to_owned(), location_id.to_owned())
      .await?
      && open.side_effect_created
    {
      return Ok(Some(open));
    }
    let since = now - Duration::hours(self.config.dedup_hours);
    self
      .store
      .confirmed_since(vehicle_id.to_owned(), location_id.to_owned(), since)
      .await
  }

  /// Earliest observation of the pair inside the lookback window that is
  /// not older than the end of the pair's last visit.
  async fn pending_since(
    &self,
    vehicle_id: &str,
    location_id: &str,
    now: DateTime<Utc>,
  ) -> Result<Option<DateTime<Utc>>, S::Error> {
    let mut since = now - Duration::minutes(self.config.lookback_minutes);
    if let Some(end) = self
      .store
      .latest_visit(vehicle_id.to_owned(), location_id.to_owned())
      .await?
      .and_then(|v| v.end_time)
    {
      since = since.max(end);
    }
    self
      .store
      .first_observation_since(vehicle_id.to_owned(), location_id.to_owned(), since)
      .await
  }

  /// Mark the pair's visit as confirmed after the side effect was created.
  ///
  /// Idempotent: if the pair's open visit is already confirmed, or a visit
  /// was confirmed within the dedup window, this reports
  /// [`ConfirmOutcome::AlreadyConfirmed`] and writes nothing. Otherwise the pair's open visit is updated, or a new one starting at
  /// `started_at` is inserted.
  pub async fn confirm(
    &self,
    vehicle_id: &str,
    location_id: &str,
    started_at: DateTime<Utc>,
    side_effect_id: Option<String>,
    now: DateTime<Utc>,
  ) -> Result<ConfirmOutcome> {
    if let Some(visit) = self
      .already_confirmed(vehicle_id, location_id, now)
      .await
      .map_err(Error::store)?
    {
      return Ok(ConfirmOutcome::AlreadyConfirmed(visit));
    }

    let open = self
      .store
      .open_visit(vehicle_id.to_owned(), location_id.to_owned())
      .await
      .map_err(Error::store)?;

    let visit = match open {
      Some(existing) => {
        let duration =
          sample::elapsed_minutes(existing.start_time.timestamp(), now.timestamp());
        self
          .store
          .mark_side_effect(existing.visit_id, side_effect_id, duration)
          .await
          .map_err(Error::store)?
      }
      None => {
        let visit = ConfirmedVisit {
          visit_id: Uuid::new_v4(),
          vehicle_id: vehicle_id.to_owned(),
          location_id: location_id.to_owned(),
          start_time: started_at,
          end_time: None,
          duration_minutes: sample::elapsed_minutes(
            started_at.timestamp(),
            now.timestamp(),
          ),
          side_effect_created: true,
          side_effect_id,
          created_at: now,
        };
        self.store.insert_visit(visit.clone()).await.map_err(Error::store)?;
        visit
      }
    };

    tracing::info!(
      vehicle_id,
      location_id,
      visit_id = %visit.visit_id,
      duration_minutes = visit.duration_minutes,
      "visit confirmed"
    );
    Ok(ConfirmOutcome::Confirmed(visit))
  }

  /// End every open visit of the vehicle whose location is not among
  /// `nearby_ids`. Returns the visits that were closed.
  pub async fn end_departed(
    &self,
    vehicle_id: &str,
    nearby_ids: &[String],
    now: DateTime<Utc>,
  ) -> Result<Vec<ConfirmedVisit>> {
    let open = self
      .store
      .open_visits(vehicle_id.to_owned())
      .await
      .map_err(Error::store)?;

    let mut ended = Vec::new();
    for visit in open {
      if nearby_ids.contains(&visit.location_id) {
        continue;
      }
      let duration =
        sample::elapsed_minutes(visit.start_time.timestamp(), now.timestamp()).max(0);
      let closed = self
        .store
        .close_visit(visit.visit_id, now, duration)
        .await
        .map_err(Error::store)?;
      tracing::info!(
        vehicle_id,
        location_id = %closed.location_id,
        duration_minutes = closed.duration_minutes,
        "visit ended"
      );
      ended.push(closed);
    }
    Ok(ended)
  }

  /// Where the pair currently sits in the state machine.
  pub async fn state(
    &self,
    vehicle_id: &str,
    location_id: &str,
    now: DateTime<Utc>,
  ) -> Result<VisitState> {
    let latest = self
      .store
      .latest_visit(vehicle_id.to_owned(), location_id.to_owned())
      .await
      .map_err(Error::store)?;

    if let Some(visit) = &latest
      && visit.is_open()
    {
      return Ok(VisitState::Confirmed { visit: visit.clone() });
    }

    let pending = self
      .pending_since(vehicle_id, location_id, now)
      .await
      .map_err(Error::store)?;

    Ok(match (pending, latest) {
      (Some(first), _) => VisitState::Pending {
        duration_minutes: sample::elapsed_minutes(first.timestamp(), now.timestamp())
          .max(0),
      },
      (None, Some(visit)) => VisitState::Ended { visit },
      (None, None) => VisitState::NoVisit,
    })
  }

  /// Per-pair activity over the lookback window.
  pub async fn active_pairs(&self, now: DateTime<Utc>) -> Result<Vec<PairActivity>> {
    let since = now - Duration::minutes(self.config.lookback_minutes);
    self.store.active_pairs(since).await.map_err(Error::store)
  }

  /// Apply retention and the row cap. Returns the number of rows removed.
  pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64> {
    let cutoff = now - Duration::hours(self.config.retention_hours);
    let removed = self
      .store
      .prune_observations(cutoff, self.config.max_observations)
      .await
      .map_err(Error::store)?;
    if removed > 0 {
      tracing::debug!(removed, "pruned observations");
    }
    Ok(removed)
  }
}
