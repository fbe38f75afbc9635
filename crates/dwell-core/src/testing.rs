//! In-memory store and fake ports for unit tests.

use std::{
  collections::HashMap,
  future::Future,
  sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
  },
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  directory::StaticDirectory,
  ports::{Device, LocationDirectory, TelemetrySource, VisitRecord, VisitSink},
  sample::Sample,
  store::VisitStore,
  visit::{ConfirmedVisit, NearbyLocation, Observation, PairActivity},
};

#[derive(Debug, thiserror::Error)]
pub enum FakeError {
  #[error("{0} unavailable")]
  Unavailable(&'static str),
  #[error("visit not found: {0}")]
  VisitNotFound(Uuid),
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Tables {
  observations: Vec<Observation>,
  visits:       Vec<ConfirmedVisit>,
}

#[derive(Default)]
pub struct MemoryStore {
  tables:  Mutex<Tables>,
  failing: AtomicBool,
}

impl MemoryStore {
  pub fn set_failing(&self, failing: bool) { self.failing.store(failing, Ordering::SeqCst); }

  pub fn observation_count(&self) -> usize { self.tables.lock().unwrap().observations.len() }

  pub fn visit_count(&self) -> usize { self.tables.lock().unwrap().visits.len() }

  pub fn visits(&self) -> Vec<ConfirmedVisit> { self.tables.lock().unwrap().visits.clone() }

  fn with<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T, FakeError>) -> Result<T, FakeError> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(FakeError::Unavailable("store"));
    }
    f(&mut self.tables.lock().unwrap())
  }
}

fn pair_matches(o: &Observation, vehicle_id: &str, location_id: &str) -> bool {
  o.vehicle_id == vehicle_id
    && o.location.as_ref().is_some_and(|l| l.location.id == location_id)
}

fn newest<'a>(
  visits: impl Iterator<Item = &'a ConfirmedVisit>,
) -> Option<ConfirmedVisit> {
  visits.max_by_key(|v| (v.start_time, v.created_at)).cloned()
}

impl VisitStore for MemoryStore {
  type Error = FakeError;

  fn record_observation(
    &self,
    observation: Observation,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
    let r = self.with(|t| {
      t.observations.push(observation);
      Ok(())
    });
    async move { r }
  }

  fn first_observation_since(
    &self,
    vehicle_id: String,
    location_id: String,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<DateTime<Utc>>, Self::Error>> + Send + '_ {
    let r = self.with(|t| {
      Ok(
        t.observations
          .iter()
          .filter(|o| pair_matches(o, &vehicle_id, &location_id) && o.observed_at >= since)
          .map(|o| o.observed_at)
          .min(),
      )
    });
    async move { r }
  }

  fn prune_observations(
    &self,
    older_than: DateTime<Utc>,
    max_rows: u64,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_ {
    let r = self.with(|t| {
      let before = t.observations.len();
      t.observations.retain(|o| o.observed_at >= older_than);
      t.observations.sort_by_key(|o| o.observed_at);
      let cap = max_rows as usize;
      if t.observations.len() > cap {
        let excess = t.observations.len() - cap;
        t.observations.drain(..excess);
      }
      Ok((before - t.observations.len()) as u64)
    });
    async move { r }
  }

  fn active_pairs(
    &self,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<PairActivity>, Self::Error>> + Send + '_ {
    let r = self.with(|t| {
      let mut pairs: HashMap<(String, String), PairActivity> = HashMap::new();
      for o in t.observations.iter().filter(|o| o.observed_at >= since) {
        let Some(loc) = &o.location else { continue };
        let key = (o.vehicle_id.clone(), loc.location.id.clone());
        let entry = pairs.entry(key).or_insert_with(|| PairActivity {
          vehicle_id:        o.vehicle_id.clone(),
          vehicle_name:      o.vehicle_name.clone(),
          location_id:       loc.location.id.clone(),
          location_name:     loc.location.name.clone(),
          first_seen:        o.observed_at,
          last_seen:         o.observed_at,
          observation_count: 0,
          avg_distance_m:    0.0,
        });
        let n = entry.observation_count as f64;
        entry.avg_distance_m = (entry.avg_distance_m * n + loc.distance_m) / (n + 1.0);
        entry.observation_count += 1;
        entry.first_seen = entry.first_seen.min(o.observed_at);
        entry.last_seen = entry.last_seen.max(o.observed_at);
      }
      let mut pairs: Vec<PairActivity> = pairs.into_values().collect();
      pairs.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
      Ok(pairs)
    });
    async move { r }
  }

  fn open_visit(
    &self,
    vehicle_id: String,
    location_id: String,
  ) -> impl Future<Output = Result<Option<ConfirmedVisit>, Self::Error>> + Send + '_ {
    let r = self.with(|t| {
      Ok(newest(t.visits.iter().filter(|v| {
        v.vehicle_id == vehicle_id && v.location_id == location_id && v.is_open()
      })))
    });
    async move { r }
  }

  fn open_visits(
    &self,
    vehicle_id: String,
  ) -> impl Future<Output = Result<Vec<ConfirmedVisit>, Self::Error>> + Send + '_ {
    let r = self.with(|t| {
      Ok(
        t.visits
          .iter()
          .filter(|v| v.vehicle_id == vehicle_id && v.is_open())
          .cloned()
          .collect(),
      )
    });
    async move { r }
  }

  fn latest_visit(
    &self,
    vehicle_id: String,
    location_id: String,
  ) -> impl Future<Output = Result<Option<ConfirmedVisit>, Self::Error>> + Send + '_ {
    let r = self.with(|t| {
      Ok(newest(
        t.visits
          .iter()
          .filter(|v| v.vehicle_id == vehicle_id && v.location_id == location_id),
      ))
    });
    async move { r }
  }

  fn confirmed_since(
    &self,
    vehicle_id: String,
    location_id: String,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<ConfirmedVisit>, Self::Error>> + Send + '_ {
    let r = self.with(|t| {
      Ok(newest(t.visits.iter().filter(|v| {
        v.vehicle_id == vehicle_id
          && v.location_id == location_id
          && v.side_effect_created
          && v.start_time >= since
      })))
    });
    async move { r }
  }

  fn insert_visit(
    &self,
    visit: ConfirmedVisit,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
    let r = self.with(|t| {
      t.visits.push(visit);
      Ok(())
    });
    async move { r }
  }

  fn mark_side_effect(
    &self,
    visit_id: Uuid,
    side_effect_id: Option<String>,
    duration_minutes: i64,
  ) -> impl Future<Output = Result<ConfirmedVisit, Self::Error>> + Send + '_ {
    let r = self.with(|t| {
      let v = t
        .visits
        .iter_mut()
        .find(|v| v.visit_id == visit_id)
        .ok_or(FakeError::VisitNotFound(visit_id))?;
      v.side_effect_created = true;
      v.side_effect_id = side_effect_id;
      v.duration_minutes = duration_minutes;
      Ok(v.clone())
    });
    async move { r }
  }

  fn close_visit(
    &self,
    visit_id: Uuid,
    end_time: DateTime<Utc>,
    duration_minutes: i64,
  ) -> impl Future<Output = Result<ConfirmedVisit, Self::Error>> + Send + '_ {
    let r = self.with(|t| {
      let v = t
        .visits
        .iter_mut()
        .find(|v| v.visit_id == visit_id)
        .ok_or(FakeError::VisitNotFound(visit_id))?;
      v.end_time = Some(end_time);
      v.duration_minutes = duration_minutes;
      Ok(v.clone())
    });
    async move { r }
  }
}

// ─── Telemetry ───────────────────────────────────────────────────────────────

/// Serves canned samples per device (stored oldest first).
#[derive(Default)]
pub struct FakeTelemetry {
  devices: Vec<Device>,
  samples: Mutex<HashMap<String, Vec<Sample>>>,
  failing: AtomicBool,
}

impl FakeTelemetry {
  pub fn new(devices: Vec<Device>) -> Self { Self { devices, ..Default::default() } }

  pub fn set_samples(&self, device_id: &str, mut samples: Vec<Sample>) {
    samples.sort_by_key(|s| s.timestamp);
    self.samples.lock().unwrap().insert(device_id.to_owned(), samples);
  }

  pub fn set_failing(&self, failing: bool) { self.failing.store(failing, Ordering::SeqCst); }

  fn with<T>(&self, f: impl FnOnce(&[Sample]) -> T, device_id: &str) -> Result<T, FakeError> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(FakeError::Unavailable("telemetry"));
    }
    let samples = self.samples.lock().unwrap();
    Ok(f(samples.get(device_id).map(Vec::as_slice).unwrap_or_default()))
  }
}

impl TelemetrySource for FakeTelemetry {
  type Error = FakeError;

  fn devices(&self) -> impl Future<Output = Result<Vec<Device>, Self::Error>> + Send + '_ {
    let r = if self.failing.load(Ordering::SeqCst) {
      Err(FakeError::Unavailable("telemetry"))
    } else {
      Ok(self.devices.clone())
    };
    async move { r }
  }

  fn fetch_range(
    &self,
    device_id: String,
    start: i64,
    end: i64,
  ) -> impl Future<Output = Result<Vec<Sample>, Self::Error>> + Send + '_ {
    let r = self.with(
      |all| {
        all
          .iter()
          .filter(|s| s.timestamp >= start && s.timestamp <= end)
          .cloned()
          .collect()
      },
      &device_id,
    );
    async move { r }
  }

  fn fetch_recent(
    &self,
    device_id: String,
    n: usize,
  ) -> impl Future<Output = Result<Vec<Sample>, Self::Error>> + Send + '_ {
    let r = self.with(|all| all.iter().rev().take(n).cloned().collect(), &device_id);
    async move { r }
  }
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// [`StaticDirectory`] with a failure switch.
#[derive(Default)]
pub struct FakeDirectory {
  pub inner: StaticDirectory,
  failing:   AtomicBool,
}

impl FakeDirectory {
  pub fn new(inner: StaticDirectory) -> Self { Self { inner, failing: AtomicBool::new(false) } }

  pub fn set_failing(&self, failing: bool) { self.failing.store(failing, Ordering::SeqCst); }
}

impl LocationDirectory for FakeDirectory {
  type Error = FakeError;

  fn nearby(
    &self,
    lat: f64,
    lon: f64,
    radius_m: f64,
  ) -> impl Future<Output = Result<Vec<NearbyLocation>, Self::Error>> + Send + '_ {
    let r = if self.failing.load(Ordering::SeqCst) {
      Err(FakeError::Unavailable("directory"))
    } else {
      Ok(self.inner.within(crate::geo::Coordinate::new(lat, lon), radius_m))
    };
    async move { r }
  }
}

// ─── Sink ────────────────────────────────────────────────────────────────────

/// Records visits in memory and hands out sequential ids.
#[derive(Default)]
pub struct FakeSink {
  records: Mutex<Vec<(String, VisitRecord)>>,
  failing: AtomicBool,
}

impl FakeSink {
  pub fn set_failing(&self, failing: bool) { self.failing.store(failing, Ordering::SeqCst); }

  pub fn records(&self) -> Vec<(String, VisitRecord)> { self.records.lock().unwrap().clone() }
}

impl VisitSink for FakeSink {
  type Error = FakeError;

  fn record_visit(
    &self,
    record: VisitRecord,
  ) -> impl Future<Output = Result<String, Self::Error>> + Send + '_ {
    let r = if self.failing.load(Ordering::SeqCst) {
      Err(FakeError::Unavailable("sink"))
    } else {
      let mut records = self.records.lock().unwrap();
      let id = format!("evt-{}", records.len() + 1);
      records.push((id.clone(), record));
      Ok(id)
    };
    async move { r }
  }

  fn has_existing_visit(
    &self,
    vehicle_id: String,
    location_id: String,
    start_time: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_ {
    let r = if self.failing.load(Ordering::SeqCst) {
      Err(FakeError::Unavailable("sink"))
    } else {
      Ok(self.records.lock().unwrap().iter().any(|(_, r)| {
        r.vehicle_id == vehicle_id
          && r.location.id == location_id
          && r.start_time == start_time
      }))
    };
    async move { r }
  }
}
