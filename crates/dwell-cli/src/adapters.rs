//! File-backed implementations of the external ports.
//!
//! - [`JsonTelemetry`] reads a samples file that an external feeder keeps
//!   current; it is re-read on every call.
//! - [`load_locations`] reads the known-location list into a
//!   [`StaticDirectory`].
//! - [`JournalSink`] appends visits to a JSON-lines journal under
//!   deterministic ids, so replays and retries never duplicate entries.

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use dwell_core::{
  directory::StaticDirectory,
  ports::{Device, TelemetrySource, VisitRecord, VisitSink},
  sample::Sample,
  visit::Location,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
  #[error("failed to read {path}: {source}")]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("malformed {path}: {source}")]
  Json {
    path:   PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, AdapterError> {
  let bytes = tokio::fs::read(path).await.map_err(|source| AdapterError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  serde_json::from_slice(&bytes).map_err(|source| AdapterError::Json {
    path: path.to_path_buf(),
    source,
  })
}

// ─── Telemetry ───────────────────────────────────────────────────────────────

/// On-disk shape of the samples file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SampleFile {
  /// Optional; devices are otherwise derived from the samples.
  #[serde(default)]
  pub devices: Vec<Device>,
  pub samples: Vec<Sample>,
}

impl SampleFile {
  fn devices(&self) -> Vec<Device> {
    if !self.devices.is_empty() {
      return self.devices.clone();
    }
    let mut ids: Vec<&str> = self.samples.iter().map(|s| s.device_id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
      .into_iter()
      .map(|id| Device { id: id.to_owned(), name: id.to_owned() })
      .collect()
  }

  /// The device's samples, oldest first; equal timestamps keep file order.
  fn for_device(self, device_id: &str) -> Vec<Sample> {
    let mut samples: Vec<Sample> = self
      .samples
      .into_iter()
      .filter(|s| s.device_id == device_id)
      .collect();
    samples.sort_by_key(|s| s.timestamp);
    samples
  }
}

pub struct JsonTelemetry {
  path: PathBuf,
}

impl JsonTelemetry {
  pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

  async fn load(&self) -> Result<SampleFile, AdapterError> { read_json(&self.path).await }
}

impl TelemetrySource for JsonTelemetry {
  type Error = AdapterError;

  async fn devices(&self) -> Result<Vec<Device>, AdapterError> {
    Ok(self.load().await?.devices())
  }

  async fn fetch_range(
    &self,
    device_id: String,
    start: i64,
    end: i64,
  ) -> Result<Vec<Sample>, AdapterError> {
    let mut samples = self.load().await?.for_device(&device_id);
    samples.retain(|s| (start..=end).contains(&s.timestamp));
    Ok(samples)
  }

  async fn fetch_recent(
    &self,
    device_id: String,
    n: usize,
  ) -> Result<Vec<Sample>, AdapterError> {
    let samples = self.load().await?.for_device(&device_id);
    Ok(samples.into_iter().rev().take(n).collect())
  }
}

// ─── Locations ───────────────────────────────────────────────────────────────

pub async fn load_locations(path: &Path) -> Result<StaticDirectory, AdapterError> {
  let locations: Vec<Location> = read_json(path).await?;
  Ok(StaticDirectory::new(locations))
}

// ─── Journal sink ────────────────────────────────────────────────────────────

/// One line of the visit journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
  pub id:            String,
  pub vehicle_id:    String,
  pub vehicle_name:  String,
  pub location_id:   String,
  pub location_name: String,
  pub start_time:    DateTime<Utc>,
  pub end_time:      DateTime<Utc>,
}

/// `dwell-<vehicle>-<location>-<YYYYMMDD>-<HHMM>` in UTC.
pub fn event_id(vehicle_id: &str, location_id: &str, start: DateTime<Utc>) -> String {
  format!("dwell-{vehicle_id}-{location_id}-{}", start.format("%Y%m%d-%H%M"))
}

pub struct JournalSink {
  path: PathBuf,
}

impl JournalSink {
  pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

  /// Entries keyed by id; a missing journal is empty.
  pub async fn entries(&self) -> Result<BTreeMap<String, JournalEntry>, AdapterError> {
    let text = match tokio::fs::read_to_string(&self.path).await {
      Ok(text) => text,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
      Err(source) => return Err(self.io(source)),
    };
    let mut entries = BTreeMap::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
      let entry: JournalEntry =
        serde_json::from_str(line).map_err(|source| AdapterError::Json {
          path: self.path.clone(),
          source,
        })?;
      entries.insert(entry.id.clone(), entry);
    }
    Ok(entries)
  }

  async fn write_all(
    &self,
    entries: &BTreeMap<String, JournalEntry>,
  ) -> Result<(), AdapterError> {
    let mut out = String::new();
    for entry in entries.values() {
      let line = serde_json::to_string(entry).map_err(|source| AdapterError::Json {
        path: self.path.clone(),
        source,
      })?;
      out.push_str(&line);
      out.push('\n');
    }
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      tokio::fs::create_dir_all(parent).await.map_err(|e| self.io(e))?;
    }
    tokio::fs::write(&self.path, out).await.map_err(|e| self.io(e))
  }

  fn io(&self, source: std::io::Error) -> AdapterError {
    AdapterError::Io { path: self.path.clone(), source }
  }
}

impl VisitSink for JournalSink {
  type Error = AdapterError;

  /// Writing an id that already exists replaces the entry.
  async fn record_visit(&self, record: VisitRecord) -> Result<String, AdapterError> {
    let id = event_id(&record.vehicle_id, &record.location.id, record.start_time);
    let mut entries = self.entries().await?;
    entries.insert(id.clone(), JournalEntry {
      id:            id.clone(),
      vehicle_id:    record.vehicle_id,
      vehicle_name:  record.vehicle_name,
      location_id:   record.location.id,
      location_name: record.location.name,
      start_time:    record.start_time,
      end_time:      record.end_time,
    });
    self.write_all(&entries).await?;
    Ok(id)
  }

  async fn has_existing_visit(
    &self,
    vehicle_id: String,
    location_id: String,
    start_time: DateTime<Utc>,
  ) -> Result<bool, AdapterError> {
    let id = event_id(&vehicle_id, &location_id, start_time);
    Ok(self.entries().await?.contains_key(&id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const T0: i64 = 1_700_000_000;

  fn sample(device: &str, ts: i64) -> Sample {
    Sample {
      device_id:   device.into(),
      timestamp:   ts,
      lat:         48.1,
      lon:         11.5,
      speed_kmh:   Some(0.0),
      battery_pct: None,
    }
  }

  async fn write_samples(dir: &Path, file: &SampleFile) -> PathBuf {
    let path = dir.join("samples.json");
    tokio::fs::write(&path, serde_json::to_vec(file).unwrap()).await.unwrap();
    path
  }

  #[tokio::test]
  async fn telemetry_filters_and_orders() {
    let dir = tempfile::tempdir().unwrap();
    let file = SampleFile {
      devices: vec![],
      samples: vec![
        sample("V2", T0),
        sample("V1", T0 + 120),
        sample("V1", T0),
        sample("V1", T0 + 60),
      ],
    };
    let telemetry = JsonTelemetry::new(write_samples(dir.path(), &file).await);

    let devices = telemetry.devices().await.unwrap();
    let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["V1", "V2"]);

    let range = telemetry.fetch_range("V1".into(), T0, T0 + 60).await.unwrap();
    let ts: Vec<i64> = range.iter().map(|s| s.timestamp).collect();
    assert_eq!(ts, [T0, T0 + 60]);

    let recent = telemetry.fetch_recent("V1".into(), 2).await.unwrap();
    let ts: Vec<i64> = recent.iter().map(|s| s.timestamp).collect();
    assert_eq!(ts, [T0 + 120, T0 + 60]);

    let window = telemetry.fetch_last_minutes("V1".into(), 1, T0 + 120).await.unwrap();
    assert_eq!(window.len(), 2);
  }

  #[tokio::test]
  async fn missing_samples_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = JsonTelemetry::new(dir.path().join("nope.json"));
    assert!(matches!(telemetry.devices().await, Err(AdapterError::Io { .. })));
  }

  #[tokio::test]
  async fn locations_load_into_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locations.json");
    tokio::fs::write(
      &path,
      r#"[{"id":"L1","name":"Bakery","lat":48.1,"lon":11.5},
          {"id":"L2","name":"Nowhere","lat":0.0,"lon":0.0}]"#,
    )
    .await
    .unwrap();
    let directory = load_locations(&path).await.unwrap();
    assert_eq!(directory.locations().len(), 1);
  }

  #[test]
  fn event_ids_are_deterministic() {
    let start = DateTime::from_timestamp(T0, 0).unwrap();
    assert_eq!(event_id("V1", "L9", start), "dwell-V1-L9-20231114-2213");
  }

  #[tokio::test]
  async fn journal_deduplicates_by_id() {
    let dir = tempfile::tempdir().unwrap();
    let sink = JournalSink::new(dir.path().join("nested/visits.jsonl"));
    let start = DateTime::from_timestamp(T0, 0).unwrap();
    let record = VisitRecord {
      vehicle_id:   "V1".into(),
      vehicle_name: "Van".into(),
      location:     Location { id: "L1".into(), name: "Bakery".into(), lat: 48.1, lon: 11.5 },
      start_time:   start,
      end_time:     start + chrono::Duration::minutes(20),
    };

    assert!(!sink.has_existing_visit("V1".into(), "L1".into(), start).await.unwrap());
    let id = sink.record_visit(record.clone()).await.unwrap();
    assert!(sink.has_existing_visit("V1".into(), "L1".into(), start).await.unwrap());

    let mut updated = record;
    updated.end_time = start + chrono::Duration::minutes(35);
    assert_eq!(sink.record_visit(updated).await.unwrap(), id);

    let entries = sink.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[&id].end_time, start + chrono::Duration::minutes(35));
  }
}
