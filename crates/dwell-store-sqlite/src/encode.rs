//! Encoding and decoding helpers between domain types and SQLite columns.
//!
//! Timestamps are stored as unix seconds (sub-second precision is dropped).
//! UUIDs are stored as hyphenated lowercase strings.

use chrono::{DateTime, Utc};
use dwell_core::visit::{ConfirmedVisit, PairActivity};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_ts(dt: DateTime<Utc>) -> i64 { dt.timestamp() }

pub fn decode_ts(secs: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp(secs, 0).ok_or(Error::Timestamp(secs))
}

// ─── Raw row types ───────────────────────────────────────────────────────────

/// Columns selected by every confirmed-visit query, in [`RawVisit`] order.
pub const VISIT_COLUMNS: &str = "visit_id, vehicle_id, location_id, start_time, \
                                 end_time, duration_minutes, side_effect_created, \
                                 side_effect_id, created_at";

/// A `confirmed_visits` row as read from SQLite.
pub struct RawVisit {
  pub visit_id:            String,
  pub vehicle_id:          String,
  pub location_id:         String,
  pub start_time:          i64,
  pub end_time:            Option<i64>,
  pub duration_minutes:    i64,
  pub side_effect_created: bool,
  pub side_effect_id:      Option<String>,
  pub created_at:          i64,
}

impl RawVisit {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      visit_id:            row.get(0)?,
      vehicle_id:          row.get(1)?,
      location_id:         row.get(2)?,
      start_time:          row.get(3)?,
      end_time:            row.get(4)?,
      duration_minutes:    row.get(5)?,
      side_effect_created: row.get(6)?,
      side_effect_id:      row.get(7)?,
      created_at:          row.get(8)?,
    })
  }

  pub fn into_visit(self) -> Result<ConfirmedVisit> {
    Ok(ConfirmedVisit {
      visit_id:            decode_uuid(&self.visit_id)?,
      vehicle_id:          self.vehicle_id,
      location_id:         self.location_id,
      start_time:          decode_ts(self.start_time)?,
      end_time:            self.end_time.map(decode_ts).transpose()?,
      duration_minutes:    self.duration_minutes,
      side_effect_created: self.side_effect_created,
      side_effect_id:      self.side_effect_id,
      created_at:          decode_ts(self.created_at)?,
    })
  }
}

/// One row of the per-pair aggregate query.
pub struct RawPairActivity {
  pub vehicle_id:        String,
  pub vehicle_name:      String,
  pub location_id:       String,
  pub location_name:     String,
  pub first_seen:        i64,
  pub last_seen:         i64,
  pub observation_count: i64,
  pub avg_distance_m:    f64,
}

impl RawPairActivity {
  pub fn into_activity(self) -> Result<PairActivity> {
    Ok(PairActivity {
      vehicle_id:        self.vehicle_id,
      vehicle_name:      self.vehicle_name,
      location_id:       self.location_id,
      location_name:     self.location_name,
      first_seen:        decode_ts(self.first_seen)?,
      last_seen:         decode_ts(self.last_seen)?,
      observation_count: self.observation_count.max(0) as u64,
      avg_distance_m:    self.avg_distance_m,
    })
  }
}

pub fn decode_visits(raws: Vec<RawVisit>) -> Result<Vec<ConfirmedVisit>> {
  raws.into_iter().map(RawVisit::into_visit).collect()
}
