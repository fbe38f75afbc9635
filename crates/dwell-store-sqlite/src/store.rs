//! [`SqliteStore`] — the SQLite implementation of [`VisitStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use dwell_core::{
  store::VisitStore,
  visit::{ConfirmedVisit, Observation, PairActivity},
};

use crate::{
  Error, Result,
  encode::{
    RawPairActivity, RawVisit, VISIT_COLUMNS, decode_ts, decode_visits, encode_ts,
    encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A visit store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open a private in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Number of persisted observation rows.
  pub async fn observation_count(&self) -> Result<u64> {
    let n: i64 = self
      .conn
      .call(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM observations", [], |r| r.get(0))?)
      })
      .await?;
    Ok(n.max(0) as u64)
  }

  /// Every visit ever confirmed for the vehicle, newest first.
  pub async fn visits_for(&self, vehicle_id: String) -> Result<Vec<ConfirmedVisit>> {
    let raws: Vec<RawVisit> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {VISIT_COLUMNS} FROM confirmed_visits
           WHERE vehicle_id = ?1
           ORDER BY start_time DESC, created_at DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![vehicle_id], RawVisit::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    decode_visits(raws)
  }

  /// Newest visit matching `filter` (a SQL condition over `?1`, `?2`, `?3`).
  async fn newest_visit(
    &self,
    filter: &'static str,
    vehicle_id: String,
    location_id: String,
    since: Option<i64>,
  ) -> Result<Option<ConfirmedVisit>> {
    let raw: Option<RawVisit> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {VISIT_COLUMNS} FROM confirmed_visits
                 WHERE vehicle_id = ?1 AND location_id = ?2 AND {filter}
                 ORDER BY start_time DESC, created_at DESC
                 LIMIT 1"
              ),
              rusqlite::params![vehicle_id, location_id, since],
              RawVisit::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawVisit::into_visit).transpose()
  }

  async fn get_visit(&self, visit_id: Uuid) -> Result<ConfirmedVisit> {
    let id_str = encode_uuid(visit_id);
    let raw: Option<RawVisit> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {VISIT_COLUMNS} FROM confirmed_visits WHERE visit_id = ?1"),
              rusqlite::params![id_str],
              RawVisit::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.ok_or(Error::VisitNotFound(visit_id))?.into_visit()
  }
}

// ─── VisitStore impl ─────────────────────────────────────────────────────────

impl VisitStore for SqliteStore {
  type Error = Error;

  // ── Observations ──────────────────────────────────────────────────────────

  async fn record_observation(&self, observation: Observation) -> Result<()> {
    let id_str = encode_uuid(observation.observation_id);
    let at = encode_ts(observation.observed_at);
    let (location_id, location_name, location_lat, location_lon, distance_m) =
      match observation.location {
        Some(n) => (
          Some(n.location.id),
          Some(n.location.name),
          Some(n.location.lat),
          Some(n.location.lon),
          Some(n.distance_m),
        ),
        None => (None, None, None, None, None),
      };

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO observations (
             observation_id, vehicle_id, vehicle_name, vehicle_lat, vehicle_lon,
             location_id, location_name, location_lat, location_lon, distance_m,
             observed_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
          rusqlite::params![
            id_str,
            observation.vehicle_id,
            observation.vehicle_name,
            observation.vehicle_lat,
            observation.vehicle_lon,
            location_id,
            location_name,
            location_lat,
            location_lon,
            distance_m,
            at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn first_observation_since(
    &self,
    vehicle_id: String,
    location_id: String,
    since: DateTime<Utc>,
  ) -> Result<Option<DateTime<Utc>>> {
    let since = encode_ts(since);
    let first: Option<i64> = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT MIN(observed_at) FROM observations
           WHERE vehicle_id = ?1 AND location_id = ?2 AND observed_at >= ?3",
          rusqlite::params![vehicle_id, location_id, since],
          |r| r.get(0),
        )?)
      })
      .await?;
    first.map(decode_ts).transpose()
  }

  async fn prune_observations(
    &self,
    older_than: DateTime<Utc>,
    max_rows: u64,
  ) -> Result<u64> {
    let cutoff = encode_ts(older_than);
    let keep = i64::try_from(max_rows).unwrap_or(i64::MAX);

    let (by_age, by_cap) = self
      .conn
      .call(move |conn| {
        let by_age = conn.execute(
          "DELETE FROM observations WHERE observed_at < ?1",
          rusqlite::params![cutoff],
        )?;
        let by_cap = conn.execute(
          "DELETE FROM observations WHERE rowid IN (
             SELECT rowid FROM observations
             ORDER BY observed_at DESC, rowid DESC
             LIMIT -1 OFFSET ?1
           )",
          rusqlite::params![keep],
        )?;
        Ok((by_age, by_cap))
      })
      .await?;

    if by_cap > 0 {
      tracing::debug!(by_age, by_cap, "observation cap reached");
    }
    Ok((by_age + by_cap) as u64)
  }

  async fn active_pairs(&self, since: DateTime<Utc>) -> Result<Vec<PairActivity>> {
    let since = encode_ts(since);
    let raws: Vec<RawPairActivity> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT vehicle_id, MAX(vehicle_name), location_id, MAX(location_name),
                  MIN(observed_at), MAX(observed_at), COUNT(*),
                  COALESCE(AVG(distance_m), 0.0)
           FROM observations
           WHERE location_id IS NOT NULL AND observed_at >= ?1
           GROUP BY vehicle_id, location_id
           ORDER BY MAX(observed_at) DESC, vehicle_id, location_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![since], |row| {
            Ok(RawPairActivity {
              vehicle_id:        row.get(0)?,
              vehicle_name:      row.get(1)?,
              location_id:       row.get(2)?,
              location_name:     row.get(3)?,
              first_seen:        row.get(4)?,
              last_seen:         row.get(5)?,
              observation_count: row.get(6)?,
              avg_distance_m:    row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPairActivity::into_activity).collect()
  }

  // ── Confirmed visits ──────────────────────────────────────────────────────

  async fn open_visit(
    &self,
    vehicle_id: String,
    location_id: String,
  ) -> Result<Option<ConfirmedVisit>> {
    self
      .newest_visit("end_time IS NULL AND ?3 IS NULL", vehicle_id, location_id, None)
      .await
  }

  async fn open_visits(&self, vehicle_id: String) -> Result<Vec<ConfirmedVisit>> {
    let raws: Vec<RawVisit> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {VISIT_COLUMNS} FROM confirmed_visits
           WHERE vehicle_id = ?1 AND end_time IS NULL
           ORDER BY start_time"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![vehicle_id], RawVisit::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    decode_visits(raws)
  }

  async fn latest_visit(
    &self,
    vehicle_id: String,
    location_id: String,
  ) -> Result<Option<ConfirmedVisit>> {
    self.newest_visit("?3 IS NULL", vehicle_id, location_id, None).await
  }

  async fn confirmed_since(
    &self,
    vehicle_id: String,
    location_id: String,
    since: DateTime<Utc>,
  ) -> Result<Option<ConfirmedVisit>> {
    self
      .newest_visit(
        "side_effect_created = 1 AND start_time >= ?3",
        vehicle_id,
        location_id,
        Some(encode_ts(since)),
      )
      .await
  }

  async fn insert_visit(&self, visit: ConfirmedVisit) -> Result<()> {
    let id_str = encode_uuid(visit.visit_id);
    let start = encode_ts(visit.start_time);
    let end = visit.end_time.map(encode_ts);
    let created = encode_ts(visit.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO confirmed_visits (
             visit_id, vehicle_id, location_id, start_time, end_time,
             duration_minutes, side_effect_created, side_effect_id, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            id_str,
            visit.vehicle_id,
            visit.location_id,
            start,
            end,
            visit.duration_minutes,
            visit.side_effect_created,
            visit.side_effect_id,
            created,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn mark_side_effect(
    &self,
    visit_id: Uuid,
    side_effect_id: Option<String>,
    duration_minutes: i64,
  ) -> Result<ConfirmedVisit> {
    let id_str = encode_uuid(visit_id);
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE confirmed_visits
           SET side_effect_created = 1, side_effect_id = ?2, duration_minutes = ?3
           WHERE visit_id = ?1",
          rusqlite::params![id_str, side_effect_id, duration_minutes],
        )?)
      })
      .await?;
    if changed == 0 {
      return Err(Error::VisitNotFound(visit_id));
    }
    self.get_visit(visit_id).await
  }

  async fn close_visit(
    &self,
    visit_id: Uuid,
    end_time: DateTime<Utc>,
    duration_minutes: i64,
  ) -> Result<ConfirmedVisit> {
    let id_str = encode_uuid(visit_id);
    let end = encode_ts(end_time);
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE confirmed_visits SET end_time = ?2, duration_minutes = ?3
           WHERE visit_id = ?1",
          rusqlite::params![id_str, end, duration_minutes],
        )?)
      })
      .await?;
    if changed == 0 {
      return Err(Error::VisitNotFound(visit_id));
    }
    self.get_visit(visit_id).await
  }
}
