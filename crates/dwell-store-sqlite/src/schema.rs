//! SQL schema for the visit store.
//!
//! Executed once at connection startup. Timestamps are unix seconds so that
//! range scans and ordering are plain integer comparisons.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per poll per (vehicle, nearest location). Location columns are
-- NULL when nothing was nearby.
CREATE TABLE IF NOT EXISTS observations (
    observation_id TEXT PRIMARY KEY,
    vehicle_id     TEXT NOT NULL,
    vehicle_name   TEXT NOT NULL,
    vehicle_lat    REAL NOT NULL,
    vehicle_lon    REAL NOT NULL,
    location_id    TEXT,
    location_name  TEXT,
    location_lat   REAL,
    location_lon   REAL,
    distance_m     REAL,
    observed_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS confirmed_visits (
    visit_id            TEXT PRIMARY KEY,
    vehicle_id          TEXT NOT NULL,
    location_id         TEXT NOT NULL,
    start_time          INTEGER NOT NULL,
    end_time            INTEGER,           -- NULL while ongoing
    duration_minutes    INTEGER NOT NULL DEFAULT 0,
    side_effect_created INTEGER NOT NULL DEFAULT 0,
    side_effect_id      TEXT,
    created_at          INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS observations_pair_idx
    ON observations(vehicle_id, location_id, observed_at);
CREATE INDEX IF NOT EXISTS observations_time_idx
    ON observations(observed_at);
CREATE INDEX IF NOT EXISTS confirmed_visits_pair_idx
    ON confirmed_visits(vehicle_id, location_id, start_time);

PRAGMA user_version = 1;
";
