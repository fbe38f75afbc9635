//! Subcommand implementations.

use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, NaiveDate, NaiveTime, SubsecRound as _, Utc};
use dwell_core::{
  directory::StaticDirectory,
  gate::VisitGate,
  monitor::{Monitor, MonitorConfig, PollReport, VisitAction},
  ports::TelemetrySource as _,
  replay::{Disposition, ReplayConfig, Replayer},
  segment::StrategyKind,
  visit::PairActivity,
};
use dwell_store_sqlite::SqliteStore;

use crate::{
  adapters::{JournalSink, JsonTelemetry, load_locations},
  settings::Settings,
};

type LiveMonitor = Monitor<JsonTelemetry, StaticDirectory, JournalSink, SqliteStore>;

/// Wall-clock now, truncated to the second the store persists.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(0) }

async fn open_store(settings: &Settings) -> anyhow::Result<SqliteStore> {
  if let Some(parent) = settings.store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  SqliteStore::open(&settings.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.store_path))
}

async fn build_monitor(settings: &Settings, dry_run: bool) -> anyhow::Result<LiveMonitor> {
  let store = open_store(settings).await?;
  let directory = load_locations(&settings.locations_path)
    .await
    .context("failed to load locations")?;
  Ok(Monitor::new(
    JsonTelemetry::new(&settings.samples_path),
    directory,
    JournalSink::new(&settings.journal_path),
    VisitGate::new(store, settings.gate),
    MonitorConfig { dry_run: dry_run || settings.monitor.dry_run, ..settings.monitor },
  ))
}

// ─── check / watch ───────────────────────────────────────────────────────────

pub async fn check(
  settings: &Settings,
  dry_run: bool,
  at: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
  let monitor = build_monitor(settings, dry_run).await?;
  let reports = monitor
    .poll_fleet(at.unwrap_or_else(now))
    .await
    .context("poll failed")?;
  for report in &reports {
    print_report(report);
  }
  Ok(())
}

pub async fn watch(settings: &Settings, dry_run: bool) -> anyhow::Result<()> {
  let monitor = build_monitor(settings, dry_run).await?;
  let interval = Duration::from_secs(settings.poll_interval_secs.max(1));
  tracing::info!(interval_secs = interval.as_secs(), "watching");

  loop {
    match monitor.poll_fleet(now()).await {
      Ok(reports) => reports.iter().for_each(print_report),
      Err(e) => tracing::warn!(error = %e, "poll failed; retrying next tick"),
    }

    tokio::select! {
      _ = tokio::time::sleep(interval) => {}
      _ = tokio::signal::ctrl_c() => {
        tracing::info!("interrupted");
        return Ok(());
      }
    }
  }
}

fn print_report(report: &PollReport) {
  println!("{} ({})", report.vehicle_name, report.vehicle_id);
  let Some(a) = &report.analysis else {
    println!("  no new information");
    return;
  };
  println!(
    "  stopped {} min, movement {}, battery {:?}, engine {:?}",
    a.stop_minutes,
    if a.snapshot.movement_detected { "yes" } else { "no" },
    a.snapshot.battery_trend,
    a.decision.engine,
  );
  match a.nearby.first() {
    Some(n) => println!("  nearest: {} ({:.0} m)", n.location.name, n.distance_m),
    None => println!("  no known location nearby"),
  }
  let action = match &report.action {
    VisitAction::None => format!("waiting ({:?})", a.decision.reason),
    VisitAction::Created { side_effect_id, .. } => format!("visit recorded as {side_effect_id}"),
    VisitAction::WouldCreate { location_id } => format!("would record visit at {location_id}"),
    VisitAction::AlreadyInSink { location_id } => {
      format!("visit at {location_id} already in journal")
    }
    VisitAction::AlreadyConfirmed { location_id } => {
      format!("visit at {location_id} already confirmed")
    }
  };
  println!("  {action}");
  for visit in &report.ended {
    println!("  left {} after {} min", visit.location_id, visit.duration_minutes);
  }
}

// ─── history ─────────────────────────────────────────────────────────────────

pub struct HistoryArgs {
  pub from:         Option<NaiveDate>,
  pub to:           Option<NaiveDate>,
  pub days:         i64,
  pub vehicle:      Option<String>,
  pub dry_run:      bool,
  pub force_update: bool,
  pub strategy:     Option<StrategyKind>,
}

/// Resolve the replay range in unix seconds. Explicit dates cover whole UTC
/// days; otherwise the trailing `days` up to `now`.
pub fn history_range(args: &HistoryArgs, now: DateTime<Utc>) -> anyhow::Result<(i64, i64)> {
  let (start, end) = match args.from {
    Some(from) => {
      let to = args.to.unwrap_or_else(|| now.date_naive());
      let end = to
        .and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp()
        + 86_399;
      (from.and_time(NaiveTime::MIN).and_utc().timestamp(), end)
    }
    None => (now.timestamp() - args.days.max(0) * 86_400, now.timestamp()),
  };
  anyhow::ensure!(start <= end, "--from must not be after --to");
  Ok((start, end))
}

pub async fn history(settings: &Settings, args: HistoryArgs) -> anyhow::Result<()> {
  let (start, end) = history_range(&args, now())?;
  let directory = load_locations(&settings.locations_path)
    .await
    .context("failed to load locations")?;
  let strategy = args.strategy.unwrap_or(settings.strategy);
  if !settings.blind_spots.is_empty() {
    let names: Vec<&str> = settings.blind_spots.iter().map(|s| s.name.as_str()).collect();
    tracing::info!(blind_spots = ?names, "skipping episodes inside blind spots");
  }

  let replayer = Replayer::new(
    JsonTelemetry::new(&settings.samples_path),
    directory,
    JournalSink::new(&settings.journal_path),
    strategy.build(settings.segmenter),
    settings.blind_spots.clone(),
    ReplayConfig {
      dry_run: args.dry_run || settings.replay.dry_run,
      force_update: args.force_update || settings.replay.force_update,
      ..settings.replay
    },
  );

  let devices = replayer
    .telemetry()
    .devices()
    .await
    .context("failed to list vehicles")?;
  let devices: Vec<_> = match &args.vehicle {
    Some(id) => devices.into_iter().filter(|d| &d.id == id).collect(),
    None => devices,
  };
  anyhow::ensure!(!devices.is_empty(), "no matching vehicles");

  let mut recorded = 0;
  let mut found = 0;
  for device in &devices {
    let report = replayer
      .replay_vehicle(device, start, end)
      .await
      .with_context(|| format!("replay aborted for {}", device.id))?;
    println!(
      "{} ({}): {} samples, {} visits",
      device.name,
      device.id,
      report.sample_count,
      report.episodes.len()
    );
    for e in &report.episodes {
      let when = DateTime::from_timestamp(e.episode.start_time, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
      let what = match &e.disposition {
        Disposition::BlindSpot { name } => format!("skipped, blind spot {name}"),
        Disposition::NoLocation => "no known location nearby".to_owned(),
        Disposition::AlreadyRecorded { location_id } => {
          format!("{location_id}: already recorded")
        }
        Disposition::DryRun { location_id, distance_m } => {
          format!("{location_id} ({distance_m:.0} m): would record")
        }
        Disposition::Recorded { location_id, updated, side_effect_id, .. } => format!(
          "{location_id}: {} {side_effect_id}",
          if *updated { "updated" } else { "recorded" }
        ),
      };
      println!("  {when}  {:>4} min  {what}", e.episode.duration_minutes);
    }
    found += report.episodes.len();
    recorded += report.recorded();
  }
  println!("{found} visits found, {recorded} recorded");
  Ok(())
}

// ─── visits / cleanup ────────────────────────────────────────────────────────

/// How fresh the last sighting of a pair is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  Active,
  Weak,
  PossiblyGone,
}

impl Freshness {
  pub fn of(pair: &PairActivity, now: DateTime<Utc>) -> Self {
    match (now - pair.last_seen).num_minutes() {
      m if m > 30 => Self::PossiblyGone,
      m if m > 10 => Self::Weak,
      _ => Self::Active,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      Self::Active => "active",
      Self::Weak => "weak signal",
      Self::PossiblyGone => "possibly gone",
    }
  }
}

pub async fn visits(settings: &Settings) -> anyhow::Result<()> {
  let gate = VisitGate::new(open_store(settings).await?, settings.gate);
  let now = now();
  let pairs = gate.active_pairs(now).await.context("failed to read visits")?;
  if pairs.is_empty() {
    println!("no vehicles near known locations");
    return Ok(());
  }
  for p in &pairs {
    println!(
      "{} at {}: {} min, {} observations, avg {:.0} m, {}",
      p.vehicle_name,
      p.location_name,
      p.duration_minutes(),
      p.observation_count,
      p.avg_distance_m,
      Freshness::of(p, now).label()
    );
  }
  Ok(())
}

pub async fn cleanup(settings: &Settings) -> anyhow::Result<()> {
  let gate = VisitGate::new(open_store(settings).await?, settings.gate);
  let removed = gate.cleanup(now()).await.context("cleanup failed")?;
  println!("removed {removed} observations");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn at(s: &str) -> DateTime<Utc> { s.parse().unwrap() }

  fn args(from: Option<&str>, to: Option<&str>, days: i64) -> HistoryArgs {
    HistoryArgs {
      from: from.map(|d| d.parse().unwrap()),
      to: to.map(|d| d.parse().unwrap()),
      days,
      vehicle: None,
      dry_run: false,
      force_update: false,
      strategy: None,
    }
  }

  #[test]
  fn explicit_dates_cover_whole_days() {
    let now = at("2024-03-10T12:00:00Z");
    let (start, end) = history_range(&args(Some("2024-03-01"), Some("2024-03-02"), 7), now).unwrap();
    assert_eq!(start, at("2024-03-01T00:00:00Z").timestamp());
    assert_eq!(end, at("2024-03-02T23:59:59Z").timestamp());
  }

  #[test]
  fn from_without_to_runs_until_today() {
    let now = at("2024-03-10T12:00:00Z");
    let (_, end) = history_range(&args(Some("2024-03-01"), None, 7), now).unwrap();
    assert_eq!(end, at("2024-03-10T23:59:59Z").timestamp());
  }

  #[test]
  fn days_count_back_from_now() {
    let now = at("2024-03-10T12:00:00Z");
    let (start, end) = history_range(&args(None, None, 2), now).unwrap();
    assert_eq!(start, at("2024-03-08T12:00:00Z").timestamp());
    assert_eq!(end, now.timestamp());
  }

  #[test]
  fn inverted_dates_are_rejected() {
    let now = at("2024-03-10T12:00:00Z");
    assert!(history_range(&args(Some("2024-03-05"), Some("2024-03-01"), 7), now).is_err());
  }

  #[test]
  fn freshness_thresholds() {
    let now = at("2024-03-10T12:00:00Z");
    let pair = |minutes_ago: i64| PairActivity {
      vehicle_id:        "V1".into(),
      vehicle_name:      "Van".into(),
      location_id:       "L1".into(),
      location_name:     "Bakery".into(),
      first_seen:        now - chrono::Duration::minutes(60),
      last_seen:         now - chrono::Duration::minutes(minutes_ago),
      observation_count: 3,
      avg_distance_m:    10.0,
    };
    assert_eq!(Freshness::of(&pair(5), now), Freshness::Active);
    assert_eq!(Freshness::of(&pair(10), now), Freshness::Active);
    assert_eq!(Freshness::of(&pair(11), now), Freshness::Weak);
    assert_eq!(Freshness::of(&pair(31), now), Freshness::PossiblyGone);
  }
}
