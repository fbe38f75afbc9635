//! Historical replay: reconstruct and record every visit of a vehicle over a
//! past time range.
//!
//! The range is fetched once and segmented in a single pass. Each episode is
//! then matched to the closest known location and, unless the sink already
//! holds it, recorded with its real start and end time.

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  blind_spot::BlindSpots,
  episode::DwellEpisode,
  ports::{Device, LocationDirectory, TelemetrySource, VisitRecord, VisitSink},
  sample,
  segment::SegmentationStrategy,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
  pub min_duration_minutes: i64,
  pub proximity_radius_m:   f64,
  /// Report what would be recorded without touching the sink.
  pub dry_run:              bool,
  /// Record episodes even if the sink already holds them.
  pub force_update:         bool,
}

impl Default for ReplayConfig {
  fn default() -> Self {
    Self {
      min_duration_minutes: 2,
      proximity_radius_m:   500.0,
      dry_run:              false,
      force_update:         false,
    }
  }
}

/// What happened to one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
  BlindSpot { name: String },
  NoLocation,
  AlreadyRecorded { location_id: String },
  DryRun { location_id: String, distance_m: f64 },
  Recorded {
    location_id:    String,
    distance_m:     f64,
    side_effect_id: String,
    /// The sink already held the visit and it was written again.
    updated:        bool,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
  pub episode:     DwellEpisode,
  pub disposition: Disposition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
  pub vehicle_id:   String,
  pub sample_count: usize,
  pub episodes:     Vec<EpisodeReport>,
}

impl ReplayReport {
  pub fn recorded(&self) -> usize {
    self
      .episodes
      .iter()
      .filter(|e| matches!(e.disposition, Disposition::Recorded { .. }))
      .count()
  }
}

pub struct Replayer<T, D, K> {
  telemetry:   T,
  directory:   D,
  sink:        K,
  strategy:    Box<dyn SegmentationStrategy>,
  blind_spots: BlindSpots,
  config:      ReplayConfig,
}

impl<T, D, K> Replayer<T, D, K>
where
  T: TelemetrySource,
  D: LocationDirectory,
  K: VisitSink,
{
  pub fn new(
    telemetry: T,
    directory: D,
    sink: K,
    strategy: Box<dyn SegmentationStrategy>,
    blind_spots: BlindSpots,
    config: ReplayConfig,
  ) -> Self {
    Self { telemetry, directory, sink, strategy, blind_spots, config }
  }

  pub fn telemetry(&self) -> &T { &self.telemetry }

  pub fn sink(&self) -> &K { &self.sink }

  /// Replay `device` over `[start, end]` (unix seconds).
  ///
  /// A sink failure aborts the replay; episodes handled before it stay
  /// recorded.
  pub async fn replay_vehicle(
    &self,
    device: &Device,
    start: i64,
    end: i64,
  ) -> Result<ReplayReport> {
    if start > end {
      return Err(Error::InvalidRange { start, end });
    }

    let samples = self
      .telemetry
      .fetch_range(device.id.clone(), start, end)
      .await
      .map_err(Error::telemetry)?;
    let episodes = self.strategy.segment(&samples, self.config.min_duration_minutes);

    tracing::info!(
      vehicle_id = %device.id,
      samples = samples.len(),
      episodes = episodes.len(),
      method = self.strategy.method().as_str(),
      "trajectory segmented"
    );

    let mut reports = Vec::with_capacity(episodes.len());
    for episode in episodes {
      let disposition = self.handle(device, &episode).await?;
      reports.push(EpisodeReport { episode, disposition });
    }

    Ok(ReplayReport {
      vehicle_id: device.id.clone(),
      sample_count: samples.len(),
      episodes: reports,
    })
  }

  async fn handle(&self, device: &Device, episode: &DwellEpisode) -> Result<Disposition> {
    if let Some(hit) = self.blind_spots.containing(episode.centroid()) {
      tracing::debug!(vehicle_id = %device.id, blind_spot = %hit.spot.name, "episode in blind spot");
      return Ok(Disposition::BlindSpot { name: hit.spot.name.clone() });
    }

    let nearby = self
      .directory
      .nearby(episode.centroid_lat, episode.centroid_lon, self.config.proximity_radius_m)
      .await
      .map_err(Error::directory)?;
    let Some(closest) = nearby
      .into_iter()
      .min_by(|a, b| a.distance_m.total_cmp(&b.distance_m))
    else {
      return Ok(Disposition::NoLocation);
    };
    let location_id = closest.location.id.clone();

    if self.config.dry_run {
      return Ok(Disposition::DryRun { location_id, distance_m: closest.distance_m });
    }

    let (Some(start_time), Some(end_time)) = (
      sample::to_datetime(episode.start_time),
      sample::to_datetime(episode.end_time),
    ) else {
      return Err(Error::InvalidRange { start: episode.start_time, end: episode.end_time });
    };

    let existing = self
      .sink
      .has_existing_visit(device.id.clone(), location_id.clone(), start_time)
      .await
      .map_err(Error::sink)?;
    if existing && !self.config.force_update {
      return Ok(Disposition::AlreadyRecorded { location_id });
    }

    let side_effect_id = self
      .sink
      .record_visit(VisitRecord {
        vehicle_id: device.id.clone(),
        vehicle_name: device.name.clone(),
        location: closest.location,
        start_time,
        end_time,
      })
      .await
      .map_err(Error::sink)?;

    tracing::info!(
      vehicle_id = %device.id,
      location_id = %location_id,
      duration_minutes = episode.duration_minutes,
      updated = existing,
      "historical visit recorded"
    );

    Ok(Disposition::Recorded {
      location_id,
      distance_m: closest.distance_m,
      side_effect_id,
      updated: existing,
    })
  }
}
