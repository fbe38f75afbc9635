//! Historical trajectory segmentation.
//!
//! A segmenter sees a complete, time-ordered trajectory and emits every dwell
//! episode in it. No debounce is needed: unlike the live path it already
//! knows how each stop ended.
//!
//! Two strategies implement [`SegmentationStrategy`]:
//!
//! - [`LinearSegmenter`] — single forward pass with at most one open stay.
//!   A stay accepts a sample while it is stationary, within the stay radius
//!   of the running centroid and within the time-gap ceiling of the stay's
//!   last sample. Anything else closes the stay.
//! - [`ClusterMergeSegmenter`] — same pass without the duration filter,
//!   followed by merging neighbouring stays that are close in both space and
//!   time. Tolerates isolated speed spikes in the middle of a visit at the
//!   cost of occasionally joining two genuinely separate stops.
//!
//! Both keep input order for identical timestamps and are deterministic.

use serde::{Deserialize, Serialize};

use crate::{
  episode::{DetectionMethod, DwellEpisode},
  geo::{Coordinate, RunningCentroid},
  motion::{self, DWELL_CANDIDATE_KMH},
  sample::{self, Sample},
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// How the emitted centroid of an episode is computed.
///
/// Membership tests always use the unweighted running mean; this only
/// changes the reported position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentroidWeighting {
  /// Plain mean of member coordinates. Denser sampling in part of a stay
  /// pulls the centroid toward that part.
  #[default]
  SampleWeighted,
  /// Each member weighted by the time it represents (half the interval to
  /// each neighbour).
  TimeWeighted,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
  /// Samples at or above this speed never join a stay.
  pub moving_kmh:        f64,
  /// Maximum distance from the running centroid for a sample to join.
  pub stay_radius_m:     f64,
  /// Maximum silence between consecutive members of one stay.
  pub max_gap_minutes:   i64,
  /// Stays with fewer members are discarded as unreliable.
  pub min_samples:       usize,
  pub weighting:         CentroidWeighting,
  /// Cluster-merge only: centroids closer than this may be merged.
  pub merge_radius_m:    f64,
  /// Cluster-merge only: maximum gap between merged stays.
  pub merge_gap_minutes: i64,
}

impl Default for SegmenterConfig {
  fn default() -> Self {
    Self {
      moving_kmh:        DWELL_CANDIDATE_KMH,
      stay_radius_m:     75.0,
      max_gap_minutes:   60,
      min_samples:       3,
      weighting:         CentroidWeighting::default(),
      merge_radius_m:    100.0,
      merge_gap_minutes: 15,
    }
  }
}

/// Selects a strategy by name, e.g. from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
  #[default]
  Linear,
  ClusterMerge,
}

impl StrategyKind {
  pub fn build(self, config: SegmenterConfig) -> Box<dyn SegmentationStrategy> {
    match self {
      Self::Linear => Box::new(LinearSegmenter::new(config)),
      Self::ClusterMerge => Box::new(ClusterMergeSegmenter::new(config)),
    }
  }
}

// ─── Strategy trait ──────────────────────────────────────────────────────────

/// Turns a complete trajectory into dwell episodes.
pub trait SegmentationStrategy: Send + Sync {
  fn method(&self) -> DetectionMethod;

  /// Segment `samples` (time-ordered) and return episodes of at least
  /// `min_duration_minutes`, in chronological order.
  fn segment(&self, samples: &[Sample], min_duration_minutes: i64) -> Vec<DwellEpisode>;
}

// ─── Stay ────────────────────────────────────────────────────────────────────

/// An open (or closed, not yet emitted) run of stationary samples.
#[derive(Debug, Clone)]
struct Stay<'a> {
  start:    i64,
  end:      i64,
  centroid: RunningCentroid,
  members:  Vec<&'a Sample>,
}

impl<'a> Stay<'a> {
  fn open(s: &'a Sample) -> Self {
    let mut centroid = RunningCentroid::default();
    centroid.push(s.position());
    Self { start: s.timestamp, end: s.timestamp, centroid, members: vec![s] }
  }

  fn mean(&self) -> Option<Coordinate> { self.centroid.centroid() }

  fn accepts(&self, s: &Sample, config: &SegmenterConfig) -> bool {
    let Some(center) = self.mean() else {
      return false;
    };
    center.distance_m(&s.position()) <= config.stay_radius_m
      && s.timestamp - self.end <= config.max_gap_minutes * 60
  }

  fn absorb(&mut self, s: &'a Sample) {
    self.end = self.end.max(s.timestamp);
    self.centroid.push(s.position());
    self.members.push(s);
  }

  fn merge(&mut self, other: Stay<'a>) {
    for s in other.members {
      self.absorb(s);
    }
    self.start = self.start.min(other.start);
  }

  fn duration_secs(&self) -> i64 { self.end - self.start }

  fn reported_centroid(&self, weighting: CentroidWeighting) -> Option<Coordinate> {
    match weighting {
      CentroidWeighting::SampleWeighted => self.mean(),
      CentroidWeighting::TimeWeighted => time_weighted_centroid(&self.members).or_else(|| self.mean()),
    }
  }

  /// Emit the stay as an episode if it is long and dense enough.
  fn close(
    self,
    min_duration_minutes: i64,
    config: &SegmenterConfig,
    method: DetectionMethod,
  ) -> Option<DwellEpisode> {
    if self.duration_secs() < min_duration_minutes * 60 {
      return None;
    }
    if self.members.len() < config.min_samples {
      return None;
    }
    let centroid = self.reported_centroid(config.weighting)?;
    Some(DwellEpisode {
      device_id: self.members[0].device_id.clone(),
      start_time: self.start,
      end_time: self.end,
      centroid_lat: centroid.lat,
      centroid_lon: centroid.lon,
      sample_count: self.members.len(),
      duration_minutes: sample::elapsed_minutes(self.start, self.end),
      detection_method: method,
    })
  }
}

/// Trapezoidal time weights: each member stands for half the interval to
/// each neighbour. `None` when every member shares one timestamp.
fn time_weighted_centroid(members: &[&Sample]) -> Option<Coordinate> {
  let n = members.len();
  if n < 2 {
    return None;
  }
  let (mut lat, mut lon, mut total) = (0.0, 0.0, 0.0);
  for i in 0..n {
    let prev = if i == 0 { members[i].timestamp } else { members[i - 1].timestamp };
    let next = if i + 1 == n { members[i].timestamp } else { members[i + 1].timestamp };
    let w = (next - prev) as f64 / 2.0;
    lat += members[i].lat * w;
    lon += members[i].lon * w;
    total += w;
  }
  (total > 0.0).then(|| Coordinate::new(lat / total, lon / total))
}

/// The shared forward pass. Every closed stay is handed to `on_close`.
fn forward_pass<'a>(
  samples: &'a [Sample],
  config: &SegmenterConfig,
  mut on_close: impl FnMut(Stay<'a>),
) {
  let mut open: Option<Stay<'a>> = None;

  for s in samples {
    if !s.has_fix() {
      continue;
    }
    let moving = motion::classify(s.speed_kmh, config.moving_kmh).counts_as_moving();

    if let Some(stay) = open.as_mut()
      && !moving
      && stay.accepts(s, config)
    {
      stay.absorb(s);
      continue;
    }

    if let Some(stay) = open.take() {
      on_close(stay);
    }
    if !moving {
      open = Some(Stay::open(s));
    }
  }

  if let Some(stay) = open {
    on_close(stay);
  }
}

// ─── Linear ──────────────────────────────────────────────────────────────────

/// Single-pass segmenter; the production strategy.
#[derive(Debug, Clone, Default)]
pub struct LinearSegmenter {
  config: SegmenterConfig,
}

impl LinearSegmenter {
  pub fn new(config: SegmenterConfig) -> Self { Self { config } }

  pub fn config(&self) -> &SegmenterConfig { &self.config }
}

impl SegmentationStrategy for LinearSegmenter {
  fn method(&self) -> DetectionMethod { DetectionMethod::Linear }

  fn segment(&self, samples: &[Sample], min_duration_minutes: i64) -> Vec<DwellEpisode> {
    let mut episodes = Vec::new();
    forward_pass(samples, &self.config, |stay| {
      episodes.extend(stay.close(min_duration_minutes, &self.config, DetectionMethod::Linear));
    });
    episodes
  }
}

// ─── Cluster-merge ───────────────────────────────────────────────────────────

/// Forward pass followed by a merge of neighbouring stays.
#[derive(Debug, Clone, Default)]
pub struct ClusterMergeSegmenter {
  config: SegmenterConfig,
}

impl ClusterMergeSegmenter {
  pub fn new(config: SegmenterConfig) -> Self { Self { config } }

  fn mergeable(&self, a: &Stay<'_>, b: &Stay<'_>) -> bool {
    let (Some(ca), Some(cb)) = (a.mean(), b.mean()) else {
      return false;
    };
    ca.distance_m(&cb) <= self.config.merge_radius_m
      && b.start - a.end <= self.config.merge_gap_minutes * 60
  }
}

impl SegmentationStrategy for ClusterMergeSegmenter {
  fn method(&self) -> DetectionMethod { DetectionMethod::ClusterMerge }

  fn segment(&self, samples: &[Sample], min_duration_minutes: i64) -> Vec<DwellEpisode> {
    let mut merged: Vec<Stay<'_>> = Vec::new();
    forward_pass(samples, &self.config, |stay| {
      match merged.last_mut() {
        Some(last) if self.mergeable(last, &stay) => last.merge(stay),
        _ => merged.push(stay),
      }
    });

    merged
      .into_iter()
      .filter_map(|stay| {
        stay.close(min_duration_minutes, &self.config, DetectionMethod::ClusterMerge)
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const T0: i64 = 1_700_000_000;
  const A: (f64, f64) = (48.137_154, 11.576_124);
  const B: (f64, f64) = (48.150_000, 11.600_000);

  fn s(ts: i64, (lat, lon): (f64, f64), speed: f64) -> Sample {
    Sample {
      device_id: "veh-1".into(),
      timestamp: ts,
      lat,
      lon,
      speed_kmh: Some(speed),
      battery_pct: None,
    }
  }

  fn parked(start: i64, count: usize, step_secs: i64, at: (f64, f64)) -> Vec<Sample> {
    (0..count).map(|i| s(start + i as i64 * step_secs, at, 0.0)).collect()
  }

  fn linear() -> LinearSegmenter { LinearSegmenter::default() }

  #[test]
  fn one_fixed_point_is_one_episode() {
    // 20 samples, 28 s apart: last-minus-first is 532 s.
    let samples = parked(T0, 20, 28, A);
    let eps = linear().segment(&samples, 2);
    assert_eq!(eps.len(), 1);
    let ep = &eps[0];
    assert_eq!(ep.duration_minutes, 9);
    assert_eq!(ep.sample_count, 20);
    assert_eq!(ep.start_time, T0);
    assert_eq!(ep.end_time, T0 + 19 * 28);
    assert_eq!(ep.detection_method, DetectionMethod::Linear);
    assert!((ep.centroid_lat - A.0).abs() < 1e-9);
  }

  #[test]
  fn leaving_and_returning_with_short_halves_yields_nothing() {
    let mut samples = parked(T0, 5, 60, A);
    // Three samples driving well over 75 m away.
    for i in 0..3 {
      samples.push(s(T0 + 300 + i * 60, B, 40.0));
    }
    samples.extend(parked(T0 + 480, 5, 60, A));

    assert!(linear().segment(&samples, 10).is_empty());
  }

  #[test]
  fn connectivity_gap_over_ceiling_splits_clusters() {
    let mut samples = parked(T0, 10, 60, A);
    let resume = T0 + 9 * 60 + 70 * 60;
    samples.extend(parked(resume, 10, 60, B));

    let eps = linear().segment(&samples, 5);
    assert_eq!(eps.len(), 2);
    assert_eq!(eps[0].end_time, T0 + 9 * 60);
    assert_eq!(eps[1].start_time, resume);
  }

  #[test]
  fn gap_over_ceiling_splits_even_at_the_same_place() {
    let mut samples = parked(T0, 10, 60, A);
    samples.extend(parked(T0 + 9 * 60 + 61 * 60, 10, 60, A));
    assert_eq!(linear().segment(&samples, 5).len(), 2);
  }

  #[test]
  fn gap_within_ceiling_is_bridged() {
    let mut samples = parked(T0, 10, 60, A);
    samples.extend(parked(T0 + 9 * 60 + 45 * 60, 10, 60, A));
    let eps = linear().segment(&samples, 5);
    assert_eq!(eps.len(), 1);
    assert_eq!(eps[0].sample_count, 20);
  }

  #[test]
  fn moving_samples_never_join_a_stay() {
    let mut samples = parked(T0, 10, 60, A);
    samples[5].speed_kmh = Some(DWELL_CANDIDATE_KMH);
    let eps = linear().segment(&samples, 1);
    let total: usize = eps.iter().map(|e| e.sample_count).sum();
    assert_eq!(total, 9);
    assert!(eps.iter().all(|e| e.end_time < samples[5].timestamp
      || e.start_time > samples[5].timestamp));
  }

  #[test]
  fn unknown_speed_is_treated_as_moving() {
    let mut samples = parked(T0, 6, 60, A);
    samples[3].speed_kmh = None;
    // Halves of two minutes and one minute; neither reaches three.
    let eps = linear().segment(&samples, 3);
    assert!(eps.is_empty(), "{eps:?}");
    assert_eq!(linear().segment(&parked(T0, 6, 60, A), 3).len(), 1);
  }

  #[test]
  fn isolated_stop_between_moves_is_dropped() {
    let samples = vec![
      s(T0, B, 50.0),
      s(T0 + 60, A, 0.0),
      s(T0 + 120, B, 50.0),
    ];
    assert!(linear().segment(&samples, 2).is_empty());
  }

  #[test]
  fn fewer_than_three_samples_is_unreliable() {
    let samples = vec![s(T0, A, 0.0), s(T0 + 30 * 60, A, 0.0)];
    assert!(linear().segment(&samples, 2).is_empty());
  }

  #[test]
  fn fixless_samples_are_skipped() {
    let mut samples = parked(T0, 10, 60, A);
    samples[4].lat = 0.0;
    samples[4].lon = 0.0;
    let eps = linear().segment(&samples, 2);
    assert_eq!(eps.len(), 1);
    assert_eq!(eps[0].sample_count, 9);
  }

  #[test]
  fn running_centroid_follows_slow_drift() {
    // 12 samples creeping north ~10 m each: 110 m end to end, but each new
    // point stays within 75 m of the mean of the points before it.
    let samples: Vec<Sample> = (0..12)
      .map(|i| s(T0 + i * 60, (A.0 + i as f64 * 0.000_09, A.1), 0.0))
      .collect();
    let eps = linear().segment(&samples, 5);
    assert_eq!(eps.len(), 1);
    assert_eq!(eps[0].sample_count, 12);
  }

  #[test]
  fn identical_timestamps_keep_input_order() {
    let mut samples = parked(T0, 5, 60, A);
    samples.insert(2, s(T0 + 60, A, 0.0));
    let eps = linear().segment(&samples, 2);
    assert_eq!(eps.len(), 1);
    assert_eq!(eps[0].sample_count, 6);
  }

  #[test]
  fn segmentation_is_reproducible() {
    let mut samples = parked(T0, 15, 45, A);
    samples.push(s(T0 + 15 * 45, B, 60.0));
    samples.extend(parked(T0 + 40 * 60, 12, 50, B));

    let first = serde_json::to_string(&linear().segment(&samples, 2)).unwrap();
    let second = serde_json::to_string(&linear().segment(&samples, 2)).unwrap();
    assert_eq!(first, second);
    assert_eq!(linear().segment(&samples, 2).len(), 2);
  }

  #[test]
  fn time_weighting_moves_the_reported_centroid() {
    // Dense burst at A, then a few sparse samples ~55 m north.
    let north = (A.0 + 0.000_5, A.1);
    let mut samples = parked(T0, 6, 10, A);
    samples.extend(parked(T0 + 600, 3, 600, north));

    let plain = linear().segment(&samples, 2);
    let weighted = LinearSegmenter::new(SegmenterConfig {
      weighting: CentroidWeighting::TimeWeighted,
      ..Default::default()
    })
    .segment(&samples, 2);

    assert_eq!(plain.len(), 1);
    assert_eq!(weighted.len(), 1);
    assert_eq!(plain[0].sample_count, weighted[0].sample_count);
    assert!(weighted[0].centroid_lat > plain[0].centroid_lat);
  }

  #[test]
  fn cluster_merge_bridges_a_speed_spike() {
    let mut samples = parked(T0, 12, 60, A);
    samples[6].speed_kmh = Some(12.0);

    let linear_eps = linear().segment(&samples, 8);
    assert!(linear_eps.is_empty());

    let merged = ClusterMergeSegmenter::default().segment(&samples, 8);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].sample_count, 11);
    assert_eq!(merged[0].duration_minutes, 11);
    assert_eq!(merged[0].detection_method, DetectionMethod::ClusterMerge);
  }

  #[test]
  fn cluster_merge_keeps_distant_stops_apart() {
    let mut samples = parked(T0, 10, 60, A);
    samples.push(s(T0 + 10 * 60, B, 50.0));
    samples.extend(parked(T0 + 11 * 60, 10, 60, B));
    let eps = ClusterMergeSegmenter::default().segment(&samples, 5);
    assert_eq!(eps.len(), 2);
  }

  #[test]
  fn strategy_kind_builds_matching_strategy() {
    let cfg = SegmenterConfig::default();
    assert_eq!(StrategyKind::Linear.build(cfg).method(), DetectionMethod::Linear);
    assert_eq!(
      StrategyKind::ClusterMerge.build(cfg).method(),
      DetectionMethod::ClusterMerge
    );
  }
}
