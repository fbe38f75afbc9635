//! Dwell episodes — the output of historical segmentation.

use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

/// Which segmentation strategy produced an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
  Linear,
  ClusterMerge,
}

impl DetectionMethod {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Linear => "linear",
      Self::ClusterMerge => "cluster_merge",
    }
  }
}

/// A contiguous interval during which a device sat at one place.
///
/// `duration_minutes` is always `round((end_time - start_time) / 60)` and the
/// centroid is the unweighted mean of member samples unless the segmenter
/// was configured for time weighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DwellEpisode {
  pub device_id:        String,
  /// Unix seconds of the first member sample.
  pub start_time:       i64,
  /// Unix seconds of the last member sample.
  pub end_time:         i64,
  pub centroid_lat:     f64,
  pub centroid_lon:     f64,
  pub sample_count:     usize,
  pub duration_minutes: i64,
  pub detection_method: DetectionMethod,
}

impl DwellEpisode {
  pub fn centroid(&self) -> Coordinate {
    Coordinate::new(self.centroid_lat, self.centroid_lon)
  }

  pub fn duration_secs(&self) -> i64 { self.end_time - self.start_time }
}
