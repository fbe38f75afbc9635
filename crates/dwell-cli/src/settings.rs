//! Runtime configuration, read from `dwell.toml` and `DWELL__*` environment
//! variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use dwell_core::{
  blind_spot::BlindSpots,
  gate::GateConfig,
  monitor::MonitorConfig,
  replay::ReplayConfig,
  segment::{SegmenterConfig, StrategyKind},
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// SQLite file holding observations and confirmed visits.
  pub store_path:         PathBuf,
  /// JSON file the telemetry feeder keeps up to date.
  pub samples_path:       PathBuf,
  /// JSON list of known locations.
  pub locations_path:     PathBuf,
  /// JSON-lines file visits are written to.
  pub journal_path:       PathBuf,
  pub poll_interval_secs: u64,
  pub monitor:            MonitorConfig,
  pub gate:               GateConfig,
  pub replay:             ReplayConfig,
  pub strategy:           StrategyKind,
  pub segmenter:          SegmenterConfig,
  pub blind_spots:        BlindSpots,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_path:         PathBuf::from("~/.local/share/dwell/visits.db"),
      samples_path:       PathBuf::from("samples.json"),
      locations_path:     PathBuf::from("locations.json"),
      journal_path:       PathBuf::from("visits.jsonl"),
      poll_interval_secs: 900,
      monitor:            MonitorConfig::default(),
      gate:               GateConfig::default(),
      replay:             ReplayConfig::default(),
      strategy:           StrategyKind::default(),
      segmenter:          SegmenterConfig::default(),
      blind_spots:        BlindSpots::default(),
    }
  }
}

impl Settings {
  /// Layer the (optional) config file under the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let raw = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("DWELL")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read config file")?;

    let mut settings: Settings = raw
      .try_deserialize()
      .context("failed to deserialise settings")?;

    for path in [
      &mut settings.store_path,
      &mut settings.samples_path,
      &mut settings.locations_path,
      &mut settings.journal_path,
    ] {
      *path = expand_tilde(path);
    }
    Ok(settings)
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
