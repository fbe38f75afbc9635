//! Error types for `dwell-core`.
//!
//! Data-quality problems (missing fixes, missing speeds, gaps) are never
//! errors; the engine components absorb them. Only boundary failures end up
//! here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid time range: start {start} is after end {end}")]
  InvalidRange { start: i64, end: i64 },

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("telemetry error: {0}")]
  Telemetry(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("location directory error: {0}")]
  Directory(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("visit sink error: {0}")]
  Sink(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  pub fn telemetry(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Telemetry(Box::new(e))
  }

  pub fn directory(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Directory(Box::new(e))
  }

  pub fn sink(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Sink(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
