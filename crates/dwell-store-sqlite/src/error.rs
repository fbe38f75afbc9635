//! Error type for `dwell-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("timestamp out of range: {0}")]
  Timestamp(i64),

  #[error("confirmed visit not found: {0}")]
  VisitNotFound(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
