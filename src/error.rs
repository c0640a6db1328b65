use std::time::Duration;
use thiserror::Error;
use crate::common::types::Timestamp;

#[derive(Debug, Error, Clone, PartialEq)]
/// Enum for various errors in Tsdb.
pub enum TsdbError {
  #[error("failed to create storage: {0}")]
  StorageInit(String),

  #[error("out of order sample for series {series}: timestamp {timestamp} is not after {last_timestamp}")]
  OutOfOrderSample {
    series: String,
    timestamp: Timestamp,
    last_timestamp: Timestamp,
  },

  #[error("invalid labels: {0}")]
  InvalidLabels(String),

  #[error("series limit exceeded: limit={limit}, series={series}")]
  SeriesLimitExceeded { limit: usize, series: String },

  #[error("commit failed: {0}")]
  Commit(String),

  #[error("invalid time range: mint={mint} is after maxt={maxt}")]
  InvalidRange { mint: Timestamp, maxt: Timestamp },

  #[error("invalid matcher: {0}")]
  InvalidMatcher(String),

  #[error("parse error: {0}")]
  Parse(String),

  #[error("evaluation error: {0}")]
  Evaluation(String),

  #[error("query timed out after {0:?}")]
  QueryTimeout(Duration),

  #[error("query processing would load too many samples into memory (limit {0})")]
  TooManySamples(usize),

  #[error("Invalid configuration. {0}")]
  InvalidConfiguration(String),

  #[error("Lock acquisition failed: {0}")]
  LockError(String),
}

impl TsdbError {
  /// Errors which only affect the sample being appended. Ingestion carries on after them.
  pub fn is_append_error(&self) -> bool {
    matches!(
      self,
      TsdbError::OutOfOrderSample { .. }
        | TsdbError::InvalidLabels(_)
        | TsdbError::SeriesLimitExceeded { .. }
    )
  }
}

impl<T> From<std::sync::PoisonError<T>> for TsdbError {
  fn from(err: std::sync::PoisonError<T>) -> Self {
    TsdbError::LockError(format!("RwLock poisoned: {}", err))
  }
}

pub type TsdbResult<T> = Result<T, TsdbError>;

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{Mutex, PoisonError};
  use test_case::test_case;

  #[test_case(TsdbError::OutOfOrderSample { series: "{}".into(), timestamp: 1, last_timestamp: 2 }, true)]
  #[test_case(TsdbError::InvalidLabels("empty label set".into()), true)]
  #[test_case(TsdbError::SeriesLimitExceeded { limit: 1, series: "{}".into() }, true)]
  #[test_case(TsdbError::Commit("write-ahead log".into()), false)]
  #[test_case(TsdbError::LockError("poisoned".into()), false)]
  fn test_is_append_error(err: TsdbError, expected: bool) {
    assert_eq!(err.is_append_error(), expected);
  }

  #[test]
  fn test_poison_converts_to_lock_error() {
    let lock = Mutex::new(());
    let err: TsdbError = PoisonError::new(lock.lock().unwrap()).into();
    assert!(matches!(err, TsdbError::LockError(_)));
  }
}
