//! The head: an in-memory, append-only buffer of series and their samples.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::common::labels::Labels;
use crate::common::types::Timestamp;
use crate::config::Settings;
use crate::error::{TsdbError, TsdbResult};
use crate::index::TimeSeriesIndex;
use crate::querier::{check_range, BlockQuerier, Queryable, SnapshotSeries};
use crate::storage::{NoopWal, SeriesRef, TimeSeries, WriteAheadLog, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

mod appender;

pub use appender::HeadAppender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadOptions {
    /// Samples per chunk before it is sealed.
    pub chunk_size: usize,
    /// Maximum number of series. 0 means unlimited.
    pub max_series_limit: usize,
}

impl Default for HeadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_series_limit: 0,
        }
    }
}

impl HeadOptions {
    pub fn validate(&self) -> TsdbResult<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(TsdbError::StorageInit(format!(
                "chunk_size must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        Ok(())
    }
}

impl From<&Settings> for HeadOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            max_series_limit: settings.max_series_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeadStats {
    pub num_series: usize,
    pub num_samples: usize,
    pub min_time: Option<Timestamp>,
    pub max_time: Option<Timestamp>,
}

#[derive(Debug, Default)]
pub(crate) struct HeadState {
    pub(crate) series: AHashMap<SeriesRef, TimeSeries>,
    /// shared with queriers, cloned on write
    pub(crate) index: Arc<TimeSeriesIndex>,
    pub(crate) num_samples: usize,
    pub(crate) min_time: Option<Timestamp>,
    pub(crate) max_time: Option<Timestamp>,
}

impl HeadState {
    pub(crate) fn lookup(&self, labels: &Labels) -> Option<SeriesRef> {
        self.index
            .ids_for_fingerprint(labels.fingerprint())
            .iter()
            .copied()
            .find(|id| self.series.get(id).is_some_and(|s| s.labels == *labels))
    }
}

/// The single source of truth for one session. Samples become visible to queriers only once
/// the transaction that staged them commits, and are never modified afterwards.
#[derive(Debug)]
pub struct Head {
    options: HeadOptions,
    pub(crate) state: RwLock<HeadState>,
    next_ref: AtomicU32,
    pub(crate) wal: Box<dyn WriteAheadLog>,
}

impl Default for Head {
    fn default() -> Self {
        Self::new()
    }
}

impl Head {
    pub fn new() -> Self {
        Self {
            options: HeadOptions::default(),
            state: RwLock::new(HeadState::default()),
            next_ref: AtomicU32::new(0),
            wal: Box::new(NoopWal),
        }
    }

    pub fn with_options(options: HeadOptions, wal: Box<dyn WriteAheadLog>) -> TsdbResult<Self> {
        options.validate()?;
        debug!(chunk_size = options.chunk_size, max_series = options.max_series_limit, "creating head");
        Ok(Self {
            options,
            state: RwLock::new(HeadState::default()),
            next_ref: AtomicU32::new(0),
            wal,
        })
    }

    pub fn options(&self) -> &HeadOptions {
        &self.options
    }

    /// Starts a new append transaction.
    pub fn appender(&self) -> HeadAppender<'_> {
        HeadAppender::new(self)
    }

    /// Builds a snapshot of the samples within `[mint, maxt]`. Series without samples in the
    /// window are left out.
    pub fn querier(&self, mint: Timestamp, maxt: Timestamp) -> TsdbResult<BlockQuerier> {
        check_range(mint, maxt)?;
        let state = self.state.read()?;
        let series: AHashMap<SeriesRef, Arc<SnapshotSeries>> = state
            .series
            .values()
            .filter_map(|ts| {
                let chunks = ts.snapshot_slices(mint, maxt);
                if chunks.is_empty() {
                    return None;
                }
                let snapshot = SnapshotSeries::new(ts.id, ts.labels.clone(), chunks);
                Some((ts.id, Arc::new(snapshot)))
            })
            .collect();
        debug!(mint, maxt, series = series.len(), "created block querier");
        BlockQuerier::new(mint, maxt, Arc::clone(&state.index), series)
    }

    pub fn stats(&self) -> TsdbResult<HeadStats> {
        let state = self.state.read()?;
        Ok(HeadStats {
            num_series: state.series.len(),
            num_samples: state.num_samples,
            min_time: state.min_time,
            max_time: state.max_time,
        })
    }

    pub fn series_count(&self) -> TsdbResult<usize> {
        Ok(self.state.read()?.series.len())
    }

    pub(crate) fn next_series_ref(&self) -> SeriesRef {
        // only uniqueness is needed here
        self.next_ref.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn close(&self) -> TsdbResult<()> {
        self.wal.close()
    }
}

impl Queryable for Head {
    fn querier(&self, mint: Timestamp, maxt: Timestamp) -> TsdbResult<BlockQuerier> {
        Head::querier(self, mint, maxt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::querier::LabelMatcher;
    use crate::common::types::Sample;

    fn labels(name: &str) -> Labels {
        Labels::from_metric_name(name).unwrap()
    }

    #[test]
    fn test_invalid_chunk_size() {
        let options = HeadOptions { chunk_size: 0, ..Default::default() };
        let res = Head::with_options(options, Box::new(NoopWal));
        assert!(matches!(res, Err(TsdbError::StorageInit(_))));
    }

    #[test]
    fn test_querier_excludes_series_outside_window() {
        let head = Head::new();
        let mut app = head.appender();
        app.append(None, &labels("a"), 100, 1.0).unwrap();
        app.append(None, &labels("b"), 1000, 2.0).unwrap();
        app.commit().unwrap();

        let querier = head.querier(0, 500).unwrap();
        assert_eq!(querier.series_count(), 1);
        let matchers = vec![LabelMatcher::regex("__name__", "a|b").unwrap()];
        let set: Vec<_> = querier.select(&matchers).unwrap().collect();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].samples(), vec![Sample::new(100, 1.0)]);
    }

    #[test]
    fn test_querier_ignores_later_commits() {
        let head = Head::with_options(HeadOptions { chunk_size: 2, ..Default::default() }, Box::new(NoopWal)).unwrap();
        let mut app = head.appender();
        app.append(None, &labels("up"), 1, 1.0).unwrap();
        app.commit().unwrap();

        let querier = head.querier(0, 1000).unwrap();

        // lands in the open chunk of "up", then seals it, and creates a new series
        let mut app = head.appender();
        app.append(None, &labels("up"), 2, 2.0).unwrap();
        app.append(None, &labels("up"), 3, 3.0).unwrap();
        app.append(None, &labels("down"), 2, 5.0).unwrap();
        app.commit().unwrap();

        let matchers = vec![LabelMatcher::regex("__name__", "up|down").unwrap()];
        let read = || -> Vec<(Labels, Vec<Sample>)> {
            querier
                .select(&matchers)
                .unwrap()
                .map(|s| (s.labels.clone(), s.samples()))
                .collect()
        };
        let first = read();
        let second = read();
        assert_eq!(first, vec![(labels("up"), vec![Sample::new(1, 1.0)])]);
        assert_eq!(first, second);
        assert_eq!(querier.label_values("__name__").into_iter().collect::<Vec<_>>(), vec!["up"]);

        let fresh = head.querier(0, 1000).unwrap();
        let names: Vec<_> = fresh.select(&matchers).unwrap().map(|s| s.labels.clone()).collect();
        assert_eq!(names, vec![labels("down"), labels("up")]);
    }

    #[test]
    fn test_querier_label_names_and_values() {
        let head = Head::new();
        let mut app = head.appender();
        let a = Labels::from_strings(&["__name__", "reqs", "job", "api"]).unwrap();
        let b = Labels::from_strings(&["__name__", "reqs", "job", "web", "env", "qa"]).unwrap();
        app.append(None, &a, 100, 1.0).unwrap();
        app.append(None, &b, 2000, 1.0).unwrap();
        app.commit().unwrap();

        let querier = head.querier(0, 5000).unwrap();
        let names: Vec<String> = querier.label_names().into_iter().collect();
        assert_eq!(names, vec!["__name__", "env", "job"]);
        let jobs: Vec<String> = querier.label_values("job").into_iter().collect();
        assert_eq!(jobs, vec!["api", "web"]);
        assert!(querier.label_values("missing").is_empty());

        // only series with samples in the window contribute
        let querier = head.querier(0, 500).unwrap();
        let names: Vec<String> = querier.label_names().into_iter().collect();
        assert_eq!(names, vec!["__name__", "job"]);
        assert_eq!(querier.label_values("job").into_iter().collect::<Vec<_>>(), vec!["api"]);
    }

    #[test]
    fn test_querier_invalid_range() {
        let head = Head::new();
        let res = head.querier(10, 5);
        assert_eq!(res.err(), Some(TsdbError::InvalidRange { mint: 10, maxt: 5 }));
    }

    #[test]
    fn test_stats() {
        let head = Head::new();
        assert_eq!(head.stats().unwrap(), HeadStats::default());
        let mut app = head.appender();
        app.append(None, &labels("a"), 100, 1.0).unwrap();
        app.append(None, &labels("a"), 200, 1.0).unwrap();
        app.append(None, &labels("b"), 50, 1.0).unwrap();
        app.commit().unwrap();
        let stats = head.stats().unwrap();
        assert_eq!(stats.num_series, 2);
        assert_eq!(stats.num_samples, 3);
        assert_eq!(stats.min_time, Some(50));
        assert_eq!(stats.max_time, Some(200));
    }
}
