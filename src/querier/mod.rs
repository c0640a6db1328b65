//! Point-in-time, read-only views over a head.
use std::collections::BTreeSet;
use std::sync::Arc;
use ahash::AHashMap;
use crate::common::types::Timestamp;
use crate::error::{TsdbError, TsdbResult};
use crate::index::{postings_for_matchers, TimeSeriesIndex};
use crate::storage::SeriesRef;

pub mod matchers;
mod series_set;

pub use matchers::{validate_matchers, LabelMatcher, MatchOp};
pub use series_set::{SeriesSet, SnapshotSeries};

/// Anything which can produce a snapshot querier for a time window.
pub trait Queryable {
    fn querier(&self, mint: Timestamp, maxt: Timestamp) -> TsdbResult<BlockQuerier>;
}

impl<F> Queryable for F
where
    F: Fn(Timestamp, Timestamp) -> TsdbResult<BlockQuerier>,
{
    fn querier(&self, mint: Timestamp, maxt: Timestamp) -> TsdbResult<BlockQuerier> {
        self(mint, maxt)
    }
}

pub(crate) fn check_range(mint: Timestamp, maxt: Timestamp) -> TsdbResult<()> {
    if mint > maxt {
        return Err(TsdbError::InvalidRange { mint, maxt });
    }
    Ok(())
}

/// An immutable view over the samples a head held within `[mint, maxt]` when the querier was
/// created. Commits made afterwards are never observed.
#[derive(Debug, Clone)]
pub struct BlockQuerier {
    mint: Timestamp,
    maxt: Timestamp,
    index: Arc<TimeSeriesIndex>,
    /// series holding at least one sample in the window
    series: Arc<AHashMap<SeriesRef, Arc<SnapshotSeries>>>,
}

impl BlockQuerier {
    pub(crate) fn new(
        mint: Timestamp,
        maxt: Timestamp,
        index: Arc<TimeSeriesIndex>,
        series: AHashMap<SeriesRef, Arc<SnapshotSeries>>,
    ) -> TsdbResult<Self> {
        check_range(mint, maxt)?;
        Ok(Self {
            mint,
            maxt,
            index,
            series: Arc::new(series),
        })
    }

    pub fn mint(&self) -> Timestamp {
        self.mint
    }

    pub fn maxt(&self) -> Timestamp {
        self.maxt
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Returns the series matching all `matchers`, ordered by labels.
    pub fn select(&self, matchers: &[LabelMatcher]) -> TsdbResult<SeriesSet> {
        validate_matchers(matchers)?;
        let ids = postings_for_matchers(&self.index, matchers);
        let mut series: Vec<Arc<SnapshotSeries>> = ids
            .iter()
            .filter_map(|id| self.series.get(&id).cloned())
            .collect();
        series.sort_by(|a, b| a.labels.cmp(&b.labels));
        Ok(SeriesSet::new(series))
    }

    pub fn label_names(&self) -> BTreeSet<String> {
        self.series
            .values()
            .flat_map(|s| s.labels.iter().map(|l| l.name.clone()))
            .collect()
    }

    pub fn label_values(&self, name: &str) -> BTreeSet<String> {
        self.series
            .values()
            .filter_map(|s| s.labels.get(name).map(|v| v.to_string()))
            .collect()
    }

    /// Releases the snapshot. Dropping the querier has the same effect.
    pub fn close(self) {}
}
