use std::sync::Arc;
use crate::common::labels::Labels;
use crate::common::types::{Sample, Timestamp};
use crate::storage::utils::get_timestamp_index_bounds;
use crate::storage::{ChunkSlice, SampleSliceIterator, SeriesRef, SeriesSlice};

/// The samples of one series captured by a querier, bounded to the querier's window.
#[derive(Debug, Clone)]
pub struct SnapshotSeries {
    pub id: SeriesRef,
    pub labels: Labels,
    chunks: Vec<ChunkSlice>,
}

impl SnapshotSeries {
    pub(crate) fn new(id: SeriesRef, labels: Labels, chunks: Vec<ChunkSlice>) -> Self {
        Self { id, labels, chunks }
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| c.is_empty())
    }

    pub fn iter(&self) -> SampleSliceIterator<'_> {
        SampleSliceIterator::new(self.chunks.iter().map(|c| c.as_slice()).collect())
    }

    /// Samples within `[start, end]` (both inclusive).
    pub fn range_iter(&self, start: Timestamp, end: Timestamp) -> SampleSliceIterator<'_> {
        let parts: Vec<SeriesSlice> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                let slice = chunk.as_slice();
                get_timestamp_index_bounds(slice.timestamps, start, end).map(|(lo, hi)| {
                    SeriesSlice::new(&slice.timestamps[lo..hi], &slice.values[lo..hi])
                })
            })
            .collect();
        SampleSliceIterator::new(parts)
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.iter().collect()
    }

    /// The last sample at or before `ts`.
    pub fn sample_at_or_before(&self, ts: Timestamp) -> Option<Sample> {
        self.chunks.iter().rev().find_map(|chunk| {
            let slice = chunk.as_slice();
            let idx = slice.timestamps.partition_point(|&t| t <= ts);
            (idx > 0).then(|| Sample::new(slice.timestamps[idx - 1], slice.values[idx - 1]))
        })
    }
}

/// Result of a select: the matched series, ordered by labels.
///
/// The set is single pass. Calling `select` again on the querier yields an identical set.
#[derive(Debug, Default)]
pub struct SeriesSet {
    series: std::vec::IntoIter<Arc<SnapshotSeries>>,
}

impl SeriesSet {
    pub(crate) fn new(series: Vec<Arc<SnapshotSeries>>) -> Self {
        Self {
            series: series.into_iter(),
        }
    }
}

impl Iterator for SeriesSet {
    type Item = Arc<SnapshotSeries>;

    fn next(&mut self) -> Option<Self::Item> {
        self.series.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.series.size_hint()
    }
}

impl ExactSizeIterator for SeriesSet {}
