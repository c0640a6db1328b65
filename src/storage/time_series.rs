use std::sync::Arc;
use crate::common::labels::Labels;
use crate::common::types::{Sample, Timestamp};
use crate::error::{TsdbError, TsdbResult};
use crate::storage::slice::{ChunkSlice, SampleSliceIterator, SeriesSlice};
use crate::storage::uncompressed_chunk::UncompressedChunk;
use crate::storage::SeriesRef;

/// Represents a time series held in the head. Samples are appended to an open chunk; once it
/// reaches capacity it is sealed and shared, and never written again.
#[derive(Clone, Debug)]
pub struct TimeSeries {
    /// fixed internal id used in indexing
    pub id: SeriesRef,
    pub labels: Labels,
    chunk_size: usize,
    sealed: Vec<Arc<UncompressedChunk>>,
    head_chunk: UncompressedChunk,

    // meta
    pub total_samples: usize,
    pub first_timestamp: Timestamp,
    pub last_timestamp: Timestamp,
    pub last_value: f64,
}

impl TimeSeries {
    pub fn new(id: SeriesRef, labels: Labels, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        TimeSeries {
            id,
            labels,
            chunk_size,
            sealed: vec![],
            head_chunk: UncompressedChunk::with_max_elements(chunk_size),
            total_samples: 0,
            first_timestamp: 0,
            last_timestamp: 0,
            last_value: f64::NAN,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_samples == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.sealed.len() + usize::from(!self.head_chunk.is_empty())
    }

    /// Checks that `ts` may be appended after the samples already stored.
    pub fn check_append(&self, ts: Timestamp) -> TsdbResult<()> {
        if !self.is_empty() && ts <= self.last_timestamp {
            return Err(TsdbError::OutOfOrderSample {
                series: self.labels.to_string(),
                timestamp: ts,
                last_timestamp: self.last_timestamp,
            });
        }
        Ok(())
    }

    pub fn add(&mut self, ts: Timestamp, value: f64) -> TsdbResult<()> {
        self.check_append(ts)?;

        if self.head_chunk.is_full() {
            self.seal_head_chunk();
        }
        self.head_chunk.push(Sample::new(ts, value));

        if self.is_empty() {
            self.first_timestamp = ts;
        }
        self.last_value = value;
        self.last_timestamp = ts;
        self.total_samples += 1;
        Ok(())
    }

    fn seal_head_chunk(&mut self) {
        let fresh = UncompressedChunk::with_max_elements(self.chunk_size);
        let full = std::mem::replace(&mut self.head_chunk, fresh);
        self.sealed.push(Arc::new(full));
    }

    pub fn overlaps(&self, start_ts: Timestamp, end_ts: Timestamp) -> bool {
        !self.is_empty() && self.last_timestamp >= start_ts && self.first_timestamp <= end_ts
    }

    /// Index of the first sealed chunk which may hold samples at or after `timestamp`.
    fn first_chunk_index(&self, timestamp: Timestamp) -> usize {
        self.sealed
            .partition_point(|chunk| chunk.last_timestamp().map_or(true, |ts| ts < timestamp))
    }

    /// Borrowed views of the stored samples between `start` and `end` (both inclusive).
    fn range_slices(&self, start: Timestamp, end: Timestamp) -> Vec<SeriesSlice<'_>> {
        if !self.overlaps(start, end) {
            return vec![];
        }
        let index = self.first_chunk_index(start);
        let mut slices: Vec<SeriesSlice> = self.sealed[index..]
            .iter()
            .take_while(|chunk| chunk.first_timestamp().map_or(false, |ts| ts <= end))
            .filter_map(|chunk| chunk.range_slice(start, end))
            .collect();
        if let Some(slice) = self.head_chunk.range_slice(start, end) {
            slices.push(slice);
        }
        slices
    }

    pub fn range_iter(&self, start: Timestamp, end: Timestamp) -> SampleSliceIterator<'_> {
        SampleSliceIterator::new(self.range_slices(start, end))
    }

    pub fn iter(&self) -> SampleSliceIterator<'_> {
        self.range_iter(self.first_timestamp, self.last_timestamp)
    }

    /// Get the samples between given start and end time (both inclusive).
    pub fn get_range(&self, start: Timestamp, end: Timestamp) -> Vec<Sample> {
        self.range_iter(start, end).collect()
    }

    /// Returns a detached view of the samples within `[start, end]`. Sealed chunks are shared,
    /// while the in-range part of the open chunk is copied, so later appends are not visible
    /// through the result.
    pub fn snapshot_slices(&self, start: Timestamp, end: Timestamp) -> Vec<ChunkSlice> {
        if !self.overlaps(start, end) {
            return vec![];
        }
        let index = self.first_chunk_index(start);
        let mut slices: Vec<ChunkSlice> = self.sealed[index..]
            .iter()
            .take_while(|chunk| chunk.first_timestamp().map_or(false, |ts| ts <= end))
            .filter_map(|chunk| {
                chunk
                    .range_bounds(start, end)
                    .map(|(lo, hi)| ChunkSlice::new(Arc::clone(chunk), lo, hi))
            })
            .collect();
        if let Some(copy) = self.head_chunk.copy_range(start, end) {
            slices.push(ChunkSlice::whole(Arc::new(copy)));
        }
        slices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_series(chunk_size: usize) -> TimeSeries {
        let labels = Labels::from_metric_name("latency").unwrap();
        TimeSeries::new(1, labels, chunk_size)
    }

    #[test]
    fn test_one_entry() {
        let mut ts = new_series(8);
        ts.add(100, 200.0).unwrap();

        let samples = ts.get_range(0, 1000);
        assert_eq!(samples, vec![Sample::new(100, 200.0)]);
        assert_eq!(ts.total_samples, 1);
        assert_eq!(ts.first_timestamp, 100);
        assert_eq!(ts.last_timestamp, 100);
        assert_eq!(ts.last_value, 200.0);
    }

    #[test]
    fn test_1000_entries_across_chunks() {
        let mut ts = new_series(64);
        for i in 0..1000 {
            ts.add(i * 10, i as f64).unwrap();
        }

        assert_eq!(ts.total_samples, 1000);
        assert_eq!(ts.chunk_count(), 16);
        for (i, sample) in ts.iter().enumerate() {
            assert_eq!(sample.timestamp, i as i64 * 10);
            assert_eq!(sample.value, i as f64);
        }
    }

    #[test]
    fn test_range_spans_chunk_boundaries() {
        let mut ts = new_series(4);
        for i in 0..20 {
            ts.add(i, i as f64).unwrap();
        }
        let timestamps: Vec<i64> = ts.range_iter(3, 9).map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![3, 4, 5, 6, 7, 8, 9]);
        assert!(ts.get_range(20, 30).is_empty());
        assert!(ts.get_range(-10, -1).is_empty());
    }

    #[test]
    fn test_out_of_order_and_duplicate_rejected() {
        let mut ts = new_series(4);
        ts.add(100, 1.0).unwrap();
        assert!(matches!(ts.add(100, 2.0), Err(TsdbError::OutOfOrderSample { timestamp: 100, last_timestamp: 100, .. })));
        assert!(matches!(ts.add(50, 2.0), Err(TsdbError::OutOfOrderSample { .. })));
        assert_eq!(ts.total_samples, 1);
        assert_eq!(ts.last_value, 1.0);
    }

    #[test]
    fn test_snapshot_does_not_see_later_appends() {
        let mut ts = new_series(4);
        for i in 0..6 {
            ts.add(i, i as f64).unwrap();
        }
        let slices = ts.snapshot_slices(0, 100);
        ts.add(6, 6.0).unwrap();
        ts.add(7, 7.0).unwrap();

        let count: usize = slices.iter().map(|s| s.len()).sum();
        assert_eq!(count, 6);
        assert_eq!(ts.get_range(0, 100).len(), 8);
    }

    #[test]
    fn test_snapshot_bounds_to_window() {
        let mut ts = new_series(3);
        for i in 0..10 {
            ts.add(i * 10, i as f64).unwrap();
        }
        let slices = ts.snapshot_slices(25, 65);
        let timestamps: Vec<i64> = slices
            .iter()
            .flat_map(|s| s.as_slice().timestamps.to_vec())
            .collect();
        assert_eq!(timestamps, vec![30, 40, 50, 60]);
    }
}
