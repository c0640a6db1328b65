use crate::common::types::{Sample, Timestamp};
use crate::storage::constants::DEFAULT_CHUNK_SIZE;
use crate::storage::utils::get_timestamp_index_bounds;
use crate::storage::slice::SeriesSlice;

/// A fixed capacity block of samples stored column-wise. Timestamps are strictly increasing.
#[derive(Clone, Debug, PartialEq)]
pub struct UncompressedChunk {
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
    max_elements: usize,
}

impl Default for UncompressedChunk {
    fn default() -> Self {
        Self::with_max_elements(DEFAULT_CHUNK_SIZE)
    }
}

impl UncompressedChunk {
    pub fn new(max_elements: usize, timestamps: Vec<i64>, values: Vec<f64>) -> Self {
        debug_assert_eq!(timestamps.len(), values.len());
        Self {
            timestamps,
            values,
            max_elements,
        }
    }

    pub fn with_max_elements(max_elements: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(max_elements),
            values: Vec::with_capacity(max_elements),
            max_elements,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_elements
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.timestamps.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.timestamps.last().copied()
    }

    /// Appends a sample. Callers check ordering and capacity first.
    pub(crate) fn push(&mut self, sample: Sample) {
        debug_assert!(!self.is_full());
        debug_assert!(self.last_timestamp().map_or(true, |ts| ts < sample.timestamp));
        self.timestamps.push(sample.timestamp);
        self.values.push(sample.value);
    }

    /// Index range of the samples within `[start, end]`.
    pub fn range_bounds(&self, start: Timestamp, end: Timestamp) -> Option<(usize, usize)> {
        get_timestamp_index_bounds(&self.timestamps, start, end)
    }

    pub fn range_slice(&self, start: Timestamp, end: Timestamp) -> Option<SeriesSlice<'_>> {
        self.range_bounds(start, end)
            .map(|(lo, hi)| SeriesSlice::new(&self.timestamps[lo..hi], &self.values[lo..hi]))
    }

    /// Copies the samples within `[start, end]` into a new chunk sized to fit them.
    pub fn copy_range(&self, start: Timestamp, end: Timestamp) -> Option<Self> {
        self.range_slice(start, end).map(|slice| {
            Self::new(slice.len(), slice.timestamps.to_vec(), slice.values.to_vec())
        })
    }
}
