use std::sync::Arc;
use crate::common::types::{Sample, Timestamp};
use crate::storage::uncompressed_chunk::UncompressedChunk;

#[derive(Debug, Clone, Copy)]
pub struct SeriesSlice<'a> {
    pub timestamps: &'a [i64],
    pub values: &'a [f64],
}

impl<'a> SeriesSlice<'a> {
    pub fn new(timestamps: &'a [i64], values: &'a [f64]) -> Self {
        Self { timestamps, values }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.timestamps.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.timestamps.last().copied()
    }
}

/// An index range into a shared, immutable chunk.
#[derive(Debug, Clone)]
pub struct ChunkSlice {
    chunk: Arc<UncompressedChunk>,
    start: usize,
    end: usize,
}

impl ChunkSlice {
    pub(crate) fn new(chunk: Arc<UncompressedChunk>, start: usize, end: usize) -> Self {
        debug_assert!(start < end && end <= chunk.len());
        Self { chunk, start, end }
    }

    pub(crate) fn whole(chunk: Arc<UncompressedChunk>) -> Self {
        let end = chunk.len();
        Self { chunk, start: 0, end }
    }

    pub fn as_slice(&self) -> SeriesSlice<'_> {
        SeriesSlice::new(
            &self.chunk.timestamps[self.start..self.end],
            &self.chunk.values[self.start..self.end],
        )
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Walks samples across a sequence of slices, in order.
#[derive(Debug, Clone)]
pub struct SampleSliceIterator<'a> {
    parts: Vec<SeriesSlice<'a>>,
    part: usize,
    index: usize,
}

impl<'a> SampleSliceIterator<'a> {
    pub fn new(parts: Vec<SeriesSlice<'a>>) -> Self {
        Self {
            parts,
            part: 0,
            index: 0,
        }
    }
}

impl<'a> Iterator for SampleSliceIterator<'a> {
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(slice) = self.parts.get(self.part) {
            if self.index < slice.len() {
                let sample = Sample::new(slice.timestamps[self.index], slice.values[self.index]);
                self.index += 1;
                return Some(sample);
            }
            self.part += 1;
            self.index = 0;
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.parts.iter()
            .skip(self.part)
            .map(|p| p.len())
            .sum::<usize>()
            .saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterates_across_parts() {
        let ts1 = [1, 2];
        let vs1 = [1.0, 2.0];
        let ts2: [i64; 0] = [];
        let vs2: [f64; 0] = [];
        let ts3 = [5];
        let vs3 = [5.0];
        let iter = SampleSliceIterator::new(vec![
            SeriesSlice::new(&ts1, &vs1),
            SeriesSlice::new(&ts2, &vs2),
            SeriesSlice::new(&ts3, &vs3),
        ]);
        assert_eq!(iter.size_hint(), (3, Some(3)));
        let samples: Vec<Sample> = iter.collect();
        assert_eq!(samples, vec![Sample::new(1, 1.0), Sample::new(2, 2.0), Sample::new(5, 5.0)]);
    }

    #[test]
    fn test_chunk_slice() {
        let chunk = Arc::new(UncompressedChunk::new(4, vec![1, 2, 3, 4], vec![1.0, 2.0, 3.0, 4.0]));
        let slice = ChunkSlice::new(chunk.clone(), 1, 3);
        assert_eq!(slice.len(), 2);
        assert_eq!(slice.as_slice().timestamps, &[2, 3]);
        assert_eq!(ChunkSlice::whole(chunk).len(), 4);
    }
}
