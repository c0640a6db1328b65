use std::fmt::Debug;
use crate::common::labels::Labels;
use crate::common::types::Timestamp;
use crate::error::TsdbResult;
use crate::storage::SeriesRef;

/// A sample addressed by series reference rather than by labels.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RefSample {
    pub series_ref: SeriesRef,
    pub timestamp: Timestamp,
    pub value: f64,
}

#[derive(Debug)]
pub enum WalRecord<'a> {
    Series { series_ref: SeriesRef, labels: &'a Labels },
    Samples(&'a [RefSample]),
}

/// Write path the head logs every commit to before applying it.
pub trait WriteAheadLog: Send + Sync + Debug {
    fn log(&self, records: &[WalRecord<'_>]) -> TsdbResult<()>;
    fn close(&self) -> TsdbResult<()>;
}

/// Accepts and discards every record. The head is ephemeral, there is nothing to replay.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWal;

impl WriteAheadLog for NoopWal {
    fn log(&self, _records: &[WalRecord<'_>]) -> TsdbResult<()> {
        Ok(())
    }

    fn close(&self) -> TsdbResult<()> {
        Ok(())
    }
}
