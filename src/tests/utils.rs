use std::sync::Arc;
use crate::common::labels::Labels;
use crate::common::types::Timestamp;
use crate::config::{SampleSpec, Settings};
use crate::error::{TsdbError, TsdbResult};
use crate::pipeline::{EphemeralQuery, MemoryReporter, PipelineReport};
use crate::storage::{WalRecord, WriteAheadLog};

pub const BASE_TIME: Timestamp = 1_700_000_000_000;

pub fn labels(pairs: &[&str]) -> Labels {
    Labels::from_strings(pairs).unwrap()
}

pub fn sample(pairs: &[&str], offset: i64, value: f64) -> SampleSpec {
    SampleSpec::new(labels(pairs), offset, value)
}

/// Settings with `query` over the given samples; everything else at its default.
pub fn settings_with(query: &str, samples: Vec<SampleSpec>) -> Settings {
    Settings {
        query: query.to_string(),
        samples,
        ..Default::default()
    }
}

pub fn run_pipeline(settings: Settings) -> (PipelineReport, Arc<MemoryReporter>) {
    let reporter = Arc::new(MemoryReporter::new());
    let report = EphemeralQuery::new(settings).run_at(BASE_TIME, reporter.as_ref());
    (report, reporter)
}

/// A write-ahead log which refuses every record.
#[derive(Debug, Default)]
pub struct FailingWal;

impl WriteAheadLog for FailingWal {
    fn log(&self, _records: &[WalRecord<'_>]) -> TsdbResult<()> {
        Err(TsdbError::StorageInit("disk full".to_string()))
    }

    fn close(&self) -> TsdbResult<()> {
        Ok(())
    }
}
