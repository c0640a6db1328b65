//! One ingest, commit, query and report cycle over a fresh head.
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};
use serde::Serialize;
use tracing::{debug, info_span};
use crate::common::labels::Labels;
use crate::common::time::{current_time_millis, format_timestamp};
use crate::common::types::Timestamp;
use crate::config::{OutputFormat, Settings};
use crate::error::TsdbError;
use crate::head::{Head, HeadOptions};
use crate::promql::{Engine, EngineOpts, ExpressionEvaluator, Matrix};
use crate::storage::{NoopWal, WriteAheadLog};

mod report;

pub use report::{MemoryReporter, Reporter, Severity, TracingReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Created,
    Ingesting,
    Committed,
    Queried,
    Reported,
}

impl Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Created => "created",
            PipelineState::Ingesting => "ingesting",
            PipelineState::Committed => "committed",
            PipelineState::Queried => "queried",
            PipelineState::Reported => "reported",
        };
        write!(f, "{s}")
    }
}

/// A sample the head refused. Ingestion carries on after it.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendFailure {
    pub labels: Labels,
    pub timestamp: Timestamp,
    pub error: TsdbError,
}

/// What happened during one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub base_time: Timestamp,
    /// every state the run passed through, in order
    pub states: Vec<PipelineState>,
    pub append_failures: Vec<AppendFailure>,
    pub committed_samples: usize,
    /// the query result, or the error which stopped the run
    pub outcome: Option<Result<Matrix, TsdbError>>,
    pub elapsed: Duration,
}

impl PipelineReport {
    fn new(base_time: Timestamp) -> Self {
        Self {
            base_time,
            states: vec![PipelineState::Created],
            append_failures: vec![],
            committed_samples: 0,
            outcome: None,
            elapsed: Duration::ZERO,
        }
    }

    fn advance(&mut self, state: PipelineState) {
        debug!(%state, "pipeline state");
        self.states.push(state);
    }

    pub fn state(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Created)
    }

    pub fn reached(&self, state: PipelineState) -> bool {
        self.states.contains(&state)
    }

    pub fn matrix(&self) -> Option<&Matrix> {
        self.outcome.as_ref().and_then(|o| o.as_ref().ok())
    }

    pub fn error(&self) -> Option<&TsdbError> {
        self.outcome.as_ref().and_then(|o| o.as_ref().err())
    }

    pub fn is_success(&self) -> bool {
        self.matrix().is_some()
    }
}

/// Renders a matrix for the reporting channel.
pub fn render_matrix(matrix: &Matrix, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text if matrix.is_empty() => "query returned no series".to_string(),
        OutputFormat::Text => matrix.to_string(),
        OutputFormat::Json => matrix.to_json().to_string(),
    }
}

/// Creates the write-ahead log handed to each run's head.
pub type WalFactory = Arc<dyn Fn() -> Box<dyn WriteAheadLog> + Send + Sync>;

fn noop_wal() -> Box<dyn WriteAheadLog> {
    Box::new(NoopWal)
}

/// Builds a fresh head on every run, ingests the configured samples, commits them and
/// evaluates the configured range query against the committed head.
#[derive(Clone)]
pub struct EphemeralQuery {
    settings: Settings,
    evaluator: Arc<dyn ExpressionEvaluator>,
    wal_factory: WalFactory,
}

impl std::fmt::Debug for EphemeralQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralQuery")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl EphemeralQuery {
    pub fn new(settings: Settings) -> Self {
        let engine = Engine::new(EngineOpts::from(&settings));
        Self::with_evaluator(settings, Arc::new(engine))
    }

    pub fn with_evaluator(settings: Settings, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self {
            settings,
            evaluator,
            wal_factory: Arc::new(noop_wal),
        }
    }

    /// Replaces the no-op write-ahead log used by every run.
    pub fn with_wal<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn WriteAheadLog> + Send + Sync + 'static,
    {
        self.wal_factory = Arc::new(factory);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn run(&self, reporter: &dyn Reporter) -> PipelineReport {
        self.run_at(current_time_millis(), reporter)
    }

    /// Runs one cycle with samples and query range anchored at `base_time`. The elapsed time
    /// is reported on every exit path.
    pub fn run_at(&self, base_time: Timestamp, reporter: &dyn Reporter) -> PipelineReport {
        let span = info_span!("ephemeral_query", base_time);
        let _enter = span.enter();

        let started = Instant::now();
        let mut report = PipelineReport::new(base_time);
        {
            let mut guard = scopeguard::guard(&mut report, |report| {
                report.elapsed = started.elapsed();
                report.advance(PipelineState::Reported);
                reporter.report(Severity::Info, &format!("query execution time: {:?}", report.elapsed));
            });
            self.execute(base_time, reporter, &mut guard);
        }
        report
    }

    fn execute(&self, base_time: Timestamp, reporter: &dyn Reporter, report: &mut PipelineReport) {
        let settings = &self.settings;

        let head = match Head::with_options(HeadOptions::from(settings), (self.wal_factory)()) {
            Ok(head) => head,
            Err(err) => {
                reporter.report(Severity::Error, &err.to_string());
                report.outcome = Some(Err(err));
                return;
            }
        };

        report.advance(PipelineState::Ingesting);
        let mut appender = head.appender();
        for sample in settings.samples.iter() {
            let timestamp = sample.timestamp(base_time);
            if let Err(err) = appender.append(None, &sample.labels, timestamp, sample.value) {
                if !err.is_append_error() {
                    // the head itself failed, staged samples are rolled back
                    reporter.report(Severity::Error, &err.to_string());
                    report.outcome = Some(Err(err));
                    return;
                }
                reporter.report(
                    Severity::Warn,
                    &format!("failed to append sample {} @[{timestamp}]: {err}", sample.labels),
                );
                report.append_failures.push(AppendFailure {
                    labels: sample.labels.clone(),
                    timestamp,
                    error: err,
                });
            }
        }
        debug!(pending = appender.pending_samples(), "committing samples");
        match appender.commit() {
            Ok(count) => report.committed_samples = count,
            Err(err) => {
                reporter.report(Severity::Error, &err.to_string());
                report.outcome = Some(Err(err));
                return;
            }
        }
        report.advance(PipelineState::Committed);

        let provider = |mint: Timestamp, maxt: Timestamp| head.querier(mint, maxt);
        let start = base_time.saturating_add(settings.query_start_offset);
        let end = base_time.saturating_add(settings.query_end_offset);
        debug!(
            query = settings.query.as_str(),
            start = %format_timestamp(start),
            end = %format_timestamp(end),
            step = ?settings.default_step,
            "running range query"
        );
        let outcome = self
            .evaluator
            .range_query(&provider, &settings.query, start, end, settings.default_step);
        match &outcome {
            Ok(matrix) => {
                report.advance(PipelineState::Queried);
                reporter.report(Severity::Info, &render_matrix(matrix, settings.output_format));
            }
            Err(err) => reporter.report(Severity::Error, &format!("query failed: {err}")),
        }
        report.outcome = Some(outcome);
    }
}
