use std::sync::Arc;
use std::time::Duration;
use crate::config::Settings;
use crate::error::TsdbResult;
use crate::host::{register_ephemeral_query, register_pipeline, CallableRegistry, EPHEMERAL_QUERY_FN};
use crate::pipeline::{EphemeralQuery, MemoryReporter, Reporter, Severity};
use crate::promql::{ExpressionEvaluator, Matrix, QueryValue};
use crate::querier::Queryable;
use crate::common::types::Timestamp;

struct PanickingEvaluator;

impl ExpressionEvaluator for PanickingEvaluator {
    fn range_query(
        &self,
        _queryable: &dyn Queryable,
        _query: &str,
        _start: Timestamp,
        _end: Timestamp,
        _step: Duration,
    ) -> TsdbResult<Matrix> {
        panic!("evaluator exploded")
    }

    fn instant_query(&self, _queryable: &dyn Queryable, _query: &str, _time: Timestamp) -> TsdbResult<QueryValue> {
        panic!("evaluator exploded")
    }
}

#[test]
fn test_registered_query_reports_through_side_channel() {
    let registry = CallableRegistry::new();
    let reporter = Arc::new(MemoryReporter::new());
    let shared: Arc<dyn Reporter> = reporter.clone();
    register_ephemeral_query(&registry, Settings::default(), shared);

    assert!(registry.contains(EPHEMERAL_QUERY_FN));
    assert!(registry.invoke(EPHEMERAL_QUERY_FN));

    let info = reporter.messages(Severity::Info);
    assert!(info[0].starts_with("{__name__=\"http_requests_total\"} =>"));
    assert_eq!(info[0].lines().count(), 4);
    assert!(reporter.contains("query execution time"));
    assert!(reporter.messages(Severity::Error).is_empty());
}

#[test]
fn test_reinvocation_uses_a_fresh_head() {
    let registry = CallableRegistry::new();
    let reporter = Arc::new(MemoryReporter::new());
    register_ephemeral_query(&registry, Settings::default(), reporter.clone());

    assert!(registry.invoke(EPHEMERAL_QUERY_FN));
    assert!(registry.invoke(EPHEMERAL_QUERY_FN));

    // samples of the first call would make the second call's appends fail or add points
    assert!(reporter.messages(Severity::Warn).is_empty());
    let results: Vec<String> = reporter
        .messages(Severity::Info)
        .into_iter()
        .filter(|m| m.contains("=>"))
        .collect();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.lines().count() == 4));
}

#[test]
fn test_panics_do_not_escape_into_the_host() {
    let registry = CallableRegistry::new();
    let reporter = Arc::new(MemoryReporter::new());
    let pipeline = EphemeralQuery::with_evaluator(Settings::default(), Arc::new(PanickingEvaluator));
    register_pipeline(&registry, EPHEMERAL_QUERY_FN, pipeline, reporter.clone());

    assert!(registry.invoke(EPHEMERAL_QUERY_FN));

    let errors = reporter.messages(Severity::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("evaluator exploded"));
    // elapsed time is reported even when the run unwinds
    assert!(reporter.contains("query execution time"));
}

#[test]
fn test_unknown_function() {
    let registry = CallableRegistry::new();
    assert!(!registry.invoke(EPHEMERAL_QUERY_FN));
}
