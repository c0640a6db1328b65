use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// The only way a pipeline run communicates with its caller.
pub trait Reporter: Send + Sync {
    fn report(&self, severity: Severity, message: &str);
}

impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    fn report(&self, severity: Severity, message: &str) {
        (**self).report(severity, message)
    }
}

impl<R: Reporter + ?Sized> Reporter for &R {
    fn report(&self, severity: Severity, message: &str) {
        (**self).report(severity, message)
    }
}

/// Forwards every line to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Debug => debug!(target: "ephemeral_query", "{message}"),
            Severity::Info => info!(target: "ephemeral_query", "{message}"),
            Severity::Warn => warn!(target: "ephemeral_query", "{message}"),
            Severity::Error => error!(target: "ephemeral_query", "{message}"),
        }
    }
}

/// Keeps every reported line in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    entries: Mutex<Vec<(Severity, String)>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|(_, m)| m.contains(needle))
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, severity: Severity, message: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((severity, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_reporter() {
        let reporter = Arc::new(MemoryReporter::new());
        let shared: Arc<dyn Reporter> = reporter.clone();
        shared.report(Severity::Warn, "out of order sample");
        shared.report(Severity::Info, "done");
        assert_eq!(reporter.messages(Severity::Warn), vec!["out of order sample"]);
        assert!(reporter.contains("done"));
        assert_eq!(reporter.entries().len(), 2);
    }
}
