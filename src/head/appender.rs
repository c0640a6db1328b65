use ahash::AHashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use crate::common::labels::Labels;
use crate::common::types::Timestamp;
use crate::error::{TsdbError, TsdbResult};
use crate::head::{Head, HeadState};
use crate::storage::{RefSample, SeriesRef, TimeSeries, WalRecord};

/// An append transaction against a [`Head`]. Staged series and samples are invisible to
/// queriers until [`commit`](HeadAppender::commit). Dropping the appender without committing
/// discards everything staged.
#[derive(Debug)]
pub struct HeadAppender<'a> {
    head: &'a Head,
    /// series created by this transaction
    new_series: Vec<(SeriesRef, Labels)>,
    new_series_by_fingerprint: AHashMap<u64, Vec<usize>>,
    samples: Vec<RefSample>,
    /// last staged timestamp per series
    last_staged: AHashMap<SeriesRef, Timestamp>,
    closed: bool,
}

impl<'a> HeadAppender<'a> {
    pub(crate) fn new(head: &'a Head) -> Self {
        Self {
            head,
            new_series: vec![],
            new_series_by_fingerprint: AHashMap::new(),
            samples: vec![],
            last_staged: AHashMap::new(),
            closed: false,
        }
    }

    /// Number of samples staged so far.
    pub fn pending_samples(&self) -> usize {
        self.samples.len()
    }

    /// Stages a sample. `series_ref` is a hint returned by an earlier append and is used in
    /// place of a label lookup when it names a known series.
    pub fn append(
        &mut self,
        series_ref: Option<SeriesRef>,
        labels: &Labels,
        timestamp: Timestamp,
        value: f64,
    ) -> TsdbResult<SeriesRef> {
        let head = self.head;
        let state = head.state.read()?;

        let known = series_ref.filter(|r| {
            state.series.contains_key(r) || self.new_series.iter().any(|(id, _)| id == r)
        });
        let (id, committed_last) = match known.or_else(|| state.lookup(labels)) {
            Some(id) => {
                let last = state
                    .series
                    .get(&id)
                    .filter(|s| !s.is_empty())
                    .map(|s| s.last_timestamp);
                (id, last)
            }
            None => match self.staged_series(labels) {
                Some(id) => (id, None),
                None => (self.stage_series(&state, labels)?, None),
            },
        };
        drop(state);

        if let Some(last) = self.last_staged.get(&id).copied().or(committed_last) {
            if timestamp <= last {
                return Err(TsdbError::OutOfOrderSample {
                    series: labels.to_string(),
                    timestamp,
                    last_timestamp: last,
                });
            }
        }

        self.samples.push(RefSample {
            series_ref: id,
            timestamp,
            value,
        });
        self.last_staged.insert(id, timestamp);
        Ok(id)
    }

    fn staged_series(&self, labels: &Labels) -> Option<SeriesRef> {
        self.new_series_by_fingerprint
            .get(&labels.fingerprint())?
            .iter()
            .map(|&idx| &self.new_series[idx])
            .find(|(_, l)| l == labels)
            .map(|(id, _)| *id)
    }

    fn stage_series(&mut self, state: &HeadState, labels: &Labels) -> TsdbResult<SeriesRef> {
        if labels.is_empty() {
            return Err(TsdbError::InvalidLabels("empty label set".to_string()));
        }
        let limit = self.head.options().max_series_limit;
        if limit > 0 && state.series.len() + self.new_series.len() >= limit {
            return Err(TsdbError::SeriesLimitExceeded {
                limit,
                series: labels.to_string(),
            });
        }
        let id = self.head.next_series_ref();
        self.new_series_by_fingerprint
            .entry(labels.fingerprint())
            .or_default()
            .push(self.new_series.len());
        self.new_series.push((id, labels.clone()));
        Ok(id)
    }

    /// Applies all staged series and samples atomically. Either everything becomes visible
    /// or, on error, nothing does.
    pub fn commit(mut self) -> TsdbResult<usize> {
        self.closed = true;
        let new_series = std::mem::take(&mut self.new_series);
        let samples = std::mem::take(&mut self.samples);

        let head = self.head;
        let mut guard = head.state.write()?;
        let state = &mut *guard;

        // series created by a transaction which committed after this one started are reused
        let mut remap: AHashMap<SeriesRef, SeriesRef> = AHashMap::new();
        let mut created: Vec<(SeriesRef, Labels)> = Vec::with_capacity(new_series.len());
        for (id, labels) in new_series {
            match state.lookup(&labels) {
                Some(existing) => {
                    remap.insert(id, existing);
                }
                None => created.push((id, labels)),
            }
        }

        let limit = head.options().max_series_limit;
        if limit > 0 && state.series.len() + created.len() > limit {
            return Err(TsdbError::Commit(format!(
                "series limit {limit} exceeded by {} new series",
                created.len()
            )));
        }

        let mut last_seen: AHashMap<SeriesRef, Timestamp> = AHashMap::new();
        let mut resolved: Vec<RefSample> = Vec::with_capacity(samples.len());
        for sample in samples {
            let id = remap.get(&sample.series_ref).copied().unwrap_or(sample.series_ref);
            let committed = state.series.get(&id);
            if committed.is_none() && !created.iter().any(|(c, _)| *c == id) {
                return Err(TsdbError::Commit(format!("unknown series ref {id}")));
            }
            let last = last_seen.get(&id).copied().or_else(|| {
                committed.filter(|s| !s.is_empty()).map(|s| s.last_timestamp)
            });
            if let Some(last) = last.filter(|&last| sample.timestamp <= last) {
                let series = committed
                    .map(|s| s.labels.to_string())
                    .or_else(|| created.iter().find(|(c, _)| *c == id).map(|(_, l)| l.to_string()))
                    .unwrap_or_default();
                return Err(TsdbError::Commit(format!(
                    "out of order sample for series {series}: timestamp {} is not after {last}",
                    sample.timestamp
                )));
            }
            last_seen.insert(id, sample.timestamp);
            resolved.push(RefSample { series_ref: id, ..sample });
        }

        {
            let mut records: Vec<WalRecord> = created
                .iter()
                .map(|(id, labels)| WalRecord::Series { series_ref: *id, labels })
                .collect();
            if !resolved.is_empty() {
                records.push(WalRecord::Samples(&resolved));
            }
            if !records.is_empty() {
                head.wal
                    .log(&records)
                    .map_err(|e| TsdbError::Commit(format!("write-ahead log: {e}")))?;
            }
        }

        let chunk_size = head.options().chunk_size;
        let series_count = created.len();
        if !created.is_empty() {
            let index = Arc::make_mut(&mut state.index);
            for (id, labels) in created {
                index.index_series(id, &labels);
                state.series.insert(id, TimeSeries::new(id, labels, chunk_size));
            }
        }

        for sample in resolved.iter() {
            let Some(series) = state.series.get_mut(&sample.series_ref) else {
                return Err(TsdbError::Commit(format!("unknown series ref {}", sample.series_ref)));
            };
            // ordering was checked above, this cannot fail
            series.add(sample.timestamp, sample.value)?;
            state.min_time = Some(state.min_time.map_or(sample.timestamp, |t| t.min(sample.timestamp)));
            state.max_time = Some(state.max_time.map_or(sample.timestamp, |t| t.max(sample.timestamp)));
        }
        state.num_samples += resolved.len();

        debug!(series = series_count, samples = resolved.len(), "committed append transaction");
        Ok(resolved.len())
    }

    /// Discards everything staged.
    pub fn rollback(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        self.closed = true;
        self.new_series.clear();
        self.new_series_by_fingerprint.clear();
        self.samples.clear();
        self.last_staged.clear();
    }
}

impl Drop for HeadAppender<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if !self.samples.is_empty() {
                warn!(samples = self.samples.len(), "append transaction dropped without commit, rolling back");
            }
            self.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Sample;
    use crate::head::HeadOptions;
    use crate::querier::LabelMatcher;
    use crate::storage::NoopWal;
    use crate::tests::utils::FailingWal;

    fn labels(name: &str) -> Labels {
        Labels::from_metric_name(name).unwrap()
    }

    fn samples_of(head: &Head, name: &str) -> Vec<Sample> {
        let querier = head.querier(i64::MIN, i64::MAX).unwrap();
        querier
            .select(&[LabelMatcher::equal("__name__", name)])
            .unwrap()
            .flat_map(|s| s.samples())
            .collect()
    }

    #[test]
    fn test_commit_makes_samples_visible() {
        let head = Head::new();
        let mut app = head.appender();
        let id = app.append(None, &labels("up"), 1, 1.0).unwrap();
        assert_eq!(app.append(Some(id), &labels("up"), 2, 2.0).unwrap(), id);
        assert!(samples_of(&head, "up").is_empty());
        assert_eq!(app.commit().unwrap(), 2);
        assert_eq!(samples_of(&head, "up"), vec![Sample::new(1, 1.0), Sample::new(2, 2.0)]);
    }

    #[test]
    fn test_stale_hint_falls_back_to_labels() {
        let head = Head::new();
        let mut app = head.appender();
        let id = app.append(Some(999), &labels("up"), 1, 1.0).unwrap();
        assert_ne!(id, 999);
        app.commit().unwrap();
    }

    #[test]
    fn test_out_of_order_within_transaction() {
        let head = Head::new();
        let mut app = head.appender();
        app.append(None, &labels("up"), 10, 1.0).unwrap();
        let res = app.append(None, &labels("up"), 10, 2.0);
        assert!(matches!(res, Err(TsdbError::OutOfOrderSample { timestamp: 10, last_timestamp: 10, .. })));
        let res = app.append(None, &labels("up"), 5, 2.0);
        assert!(matches!(res, Err(TsdbError::OutOfOrderSample { .. })));
        assert_eq!(app.commit().unwrap(), 1);
    }

    #[test]
    fn test_out_of_order_against_committed() {
        let head = Head::new();
        let mut app = head.appender();
        app.append(None, &labels("up"), 10, 1.0).unwrap();
        app.commit().unwrap();

        let mut app = head.appender();
        let res = app.append(None, &labels("up"), 9, 2.0);
        assert!(matches!(res, Err(TsdbError::OutOfOrderSample { last_timestamp: 10, .. })));
    }

    #[test]
    fn test_rollback_and_drop_discard() {
        let head = Head::new();
        let mut app = head.appender();
        app.append(None, &labels("up"), 1, 1.0).unwrap();
        app.rollback();
        {
            let mut app = head.appender();
            app.append(None, &labels("down"), 1, 1.0).unwrap();
        }
        assert_eq!(head.stats().unwrap().num_series, 0);
        assert_eq!(head.stats().unwrap().num_samples, 0);
    }

    #[test]
    fn test_empty_labels_rejected() {
        let head = Head::new();
        let mut app = head.appender();
        let res = app.append(None, &Labels::empty(), 1, 1.0);
        assert!(matches!(res, Err(TsdbError::InvalidLabels(_))));
    }

    #[test]
    fn test_series_limit() {
        let options = HeadOptions { max_series_limit: 1, ..Default::default() };
        let head = Head::with_options(options, Box::new(NoopWal)).unwrap();
        let mut app = head.appender();
        app.append(None, &labels("a"), 1, 1.0).unwrap();
        app.append(None, &labels("a"), 2, 1.0).unwrap();
        let res = app.append(None, &labels("b"), 1, 1.0);
        assert!(matches!(res, Err(TsdbError::SeriesLimitExceeded { limit: 1, .. })));
    }

    #[test]
    fn test_conflicting_commit_applies_nothing() {
        let head = Head::new();
        let mut first = head.appender();
        let mut second = head.appender();
        first.append(None, &labels("up"), 10, 1.0).unwrap();
        second.append(None, &labels("up"), 5, 2.0).unwrap();
        second.append(None, &labels("other"), 5, 2.0).unwrap();
        first.commit().unwrap();

        let res = second.commit();
        assert!(matches!(res, Err(TsdbError::Commit(_))));
        let stats = head.stats().unwrap();
        assert_eq!(stats.num_series, 1);
        assert_eq!(stats.num_samples, 1);
    }

    #[test]
    fn test_concurrently_created_series_are_merged() {
        let head = Head::new();
        let mut first = head.appender();
        let mut second = head.appender();
        first.append(None, &labels("up"), 1, 1.0).unwrap();
        second.append(None, &labels("up"), 2, 2.0).unwrap();
        first.commit().unwrap();
        second.commit().unwrap();

        assert_eq!(head.stats().unwrap().num_series, 1);
        assert_eq!(samples_of(&head, "up"), vec![Sample::new(1, 1.0), Sample::new(2, 2.0)]);
    }

    #[test]
    fn test_wal_failure_fails_commit() {
        let head = Head::with_options(HeadOptions::default(), Box::new(FailingWal)).unwrap();
        let mut app = head.appender();
        app.append(None, &labels("up"), 1, 1.0).unwrap();
        assert!(matches!(app.commit(), Err(TsdbError::Commit(_))));
        assert_eq!(head.stats().unwrap().num_series, 0);
    }
}
