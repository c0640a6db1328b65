use std::sync::Arc;
use std::time::Instant;
use ahash::AHashMap;
use promql_parser::parser::{AggregateExpr, BinaryExpr, Call, Expr, MatrixSelector, Offset, VectorSelector};
use rayon::prelude::*;
use tracing::trace;
use crate::common::labels::Labels;
use crate::common::time::duration_to_millis;
use crate::common::types::{Sample, Timestamp};
use crate::common::METRIC_NAME_LABEL;
use crate::error::{TsdbError, TsdbResult};
use crate::promql::aggregate::{aggregate, Aggregation};
use crate::promql::binop::{vector_scalar, vector_vector, BinaryOp};
use crate::promql::functions::{MathFunction, RangeFunction};
use crate::promql::result::{InstantSample, Series};
use crate::promql::EngineOpts;
use crate::querier::{BlockQuerier, LabelMatcher, MatchOp, SnapshotSeries};

/// Intermediate value of an expression at one evaluation instant.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Scalar(f64),
    Vector(Vec<InstantSample>),
    String(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Vector(_) => "instant vector",
            Value::String(_) => "string",
        }
    }
}

type SelectedSeries = Arc<Vec<Arc<SnapshotSeries>>>;

pub(crate) fn offset_millis(offset: &Option<Offset>) -> i64 {
    match offset {
        Some(Offset::Pos(d)) => duration_to_millis(*d),
        Some(Offset::Neg(d)) => -duration_to_millis(*d),
        None => 0,
    }
}

pub(crate) fn unwrap_parens(expr: &Expr) -> &Expr {
    match expr {
        Expr::Paren(p) => unwrap_parens(&p.expr),
        other => other,
    }
}

fn reject_at_modifier(vs: &VectorSelector) -> TsdbResult<()> {
    if vs.at.is_some() {
        return Err(TsdbError::Evaluation("@ modifier is not supported".to_string()));
    }
    Ok(())
}

/// Matchers of a selector, including the one implied by a bare metric name.
pub(crate) fn selector_matchers(vs: &VectorSelector) -> TsdbResult<Vec<LabelMatcher>> {
    let mut matchers = vs
        .matchers
        .matchers
        .iter()
        .map(LabelMatcher::try_from)
        .collect::<TsdbResult<Vec<_>>>()?;
    if let Some(name) = &vs.name {
        let present = matchers
            .iter()
            .any(|m| m.name == METRIC_NAME_LABEL && m.op == MatchOp::Equal && m.value == *name);
        if !present {
            matchers.push(LabelMatcher::equal(METRIC_NAME_LABEL, name));
        }
    }
    Ok(matchers)
}

/// Evaluates expressions over one querier, one instant at a time.
pub(crate) struct Evaluator<'a> {
    querier: &'a BlockQuerier,
    opts: &'a EngineOpts,
    start: Timestamp,
    /// 0 for instant queries
    step: i64,
    lookback: i64,
    deadline: Instant,
    selections: AHashMap<String, SelectedSeries>,
    /// samples loaded while evaluating the current step
    current_samples: usize,
    /// points held in the result so far
    held_samples: usize,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(
        querier: &'a BlockQuerier,
        opts: &'a EngineOpts,
        start: Timestamp,
        step: i64,
        deadline: Instant,
    ) -> Self {
        Self {
            querier,
            opts,
            start,
            step,
            lookback: duration_to_millis(opts.lookback_delta),
            deadline,
            selections: AHashMap::new(),
            current_samples: 0,
            held_samples: 0,
        }
    }

    fn check_deadline(&self) -> TsdbResult<()> {
        if Instant::now() >= self.deadline {
            return Err(TsdbError::QueryTimeout(self.opts.timeout));
        }
        Ok(())
    }

    fn add_samples(&mut self, count: usize) -> TsdbResult<()> {
        self.current_samples += count;
        if self.held_samples + self.current_samples > self.opts.max_samples {
            return Err(TsdbError::TooManySamples(self.opts.max_samples));
        }
        Ok(())
    }

    /// Within a range query, selectors never look further back than the previous step, so a
    /// raw sample shows up at most once in the result.
    fn effective_lookback(&self, t: Timestamp) -> i64 {
        if self.step > 0 && t > self.start {
            self.lookback.min(self.step)
        } else {
            self.lookback
        }
    }

    /// Evaluates `expr` at every step in `[start, end]`, collecting one series per label set.
    pub(crate) fn eval_range(&mut self, expr: &Expr, end: Timestamp) -> TsdbResult<Vec<Series>> {
        let mut series: AHashMap<Labels, Vec<Sample>> = AHashMap::new();
        let mut t = self.start;
        while t <= end {
            self.check_deadline()?;
            self.current_samples = 0;
            let samples = match self.eval(expr, t)? {
                Value::Scalar(v) => vec![InstantSample::new(Labels::empty(), t, v)],
                Value::Vector(samples) => samples,
                other => {
                    return Err(TsdbError::Parse(format!(
                        "invalid expression type \"{}\" for range query, must be scalar or instant vector",
                        other.type_name()
                    )))
                }
            };
            for sample in samples {
                let points = series.entry(sample.labels).or_default();
                if points.last().is_some_and(|p| p.timestamp == t) {
                    return Err(TsdbError::Evaluation(
                        "vector cannot contain metrics with the same labelset".to_string(),
                    ));
                }
                points.push(Sample::new(t, sample.value));
                self.held_samples += 1;
            }
            if self.held_samples > self.opts.max_samples {
                return Err(TsdbError::TooManySamples(self.opts.max_samples));
            }
            trace!(t, points = self.held_samples, "evaluated step");
            t = match t.checked_add(self.step) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(series
            .into_iter()
            .map(|(labels, samples)| Series::new(labels, samples))
            .collect())
    }

    /// Raw samples of a top level range selector, for instant queries.
    pub(crate) fn eval_matrix_selector(&mut self, ms: &MatrixSelector, t: Timestamp) -> TsdbResult<Vec<Series>> {
        reject_at_modifier(&ms.vs)?;
        let selected = self.select(&ms.vs)?;
        let ref_time = t.saturating_sub(offset_millis(&ms.vs.offset));
        let range_start = ref_time.saturating_sub(duration_to_millis(ms.range));
        let mut result = Vec::with_capacity(selected.len());
        for s in selected.iter() {
            let samples: Vec<Sample> = s
                .range_iter(range_start.saturating_add(1), ref_time)
                .filter(|s| !s.is_stale())
                .collect();
            self.add_samples(samples.len())?;
            if !samples.is_empty() {
                result.push(Series::new(s.labels.clone(), samples));
            }
        }
        Ok(result)
    }

    pub(crate) fn eval(&mut self, expr: &Expr, t: Timestamp) -> TsdbResult<Value> {
        match expr {
            Expr::NumberLiteral(n) => Ok(Value::Scalar(n.val)),
            Expr::StringLiteral(s) => Ok(Value::String(s.val.clone())),
            Expr::Paren(p) => self.eval(&p.expr, t),
            Expr::Unary(u) => match self.eval(&u.expr, t)? {
                Value::Scalar(v) => Ok(Value::Scalar(-v)),
                Value::Vector(samples) => Ok(Value::Vector(
                    samples
                        .into_iter()
                        .map(|s| InstantSample::new(s.labels.without_metric_name(), s.timestamp, -s.value))
                        .collect(),
                )),
                other => Err(TsdbError::Evaluation(format!(
                    "unary expression only allowed on scalar or instant vector, got {}",
                    other.type_name()
                ))),
            },
            Expr::VectorSelector(vs) => self.eval_vector_selector(vs, t),
            Expr::MatrixSelector(_) => Err(TsdbError::Evaluation(
                "range vector selectors are only supported as function arguments".to_string(),
            )),
            Expr::Call(call) => self.eval_call(call, t),
            Expr::Aggregate(agg) => self.eval_aggregate(agg, t),
            Expr::Binary(be) => self.eval_binary(be, t),
            Expr::Subquery(_) => Err(TsdbError::Evaluation("subqueries are not supported".to_string())),
            _ => Err(TsdbError::Evaluation(format!("unsupported expression: {expr}"))),
        }
    }

    fn eval_vector(&mut self, expr: &Expr, t: Timestamp) -> TsdbResult<Vec<InstantSample>> {
        match self.eval(expr, t)? {
            Value::Vector(samples) => Ok(samples),
            other => Err(TsdbError::Evaluation(format!(
                "expected instant vector, got {}",
                other.type_name()
            ))),
        }
    }

    fn eval_scalar(&mut self, expr: &Expr, t: Timestamp) -> TsdbResult<f64> {
        match self.eval(expr, t)? {
            Value::Scalar(v) => Ok(v),
            other => Err(TsdbError::Evaluation(format!("expected scalar, got {}", other.type_name()))),
        }
    }

    fn select(&mut self, vs: &VectorSelector) -> TsdbResult<SelectedSeries> {
        let matchers = selector_matchers(vs)?;
        let mut keys: Vec<String> = matchers.iter().map(|m| m.to_string()).collect();
        keys.sort();
        let key = keys.join(",");
        if let Some(selected) = self.selections.get(&key) {
            return Ok(Arc::clone(selected));
        }
        let selected: SelectedSeries = Arc::new(self.querier.select(&matchers)?.collect());
        trace!(selector = key, series = selected.len(), "selected series");
        self.selections.insert(key, Arc::clone(&selected));
        self.check_deadline()?;
        Ok(selected)
    }

    fn eval_vector_selector(&mut self, vs: &VectorSelector, t: Timestamp) -> TsdbResult<Value> {
        reject_at_modifier(vs)?;
        let selected = self.select(vs)?;
        let ref_time = t.saturating_sub(offset_millis(&vs.offset));
        // exclusive lower bound of the lookback window
        let window_start = ref_time.saturating_sub(self.effective_lookback(t));
        let samples: Vec<InstantSample> = selected
            .iter()
            .filter_map(|s| {
                let sample = s.sample_at_or_before(ref_time)?;
                if sample.timestamp <= window_start || sample.is_stale() {
                    return None;
                }
                Some(InstantSample::new(s.labels.clone(), t, sample.value))
            })
            .collect();
        self.add_samples(samples.len())?;
        Ok(Value::Vector(samples))
    }

    fn eval_range_function(&mut self, func: RangeFunction, arg: &Expr, t: Timestamp) -> TsdbResult<Value> {
        let ms = match unwrap_parens(arg) {
            Expr::MatrixSelector(ms) => ms,
            Expr::Subquery(_) => {
                return Err(TsdbError::Evaluation("subqueries are not supported".to_string()))
            }
            other => {
                return Err(TsdbError::Evaluation(format!(
                    "expected range vector as argument, got {other}"
                )))
            }
        };
        reject_at_modifier(&ms.vs)?;
        let selected = self.select(&ms.vs)?;
        let ref_time = t.saturating_sub(offset_millis(&ms.vs.offset));
        let range_start = ref_time.saturating_sub(duration_to_millis(ms.range));
        let keep_name = func.keeps_metric_name();

        let results: Vec<(Option<InstantSample>, usize)> = selected
            .par_iter()
            .map(|s| {
                let samples: Vec<Sample> = s
                    .range_iter(range_start.saturating_add(1), ref_time)
                    .filter(|s| !s.is_stale())
                    .collect();
                let loaded = samples.len();
                let value = func.apply(&samples, range_start, ref_time).map(|value| {
                    let labels = if keep_name {
                        s.labels.clone()
                    } else {
                        s.labels.without_metric_name()
                    };
                    InstantSample::new(labels, t, value)
                });
                (value, loaded)
            })
            .collect();

        let loaded = results.iter().map(|(_, n)| n).sum();
        self.add_samples(loaded)?;
        Ok(Value::Vector(results.into_iter().filter_map(|(s, _)| s).collect()))
    }

    fn eval_call(&mut self, call: &Call, t: Timestamp) -> TsdbResult<Value> {
        let name = call.func.name;
        let args = &call.args.args;
        let arg = |idx: usize| -> TsdbResult<&Expr> {
            args.get(idx)
                .map(|a| a.as_ref())
                .ok_or_else(|| TsdbError::Evaluation(format!("missing argument {} for {name}()", idx + 1)))
        };

        if let Some(func) = RangeFunction::from_name(name) {
            return self.eval_range_function(func, arg(0)?, t);
        }
        if let Some(func) = MathFunction::from_name(name) {
            let samples = self.eval_vector(arg(0)?, t)?;
            return Ok(Value::Vector(
                samples
                    .into_iter()
                    .map(|s| InstantSample::new(s.labels.without_metric_name(), s.timestamp, func.apply(s.value)))
                    .collect(),
            ));
        }
        match name {
            "time" => Ok(Value::Scalar(t as f64 / 1000.0)),
            "vector" => {
                let value = self.eval_scalar(arg(0)?, t)?;
                Ok(Value::Vector(vec![InstantSample::new(Labels::empty(), t, value)]))
            }
            "scalar" => {
                let samples = self.eval_vector(arg(0)?, t)?;
                let value = match samples.as_slice() {
                    [single] => single.value,
                    _ => f64::NAN,
                };
                Ok(Value::Scalar(value))
            }
            other => Err(TsdbError::Evaluation(format!("function \"{other}\" is not supported"))),
        }
    }

    fn eval_aggregate(&mut self, agg: &AggregateExpr, t: Timestamp) -> TsdbResult<Value> {
        let op = Aggregation::from_name(&agg.op.to_string())?;
        if agg.param.is_some() {
            return Err(TsdbError::Evaluation(format!(
                "parameter for aggregation \"{}\" is not supported",
                agg.op
            )));
        }
        let samples = self.eval_vector(&agg.expr, t)?;
        Ok(Value::Vector(aggregate(op, samples, agg.modifier.as_ref(), t)))
    }

    fn eval_binary(&mut self, be: &BinaryExpr, t: Timestamp) -> TsdbResult<Value> {
        let token = be.op.to_string();
        if matches!(token.to_ascii_lowercase().as_str(), "and" | "or" | "unless") {
            return Err(TsdbError::Evaluation(format!("set operator \"{token}\" is not supported")));
        }
        let op = BinaryOp::from_token(&token)?;
        let modifier = be.modifier.as_ref();
        let return_bool = modifier.is_some_and(|m| m.return_bool);

        let lhs = self.eval(&be.lhs, t)?;
        let rhs = self.eval(&be.rhs, t)?;
        match (lhs, rhs) {
            (Value::Scalar(l), Value::Scalar(r)) => Ok(Value::Scalar(op.scalar(l, r, return_bool))),
            (Value::Vector(v), Value::Scalar(s)) => Ok(Value::Vector(vector_scalar(op, v, s, false, modifier))),
            (Value::Scalar(s), Value::Vector(v)) => Ok(Value::Vector(vector_scalar(op, v, s, true, modifier))),
            (Value::Vector(l), Value::Vector(r)) => vector_vector(op, l, r, modifier).map(Value::Vector),
            (l, r) => Err(TsdbError::Evaluation(format!(
                "binary operation between {} and {} is not supported",
                l.type_name(),
                r.type_name()
            ))),
        }
    }
}
