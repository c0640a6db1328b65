//! PromQL evaluation over snapshot queriers.
use std::time::{Duration, Instant};
use promql_parser::parser::Expr;
use tracing::debug;
use crate::common::time::duration_to_millis;
use crate::common::types::{Sample, Timestamp};
use crate::config::Settings;
use crate::error::{TsdbError, TsdbResult};
use crate::querier::{BlockQuerier, Queryable};

mod aggregate;
mod binop;
mod eval;
mod functions;
pub mod result;


use eval::{offset_millis, unwrap_parens, Evaluator};
pub use result::{InstantSample, Matrix, QueryValue, ResultType, Series};

/// Prometheus refuses range queries producing more points per series than this.
pub const MAX_POINTS_PER_SERIES: i64 = 11_000;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineOpts {
    /// Upper bound on samples loaded plus points held in the result.
    pub max_samples: usize,
    pub timeout: Duration,
    pub lookback_delta: Duration,
    /// Round result values to this many decimal places.
    pub round_digits: Option<u8>,
}

impl Default for EngineOpts {
    fn default() -> Self {
        Self {
            max_samples: crate::config::DEFAULT_MAX_SAMPLES,
            timeout: crate::config::DEFAULT_QUERY_TIMEOUT,
            lookback_delta: crate::config::DEFAULT_LOOKBACK_DELTA,
            round_digits: None,
        }
    }
}

impl From<&Settings> for EngineOpts {
    fn from(settings: &Settings) -> Self {
        Self {
            max_samples: settings.max_samples,
            timeout: settings.query_timeout,
            lookback_delta: settings.max_look_back,
            round_digits: settings.round_digits,
        }
    }
}

/// Turns a query string and a time range into a result, reading data through a [`Queryable`].
pub trait ExpressionEvaluator: Send + Sync {
    fn range_query(
        &self,
        queryable: &dyn Queryable,
        query: &str,
        start: Timestamp,
        end: Timestamp,
        step: Duration,
    ) -> TsdbResult<Matrix>;

    fn instant_query(&self, queryable: &dyn Queryable, query: &str, time: Timestamp) -> TsdbResult<QueryValue>;
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    opts: EngineOpts,
}

impl Engine {
    pub fn new(opts: EngineOpts) -> Self {
        Self { opts }
    }

    pub fn opts(&self) -> &EngineOpts {
        &self.opts
    }

    pub fn parse(query: &str) -> TsdbResult<Expr> {
        promql_parser::parser::parse(query).map_err(TsdbError::Parse)
    }

    /// Opens one querier wide enough for every selector of `expr` evaluated within
    /// `[start, end]`.
    fn open_querier(
        &self,
        queryable: &dyn Queryable,
        expr: &Expr,
        start: Timestamp,
        end: Timestamp,
    ) -> TsdbResult<BlockQuerier> {
        let lookback = duration_to_millis(self.opts.lookback_delta);
        let mut bounds = SelectorBounds {
            look_behind: lookback,
            min_offset: 0,
        };
        bounds.visit(expr, lookback);
        let mint = start.saturating_sub(bounds.look_behind);
        let maxt = end.saturating_sub(bounds.min_offset);
        queryable.querier(mint, maxt)
    }

    fn round(&self, value: f64) -> f64 {
        match self.opts.round_digits {
            Some(digits) => {
                let factor = 10_f64.powi(i32::from(digits));
                (value * factor).round() / factor
            }
            None => value,
        }
    }
}

/// How far before the first and after the last evaluation instant selectors read.
struct SelectorBounds {
    look_behind: i64,
    /// most negative offset, i.e. the furthest look ahead
    min_offset: i64,
}

impl SelectorBounds {
    fn add(&mut self, offset: i64, span: i64) {
        self.look_behind = self.look_behind.max(offset.saturating_add(span));
        self.min_offset = self.min_offset.min(offset);
    }

    fn visit(&mut self, expr: &Expr, lookback: i64) {
        match expr {
            Expr::VectorSelector(vs) => self.add(offset_millis(&vs.offset), lookback),
            Expr::MatrixSelector(ms) => {
                self.add(offset_millis(&ms.vs.offset), duration_to_millis(ms.range))
            }
            Expr::Aggregate(agg) => {
                self.visit(&agg.expr, lookback);
                if let Some(param) = &agg.param {
                    self.visit(param, lookback);
                }
            }
            Expr::Unary(u) => self.visit(&u.expr, lookback),
            Expr::Binary(be) => {
                self.visit(&be.lhs, lookback);
                self.visit(&be.rhs, lookback);
            }
            Expr::Paren(p) => self.visit(&p.expr, lookback),
            Expr::Subquery(sq) => self.visit(&sq.expr, lookback),
            Expr::Call(call) => {
                for arg in call.args.args.iter() {
                    self.visit(arg, lookback);
                }
            }
            _ => {}
        }
    }
}

fn check_range_expr(expr: &Expr) -> TsdbResult<()> {
    let kind = match unwrap_parens(expr) {
        Expr::MatrixSelector(_) | Expr::Subquery(_) => "range vector",
        Expr::StringLiteral(_) => "string",
        _ => return Ok(()),
    };
    Err(TsdbError::Parse(format!(
        "invalid expression type \"{kind}\" for range query, must be scalar or instant vector"
    )))
}

impl ExpressionEvaluator for Engine {
    fn range_query(
        &self,
        queryable: &dyn Queryable,
        query: &str,
        start: Timestamp,
        end: Timestamp,
        step: Duration,
    ) -> TsdbResult<Matrix> {
        let started = Instant::now();
        let deadline = started + self.opts.timeout;

        let step_ms = duration_to_millis(step);
        if step_ms <= 0 {
            return Err(TsdbError::Parse(
                "zero or negative query resolution step widths are not accepted. Try a positive integer".to_string(),
            ));
        }
        if end < start {
            return Err(TsdbError::InvalidRange { mint: start, maxt: end });
        }
        // a span too wide for i64 is over the resolution limit as well
        let too_many_points = end
            .checked_sub(start)
            .map_or(true, |span| span / step_ms > MAX_POINTS_PER_SERIES);
        if too_many_points {
            return Err(TsdbError::Parse(format!(
                "exceeded maximum resolution of {MAX_POINTS_PER_SERIES} points per timeseries. Try decreasing the query resolution"
            )));
        }

        let expr = Self::parse(query)?;
        check_range_expr(&expr)?;

        let querier = self.open_querier(queryable, &expr, start, end)?;
        let mut evaluator = Evaluator::new(&querier, &self.opts, start, step_ms, deadline);
        let mut series = evaluator.eval_range(&expr, end)?;
        if self.opts.round_digits.is_some() {
            for s in series.iter_mut() {
                s.samples.iter_mut().for_each(|p| p.value = self.round(p.value));
            }
        }
        let matrix = Matrix::new(series);

        debug!(
            query,
            start,
            end,
            step = step_ms,
            series = matrix.len(),
            points = matrix.total_points(),
            elapsed = ?started.elapsed(),
            "range query finished"
        );
        Ok(matrix)
    }

    fn instant_query(&self, queryable: &dyn Queryable, query: &str, time: Timestamp) -> TsdbResult<QueryValue> {
        let started = Instant::now();
        let deadline = started + self.opts.timeout;

        let expr = Self::parse(query)?;
        let querier = self.open_querier(queryable, &expr, time, time)?;
        let mut evaluator = Evaluator::new(&querier, &self.opts, time, 0, deadline);

        let value = match unwrap_parens(&expr) {
            Expr::MatrixSelector(ms) => {
                QueryValue::Matrix(Matrix::new(evaluator.eval_matrix_selector(ms, time)?))
            }
            _ => match evaluator.eval(&expr, time)? {
                eval::Value::Scalar(v) => QueryValue::Scalar(Sample::new(time, self.round(v))),
                eval::Value::String(s) => QueryValue::String(s),
                eval::Value::Vector(mut samples) => {
                    samples.sort_by(|a, b| a.labels.cmp(&b.labels));
                    samples.iter_mut().for_each(|s| s.value = self.round(s.value));
                    QueryValue::Vector(samples)
                }
            },
        };

        debug!(query, time, result = %value.result_type(), elapsed = ?started.elapsed(), "instant query finished");
        Ok(value)
    }
}
