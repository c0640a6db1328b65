use ahash::AHashMap;
use promql_parser::parser::LabelModifier;
use crate::common::labels::Labels;
use crate::error::{TsdbError, TsdbResult};
use crate::promql::functions::{kahan_avg, kahan_sum};
use crate::promql::result::InstantSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Group,
    Stddev,
    Stdvar,
}

impl Aggregation {
    pub(crate) fn from_name(name: &str) -> TsdbResult<Self> {
        use Aggregation::*;
        let op = match name.to_ascii_lowercase().as_str() {
            "sum" => Sum,
            "avg" => Avg,
            "min" => Min,
            "max" => Max,
            "count" => Count,
            "group" => Group,
            "stddev" => Stddev,
            "stdvar" => Stdvar,
            other => {
                return Err(TsdbError::Evaluation(format!(
                    "aggregation \"{other}\" is not supported"
                )))
            }
        };
        Ok(op)
    }

    fn reduce(&self, values: &[f64]) -> f64 {
        use Aggregation::*;
        match self {
            Sum => kahan_sum(values.iter().copied()),
            Avg => kahan_avg(values),
            Min => values.iter().copied().fold(f64::NAN, |acc, v| if acc.is_nan() || v < acc { v } else { acc }),
            Max => values.iter().copied().fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc }),
            Count => values.len() as f64,
            Group => 1.0,
            Stddev => variance(values).sqrt(),
            Stdvar => variance(values),
        }
    }
}

// population variance, as Prometheus computes it
fn variance(values: &[f64]) -> f64 {
    let count = values.len() as f64;
    let mean = kahan_avg(values);
    let sq = kahan_sum(values.iter().map(|v| (v - mean) * (v - mean)));
    sq / count
}

fn grouping_labels(labels: &Labels, modifier: Option<&LabelModifier>) -> Labels {
    match modifier {
        Some(LabelModifier::Include(names)) => labels.keep(&names.labels),
        Some(LabelModifier::Exclude(names)) => labels.drop_names(&names.labels),
        None => Labels::empty(),
    }
}

/// Groups `samples` by the `by`/`without` modifier and reduces each group to one sample.
/// Output is ordered by group labels.
pub(crate) fn aggregate(
    op: Aggregation,
    samples: Vec<InstantSample>,
    modifier: Option<&LabelModifier>,
    timestamp: i64,
) -> Vec<InstantSample> {
    let mut groups: AHashMap<Labels, Vec<f64>> = AHashMap::new();
    for sample in samples {
        let key = grouping_labels(&sample.labels, modifier);
        groups.entry(key).or_default().push(sample.value);
    }
    let mut result: Vec<InstantSample> = groups
        .into_iter()
        .map(|(labels, values)| InstantSample::new(labels, timestamp, op.reduce(&values)))
        .collect();
    result.sort_by(|a, b| a.labels.cmp(&b.labels));
    result
}
