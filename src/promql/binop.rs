use ahash::AHashMap;
use promql_parser::parser::{BinModifier, LabelModifier, VectorMatchCardinality};
use crate::common::labels::{Labels, LabelsBuilder};
use crate::error::{TsdbError, TsdbResult};
use crate::promql::result::InstantSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eql,
    Neq,
    Gtr,
    Lss,
    Gte,
    Lte,
}

impl BinaryOp {
    pub(crate) fn from_token(token: &str) -> TsdbResult<Self> {
        use BinaryOp::*;
        let op = match token {
            "+" => Add,
            "-" => Sub,
            "*" => Mul,
            "/" => Div,
            "%" => Mod,
            "^" => Pow,
            "==" => Eql,
            "!=" => Neq,
            ">" => Gtr,
            "<" => Lss,
            ">=" => Gte,
            "<=" => Lte,
            other => {
                return Err(TsdbError::Evaluation(format!(
                    "binary operator \"{other}\" is not supported"
                )))
            }
        };
        Ok(op)
    }

    pub(crate) fn is_comparison(&self) -> bool {
        use BinaryOp::*;
        matches!(self, Eql | Neq | Gtr | Lss | Gte | Lte)
    }

    fn arithmetic(&self, lhs: f64, rhs: f64) -> f64 {
        use BinaryOp::*;
        match self {
            Add => lhs + rhs,
            Sub => lhs - rhs,
            Mul => lhs * rhs,
            Div => lhs / rhs,
            Mod => lhs % rhs,
            Pow => lhs.powf(rhs),
            _ => f64::NAN,
        }
    }

    fn compare(&self, lhs: f64, rhs: f64) -> bool {
        use BinaryOp::*;
        match self {
            Eql => lhs == rhs,
            Neq => lhs != rhs,
            Gtr => lhs > rhs,
            Lss => lhs < rhs,
            Gte => lhs >= rhs,
            Lte => lhs <= rhs,
            _ => false,
        }
    }

    /// Applies the operator to two scalars.
    pub(crate) fn scalar(&self, lhs: f64, rhs: f64, return_bool: bool) -> f64 {
        if self.is_comparison() {
            let res = self.compare(lhs, rhs);
            if return_bool {
                return if res { 1.0 } else { 0.0 };
            }
            // scalar comparisons without bool are rejected by the parser
            return if res { lhs } else { f64::NAN };
        }
        self.arithmetic(lhs, rhs)
    }

    /// Applies the operator to one pair of values. Returns the output value and whether the
    /// element is kept; comparisons without `bool` filter.
    fn element(&self, lhs: f64, rhs: f64, return_bool: bool) -> (f64, bool) {
        if !self.is_comparison() {
            return (self.arithmetic(lhs, rhs), true);
        }
        let res = self.compare(lhs, rhs);
        if return_bool {
            (if res { 1.0 } else { 0.0 }, true)
        } else {
            (lhs, res)
        }
    }

    fn drops_metric_name(&self, return_bool: bool) -> bool {
        !self.is_comparison() || return_bool
    }
}

fn return_bool(modifier: Option<&BinModifier>) -> bool {
    modifier.is_some_and(|m| m.return_bool)
}

/// `vector op scalar`, or `scalar op vector` when `scalar_on_left` is set.
pub(crate) fn vector_scalar(
    op: BinaryOp,
    vector: Vec<InstantSample>,
    scalar: f64,
    scalar_on_left: bool,
    modifier: Option<&BinModifier>,
) -> Vec<InstantSample> {
    let return_bool = return_bool(modifier);
    let drop_name = op.drops_metric_name(return_bool);
    vector
        .into_iter()
        .filter_map(|sample| {
            let (lhs, rhs) = if scalar_on_left {
                (scalar, sample.value)
            } else {
                (sample.value, scalar)
            };
            let (mut value, keep) = op.element(lhs, rhs, return_bool);
            if !keep {
                return None;
            }
            // a filtering comparison keeps the vector's value even when it is on the right
            if scalar_on_left && op.is_comparison() && !return_bool {
                value = sample.value;
            }
            let labels = if drop_name {
                sample.labels.without_metric_name()
            } else {
                sample.labels
            };
            Some(InstantSample::new(labels, sample.timestamp, value))
        })
        .collect()
}

fn matching_signature(labels: &Labels, matching: Option<&LabelModifier>) -> Labels {
    match matching {
        Some(LabelModifier::Include(names)) => labels.keep(&names.labels),
        Some(LabelModifier::Exclude(names)) => labels.drop_names(&names.labels),
        None => labels.without_metric_name(),
    }
}

fn result_labels(labels: &Labels, matching: Option<&LabelModifier>, drop_name: bool) -> Labels {
    let labels = match matching {
        Some(LabelModifier::Include(names)) => labels.keep(&names.labels),
        Some(LabelModifier::Exclude(names)) => {
            let mut builder = LabelsBuilder::new(labels);
            for name in names.labels.iter() {
                builder.remove(name);
            }
            // removing labels from a valid set cannot fail
            builder.build().unwrap_or_else(|_| labels.clone())
        }
        None => labels.clone(),
    };
    if drop_name {
        labels.without_metric_name()
    } else {
        labels
    }
}

/// One-to-one `vector op vector`. Samples are paired by their matching signature; unmatched
/// samples are dropped.
pub(crate) fn vector_vector(
    op: BinaryOp,
    lhs: Vec<InstantSample>,
    rhs: Vec<InstantSample>,
    modifier: Option<&BinModifier>,
) -> TsdbResult<Vec<InstantSample>> {
    if let Some(m) = modifier {
        if !matches!(m.card, VectorMatchCardinality::OneToOne) {
            return Err(TsdbError::Evaluation(
                "group_left/group_right matching is not supported".to_string(),
            ));
        }
    }
    let matching = modifier.and_then(|m| m.matching.as_ref());
    let return_bool = return_bool(modifier);
    let drop_name = op.drops_metric_name(return_bool);

    let mut right: AHashMap<Labels, InstantSample> = AHashMap::with_capacity(rhs.len());
    for sample in rhs {
        let sig = matching_signature(&sample.labels, matching);
        if right.contains_key(&sig) {
            return Err(TsdbError::Evaluation(format!(
                "found duplicate series for the match group {sig} on the right hand-side of the operation: many-to-many matching not allowed"
            )));
        }
        right.insert(sig, sample);
    }

    let mut matched: AHashMap<Labels, ()> = AHashMap::new();
    let mut result = Vec::with_capacity(lhs.len());
    for sample in lhs {
        let sig = matching_signature(&sample.labels, matching);
        let Some(other) = right.get(&sig) else {
            continue;
        };
        if matched.insert(sig.clone(), ()).is_some() {
            return Err(TsdbError::Evaluation(format!(
                "multiple matches for labels {sig}: many-to-one matching must be explicit (group_left/group_right)"
            )));
        }
        let (value, keep) = op.element(sample.value, other.value, return_bool);
        if !keep {
            continue;
        }
        let labels = result_labels(&sample.labels, matching, drop_name);
        result.push(InstantSample::new(labels, sample.timestamp, value));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn sample(labels: &[&str], value: f64) -> InstantSample {
        InstantSample::new(Labels::from_strings(labels).unwrap(), 0, value)
    }

    #[test_case(BinaryOp::Add, 6.0, 3.0, 9.0)]
    #[test_case(BinaryOp::Sub, 6.0, 3.0, 3.0)]
    #[test_case(BinaryOp::Mul, 6.0, 3.0, 18.0)]
    #[test_case(BinaryOp::Div, 6.0, 3.0, 2.0)]
    #[test_case(BinaryOp::Mod, 7.0, 3.0, 1.0)]
    #[test_case(BinaryOp::Pow, 2.0, 3.0, 8.0)]
    fn test_scalar_arithmetic(op: BinaryOp, lhs: f64, rhs: f64, expected: f64) {
        assert_eq!(op.scalar(lhs, rhs, false), expected);
    }

    #[test]
    fn test_scalar_bool_comparison() {
        assert_eq!(BinaryOp::Gtr.scalar(2.0, 1.0, true), 1.0);
        assert_eq!(BinaryOp::Gtr.scalar(1.0, 2.0, true), 0.0);
        assert_eq!(BinaryOp::Eql.scalar(f64::NAN, f64::NAN, true), 0.0);
    }

    #[test]
    fn test_vector_scalar_arithmetic_drops_name() {
        let vector = vec![sample(&["__name__", "up", "job", "api"], 2.0)];
        let result = vector_scalar(BinaryOp::Mul, vector, 10.0, false, None);
        assert_eq!(result, vec![sample(&["job", "api"], 20.0)]);
    }

    #[test]
    fn test_vector_scalar_comparison_filters() {
        let vector = vec![
            sample(&["__name__", "up", "job", "api"], 2.0),
            sample(&["__name__", "up", "job", "web"], 5.0),
        ];
        let result = vector_scalar(BinaryOp::Gtr, vector.clone(), 3.0, false, None);
        assert_eq!(result, vec![sample(&["__name__", "up", "job", "web"], 5.0)]);

        // 3 < vector keeps the vector's value
        let result = vector_scalar(BinaryOp::Lss, vector, 3.0, true, None);
        assert_eq!(result, vec![sample(&["__name__", "up", "job", "web"], 5.0)]);
    }

    #[test]
    fn test_vector_vector_one_to_one() {
        let lhs = vec![
            sample(&["__name__", "errors", "job", "api"], 5.0),
            sample(&["__name__", "errors", "job", "web"], 1.0),
            sample(&["__name__", "errors", "job", "db"], 1.0),
        ];
        let rhs = vec![
            sample(&["__name__", "requests", "job", "api"], 50.0),
            sample(&["__name__", "requests", "job", "web"], 20.0),
        ];
        let result = vector_vector(BinaryOp::Div, lhs, rhs, None).unwrap();
        assert_eq!(result, vec![sample(&["job", "api"], 0.1), sample(&["job", "web"], 0.05)]);
    }

    #[test]
    fn test_duplicate_right_side_fails() {
        let lhs = vec![sample(&["__name__", "a", "job", "api"], 1.0)];
        let rhs = vec![
            sample(&["__name__", "b", "job", "api"], 1.0),
            sample(&["__name__", "c", "job", "api"], 1.0),
        ];
        let res = vector_vector(BinaryOp::Add, lhs, rhs, None);
        assert!(matches!(res, Err(TsdbError::Evaluation(_))));
    }
}
