use std::fmt::Display;
use serde_json::{json, Map, Value as JsonValue};
use crate::common::labels::Labels;
use crate::common::types::{Sample, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Matrix,
    Vector,
    Scalar,
    String,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Matrix => "matrix",
            ResultType::Vector => "vector",
            ResultType::Scalar => "scalar",
            ResultType::String => "string",
        }
    }
}

impl Display for ResultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Renders a float the way Prometheus does: shortest representation without exponent, with
/// `+Inf`, `-Inf` and `NaN` spelled out.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

fn point_to_json(timestamp: Timestamp, value: f64) -> JsonValue {
    json!([timestamp as f64 / 1000.0, format_value(value)])
}

fn labels_to_json(labels: &Labels) -> JsonValue {
    let map: Map<String, JsonValue> = labels
        .iter()
        .map(|l| (l.name.clone(), JsonValue::String(l.value.clone())))
        .collect();
    JsonValue::Object(map)
}

/// One series of a range query result: its labels and one point per evaluation step at which
/// it had a value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Series {
    pub labels: Labels,
    pub samples: Vec<Sample>,
}

impl Series {
    pub fn new(labels: Labels, samples: Vec<Sample>) -> Self {
        Self { labels, samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }
}

impl Display for Series {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} =>", self.labels)?;
        for sample in self.samples.iter() {
            write!(f, "\n{} @[{}]", format_value(sample.value), sample.timestamp)?;
        }
        Ok(())
    }
}

/// Result of a range query: series ordered by labels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Matrix(pub Vec<Series>);

impl Matrix {
    pub fn new(mut series: Vec<Series>) -> Self {
        series.sort_by(|a, b| a.labels.cmp(&b.labels));
        Matrix(series)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Series> {
        self.0.iter()
    }

    pub fn series(&self) -> &[Series] {
        &self.0
    }

    pub fn total_points(&self) -> usize {
        self.0.iter().map(|s| s.len()).sum()
    }

    /// Converts to the Prometheus range vector output
    /// (<https://prometheus.io/docs/prometheus/latest/querying/api/#range-vectors>):
    ///
    /// ```json
    /// {
    ///     "resultType" : "matrix",
    ///     "result" : [
    ///         {
    ///             "metric" : { "<label_name>": "<label_value>", ... },
    ///             "values" : [ [ <unix_time>, "<sample_value>" ], ... ]
    ///         },
    ///         ...
    ///     ]
    /// }
    /// ```
    pub fn to_json(&self) -> JsonValue {
        let result: Vec<JsonValue> = self
            .0
            .iter()
            .map(|series| {
                let values: Vec<JsonValue> = series
                    .samples
                    .iter()
                    .map(|s| point_to_json(s.timestamp, s.value))
                    .collect();
                json!({ "metric": labels_to_json(&series.labels), "values": values })
            })
            .collect();
        json!({ "resultType": ResultType::Matrix.as_str(), "result": result })
    }
}

impl Display for Matrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, series) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{series}")?;
        }
        Ok(())
    }
}

impl IntoIterator for Matrix {
    type Item = Series;
    type IntoIter = std::vec::IntoIter<Series>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A single value of an instant vector.
#[derive(Debug, Clone, PartialEq)]
pub struct InstantSample {
    pub labels: Labels,
    pub timestamp: Timestamp,
    pub value: f64,
}

impl InstantSample {
    pub fn new(labels: Labels, timestamp: Timestamp, value: f64) -> Self {
        Self { labels, timestamp, value }
    }
}

impl Display for InstantSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} => {} @[{}]", self.labels, format_value(self.value), self.timestamp)
    }
}

/// Result of an instant query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Scalar(Sample),
    Vector(Vec<InstantSample>),
    Matrix(Matrix),
    String(String),
}

impl QueryValue {
    pub fn result_type(&self) -> ResultType {
        match self {
            QueryValue::Scalar(_) => ResultType::Scalar,
            QueryValue::Vector(_) => ResultType::Vector,
            QueryValue::Matrix(_) => ResultType::Matrix,
            QueryValue::String(_) => ResultType::String,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            QueryValue::Matrix(matrix) => matrix.to_json(),
            QueryValue::Scalar(sample) => json!({
                "resultType": ResultType::Scalar.as_str(),
                "result": point_to_json(sample.timestamp, sample.value),
            }),
            QueryValue::String(s) => json!({
                "resultType": ResultType::String.as_str(),
                "result": s,
            }),
            QueryValue::Vector(samples) => {
                let result: Vec<JsonValue> = samples
                    .iter()
                    .map(|s| {
                        json!({
                            "metric": labels_to_json(&s.labels),
                            "value": point_to_json(s.timestamp, s.value),
                        })
                    })
                    .collect();
                json!({ "resultType": ResultType::Vector.as_str(), "result": result })
            }
        }
    }
}

impl Display for QueryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryValue::Scalar(sample) => {
                write!(f, "scalar: {} @[{}]", format_value(sample.value), sample.timestamp)
            }
            QueryValue::Vector(samples) => {
                for (i, sample) in samples.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{sample}")?;
                }
                Ok(())
            }
            QueryValue::Matrix(matrix) => write!(f, "{matrix}"),
            QueryValue::String(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn example_matrix() -> Matrix {
        let labels = Labels::from_metric_name("http_requests_total").unwrap();
        let samples = vec![Sample::new(1000, 0.0), Sample::new(2000, 5.0), Sample::new(3000, 10.0)];
        Matrix::new(vec![Series::new(labels, samples)])
    }

    #[test_case(5.0, "5")]
    #[test_case(0.25, "0.25")]
    #[test_case(-0.0, "-0")]
    #[test_case(f64::NAN, "NaN")]
    #[test_case(f64::INFINITY, "+Inf")]
    #[test_case(f64::NEG_INFINITY, "-Inf")]
    #[test_case(1e21, "1000000000000000000000")]
    fn test_format_value(value: f64, expected: &str) {
        assert_eq!(format_value(value), expected);
    }

    #[test]
    fn test_matrix_text() {
        let text = example_matrix().to_string();
        let expected = "{__name__=\"http_requests_total\"} =>\n0 @[1000]\n5 @[2000]\n10 @[3000]";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_matrix_sorted_by_labels() {
        let b = Series::new(Labels::from_metric_name("b").unwrap(), vec![]);
        let a = Series::new(Labels::from_metric_name("a").unwrap(), vec![]);
        let matrix = Matrix::new(vec![b, a]);
        assert_eq!(matrix.series()[0].labels.metric_name(), Some("a"));
        assert_eq!(matrix.to_string(), "{__name__=\"a\"} =>\n{__name__=\"b\"} =>");
    }

    #[test]
    fn test_matrix_json() {
        let json = example_matrix().to_json();
        assert_eq!(json["resultType"], "matrix");
        assert_eq!(json["result"][0]["metric"]["__name__"], "http_requests_total");
        assert_eq!(json["result"][0]["values"][1], json!([2.0, "5"]));
    }

    #[test]
    fn test_empty_matrix() {
        let matrix = Matrix::default();
        assert_eq!(matrix.to_string(), "");
        assert_eq!(matrix.to_json(), json!({"resultType": "matrix", "result": []}));
    }
}
