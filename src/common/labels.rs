use std::fmt::Display;
use enquote::enquote;
use serde::{Deserialize, Serialize};
use crate::common::utils::hash_labels;
use crate::common::METRIC_NAME_LABEL;
use crate::error::{TsdbError, TsdbResult};

/// Label is a key/value pair of strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An immutable label set identifying a series. Labels are sorted by name, names are unique
/// and empty values are dropped, so two equal sets always have the same representation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<Label>", into = "Vec<Label>")]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn new(mut labels: Vec<Label>) -> TsdbResult<Self> {
        labels.retain(|l| !l.value.is_empty());
        labels.sort();
        if let Some(pair) = labels.windows(2).find(|w| w[0].name == w[1].name) {
            let msg = format!("duplicate label name \"{}\"", pair[0].name);
            return Err(TsdbError::InvalidLabels(msg));
        }
        if let Some(label) = labels.iter().find(|l| !is_valid_label_name(&l.name)) {
            let msg = format!("invalid label name \"{}\"", label.name);
            return Err(TsdbError::InvalidLabels(msg));
        }
        Ok(Labels(labels))
    }

    /// Build labels from a flat list of name, value, name, value...
    pub fn from_strings(ss: &[&str]) -> TsdbResult<Self> {
        if ss.len() % 2 != 0 {
            return Err(TsdbError::InvalidLabels(
                "odd number of strings in label list".to_string(),
            ));
        }
        let labels = ss
            .chunks(2)
            .map(|pair| Label::new(pair[0], pair[1]))
            .collect();
        Self::new(labels)
    }

    /// Convenience for a series identified by metric name only.
    pub fn from_metric_name(name: &str) -> TsdbResult<Self> {
        Self::from_strings(&[METRIC_NAME_LABEL, name])
    }

    pub fn empty() -> Self {
        Labels(vec![])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|idx| self.0[idx].value.as_str())
    }

    pub fn metric_name(&self) -> Option<&str> {
        self.get(METRIC_NAME_LABEL)
    }

    pub fn without_metric_name(&self) -> Labels {
        self.filter(|l| l.name != METRIC_NAME_LABEL)
    }

    /// Labels restricted to `names`, as used by `by (...)` and `on (...)`.
    pub fn keep(&self, names: &[String]) -> Labels {
        self.filter(|l| names.iter().any(|n| *n == l.name))
    }

    /// Labels with `names` (and the metric name) removed, as used by `without (...)` and
    /// `ignoring (...)`.
    pub fn drop_names(&self, names: &[String]) -> Labels {
        self.filter(|l| l.name != METRIC_NAME_LABEL && !names.iter().any(|n| *n == l.name))
    }

    fn filter<F: Fn(&Label) -> bool>(&self, f: F) -> Labels {
        // filtering a sorted, unique set keeps it sorted and unique
        Labels(self.0.iter().filter(|l| f(l)).cloned().collect())
    }

    pub fn fingerprint(&self) -> u64 {
        hash_labels(self)
    }

    /// Get the full metric name of the series, including labels in Prometheus format.
    /// For example,
    ///
    /// `http_requests_total{method="POST",status="500"}`
    pub fn prometheus_metric_name(&self) -> String {
        let name = self.metric_name().unwrap_or_default();
        let labels: Vec<&Label> = self.0.iter().filter(|l| l.name != METRIC_NAME_LABEL).collect();
        let size_hint = name.len() + labels.iter()
            .map(|l| l.name.len() + l.value.len() + 3).sum::<usize>();
        let mut full_name: String = String::with_capacity(size_hint);
        full_name.push_str(name);
        if !labels.is_empty() || name.is_empty() {
            full_name.push('{');
            for (i, label) in labels.iter().enumerate() {
                if i > 0 {
                    full_name.push(',');
                }
                full_name.push_str(&label.name);
                full_name.push('=');
                full_name.push_str(&quote_value(&label.value));
            }
            full_name.push('}');
        }
        full_name
    }
}

/// Label names must match `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn quote_value(value: &str) -> String {
    // avoid escaping work if possible
    if value.contains(['"', '\\', '\n']) {
        enquote('"', value)
    } else {
        format!("\"{value}\"")
    }
}

impl Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", label.name, quote_value(&label.value))?;
        }
        write!(f, "}}")
    }
}

impl TryFrom<Vec<Label>> for Labels {
    type Error = TsdbError;

    fn try_from(labels: Vec<Label>) -> Result<Self, Self::Error> {
        Labels::new(labels)
    }
}

impl From<Labels> for Vec<Label> {
    fn from(labels: Labels) -> Self {
        labels.0
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Incrementally assembles a label set, replacing values of names set twice.
#[derive(Debug, Default)]
pub struct LabelsBuilder {
    labels: Vec<Label>,
}

impl LabelsBuilder {
    pub fn new(base: &Labels) -> Self {
        Self {
            labels: base.0.clone(),
        }
    }

    pub fn set(&mut self, name: &str, value: &str) -> &mut Self {
        match self.labels.iter_mut().find(|l| l.name == name) {
            Some(label) => label.value = value.to_string(),
            None => self.labels.push(Label::new(name, value)),
        }
        self
    }

    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.labels.retain(|l| l.name != name);
        self
    }

    pub fn build(self) -> TsdbResult<Labels> {
        Labels::new(self.labels)
    }
}
