use std::collections::{BTreeMap, BTreeSet};
use ahash::AHashMap;
use croaring::Bitmap;
use crate::common::labels::Labels;
use crate::index::index_key::{format_key_for_label_prefix, get_key_for_label_value, split_key};
use crate::storage::SeriesRef;

/// Inverted index from label pairs to series refs.
///
/// The index is a plain value: the head wraps it in an `Arc` and clones on write, so a querier
/// holding an older `Arc` keeps a consistent view while commits continue.
#[derive(Clone, Debug, Default)]
pub struct TimeSeriesIndex {
    /// Map from `name=value` to the ids of series carrying that pair.
    label_kv_to_ts: BTreeMap<String, Bitmap>,
    /// Map from label fingerprint to series ids. Collisions are resolved by the caller.
    fingerprint_to_ids: AHashMap<u64, Vec<SeriesRef>>,
    all_ids: Bitmap,
}

impl TimeSeriesIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series_count(&self) -> usize {
        self.all_ids.cardinality() as usize
    }

    /// Number of distinct label pairs.
    pub fn label_count(&self) -> usize {
        self.label_kv_to_ts.len()
    }

    pub fn all_ids(&self) -> &Bitmap {
        &self.all_ids
    }

    pub fn index_series(&mut self, id: SeriesRef, labels: &Labels) {
        for label in labels.iter() {
            let key = get_key_for_label_value(&label.name, &label.value);
            self.label_kv_to_ts.entry(key).or_default().add(id);
        }
        self.fingerprint_to_ids
            .entry(labels.fingerprint())
            .or_default()
            .push(id);
        self.all_ids.add(id);
    }

    /// Ids of series whose labels hash to `fingerprint`.
    pub fn ids_for_fingerprint(&self, fingerprint: u64) -> &[SeriesRef] {
        self.fingerprint_to_ids
            .get(&fingerprint)
            .map(|ids| ids.as_slice())
            .unwrap_or_default()
    }

    pub fn postings(&self, label_name: &str, value: &str) -> Option<&Bitmap> {
        let key = get_key_for_label_value(label_name, value);
        self.label_kv_to_ts.get(&key)
    }

    /// Iterates the values of `label_name` along with their postings, in value order.
    pub fn label_postings<'a>(&'a self, label_name: &str) -> impl Iterator<Item = (&'a str, &'a Bitmap)> + 'a {
        let mut prefix = String::with_capacity(label_name.len() + 1);
        format_key_for_label_prefix(&mut prefix, label_name);
        let start = prefix.len();
        self.label_kv_to_ts
            .range(prefix.clone()..)
            .take_while(move |(key, _)| key.starts_with(&prefix))
            .map(move |(key, map)| (&key[start..], map))
    }

    pub fn label_values(&self, label_name: &str) -> BTreeSet<String> {
        self.label_postings(label_name)
            .map(|(value, _)| value.to_string())
            .collect()
    }

    pub fn label_names(&self) -> BTreeSet<String> {
        self.label_kv_to_ts
            .keys()
            .filter_map(|key| split_key(key))
            .map(|(name, _)| name.to_string())
            .collect()
    }
}
