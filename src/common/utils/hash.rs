use std::hash::Hasher;
use xxhash_rust::xxh3::Xxh3;
use crate::common::labels::Labels;

const LABEL_SEP: &[u8] = b"\xff";

/// Labels are kept sorted by name, so no sorting is needed before hashing.
pub fn hash_labels(labels: &Labels) -> u64 {
    let mut hasher: Xxh3 = Xxh3::with_seed(0);
    for label in labels.iter() {
        hasher.write(label.name.as_bytes());
        hasher.write(LABEL_SEP);
        hasher.write(label.value.as_bytes());
        hasher.write(LABEL_SEP);
    }
    hasher.digest()
}
