use croaring::Bitmap;
use crate::index::TimeSeriesIndex;
use crate::querier::matchers::{LabelMatcher, MatchOp};

/// Returns the ids of series matching all `matchers`. Matchers which reject the empty value
/// are applied first since they narrow the result the most.
pub fn postings_for_matchers(index: &TimeSeriesIndex, matchers: &[LabelMatcher]) -> Bitmap {
    let mut ordered: Vec<&LabelMatcher> = matchers.iter().collect();
    ordered.sort_by_key(|m| m.matches_empty());

    let mut dest: Option<Bitmap> = None;
    for matcher in ordered {
        let ids = postings_for_matcher(index, matcher);
        let acc = match dest.take() {
            None => ids,
            Some(mut acc) => {
                acc.and_inplace(&ids);
                acc
            }
        };
        if acc.is_empty() {
            return acc;
        }
        dest = Some(acc);
    }
    dest.unwrap_or_default()
}

fn postings_for_matcher(index: &TimeSeriesIndex, matcher: &LabelMatcher) -> Bitmap {
    if matcher.matches_empty() {
        // series without the label match as well, so start from everything and remove the
        // series holding a value the matcher rejects
        let mut excluded = Bitmap::new();
        for (value, map) in index.label_postings(&matcher.name) {
            if !matcher.matches(value) {
                excluded.or_inplace(map);
            }
        }
        let mut dest = index.all_ids().clone();
        dest.andnot_inplace(&excluded);
        return dest;
    }
    if matcher.op == MatchOp::Equal {
        return index
            .postings(&matcher.name, &matcher.value)
            .cloned()
            .unwrap_or_default();
    }
    let mut dest = Bitmap::new();
    for (value, map) in index.label_postings(&matcher.name) {
        if matcher.matches(value) {
            dest.or_inplace(map);
        }
    }
    dest
}
