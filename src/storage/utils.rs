use crate::common::types::Timestamp;

/// Returns the half open index range `[start_idx, end_idx)` of the timestamps falling within
/// `[start_ts, end_ts]` (both inclusive), or None when nothing lies in range.
pub(crate) fn get_timestamp_index_bounds(timestamps: &[i64], start_ts: Timestamp, end_ts: Timestamp) -> Option<(usize, usize)> {
    if timestamps.is_empty() || start_ts > end_ts {
        return None;
    }

    let min_timestamp = timestamps[0];
    let max_timestamp = timestamps[timestamps.len() - 1];
    if min_timestamp > end_ts || max_timestamp < start_ts {
        // Out of range.
        return None
    }

    let start_idx = if start_ts <= min_timestamp {
        0
    } else {
        timestamps.partition_point(|&ts| ts < start_ts)
    };

    let end_idx = if end_ts >= max_timestamp {
        timestamps.len()
    } else {
        start_idx + timestamps[start_idx..].partition_point(|&ts| ts <= end_ts)
    };

    if start_idx >= end_idx {
        return None;
    }

    Some((start_idx, end_idx))
}
