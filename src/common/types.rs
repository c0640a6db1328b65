use serde::{Deserialize, Serialize};

/// Milliseconds since the unix epoch.
pub type Timestamp = i64;

/// Raw bits of the Prometheus stale marker. It is a NaN, so it must be compared bitwise.
pub const STALE_NAN_BITS: u64 = 0x7ff0000000000002;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }

    pub fn is_stale(&self) -> bool {
        is_stale_nan(self.value)
    }
}

pub fn stale_nan() -> f64 {
    f64::from_bits(STALE_NAN_BITS)
}

#[inline]
pub fn is_stale_nan(value: f64) -> bool {
    value.to_bits() == STALE_NAN_BITS
}
