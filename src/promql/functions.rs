use crate::common::types::{Sample, Timestamp};

/// Kahan summation increment with Neumaier improvement.
///
/// Returns (new_sum, new_compensation)
#[inline(never)]
// not inlined: reordering of the float operations loses the compensation
fn kahan_inc(inc: f64, sum: f64, c: f64) -> (f64, f64) {
    let t = sum + inc;

    let new_c = if t.is_infinite() {
        0.0
    } else if sum.abs() >= inc.abs() {
        c + ((sum - t) + inc)
    } else {
        c + ((inc - t) + sum)
    };

    (t, new_c)
}

pub(crate) fn kahan_sum<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let (sum, c) = values
        .into_iter()
        .fold((0.0, 0.0), |(sum, c), v| kahan_inc(v, sum, c));
    sum + c
}

/// Mean with Kahan summation, switching to an incremental mean if the sum overflows.
pub(crate) fn kahan_avg(values: &[f64]) -> f64 {
    if values.len() == 1 {
        return values[0];
    }

    let mut sum = values[0];
    let mut c = 0.0;
    let mut mean = 0.0;
    let mut incremental = false;

    for (i, &value) in values.iter().enumerate().skip(1) {
        let count = (i + 1) as f64;

        if !incremental {
            let (new_sum, new_c) = kahan_inc(value, sum, c);
            if !new_sum.is_infinite() {
                sum = new_sum;
                c = new_c;
                continue;
            }

            incremental = true;
            mean = sum / (count - 1.0);
            c /= count - 1.0;
        }

        let q = (count - 1.0) / count;
        (mean, c) = kahan_inc(value / count, q * mean, q * c);
    }

    if incremental {
        mean + c
    } else {
        let count = values.len() as f64;
        sum / count + c / count
    }
}

/// Functions taking a range vector and producing one value per series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangeFunction {
    Rate,
    Irate,
    Increase,
    Delta,
    Idelta,
    Changes,
    Resets,
    SumOverTime,
    AvgOverTime,
    MinOverTime,
    MaxOverTime,
    CountOverTime,
    LastOverTime,
}

impl RangeFunction {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        use RangeFunction::*;
        let func = match name {
            "rate" => Rate,
            "irate" => Irate,
            "increase" => Increase,
            "delta" => Delta,
            "idelta" => Idelta,
            "changes" => Changes,
            "resets" => Resets,
            "sum_over_time" => SumOverTime,
            "avg_over_time" => AvgOverTime,
            "min_over_time" => MinOverTime,
            "max_over_time" => MaxOverTime,
            "count_over_time" => CountOverTime,
            "last_over_time" => LastOverTime,
            _ => return None,
        };
        Some(func)
    }

    /// `last_over_time` is the only one keeping the metric name.
    pub(crate) fn keeps_metric_name(&self) -> bool {
        matches!(self, RangeFunction::LastOverTime)
    }

    /// Evaluates the function over the samples of one series in `(range_start, range_end]`.
    /// Returns None when the window holds too few samples for a value.
    pub(crate) fn apply(&self, samples: &[Sample], range_start: Timestamp, range_end: Timestamp) -> Option<f64> {
        use RangeFunction::*;
        if samples.is_empty() {
            return None;
        }
        match self {
            Rate => extrapolated_rate(samples, range_start, range_end, true, true),
            Increase => extrapolated_rate(samples, range_start, range_end, true, false),
            Delta => extrapolated_rate(samples, range_start, range_end, false, false),
            Irate => instant_value(samples, true),
            Idelta => instant_value(samples, false),
            Changes => Some(changes(samples)),
            Resets => Some(resets(samples)),
            SumOverTime => Some(kahan_sum(samples.iter().map(|s| s.value))),
            AvgOverTime => {
                let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
                Some(kahan_avg(&values))
            }
            MinOverTime => Some(min_value(samples)),
            MaxOverTime => Some(max_value(samples)),
            CountOverTime => Some(samples.len() as f64),
            LastOverTime => samples.last().map(|s| s.value),
        }
    }
}

/// Rate, increase and delta with Prometheus' extrapolation to the window boundaries.
fn extrapolated_rate(
    samples: &[Sample],
    range_start: Timestamp,
    range_end: Timestamp,
    is_counter: bool,
    is_rate: bool,
) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let first = samples[0];
    let last = samples[samples.len() - 1];

    let mut result = last.value - first.value;
    if is_counter {
        let mut prev = first.value;
        for sample in &samples[1..] {
            if sample.value < prev {
                result += prev;
            }
            prev = sample.value;
        }
    }

    let sampled_interval = (last.timestamp - first.timestamp) as f64 / 1000.0;
    if sampled_interval <= 0.0 {
        return None;
    }
    let mut duration_to_start = (first.timestamp - range_start) as f64 / 1000.0;
    let mut duration_to_end = (range_end - last.timestamp) as f64 / 1000.0;
    let average_duration_between_samples = sampled_interval / (samples.len() - 1) as f64;

    // extrapolate to the window edge only if the first/last sample is close enough to it,
    // otherwise assume the series starts/ends half an interval outside the samples
    let extrapolation_threshold = average_duration_between_samples * 1.1;
    if duration_to_start >= extrapolation_threshold {
        duration_to_start = average_duration_between_samples / 2.0;
    }
    if is_counter && result > 0.0 && first.value >= 0.0 {
        // counters cannot go negative, don't extrapolate past zero
        let duration_to_zero = sampled_interval * (first.value / result);
        if duration_to_zero < duration_to_start {
            duration_to_start = duration_to_zero;
        }
    }
    if duration_to_end >= extrapolation_threshold {
        duration_to_end = average_duration_between_samples / 2.0;
    }

    let extrapolate_to_interval = sampled_interval + duration_to_start + duration_to_end;
    let mut factor = extrapolate_to_interval / sampled_interval;
    if is_rate {
        factor /= (range_end - range_start) as f64 / 1000.0;
    }
    Some(result * factor)
}

/// irate and idelta: computed from the last two samples only.
fn instant_value(samples: &[Sample], is_rate: bool) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let last = samples[samples.len() - 1];
    let prev = samples[samples.len() - 2];

    let result = if is_rate && last.value < prev.value {
        // counter reset
        last.value
    } else {
        last.value - prev.value
    };

    if !is_rate {
        return Some(result);
    }
    let interval = last.timestamp - prev.timestamp;
    if interval == 0 {
        return None;
    }
    Some(result / (interval as f64 / 1000.0))
}

fn changes(samples: &[Sample]) -> f64 {
    samples
        .windows(2)
        .filter(|w| w[0].value != w[1].value && !(w[0].value.is_nan() && w[1].value.is_nan()))
        .count() as f64
}

fn resets(samples: &[Sample]) -> f64 {
    samples.windows(2).filter(|w| w[1].value < w[0].value).count() as f64
}

// NaN is replaced by any subsequent value, all-NaN yields NaN
fn min_value(samples: &[Sample]) -> f64 {
    samples.iter().fold(f64::NAN, |acc, s| {
        if acc.is_nan() || s.value < acc {
            s.value
        } else {
            acc
        }
    })
}

fn max_value(samples: &[Sample]) -> f64 {
    samples.iter().fold(f64::NAN, |acc, s| {
        if acc.is_nan() || s.value > acc {
            s.value
        } else {
            acc
        }
    })
}

/// Element-wise math functions over an instant vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MathFunction {
    Abs,
    Ceil,
    Floor,
    Exp,
    Ln,
    Log2,
    Log10,
    Sqrt,
}

impl MathFunction {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        use MathFunction::*;
        let func = match name {
            "abs" => Abs,
            "ceil" => Ceil,
            "floor" => Floor,
            "exp" => Exp,
            "ln" => Ln,
            "log2" => Log2,
            "log10" => Log10,
            "sqrt" => Sqrt,
            _ => return None,
        };
        Some(func)
    }

    pub(crate) fn apply(&self, value: f64) -> f64 {
        use MathFunction::*;
        match self {
            Abs => value.abs(),
            Ceil => value.ceil(),
            Floor => value.floor(),
            Exp => value.exp(),
            Ln => value.ln(),
            Log2 => value.log2(),
            Log10 => value.log10(),
            Sqrt => value.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn samples(points: &[(i64, f64)]) -> Vec<Sample> {
        points.iter().map(|&(t, v)| Sample::new(t, v)).collect()
    }

    #[test]
    fn test_rate_of_steady_counter() {
        // 1 per second over a minute, sampled every 10s
        let series: Vec<(i64, f64)> = (0..=6).map(|i| (i * 10_000, (i * 10) as f64)).collect();
        let rate = RangeFunction::Rate.apply(&samples(&series), 0, 60_000).unwrap();
        assert!((rate - 1.0).abs() < 1e-9, "rate was {rate}");
        let increase = RangeFunction::Increase.apply(&samples(&series), 0, 60_000).unwrap();
        assert!((increase - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_handles_counter_reset() {
        let s = samples(&[(0, 10.0), (10_000, 20.0), (20_000, 5.0), (30_000, 15.0)]);
        // 10 + 5 (after reset from 20) + 10 = 25 over 30s sampled, window 30s
        let increase = RangeFunction::Increase.apply(&s, 0, 30_000).unwrap();
        assert!((increase - 25.0).abs() < 1e-9, "increase was {increase}");
    }

    #[test]
    fn test_rate_needs_two_samples() {
        let s = samples(&[(0, 10.0)]);
        assert_eq!(RangeFunction::Rate.apply(&s, -1000, 0), None);
        assert_eq!(RangeFunction::Irate.apply(&s, -1000, 0), None);
    }

    #[test]
    fn test_delta_is_not_counter_aware() {
        let s = samples(&[(0, 10.0), (10_000, 4.0)]);
        let delta = RangeFunction::Delta.apply(&s, 0, 10_000).unwrap();
        assert!((delta + 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_irate_and_idelta() {
        let s = samples(&[(0, 1.0), (1000, 3.0), (3000, 7.0)]);
        assert_eq!(RangeFunction::Irate.apply(&s, -1, 3000), Some(2.0));
        assert_eq!(RangeFunction::Idelta.apply(&s, -1, 3000), Some(4.0));
        let reset = samples(&[(0, 10.0), (2000, 4.0)]);
        assert_eq!(RangeFunction::Irate.apply(&reset, -1, 2000), Some(2.0));
    }

    #[test_case(RangeFunction::SumOverTime, 10.0)]
    #[test_case(RangeFunction::AvgOverTime, 2.5)]
    #[test_case(RangeFunction::MinOverTime, 1.0)]
    #[test_case(RangeFunction::MaxOverTime, 4.0)]
    #[test_case(RangeFunction::CountOverTime, 4.0)]
    #[test_case(RangeFunction::LastOverTime, 2.0)]
    #[test_case(RangeFunction::Changes, 3.0)]
    #[test_case(RangeFunction::Resets, 2.0)]
    fn test_over_time(func: RangeFunction, expected: f64) {
        let s = samples(&[(1, 3.0), (2, 1.0), (3, 4.0), (4, 2.0)]);
        assert_eq!(func.apply(&s, 0, 4), Some(expected));
    }

    #[test]
    fn test_min_max_skip_nan() {
        let s = samples(&[(1, f64::NAN), (2, 3.0), (3, 1.0)]);
        assert_eq!(min_value(&s), 1.0);
        assert_eq!(max_value(&s), 3.0);
        assert!(max_value(&samples(&[(1, f64::NAN)])).is_nan());
    }

    #[test]
    fn test_kahan_sum_avoids_cancellation() {
        let values = [1.0, 1e100, 1.0, -1e100];
        assert_eq!(kahan_sum(values), 2.0);
        assert_eq!(kahan_avg(&values), 0.5);
    }

    #[test_case(MathFunction::Abs, -2.5, 2.5)]
    #[test_case(MathFunction::Ceil, 1.2, 2.0)]
    #[test_case(MathFunction::Floor, 1.8, 1.0)]
    #[test_case(MathFunction::Sqrt, 16.0, 4.0)]
    #[test_case(MathFunction::Log2, 8.0, 3.0)]
    #[test_case(MathFunction::Log10, 1000.0, 3.0)]
    fn test_math_functions(func: MathFunction, input: f64, expected: f64) {
        assert_eq!(func.apply(input), expected);
    }
}
