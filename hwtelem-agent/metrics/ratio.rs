//! Ratio arithmetic
//!
//! A zero denominator yields NaN. Aggregate rates are always computed from
//! summed raw counts, never by averaging per-entity rates.

pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        f64::NAN
    } else {
        numerator / denominator
    }
}

/// `(1 - misses / accesses) * 100`
pub fn hit_rate_from_sums(misses: u64, accesses: u64) -> f64 {
    (1.0 - ratio(misses as f64, accesses as f64)) * 100.0
}

/// `part / whole * 100`
pub fn percent_of(part: u64, whole: u64) -> f64 {
    ratio(part as f64, whole as f64) * 100.0
}

/// Bytes per second for `count` events of `bytes` each
pub fn throughput(count: u64, bytes: u64, seconds: f64) -> f64 {
    ratio(count as f64 * bytes as f64, seconds)
}
