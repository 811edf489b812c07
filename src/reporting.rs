//! Report-only aggregation helpers, not wired into live settlement
//! (spec.md §9 open question; SPEC_FULL.md §4.3/§11).
//!
//! The settlement engine's canonical precipitation rule is a raw sum of
//! every non-missing reading in the window (`resolution::resolve`). The
//! original case-study generator instead buckets readings by clock hour,
//! takes the max within each hour, then sums across hours — compensating
//! for the IEM feed's running-accumulator convention for `p01m`. That
//! variant is preserved here for report generation, not for settlement.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Timelike, Utc};

/// `(hour-bucket, reading)` input taken directly from parsed observations.
pub struct HourlyReading {
    pub instant: DateTime<Utc>,
    pub value: f64,
}

/// Buckets `readings` by clock hour, takes the max within each hour, and
/// sums across hours. Returns `None` if `readings` is empty.
pub fn aggregate_precipitation_hourly_capped(readings: &[HourlyReading]) -> Option<f64> {
    if readings.is_empty() {
        return None;
    }

    let mut by_hour: BTreeMap<(i32, u32, u32, u32), f64> = BTreeMap::new();
    for reading in readings {
        let key = (
            reading.instant.year(),
            reading.instant.month(),
            reading.instant.day(),
            reading.instant.hour(),
        );
        let entry = by_hour.entry(key).or_insert(f64::MIN);
        if reading.value > *entry {
            *entry = reading.value;
        }
    }

    Some(by_hour.values().sum())
}
