//! Distribution helpers shared by the aggregators.
//!
//! Dashboards summarize skewed distributions (session lengths, time on
//! screen) with medians and fixed histograms rather than means.

use crate::error::{Error, Result};
use crate::types::{MetricRow, ToMetricRows};
use serde::Serialize;

/// Median of `values`.
///
/// Even-length input averages the two middle values, so `[1, 2, 3, 4]`
/// gives `2.5`. Empty input is an error: "no data" is unknown, not zero.
pub fn median(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(Error::EmptyInput("median of zero samples".to_string()));
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Ok((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Ok(sorted[mid])
    }
}

/// Integer percentage of `numerator` over `denominator`, rounded half away
/// from zero. A zero denominator gives 0.
pub fn percentage_of(numerator: i64, denominator: i64) -> i64 {
    if denominator == 0 {
        return 0;
    }
    ((numerator as f64 / denominator as f64) * 100.0).round() as i64
}

/// `value` rounded half away from zero to one decimal place.
pub fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// One histogram band: values up to and including `upper` (or everything
/// above the last band when `upper` is `None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub label: &'static str,
    pub upper: Option<u64>,
}

impl Bucket {
    pub const fn upto(label: &'static str, upper: u64) -> Self {
        Self {
            label,
            upper: Some(upper),
        }
    }

    pub const fn overflow(label: &'static str) -> Self {
        Self { label, upper: None }
    }
}

/// Session depth bands.
pub const SESSION_DEPTH_BUCKETS: &[Bucket] = &[
    Bucket::upto("1-2", 2),
    Bucket::upto("3-5", 5),
    Bucket::upto("6-10", 10),
    Bucket::upto("11-20", 20),
    Bucket::overflow("20+"),
];

/// Count of values that landed in one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketCount {
    pub label: String,
    pub count: i64,
}

impl ToMetricRows for BucketCount {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![MetricRow::count(self.label.clone(), self.count)]
    }
}

/// Assign every value to the first bucket whose bound it does not exceed.
///
/// Every bucket is reported, empty ones included, in bucket order. Values
/// above the last bound with no overflow bucket configured are dropped.
pub fn bucketize<I>(values: I, buckets: &[Bucket]) -> Vec<BucketCount>
where
    I: IntoIterator<Item = u64>,
{
    let mut counts = vec![0i64; buckets.len()];
    for value in values {
        let slot = buckets
            .iter()
            .position(|bucket| bucket.upper.map_or(true, |upper| value <= upper));
        if let Some(slot) = slot {
            counts[slot] += 1;
        }
    }

    buckets
        .iter()
        .zip(counts)
        .map(|(bucket, count)| BucketCount {
            label: bucket.label.to_string(),
            count,
        })
        .collect()
}
