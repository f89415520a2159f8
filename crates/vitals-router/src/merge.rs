//! Merging hot and cold results
//!
//! Samples are keyed by point and timestamp. Cold samples go in first and hot
//! samples overwrite them, so the hot store wins wherever both hold a value
//! for the same instant. Within one source the last sample seen for an
//! instant wins.

use crate::model::{Sample, Series, TimeRange};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Merge per-point series from both stores.
///
/// The output holds one series per point name, sorted by name, with samples
/// strictly ascending by time and within `range`. Points that have no samples
/// in range are omitted.
pub fn merge(hot: Option<&[Series]>, cold: Option<&[Series]>, range: TimeRange) -> Vec<Series> {
    let mut points: BTreeMap<&str, BTreeMap<DateTime<Utc>, f64>> = BTreeMap::new();

    for series in [cold, hot].into_iter().flatten().flatten() {
        let samples = points.entry(series.name.as_str()).or_default();
        for sample in &series.samples {
            if range.contains(sample.time) {
                samples.insert(sample.time, sample.value);
            }
        }
    }

    points
        .into_iter()
        .filter(|(_, samples)| !samples.is_empty())
        .map(|(name, samples)| Series {
            name: name.to_owned(),
            samples: samples
                .into_iter()
                .map(|(time, value)| Sample { value, time })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0)
            .single()
            .expect("valid test date")
    }

    fn series(name: &str, samples: &[(u32, f64)]) -> Series {
        Series {
            name: name.to_string(),
            samples: samples
                .iter()
                .map(|&(day, value)| Sample {
                    value,
                    time: at(day),
                })
                .collect(),
        }
    }

    fn values(series: &Series) -> Vec<(u32, f64)> {
        use chrono::Datelike;
        series
            .samples
            .iter()
            .map(|s| (s.time.day(), s.value))
            .collect()
    }

    #[test]
    fn test_hot_wins_on_identical_timestamps() {
        let range = TimeRange::new(at(1), at(20)).unwrap();
        let cold = vec![series("a", &[(1, 1.0), (10, 10.0)])];
        let hot = vec![series("a", &[(10, 99.0), (15, 15.0)])];

        let merged = merge(Some(hot.as_slice()), Some(cold.as_slice()), range);

        assert_eq!(merged.len(), 1);
        assert_eq!(values(&merged[0]), vec![(1, 1.0), (10, 99.0), (15, 15.0)]);
    }

    #[test]
    fn test_output_is_sorted_and_bounded() {
        let range = TimeRange::new(at(5), at(10)).unwrap();
        let cold = vec![series("b", &[(9, 9.0), (6, 6.0), (2, 2.0)])];
        let hot = vec![
            series("a", &[(11, 11.0), (10, 10.0)]),
            series("c", &[(1, 1.0)]),
        ];

        let merged = merge(Some(hot.as_slice()), Some(cold.as_slice()), range);

        let names: Vec<_> = merged.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(values(&merged[0]), vec![(10, 10.0)]);
        assert_eq!(values(&merged[1]), vec![(6, 6.0), (9, 9.0)]);
    }

    #[test]
    fn test_duplicates_within_one_source_keep_the_last() {
        let range = TimeRange::new(at(1), at(5)).unwrap();
        let cold = vec![series("a", &[(2, 1.0), (2, 2.0)]), series("a", &[(2, 3.0)])];

        let merged = merge(None, Some(cold.as_slice()), range);

        assert_eq!(values(&merged[0]), vec![(2, 3.0)]);
    }

    #[test]
    fn test_single_source_and_empty_inputs() {
        let range = TimeRange::new(at(1), at(5)).unwrap();
        let hot = vec![series("a", &[(3, 3.0), (1, 1.0)])];

        assert_eq!(values(&merge(Some(hot.as_slice()), None, range)[0]), vec![(1, 1.0), (3, 3.0)]);
        assert!(merge(None, None, range).is_empty());
        let empty: Vec<Series> = Vec::new();
        assert!(merge(Some(empty.as_slice()), Some(empty.as_slice()), range).is_empty());
    }
}
