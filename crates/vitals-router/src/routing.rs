//! Routing decisions between the hot and cold stores
//!
//! The hot store holds the most recent `hot_boundary_age` of data. A query is
//! served entirely from one store when it falls on one side of the boundary
//! and split in two when it straddles it.

use crate::model::TimeRange;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use vitals_cache::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    HotOnly,
    ColdOnly,
    Split,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HotOnly => "HOT_ONLY",
            Self::ColdOnly => "COLD_ONLY",
            Self::Split => "SPLIT",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected latency, for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyClass {
    Fast,
    Moderate,
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingDecision {
    pub strategy: Strategy,
    /// The hot boundary, present only for `Split`
    pub split_point: Option<DateTime<Utc>>,
    pub latency: LatencyClass,
}

impl RoutingDecision {
    /// Sub-range served by the hot store, if any.
    pub fn hot_range(&self, range: TimeRange) -> Option<TimeRange> {
        match (self.strategy, self.split_point) {
            (Strategy::HotOnly, _) => Some(range),
            (Strategy::Split, Some(boundary)) => TimeRange::new(boundary, range.end()).ok(),
            _ => None,
        }
    }

    /// Sub-range served by the cold store, if any.
    pub fn cold_range(&self, range: TimeRange) -> Option<TimeRange> {
        match (self.strategy, self.split_point) {
            (Strategy::ColdOnly, _) => Some(range),
            (Strategy::Split, Some(boundary)) => TimeRange::new(range.start(), boundary).ok(),
            _ => None,
        }
    }
}

/// Decide how to serve `range`, given the hot window age and the current time.
pub fn route(range: TimeRange, hot_boundary_age: Duration, clock: &dyn Clock) -> RoutingDecision {
    let now = clock.now();
    let age = chrono::Duration::from_std(hot_boundary_age).unwrap_or(chrono::Duration::MAX);
    let boundary = now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC);

    if range.start() >= boundary {
        RoutingDecision {
            strategy: Strategy::HotOnly,
            split_point: None,
            latency: LatencyClass::Fast,
        }
    } else if range.end() < boundary {
        RoutingDecision {
            strategy: Strategy::ColdOnly,
            split_point: None,
            latency: LatencyClass::Slow,
        }
    } else {
        RoutingDecision {
            strategy: Strategy::Split,
            split_point: Some(boundary),
            latency: LatencyClass::Moderate,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vitals_cache::ManualClock;

    const SEVEN_DAYS: Duration = Duration::from_secs(7 * 24 * 3600);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0)
            .single()
            .expect("valid test date")
    }

    fn range(days_ago_start: i64, days_ago_end: i64) -> TimeRange {
        TimeRange::new(
            now() - chrono::Duration::days(days_ago_start),
            now() - chrono::Duration::days(days_ago_end),
        )
        .unwrap()
    }

    #[test]
    fn test_recent_range_is_hot_only() {
        let clock = ManualClock::new(now());
        let decision = route(range(2, 0), SEVEN_DAYS, &clock);
        assert_eq!(decision.strategy, Strategy::HotOnly);
        assert_eq!(decision.split_point, None);
        assert_eq!(decision.latency, LatencyClass::Fast);
    }

    #[test]
    fn test_old_range_is_cold_only() {
        let clock = ManualClock::new(now());
        let decision = route(range(20, 10), SEVEN_DAYS, &clock);
        assert_eq!(decision.strategy, Strategy::ColdOnly);
        assert_eq!(decision.split_point, None);
    }

    #[test]
    fn test_straddling_range_is_split_at_boundary() {
        let clock = ManualClock::new(now());
        let query_range = range(10, 0);
        let decision = route(query_range, SEVEN_DAYS, &clock);
        let boundary = now() - chrono::Duration::days(7);

        assert_eq!(decision.strategy, Strategy::Split);
        assert_eq!(decision.split_point, Some(boundary));

        let hot = decision.hot_range(query_range).unwrap();
        let cold = decision.cold_range(query_range).unwrap();
        assert_eq!((hot.start(), hot.end()), (boundary, now()));
        assert_eq!((cold.start(), cold.end()), (query_range.start(), boundary));
    }

    #[test]
    fn test_thirty_day_boundary_cases() {
        let clock = ManualClock::new(now());
        let thirty_days = Duration::from_secs(30 * 24 * 3600);

        assert_eq!(route(range(1, 0), thirty_days, &clock).strategy, Strategy::HotOnly);
        assert_eq!(route(range(60, 40), thirty_days, &clock).strategy, Strategy::ColdOnly);

        let straddling = route(range(40, 1), thirty_days, &clock);
        assert_eq!(straddling.strategy, Strategy::Split);
        assert_eq!(
            straddling.split_point,
            Some(now() - chrono::Duration::days(30))
        );
    }

    #[test]
    fn test_boundary_edges() {
        let clock = ManualClock::new(now());
        // start exactly on the boundary is hot
        assert_eq!(route(range(7, 0), SEVEN_DAYS, &clock).strategy, Strategy::HotOnly);
        // end exactly on the boundary still touches the hot window
        assert_eq!(route(range(8, 7), SEVEN_DAYS, &clock).strategy, Strategy::Split);
    }

    #[test]
    fn test_single_instant_routes_like_any_range() {
        let clock = ManualClock::new(now());
        assert_eq!(route(range(1, 1), SEVEN_DAYS, &clock).strategy, Strategy::HotOnly);
        assert_eq!(route(range(9, 9), SEVEN_DAYS, &clock).strategy, Strategy::ColdOnly);
    }

    #[test]
    fn test_zero_boundary_age_is_cold_unless_at_or_after_now() {
        let clock = ManualClock::new(now());
        assert_eq!(route(range(1, 0), Duration::ZERO, &clock).strategy, Strategy::Split);
        assert_eq!(route(range(2, 1), Duration::ZERO, &clock).strategy, Strategy::ColdOnly);
        assert_eq!(route(range(0, 0), Duration::ZERO, &clock).strategy, Strategy::HotOnly);
    }

    #[test]
    fn test_decision_follows_clock() {
        let clock = ManualClock::new(now());
        let query_range = range(3, 2);
        assert_eq!(route(query_range, SEVEN_DAYS, &clock).strategy, Strategy::HotOnly);

        clock.advance(chrono::Duration::days(30));
        assert_eq!(route(query_range, SEVEN_DAYS, &clock).strategy, Strategy::ColdOnly);
    }
}
