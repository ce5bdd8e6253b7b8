use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use itertools::Itertools;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Tolerance before the first lap's recorded start during which lap 1 is already reported as
/// active. Position pushes can land slightly ahead of the timing line's lap-start event.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(60);

/// Start of one lap as reported by the timing data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LapRecord {
    /// Driver credited with the lap-start event
    pub driver_id: String,
    /// Lap number, starting at 1
    pub lap_number: u32,
    /// Absolute time at which the lap began
    pub start_time: DateTime<Utc>,
    /// Lap duration in seconds
    pub lap_duration: f64,
}

/// Immutable index of lap-start events, ordered by lap number.
///
/// Lap-start timestamps are not guaranteed to grow with the lap number (timing-line clock skew),
/// so the index never re-sorts by time. The active lap at `t` is the highest-numbered lap whose
/// start is not after `t`.
#[derive(Clone, Debug)]
pub struct LapIndex {
    laps: Vec<LapRecord>,
    grace_window: TimeDelta,
}

impl Default for LapIndex {
    fn default() -> Self {
        Self::empty()
    }
}

impl LapIndex {
    /// An index with no lap data: every time is treated as pre-race.
    pub fn empty() -> Self {
        Self::with_grace_window(Vec::new(), DEFAULT_GRACE_WINDOW)
    }

    pub fn build(records: Vec<LapRecord>) -> Self {
        Self::with_grace_window(records, DEFAULT_GRACE_WINDOW)
    }

    pub fn with_grace_window(records: Vec<LapRecord>, grace_window: Duration) -> Self {
        let received = records.len();
        let laps = records
            .into_iter()
            .sorted_by_key(|lap| lap.lap_number)
            .dedup_by(|a, b| a.lap_number == b.lap_number)
            .collect::<Vec<_>>();

        if laps.len() != received {
            warn!(
                "Laps: dropped {} record(s) with duplicate lap numbers",
                received - laps.len()
            );
        }
        debug!("Laps: indexed {} lap(s)", laps.len());

        Self {
            laps,
            grace_window: TimeDelta::from_std(grace_window).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.laps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.laps.len()
    }

    pub fn laps(&self) -> &[LapRecord] {
        &self.laps
    }

    /// Lap being driven at `t`, or `None` when `t` is before the race (outside the grace window)
    /// or when there is no lap data.
    pub fn active_lap_at(&self, t: DateTime<Utc>) -> Option<&LapRecord> {
        if let Some(lap) = self.laps.iter().rev().find(|lap| lap.start_time <= t) {
            return Some(lap);
        }

        // a window reaching past the earliest representable time has no lower bound
        self.laps.first().filter(|first| {
            first
                .start_time
                .checked_sub_signed(self.grace_window)
                .is_none_or(|earliest| t >= earliest)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 26, 13, 3, 0).unwrap()
    }

    fn lap(lap_number: u32, start_time: DateTime<Utc>) -> LapRecord {
        LapRecord {
            driver_id: "16".to_string(),
            lap_number,
            start_time,
            lap_duration: 75.3,
        }
    }

    #[test]
    fn test_two_lap_scenario() {
        let index = LapIndex::build(vec![
            lap(2, t0() + TimeDelta::minutes(5)),
            lap(1, t0()),
        ]);

        let at = |t| index.active_lap_at(t).map(|l| l.lap_number);
        assert_eq!(at(t0() - TimeDelta::seconds(30)), Some(1));
        assert_eq!(at(t0() - TimeDelta::seconds(90)), None);
        assert_eq!(at(t0() + TimeDelta::minutes(5)), Some(2));
        assert_eq!(at(t0() + TimeDelta::seconds(4 * 60 + 59)), Some(1));
    }

    #[test]
    fn test_oversized_grace_window_has_no_lower_bound() {
        let index = LapIndex::with_grace_window(
            vec![lap(1, t0()), lap(2, t0() + TimeDelta::minutes(5))],
            Duration::from_secs(10_u64.pow(13)),
        );
        assert_eq!(
            index
                .active_lap_at(t0() - TimeDelta::seconds(5))
                .map(|l| l.lap_number),
            Some(1)
        );
        assert_eq!(
            index
                .active_lap_at(DateTime::<Utc>::MIN_UTC)
                .map(|l| l.lap_number),
            Some(1)
        );
    }

    #[test]
    fn test_build_sorts_by_lap_number() {
        let index = LapIndex::build(vec![
            lap(3, t0() + TimeDelta::minutes(3)),
            lap(1, t0()),
            lap(2, t0() + TimeDelta::minutes(1)),
        ]);
        let numbers: Vec<u32> = index.laps().iter().map(|l| l.lap_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_skewed_start_times_prefer_higher_lap() {
        // lap 3 was logged a second before lap 2
        let index = LapIndex::build(vec![
            lap(1, t0()),
            lap(2, t0() + TimeDelta::seconds(90)),
            lap(3, t0() + TimeDelta::seconds(89)),
        ]);
        assert_eq!(
            index
                .active_lap_at(t0() + TimeDelta::seconds(90))
                .map(|l| l.lap_number),
            Some(3)
        );
    }

    #[test]
    fn test_empty_index_reports_no_lap() {
        let index = LapIndex::empty();
        assert!(index.is_empty());
        assert!(index.active_lap_at(t0()).is_none());
    }

    #[test]
    fn test_duplicate_lap_numbers_keep_first() {
        let first = lap(1, t0());
        let mut duplicate = lap(1, t0() + TimeDelta::seconds(5));
        duplicate.driver_id = "1".to_string();

        let index = LapIndex::build(vec![first.clone(), duplicate]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.laps()[0], first);
    }

    #[test]
    fn test_custom_grace_window() {
        let index = LapIndex::with_grace_window(vec![lap(1, t0())], Duration::from_secs(10));
        assert!(index.active_lap_at(t0() - TimeDelta::seconds(10)).is_some());
        assert!(index.active_lap_at(t0() - TimeDelta::seconds(11)).is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_active_lap_is_highest_started(
            offsets in prop::collection::vec(0i64..7200, 1..40),
            probe in -300i64..7500,
        ) {
            let records: Vec<LapRecord> = offsets
                .iter()
                .enumerate()
                .map(|(i, secs)| lap(i as u32 + 1, t0() + TimeDelta::seconds(*secs)))
                .collect();
            let index = LapIndex::build(records.clone());
            let t = t0() + TimeDelta::seconds(probe);

            let expected = records
                .iter()
                .filter(|l| l.start_time <= t)
                .max_by_key(|l| l.lap_number)
                .or_else(|| {
                    let first = &records[0];
                    (t >= first.start_time - TimeDelta::seconds(60)).then_some(first)
                })
                .map(|l| l.lap_number);

            prop_assert_eq!(index.active_lap_at(t).map(|l| l.lap_number), expected);
        }
    }
}
