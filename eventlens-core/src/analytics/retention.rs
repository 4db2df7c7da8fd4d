//! Weekly signup cohorts and their retention curves.
//!
//! Users are grouped by the Monday (UTC) of their signup week. For every
//! cohort and milestone M the engine reports the share of members seen
//! active on any day offset `>= M` after signup: "have they come back at
//! least once since day M", not "were they active exactly on day M".

use super::stats::percentage_of;
use crate::types::{start_of_day, Event, MetricRow, Signup, TimeWindow, ToMetricRows};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Day offsets at which retention is measured.
pub const RETENTION_MILESTONES: [i64; 5] = [1, 3, 7, 14, 30];

/// Retention of one cohort at one milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneRetention {
    pub days: i64,
    pub retained: i64,
    pub percentage: i64,
}

/// Users who signed up in the same Monday-anchored week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cohort {
    pub week_start: NaiveDate,
    /// e.g. "Week of Jan 6"
    pub label: String,
    pub members: BTreeSet<String>,
    /// One entry per [`RETENTION_MILESTONES`] value, in order
    pub retention: Vec<MilestoneRetention>,
}

impl Cohort {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Percentage retained at `days`, if that milestone was measured.
    pub fn percentage_at(&self, days: i64) -> Option<i64> {
        self.retention
            .iter()
            .find(|m| m.days == days)
            .map(|m| m.percentage)
    }
}

impl ToMetricRows for Cohort {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        let size = self.size() as i64;
        let mut rows = vec![MetricRow::count(format!("{} users", self.label), size)];
        rows.extend(self.retention.iter().map(|m| {
            MetricRow::ratio(
                format!("{} day{}", self.label, m.days),
                m.retained,
                size,
                m.percentage as f64,
            )
        }));
        rows
    }
}

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn cohort_label(week_start: NaiveDate) -> String {
    week_start.format("Week of %b %-d").to_string()
}

/// Build the most recent `max_cohorts` weekly cohorts, oldest first.
///
/// `events` is the unfiltered log; events from users without a signup are
/// ignored. Offsets are floored whole days since signup, so pre-signup
/// events land on negative offsets and never count toward a milestone.
pub fn retention_cohorts(signups: &[Signup], events: &[Event], max_cohorts: usize) -> Vec<Cohort> {
    let signup_times: HashMap<&str, DateTime<Utc>> = signups
        .iter()
        .map(|s| (s.user_id.as_str(), s.signup_time))
        .collect();

    let mut active_offsets: HashMap<&str, BTreeSet<i64>> = HashMap::new();
    for event in events {
        let Some(signup_time) = signup_times.get(event.user_id.as_str()) else {
            continue;
        };
        let elapsed = event.occurred_at - *signup_time;
        let offset = elapsed.num_seconds().div_euclid(86_400);
        active_offsets
            .entry(event.user_id.as_str())
            .or_default()
            .insert(offset);
    }

    let mut weeks: BTreeMap<NaiveDate, BTreeSet<String>> = BTreeMap::new();
    for signup in signups {
        weeks
            .entry(week_start(signup.signup_time.date_naive()))
            .or_default()
            .insert(signup.user_id.clone());
    }

    let skip = weeks.len().saturating_sub(max_cohorts);
    weeks
        .into_iter()
        .skip(skip)
        .filter(|(_, members)| !members.is_empty())
        .map(|(week, members)| {
            let size = members.len() as i64;
            let retention = RETENTION_MILESTONES
                .iter()
                .map(|&days| {
                    let retained = members
                        .iter()
                        .filter(|id| {
                            active_offsets
                                .get(id.as_str())
                                .and_then(|offsets| offsets.iter().next_back())
                                .is_some_and(|latest| *latest >= days)
                        })
                        .count() as i64;
                    MilestoneRetention {
                        days,
                        retained,
                        percentage: percentage_of(retained, size),
                    }
                })
                .collect();

            Cohort {
                week_start: week,
                label: cohort_label(week),
                members,
                retention,
            }
        })
        .collect()
}

/// Signups on one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

impl ToMetricRows for DailyCount {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![MetricRow::count(self.date.format("%Y-%m-%d").to_string(), self.count)]
    }
}

/// Daily signup counts across `window`, one row per day including empty days.
pub fn signups_per_day(signups: &[Signup], window: TimeWindow) -> Vec<DailyCount> {
    let mut per_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    // until is exclusive, so a window ending at midnight stops the day before
    let last_day = (window.until - Duration::microseconds(1)).date_naive();
    let mut day = start_of_day(window.since).date_naive();
    while day <= last_day {
        per_day.insert(day, 0);
        day += Duration::days(1);
    }

    for signup in signups.iter().filter(|s| window.contains(s.signup_time)) {
        *per_day.entry(signup.signup_time.date_naive()).or_insert(0) += 1;
    }

    per_day
        .into_iter()
        .map(|(date, count)| DailyCount { date, count })
        .collect()
}
