//! Time-windowed activity comparisons anchored at "now".
//!
//! - stickiness: DAU over MAU
//! - churn risk: active last week, silent this week
//! - resurrection: back this week after two or more silent weeks
//! - pulse: headline counts next to their previous-period value
//!
//! Every count is over distinct user ids unless it says events.

use super::stats::percentage_of;
use super::user_labels;
use crate::error::Result;
use crate::source::{EventQuery, EventSource};
use crate::types::{start_of_day, Event, MetricRow, ToMetricRows};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Silence, in days before the current week starts, that makes a returning
/// user count as resurrected.
pub const RESURRECTION_GAP_DAYS: i64 = 14;

// ============================================
// Stickiness
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stickiness {
    pub dau: i64,
    pub mau: i64,
    /// DAU as an integer percentage of MAU
    pub ratio: i64,
}

impl Stickiness {
    pub fn from_counts(dau: i64, mau: i64) -> Self {
        Self {
            dau,
            mau,
            ratio: percentage_of(dau, mau),
        }
    }
}

impl ToMetricRows for Stickiness {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![
            MetricRow::ratio("dau_mau", self.dau, self.mau, self.ratio as f64),
            MetricRow::count("dau", self.dau),
            MetricRow::count("mau", self.mau),
        ]
    }
}

/// DAU (UTC midnight to `now`) over MAU (trailing 30 days). Events at or
/// after `now` are ignored.
pub fn stickiness(source: &dyn EventSource, now: DateTime<Utc>) -> Result<Stickiness> {
    let dau = source.distinct_users(&EventQuery::new().between(start_of_day(now), now))?;
    let mau = source.distinct_users(&EventQuery::new().between(now - Duration::days(30), now))?;
    Ok(Stickiness::from_counts(dau.len() as i64, mau.len() as i64))
}

// ============================================
// Churn risk
// ============================================

/// A user who went quiet this week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChurnRiskRow {
    pub user_id: String,
    pub name: String,
    pub last_event_at: DateTime<Utc>,
    pub last_event_type: String,
    pub events_last_week: i64,
}

impl ToMetricRows for ChurnRiskRow {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![MetricRow::count(
            format!("{} ({}, last: {})", self.name, self.user_id, self.last_event_type),
            self.events_last_week,
        )]
    }
}

/// Users in `last_week` who are missing from `this_week_users`.
///
/// Ordered by the time of their last event, most recent first, capped at
/// `limit`. Names default to the user id; see [`fetch_churn_risk`].
pub fn churn_risk(
    last_week: &[Event],
    this_week_users: &BTreeSet<String>,
    limit: usize,
) -> Vec<ChurnRiskRow> {
    let mut by_user: HashMap<&str, (&Event, i64)> = HashMap::new();
    for event in last_week {
        if this_week_users.contains(&event.user_id) {
            continue;
        }
        by_user
            .entry(event.user_id.as_str())
            .and_modify(|(latest, count)| {
                *count += 1;
                if (event.occurred_at, event.id) > (latest.occurred_at, latest.id) {
                    *latest = event;
                }
            })
            .or_insert((event, 1));
    }

    let mut rows: Vec<ChurnRiskRow> = by_user
        .into_iter()
        .map(|(user_id, (latest, count))| ChurnRiskRow {
            user_id: user_id.to_string(),
            name: user_id.to_string(),
            last_event_at: latest.occurred_at,
            last_event_type: latest.event_type.clone(),
            events_last_week: count,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.last_event_at
            .cmp(&a.last_event_at)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    rows.truncate(limit);
    rows
}

/// Churn risk as of `now`: active in `[now-14d, now-7d)`, silent in
/// `[now-7d, now)`.
pub fn fetch_churn_risk(
    source: &dyn EventSource,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<ChurnRiskRow>> {
    let this_week_start = now - Duration::days(7);
    let last_week_start = this_week_start - Duration::days(7);

    let last_week = source.list_events(&EventQuery::new().between(last_week_start, this_week_start))?;
    let this_week_users = source.distinct_users(&EventQuery::new().between(this_week_start, now))?;

    let mut rows = churn_risk(&last_week, &this_week_users, limit);
    let ids: Vec<String> = rows.iter().map(|r| r.user_id.clone()).collect();
    let names = user_labels(source, &ids);
    for row in &mut rows {
        if let Some(name) = names.get(&row.user_id) {
            row.name = name.clone();
        }
    }

    tracing::debug!(
        candidates = last_week.len(),
        at_risk = rows.len(),
        "Computed churn risk"
    );
    Ok(rows)
}

// ============================================
// Resurrection
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResurrectedUser {
    pub user_id: String,
    pub days_since_last_seen: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resurrection {
    /// All resurrected users, not just the examples
    pub count: i64,
    pub examples: Vec<ResurrectedUser>,
}

impl ToMetricRows for Resurrection {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        let mut rows = vec![MetricRow::count("resurrected", self.count)];
        rows.extend(
            self.examples
                .iter()
                .map(|u| MetricRow::count(u.user_id.clone(), u.days_since_last_seen)),
        );
        rows
    }
}

/// Users whose previous event is at least [`RESURRECTION_GAP_DAYS`] whole
/// days before `window_start`.
///
/// `last_seen` maps each recently active user to their latest event before
/// the window; users absent from it are new, not resurrected. Examples are
/// the longest absences first.
pub fn resurrection(
    last_seen: &HashMap<String, DateTime<Utc>>,
    window_start: DateTime<Utc>,
    max_examples: usize,
) -> Resurrection {
    let mut resurrected: Vec<ResurrectedUser> = last_seen
        .iter()
        .filter_map(|(user_id, seen)| {
            let days = (window_start - *seen).num_seconds().div_euclid(86_400);
            (days >= RESURRECTION_GAP_DAYS).then(|| ResurrectedUser {
                user_id: user_id.clone(),
                days_since_last_seen: days,
            })
        })
        .collect();

    resurrected.sort_by(|a, b| {
        b.days_since_last_seen
            .cmp(&a.days_since_last_seen)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    let count = resurrected.len() as i64;
    resurrected.truncate(max_examples);
    Resurrection {
        count,
        examples: resurrected,
    }
}

/// Resurrection as of `now`, over users active in `[now-7d, now)`.
pub fn fetch_resurrection(
    source: &dyn EventSource,
    now: DateTime<Utc>,
    max_examples: usize,
) -> Result<Resurrection> {
    let window_start = now - Duration::days(7);
    let recent = source.distinct_users(&EventQuery::new().between(window_start, now))?;
    let last_seen = source.latest_event_before(&recent, window_start)?;

    let result = resurrection(&last_seen, window_start, max_examples);
    tracing::debug!(
        active = recent.len(),
        returning = last_seen.len(),
        resurrected = result.count,
        "Computed resurrection"
    );
    Ok(result)
}

// ============================================
// Pulse
// ============================================

/// Headline metrics shown at the top of the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PulseKind {
    TotalUsers,
    DailyActiveUsers,
    WeeklyActiveUsers,
    NewSignupsToday,
    EventsToday,
}

impl PulseKind {
    pub const ALL: [PulseKind; 5] = [
        PulseKind::TotalUsers,
        PulseKind::DailyActiveUsers,
        PulseKind::WeeklyActiveUsers,
        PulseKind::NewSignupsToday,
        PulseKind::EventsToday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PulseKind::TotalUsers => "total_users",
            PulseKind::DailyActiveUsers => "dau",
            PulseKind::WeeklyActiveUsers => "wau",
            PulseKind::NewSignupsToday => "new_signups_today",
            PulseKind::EventsToday => "events_today",
        }
    }
}

/// A value and the same value one period earlier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PulseMetric {
    pub name: String,
    pub value: i64,
    pub previous_value: i64,
}

impl ToMetricRows for PulseMetric {
    /// Value in the numerator slot, previous value in the denominator slot.
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![MetricRow {
            key: self.name.clone(),
            numerator: Some(self.value),
            denominator: Some(self.previous_value),
            rate: None,
        }]
    }
}

/// Compute one pulse metric as of `now`.
///
/// "Today" runs from UTC midnight up to `now`; the previous value covers the
/// day (or week) before. Signups and events at or after `now` do not count.
pub fn pulse(source: &dyn EventSource, kind: PulseKind, now: DateTime<Utc>) -> Result<PulseMetric> {
    let today = start_of_day(now);
    let yesterday = today - Duration::days(1);
    let week_ago = now - Duration::days(7);
    let two_weeks_ago = now - Duration::days(14);

    let (value, previous_value) = match kind {
        PulseKind::TotalUsers => {
            let signups = source.list_signups(None)?;
            let cutoff = now - Duration::days(1);
            let current = signups.iter().filter(|s| s.signup_time < now).count();
            let previous = signups.iter().filter(|s| s.signup_time < cutoff).count();
            (current as i64, previous as i64)
        }
        PulseKind::DailyActiveUsers => (
            source.distinct_users(&EventQuery::new().between(today, now))?.len() as i64,
            source
                .distinct_users(&EventQuery::new().between(yesterday, today))?
                .len() as i64,
        ),
        PulseKind::WeeklyActiveUsers => (
            source
                .distinct_users(&EventQuery::new().between(week_ago, now))?
                .len() as i64,
            source
                .distinct_users(&EventQuery::new().between(two_weeks_ago, week_ago))?
                .len() as i64,
        ),
        PulseKind::NewSignupsToday => {
            let signups = source.list_signups(Some(yesterday))?;
            let today_count = signups
                .iter()
                .filter(|s| s.signup_time >= today && s.signup_time < now)
                .count();
            let yesterday_count = signups.iter().filter(|s| s.signup_time < today).count();
            (today_count as i64, yesterday_count as i64)
        }
        PulseKind::EventsToday => (
            source.count_matching(&EventQuery::new().between(today, now))?,
            source.count_matching(&EventQuery::new().between(yesterday, today))?,
        ),
    };

    Ok(PulseMetric {
        name: kind.as_str().to_string(),
        value,
        previous_value,
    })
}
