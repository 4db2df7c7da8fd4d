//! View-to-conversion relationships.
//!
//! Three shapes share this module:
//! - entity-keyed conversion tables (content leaderboard, save-through),
//!   which rank entities by views, keep the top N and only then join the
//!   conversion counts from the same window
//! - per-user activation, anchored to each user's signup time
//! - ordered step funnels over distinct users
//!
//! The entity join does not require a conversion to follow its view; both
//! events only have to fall inside the window.

use super::stats::{median, percentage_of};
use crate::error::{Error, Result};
use crate::source::{partition_by_user, EventQuery, EventSource};
use crate::types::{entity_types, event_types, Event, MetricRow, Signup, TimeWindow, ToMetricRows};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Length of the id prefix shown when an entity has no known name.
const FALLBACK_ID_LEN: usize = 8;

// ============================================
// Entity-keyed conversion tables
// ============================================

/// Content types with a leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Country,
    City,
    Place,
    Collection,
    Thread,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::Country,
        ContentType::City,
        ContentType::Place,
        ContentType::Collection,
        ContentType::Thread,
    ];

    /// Entity type name, also the name of its lookup table.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Country => entity_types::COUNTRY,
            ContentType::City => entity_types::CITY,
            ContentType::Place => entity_types::PLACE,
            ContentType::Collection => entity_types::COLLECTION,
            ContentType::Thread => entity_types::THREAD,
        }
    }

    /// The event that counts as a view of this content.
    pub fn view_event(&self) -> &'static str {
        match self {
            ContentType::Country => event_types::VIEWED_COUNTRY,
            ContentType::City => event_types::VIEWED_CITY,
            ContentType::Place => event_types::VIEWED_PLACE,
            ContentType::Collection => event_types::VIEWED_COLLECTION,
            ContentType::Thread => event_types::VIEWED_THREAD,
        }
    }

    /// Events that count as a conversion after viewing this content.
    pub fn conversion_events(&self) -> &'static [&'static str] {
        match self {
            ContentType::Country => &[event_types::VIEWED_CITY],
            ContentType::City => &[event_types::VIEWED_PLACE],
            ContentType::Place => &[event_types::SAVED_PLACE],
            ContentType::Collection => &[event_types::VIEWED_PLACE],
            ContentType::Thread => &[event_types::REPLIED_THREAD],
        }
    }
}

/// One ranked entity with its views and conversions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionRow {
    pub id: String,
    pub name: String,
    pub views: i64,
    pub conversions: i64,
    /// Integer percentage of views that converted
    pub rate: i64,
}

impl ToMetricRows for ConversionRow {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![MetricRow::ratio(
            self.name.clone(),
            self.conversions,
            self.views,
            self.rate as f64,
        )]
    }
}

/// Label used for an entity whose name could not be resolved.
pub fn fallback_label(id: &str) -> String {
    id.chars().take(FALLBACK_ID_LEN).collect()
}

fn count_by_entity(events: &[Event]) -> HashMap<&str, i64> {
    let mut counts = HashMap::new();
    for event in events {
        if let Some(id) = event.entity_id.as_deref() {
            *counts.entry(id).or_insert(0) += 1;
        }
    }
    counts
}

/// Rank entities by view count, keep the top `limit`, then join conversions.
///
/// Ties in view count are broken by id. Names are left as the fallback
/// label; see [`attach_entity_names`].
pub fn rank_conversions(views: &[Event], conversions: &[Event], limit: usize) -> Vec<ConversionRow> {
    let view_counts = count_by_entity(views);
    let conversion_counts = count_by_entity(conversions);

    let mut ranked: Vec<(&str, i64)> = view_counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(limit);

    ranked
        .into_iter()
        .map(|(id, views)| {
            let conversions = conversion_counts.get(id).copied().unwrap_or(0);
            ConversionRow {
                id: id.to_string(),
                name: fallback_label(id),
                views,
                conversions,
                rate: percentage_of(conversions, views),
            }
        })
        .collect()
}

/// Replace fallback labels with display names where the source knows them.
///
/// Misses and lookup failures keep the fallback label.
pub fn attach_entity_names(source: &dyn EventSource, entity_type: &str, rows: &mut [ConversionRow]) {
    if rows.is_empty() {
        return;
    }
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

    let names = match source.resolve_entity_names(entity_type, &ids) {
        Ok(names) => names,
        Err(e) => {
            tracing::warn!(entity_type, error = %e, "Entity name lookup failed; using id labels");
            return;
        }
    };

    for row in rows.iter_mut() {
        match names.get(&row.id) {
            Some(name) => row.name = name.clone(),
            None => tracing::debug!(entity_type, id = %row.id, "No display name for entity"),
        }
    }
}

/// Most viewed entities of one content type with their conversion rate.
pub fn content_leaderboard(
    source: &dyn EventSource,
    content_type: ContentType,
    window: TimeWindow,
    limit: usize,
) -> Result<Vec<ConversionRow>> {
    let views = source.list_events(
        &EventQuery::new()
            .event_type(content_type.view_event())
            .entity_type(content_type.as_str())
            .between(window.since, window.until),
    )?;
    let conversions = source.list_events(
        &EventQuery::new()
            .event_types(content_type.conversion_events())
            .between(window.since, window.until),
    )?;

    let mut rows = rank_conversions(&views, &conversions, limit);
    attach_entity_names(source, content_type.as_str(), &mut rows);
    Ok(rows)
}

/// Most viewed places with how often they were saved.
pub fn save_through_rate(
    source: &dyn EventSource,
    window: TimeWindow,
    limit: usize,
) -> Result<Vec<ConversionRow>> {
    let views = source.list_events(
        &EventQuery::new()
            .event_type(event_types::VIEWED_PLACE)
            .between(window.since, window.until),
    )?;
    let saves = source.list_events(
        &EventQuery::new()
            .event_type(event_types::SAVED_PLACE)
            .between(window.since, window.until),
    )?;

    let mut rows = rank_conversions(&views, &saves, limit);
    attach_entity_names(source, entity_types::PLACE, &mut rows);
    Ok(rows)
}

// ============================================
// Activation
// ============================================

/// Share of new users who did something meaningful right after signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationRate {
    pub activated: i64,
    pub total: i64,
    pub rate: i64,
}

impl ToMetricRows for ActivationRate {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![MetricRow::ratio(
            "activation",
            self.activated,
            self.total,
            self.rate as f64,
        )]
    }
}

/// 3+ place views, or a save, or opening a thread.
fn is_activated(events: &[&Event]) -> bool {
    let count = |event_type: &str| events.iter().filter(|e| e.event_type == event_type).count();
    count(event_types::VIEWED_PLACE) >= 3
        || count(event_types::SAVED_PLACE) >= 1
        || count(event_types::OPENED_THREAD) >= 1
}

/// Activation over pre-fetched events.
///
/// Each user's events are checked against `[signup_time, signup_time +
/// window]`, both ends inclusive. `events` must be ordered by user.
pub fn activation_rate(signups: &[Signup], events: &[Event], window: Duration) -> ActivationRate {
    let by_user: HashMap<&str, &[Event]> = partition_by_user(events).into_iter().collect();

    let activated = signups
        .iter()
        .filter(|signup| {
            let end = signup.signup_time + window;
            let user_events: Vec<&Event> = by_user
                .get(signup.user_id.as_str())
                .map(|slice| {
                    slice
                        .iter()
                        .filter(|e| e.occurred_at >= signup.signup_time && e.occurred_at <= end)
                        .collect()
                })
                .unwrap_or_default();
            is_activated(&user_events)
        })
        .count() as i64;

    let total = signups.len() as i64;
    ActivationRate {
        activated,
        total,
        rate: percentage_of(activated, total),
    }
}

/// Activation of everyone who signed up inside `window`.
///
/// Fetches the relevant events once for all signups and partitions them in
/// memory.
pub fn fetch_activation_rate(
    source: &dyn EventSource,
    window: TimeWindow,
    activation_window: Duration,
) -> Result<ActivationRate> {
    let signups: Vec<Signup> = source
        .list_signups(Some(window.since))?
        .into_iter()
        .filter(|s| window.contains(s.signup_time))
        .collect();

    let (Some(first), Some(last)) = (
        signups.iter().map(|s| s.signup_time).min(),
        signups.iter().map(|s| s.signup_time).max(),
    ) else {
        return Ok(activation_rate(&[], &[], activation_window));
    };

    let events = source.list_events(
        &EventQuery::new()
            .event_types(&[
                event_types::VIEWED_PLACE,
                event_types::SAVED_PLACE,
                event_types::OPENED_THREAD,
            ])
            // until is exclusive; the activation window end is not, but
            // nothing at or after the window end counts
            .between(
                first,
                (last + activation_window + Duration::microseconds(1)).min(window.until),
            ),
    )?;

    let result = activation_rate(&signups, &events, activation_window);
    tracing::debug!(
        signups = result.total,
        activated = result.activated,
        events = events.len(),
        "Computed activation rate"
    );
    Ok(result)
}

// ============================================
// Signup to value
// ============================================

/// How long new users take to reach their first value action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignupToValue {
    /// Unknown (not zero) when nobody has reached a value action
    pub median_minutes: Option<i64>,
    pub sample_size: i64,
}

impl ToMetricRows for SignupToValue {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![MetricRow {
            key: "signup_to_value_minutes".to_string(),
            numerator: self.median_minutes,
            denominator: Some(self.sample_size),
            rate: None,
        }]
    }
}

/// Median minutes from signup to each user's first value action.
///
/// Only a user's earliest value event counts; if it predates the signup the
/// user is left out of the sample.
pub fn signup_to_value(signups: &[Signup], events: &[Event]) -> Result<SignupToValue> {
    let mut first_value: HashMap<&str, DateTime<Utc>> = HashMap::new();
    for event in events
        .iter()
        .filter(|e| event_types::VALUE_ACTIONS.contains(&e.event_type.as_str()))
    {
        first_value
            .entry(event.user_id.as_str())
            .and_modify(|ts| {
                if event.occurred_at < *ts {
                    *ts = event.occurred_at;
                }
            })
            .or_insert(event.occurred_at);
    }

    let minutes: Vec<f64> = signups
        .iter()
        .filter_map(|signup| {
            let first = first_value.get(signup.user_id.as_str())?;
            let elapsed = (*first - signup.signup_time).num_seconds() as f64 / 60.0;
            (elapsed >= 0.0).then_some(elapsed)
        })
        .collect();

    let median_minutes = match median(&minutes) {
        Ok(value) => Some(value.round() as i64),
        Err(Error::EmptyInput(_)) => None,
        Err(e) => return Err(e),
    };

    Ok(SignupToValue {
        median_minutes,
        sample_size: minutes.len() as i64,
    })
}

// ============================================
// Step funnels
// ============================================

/// One step of an ordered funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunnelStep {
    pub label: &'static str,
    pub event_type: &'static str,
}

const fn step(label: &'static str, event_type: &'static str) -> FunnelStep {
    FunnelStep { label, event_type }
}

/// A named, predefined funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Funnel {
    pub name: &'static str,
    pub steps: &'static [FunnelStep],
}

pub const ONBOARDING_FUNNEL: Funnel = Funnel {
    name: "onboarding",
    steps: &[
        step("Welcome", event_types::VIEWED_COUNTRY),
        step("Explore", event_types::VIEWED_CITY),
        step("View Place", event_types::VIEWED_PLACE),
        step("Save", event_types::SAVED_PLACE),
        step("Create Trip", event_types::CREATED_TRIP),
    ],
};

pub const DISCOVERY_FUNNEL: Funnel = Funnel {
    name: "discovery",
    steps: &[
        step("Browse Countries", event_types::VIEWED_COUNTRY),
        step("Explore City", event_types::VIEWED_CITY),
        step("View Place", event_types::VIEWED_PLACE),
        step("Save Place", event_types::SAVED_PLACE),
    ],
};

pub const COMMUNITY_FUNNEL: Funnel = Funnel {
    name: "community",
    steps: &[
        step("View Thread", event_types::OPENED_THREAD),
        step("Reply", event_types::REPLIED_THREAD),
    ],
};

pub const TRIP_FUNNEL: Funnel = Funnel {
    name: "trip",
    steps: &[
        step("View Place", event_types::VIEWED_PLACE),
        step("Save Place", event_types::SAVED_PLACE),
        step("Create Trip", event_types::CREATED_TRIP),
        step("Add to Trip", event_types::ADDED_PLACE_TO_TRIP),
    ],
};

pub const PREDEFINED_FUNNELS: [Funnel; 4] =
    [ONBOARDING_FUNNEL, DISCOVERY_FUNNEL, COMMUNITY_FUNNEL, TRIP_FUNNEL];

/// Users who reached one funnel step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunnelStepResult {
    pub label: String,
    pub count: i64,
    /// Percentage of the first step
    pub percentage: i64,
    /// Percentage lost since the previous step
    pub dropoff: i64,
}

impl ToMetricRows for FunnelStepResult {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![MetricRow {
            key: self.label.clone(),
            numerator: Some(self.count),
            denominator: Some(self.dropoff),
            rate: Some(self.percentage as f64),
        }]
    }
}

/// Distinct users at each step who performed that step and every step
/// before it. Order between steps is not enforced.
pub fn funnel_steps(steps: &[FunnelStep], events: &[Event]) -> Vec<FunnelStepResult> {
    let mut seen: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for event in events {
        seen.entry(event.user_id.as_str())
            .or_default()
            .insert(event.event_type.as_str());
    }

    let mut results: Vec<FunnelStepResult> = Vec::with_capacity(steps.len());
    let mut first_count = 0;

    for (i, current) in steps.iter().enumerate() {
        let required = &steps[..=i];
        let count = seen
            .values()
            .filter(|types| required.iter().all(|s| types.contains(s.event_type)))
            .count() as i64;

        if i == 0 {
            first_count = count;
        }
        let previous = results.last().map_or(count, |r| r.count);

        results.push(FunnelStepResult {
            label: current.label.to_string(),
            count,
            percentage: percentage_of(count, first_count),
            dropoff: percentage_of(previous - count, previous),
        });
    }

    results
}

/// Step counts for `funnel` over `window`.
pub fn fetch_funnel(
    source: &dyn EventSource,
    funnel: &Funnel,
    window: TimeWindow,
) -> Result<Vec<FunnelStepResult>> {
    let event_types: Vec<&str> = funnel.steps.iter().map(|s| s.event_type).collect();
    let events = source.list_events(
        &EventQuery::new()
            .event_types(&event_types)
            .between(window.since, window.until),
    )?;
    Ok(funnel_steps(funnel.steps, &events))
}
