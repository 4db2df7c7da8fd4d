//! Supply-side content metrics.
//!
//! Geo demand weighs how much attention a country gets against how much
//! city content it has. Community health looks at whether new threads get
//! answered, and how fast.

use super::funnel::fallback_label;
use super::stats::{median, percentage_of, round_to_tenth};
use crate::error::{Error, Result};
use crate::source::{EventQuery, EventSource};
use crate::types::{entity_types, event_types, Event, MetricRow, TimeWindow, ToMetricRows};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

// ============================================
// Geo demand
// ============================================

/// Attention paid to one country relative to its city content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoDemandRow {
    pub country_id: String,
    pub name: String,
    /// Country events plus events on its cities
    pub events: i64,
    /// Cities known to belong to the country
    pub cities: i64,
    /// `events / cities` to one decimal, or plain `events` with no cities
    pub demand_ratio: f64,
}

impl ToMetricRows for GeoDemandRow {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![MetricRow::ratio(
            self.name.clone(),
            self.events,
            self.cities,
            self.demand_ratio,
        )]
    }
}

/// Fold country and city events into per-country demand.
///
/// City events count toward the city's country; cities with no known
/// country are dropped. Highest demand first, then most events, then id.
/// Names are left as the fallback label.
pub fn geo_demand(
    country_events: &[Event],
    city_events: &[Event],
    city_to_country: &HashMap<String, String>,
) -> Vec<GeoDemandRow> {
    let mut cities_per_country: HashMap<&str, i64> = HashMap::new();
    for country in city_to_country.values() {
        *cities_per_country.entry(country.as_str()).or_insert(0) += 1;
    }

    let mut events_per_country: HashMap<&str, i64> = HashMap::new();
    for id in country_events.iter().filter_map(|e| e.entity_id.as_deref()) {
        *events_per_country.entry(id).or_insert(0) += 1;
    }
    for city in city_events.iter().filter_map(|e| e.entity_id.as_deref()) {
        if let Some(country) = city_to_country.get(city) {
            *events_per_country.entry(country.as_str()).or_insert(0) += 1;
        }
    }

    let mut rows: Vec<GeoDemandRow> = events_per_country
        .into_iter()
        .map(|(country_id, events)| {
            let cities = cities_per_country.get(country_id).copied().unwrap_or(0);
            let demand_ratio = if cities > 0 {
                round_to_tenth(events as f64 / cities as f64)
            } else {
                events as f64
            };
            GeoDemandRow {
                country_id: country_id.to_string(),
                name: fallback_label(country_id),
                events,
                cities,
                demand_ratio,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.demand_ratio
            .total_cmp(&a.demand_ratio)
            .then_with(|| b.events.cmp(&a.events))
            .then_with(|| a.country_id.cmp(&b.country_id))
    });
    rows
}

/// Geo demand over `window`, with country names from the source.
pub fn fetch_geo_demand(source: &dyn EventSource, window: TimeWindow) -> Result<Vec<GeoDemandRow>> {
    let country_events = source.list_events(
        &EventQuery::new()
            .entity_type(entity_types::COUNTRY)
            .between(window.since, window.until),
    )?;
    let city_events = source.list_events(
        &EventQuery::new()
            .entity_type(entity_types::CITY)
            .between(window.since, window.until),
    )?;
    let city_to_country = source.entity_parents(entity_types::CITY)?;

    let mut rows = geo_demand(&country_events, &city_events, &city_to_country);
    if rows.is_empty() {
        return Ok(rows);
    }

    let ids: Vec<String> = rows.iter().map(|r| r.country_id.clone()).collect();
    match source.resolve_entity_names(entity_types::COUNTRY, &ids) {
        Ok(names) => {
            for row in &mut rows {
                if let Some(name) = names.get(&row.country_id) {
                    row.name = name.clone();
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "Country name lookup failed; using id labels"),
    }

    tracing::debug!(
        countries = rows.len(),
        mapped_cities = city_to_country.len(),
        "Computed geo demand"
    );
    Ok(rows)
}

// ============================================
// Community health
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityHealth {
    /// Threads created in the window
    pub threads: i64,
    /// Replies in the window, on any thread
    pub replies: i64,
    pub posts_per_day: f64,
    pub avg_replies_per_thread: f64,
    /// New threads without a reply in the window
    pub ghost_threads: i64,
    /// Integer percentage of new threads left unanswered
    pub ghost_thread_rate: i64,
    /// Unknown (not zero) when no new thread was answered
    pub median_first_reply_minutes: Option<i64>,
    pub answered_threads: i64,
}

impl ToMetricRows for CommunityHealth {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![
            MetricRow::count("threads", self.threads),
            MetricRow::count("replies", self.replies),
            MetricRow::value("posts_per_day", self.posts_per_day),
            MetricRow::value("avg_replies_per_thread", self.avg_replies_per_thread),
            MetricRow::ratio(
                "ghost_threads",
                self.ghost_threads,
                self.threads,
                self.ghost_thread_rate as f64,
            ),
            MetricRow {
                key: "median_first_reply_minutes".to_string(),
                numerator: self.median_first_reply_minutes,
                denominator: Some(self.answered_threads),
                rate: None,
            },
        ]
    }
}

/// Thread activity over a window of `days` days.
///
/// `created` are thread creation events and `replies` reply events, both
/// keyed by the thread's entity id. A thread created twice keeps its
/// earliest creation. Replies that predate their thread are ignored when
/// timing the first answer.
pub fn community_health(created: &[Event], replies: &[Event], days: u32) -> Result<CommunityHealth> {
    let mut created_at: HashMap<&str, DateTime<Utc>> = HashMap::new();
    for event in created {
        let Some(thread) = event.entity_id.as_deref() else {
            continue;
        };
        created_at
            .entry(thread)
            .and_modify(|ts| *ts = (*ts).min(event.occurred_at))
            .or_insert(event.occurred_at);
    }

    let mut first_reply: HashMap<&str, DateTime<Utc>> = HashMap::new();
    for event in replies {
        let Some(thread) = event.entity_id.as_deref() else {
            continue;
        };
        first_reply
            .entry(thread)
            .and_modify(|ts| *ts = (*ts).min(event.occurred_at))
            .or_insert(event.occurred_at);
    }

    let threads = created_at.len() as i64;
    let total_replies = replies.len() as i64;
    let ghost_threads = created_at
        .keys()
        .filter(|thread| !first_reply.contains_key(*thread))
        .count() as i64;

    let minutes: Vec<f64> = created_at
        .iter()
        .filter_map(|(thread, opened)| {
            let answered = first_reply.get(thread)?;
            let elapsed = (*answered - *opened).num_seconds() as f64 / 60.0;
            (elapsed >= 0.0).then_some(elapsed)
        })
        .collect();

    let median_first_reply_minutes = match median(&minutes) {
        Ok(value) => Some(value.round() as i64),
        Err(Error::EmptyInput(_)) => None,
        Err(e) => return Err(e),
    };

    let ratio = |n: i64, d: i64| if d > 0 { round_to_tenth(n as f64 / d as f64) } else { 0.0 };

    Ok(CommunityHealth {
        threads,
        replies: total_replies,
        posts_per_day: ratio(threads, i64::from(days)),
        avg_replies_per_thread: ratio(total_replies, threads),
        ghost_threads,
        ghost_thread_rate: percentage_of(ghost_threads, threads),
        median_first_reply_minutes,
        answered_threads: minutes.len() as i64,
    })
}

/// Community health over the trailing `days`-day `window`.
pub fn fetch_community_health(
    source: &dyn EventSource,
    window: TimeWindow,
    days: u32,
) -> Result<CommunityHealth> {
    let thread_events = |event_type: &str| {
        source.list_events(
            &EventQuery::new()
                .event_type(event_type)
                .entity_type(entity_types::THREAD)
                .between(window.since, window.until),
        )
    };
    let created = thread_events(event_types::CREATED_THREAD)?;
    let replies = thread_events(event_types::REPLIED_THREAD)?;

    let health = community_health(&created, &replies, days)?;
    tracing::debug!(
        threads = health.threads,
        replies = health.replies,
        ghost = health.ghost_threads,
        "Computed community health"
    );
    Ok(health)
}
