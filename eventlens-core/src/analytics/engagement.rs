//! How users engage with content inside the window.

use super::sessionize::Sessionizer;
use super::user_labels;
use crate::error::Result;
use crate::source::{partition_by_user, EventQuery, EventSource};
use crate::types::{event_types, Event, MetricRow, TimeWindow, ToMetricRows};
use chrono::Duration;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Number of search terms reported.
pub const SEARCH_TERM_LIMIT: usize = 30;

// ============================================
// Heatmap
// ============================================

/// Event counts by entity type (rows) and event type (columns).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Heatmap {
    pub entity_types: Vec<String>,
    pub event_types: Vec<String>,
    /// `grid[row][column]`
    pub grid: Vec<Vec<i64>>,
}

impl Heatmap {
    pub fn cell(&self, entity_type: &str, event_type: &str) -> Option<i64> {
        let row = self.entity_types.iter().position(|t| t == entity_type)?;
        let col = self.event_types.iter().position(|t| t == event_type)?;
        Some(self.grid[row][col])
    }
}

impl ToMetricRows for Heatmap {
    /// Non-empty cells only.
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        let mut rows = Vec::new();
        for (entity_type, counts) in self.entity_types.iter().zip(&self.grid) {
            for (event_type, count) in self.event_types.iter().zip(counts) {
                if *count > 0 {
                    rows.push(MetricRow::count(format!("{entity_type}/{event_type}"), *count));
                }
            }
        }
        rows
    }
}

/// Build the heatmap from events; events without an entity type are skipped.
pub fn engagement_heatmap(events: &[Event]) -> Heatmap {
    let mut counts: BTreeMap<&str, BTreeMap<&str, i64>> = BTreeMap::new();
    let mut columns: BTreeSet<&str> = BTreeSet::new();

    for event in events {
        let Some(entity_type) = event.entity_type.as_deref() else {
            continue;
        };
        columns.insert(event.event_type.as_str());
        *counts
            .entry(entity_type)
            .or_default()
            .entry(event.event_type.as_str())
            .or_insert(0) += 1;
    }

    let grid = counts
        .values()
        .map(|row| {
            columns
                .iter()
                .map(|col| row.get(col).copied().unwrap_or(0))
                .collect()
        })
        .collect();

    Heatmap {
        entity_types: counts.keys().map(|s| s.to_string()).collect(),
        event_types: columns.into_iter().map(str::to_string).collect(),
        grid,
    }
}

// ============================================
// Search terms
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchTerm {
    pub term: String,
    pub count: i64,
}

impl ToMetricRows for SearchTerm {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![MetricRow::count(self.term.clone(), self.count)]
    }
}

/// Most frequent `metadata.query` values of search events.
///
/// Queries are trimmed and lowercased; blank queries are ignored. Ties are
/// ordered alphabetically.
pub fn search_terms(events: &[Event], limit: usize) -> Vec<SearchTerm> {
    let mut counts: HashMap<String, i64> = HashMap::new();
    for event in events
        .iter()
        .filter(|e| e.event_type == event_types::SEARCHED)
    {
        let Some(query) = event.metadata_str("query") else {
            continue;
        };
        let term = query.trim().to_lowercase();
        if !term.is_empty() {
            *counts.entry(term).or_insert(0) += 1;
        }
    }

    let mut terms: Vec<SearchTerm> = counts
        .into_iter()
        .map(|(term, count)| SearchTerm { term, count })
        .collect();
    terms.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));
    terms.truncate(limit);
    terms
}

// ============================================
// Power users
// ============================================

/// Thresholds a user must meet to count as a power user.
const MIN_SESSIONS: i64 = 5;
const MIN_SAVES: i64 = 3;
const MIN_COMMUNITY_ACTIONS: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PowerUser {
    pub user_id: String,
    pub name: String,
    pub sessions: i64,
    pub saves: i64,
    pub community_actions: i64,
    pub total_events: i64,
}

impl ToMetricRows for PowerUser {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![MetricRow {
            key: format!("{} ({})", self.name, self.user_id),
            numerator: Some(self.sessions),
            denominator: Some(self.total_events),
            rate: None,
        }]
    }
}

/// Users with many sessions, several saves and some community activity.
///
/// `events` must be ordered by `(user_id, occurred_at)`. Rows are ordered by
/// total events descending, then user id, and capped at `limit`. Names
/// default to "Anonymous"; see [`fetch_power_users`].
pub fn power_users(events: &[Event], threshold: Duration, limit: usize) -> Result<Vec<PowerUser>> {
    let mut rows = Vec::new();

    for (user_id, user_events) in partition_by_user(events) {
        let mut sessions = 0i64;
        for session in Sessionizer::new(user_events.iter(), threshold) {
            session?;
            sessions += 1;
        }
        let saves = user_events
            .iter()
            .filter(|e| e.event_type == event_types::SAVED_PLACE)
            .count() as i64;
        let community_actions = user_events
            .iter()
            .filter(|e| event_types::COMMUNITY_ACTIONS.contains(&e.event_type.as_str()))
            .count() as i64;

        if sessions >= MIN_SESSIONS && saves >= MIN_SAVES && community_actions >= MIN_COMMUNITY_ACTIONS {
            rows.push(PowerUser {
                user_id: user_id.to_string(),
                name: super::ANONYMOUS.to_string(),
                sessions,
                saves,
                community_actions,
                total_events: user_events.len() as i64,
            });
        }
    }

    rows.sort_by(|a, b| {
        b.total_events
            .cmp(&a.total_events)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    rows.truncate(limit);
    Ok(rows)
}

/// Power users over `window` with display names resolved.
pub fn fetch_power_users(
    source: &dyn EventSource,
    window: TimeWindow,
    threshold: Duration,
    limit: usize,
) -> Result<Vec<PowerUser>> {
    let events = source.list_events(&EventQuery::new().between(window.since, window.until))?;
    let mut rows = power_users(&events, threshold, limit)?;

    let ids: Vec<String> = rows.iter().map(|r| r.user_id.clone()).collect();
    let names = user_labels(source, &ids);
    for row in &mut rows {
        if let Some(name) = names.get(&row.user_id) {
            row.name = name.clone();
        }
    }
    Ok(rows)
}
