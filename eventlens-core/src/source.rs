//! The read-only event feed the analytics engine runs against.
//!
//! [`EventSource`] is the only seam between the engine and storage. The
//! shipped implementation is [`Database`](crate::db::Database); tests and
//! embedders can provide their own (an in-memory slice, a remote warehouse).
//!
//! Implementations must be safe to read from several threads at once: the
//! report engine may run sections concurrently against one source.

use crate::error::Result;
use crate::types::{Event, Signup};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// Filter for [`EventSource::list_events`].
///
/// Every field narrows the result; `Default` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Any of these event types (empty = any type)
    pub event_types: Vec<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub until: Option<DateTime<Utc>>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: &str) -> Self {
        self.event_types = vec![event_type.to_string()];
        self
    }

    pub fn event_types<S: AsRef<str>>(mut self, event_types: &[S]) -> Self {
        self.event_types = event_types.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn entity_type(mut self, entity_type: &str) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self
    }

    pub fn entity_id(mut self, entity_id: &str) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Restrict to `[since, until)`.
    pub fn between(self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since(since).until(until)
    }

    /// Whether an event passes this filter. Used by in-memory sources.
    pub fn matches(&self, event: &Event) -> bool {
        (self.event_types.is_empty() || self.event_types.iter().any(|t| *t == event.event_type))
            && self
                .entity_type
                .as_ref()
                .map_or(true, |t| event.entity_type.as_ref() == Some(t))
            && self
                .entity_id
                .as_ref()
                .map_or(true, |id| event.entity_id.as_ref() == Some(id))
            && self.user_id.as_ref().map_or(true, |u| *u == event.user_id)
            && self.since.map_or(true, |s| event.occurred_at >= s)
            && self.until.map_or(true, |u| event.occurred_at < u)
    }
}

/// Append-only store of interaction events and signups.
pub trait EventSource: Send + Sync {
    /// Events matching `query`, ordered by `(user_id, occurred_at, id)`.
    fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>>;

    /// Signups at or after `since` (all when `None`), ordered by signup time.
    fn list_signups(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Signup>>;

    /// Display names for entities of one type.
    ///
    /// Best effort: ids with no known name are simply absent from the map.
    fn resolve_entity_names(
        &self,
        entity_type: &str,
        ids: &[String],
    ) -> Result<HashMap<String, String>>;

    /// Parent id of every entity of `entity_type` that has one (city to
    /// country). Entities without a parent are absent from the map.
    fn entity_parents(&self, entity_type: &str) -> Result<HashMap<String, String>>;

    /// Display names for users. Same contract as [`Self::resolve_entity_names`].
    fn resolve_user_names(&self, ids: &[String]) -> Result<HashMap<String, String>>;

    /// Distinct users with at least one event matching `query`.
    fn distinct_users(&self, query: &EventQuery) -> Result<BTreeSet<String>> {
        Ok(self
            .list_events(query)?
            .into_iter()
            .map(|e| e.user_id)
            .collect())
    }

    /// Number of events matching `query`.
    fn count_matching(&self, query: &EventQuery) -> Result<i64> {
        Ok(self.list_events(query)?.len() as i64)
    }

    /// Most recent event time strictly before `before` for each of `user_ids`.
    ///
    /// Users with no such event are absent from the map.
    fn latest_event_before(
        &self,
        user_ids: &BTreeSet<String>,
        before: DateTime<Utc>,
    ) -> Result<HashMap<String, DateTime<Utc>>> {
        let events = self.list_events(&EventQuery::new().until(before))?;
        let mut latest: HashMap<String, DateTime<Utc>> = HashMap::new();
        for event in events {
            if !user_ids.contains(&event.user_id) {
                continue;
            }
            let entry = latest.entry(event.user_id).or_insert(event.occurred_at);
            if event.occurred_at > *entry {
                *entry = event.occurred_at;
            }
        }
        Ok(latest)
    }
}

/// Group an ordered event list into per-user slices.
///
/// Relies on the `(user_id, ...)` ordering every [`EventSource`] guarantees.
pub fn partition_by_user(events: &[Event]) -> Vec<(&str, &[Event])> {
    let mut groups = Vec::new();
    let mut start = 0;
    for i in 1..=events.len() {
        if i == events.len() || events[i].user_id != events[start].user_id {
            groups.push((events[start].user_id.as_str(), &events[start..i]));
            start = i;
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_query_matches_all_filters() {
        let event = Event::new("u1", "viewed_place", ts(10)).with_entity("place", "p1");

        assert!(EventQuery::new().matches(&event));
        assert!(EventQuery::new()
            .event_types(&["saved_place", "viewed_place"])
            .entity_type("place")
            .entity_id("p1")
            .user("u1")
            .between(ts(10), ts(11))
            .matches(&event));
        assert!(!EventQuery::new().event_type("saved_place").matches(&event));
        assert!(!EventQuery::new().entity_type("city").matches(&event));
        assert!(!EventQuery::new().user("u2").matches(&event));
        assert!(!EventQuery::new().until(ts(10)).matches(&event));
        assert!(!EventQuery::new().since(ts(11)).matches(&event));
    }

    #[test]
    fn test_partition_by_user() {
        let events = vec![
            Event::new("a", "x", ts(1)),
            Event::new("a", "x", ts(2)),
            Event::new("b", "x", ts(1)),
            Event::new("c", "x", ts(3)),
        ];
        let groups = partition_by_user(&events);
        let shape: Vec<(&str, usize)> = groups.iter().map(|(u, s)| (*u, s.len())).collect();
        assert_eq!(shape, vec![("a", 2), ("b", 1), ("c", 1)]);
        assert!(partition_by_user(&[]).is_empty());
    }
}
