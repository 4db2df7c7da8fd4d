//! Core domain types for eventlens
//!
//! The engine reads one kind of record, the interaction [`Event`], plus the
//! [`Signup`] time of every user. Everything else here is derived and lives
//! only as long as the report call that produced it.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | One user interaction, append-only, never mutated |
//! | **Entity** | The thing an event is about (a place, a city, a thread) |
//! | **Session** | A run of one user's events with no gap above the inactivity threshold |
//! | **Cohort** | Users who signed up in the same Monday-anchored week |
//! | **MetricRow** | The flat output shape every aggregator reduces to |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Well-known event type names emitted by the app.
pub mod event_types {
    pub const VIEWED_COUNTRY: &str = "viewed_country";
    pub const VIEWED_CITY: &str = "viewed_city";
    pub const VIEWED_PLACE: &str = "viewed_place";
    pub const VIEWED_COLLECTION: &str = "viewed_collection";
    pub const VIEWED_THREAD: &str = "viewed_thread";
    pub const SAVED_PLACE: &str = "saved_place";
    pub const CREATED_THREAD: &str = "created_thread";
    pub const OPENED_THREAD: &str = "opened_thread";
    pub const REPLIED_THREAD: &str = "replied_thread";
    pub const CREATED_TRIP: &str = "created_trip";
    pub const ADDED_PLACE_TO_TRIP: &str = "added_place_to_trip";
    pub const SEARCHED: &str = "searched";

    /// Events that count as taking part in the community.
    pub const COMMUNITY_ACTIONS: &[&str] = &[OPENED_THREAD, REPLIED_THREAD];

    /// Events that mark a user getting real value out of the app.
    pub const VALUE_ACTIONS: &[&str] = &[SAVED_PLACE, CREATED_TRIP, REPLIED_THREAD];
}

/// Well-known entity type names.
pub mod entity_types {
    pub const COUNTRY: &str = "country";
    pub const CITY: &str = "city";
    pub const PLACE: &str = "place";
    pub const COLLECTION: &str = "collection";
    pub const THREAD: &str = "thread";
}

// ============================================
// Raw records
// ============================================

/// A single user interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned id; breaks timestamp ties consistently
    #[serde(default)]
    pub id: i64,
    pub user_id: String,
    pub event_type: String,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Free-form key-value payload (e.g. `{"query": "lisbon"}`)
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    /// Create an event without entity or metadata.
    pub fn new(user_id: &str, event_type: &str, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            user_id: user_id.to_string(),
            event_type: event_type.to_string(),
            entity_type: None,
            entity_id: None,
            metadata: None,
            occurred_at,
        }
    }

    /// Attach the entity this event is about.
    pub fn with_entity(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.to_string());
        self
    }

    /// Attach a metadata payload.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Look up a string value in the metadata payload.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

/// When a user created their account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signup {
    pub user_id: String,
    pub signup_time: DateTime<Utc>,
}

impl Signup {
    pub fn new(user_id: &str, signup_time: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            signup_time,
        }
    }
}

/// A user profile as stored: the signup time plus the display-name fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// First name, else username; blank values count as missing.
    pub fn display_name(&self) -> Option<&str> {
        [self.first_name.as_deref(), self.username.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|name| !name.is_empty())
    }
}

// ============================================
// Derived records
// ============================================

/// A contiguous run of one user's events.
///
/// Produced by the [`Sessionizer`](crate::analytics::Sessionizer); never
/// persisted and never mutated after it is yielded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user_id: String,
    /// Always at least 1
    pub event_count: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Session {
    /// Time between the first and last event of the session.
    pub fn duration(&self) -> Duration {
        self.ended_at - self.started_at
    }
}

/// Universal output shape: a name plus whichever of numerator,
/// denominator-or-count and rate the aggregator fills in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numerator: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denominator: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
}

impl MetricRow {
    /// A row carrying only a count (stored in the denominator-or-count slot).
    pub fn count(key: impl Into<String>, count: i64) -> Self {
        Self {
            key: key.into(),
            numerator: None,
            denominator: Some(count),
            rate: None,
        }
    }

    /// A numerator / denominator pair with its derived rate.
    pub fn ratio(key: impl Into<String>, numerator: i64, denominator: i64, rate: f64) -> Self {
        Self {
            key: key.into(),
            numerator: Some(numerator),
            denominator: Some(denominator),
            rate: Some(rate),
        }
    }

    /// A bare value (median, percentage) with no counts behind it.
    pub fn value(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            numerator: None,
            denominator: None,
            rate: Some(value),
        }
    }
}

/// Flatten an aggregator result into [`MetricRow`]s.
pub trait ToMetricRows {
    fn to_metric_rows(&self) -> Vec<MetricRow>;
}

impl<T: ToMetricRows> ToMetricRows for [T] {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        self.iter().flat_map(ToMetricRows::to_metric_rows).collect()
    }
}

impl<T: ToMetricRows> ToMetricRows for Vec<T> {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        self.as_slice().to_metric_rows()
    }
}

// ============================================
// Time windows
// ============================================

/// Half-open time range `[since, until)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { since, until }
    }

    /// The `days` days leading up to `now`.
    pub fn trailing_days(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            since: now - Duration::days(i64::from(days)),
            until: now,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.since && ts < self.until
    }
}

/// Midnight UTC of the day containing `ts`.
pub fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_builders() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap();
        let event = Event::new("u1", event_types::SEARCHED, ts)
            .with_entity(entity_types::CITY, "lisbon")
            .with_metadata(serde_json::json!({"query": "Cafes"}));

        assert_eq!(event.entity_type.as_deref(), Some("city"));
        assert_eq!(event.entity_id.as_deref(), Some("lisbon"));
        assert_eq!(event.metadata_str("query"), Some("Cafes"));
        assert_eq!(event.metadata_str("missing"), None);
    }

    #[test]
    fn test_event_deserializes_without_optional_fields() {
        let json = r#"{"user_id":"u1","event_type":"viewed_place","occurred_at":"2025-03-04T10:00:00Z"}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.id, 0);
        assert!(event.entity_id.is_none());
        assert!(event.metadata.is_none());
    }

    #[test]
    fn test_profile_display_name() {
        let mut profile = Profile {
            id: "u1".to_string(),
            first_name: Some("  ".to_string()),
            username: Some("wanderer".to_string()),
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        };
        assert_eq!(profile.display_name(), Some("wanderer"));
        profile.first_name = Some("Ana".to_string());
        assert_eq!(profile.display_name(), Some("Ana"));
        profile.first_name = None;
        profile.username = None;
        assert_eq!(profile.display_name(), None);
    }

    #[test]
    fn test_time_window_is_half_open() {
        let now = Utc.with_ymd_and_hms(2025, 3, 31, 12, 0, 0).unwrap();
        let window = TimeWindow::trailing_days(now, 7);
        assert!(window.contains(window.since));
        assert!(!window.contains(now));
        assert!(window.contains(now - Duration::seconds(1)));
    }

    #[test]
    fn test_start_of_day() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 17, 45, 12).unwrap();
        assert_eq!(
            start_of_day(ts),
            Utc.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_metric_row_serialization_skips_empty_fields() {
        let row = MetricRow::count("3-5", 12);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json, serde_json::json!({"key": "3-5", "denominator": 12}));
    }
}
