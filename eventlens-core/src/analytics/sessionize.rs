//! Session reconstruction from the raw event log.
//!
//! Sessions are never recorded; they are inferred from inactivity gaps.
//! A user's events belong to one session until the gap between two
//! consecutive events exceeds the threshold. A gap of exactly the threshold
//! keeps the session open.

use super::stats::{bucketize, median, BucketCount, SESSION_DEPTH_BUCKETS};
use crate::error::{Error, Result};
use crate::types::{Event, MetricRow, Session, ToMetricRows};
use chrono::Duration;
use serde::Serialize;
use std::collections::BTreeMap;

/// Lazy single-pass session builder.
///
/// Input must be ordered by `(user_id, occurred_at)`. A same-user timestamp
/// that goes backwards yields [`Error::OrderingViolation`] and ends the
/// sequence; the iterator never sorts.
pub struct Sessionizer<'a, I>
where
    I: Iterator<Item = &'a Event>,
{
    events: I,
    threshold: Duration,
    current: Option<Session>,
    failed: bool,
}

impl<'a, I> Sessionizer<'a, I>
where
    I: Iterator<Item = &'a Event>,
{
    pub fn new(events: I, threshold: Duration) -> Self {
        Self {
            events,
            threshold,
            current: None,
            failed: false,
        }
    }
}

fn open_session(event: &Event) -> Session {
    Session {
        user_id: event.user_id.clone(),
        event_count: 1,
        started_at: event.occurred_at,
        ended_at: event.occurred_at,
    }
}

impl<'a, I> Iterator for Sessionizer<'a, I>
where
    I: Iterator<Item = &'a Event>,
{
    type Item = Result<Session>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        for event in self.events.by_ref() {
            let Some(session) = self.current.as_mut() else {
                self.current = Some(open_session(event));
                continue;
            };

            if session.user_id != event.user_id {
                return self.current.replace(open_session(event)).map(Ok);
            }

            if event.occurred_at < session.ended_at {
                let err = Error::OrderingViolation {
                    user_id: event.user_id.clone(),
                    previous: session.ended_at,
                    current: event.occurred_at,
                };
                self.failed = true;
                self.current = None;
                return Some(Err(err));
            }

            if event.occurred_at - session.ended_at > self.threshold {
                return self.current.replace(open_session(event)).map(Ok);
            }

            session.event_count += 1;
            session.ended_at = event.occurred_at;
        }

        self.current.take().map(Ok)
    }
}

/// Collect every session from an ordered event slice.
pub fn sessionize(events: &[Event], threshold: Duration) -> Result<Vec<Session>> {
    Sessionizer::new(events.iter(), threshold).collect()
}

/// Sessions bucketed by event count into the fixed depth bands.
pub fn session_depth_histogram(sessions: &[Session]) -> Vec<BucketCount> {
    bucketize(
        sessions.iter().map(|s| s.event_count as u64),
        SESSION_DEPTH_BUCKETS,
    )
}

/// Time spent on one screen (event type).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenTime {
    pub event_type: String,
    /// Rounded to whole seconds
    pub median_seconds: i64,
    /// Number of timed visits behind the median
    pub views: i64,
}

impl ToMetricRows for ScreenTime {
    fn to_metric_rows(&self) -> Vec<MetricRow> {
        vec![MetricRow {
            key: self.event_type.clone(),
            numerator: Some(self.median_seconds),
            denominator: Some(self.views),
            rate: None,
        }]
    }
}

/// Median dwell time per event type.
///
/// Each consecutive same-user pair attributes its gap to the first event's
/// type. Gaps above `threshold` cross a session boundary and gaps of one
/// second or less are noise; both are discarded. Rows are ordered by median
/// descending, then by event type.
pub fn screen_time_by_event_type(events: &[Event], threshold: Duration) -> Result<Vec<ScreenTime>> {
    let noise_floor = Duration::seconds(1);
    let mut samples: BTreeMap<&str, Vec<f64>> = BTreeMap::new();

    for pair in events.windows(2) {
        let (current, next) = (&pair[0], &pair[1]);
        if current.user_id != next.user_id {
            continue;
        }

        let gap = next.occurred_at - current.occurred_at;
        if gap < Duration::zero() {
            return Err(Error::OrderingViolation {
                user_id: next.user_id.clone(),
                previous: current.occurred_at,
                current: next.occurred_at,
            });
        }
        if gap > threshold || gap <= noise_floor {
            continue;
        }

        samples
            .entry(current.event_type.as_str())
            .or_default()
            .push(gap.num_milliseconds() as f64 / 1000.0);
    }

    let mut rows = Vec::with_capacity(samples.len());
    for (event_type, gaps) in samples {
        rows.push(ScreenTime {
            event_type: event_type.to_string(),
            median_seconds: median(&gaps)?.round() as i64,
            views: gaps.len() as i64,
        });
    }

    rows.sort_by(|a, b| {
        b.median_seconds
            .cmp(&a.median_seconds)
            .then_with(|| a.event_type.cmp(&b.event_type))
    });
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap()
    }

    fn at(user: &str, event_type: &str, offset: Duration) -> Event {
        Event::new(user, event_type, t0() + offset)
    }

    fn threshold() -> Duration {
        Duration::minutes(30)
    }

    #[test]
    fn test_gap_over_threshold_splits_session() {
        let events = vec![
            at("u", "a", Duration::minutes(1)),
            at("u", "a", Duration::minutes(3)),
            at("u", "a", Duration::minutes(40)),
            at("u", "a", Duration::minutes(41)),
        ];

        let sessions = sessionize(&events, threshold()).unwrap();
        let counts: Vec<usize> = sessions.iter().map(|s| s.event_count).collect();
        assert_eq!(counts, vec![2, 2]);
        assert_eq!(sessions[0].started_at, t0() + Duration::minutes(1));
        assert_eq!(sessions[0].ended_at, t0() + Duration::minutes(3));
        assert_eq!(sessions[1].duration(), Duration::minutes(1));
    }

    #[test]
    fn test_gap_equal_to_threshold_stays_in_session() {
        let events = vec![
            at("u", "a", Duration::zero()),
            at("u", "a", Duration::minutes(30)),
            at("u", "a", Duration::minutes(60) + Duration::seconds(1)),
        ];
        let sessions = sessionize(&events, threshold()).unwrap();
        let counts: Vec<usize> = sessions.iter().map(|s| s.event_count).collect();
        assert_eq!(counts, vec![2, 1]);
    }

    #[test]
    fn test_user_change_starts_session() {
        let events = vec![
            at("a", "x", Duration::zero()),
            at("a", "x", Duration::minutes(1)),
            at("b", "x", Duration::minutes(1)),
        ];
        let sessions = sessionize(&events, threshold()).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[1].user_id, "b");
        assert_eq!(sessions[1].event_count, 1);
    }

    #[test]
    fn test_event_counts_sum_to_input_length() {
        let offsets = [0, 5, 50, 51, 52, 200, 600, 601, 640, 700];
        let events: Vec<Event> = offsets
            .iter()
            .map(|m| at("u", "x", Duration::minutes(*m)))
            .collect();

        let sessions = sessionize(&events, threshold()).unwrap();
        let total: usize = sessions.iter().map(|s| s.event_count).sum();
        assert_eq!(total, events.len());

        let new_sessions = offsets.windows(2).filter(|w| w[1] - w[0] > 30).count() + 1;
        assert_eq!(sessions.len(), new_sessions);
    }

    #[test]
    fn test_out_of_order_input_fails_fast() {
        let events = vec![
            at("u", "x", Duration::minutes(10)),
            at("u", "x", Duration::minutes(5)),
            at("u", "x", Duration::minutes(20)),
        ];
        let mut sessionizer = Sessionizer::new(events.iter(), threshold());
        assert!(matches!(
            sessionizer.next(),
            Some(Err(Error::OrderingViolation { .. }))
        ));
        assert!(sessionizer.next().is_none());
    }

    #[test]
    fn test_sessionizer_is_lazy() {
        let events = vec![
            at("a", "x", Duration::zero()),
            at("b", "x", Duration::zero()),
            at("b", "x", Duration::minutes(1)),
        ];
        let mut consumed = 0;
        let iter = events.iter().inspect(|_| consumed += 1);
        let first = Sessionizer::new(iter, threshold()).next();
        assert_eq!(first.unwrap().unwrap().user_id, "a");
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert!(sessionize(&[], threshold()).unwrap().is_empty());
    }

    #[test]
    fn test_session_depth_histogram() {
        let mut events = Vec::new();
        for i in 0..7 {
            events.push(at("a", "x", Duration::minutes(i)));
        }
        events.push(at("b", "x", Duration::zero()));

        let sessions = sessionize(&events, threshold()).unwrap();
        let histogram = session_depth_histogram(&sessions);
        let shape: Vec<(&str, i64)> = histogram
            .iter()
            .map(|b| (b.label.as_str(), b.count))
            .collect();
        assert_eq!(
            shape,
            vec![("1-2", 1), ("3-5", 0), ("6-10", 1), ("11-20", 0), ("20+", 0)]
        );
    }

    #[test]
    fn test_screen_time_discards_noise_and_session_breaks() {
        let events = vec![
            at("u", "viewed_place", Duration::zero()),
            at("u", "viewed_city", Duration::seconds(60)),
            at("u", "viewed_place", Duration::seconds(61)),
            at("u", "viewed_city", Duration::seconds(81)),
            at("u", "viewed_place", Duration::minutes(60)),
            at("v", "viewed_city", Duration::seconds(82)),
        ];

        let rows = screen_time_by_event_type(&events, threshold()).unwrap();
        assert_eq!(rows.len(), 1, "viewed_city gaps are noise or a session break");
        assert_eq!(rows[0].event_type, "viewed_place");
        assert_eq!(rows[0].median_seconds, 40);
        assert_eq!(rows[0].views, 2);
    }

    #[test]
    fn test_screen_time_sorted_by_median_desc() {
        let events = vec![
            at("u", "short", Duration::zero()),
            at("u", "long", Duration::seconds(10)),
            at("u", "end", Duration::seconds(310)),
        ];
        let rows = screen_time_by_event_type(&events, threshold()).unwrap();
        let order: Vec<&str> = rows.iter().map(|r| r.event_type.as_str()).collect();
        assert_eq!(order, vec!["long", "short"]);
    }
}
