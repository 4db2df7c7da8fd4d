//! End-to-end report runs against a real SQLite store.

use chrono::{DateTime, Duration, TimeZone, Utc};
use eventlens_core::analytics::funnel::{self, ActivationRate, ConversionRow};
use eventlens_core::analytics::{churn, create_default_engine, ReportEngine, SectionContext, SectionStatus};
use eventlens_core::config::AnalyticsConfig;
use eventlens_core::{
    Database, Error, Event, EventQuery, EventSource, MetricRow, Profile, Result, Signup, TimeWindow,
};
use std::collections::HashMap;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 31, 15, 0, 0).unwrap()
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

fn open_db() -> Database {
    eventlens_core::logging::init_test();
    let db = Database::open_in_memory().expect("open db");
    db.migrate().expect("migrate");
    db
}

fn signup(db: &Database, id: &str, first_name: Option<&str>, created_at: DateTime<Utc>) {
    db.upsert_profile(&Profile {
        id: id.to_string(),
        first_name: first_name.map(str::to_string),
        username: None,
        created_at,
    })
    .expect("upsert profile");
}

fn record(db: &Database, user: &str, event_type: &str, occurred_at: DateTime<Utc>) {
    db.insert_event(&Event::new(user, event_type, occurred_at))
        .expect("insert event");
}

fn rows<'a>(report: &'a eventlens_core::analytics::Report, name: &str) -> &'a [MetricRow] {
    let section = report
        .section(name)
        .unwrap_or_else(|| panic!("missing section {name}"));
    assert_eq!(section.status, SectionStatus::Ready, "{name}: {:?}", section.error_message);
    &section.rows
}

fn row<'a>(rows: &'a [MetricRow], key: &str) -> &'a MetricRow {
    rows.iter()
        .find(|r| r.key == key)
        .unwrap_or_else(|| panic!("missing row {key} in {rows:?}"))
}

fn run(db: &Database, prefix: Option<&str>) -> eventlens_core::analytics::Report {
    let config = AnalyticsConfig::default();
    let engine = create_default_engine(&config);
    let ctx = SectionContext::new(db, &config, now());
    engine.run_matching(&ctx, prefix)
}

#[test]
fn stickiness_is_dau_over_mau() {
    let db = open_db();
    for i in 0..10 {
        record(&db, &format!("u{i}"), "viewed_city", now() - Duration::days(5));
    }
    for i in 0..3 {
        record(&db, &format!("u{i}"), "viewed_city", now() - Duration::hours(1));
    }

    let report = run(&db, Some("growth.stickiness"));
    let rows = rows(&report, "growth.stickiness");

    assert_eq!(rows[0], MetricRow::ratio("dau_mau", 3, 10, 30.0));
    assert_eq!(row(rows, "dau").denominator, Some(3));
    assert_eq!(row(rows, "mau").denominator, Some(10));
}

#[test]
fn churn_risk_lists_users_silent_this_week() {
    let db = open_db();
    signup(&db, "quiet", Some("Quinn"), now() - Duration::days(40));
    for days in 8..=14 {
        record(&db, "quiet", "viewed_place", now() - Duration::days(days));
    }
    record(&db, "steady", "viewed_place", now() - Duration::days(10));
    record(&db, "steady", "saved_place", now() - Duration::days(1));
    record(&db, "nameless", "opened_thread", now() - Duration::days(9));

    let report = run(&db, Some("churn"));
    let rows = rows(&report, "churn.churn_risk");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].key, "Quinn (quiet, last: viewed_place)");
    assert_eq!(rows[0].denominator, Some(7));
    assert_eq!(rows[1].key, "Anonymous (nameless, last: opened_thread)");
    assert!(rows.iter().all(|r| !r.key.contains("steady")));
}

#[test]
fn resurrection_counts_users_back_after_two_weeks() {
    let db = open_db();
    record(&db, "back", "viewed_city", now() - Duration::days(30));
    record(&db, "back", "viewed_city", now() - Duration::days(1));
    record(&db, "regular", "viewed_city", now() - Duration::days(9));
    record(&db, "regular", "viewed_city", now() - Duration::days(2));
    record(&db, "new", "viewed_city", now() - Duration::days(3));

    let report = run(&db, Some("growth.resurrection"));
    let rows = rows(&report, "growth.resurrection");

    assert_eq!(row(rows, "resurrected").denominator, Some(1));
    assert_eq!(row(rows, "back").denominator, Some(23));
    assert_eq!(rows.len(), 2);
}

#[test]
fn pulse_compares_today_with_previous_period() {
    let db = open_db();
    signup(&db, "a", None, now() - Duration::days(3));
    signup(&db, "b", None, at(2025, 7, 30, 10, 0));
    signup(&db, "c", None, at(2025, 7, 31, 9, 0));

    record(&db, "a", "viewed_city", at(2025, 7, 31, 10, 0));
    record(&db, "c", "viewed_city", at(2025, 7, 31, 11, 0));
    record(&db, "c", "viewed_place", at(2025, 7, 31, 12, 0));
    record(&db, "b", "viewed_city", at(2025, 7, 30, 20, 0));

    let report = run(&db, Some("pulse"));
    assert_eq!(report.sections.len(), 5);

    let pair = |name: &str| {
        let r = &rows(&report, name)[0];
        (r.numerator, r.denominator)
    };
    assert_eq!(pair("pulse.total_users"), (Some(3), Some(2)));
    assert_eq!(pair("pulse.dau"), (Some(2), Some(1)));
    assert_eq!(pair("pulse.wau"), (Some(3), Some(0)));
    assert_eq!(pair("pulse.new_signups_today"), (Some(1), Some(1)));
    assert_eq!(pair("pulse.events_today"), (Some(3), Some(1)));
}

#[test]
fn retention_cohort_from_stored_signups() {
    let db = open_db();
    let monday = at(2025, 7, 7, 9, 0);
    for i in 0..10 {
        let id = format!("u{i}");
        signup(&db, &id, None, monday);
        if i < 4 {
            record(&db, &id, "viewed_city", monday + Duration::days(7));
        }
    }

    let report = run(&db, Some("growth.retention"));
    let rows = rows(&report, "growth.retention");

    assert_eq!(row(rows, "Week of Jul 7 users").denominator, Some(10));
    assert_eq!(row(rows, "Week of Jul 7 day7"), &MetricRow::ratio("Week of Jul 7 day7", 4, 10, 40.0));
    assert_eq!(row(rows, "Week of Jul 7 day14").numerator, Some(0));
}

#[test]
fn session_depth_splits_on_inactivity() {
    let db = open_db();
    let start = now() - Duration::hours(3);
    for minutes in [0, 1, 60, 61] {
        record(&db, "u", "viewed_place", start + Duration::minutes(minutes));
    }

    let report = run(&db, Some("engagement.session_depth"));
    let rows = rows(&report, "engagement.session_depth");

    assert_eq!(row(rows, "1-2").denominator, Some(2));
    assert_eq!(row(rows, "3-5").denominator, Some(0));
}

fn populated_db() -> Database {
    let db = open_db();
    signup(&db, "a", Some("Ana"), now() - Duration::days(45));
    signup(&db, "b", None, now() - Duration::days(2));
    db.upsert_entity("place", "p1", "Time Out Market").expect("entity");

    let events = vec![
        Event::new("a", "viewed_place", now() - Duration::days(40)).with_entity("place", "p1"),
        Event::new("a", "saved_place", now() - Duration::days(40)).with_entity("place", "p1"),
        Event::new("a", "viewed_place", now() - Duration::hours(5)).with_entity("place", "p1"),
        Event::new("b", "viewed_country", now() - Duration::days(2)),
        Event::new("b", "viewed_city", now() - Duration::days(2) + Duration::minutes(2)),
        Event::new("b", "viewed_place", now() - Duration::days(2) + Duration::minutes(4))
            .with_entity("place", "p1"),
        Event::new("b", "saved_place", now() - Duration::days(2) + Duration::minutes(5))
            .with_entity("place", "p1"),
        Event::new("b", "searched", now() - Duration::days(1))
            .with_metadata(serde_json::json!({ "query": "Lisbon" })),
    ];
    db.insert_events(&events).expect("insert events");
    db
}

fn outcome(report: &eventlens_core::analytics::Report) -> Vec<(String, SectionStatus, Vec<MetricRow>)> {
    report
        .sections
        .iter()
        .map(|s| (s.name.clone(), s.status, s.rows.clone()))
        .collect()
}

#[test]
fn rerunning_over_unchanged_data_is_identical() {
    let db = populated_db();

    let first = run(&db, None);
    let second = run(&db, None);

    assert_eq!(first.generated_at, second.generated_at);
    assert_eq!(first.window, second.window);
    assert_eq!(outcome(&first), outcome(&second));
    assert_eq!(first.gaps().count(), 0, "{:?}", first.gaps().collect::<Vec<_>>());
}

#[test]
fn parallel_run_matches_sequential_run() {
    let db = populated_db();

    let mut config = AnalyticsConfig::default();
    let sequential = {
        let engine = create_default_engine(&config);
        engine.run_all(&SectionContext::new(&db, &config, now()))
    };
    config.parallel = true;
    let parallel = {
        let engine = create_default_engine(&config);
        engine.run_all(&SectionContext::new(&db, &config, now()))
    };

    assert_eq!(outcome(&sequential), outcome(&parallel));
}

#[test]
fn onboarding_funnel_through_the_store() {
    let db = populated_db();

    let report = run(&db, Some("funnel.onboarding"));
    let rows = rows(&report, "funnel.onboarding");

    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0].numerator, Some(1));
    assert_eq!(rows[3].numerator, Some(1));
    assert_eq!(rows[4].numerator, Some(0));
}

#[test]
fn leaderboard_uses_entity_names() {
    let db = populated_db();

    let report = run(&db, Some("content.leaderboard.place"));
    let rows = rows(&report, "content.leaderboard.place");

    assert_eq!(rows, &[MetricRow::ratio("Time Out Market", 1, 2, 50.0)]);
}

#[test]
fn events_after_now_are_ignored() {
    let db = open_db();
    signup(&db, "quiet", Some("Quinn"), now() - Duration::days(40));
    for days in 8..=14 {
        record(&db, "quiet", "viewed_place", now() - Duration::days(days));
    }
    record(&db, "today", "viewed_city", now() - Duration::hours(1));

    let before = run(&db, None);

    signup(&db, "future", None, now() + Duration::hours(1));
    record(&db, "quiet", "viewed_place", now() + Duration::days(2));
    record(&db, "future", "viewed_city", now() + Duration::hours(3));
    record(&db, "future", "saved_place", now() + Duration::hours(4));

    let churned = churn::fetch_churn_risk(&db, now(), 20).expect("churn risk");
    let ids: Vec<&str> = churned.iter().map(|r| r.user_id.as_str()).collect();
    assert_eq!(ids, vec!["quiet"]);

    let stickiness = churn::stickiness(&db, now()).expect("stickiness");
    assert_eq!(stickiness, churn::Stickiness { dau: 1, mau: 2, ratio: 50 });

    let after = run(&db, None);
    assert_eq!(outcome(&before), outcome(&after));
}

#[test]
fn activation_window_end_is_inclusive() {
    let db = open_db();
    let window = Duration::hours(24);
    let edge = now() - Duration::days(4);
    let late = now() - Duration::days(5);
    signup(&db, "edge", None, edge);
    signup(&db, "late", None, late);
    signup(&db, "before_window", None, now() - Duration::days(40));

    record(&db, "edge", "saved_place", edge + window);
    record(&db, "late", "saved_place", late + window + Duration::seconds(1));
    record(&db, "before_window", "saved_place", now() - Duration::days(40) + Duration::hours(1));

    let result = funnel::fetch_activation_rate(&db, TimeWindow::trailing_days(now(), 30), window)
        .expect("activation rate");
    assert_eq!(result, ActivationRate { activated: 1, total: 2, rate: 50 });
}

#[test]
fn activation_ignores_actions_after_now() {
    let db = open_db();
    signup(&db, "fresh", None, now() - Duration::hours(2));
    record(&db, "fresh", "opened_thread", now() + Duration::hours(1));

    let report = run(&db, Some("growth.activation"));
    let rows = rows(&report, "growth.activation");
    assert_eq!(rows, &[MetricRow::ratio("activation", 0, 1, 0.0)]);
}

#[test]
fn save_through_rate_through_the_store() {
    let db = open_db();
    db.upsert_entity("place", "p1", "Time Out Market").expect("entity");

    let place = |user: &str, event_type: &str, id: &str, at: DateTime<Utc>| {
        db.insert_event(&Event::new(user, event_type, at).with_entity("place", id))
            .expect("insert event");
    };
    for user in ["a", "b", "c", "d"] {
        place(user, "viewed_place", "p1", now() - Duration::days(3));
    }
    place("a", "saved_place", "p1", now() - Duration::days(3) + Duration::minutes(1));
    place("e", "viewed_place", "p2", now() - Duration::days(2));
    place("f", "viewed_place", "p2", now() - Duration::days(2));
    place("e", "saved_place", "p2", now() - Duration::days(2));
    place("f", "saved_place", "p2", now() - Duration::days(1));
    place("g", "viewed_place", "p2", now() - Duration::days(45));
    place("h", "saved_place", "p1", now() + Duration::hours(1));

    let window = TimeWindow::trailing_days(now(), 30);
    let rows = funnel::save_through_rate(&db, window, 20).expect("save-through");
    assert_eq!(
        rows,
        vec![
            ConversionRow {
                id: "p1".to_string(),
                name: "Time Out Market".to_string(),
                views: 4,
                conversions: 1,
                rate: 25,
            },
            ConversionRow {
                id: "p2".to_string(),
                name: "p2".to_string(),
                views: 2,
                conversions: 2,
                rate: 100,
            },
        ]
    );

    let top = funnel::save_through_rate(&db, window, 1).expect("save-through");
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].id, "p1");
}

#[test]
fn geo_demand_counts_city_events_toward_their_country() {
    let db = open_db();
    db.upsert_entity("country", "pt", "Portugal").expect("entity");
    db.upsert_entity_with_parent("city", "lis", "Lisbon", Some("pt")).expect("entity");
    db.upsert_entity_with_parent("city", "opo", "Porto", Some("pt")).expect("entity");
    db.upsert_entity_with_parent("city", "kyo", "Kyoto", Some("jp")).expect("entity");
    db.upsert_entity("city", "atl", "Atlantis").expect("entity");

    let events = vec![
        Event::new("a", "viewed_country", now() - Duration::days(1)).with_entity("country", "pt"),
        Event::new("a", "viewed_city", now() - Duration::days(1)).with_entity("city", "lis"),
        Event::new("b", "viewed_city", now() - Duration::days(2)).with_entity("city", "lis"),
        Event::new("c", "viewed_city", now() - Duration::days(3)).with_entity("city", "lis"),
        Event::new("c", "viewed_city", now() - Duration::days(3)).with_entity("city", "kyo"),
        Event::new("d", "viewed_city", now() - Duration::days(3)).with_entity("city", "atl"),
        Event::new("e", "viewed_city", now() - Duration::days(60)).with_entity("city", "opo"),
    ];
    db.insert_events(&events).expect("insert events");

    let report = run(&db, Some("content.geo_demand"));
    let rows = rows(&report, "content.geo_demand");

    assert_eq!(
        rows,
        &[
            MetricRow::ratio("Portugal", 4, 2, 2.0),
            MetricRow::ratio("jp", 1, 1, 1.0),
        ]
    );
}

#[test]
fn community_health_through_the_store() {
    let db = open_db();
    let thread = |user: &str, event_type: &str, id: &str, at: DateTime<Utc>| {
        db.insert_event(&Event::new(user, event_type, at).with_entity("thread", id))
            .expect("insert event");
    };
    let opened = now() - Duration::days(2);
    thread("a", "created_thread", "t1", opened);
    thread("b", "replied_thread", "t1", opened + Duration::minutes(30));
    thread("c", "replied_thread", "t1", opened + Duration::hours(2));
    thread("a", "created_thread", "t2", now() - Duration::days(1));

    let report = run(&db, Some("content.community_health"));
    let rows = rows(&report, "content.community_health");

    assert_eq!(row(rows, "threads").denominator, Some(2));
    assert_eq!(row(rows, "replies").denominator, Some(2));
    assert_eq!(row(rows, "posts_per_day").rate, Some(0.1));
    assert_eq!(row(rows, "ghost_threads"), &MetricRow::ratio("ghost_threads", 1, 2, 50.0));
    let first_reply = row(rows, "median_first_reply_minutes");
    assert_eq!((first_reply.numerator, first_reply.denominator), (Some(30), Some(1)));
}

/// A source whose backing store is gone.
struct OfflineSource;

fn offline<T>() -> Result<T> {
    Err(Error::UpstreamUnavailable("warehouse offline".to_string()))
}

impl EventSource for OfflineSource {
    fn list_events(&self, _query: &EventQuery) -> Result<Vec<Event>> {
        offline()
    }

    fn list_signups(&self, _since: Option<DateTime<Utc>>) -> Result<Vec<Signup>> {
        offline()
    }

    fn resolve_entity_names(&self, _entity_type: &str, _ids: &[String]) -> Result<HashMap<String, String>> {
        offline()
    }

    fn entity_parents(&self, _entity_type: &str) -> Result<HashMap<String, String>> {
        offline()
    }

    fn resolve_user_names(&self, _ids: &[String]) -> Result<HashMap<String, String>> {
        offline()
    }
}

#[test]
fn unreachable_source_marks_every_section_unavailable() {
    let config = AnalyticsConfig::default();
    let engine = create_default_engine(&config);
    let ctx = SectionContext::new(&OfflineSource, &config, now());

    let report = engine.run_all(&ctx);

    assert_eq!(report.sections.len(), engine.section_names().len());
    for section in &report.sections {
        assert_eq!(section.status, SectionStatus::Unavailable, "{}", section.name);
        assert!(section.rows.is_empty());
        assert!(section
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("warehouse offline")));
    }
}

#[test]
fn custom_sections_share_the_engine() {
    use eventlens_core::analytics::ReportSection;

    struct EventTotal;

    impl ReportSection for EventTotal {
        fn name(&self) -> &str {
            "custom.event_total"
        }

        fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
            let total = ctx.source.count_matching(&EventQuery::new())?;
            Ok(vec![MetricRow::count("events", total)])
        }
    }

    let db = populated_db();
    let config = AnalyticsConfig::default();
    let mut engine = ReportEngine::new();
    engine.register(Box::new(EventTotal));

    let result = engine
        .run_section("custom.event_total", &SectionContext::new(&db, &config, now()))
        .expect("section registered");

    assert_eq!(result.title, "custom.event_total");
    assert_eq!(result.rows, vec![MetricRow::count("events", 8)]);
}
