//! Built-in report sections
//!
//! Each section fetches what it needs from the [`EventSource`] in the
//! [`SectionContext`] and hands it to one aggregator.
//!
//! | Group | Sections |
//! |-------|----------|
//! | `pulse` | `total_users`, `dau`, `wau`, `new_signups_today`, `events_today` |
//! | `engagement` | `session_depth`, `screen_time`, `heatmap`, `power_users`, `search_terms` |
//! | `growth` | `signups_per_day`, `retention`, `stickiness`, `activation`, `signup_to_value`, `resurrection` |
//! | `churn` | `churn_risk` |
//! | `content` | `leaderboard.<type>` per content type, `save_through` |
//! | `funnel` | one per predefined funnel |
//!
//! Use [`create_default_engine`] to get an engine with every section that
//! is not disabled in the configuration.
//!
//! [`EventSource`]: crate::source::EventSource

use super::churn::{self, PulseKind};
use super::content;
use super::engagement::{self, SEARCH_TERM_LIMIT};
use super::engine::{ReportEngine, ReportSection, SectionContext};
use super::funnel::{self, ContentType, Funnel, PREDEFINED_FUNNELS};
use super::retention;
use super::sessionize::{screen_time_by_event_type, session_depth_histogram, sessionize};
use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::source::EventQuery;
use crate::types::{event_types, MetricRow, Signup, ToMetricRows};
use chrono::Duration;

fn window_query(ctx: &SectionContext<'_>) -> EventQuery {
    EventQuery::new().between(ctx.window.since, ctx.window.until)
}

/// Every signup strictly before `now`.
fn signups_before_now(ctx: &SectionContext<'_>) -> Result<Vec<Signup>> {
    Ok(ctx
        .source
        .list_signups(None)?
        .into_iter()
        .filter(|s| s.signup_time < ctx.now)
        .collect())
}

// ============================================
// Engagement
// ============================================

pub struct SessionDepthSection;

impl ReportSection for SessionDepthSection {
    fn name(&self) -> &str {
        "engagement.session_depth"
    }

    fn title(&self) -> &str {
        "Session depth"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        let events = ctx.source.list_events(&window_query(ctx))?;
        let sessions = sessionize(&events, ctx.config.inactivity_threshold())?;
        Ok(session_depth_histogram(&sessions).to_metric_rows())
    }
}

pub struct ScreenTimeSection;

impl ReportSection for ScreenTimeSection {
    fn name(&self) -> &str {
        "engagement.screen_time"
    }

    fn title(&self) -> &str {
        "Screen time (median seconds / views)"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        let events = ctx.source.list_events(&window_query(ctx))?;
        Ok(screen_time_by_event_type(&events, ctx.config.inactivity_threshold())?.to_metric_rows())
    }
}

pub struct HeatmapSection;

impl ReportSection for HeatmapSection {
    fn name(&self) -> &str {
        "engagement.heatmap"
    }

    fn title(&self) -> &str {
        "Content engagement"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        let events = ctx.source.list_events(&window_query(ctx))?;
        Ok(engagement::engagement_heatmap(&events).to_metric_rows())
    }
}

pub struct PowerUsersSection;

impl ReportSection for PowerUsersSection {
    fn name(&self) -> &str {
        "engagement.power_users"
    }

    fn title(&self) -> &str {
        "Power users (sessions / events)"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        let rows = engagement::fetch_power_users(
            ctx.source,
            ctx.window,
            ctx.config.inactivity_threshold(),
            ctx.config.power_user_limit,
        )?;
        Ok(rows.to_metric_rows())
    }
}

pub struct SearchTermsSection;

impl ReportSection for SearchTermsSection {
    fn name(&self) -> &str {
        "engagement.search_terms"
    }

    fn title(&self) -> &str {
        "Search terms"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        let events = ctx
            .source
            .list_events(&window_query(ctx).event_type(event_types::SEARCHED))?;
        Ok(engagement::search_terms(&events, SEARCH_TERM_LIMIT).to_metric_rows())
    }
}

// ============================================
// Growth
// ============================================

pub struct SignupsPerDaySection;

impl ReportSection for SignupsPerDaySection {
    fn name(&self) -> &str {
        "growth.signups_per_day"
    }

    fn title(&self) -> &str {
        "Signups per day"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        let signups = ctx.source.list_signups(Some(ctx.window.since))?;
        Ok(retention::signups_per_day(&signups, ctx.window).to_metric_rows())
    }
}

pub struct RetentionSection;

impl ReportSection for RetentionSection {
    fn name(&self) -> &str {
        "growth.retention"
    }

    fn title(&self) -> &str {
        "Retention cohorts"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        let signups = signups_before_now(ctx)?;
        let events = ctx.source.list_events(&EventQuery::new().until(ctx.now))?;
        let cohorts = retention::retention_cohorts(&signups, &events, ctx.config.cohort_weeks);
        tracing::debug!(
            signups = signups.len(),
            events = events.len(),
            cohorts = cohorts.len(),
            "Built retention cohorts"
        );
        Ok(cohorts.to_metric_rows())
    }
}

pub struct StickinessSection;

impl ReportSection for StickinessSection {
    fn name(&self) -> &str {
        "growth.stickiness"
    }

    fn title(&self) -> &str {
        "Stickiness (DAU / MAU)"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        Ok(churn::stickiness(ctx.source, ctx.now)?.to_metric_rows())
    }
}

pub struct ActivationSection;

impl ReportSection for ActivationSection {
    fn name(&self) -> &str {
        "growth.activation"
    }

    fn title(&self) -> &str {
        "Activation rate"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        let window = Duration::hours(i64::from(ctx.config.activation_window_hours));
        Ok(funnel::fetch_activation_rate(ctx.source, ctx.window, window)?.to_metric_rows())
    }
}

pub struct SignupToValueSection;

impl ReportSection for SignupToValueSection {
    fn name(&self) -> &str {
        "growth.signup_to_value"
    }

    fn title(&self) -> &str {
        "Signup to value (median minutes / sample)"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        let signups = signups_before_now(ctx)?;
        let events = ctx.source.list_events(
            &EventQuery::new()
                .event_types(event_types::VALUE_ACTIONS)
                .until(ctx.now),
        )?;
        Ok(funnel::signup_to_value(&signups, &events)?.to_metric_rows())
    }
}

pub struct ResurrectionSection;

impl ReportSection for ResurrectionSection {
    fn name(&self) -> &str {
        "growth.resurrection"
    }

    fn title(&self) -> &str {
        "Resurrected users (days since last seen)"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        let result = churn::fetch_resurrection(ctx.source, ctx.now, ctx.config.resurrection_examples)?;
        Ok(result.to_metric_rows())
    }
}

// ============================================
// Churn
// ============================================

pub struct ChurnRiskSection;

impl ReportSection for ChurnRiskSection {
    fn name(&self) -> &str {
        "churn.churn_risk"
    }

    fn title(&self) -> &str {
        "Churn risk (events last week)"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        Ok(churn::fetch_churn_risk(ctx.source, ctx.now, ctx.config.churn_limit)?.to_metric_rows())
    }
}

// ============================================
// Content
// ============================================

/// Leaderboard for one content type.
pub struct LeaderboardSection {
    content_type: ContentType,
    name: String,
    title: String,
}

impl LeaderboardSection {
    pub fn new(content_type: ContentType) -> Self {
        Self {
            content_type,
            name: format!("content.leaderboard.{}", content_type.as_str()),
            title: format!("Top {} content", content_type.as_str()),
        }
    }
}

impl ReportSection for LeaderboardSection {
    fn name(&self) -> &str {
        &self.name
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        let rows = funnel::content_leaderboard(
            ctx.source,
            self.content_type,
            ctx.window,
            ctx.config.leaderboard_limit,
        )?;
        Ok(rows.to_metric_rows())
    }
}

pub struct SaveThroughSection;

impl ReportSection for SaveThroughSection {
    fn name(&self) -> &str {
        "content.save_through"
    }

    fn title(&self) -> &str {
        "Save-through rate"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        let rows = funnel::save_through_rate(ctx.source, ctx.window, ctx.config.save_through_limit)?;
        Ok(rows.to_metric_rows())
    }
}

pub struct GeoDemandSection;

impl ReportSection for GeoDemandSection {
    fn name(&self) -> &str {
        "content.geo_demand"
    }

    fn title(&self) -> &str {
        "Geo demand (events / cities)"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        Ok(content::fetch_geo_demand(ctx.source, ctx.window)?.to_metric_rows())
    }
}

pub struct CommunityHealthSection;

impl ReportSection for CommunityHealthSection {
    fn name(&self) -> &str {
        "content.community_health"
    }

    fn title(&self) -> &str {
        "Community health"
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        let health =
            content::fetch_community_health(ctx.source, ctx.window, ctx.config.reporting_days)?;
        Ok(health.to_metric_rows())
    }
}

// ============================================
// Funnels and pulse
// ============================================

/// One predefined step funnel.
pub struct FunnelSection {
    funnel: Funnel,
    name: String,
    title: String,
}

impl FunnelSection {
    pub fn new(funnel: Funnel) -> Self {
        Self {
            funnel,
            name: format!("funnel.{}", funnel.name),
            title: format!("Funnel: {} (users / dropoff %)", funnel.name),
        }
    }
}

impl ReportSection for FunnelSection {
    fn name(&self) -> &str {
        &self.name
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        Ok(funnel::fetch_funnel(ctx.source, &self.funnel, ctx.window)?.to_metric_rows())
    }
}

/// One headline pulse metric.
pub struct PulseSection {
    kind: PulseKind,
    name: String,
}

impl PulseSection {
    pub fn new(kind: PulseKind) -> Self {
        Self {
            kind,
            name: format!("pulse.{}", kind.as_str()),
        }
    }
}

impl ReportSection for PulseSection {
    fn name(&self) -> &str {
        &self.name
    }

    fn title(&self) -> &str {
        match self.kind {
            PulseKind::TotalUsers => "Total users (now / yesterday)",
            PulseKind::DailyActiveUsers => "Daily active users (today / yesterday)",
            PulseKind::WeeklyActiveUsers => "Weekly active users (this / last week)",
            PulseKind::NewSignupsToday => "New signups (today / yesterday)",
            PulseKind::EventsToday => "Events (today / yesterday)",
        }
    }

    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
        Ok(churn::pulse(ctx.source, self.kind, ctx.now)?.to_metric_rows())
    }
}

/// Every built-in section in report order.
pub fn builtin_sections() -> Vec<Box<dyn ReportSection>> {
    let mut sections: Vec<Box<dyn ReportSection>> = Vec::new();

    for kind in PulseKind::ALL {
        sections.push(Box::new(PulseSection::new(kind)));
    }

    sections.push(Box::new(SessionDepthSection));
    sections.push(Box::new(ScreenTimeSection));
    sections.push(Box::new(HeatmapSection));
    sections.push(Box::new(PowerUsersSection));
    sections.push(Box::new(SearchTermsSection));

    sections.push(Box::new(SignupsPerDaySection));
    sections.push(Box::new(RetentionSection));
    sections.push(Box::new(StickinessSection));
    sections.push(Box::new(ActivationSection));
    sections.push(Box::new(SignupToValueSection));
    sections.push(Box::new(ResurrectionSection));

    sections.push(Box::new(ChurnRiskSection));

    for content_type in ContentType::ALL {
        sections.push(Box::new(LeaderboardSection::new(content_type)));
    }
    sections.push(Box::new(SaveThroughSection));
    sections.push(Box::new(GeoDemandSection));
    sections.push(Box::new(CommunityHealthSection));

    for funnel in PREDEFINED_FUNNELS {
        sections.push(Box::new(FunnelSection::new(funnel)));
    }

    sections
}

/// Create an engine with all enabled built-in sections registered.
///
/// ```rust,ignore
/// use eventlens_core::analytics::create_default_engine;
///
/// let engine = create_default_engine(&config.analytics);
/// println!("Registered sections: {:?}", engine.section_names());
/// ```
pub fn create_default_engine(config: &AnalyticsConfig) -> ReportEngine {
    let mut engine = ReportEngine::new();
    engine.set_default_timeout_ms(config.section_timeout_ms);
    engine.set_section_timeouts_ms(config.section_timeouts.clone());
    engine.set_parallel(config.parallel);

    for section in builtin_sections() {
        if config.is_section_disabled(section.name()) {
            tracing::debug!(section = section.name(), "Section disabled by configuration");
            continue;
        }
        engine.register(section);
    }

    tracing::info!(
        sections = engine.section_names().len(),
        parallel = config.parallel,
        "Report engine ready"
    );
    engine
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engine_has_sections() {
        let engine = create_default_engine(&AnalyticsConfig::default());
        let names = engine.section_names();

        for expected in [
            "pulse.dau",
            "engagement.session_depth",
            "engagement.screen_time",
            "growth.retention",
            "growth.stickiness",
            "growth.activation",
            "growth.resurrection",
            "churn.churn_risk",
            "content.leaderboard.place",
            "content.leaderboard.thread",
            "content.save_through",
            "content.geo_demand",
            "content.community_health",
            "funnel.onboarding",
            "funnel.trip",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        assert_eq!(names.len(), 5 + 5 + 6 + 1 + 5 + 3 + 4);
    }

    #[test]
    fn test_section_names_are_unique() {
        let sections = builtin_sections();
        let mut names: Vec<&str> = sections.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), sections.len());
    }

    #[test]
    fn test_disabled_sections_not_registered() {
        let config = AnalyticsConfig {
            disabled_sections: vec!["content".to_string(), "growth.retention".to_string()],
            ..Default::default()
        };
        let engine = create_default_engine(&config);
        assert!(!engine.has_section("growth.retention"));
        assert!(!engine.has_section("content.save_through"));
        assert!(!engine.has_section("content.leaderboard.city"));
        assert!(!engine.has_section("content.geo_demand"));
        assert!(engine.has_section("growth.stickiness"));
    }
}
