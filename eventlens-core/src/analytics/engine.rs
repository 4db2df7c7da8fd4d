//! Report section framework
//!
//! A report is a list of independent sections. Each section reads from the
//! [`EventSource`] and reduces to [`MetricRow`]s; the engine runs them and
//! shapes the outcome into a [`Report`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       REPORT ENGINE                             │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐             │
//! │  │ Section A   │  │ Section B   │  │ Section C   │  ...        │
//! │  │ (retention) │  │ (funnel.*)  │  │ (custom)    │             │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘             │
//! │         │                │                │                     │
//! │         ▼                ▼                ▼                     │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              ReportEngine.run_section()                 │   │
//! │  │  - Calls section.compute() against the EventSource      │   │
//! │  │  - Maps fetch failures to Unavailable                   │   │
//! │  │  - Drops rows that arrive after the timeout             │   │
//! │  │  - Records a SectionRunResult                           │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One failing section never stops the others: the report then shows a gap
//! for that section with its status and error message.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use eventlens_core::analytics::{create_default_engine, SectionContext};
//!
//! let engine = create_default_engine(&config.analytics);
//! let ctx = SectionContext::new(&db, &config.analytics, Utc::now());
//! let report = engine.run_all(&ctx);
//!
//! for section in &report.sections {
//!     println!("{}: {:?}", section.name, section.status);
//! }
//! ```

use crate::config::{section_matches, AnalyticsConfig};
use crate::error::{Error, Result};
use crate::source::EventSource;
use crate::types::{MetricRow, TimeWindow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

const DEFAULT_SECTION_TIMEOUT_MS: u64 = 30_000;

// ============================================
// Section context and results
// ============================================

/// Everything a section may read while computing.
///
/// `now` is fixed for the whole report so every section sees the same
/// instant and re-running over unchanged data gives identical output.
pub struct SectionContext<'a> {
    pub source: &'a dyn EventSource,
    pub config: &'a AnalyticsConfig,
    pub now: DateTime<Utc>,
    /// Trailing reporting window ending at `now`
    pub window: TimeWindow,
}

impl<'a> SectionContext<'a> {
    pub fn new(source: &'a dyn EventSource, config: &'a AnalyticsConfig, now: DateTime<Utc>) -> Self {
        Self {
            source,
            config,
            now,
            window: TimeWindow::trailing_days(now, config.reporting_days),
        }
    }
}

/// Outcome of one section run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    /// Rows computed
    Ready,
    /// The event source could not be read; "could not fetch", not "no data"
    Unavailable,
    /// The section failed for another reason
    Error,
    /// Rows arrived after the configured timeout and were dropped
    Timeout,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionStatus::Ready => "ready",
            SectionStatus::Unavailable => "unavailable",
            SectionStatus::Error => "error",
            SectionStatus::Timeout => "timeout",
        }
    }
}

/// Result of running one section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionRunResult {
    pub name: String,
    pub title: String,
    pub status: SectionStatus,
    /// Empty unless `status` is `Ready`
    pub rows: Vec<MetricRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: i64,
}

impl SectionRunResult {
    fn failed(section: &dyn ReportSection, status: SectionStatus, message: String, duration_ms: i64) -> Self {
        Self {
            name: section.name().to_string(),
            title: section.title().to_string(),
            status,
            rows: Vec::new(),
            error_message: Some(message),
            duration_ms,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == SectionStatus::Ready
    }
}

/// A full report: every section in registration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub window: TimeWindow,
    pub sections: Vec<SectionRunResult>,
}

impl Report {
    pub fn section(&self, name: &str) -> Option<&SectionRunResult> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Sections that did not produce rows.
    pub fn gaps(&self) -> impl Iterator<Item = &SectionRunResult> {
        self.sections.iter().filter(|s| !s.is_ready())
    }
}

// ============================================
// Section trait
// ============================================

/// Trait that all report sections implement.
///
/// Sections are stateless and must be:
/// - **Deterministic**: same source contents and `now` give the same rows
/// - **Independent**: no section reads another's output
///
/// ## Example
///
/// ```rust,ignore
/// use eventlens_core::analytics::{ReportSection, SectionContext};
///
/// pub struct EventCount;
///
/// impl ReportSection for EventCount {
///     fn name(&self) -> &str { "custom.event_count" }
///
///     fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>> {
///         let query = EventQuery::new().between(ctx.window.since, ctx.window.until);
///         Ok(vec![MetricRow::count("events", ctx.source.count_matching(&query)?)])
///     }
/// }
/// ```
pub trait ReportSection: Send + Sync {
    /// Unique name for this section.
    ///
    /// Convention: `group.section` (e.g. "growth.retention", "funnel.trip")
    fn name(&self) -> &str;

    /// Heading shown when the report is rendered.
    fn title(&self) -> &str {
        self.name()
    }

    /// Compute the section's rows.
    fn compute(&self, ctx: &SectionContext<'_>) -> Result<Vec<MetricRow>>;
}

// ============================================
// Report engine
// ============================================

/// Registry of report sections.
pub struct ReportEngine {
    sections: Vec<Box<dyn ReportSection>>,
    default_timeout_ms: u64,
    section_timeouts_ms: HashMap<String, u64>,
    parallel: bool,
}

impl Default for ReportEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEngine {
    /// Create a new empty engine.
    pub fn new() -> Self {
        Self {
            sections: Vec::new(),
            default_timeout_ms: DEFAULT_SECTION_TIMEOUT_MS,
            section_timeouts_ms: HashMap::new(),
            parallel: false,
        }
    }

    /// Register a section with the engine.
    pub fn register(&mut self, section: Box<dyn ReportSection>) {
        tracing::debug!(section = section.name(), "Registered report section");
        self.sections.push(section);
    }

    /// Set default timeout (milliseconds) for section execution.
    pub fn set_default_timeout_ms(&mut self, timeout_ms: u64) {
        self.default_timeout_ms = timeout_ms.max(1);
    }

    /// Set per-section timeout overrides (milliseconds).
    pub fn set_section_timeouts_ms(&mut self, section_timeouts_ms: HashMap<String, u64>) {
        self.section_timeouts_ms = section_timeouts_ms
            .into_iter()
            .map(|(name, timeout)| (name, timeout.max(1)))
            .collect();
    }

    /// Run sections on scoped threads instead of one after another.
    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    /// Get list of registered section names.
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name()).collect()
    }

    /// Check if a section is registered.
    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.name() == name)
    }

    fn timeout_for_section_ms(&self, section_name: &str) -> u64 {
        self.section_timeouts_ms
            .get(section_name)
            .copied()
            .unwrap_or(self.default_timeout_ms)
    }

    fn timeout_error(section_name: &str, duration_ms: i64, timeout_ms: u64) -> String {
        format!("section {section_name} exceeded timeout: {duration_ms}ms > {timeout_ms}ms")
    }

    fn execute(&self, section: &dyn ReportSection, ctx: &SectionContext<'_>) -> SectionRunResult {
        let start = Instant::now();
        let timeout_ms = self.timeout_for_section_ms(section.name());

        tracing::debug!(section = section.name(), timeout_ms, "Running report section");

        match section.compute(ctx) {
            Ok(rows) => {
                let duration_ms = start.elapsed().as_millis() as i64;

                if duration_ms as u64 > timeout_ms {
                    tracing::warn!(
                        section = section.name(),
                        duration_ms,
                        timeout_ms,
                        "Section exceeded timeout; dropping computed rows"
                    );
                    let message = Self::timeout_error(section.name(), duration_ms, timeout_ms);
                    return SectionRunResult::failed(section, SectionStatus::Timeout, message, duration_ms);
                }

                tracing::info!(
                    section = section.name(),
                    rows = rows.len(),
                    duration_ms,
                    "Section completed"
                );

                SectionRunResult {
                    name: section.name().to_string(),
                    title: section.title().to_string(),
                    status: SectionStatus::Ready,
                    rows,
                    error_message: None,
                    duration_ms,
                }
            }
            Err(e) => {
                let duration_ms = start.elapsed().as_millis() as i64;
                let status = if e.is_upstream() {
                    tracing::warn!(section = section.name(), error = %e, "Section source unavailable");
                    SectionStatus::Unavailable
                } else {
                    tracing::error!(section = section.name(), error = %e, "Section failed");
                    SectionStatus::Error
                };
                SectionRunResult::failed(section, status, e.to_string(), duration_ms)
            }
        }
    }

    /// Run one section by name.
    pub fn run_section(&self, name: &str, ctx: &SectionContext<'_>) -> Result<SectionRunResult> {
        let section = self
            .sections
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| Error::Config(format!("Section not found: {}", name)))?;
        Ok(self.execute(section.as_ref(), ctx))
    }

    /// Run every registered section.
    pub fn run_all(&self, ctx: &SectionContext<'_>) -> Report {
        self.run_matching(ctx, None)
    }

    /// Run the sections named `prefix` or under `prefix.` (all when `None`).
    ///
    /// Results keep registration order whether or not sections run in
    /// parallel.
    pub fn run_matching(&self, ctx: &SectionContext<'_>, prefix: Option<&str>) -> Report {
        let selected: Vec<&dyn ReportSection> = self
            .sections
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| prefix.map_or(true, |p| section_matches(s.name(), p)))
            .collect();

        let start = Instant::now();
        let sections: Vec<SectionRunResult> = if self.parallel {
            std::thread::scope(|scope| {
                let handles: Vec<_> = selected
                    .iter()
                    .map(|section| scope.spawn(move || self.execute(*section, ctx)))
                    .collect();

                handles
                    .into_iter()
                    .zip(&selected)
                    .map(|(handle, section)| {
                        handle.join().unwrap_or_else(|_| {
                            tracing::error!(section = section.name(), "Section panicked");
                            SectionRunResult::failed(
                                *section,
                                SectionStatus::Error,
                                "section panicked".to_string(),
                                0,
                            )
                        })
                    })
                    .collect()
            })
        } else {
            selected
                .iter()
                .map(|section| self.execute(*section, ctx))
                .collect()
        };

        let report = Report {
            generated_at: ctx.now,
            window: ctx.window,
            sections,
        };

        tracing::info!(
            sections = report.sections.len(),
            gaps = report.gaps().count(),
            parallel = self.parallel,
            duration_ms = start.elapsed().as_millis() as i64,
            "Report assembled"
        );
        report
    }
}
