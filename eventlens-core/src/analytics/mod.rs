//! Analytics module for eventlens
//!
//! Batch computations that turn the raw event log into product metrics:
//! - Session reconstruction ([`sessionize`])
//! - Distribution helpers ([`stats`])
//! - Weekly retention cohorts ([`retention`])
//! - View-to-conversion funnels ([`funnel`])
//! - Churn, resurrection and stickiness ([`churn`])
//! - Content engagement and power users ([`engagement`])
//! - Geo demand and community health ([`content`])
//!
//! Every aggregator is a pure function of its inputs or of the
//! [`EventSource`] contents at call time. The [`engine`] wraps them as report
//! sections and isolates their failures; [`sections`] registers the
//! built-in ones.

pub mod churn;
pub mod content;
pub mod engagement;
pub mod engine;
pub mod funnel;
pub mod retention;
pub mod sections;
pub mod sessionize;
pub mod stats;

pub use engine::{Report, ReportEngine, ReportSection, SectionContext, SectionRunResult, SectionStatus};
pub use sections::create_default_engine;
pub use sessionize::{sessionize, Sessionizer};
pub use stats::{bucketize, median, percentage_of};

use crate::source::EventSource;
use std::collections::HashMap;

/// Label for users without a display name.
pub const ANONYMOUS: &str = "Anonymous";

/// Display names for users, with [`ANONYMOUS`] for every miss.
///
/// A failed lookup is logged and treated as all misses.
pub(crate) fn user_labels(source: &dyn EventSource, ids: &[String]) -> HashMap<String, String> {
    if ids.is_empty() {
        return HashMap::new();
    }

    let mut names = source.resolve_user_names(ids).unwrap_or_else(|e| {
        tracing::warn!(users = ids.len(), error = %e, "User name lookup failed");
        HashMap::new()
    });

    for id in ids {
        names.entry(id.clone()).or_insert_with(|| {
            tracing::debug!(user_id = %id, "No display name for user");
            ANONYMOUS.to_string()
        });
    }
    names
}
