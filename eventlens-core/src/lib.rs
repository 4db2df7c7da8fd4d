//! # eventlens-core
//!
//! Core library for eventlens - a behavioral analytics engine over an
//! append-only log of app interaction events.
//!
//! This library provides:
//! - Domain types for events, signups, sessions and metric rows
//! - The [`EventSource`] seam and its SQLite implementation
//! - The analytics engine (sessions, retention, funnels, churn, stickiness)
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows in one direction:
//! - **Source:** the event log and signups, read through [`EventSource`]
//! - **Aggregators:** pure functions that infer sessions, cohorts and funnels
//! - **Report:** sections that reduce aggregator output to [`MetricRow`]s
//!
//! Nothing derived is persisted; every report is a function of the source
//! contents at call time.
//!
//! ## Example
//!
//! ```rust,no_run
//! use eventlens_core::analytics::{create_default_engine, SectionContext};
//! use eventlens_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! // Build the report
//! let engine = create_default_engine(&config.analytics);
//! let ctx = SectionContext::new(&db, &config.analytics, chrono::Utc::now());
//! let report = engine.run_all(&ctx);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use source::{EventQuery, EventSource};
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod source;
pub mod types;
