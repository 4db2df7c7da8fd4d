//! Database layer for eventlens
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - The [`EventSource`](crate::source::EventSource) implementation the engine reads from

pub mod repo;
pub mod schema;

pub use repo::Database;
