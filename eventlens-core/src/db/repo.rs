//! Database repository layer
//!
//! Provides insert operations for the importer and the read queries behind
//! the [`EventSource`] implementation.

use crate::error::{Error, Result};
use crate::source::{EventQuery, EventSource};
use crate::types::{Event, Profile, Signup};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Ids bound per `IN (...)` lookup; SQLite caps bound parameters at 999.
const LOOKUP_CHUNK: usize = 500;

/// Format a timestamp for storage.
///
/// Fixed-width UTC with microseconds, so lexical order matches time order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Translate an [`EventQuery`] into a WHERE clause and its bound values.
fn event_filter(query: &EventQuery) -> (String, Vec<String>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<String> = Vec::new();

    if !query.event_types.is_empty() {
        clauses.push(format!(
            "event_type IN ({})",
            placeholders(query.event_types.len())
        ));
        values.extend(query.event_types.iter().cloned());
    }
    if let Some(entity_type) = &query.entity_type {
        clauses.push("entity_type = ?".to_string());
        values.push(entity_type.clone());
    }
    if let Some(entity_id) = &query.entity_id {
        clauses.push("entity_id = ?".to_string());
        values.push(entity_id.clone());
    }
    if let Some(user_id) = &query.user_id {
        clauses.push("user_id = ?".to_string());
        values.push(user_id.clone());
    }
    if let Some(since) = query.since {
        clauses.push("occurred_at >= ?".to_string());
        values.push(format_ts(since));
    }
    if let Some(until) = query.until {
        clauses.push("occurred_at < ?".to_string());
        values.push(format_ts(until));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (where_sql, values)
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let metadata: Option<String> = row.get(5)?;
    let occurred_at: String = row.get(6)?;
    let metadata = metadata
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))
        })
        .transpose()?;

    Ok(Event {
        id: row.get(0)?,
        user_id: row.get(1)?,
        event_type: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        metadata,
        occurred_at: parse_ts(6, &occurred_at)?,
    })
}

fn row_to_profile(row: &Row<'_>) -> rusqlite::Result<Profile> {
    let created_at: String = row.get(3)?;
    Ok(Profile {
        id: row.get(0)?,
        first_name: row.get(1)?,
        username: row.get(2)?,
        created_at: parse_ts(3, &created_at)?,
    })
}

/// Database handle (single connection behind a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets readers proceed while the importer writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        super::schema::run_migrations(&conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::UpstreamUnavailable("database connection lock poisoned".to_string()))
    }

    // ============================================
    // Event operations
    // ============================================

    /// Append one event, returning its id
    pub fn insert_event(&self, event: &Event) -> Result<i64> {
        let conn = self.conn()?;
        let metadata = event
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            r#"
            INSERT INTO events (user_id, event_type, entity_type, entity_id, metadata, occurred_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.user_id,
                event.event_type,
                event.entity_type,
                event.entity_id,
                metadata,
                format_ts(event.occurred_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append a batch of events in one transaction
    pub fn insert_events(&self, events: &[Event]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO events (user_id, event_type, entity_type, entity_id, metadata, occurred_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for event in events {
                let metadata = event
                    .metadata
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                stmt.execute(params![
                    event.user_id,
                    event.event_type,
                    event.entity_type,
                    event.entity_id,
                    metadata,
                    format_ts(event.occurred_at),
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// Count all stored events
    pub fn count_events(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        Ok(count)
    }

    // ============================================
    // Profile operations
    // ============================================

    /// Insert or update a profile
    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO profiles (id, first_name, username, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                first_name = excluded.first_name,
                username = excluded.username,
                created_at = excluded.created_at
            "#,
            params![
                profile.id,
                profile.first_name,
                profile.username,
                format_ts(profile.created_at),
            ],
        )?;
        Ok(())
    }

    /// Get a profile by id
    pub fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        let conn = self.conn()?;
        let profile = conn
            .query_row(
                "SELECT id, first_name, username, created_at FROM profiles WHERE id = ?",
                [id],
                row_to_profile,
            )
            .optional()?;
        Ok(profile)
    }

    /// Count all profiles
    pub fn count_profiles(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM profiles", [], |r| r.get(0))?;
        Ok(count)
    }

    // ============================================
    // Entity operations
    // ============================================

    /// Insert or update the display name of an entity
    pub fn upsert_entity(&self, entity_type: &str, id: &str, name: &str) -> Result<()> {
        self.upsert_entity_with_parent(entity_type, id, name, None)
    }

    /// Insert or rename an entity, linking it to its parent (a city's
    /// country). A `None` parent keeps whatever link is already stored.
    pub fn upsert_entity_with_parent(
        &self,
        entity_type: &str,
        id: &str,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO entities (entity_type, id, name, parent_id)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(entity_type, id) DO UPDATE SET
                name = excluded.name,
                parent_id = COALESCE(excluded.parent_id, entities.parent_id)
            "#,
            params![entity_type, id, name, parent_id],
        )?;
        Ok(())
    }
}

impl EventSource for Database {
    fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let (where_sql, values) = event_filter(query);
        let sql = format!(
            r#"
            SELECT id, user_id, event_type, entity_type, entity_id, metadata, occurred_at
            FROM events
            {where_sql}
            ORDER BY user_id, occurred_at, id
            "#
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params_from_iter(values.iter()), row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::debug!(
            rows = events.len(),
            event_types = ?query.event_types,
            "Listed events"
        );
        Ok(events)
    }

    fn list_signups(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Signup>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, created_at
            FROM profiles
            WHERE (?1 IS NULL OR created_at >= ?1)
            ORDER BY created_at, id
            "#,
        )?;
        let signups = stmt
            .query_map([since.map(format_ts)], |row| {
                let created_at: String = row.get(1)?;
                Ok(Signup {
                    user_id: row.get(0)?,
                    signup_time: parse_ts(1, &created_at)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(signups)
    }

    fn resolve_entity_names(
        &self,
        entity_type: &str,
        ids: &[String],
    ) -> Result<HashMap<String, String>> {
        let conn = self.conn()?;
        let mut names = HashMap::new();

        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT id, name FROM entities WHERE entity_type = ? AND id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let values = std::iter::once(entity_type).chain(chunk.iter().map(String::as_str));
            let rows = stmt.query_map(params_from_iter(values), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, name) = row?;
                names.insert(id, name);
            }
        }

        Ok(names)
    }

    fn entity_parents(&self, entity_type: &str) -> Result<HashMap<String, String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, parent_id FROM entities WHERE entity_type = ?1 AND parent_id IS NOT NULL",
        )?;
        let parents = stmt
            .query_map([entity_type], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(parents)
    }

    fn resolve_user_names(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let conn = self.conn()?;
        let mut names = HashMap::new();

        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT id, first_name, username, created_at FROM profiles WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), row_to_profile)?;
            for row in rows {
                let profile = row?;
                if let Some(name) = profile.display_name() {
                    names.insert(profile.id.clone(), name.to_string());
                }
            }
        }

        Ok(names)
    }

    fn distinct_users(&self, query: &EventQuery) -> Result<BTreeSet<String>> {
        let (where_sql, values) = event_filter(query);
        let sql = format!("SELECT DISTINCT user_id FROM events {where_sql}");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        Ok(users)
    }

    fn count_matching(&self, query: &EventQuery) -> Result<i64> {
        let (where_sql, values) = event_filter(query);
        let sql = format!("SELECT COUNT(*) FROM events {where_sql}");

        let conn = self.conn()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |r| r.get(0))?;
        Ok(count)
    }

    fn latest_event_before(
        &self,
        user_ids: &BTreeSet<String>,
        before: DateTime<Utc>,
    ) -> Result<HashMap<String, DateTime<Utc>>> {
        let conn = self.conn()?;
        let before = format_ts(before);
        let ids: Vec<&str> = user_ids.iter().map(String::as_str).collect();
        let mut latest = HashMap::new();

        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                r#"
                SELECT user_id, MAX(occurred_at)
                FROM events
                WHERE occurred_at < ? AND user_id IN ({})
                GROUP BY user_id
                "#,
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let values = std::iter::once(before.as_str()).chain(chunk.iter().copied());
            let rows = stmt.query_map(params_from_iter(values), |row| {
                let ts: String = row.get(1)?;
                Ok((row.get::<_, String>(0)?, parse_ts(1, &ts)?))
            })?;
            for row in rows {
                let (user_id, ts) = row?;
                latest.insert(user_id, ts);
            }
        }

        Ok(latest)
    }
}
