//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: event log and profiles
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id          TEXT NOT NULL,
        event_type       TEXT NOT NULL,
        entity_type      TEXT,
        entity_id        TEXT,
        metadata         JSON,
        -- RFC 3339, fixed-width UTC so text order is time order
        occurred_at      DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS profiles (
        id               TEXT PRIMARY KEY,
        first_name       TEXT,
        username         TEXT,
        created_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_events_user_time ON events(user_id, occurred_at, id);
    CREATE INDEX IF NOT EXISTS idx_events_type_time ON events(event_type, occurred_at);
    CREATE INDEX IF NOT EXISTS idx_events_time ON events(occurred_at);
    CREATE INDEX IF NOT EXISTS idx_profiles_created ON profiles(created_at);
    "#,
    // Version 2: entity display names and entity lookups
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        entity_type      TEXT NOT NULL,
        id               TEXT NOT NULL,
        name             TEXT NOT NULL,
        PRIMARY KEY (entity_type, id)
    );

    CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
    "#,
    // Version 3: entity hierarchy (city -> country)
    r#"
    ALTER TABLE entities ADD COLUMN parent_id TEXT;

    CREATE INDEX IF NOT EXISTS idx_entities_parent ON entities(entity_type, parent_id);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["events", "profiles", "entities"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_upgrade_from_version_one() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.execute("PRAGMA user_version = 1", []).unwrap();

        run_migrations(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        let exists: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='entities'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(exists, 1);

        let has_parent: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('entities') WHERE name = 'parent_id'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(has_parent, 1);
    }
}
