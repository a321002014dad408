//! Database migrations for Memoria

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < SCHEMA_VERSION {
        migrate_v1(conn)?;
        tracing::info!("Applied schema migrations up to v{}", SCHEMA_VERSION);
    }

    Ok(())
}

/// Initial schema (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Topics first: memory_entries references them
        CREATE TABLE IF NOT EXISTS memory_topics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            color TEXT,
            parent_topic_id INTEGER REFERENCES memory_topics(id) ON DELETE SET NULL,
            user_id TEXT NOT NULL,
            organization_id TEXT,
            is_system INTEGER NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- Name is unique per tenant; NULL organizations collapse to ''
        CREATE UNIQUE INDEX IF NOT EXISTS idx_topics_tenant_name
            ON memory_topics(user_id, COALESCE(organization_id, ''), name);

        -- Memory entries
        CREATE TABLE IF NOT EXISTS memory_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            summary TEXT,
            memory_type TEXT NOT NULL DEFAULT 'context',
            status TEXT NOT NULL DEFAULT 'active',
            topic_id INTEGER REFERENCES memory_topics(id) ON DELETE SET NULL,
            project_ref TEXT,
            user_id TEXT NOT NULL,
            organization_id TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            access_count INTEGER NOT NULL DEFAULT 0,
            last_accessed_at TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- Tags table (normalized)
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE
        );

        -- Memory-tag relationship
        CREATE TABLE IF NOT EXISTS memory_tags (
            memory_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (memory_id, tag_id),
            FOREIGN KEY (memory_id) REFERENCES memory_entries(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        );

        -- Embedding vectors, one row per embedded entry.
        -- Absent row means the entry has no vector yet.
        CREATE TABLE IF NOT EXISTS embeddings (
            memory_id INTEGER PRIMARY KEY,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (memory_id) REFERENCES memory_entries(id) ON DELETE CASCADE
        );

        -- Version history: append-only snapshots of content-bearing fields
        CREATE TABLE IF NOT EXISTS memory_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id INTEGER NOT NULL,
            version_number INTEGER NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            memory_type TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            topic_id INTEGER,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_by TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(memory_id, version_number),
            FOREIGN KEY (memory_id) REFERENCES memory_entries(id) ON DELETE CASCADE
        );

        -- Indexes for the hot paths
        CREATE INDEX IF NOT EXISTS idx_entries_tenant
            ON memory_entries(user_id, organization_id);
        CREATE INDEX IF NOT EXISTS idx_entries_status ON memory_entries(status);
        CREATE INDEX IF NOT EXISTS idx_entries_type ON memory_entries(memory_type);
        CREATE INDEX IF NOT EXISTS idx_entries_topic ON memory_entries(topic_id);
        CREATE INDEX IF NOT EXISTS idx_entries_created ON memory_entries(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_entries_updated ON memory_entries(updated_at DESC);

        CREATE INDEX IF NOT EXISTS idx_memory_tags_memory ON memory_tags(memory_id);
        CREATE INDEX IF NOT EXISTS idx_memory_tags_tag ON memory_tags(tag_id);

        CREATE INDEX IF NOT EXISTS idx_versions_memory ON memory_versions(memory_id);
        CREATE INDEX IF NOT EXISTS idx_topics_tenant ON memory_topics(user_id, organization_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;

    Ok(())
}
