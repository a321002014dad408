//! Tenant-scoped topic queries
//!
//! Topics group memories and may form a hierarchy through
//! `parent_topic_id`. The hierarchy is kept acyclic at write time; deleting
//! a topic detaches its memories (FK set-null) rather than deleting them.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::{MemoriaError, Result};
use crate::types::*;

const TOPIC_COLUMNS: &str = "id, name, description, color, parent_topic_id, user_id,
        organization_id, is_system, metadata, created_at, updated_at";

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn topic_from_row(row: &Row) -> rusqlite::Result<MemoryTopic> {
    let metadata_str: String = row.get("metadata")?;
    let is_system: i32 = row.get("is_system")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(MemoryTopic {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        color: row.get("color")?,
        parent_topic_id: row.get("parent_topic_id")?,
        user_id: row.get("user_id")?,
        organization_id: row.get("organization_id")?,
        is_system: is_system != 0,
        metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

/// Get a topic by id within the caller's tenant
pub fn get_topic(conn: &Connection, scope: &TenantScope, id: TopicId) -> Result<MemoryTopic> {
    let sql = format!(
        "SELECT {} FROM memory_topics
         WHERE id = ? AND user_id = ?
           AND (organization_id = ? OR (organization_id IS NULL AND ? IS NULL))",
        TOPIC_COLUMNS
    );

    conn.query_row(
        &sql,
        params![
            id,
            scope.user_id,
            scope.organization_id,
            scope.organization_id
        ],
        topic_from_row,
    )
    .map_err(|_| MemoriaError::TopicNotFound(id))
}

/// Walk the ancestor chain and reject a parent assignment that would close
/// a cycle. `topic_id` is None on create (a new topic cannot be its own
/// ancestor).
fn check_no_cycle(
    conn: &Connection,
    scope: &TenantScope,
    topic_id: Option<TopicId>,
    parent_id: TopicId,
) -> Result<()> {
    let mut current = Some(parent_id);
    let mut hops = 0;

    while let Some(id) = current {
        if Some(id) == topic_id {
            return Err(MemoriaError::InvalidInput(
                "Topic hierarchy cannot contain cycles".to_string(),
            ));
        }
        // Bounded walk; a chain longer than this is a corrupt hierarchy
        hops += 1;
        if hops > 1000 {
            return Err(MemoriaError::Storage(
                "Topic hierarchy too deep".to_string(),
            ));
        }
        current = get_topic(conn, scope, id)?.parent_topic_id;
    }

    Ok(())
}

/// Create a topic
///
/// The name is unique per tenant; the parent, when given, must exist in the
/// same tenant.
pub fn create_topic(
    conn: &Connection,
    scope: &TenantScope,
    input: &CreateTopicInput,
) -> Result<MemoryTopic> {
    if let Some(parent_id) = input.parent_topic_id {
        // Existence check; a fresh topic cannot yet be part of a cycle
        get_topic(conn, scope, parent_id)?;
    }

    let now = Utc::now().to_rfc3339();
    let metadata_json = serde_json::to_string(&input.metadata)?;

    let inserted = conn.execute(
        "INSERT INTO memory_topics
            (name, description, color, parent_topic_id, user_id, organization_id,
             is_system, metadata, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            input.name.trim(),
            input.description,
            input.color,
            input.parent_topic_id,
            scope.user_id,
            scope.organization_id,
            input.is_system as i32,
            metadata_json,
            now,
            now,
        ],
    );

    match inserted {
        Ok(_) => get_topic(conn, scope, conn.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(MemoriaError::InvalidInput(format!(
                "Topic '{}' already exists",
                input.name.trim()
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// Update a topic; only supplied fields are mutated
pub fn update_topic(
    conn: &Connection,
    scope: &TenantScope,
    id: TopicId,
    input: &UpdateTopicInput,
) -> Result<MemoryTopic> {
    // Scope check up front
    get_topic(conn, scope, id)?;

    if let Some(Some(parent_id)) = input.parent_topic_id {
        get_topic(conn, scope, parent_id)?;
        check_no_cycle(conn, scope, Some(id), parent_id)?;
    }

    let now = Utc::now().to_rfc3339();
    let mut updates = vec!["updated_at = ?".to_string()];
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];

    if let Some(ref name) = input.name {
        updates.push("name = ?".to_string());
        values.push(Box::new(name.trim().to_string()));
    }
    if let Some(ref description) = input.description {
        updates.push("description = ?".to_string());
        values.push(Box::new(description.clone()));
    }
    if let Some(ref color) = input.color {
        updates.push("color = ?".to_string());
        values.push(Box::new(color.clone()));
    }
    if let Some(ref parent) = input.parent_topic_id {
        updates.push("parent_topic_id = ?".to_string());
        values.push(Box::new(*parent));
    }
    if let Some(ref metadata) = input.metadata {
        updates.push("metadata = ?".to_string());
        values.push(Box::new(serde_json::to_string(metadata)?));
    }

    let sql = format!("UPDATE memory_topics SET {} WHERE id = ?", updates.join(", "));
    values.push(Box::new(id));

    let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
    match conn.execute(&sql, param_refs.as_slice()) {
        Ok(_) => get_topic(conn, scope, id),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(MemoriaError::InvalidInput(
                "Topic name already exists".to_string(),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete a topic; memories referencing it are detached via FK set-null
///
/// System topics refuse deletion.
pub fn delete_topic(conn: &Connection, scope: &TenantScope, id: TopicId) -> Result<()> {
    let topic = get_topic(conn, scope, id)?;
    if topic.is_system {
        return Err(MemoriaError::InvalidInput(
            "System topics cannot be deleted".to_string(),
        ));
    }

    conn.execute("DELETE FROM memory_topics WHERE id = ?", params![id])?;
    Ok(())
}

/// List topics for a tenant, alphabetical
pub fn list_topics(conn: &Connection, scope: &TenantScope) -> Result<Vec<MemoryTopic>> {
    let sql = format!(
        "SELECT {} FROM memory_topics
         WHERE user_id = ?
           AND (organization_id = ? OR (organization_id IS NULL AND ? IS NULL))
         ORDER BY name COLLATE NOCASE ASC",
        TOPIC_COLUMNS
    );

    let mut stmt = conn.prepare(&sql)?;
    let topics: Vec<MemoryTopic> = stmt
        .query_map(
            params![
                scope.user_id,
                scope.organization_id,
                scope.organization_id
            ],
            topic_from_row,
        )?
        .filter_map(|r| r.ok())
        .collect();

    Ok(topics)
}
