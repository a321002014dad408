//! Database queries for memory operations
//!
//! All reads and writes are tenant-scoped. An id that exists under another
//! tenant behaves exactly like a missing id.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;

use crate::error::{MemoriaError, Result};
use crate::types::*;

const ENTRY_COLUMNS: &str = "m.id, m.title, m.content, m.summary, m.memory_type, m.status,
        m.topic_id, m.project_ref, m.user_id, m.organization_id, m.metadata,
        m.access_count, m.last_accessed_at, m.created_at, m.updated_at,
        EXISTS(SELECT 1 FROM embeddings e WHERE e.memory_id = m.id) AS has_embedding";

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a memory entry from a database row
pub fn entry_from_row(row: &Row) -> rusqlite::Result<MemoryEntry> {
    let metadata_str: String = row.get("metadata")?;
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_str).unwrap_or_default();

    let memory_type_str: String = row.get("memory_type")?;
    let status_str: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let last_accessed_at: Option<String> = row.get("last_accessed_at")?;
    let has_embedding: i32 = row.get("has_embedding")?;

    Ok(MemoryEntry {
        id: row.get("id")?,
        title: row.get("title")?,
        content: row.get("content")?,
        summary: row.get("summary")?,
        memory_type: memory_type_str.parse().unwrap_or_default(),
        status: status_str.parse().unwrap_or_default(),
        tags: vec![], // Loaded separately
        topic_id: row.get("topic_id")?,
        project_ref: row.get("project_ref")?,
        user_id: row.get("user_id")?,
        organization_id: row.get("organization_id")?,
        metadata,
        access_count: row.get("access_count")?,
        last_accessed_at: last_accessed_at.as_deref().map(parse_ts),
        has_embedding: has_embedding != 0,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

/// Load tags for a memory
pub fn load_tags(conn: &Connection, memory_id: MemoryId) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT t.name FROM tags t
         JOIN memory_tags mt ON t.id = mt.tag_id
         WHERE mt.memory_id = ?",
    )?;

    let tags: Vec<String> = stmt
        .query_map([memory_id], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(tags)
}

/// Append the tenant predicate (NULL-safe on organization_id)
fn push_scope(
    scope: &TenantScope,
    conditions: &mut Vec<String>,
    values: &mut Vec<Box<dyn rusqlite::ToSql>>,
) {
    conditions.push("m.user_id = ?".to_string());
    values.push(Box::new(scope.user_id.clone()));
    conditions.push("(m.organization_id = ? OR (m.organization_id IS NULL AND ? IS NULL))".to_string());
    values.push(Box::new(scope.organization_id.clone()));
    values.push(Box::new(scope.organization_id.clone()));
}

fn ensure_tag(conn: &Connection, tag: &str) -> Result<()> {
    conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?)", params![tag])?;
    Ok(())
}

fn replace_entry_tags(conn: &Connection, memory_id: MemoryId, tags: &[String]) -> Result<()> {
    conn.execute(
        "DELETE FROM memory_tags WHERE memory_id = ?",
        params![memory_id],
    )?;
    for tag in tags {
        ensure_tag(conn, tag)?;
        conn.execute(
            "INSERT OR IGNORE INTO memory_tags (memory_id, tag_id)
             SELECT ?, id FROM tags WHERE name = ?",
            params![memory_id, tag],
        )?;
    }
    Ok(())
}

/// Verify that a topic id exists within the caller's tenant
pub fn check_topic_in_scope(conn: &Connection, scope: &TenantScope, topic_id: TopicId) -> Result<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM memory_topics
             WHERE id = ? AND user_id = ?
               AND (organization_id = ? OR (organization_id IS NULL AND ? IS NULL))",
            params![
                topic_id,
                scope.user_id,
                scope.organization_id,
                scope.organization_id
            ],
            |row| row.get(0),
        )
        .ok();

    if found.is_none() {
        return Err(MemoriaError::TopicNotFound(topic_id));
    }
    Ok(())
}

/// Insert a new memory with its embedding
///
/// The embedding is required on the create path; a memory is never persisted
/// after a failed embed. Call inside a transaction.
pub fn insert_memory(
    conn: &Connection,
    scope: &TenantScope,
    input: &CreateMemoryInput,
    embedding: &[f32],
    model: &str,
) -> Result<MemoryEntry> {
    if let Some(topic_id) = input.topic_id {
        check_topic_in_scope(conn, scope, topic_id)?;
    }

    let now = Utc::now().to_rfc3339();
    let metadata_json = serde_json::to_string(&input.metadata)?;

    conn.execute(
        "INSERT INTO memory_entries
            (title, content, summary, memory_type, status, topic_id, project_ref,
             user_id, organization_id, metadata, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            input.title,
            input.content,
            input.summary,
            input.memory_type.as_str(),
            input.status.as_str(),
            input.topic_id,
            input.project_ref,
            scope.user_id,
            scope.organization_id,
            metadata_json,
            now,
            now,
        ],
    )?;

    let id = conn.last_insert_rowid();

    replace_entry_tags(conn, id, &input.tags)?;
    put_embedding(conn, id, embedding, model)?;

    get_memory(conn, scope, id)
}

/// Get a memory by id within the caller's tenant
///
/// Soft-deleted entries are outside the lookup scope and surface as NotFound.
pub fn get_memory(conn: &Connection, scope: &TenantScope, id: MemoryId) -> Result<MemoryEntry> {
    let sql = format!(
        "SELECT {} FROM memory_entries m
         WHERE m.id = ? AND m.status != 'deleted'
           AND m.user_id = ?
           AND (m.organization_id = ? OR (m.organization_id IS NULL AND ? IS NULL))",
        ENTRY_COLUMNS
    );

    let mut memory = conn
        .query_row(
            &sql,
            params![
                id,
                scope.user_id,
                scope.organization_id,
                scope.organization_id
            ],
            entry_from_row,
        )
        .map_err(|_| MemoriaError::NotFound(id))?;

    memory.tags = load_tags(conn, id)?;
    Ok(memory)
}

/// Increment access_count and stamp last_accessed_at
///
/// Non-critical: the caller logs and suppresses failures instead of failing
/// the read that triggered it.
pub fn record_access(conn: &Connection, id: MemoryId) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE memory_entries
         SET access_count = access_count + 1, last_accessed_at = ?
         WHERE id = ?",
        params![now, id],
    )?;
    Ok(())
}

fn next_version_number(conn: &Connection, memory_id: MemoryId) -> Result<i64> {
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version_number), 0) + 1 FROM memory_versions WHERE memory_id = ?",
        params![memory_id],
        |row| row.get(0),
    )?;
    Ok(next)
}

/// Snapshot the pre-update state of a memory's content-bearing fields
fn insert_version(
    conn: &Connection,
    current: &MemoryEntry,
    created_by: Option<&str>,
) -> Result<()> {
    let version_number = next_version_number(conn, current.id)?;
    let tags_json = serde_json::to_string(&current.tags)?;
    let metadata_json = serde_json::to_string(&current.metadata)?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO memory_versions
            (memory_id, version_number, title, content, memory_type, tags, topic_id,
             metadata, created_by, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            current.id,
            version_number,
            current.title,
            current.content,
            current.memory_type.as_str(),
            tags_json,
            current.topic_id,
            metadata_json,
            created_by,
            now,
        ],
    )?;

    Ok(())
}

/// Update a memory, versioning content-affecting changes
///
/// Only supplied fields are mutated; `updated_at` is always refreshed. An
/// update touching any of {title, content, memory_type, tags, topic_id,
/// metadata} appends exactly one version snapshot. Call inside a transaction
/// so the update and its snapshot land together.
pub fn update_memory(
    conn: &Connection,
    scope: &TenantScope,
    id: MemoryId,
    input: &UpdateMemoryInput,
    new_embedding: Option<(&[f32], &str)>,
) -> Result<MemoryEntry> {
    let current = get_memory(conn, scope, id)?;

    if let Some(Some(topic_id)) = input.topic_id {
        check_topic_in_scope(conn, scope, topic_id)?;
    }

    if input.touches_versioned_fields() {
        insert_version(conn, &current, input.updated_by.as_deref())?;
    }

    let now = Utc::now().to_rfc3339();
    let mut updates = vec!["updated_at = ?".to_string()];
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];

    if let Some(ref title) = input.title {
        updates.push("title = ?".to_string());
        values.push(Box::new(title.clone()));
    }
    if let Some(ref content) = input.content {
        updates.push("content = ?".to_string());
        values.push(Box::new(content.clone()));
    }
    if let Some(ref summary) = input.summary {
        updates.push("summary = ?".to_string());
        values.push(Box::new(summary.clone()));
    }
    if let Some(ref memory_type) = input.memory_type {
        updates.push("memory_type = ?".to_string());
        values.push(Box::new(memory_type.as_str().to_string()));
    }
    if let Some(ref status) = input.status {
        updates.push("status = ?".to_string());
        values.push(Box::new(status.as_str().to_string()));
    }
    if let Some(ref topic_id) = input.topic_id {
        updates.push("topic_id = ?".to_string());
        values.push(Box::new(*topic_id));
    }
    if let Some(ref project_ref) = input.project_ref {
        updates.push("project_ref = ?".to_string());
        values.push(Box::new(project_ref.clone()));
    }
    if let Some(ref metadata) = input.metadata {
        let metadata_json = serde_json::to_string(metadata)?;
        updates.push("metadata = ?".to_string());
        values.push(Box::new(metadata_json));
    }

    let sql = format!(
        "UPDATE memory_entries SET {} WHERE id = ?",
        updates.join(", ")
    );
    values.push(Box::new(id));

    let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
    conn.execute(&sql, param_refs.as_slice())?;

    if let Some(ref tags) = input.tags {
        replace_entry_tags(conn, id, tags)?;
    }

    if let Some((embedding, model)) = new_embedding {
        put_embedding(conn, id, embedding, model)?;
    }

    get_memory(conn, scope, id)
}

/// Soft-delete a memory: sets status to 'deleted' and refreshes updated_at
///
/// A second call on the same id finds nothing in the lookup scope and
/// returns NotFound.
pub fn soft_delete_memory(conn: &Connection, scope: &TenantScope, id: MemoryId) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    let affected = conn.execute(
        "UPDATE memory_entries SET status = 'deleted', updated_at = ?
         WHERE id = ? AND status != 'deleted'
           AND user_id = ?
           AND (organization_id = ? OR (organization_id IS NULL AND ? IS NULL))",
        params![
            now,
            id,
            scope.user_id,
            scope.organization_id,
            scope.organization_id
        ],
    )?;

    if affected == 0 {
        return Err(MemoriaError::NotFound(id));
    }

    Ok(())
}

/// Soft-delete a batch of ids, collecting per-id misses
///
/// Ids that are missing, foreign, or already deleted land in the failed
/// list; storage-level errors propagate and fail the whole batch.
pub fn soft_delete_many(
    conn: &Connection,
    scope: &TenantScope,
    ids: &[MemoryId],
) -> Result<(usize, Vec<MemoryId>)> {
    let mut deleted = 0usize;
    let mut failed = Vec::new();

    for &id in ids {
        match soft_delete_memory(conn, scope, id) {
            Ok(()) => deleted += 1,
            Err(MemoriaError::NotFound(_)) => failed.push(id),
            Err(e) => return Err(e),
        }
    }

    Ok((deleted, failed))
}

/// List memories with filtering, sorting, and pagination
///
/// Returns the page and the total count of matching entries. Status defaults
/// to active-only; soft-deleted entries appear only when requested
/// explicitly.
pub fn list_memories(
    conn: &Connection,
    scope: &TenantScope,
    options: &ListOptions,
) -> Result<(Vec<MemoryEntry>, i64)> {
    let mut joins = String::new();
    let mut conditions: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    push_scope(scope, &mut conditions, &mut values);

    let status = options.status.unwrap_or(MemoryStatus::Active);
    conditions.push("m.status = ?".to_string());
    values.push(Box::new(status.as_str().to_string()));

    if let Some(ref types) = options.memory_types {
        if !types.is_empty() {
            let placeholders: Vec<&str> = types.iter().map(|_| "?").collect();
            conditions.push(format!("m.memory_type IN ({})", placeholders.join(", ")));
            for t in types {
                values.push(Box::new(t.as_str().to_string()));
            }
        }
    }

    if let Some(topic_id) = options.topic_id {
        conditions.push("m.topic_id = ?".to_string());
        values.push(Box::new(topic_id));
    }

    if let Some(ref project_ref) = options.project_ref {
        conditions.push("m.project_ref = ?".to_string());
        values.push(Box::new(project_ref.clone()));
    }

    // Tag overlap: at least one matching tag
    if let Some(ref tags) = options.tags {
        if !tags.is_empty() {
            joins.push_str(
                " JOIN memory_tags mt ON m.id = mt.memory_id
                  JOIN tags t ON mt.tag_id = t.id",
            );
            let placeholders: Vec<&str> = tags.iter().map(|_| "?").collect();
            conditions.push(format!("t.name IN ({})", placeholders.join(", ")));
            for tag in tags {
                values.push(Box::new(tag.clone()));
            }
        }
    }

    let where_clause = format!(" WHERE {}", conditions.join(" AND "));

    // Total count with the same predicate set
    let count_sql = format!(
        "SELECT COUNT(DISTINCT m.id) FROM memory_entries m{}{}",
        joins, where_clause
    );
    let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(&count_sql, param_refs.as_slice(), |row| row.get(0))?;

    let sort_field = match options.sort_by.unwrap_or_default() {
        SortField::CreatedAt => "m.created_at",
        SortField::UpdatedAt => "m.updated_at",
        SortField::LastAccessedAt => "m.last_accessed_at",
        SortField::AccessCount => "m.access_count",
        SortField::Title => "m.title",
    };
    let sort_order = match options.sort_order.unwrap_or_default() {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };

    let limit = options.limit.unwrap_or(100).max(0);
    let offset = options.offset.unwrap_or(0).max(0);

    let sql = format!(
        "SELECT DISTINCT {} FROM memory_entries m{}{} ORDER BY {} {} LIMIT {} OFFSET {}",
        ENTRY_COLUMNS, joins, where_clause, sort_field, sort_order, limit, offset
    );

    let mut stmt = conn.prepare(&sql)?;
    let entries: Vec<MemoryEntry> = stmt
        .query_map(param_refs.as_slice(), entry_from_row)?
        .filter_map(|r| r.ok())
        .map(|mut m| {
            m.tags = load_tags(conn, m.id).unwrap_or_default();
            m
        })
        .collect();

    Ok((entries, total))
}

/// Store an embedding as little-endian f32 bytes
pub fn put_embedding(
    conn: &Connection,
    memory_id: MemoryId,
    embedding: &[f32],
    model: &str,
) -> Result<()> {
    let bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT OR REPLACE INTO embeddings (memory_id, embedding, model, dimensions, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![memory_id, bytes, model, embedding.len() as i64, now],
    )?;

    Ok(())
}

/// Get the embedding for a memory, if one is stored
pub fn get_embedding(conn: &Connection, memory_id: MemoryId) -> Result<Option<Vec<f32>>> {
    let row = conn.query_row(
        "SELECT embedding, dimensions FROM embeddings WHERE memory_id = ?",
        params![memory_id],
        |row| {
            let bytes: Vec<u8> = row.get(0)?;
            let dimensions: i64 = row.get(1)?;
            Ok((bytes, dimensions as usize))
        },
    );

    match row {
        Ok((bytes, dimensions)) => {
            let expected = dimensions.checked_mul(4).ok_or_else(|| {
                MemoriaError::Storage("Embedding dimensions too large".to_string())
            })?;
            if bytes.len() != expected {
                return Err(MemoriaError::Storage(format!(
                    "Embedding byte length {} does not match dimensions {}",
                    bytes.len(),
                    dimensions
                )));
            }
            let floats: Vec<f32> = bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            Ok(Some(floats))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List version snapshots for a memory, oldest first
///
/// The parent must exist within the caller's tenant; soft-deleted parents
/// still expose their history for audit reads.
pub fn list_versions(
    conn: &Connection,
    scope: &TenantScope,
    memory_id: MemoryId,
) -> Result<Vec<MemoryVersion>> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT id FROM memory_entries
             WHERE id = ? AND user_id = ?
               AND (organization_id = ? OR (organization_id IS NULL AND ? IS NULL))",
            params![
                memory_id,
                scope.user_id,
                scope.organization_id,
                scope.organization_id
            ],
            |row| row.get(0),
        )
        .ok();
    if exists.is_none() {
        return Err(MemoriaError::NotFound(memory_id));
    }

    let mut stmt = conn.prepare_cached(
        "SELECT id, memory_id, version_number, title, content, memory_type, tags,
                topic_id, metadata, created_by, created_at
         FROM memory_versions
         WHERE memory_id = ?
         ORDER BY version_number ASC",
    )?;

    let versions: Vec<MemoryVersion> = stmt
        .query_map([memory_id], |row| {
            let memory_type_str: String = row.get("memory_type")?;
            let tags_str: String = row.get("tags")?;
            let metadata_str: String = row.get("metadata")?;
            let created_at: String = row.get("created_at")?;

            Ok(MemoryVersion {
                id: row.get("id")?,
                memory_id: row.get("memory_id")?,
                version_number: row.get("version_number")?,
                title: row.get("title")?,
                content: row.get("content")?,
                memory_type: memory_type_str.parse().unwrap_or_default(),
                tags: serde_json::from_str(&tags_str).unwrap_or_default(),
                topic_id: row.get("topic_id")?,
                metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
                created_by: row.get("created_by")?,
                created_at: parse_ts(&created_at),
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(versions)
}

/// Counts of stored objects
pub fn get_stats(conn: &Connection) -> Result<StorageStats> {
    let total_memories: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memory_entries WHERE status != 'deleted'",
        [],
        |r| r.get(0),
    )?;
    let total_versions: i64 =
        conn.query_row("SELECT COUNT(*) FROM memory_versions", [], |r| r.get(0))?;
    let total_topics: i64 =
        conn.query_row("SELECT COUNT(*) FROM memory_topics", [], |r| r.get(0))?;
    let memories_with_embeddings: i64 =
        conn.query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0))?;
    let schema_version: i32 = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
        .unwrap_or(0);

    Ok(StorageStats {
        total_memories,
        total_versions,
        total_topics,
        memories_with_embeddings,
        db_size_bytes: None,
        schema_version,
    })
}
