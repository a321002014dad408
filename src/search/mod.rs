//! Vector similarity search
//!
//! Relational predicates (tenant, status, type, tags, topic, project) are
//! pushed down into the SQL candidate query; cosine scoring runs over the
//! filtered candidate set. A candidate scoring exactly at the threshold is
//! included.

use rusqlite::Connection;

use crate::embedding::cosine_similarity;
use crate::error::{MemoriaError, Result};
use crate::storage::queries::{entry_from_row, get_embedding, load_tags};
use crate::types::*;

/// Validated search parameters
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub threshold: f32,
    pub limit: i64,
}

impl SearchParams {
    /// Re-validate bounds defensively, even though upstream validates too
    pub fn from_options(options: &SearchOptions) -> Result<Self> {
        let threshold = options.threshold.unwrap_or(DEFAULT_SEARCH_THRESHOLD);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MemoriaError::InvalidInput(format!(
                "Threshold {} is out of range 0-1",
                threshold
            )));
        }

        let limit = options.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
            return Err(MemoriaError::InvalidInput(format!(
                "Limit {} is out of range 1-{}",
                limit, MAX_SEARCH_LIMIT
            )));
        }

        Ok(Self { threshold, limit })
    }
}

/// Rank memories by similarity to a query vector
///
/// Results are ordered by score descending; ties break on `created_at`
/// descending. Entries without a stored embedding never match.
pub fn semantic_search(
    conn: &Connection,
    query_embedding: &[f32],
    scope: &TenantScope,
    options: &SearchOptions,
) -> Result<Vec<ScoredMemory>> {
    let params = SearchParams::from_options(options)?;

    let mut sql = String::from(
        "SELECT m.id, m.title, m.content, m.summary, m.memory_type, m.status,
                m.topic_id, m.project_ref, m.user_id, m.organization_id, m.metadata,
                m.access_count, m.last_accessed_at, m.created_at, m.updated_at,
                1 AS has_embedding
         FROM memory_entries m
         JOIN embeddings e ON e.memory_id = m.id
         WHERE m.user_id = ?
           AND (m.organization_id = ? OR (m.organization_id IS NULL AND ? IS NULL))",
    );

    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(scope.user_id.clone()),
        Box::new(scope.organization_id.clone()),
        Box::new(scope.organization_id.clone()),
    ];

    let status = options.status.unwrap_or(MemoryStatus::Active);
    sql.push_str(" AND m.status = ?");
    values.push(Box::new(status.as_str().to_string()));

    if let Some(ref types) = options.memory_types {
        if !types.is_empty() {
            let placeholders: Vec<&str> = types.iter().map(|_| "?").collect();
            sql.push_str(&format!(
                " AND m.memory_type IN ({})",
                placeholders.join(", ")
            ));
            for t in types {
                values.push(Box::new(t.as_str().to_string()));
            }
        }
    }

    if let Some(topic_id) = options.topic_id {
        sql.push_str(" AND m.topic_id = ?");
        values.push(Box::new(topic_id));
    }

    if let Some(ref project_ref) = options.project_ref {
        sql.push_str(" AND m.project_ref = ?");
        values.push(Box::new(project_ref.clone()));
    }

    if let Some(ref tags) = options.tags {
        if !tags.is_empty() {
            sql.push_str(
                " AND m.id IN (
                    SELECT mt.memory_id FROM memory_tags mt
                    JOIN tags t ON mt.tag_id = t.id
                    WHERE t.name IN (",
            );
            let placeholders: Vec<&str> = tags.iter().map(|_| "?").collect();
            sql.push_str(&placeholders.join(", "));
            sql.push_str("))");
            for tag in tags {
                values.push(Box::new(tag.clone()));
            }
        }
    }

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();

    let candidates: Vec<MemoryEntry> = stmt
        .query_map(param_refs.as_slice(), entry_from_row)?
        .filter_map(|r| r.ok())
        .collect();

    tracing::debug!(candidates = candidates.len(), "similarity search candidates");

    let mut scored: Vec<ScoredMemory> = Vec::new();
    for mut memory in candidates {
        if let Some(embedding) = get_embedding(conn, memory.id)? {
            let score = cosine_similarity(query_embedding, &embedding);
            if score >= params.threshold {
                memory.tags = load_tags(conn, memory.id).unwrap_or_default();
                scored.push(ScoredMemory { memory, score });
            }
        }
    }

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
    });
    scored.truncate(params.limit as usize);

    Ok(scored)
}
