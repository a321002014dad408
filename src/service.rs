//! Memory lifecycle orchestration
//!
//! `MemoryService` sequences embedding, persistence, search, and the
//! access/version side effects. Each public method is one request-scoped
//! operation; concurrency comes from callers running operations in
//! parallel, with conflicting writes serialized by the storage layer.

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::{MemoriaError, Result};
use crate::search::semantic_search;
use crate::storage::{queries, topics, Storage};
use crate::types::*;

/// Bulk deletes are processed in fixed-size batches to bound transaction
/// size; one failed batch does not abort the rest.
pub const BULK_DELETE_BATCH_SIZE: usize = 50;

/// Facade over the memory store, the embedder, and the search engine
///
/// Holds one long-lived storage handle and one embedder, injected at
/// construction.
pub struct MemoryService {
    storage: Storage,
    embedder: Arc<dyn Embedder>,
}

impl MemoryService {
    pub fn new(storage: Storage, embedder: Arc<dyn Embedder>) -> Self {
        Self { storage, embedder }
    }

    /// Access the underlying storage handle
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Create a memory: validate, embed the content, persist
    ///
    /// A failed embedding aborts the operation; no partial record is
    /// written.
    pub fn create_memory(
        &self,
        scope: &TenantScope,
        input: CreateMemoryInput,
    ) -> Result<MemoryEntry> {
        input.validate()?;

        let embedding = self.embedder.embed(&input.content)?;
        let model = self.embedder.model_name().to_string();

        self.storage
            .with_transaction(|conn| queries::insert_memory(conn, scope, &input, &embedding, &model))
    }

    /// Get a memory by id, recording the access
    ///
    /// Access tracking is non-critical: a failure is logged and suppressed,
    /// never failing the read.
    pub fn get_memory(&self, scope: &TenantScope, id: MemoryId) -> Result<MemoryEntry> {
        let memory = self
            .storage
            .with_connection(|conn| queries::get_memory(conn, scope, id))?;

        if let Err(e) = self
            .storage
            .with_connection(|conn| queries::record_access(conn, id))
        {
            tracing::warn!(memory_id = id, error = %e, "failed to record memory access");
        }

        Ok(memory)
    }

    /// Update a memory, re-embedding when the content changed
    ///
    /// The store appends a version snapshot for content-affecting updates,
    /// atomically with the update itself.
    pub fn update_memory(
        &self,
        scope: &TenantScope,
        id: MemoryId,
        input: UpdateMemoryInput,
    ) -> Result<MemoryEntry> {
        input.validate()?;

        let new_embedding = match input.content {
            Some(ref content) => Some((self.embedder.embed(content)?, self.embedder.model_name().to_string())),
            None => None,
        };

        self.storage.with_transaction(|conn| {
            let embedding_ref = new_embedding
                .as_ref()
                .map(|(vec, model)| (vec.as_slice(), model.as_str()));
            queries::update_memory(conn, scope, id, &input, embedding_ref)
        })
    }

    /// Soft-delete a memory; no embedding or versioning side effects
    pub fn delete_memory(&self, scope: &TenantScope, id: MemoryId) -> Result<()> {
        self.storage
            .with_transaction(|conn| queries::soft_delete_memory(conn, scope, id))
    }

    /// Bulk soft-delete, tolerant of partial failure
    ///
    /// Ids are processed in batches of [`BULK_DELETE_BATCH_SIZE`], each in
    /// its own transaction. A batch that fails as a whole records all of its
    /// ids as failed and processing continues with the next batch. Every
    /// requested id ends up in exactly one bucket:
    /// `deleted_count + failed_ids.len() == ids.len()`.
    pub fn bulk_delete_memories(
        &self,
        scope: &TenantScope,
        ids: &[MemoryId],
    ) -> Result<BulkDeleteResult> {
        let mut result = BulkDeleteResult::default();

        for batch in ids.chunks(BULK_DELETE_BATCH_SIZE) {
            match self
                .storage
                .with_transaction(|conn| queries::soft_delete_many(conn, scope, batch))
            {
                Ok((deleted, failed)) => {
                    result.deleted_count += deleted;
                    result.failed_ids.extend(failed);
                }
                Err(e) => {
                    tracing::warn!(batch_len = batch.len(), error = %e, "bulk delete batch failed");
                    result.failed_ids.extend_from_slice(batch);
                }
            }
        }

        Ok(result)
    }

    /// Search memories by semantic similarity
    ///
    /// Embeds the query, then delegates ranking to the search engine.
    pub fn search_memories(
        &self,
        scope: &TenantScope,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<ScoredMemory>> {
        if query.trim().is_empty() {
            return Err(MemoriaError::InvalidInput(
                "Search query cannot be empty".to_string(),
            ));
        }

        let query_embedding = self.embedder.embed(query)?;

        self.storage
            .with_connection(|conn| semantic_search(conn, &query_embedding, scope, &options))
    }

    /// List memories with filters and pagination; returns (page, total)
    pub fn list_memories(
        &self,
        scope: &TenantScope,
        options: ListOptions,
    ) -> Result<(Vec<MemoryEntry>, i64)> {
        self.storage
            .with_connection(|conn| queries::list_memories(conn, scope, &options))
    }

    /// List the version history of a memory, oldest first
    pub fn list_versions(&self, scope: &TenantScope, id: MemoryId) -> Result<Vec<MemoryVersion>> {
        self.storage
            .with_connection(|conn| queries::list_versions(conn, scope, id))
    }

    /// Create a topic
    pub fn create_topic(&self, scope: &TenantScope, input: CreateTopicInput) -> Result<MemoryTopic> {
        input.validate()?;
        self.storage
            .with_transaction(|conn| topics::create_topic(conn, scope, &input))
    }

    /// Get a topic by id
    pub fn get_topic(&self, scope: &TenantScope, id: TopicId) -> Result<MemoryTopic> {
        self.storage
            .with_connection(|conn| topics::get_topic(conn, scope, id))
    }

    /// Update a topic
    pub fn update_topic(
        &self,
        scope: &TenantScope,
        id: TopicId,
        input: UpdateTopicInput,
    ) -> Result<MemoryTopic> {
        input.validate()?;
        self.storage
            .with_transaction(|conn| topics::update_topic(conn, scope, id, &input))
    }

    /// Delete a topic, detaching its memories
    pub fn delete_topic(&self, scope: &TenantScope, id: TopicId) -> Result<()> {
        self.storage
            .with_transaction(|conn| topics::delete_topic(conn, scope, id))
    }

    /// List topics for the tenant
    pub fn list_topics(&self, scope: &TenantScope) -> Result<Vec<MemoryTopic>> {
        self.storage
            .with_connection(|conn| topics::list_topics(conn, scope))
    }

    /// Storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        let mut stats = self.storage.with_connection(queries::get_stats)?;
        stats.db_size_bytes = self.storage.db_size().ok();
        Ok(stats)
    }
}
