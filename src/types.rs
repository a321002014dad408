//! Core types for Memoria

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MemoriaError, Result};

/// Unique identifier for a memory entry
pub type MemoryId = i64;

/// Unique identifier for a topic
pub type TopicId = i64;

/// Maximum title length in characters
pub const MAX_TITLE_LENGTH: usize = 500;

/// Maximum content length in characters
pub const MAX_CONTENT_LENGTH: usize = 50_000;

/// Maximum summary length in characters
pub const MAX_SUMMARY_LENGTH: usize = 1_000;

/// Maximum number of tags per memory
pub const MAX_TAGS: usize = 20;

/// Maximum length of a single tag in characters
pub const MAX_TAG_LENGTH: usize = 50;

/// Default similarity threshold for search
pub const DEFAULT_SEARCH_THRESHOLD: f32 = 0.7;

/// Default result limit for search
pub const DEFAULT_SEARCH_LIMIT: i64 = 20;

/// Maximum result limit for search
pub const MAX_SEARCH_LIMIT: i64 = 100;

static COLOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").unwrap());

/// Tenant scope for data isolation
///
/// Every read and write is constrained to a single tenant. A memory's scope
/// is fixed at creation; queries that name an id outside the caller's scope
/// behave exactly like a missing id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantScope {
    /// Owning user
    pub user_id: String,
    /// Owning organization, when the user acts within one
    pub organization_id: Option<String>,
}

impl TenantScope {
    /// Scope for a standalone user
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: None,
        }
    }

    /// Scope for a user within an organization
    pub fn org(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: Some(organization_id.into()),
        }
    }
}

/// Memory type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    #[default]
    Context,
    Project,
    Knowledge,
    Reference,
    Personal,
    Workflow,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Context => "context",
            MemoryType::Project => "project",
            MemoryType::Knowledge => "knowledge",
            MemoryType::Reference => "reference",
            MemoryType::Personal => "personal",
            MemoryType::Workflow => "workflow",
        }
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "context" => Ok(MemoryType::Context),
            "project" => Ok(MemoryType::Project),
            "knowledge" => Ok(MemoryType::Knowledge),
            "reference" => Ok(MemoryType::Reference),
            "personal" => Ok(MemoryType::Personal),
            "workflow" => Ok(MemoryType::Workflow),
            _ => Err(format!("Unknown memory type: {}", s)),
        }
    }
}

/// Lifecycle status of a memory entry
///
/// `Deleted` is a soft state: the row stays in the store but is excluded
/// from search and from default listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    #[default]
    Active,
    Archived,
    Draft,
    Deleted,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Active => "active",
            MemoryStatus::Archived => "archived",
            MemoryStatus::Draft => "draft",
            MemoryStatus::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for MemoryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(MemoryStatus::Active),
            "archived" => Ok(MemoryStatus::Archived),
            "draft" => Ok(MemoryStatus::Draft),
            "deleted" => Ok(MemoryStatus::Deleted),
            _ => Err(format!("Unknown memory status: {}", s)),
        }
    }
}

impl std::fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A memory entry in the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique identifier, assigned by the store
    pub id: MemoryId,
    /// Short title (1-500 chars)
    pub title: String,
    /// Main content (1-50,000 chars)
    pub content: String,
    /// Optional summary (up to 1,000 chars)
    pub summary: Option<String>,
    /// Memory type
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    /// Lifecycle status
    #[serde(default)]
    pub status: MemoryStatus,
    /// Tags for categorization (order irrelevant)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Grouping topic, if any
    pub topic_id: Option<TopicId>,
    /// Free-text project scope
    pub project_ref: Option<String>,
    /// Owning user
    pub user_id: String,
    /// Owning organization
    pub organization_id: Option<String>,
    /// Arbitrary metadata, passed through verbatim
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Number of times the entry was read
    #[serde(default)]
    pub access_count: i64,
    /// When the entry was last read
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Whether an embedding vector is stored for this entry
    #[serde(default)]
    pub has_embedding: bool,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// When the entry was last mutated
    pub updated_at: DateTime<Utc>,
}

/// An immutable snapshot of a memory's content-bearing fields
///
/// One row is appended per content-affecting update; `version_number` is
/// gapless from 1 per memory. Version N records the state the entry had
/// before update N.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryVersion {
    pub id: i64,
    pub memory_id: MemoryId,
    /// 1, 2, 3, ... without gaps
    pub version_number: i64,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub tags: Vec<String>,
    pub topic_id: Option<TopicId>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Who performed the update that produced this snapshot
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A named grouping of memories, tenant-scoped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryTopic {
    pub id: TopicId,
    /// Unique per tenant
    pub name: String,
    pub description: Option<String>,
    /// `#RRGGBB` when present
    pub color: Option<String>,
    /// Parent topic for hierarchies; the store rejects cycles
    pub parent_topic_id: Option<TopicId>,
    pub user_id: String,
    pub organization_id: Option<String>,
    /// Built-in topics cannot be deleted
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new memory
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateMemoryInput {
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    #[serde(default, alias = "type")]
    pub memory_type: MemoryType,
    #[serde(default)]
    pub status: MemoryStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    pub topic_id: Option<TopicId>,
    pub project_ref: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CreateMemoryInput {
    /// Validate field bounds before any side effect
    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        validate_content(&self.content)?;
        if let Some(ref summary) = self.summary {
            validate_summary(summary)?;
        }
        validate_tags(&self.tags)?;
        if self.status == MemoryStatus::Deleted {
            return Err(MemoriaError::InvalidInput(
                "Cannot create a memory with status 'deleted'".to_string(),
            ));
        }
        Ok(())
    }
}

/// Input for updating a memory
///
/// Only supplied fields are mutated. Two-level options (`Some(None)`) clear
/// a nullable field.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateMemoryInput {
    pub title: Option<String>,
    pub content: Option<String>,
    /// Use `Some(None)` to clear the summary
    pub summary: Option<Option<String>>,
    #[serde(alias = "type")]
    pub memory_type: Option<MemoryType>,
    pub status: Option<MemoryStatus>,
    pub tags: Option<Vec<String>>,
    /// Use `Some(None)` to detach from the topic
    pub topic_id: Option<Option<TopicId>>,
    /// Use `Some(None)` to clear the project scope
    pub project_ref: Option<Option<String>>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    /// Recorded as `created_by` on the version snapshot, if one is taken
    pub updated_by: Option<String>,
}

impl UpdateMemoryInput {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref title) = self.title {
            validate_title(title)?;
        }
        if let Some(ref content) = self.content {
            validate_content(content)?;
        }
        if let Some(Some(ref summary)) = self.summary {
            validate_summary(summary)?;
        }
        if let Some(ref tags) = self.tags {
            validate_tags(tags)?;
        }
        Ok(())
    }

    /// Whether this update touches a field captured by version snapshots
    pub fn touches_versioned_fields(&self) -> bool {
        self.title.is_some()
            || self.content.is_some()
            || self.memory_type.is_some()
            || self.tags.is_some()
            || self.topic_id.is_some()
            || self.metadata.is_some()
    }

    /// True when no field at all was supplied
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.summary.is_none()
            && self.memory_type.is_none()
            && self.status.is_none()
            && self.tags.is_none()
            && self.topic_id.is_none()
            && self.project_ref.is_none()
            && self.metadata.is_none()
    }
}

/// Input for creating a topic
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateTopicInput {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub parent_topic_id: Option<TopicId>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CreateTopicInput {
    pub fn validate(&self) -> Result<()> {
        validate_topic_name(&self.name)?;
        if let Some(ref color) = self.color {
            validate_color(color)?;
        }
        Ok(())
    }
}

/// Input for updating a topic
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateTopicInput {
    pub name: Option<String>,
    /// Use `Some(None)` to clear
    pub description: Option<Option<String>>,
    /// Use `Some(None)` to clear
    pub color: Option<Option<String>>,
    /// Use `Some(None)` to detach from the parent
    pub parent_topic_id: Option<Option<TopicId>>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl UpdateTopicInput {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref name) = self.name {
            validate_topic_name(name)?;
        }
        if let Some(Some(ref color)) = self.color {
            validate_color(color)?;
        }
        Ok(())
    }
}

/// Fields to sort listings by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    LastAccessedAt,
    AccessCount,
    Title,
}

/// Sort order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Options for listing memories
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOptions {
    /// Restrict to these types (any match)
    #[serde(alias = "types")]
    pub memory_types: Option<Vec<MemoryType>>,
    /// Tag overlap: at least one listed tag must match
    pub tags: Option<Vec<String>>,
    /// Restrict to one topic
    pub topic_id: Option<TopicId>,
    /// Restrict to one project scope
    pub project_ref: Option<String>,
    /// Restrict to one status; `None` means active-only
    pub status: Option<MemoryStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
}

/// Options for similarity search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Restrict to these types (any match)
    #[serde(alias = "types")]
    pub memory_types: Option<Vec<MemoryType>>,
    /// Tag overlap: at least one listed tag must match
    pub tags: Option<Vec<String>>,
    pub topic_id: Option<TopicId>,
    pub project_ref: Option<String>,
    /// Restrict to one status; `None` means active-only
    pub status: Option<MemoryStatus>,
    /// Minimum similarity score, 0-1 (default 0.7); equal-to is included
    pub threshold: Option<f32>,
    /// Result cap, 1-100 (default 20)
    pub limit: Option<i64>,
}

/// A search hit with its similarity score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: MemoryEntry,
    /// `1 - cosine_distance(query, entry)`; higher is more similar
    pub score: f32,
}

/// Result of a bulk delete operation
///
/// Not an error: every requested id lands in exactly one of the two buckets,
/// so `deleted_count + failed_ids.len()` equals the requested count.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BulkDeleteResult {
    pub deleted_count: usize,
    pub failed_ids: Vec<MemoryId>,
}

/// Counts of stored objects
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageStats {
    pub total_memories: i64,
    pub total_versions: i64,
    pub total_topics: i64,
    pub memories_with_embeddings: i64,
    pub db_size_bytes: Option<i64>,
    pub schema_version: i32,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider to use: "openai" or "hashing"
    pub provider: String,
    /// API key (for the openai provider)
    pub api_key: Option<String>,
    /// OpenAI-compatible API base URL
    /// Default: https://api.openai.com/v1
    pub base_url: Option<String>,
    /// Model name override (e.g. "text-embedding-3-small")
    pub model: Option<String>,
    /// Embedding dimensions (must match model output)
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_dimensions() -> usize {
    1536
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            api_key: None,
            base_url: None,
            model: None,
            dimensions: 1536,
            timeout_secs: 30,
        }
    }
}

/// Configuration for the storage engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database, or ":memory:"
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: ":memory:".to_string(),
        }
    }
}

fn validate_title(title: &str) -> Result<()> {
    let len = title.chars().count();
    if len == 0 {
        return Err(MemoriaError::InvalidInput(
            "Title cannot be empty".to_string(),
        ));
    }
    if len > MAX_TITLE_LENGTH {
        return Err(MemoriaError::InvalidInput(format!(
            "Title exceeds {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    Ok(())
}

fn validate_content(content: &str) -> Result<()> {
    let len = content.chars().count();
    if len == 0 {
        return Err(MemoriaError::InvalidInput(
            "Content cannot be empty".to_string(),
        ));
    }
    if len > MAX_CONTENT_LENGTH {
        return Err(MemoriaError::InvalidInput(format!(
            "Content exceeds {} characters",
            MAX_CONTENT_LENGTH
        )));
    }
    Ok(())
}

fn validate_summary(summary: &str) -> Result<()> {
    if summary.chars().count() > MAX_SUMMARY_LENGTH {
        return Err(MemoriaError::InvalidInput(format!(
            "Summary exceeds {} characters",
            MAX_SUMMARY_LENGTH
        )));
    }
    Ok(())
}

/// Validate a tag set: at most 20 tags, each 1-50 non-blank characters
pub fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.len() > MAX_TAGS {
        return Err(MemoriaError::InvalidInput(format!(
            "At most {} tags are allowed",
            MAX_TAGS
        )));
    }
    for tag in tags {
        if tag.trim().is_empty() {
            return Err(MemoriaError::InvalidInput(
                "Tags cannot be blank".to_string(),
            ));
        }
        if tag.chars().count() > MAX_TAG_LENGTH {
            return Err(MemoriaError::InvalidInput(format!(
                "Tag '{}' exceeds {} characters",
                tag, MAX_TAG_LENGTH
            )));
        }
    }
    Ok(())
}

fn validate_topic_name(name: &str) -> Result<()> {
    let len = name.trim().chars().count();
    if len == 0 {
        return Err(MemoriaError::InvalidInput(
            "Topic name cannot be empty".to_string(),
        ));
    }
    if len > 100 {
        return Err(MemoriaError::InvalidInput(
            "Topic name exceeds 100 characters".to_string(),
        ));
    }
    Ok(())
}

/// Validate a topic color against the `#RRGGBB` form
pub fn validate_color(color: &str) -> Result<()> {
    if !COLOR_RE.is_match(color) {
        return Err(MemoriaError::InvalidInput(format!(
            "Color '{}' must match #RRGGBB",
            color
        )));
    }
    Ok(())
}
