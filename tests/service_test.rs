//! End-to-end tests for the memory lifecycle
//!
//! Runs the full service against in-memory SQLite with the deterministic
//! hashing embedder, so similarity scores are exact and repeatable.
//!
//! Run with: cargo test --test service_test

use std::sync::Arc;

use pretty_assertions::assert_eq;

use memoria::embedding::HashingEmbedder;
use memoria::storage::queries;
use memoria::{
    CreateMemoryInput, CreateTopicInput, ListOptions, MemoriaError, MemoryService, MemoryStatus,
    MemoryType, SearchOptions, Storage, TenantScope, UpdateMemoryInput,
};

const DIMENSIONS: usize = 1536;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn service() -> MemoryService {
    init_tracing();
    let storage = Storage::open_in_memory().unwrap();
    MemoryService::new(storage, Arc::new(HashingEmbedder::new(DIMENSIONS)))
}

fn scope() -> TenantScope {
    TenantScope::org("user-1", "org-1")
}

fn note(title: &str, content: &str) -> CreateMemoryInput {
    CreateMemoryInput {
        title: title.to_string(),
        content: content.to_string(),
        memory_type: MemoryType::Context,
        ..Default::default()
    }
}

#[test]
fn create_then_get_roundtrip() {
    let svc = service();
    let scope = scope();

    let mut input = note("Note A", "hello world");
    input.tags = vec!["greeting".to_string()];
    input.summary = Some("a small note".to_string());

    let created = svc.create_memory(&scope, input).unwrap();
    assert!(created.id > 0);
    assert_eq!(created.access_count, 0);
    assert_eq!(created.status, MemoryStatus::Active);
    assert!(created.has_embedding);
    assert!(created.last_accessed_at.is_none());

    // The stored vector has the model's dimensionality
    let embedding = svc
        .storage()
        .with_connection(|conn| queries::get_embedding(conn, created.id))
        .unwrap()
        .unwrap();
    assert_eq!(embedding.len(), DIMENSIONS);

    let fetched = svc.get_memory(&scope, created.id).unwrap();
    assert_eq!(fetched.title, "Note A");
    assert_eq!(fetched.content, "hello world");
    assert_eq!(fetched.summary.as_deref(), Some("a small note"));
    assert_eq!(fetched.tags, vec!["greeting".to_string()]);
    assert_eq!(fetched.user_id, "user-1");
    assert_eq!(fetched.organization_id.as_deref(), Some("org-1"));
}

#[test]
fn search_respects_threshold() {
    let svc = service();
    let scope = scope();

    svc.create_memory(&scope, note("Note A", "hello world"))
        .unwrap();
    svc.create_memory(&scope, note("Note B", "entirely unrelated payload"))
        .unwrap();

    // Identical text embeds to an identical vector: score is exactly 1.0
    let results = svc
        .search_memories(
            &scope,
            "hello world",
            SearchOptions {
                threshold: Some(0.99),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.title, "Note A");
    for r in &results {
        assert!(r.score >= 0.99);
    }
}

#[test]
fn search_scores_ranked_descending() {
    let svc = service();
    let scope = scope();

    svc.create_memory(&scope, note("close", "deploy the staging environment"))
        .unwrap();
    svc.create_memory(&scope, note("far", "thermodynamics of black holes"))
        .unwrap();

    let results = svc
        .search_memories(
            &scope,
            "deploy the staging environment today",
            SearchOptions {
                threshold: Some(0.0),
                ..Default::default()
            },
        )
        .unwrap();

    assert!(!results.is_empty());
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert_eq!(results[0].memory.title, "close");
}

#[test]
fn search_bounds_are_validated() {
    let svc = service();
    let scope = scope();

    let bad = svc.search_memories(
        &scope,
        "q",
        SearchOptions {
            threshold: Some(1.5),
            ..Default::default()
        },
    );
    assert!(matches!(bad, Err(MemoriaError::InvalidInput(_))));

    let bad = svc.search_memories(
        &scope,
        "q",
        SearchOptions {
            limit: Some(101),
            ..Default::default()
        },
    );
    assert!(matches!(bad, Err(MemoriaError::InvalidInput(_))));
}

#[test]
fn update_content_versions_and_reembeds() {
    let svc = service();
    let scope = scope();

    let created = svc
        .create_memory(&scope, note("Note A", "hello world"))
        .unwrap();
    let before = svc
        .storage()
        .with_connection(|conn| queries::get_embedding(conn, created.id))
        .unwrap()
        .unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));
    let updated = svc
        .update_memory(
            &scope,
            created.id,
            UpdateMemoryInput {
                content: Some("goodbye world".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(updated.content, "goodbye world");
    assert!(updated.updated_at > created.updated_at);

    // Exactly one version, numbered 1, holding the pre-update content
    let versions = svc.list_versions(&scope, created.id).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version_number, 1);
    assert_eq!(versions[0].content, "hello world");

    // The stored vector was replaced
    let after = svc
        .storage()
        .with_connection(|conn| queries::get_embedding(conn, created.id))
        .unwrap()
        .unwrap();
    assert_ne!(before, after);
}

#[test]
fn update_without_content_keeps_embedding() {
    let svc = service();
    let scope = scope();

    let created = svc
        .create_memory(&scope, note("Note A", "hello world"))
        .unwrap();
    let before = svc
        .storage()
        .with_connection(|conn| queries::get_embedding(conn, created.id))
        .unwrap()
        .unwrap();

    svc.update_memory(
        &scope,
        created.id,
        UpdateMemoryInput {
            title: Some("Renamed".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    let after = svc
        .storage()
        .with_connection(|conn| queries::get_embedding(conn, created.id))
        .unwrap()
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn version_numbers_are_gapless_across_updates() {
    let svc = service();
    let scope = scope();

    let created = svc.create_memory(&scope, note("N", "v0")).unwrap();

    // Mix of content-affecting and non-affecting updates
    for (i, content_change) in [true, false, true, true, false].iter().enumerate() {
        let input = if *content_change {
            UpdateMemoryInput {
                content: Some(format!("v{}", i + 1)),
                ..Default::default()
            }
        } else {
            UpdateMemoryInput {
                status: Some(MemoryStatus::Active),
                ..Default::default()
            }
        };
        svc.update_memory(&scope, created.id, input).unwrap();
    }

    let versions = svc.list_versions(&scope, created.id).unwrap();
    let numbers: Vec<i64> = versions.iter().map(|v| v.version_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[test]
fn cross_tenant_access_is_not_found() {
    let svc = service();
    let mine = scope();
    let created = svc.create_memory(&mine, note("Secret", "contents")).unwrap();

    // Different org, different user, and org-less user all see nothing
    for other in [
        TenantScope::org("user-1", "org-2"),
        TenantScope::org("user-2", "org-1"),
        TenantScope::user("user-1"),
    ] {
        let get = svc.get_memory(&other, created.id);
        assert!(matches!(get, Err(MemoriaError::NotFound(_))));

        let results = svc
            .search_memories(
                &other,
                "contents",
                SearchOptions {
                    threshold: Some(0.0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(results.is_empty());

        let (listed, total) = svc.list_memories(&other, ListOptions::default()).unwrap();
        assert!(listed.is_empty());
        assert_eq!(total, 0);
    }
}

#[test]
fn soft_delete_hides_from_search_and_list() {
    let svc = service();
    let scope = scope();

    let created = svc
        .create_memory(&scope, note("Ephemeral", "hello world"))
        .unwrap();
    svc.delete_memory(&scope, created.id).unwrap();

    assert!(matches!(
        svc.get_memory(&scope, created.id),
        Err(MemoriaError::NotFound(_))
    ));

    let results = svc
        .search_memories(
            &scope,
            "hello world",
            SearchOptions {
                threshold: Some(0.0),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(results.is_empty());

    let (listed, total) = svc.list_memories(&scope, ListOptions::default()).unwrap();
    assert!(listed.is_empty());
    assert_eq!(total, 0);

    // Explicitly listing deleted entries still finds the row
    let (deleted, total) = svc
        .list_memories(
            &scope,
            ListOptions {
                status: Some(MemoryStatus::Deleted),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(total, 1);

    // Second delete: NotFound, end state unchanged
    assert!(matches!(
        svc.delete_memory(&scope, created.id),
        Err(MemoriaError::NotFound(_))
    ));
}

#[test]
fn bulk_delete_processes_all_batches() {
    let svc = service();
    let scope = scope();

    // 120 requested ids: 110 real, 10 bogus sprinkled mid-range so the
    // second batch sees failures without aborting the third.
    let mut ids = Vec::new();
    for i in 0..110 {
        let m = svc
            .create_memory(&scope, note(&format!("m{}", i), "content"))
            .unwrap();
        ids.push(m.id);
    }
    for i in 0..10 {
        ids.insert(55, 1_000_000 + i);
    }
    assert_eq!(ids.len(), 120);

    let result = svc.bulk_delete_memories(&scope, &ids).unwrap();
    assert_eq!(result.deleted_count, 110);
    assert_eq!(result.failed_ids.len(), 10);
    assert!(result.failed_ids.iter().all(|id| *id >= 1_000_000));
    assert_eq!(result.deleted_count + result.failed_ids.len(), ids.len());

    // Every real id is gone
    let (remaining, total) = svc.list_memories(&scope, ListOptions::default()).unwrap();
    assert!(remaining.is_empty());
    assert_eq!(total, 0);
}

#[test]
fn access_count_is_monotonic() {
    let svc = service();
    let scope = scope();

    let created = svc.create_memory(&scope, note("Counted", "c")).unwrap();

    let mut last = -1i64;
    for _ in 0..5 {
        let m = svc.get_memory(&scope, created.id).unwrap();
        assert!(m.access_count >= last);
        last = m.access_count;
    }
    assert_eq!(last, 4); // the fifth read sees four prior increments
}

#[test]
fn topics_group_and_detach() {
    let svc = service();
    let scope = scope();

    let topic = svc
        .create_topic(
            &scope,
            CreateTopicInput {
                name: "infrastructure".to_string(),
                color: Some("#33AA55".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let mut input = note("Runbook", "how to restart the cluster");
    input.topic_id = Some(topic.id);
    let memory = svc.create_memory(&scope, input).unwrap();
    assert_eq!(memory.topic_id, Some(topic.id));

    // Search restricted to the topic
    let results = svc
        .search_memories(
            &scope,
            "restart the cluster",
            SearchOptions {
                threshold: Some(0.0),
                topic_id: Some(topic.id),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(results.len(), 1);

    // Deleting the topic detaches the memory instead of deleting it
    svc.delete_topic(&scope, topic.id).unwrap();
    let fetched = svc.get_memory(&scope, memory.id).unwrap();
    assert_eq!(fetched.topic_id, None);
}

#[test]
fn topic_color_is_validated() {
    let svc = service();
    let result = svc.create_topic(
        &scope(),
        CreateTopicInput {
            name: "bad".to_string(),
            color: Some("green".to_string()),
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(MemoriaError::InvalidInput(_))));
}

#[test]
fn attach_to_foreign_topic_is_rejected() {
    let svc = service();
    let mine = scope();
    let theirs = TenantScope::user("someone-else");

    let foreign_topic = svc
        .create_topic(
            &theirs,
            CreateTopicInput {
                name: "private".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

    let mut input = note("Sneaky", "c");
    input.topic_id = Some(foreign_topic.id);
    let result = svc.create_memory(&mine, input);
    assert!(matches!(result, Err(MemoriaError::TopicNotFound(_))));
}

#[test]
fn metadata_passes_through_verbatim() {
    let svc = service();
    let scope = scope();

    let mut input = note("Meta", "c");
    input.metadata.insert(
        "nested".to_string(),
        serde_json::json!({"k": [1, 2, {"deep": true}]}),
    );
    input
        .metadata
        .insert("plain".to_string(), serde_json::json!("value"));

    let created = svc.create_memory(&scope, input).unwrap();
    let fetched = svc.get_memory(&scope, created.id).unwrap();

    assert_eq!(
        fetched.metadata.get("nested"),
        Some(&serde_json::json!({"k": [1, 2, {"deep": true}]}))
    );
    assert_eq!(
        fetched.metadata.get("plain"),
        Some(&serde_json::json!("value"))
    );
}

#[test]
fn stats_reflect_activity() {
    let svc = service();
    let scope = scope();

    let m = svc.create_memory(&scope, note("One", "c")).unwrap();
    svc.update_memory(
        &scope,
        m.id,
        UpdateMemoryInput {
            content: Some("c2".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    svc.create_topic(
        &scope,
        CreateTopicInput {
            name: "t".to_string(),
            ..Default::default()
        },
    )
    .unwrap();

    let stats = svc.stats().unwrap();
    assert_eq!(stats.total_memories, 1);
    assert_eq!(stats.total_versions, 1);
    assert_eq!(stats.total_topics, 1);
    assert_eq!(stats.memories_with_embeddings, 1);
}
