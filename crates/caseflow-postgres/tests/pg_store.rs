//! `PgStore` against a live PostgreSQL server.
//!
//! Each test gets a fresh database with `migrations/` applied. Run with
//! `DATABASE_URL=postgres://... cargo test -p caseflow-postgres -- --ignored`.

use caseflow::{
    AdvanceRequest, AuditAction, AuditLog, AuditStore, DomainEvent, FailureDisposition,
    InstanceStore, OutboxEvent, OutboxStore, TenantScope, TriggerMatcher, TriggerQuery,
    TriggerStore, WorkflowEngine, WorkflowInstance, WorkflowTrigger,
};
use caseflow_postgres::PgStore;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

fn case_created(tenant: &str, subject: &str) -> DomainEvent {
    DomainEvent::new(
        "case.created",
        json!({"subjectSchema": "service", "subjectModel": "Case", "subjectId": subject}),
    )
    .with_tenant(tenant)
}

fn topics(events: &[OutboxEvent]) -> Vec<&str> {
    events.iter().map(|e| e.topic.as_str()).collect()
}

async fn insert_outbox_at(pool: &PgPool, topic: &str, created_at: DateTime<Utc>) {
    sqlx::query(
        "INSERT INTO outbox_events (id, topic, payload, created_at) VALUES ($1, $2, '{}', $3)",
    )
    .bind(Uuid::new_v4())
    .bind(topic)
    .bind(created_at)
    .execute(pool)
    .await
    .unwrap();
}

/// Transitions are `(from, to, position)`.
async fn seed_workflow(
    pool: &PgPool,
    id: &str,
    definition: Value,
    transitions: &[(&str, &str, i32)],
) {
    sqlx::query("INSERT INTO workflows (id, name, definition) VALUES ($1, $1, $2)")
        .bind(id)
        .bind(definition)
        .execute(pool)
        .await
        .unwrap();

    for (from, to, position) in transitions {
        sqlx::query(
            r#"
            INSERT INTO workflow_transitions (workflow_id, from_state_key, to_state_key, position)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(position)
        .execute(pool)
        .await
        .unwrap();
    }
}

async fn seed_trigger(pool: &PgPool, trigger: &WorkflowTrigger) {
    sqlx::query(
        r#"
        INSERT INTO workflow_triggers
            (id, tenant_id, subject_schema, subject_model, event_key, active, workflow_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&trigger.id)
    .bind(trigger.tenant_id.as_deref())
    .bind(&trigger.subject_schema)
    .bind(&trigger.subject_model)
    .bind(&trigger.event_key)
    .bind(trigger.active)
    .bind(&trigger.workflow_id)
    .execute(pool)
    .await
    .unwrap();
}

fn trigger(id: &str, tenant: Option<&str>, event_key: &str, active: bool) -> WorkflowTrigger {
    WorkflowTrigger {
        id: id.into(),
        tenant_id: tenant.map(str::to_string),
        subject_schema: "service".into(),
        subject_model: "Case".into(),
        event_key: event_key.into(),
        active,
        workflow_id: "wf1".into(),
    }
}

fn instance() -> WorkflowInstance {
    let now = Utc::now();
    WorkflowInstance {
        id: Uuid::new_v4(),
        workflow_id: "wf1".into(),
        tenant_id: Some("t1".into()),
        subject_schema: "service".into(),
        subject_model: "Case".into(),
        subject_id: "c1".into(),
        state_key: "open".into(),
        created_at: now,
        updated_at: now,
    }
}

async fn audit_rows(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn claimed_events_are_hidden_until_the_lease_expires(pool: PgPool) {
    let worker_a = PgStore::with_lease_timeout(pool.clone(), 500);
    let worker_b = PgStore::with_lease_timeout(pool, 500);
    let done = worker_a.enqueue(case_created("t1", "c1")).await.unwrap();
    let abandoned = worker_a.enqueue(case_created("t1", "c2")).await.unwrap();

    assert_eq!(worker_a.list_unprocessed(10).await.unwrap().len(), 2);
    assert!(worker_b.list_unprocessed(10).await.unwrap().is_empty());

    worker_a.mark_processed(done.id).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(800)).await;

    let reclaimed = worker_b.list_unprocessed(10).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, abandoned.id);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn claims_come_back_oldest_first(pool: PgPool) {
    let store = PgStore::new(pool);
    let now = Utc::now();
    insert_outbox_at(store.pool(), "late", now).await;
    insert_outbox_at(store.pool(), "early", now - Duration::seconds(10)).await;
    insert_outbox_at(store.pool(), "tie-a", now - Duration::seconds(5)).await;
    insert_outbox_at(store.pool(), "tie-b", now - Duration::seconds(5)).await;

    let claimed = store.list_unprocessed(3).await.unwrap();

    assert_eq!(topics(&claimed), vec!["early", "tie-a", "tie-b"]);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn failed_events_are_scheduled_or_dead_lettered(pool: PgPool) {
    let store = PgStore::new(pool);
    let later = store.enqueue(case_created("t1", "c1")).await.unwrap();
    let dead = store.enqueue(case_created("t1", "c2")).await.unwrap();
    let again = store.enqueue(case_created("t1", "c3")).await.unwrap();
    assert_eq!(store.list_unprocessed(10).await.unwrap().len(), 3);

    store
        .mark_failed(
            later.id,
            "busy",
            FailureDisposition::Retry {
                not_before: Some(Utc::now() + Duration::minutes(5)),
            },
        )
        .await
        .unwrap();
    store
        .mark_failed(dead.id, "bad payload", FailureDisposition::DeadLetter)
        .await
        .unwrap();
    store
        .mark_failed(again.id, "flaky", FailureDisposition::Retry { not_before: None })
        .await
        .unwrap();

    let due = store.list_unprocessed(10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, again.id);
    assert_eq!(due[0].attempts, 1);
    assert_eq!(due[0].last_error.as_deref(), Some("flaky"));
    assert!(due[0].processed_at.is_none());

    let stats = store.stats().await.unwrap();
    assert_eq!((stats.pending, stats.failing), (2, 2));
    assert_eq!((stats.processed, stats.dead_letter), (0, 1));

    assert!(store.mark_processed(Uuid::new_v4()).await.is_err());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn trigger_lookup_agrees_with_query_matching(pool: PgPool) {
    let store = PgStore::new(pool.clone());
    seed_workflow(&pool, "wf1", json!({}), &[]).await;
    let triggers = vec![
        trigger("scoped-t1", Some("t1"), "case.created", true),
        trigger("scoped-t2", Some("t2"), "case.created", true),
        trigger("global", None, "case.created", true),
        trigger("inactive", None, "case.created", false),
        trigger("closed-t1", Some("t1"), "case.closed", true),
    ];
    for t in &triggers {
        seed_trigger(&pool, t).await;
    }

    for scope in [TenantScope::GlobalFallback, TenantScope::Exact] {
        for tenant in [Some("t1"), Some("t2"), Some("t3"), None] {
            let query = TriggerQuery {
                tenant_id: tenant,
                subject_schema: "service",
                subject_model: "Case",
                event_key: "case.created",
                scope,
            };

            let mut expected: Vec<_> = triggers
                .iter()
                .filter(|t| query.matches(t))
                .map(|t| t.id.clone())
                .collect();
            expected.sort();
            let mut found: Vec<_> = store
                .find_active(&query)
                .await
                .unwrap()
                .into_iter()
                .map(|t| t.id)
                .collect();
            found.sort();

            assert_eq!(found, expected, "scope {scope:?}, tenant {tenant:?}");
        }
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn rejected_instance_writes_leave_no_audit(pool: PgPool) {
    let store = PgStore::new(pool.clone());
    let existing = instance();
    let start = AuditLog::for_instance(None, AuditAction::WorkflowStart, existing.id);
    store.create_instance(&existing, &start).await.unwrap();

    let duplicate = AuditLog::for_instance(None, AuditAction::WorkflowStart, existing.id);
    assert!(store.create_instance(&existing, &duplicate).await.is_err());

    let missing = instance();
    let advance = AuditLog::for_instance(None, AuditAction::WorkflowAdvance, missing.id);
    assert!(store.update_instance_state(&missing, &advance).await.is_err());

    assert_eq!(audit_rows(&pool).await, 1);
    let trail = store
        .list_for_target("WorkflowInstance", &existing.id.to_string())
        .await
        .unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].id, start.id);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn matched_event_starts_and_advances_by_position(pool: PgPool) {
    // Inserted out of order: position decides, not insertion.
    seed_workflow(
        &pool,
        "wf1",
        json!({"entry": "triage"}),
        &[("triage", "rejected", 1), ("triage", "review", 0), ("review", "done", 0)],
    )
    .await;
    seed_trigger(&pool, &trigger("trg1", None, "case.created", true)).await;

    let store = Arc::new(PgStore::new(pool.clone()));
    let engine = WorkflowEngine::from_store(store.clone());
    let matcher = TriggerMatcher::new(store.clone(), store.clone(), engine.clone());

    let started = matcher
        .handle_domain_event(&case_created("t1", "c1"))
        .await
        .unwrap();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].state_key, "triage");
    assert_eq!(started[0].tenant_id.as_deref(), Some("t1"));

    let id = started[0].id;
    let moved = engine.advance(AdvanceRequest::new(id)).await.unwrap();
    assert_eq!(moved.state_key, "review");
    assert_eq!(engine.get_instance(id).await.unwrap().state_key, "review");

    let trail = engine.audit_trail(id).await.unwrap();
    let actions: Vec<_> = trail.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::WorkflowStart, AuditAction::WorkflowAdvance]);
    assert_eq!(trail[1].detail, Some(json!({"from": "triage", "to": "review"})));
    assert_eq!(audit_rows(&pool).await, 2);
}
