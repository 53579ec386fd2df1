//! Outbox → trigger → workflow, end to end over the in-memory store.

use caseflow::{AdvanceRequest, AuditAction, DomainEvent, StartRequest, TenantScope, WorkflowError};
use caseflow_outbox::{DrainConfig, OutboxPoller};
use caseflow_testing::fixtures::{case_created, case_workflow, subject_payload, trigger, with_entry};
use caseflow_testing::TestHarness;
use uuid::Uuid;

fn poller(harness: &TestHarness) -> OutboxPoller {
    OutboxPoller::new(
        harness.store.clone(),
        harness.matcher.clone(),
        DrainConfig::default(),
    )
}

#[tokio::test]
async fn matching_event_starts_workflow_at_open() {
    let harness = TestHarness::new()
        .workflow(case_workflow("wf1"))
        .trigger(trigger("trg1", Some("t1"), "wf1"));
    let event = harness.enqueue(case_created("t1", "c1")).await;

    let report = poller(&harness).drain_once().await;
    assert_eq!(report.processed, 1);

    let instances = harness.store.instances();
    assert_eq!(instances.len(), 1);
    let instance = &instances[0];
    assert_eq!(instance.workflow_id, "wf1");
    assert_eq!(instance.state_key, "open");
    assert_eq!(instance.tenant_id.as_deref(), Some("t1"));
    assert_eq!(instance.subject_id, "c1");

    let audit = harness.store.audit_entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::WorkflowStart);
    assert_eq!(audit[0].target_id, instance.id.to_string());

    let row = harness.store.outbox_event(event.id).unwrap();
    assert!(row.processed_at.is_some());
    assert_eq!(row.attempts, 1);
}

#[tokio::test]
async fn advance_walks_to_terminal_state() {
    let harness = TestHarness::new().workflow(case_workflow("wf1"));
    let instance = harness
        .engine
        .start(StartRequest::new("wf1", "service", "Case", "c1", "open"))
        .await
        .unwrap();

    let mut states = Vec::new();
    for _ in 0..3 {
        let step = harness
            .engine
            .advance(AdvanceRequest::new(instance.id))
            .await
            .unwrap();
        states.push(step.state_key);
    }

    assert_eq!(states, vec!["in_progress", "resolved", "resolved"]);
    // start + two effective advances; the terminal no-op is not audited
    assert_eq!(harness.engine.audit_trail(instance.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn advance_selection_is_deterministic() {
    let harness = TestHarness::new().workflow(caseflow_testing::fixtures::workflow(
        "wf1",
        &[("open", "review"), ("open", "rejected"), ("review", "done")],
    ));

    let mut next_states = Vec::new();
    for subject in ["c1", "c2", "c3"] {
        let instance = harness
            .engine
            .start(StartRequest::new("wf1", "service", "Case", subject, "open"))
            .await
            .unwrap();
        let step = harness
            .engine
            .advance(AdvanceRequest::new(instance.id))
            .await
            .unwrap();
        next_states.push(step.state_key);
    }

    assert_eq!(next_states, vec!["review", "review", "review"]);
}

#[tokio::test]
async fn advance_unknown_instance_changes_nothing() {
    let harness = TestHarness::new().workflow(case_workflow("wf1"));
    let unknown = Uuid::new_v4();

    let err = harness
        .engine
        .advance(AdvanceRequest::new(unknown))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::InstanceNotFound(id) if id == unknown));
    assert!(harness.store.instances().is_empty());
    assert!(harness.store.audit_entries().is_empty());
}

#[tokio::test]
async fn custom_entry_and_global_triggers() {
    let harness = TestHarness::new()
        .workflow(case_workflow("wf1"))
        .workflow(with_entry(case_workflow("wf2"), "in_progress"))
        .trigger(trigger("tenant", Some("t1"), "wf1"))
        .trigger(trigger("global", None, "wf2"));
    harness.enqueue(case_created("t1", "c1")).await;
    harness.enqueue(case_created("t2", "c2")).await;

    poller(&harness).drain_once().await;

    let mut started: Vec<_> = harness
        .store
        .instances()
        .into_iter()
        .map(|i| (i.subject_id, i.workflow_id, i.state_key))
        .collect();
    started.sort();
    assert_eq!(
        started,
        vec![
            ("c1".to_string(), "wf1".to_string(), "open".to_string()),
            ("c1".to_string(), "wf2".to_string(), "in_progress".to_string()),
            ("c2".to_string(), "wf2".to_string(), "in_progress".to_string()),
        ]
    );
}

#[tokio::test]
async fn exact_scope_harness_ignores_global_triggers() {
    let harness = TestHarness::with_tenant_scope(TenantScope::Exact)
        .workflow(case_workflow("wf1"))
        .trigger(trigger("global", None, "wf1"));
    harness.enqueue(case_created("t1", "c1")).await;

    let report = poller(&harness).drain_once().await;

    assert_eq!(report.processed, 1);
    assert!(harness.store.instances().is_empty());
}

#[tokio::test]
async fn unrelated_events_are_processed_without_starts() {
    let harness = TestHarness::new()
        .workflow(case_workflow("wf1"))
        .trigger(trigger("trg1", Some("t1"), "wf1"));
    harness
        .enqueue(DomainEvent::new("invoice.paid", subject_payload("billing", "Invoice", "i1")).with_tenant("t1"))
        .await;
    harness
        .enqueue(DomainEvent::new("case.created", serde_json::json!({"note": "no subject"})))
        .await;

    let report = poller(&harness).drain_once().await;

    assert_eq!(report.processed, 2);
    assert!(harness.store.instances().is_empty());
}

#[tokio::test]
async fn trigger_with_missing_workflow_is_dead_lettered() {
    let harness = TestHarness::new().trigger(trigger("trg1", Some("t1"), "wf-missing"));
    let event = harness.enqueue(case_created("t1", "c1")).await;

    let report = poller(&harness).drain_once().await;

    assert_eq!(report.dead_lettered, 1);
    let row = harness.store.outbox_event(event.id).unwrap();
    assert!(row.dead_lettered_at.is_some());
    assert!(row.processed_at.is_none());
    assert_eq!(
        row.last_error.as_deref(),
        Some("trigger trg1 references missing workflow wf-missing")
    );
}
