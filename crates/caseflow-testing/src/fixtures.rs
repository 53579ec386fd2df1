//! Ready-made records for tests.
//!
//! Defaults follow a service desk: subject `service`/`Case`, event
//! `case.created`.

use caseflow::{DomainEvent, Workflow, WorkflowState, WorkflowTransition, WorkflowTrigger};
use serde_json::{json, Value};

pub const SUBJECT_SCHEMA: &str = "service";
pub const SUBJECT_MODEL: &str = "Case";
pub const CASE_CREATED: &str = "case.created";

/// A workflow with the given ordered transitions and no explicit entry.
///
/// States are derived from the transition keys in first-seen order; the
/// last one is marked terminal.
pub fn workflow(id: &str, transitions: &[(&str, &str)]) -> Workflow {
    let mut keys: Vec<&str> = Vec::new();
    for (from, to) in transitions {
        for key in [*from, *to] {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    let last = keys.len().saturating_sub(1);

    Workflow {
        id: id.to_string(),
        name: id.to_string(),
        definition: json!({}),
        states: keys
            .iter()
            .enumerate()
            .map(|(i, key)| WorkflowState {
                key: key.to_string(),
                name: key.replace('_', " "),
                terminal: i == last,
            })
            .collect(),
        transitions: transitions
            .iter()
            .map(|(from, to)| WorkflowTransition::new(*from, *to))
            .collect(),
    }
}

/// `open → in_progress → resolved`.
pub fn case_workflow(id: &str) -> Workflow {
    workflow(id, &[("open", "in_progress"), ("in_progress", "resolved")])
}

/// Set `definition.entry` on a workflow.
pub fn with_entry(mut workflow: Workflow, entry: &str) -> Workflow {
    workflow.definition = json!({ "entry": entry });
    workflow
}

/// An active `service`/`Case`/`case.created` trigger.
pub fn trigger(id: &str, tenant_id: Option<&str>, workflow_id: &str) -> WorkflowTrigger {
    WorkflowTrigger {
        id: id.to_string(),
        tenant_id: tenant_id.map(str::to_string),
        subject_schema: SUBJECT_SCHEMA.to_string(),
        subject_model: SUBJECT_MODEL.to_string(),
        event_key: CASE_CREATED.to_string(),
        active: true,
        workflow_id: workflow_id.to_string(),
    }
}

pub fn subject_payload(schema: &str, model: &str, id: &str) -> Value {
    json!({ "subjectSchema": schema, "subjectModel": model, "subjectId": id })
}

/// `case.created` for case `subject_id` in `tenant_id`.
pub fn case_created(tenant_id: &str, subject_id: &str) -> DomainEvent {
    DomainEvent::new(
        CASE_CREATED,
        subject_payload(SUBJECT_SCHEMA, SUBJECT_MODEL, subject_id),
    )
    .with_tenant(tenant_id)
}
