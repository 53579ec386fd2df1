//! Records shared by the outbox, trigger matcher and workflow engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Entry state used when a workflow definition does not name one.
pub const DEFAULT_ENTRY_STATE: &str = "open";

// ============================================================================
// Events
// ============================================================================

/// A domain event as written by business modules.
///
/// This is the shape handed from the outbox to the trigger matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub tenant_id: Option<String>,
    pub topic: String,
    pub payload: Value,
}

impl DomainEvent {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            tenant_id: None,
            topic: topic.into(),
            payload,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Subject coordinates carried in the payload, if any.
    pub fn subject(&self) -> SubjectRef {
        SubjectRef::from_payload(&self.payload)
    }
}

/// A row of the outbox: a domain event plus its delivery bookkeeping.
///
/// `processed_at` is only ever set after a successful dispatch and
/// `attempts` counts every dispatch, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    pub topic: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
    /// Earliest time a failed event may be selected again.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Set once the event is classified as permanently failed.
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// A fresh, never dispatched outbox row.
    pub fn pending(event: DomainEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: event.tenant_id,
            topic: event.topic,
            payload: event.payload,
            created_at,
            processed_at: None,
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
            dead_lettered_at: None,
        }
    }

    pub fn domain_event(&self) -> DomainEvent {
        DomainEvent {
            tenant_id: self.tenant_id.clone(),
            topic: self.topic.clone(),
            payload: self.payload.clone(),
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    pub fn is_dead_lettered(&self) -> bool {
        self.dead_lettered_at.is_some()
    }

    /// Whether the drain loop may select this row at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_processed()
            && !self.is_dead_lettered()
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// The business entity an event or instance concerns.
///
/// Extracted leniently from event payloads: a missing or non-scalar field
/// is `None` and simply fails to match triggers expecting it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectRef {
    pub schema: Option<String>,
    pub model: Option<String>,
    pub id: Option<String>,
}

impl SubjectRef {
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            schema: scalar_field(payload, "subjectSchema"),
            model: scalar_field(payload, "subjectModel"),
            id: scalar_field(payload, "subjectId"),
        }
    }
}

fn scalar_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ============================================================================
// Triggers and workflows
// ============================================================================

/// A standing subscription starting `workflow_id` when a matching event arrives.
///
/// A `None` tenant marks a tenant-independent trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTrigger {
    pub id: String,
    pub tenant_id: Option<String>,
    pub subject_schema: String,
    pub subject_model: String,
    pub event_key: String,
    pub active: bool,
    pub workflow_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub key: String,
    pub name: String,
    pub terminal: bool,
}

/// A directed edge of a workflow graph. Order within a workflow matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTransition {
    pub from_state_key: String,
    pub to_state_key: String,
}

impl WorkflowTransition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from_state_key: from.into(),
            to_state_key: to.into(),
        }
    }
}

/// A named state machine definition with its states and ordered transitions.
///
/// Transition keys are not checked against `states`; the engine only ever
/// follows transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub definition: Value,
    pub states: Vec<WorkflowState>,
    pub transitions: Vec<WorkflowTransition>,
}

impl Workflow {
    /// The state new instances start in: `definition.entry`, else `"open"`.
    pub fn entry_state(&self) -> &str {
        self.definition
            .get("entry")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ENTRY_STATE)
    }

    /// First transition, in stored order, leaving `state_key`.
    pub fn next_transition(&self, state_key: &str) -> Option<&WorkflowTransition> {
        self.transitions
            .iter()
            .find(|t| t.from_state_key == state_key)
    }

    pub fn state(&self, key: &str) -> Option<&WorkflowState> {
        self.states.iter().find(|s| s.key == key)
    }
}

// ============================================================================
// Instances
// ============================================================================

/// One execution of a workflow against one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub workflow_id: String,
    pub tenant_id: Option<String>,
    pub subject_schema: String,
    pub subject_model: String,
    pub subject_id: String,
    pub state_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
