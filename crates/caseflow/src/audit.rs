//! Append-only audit trail of workflow actions.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Actor recorded when no caller identity is supplied.
pub const SYSTEM_ACTOR: &str = "system";

/// Target type recorded for workflow instance actions.
pub const INSTANCE_TARGET: &str = "WorkflowInstance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    WorkflowStart,
    WorkflowAdvance,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::WorkflowStart => "WORKFLOW_START",
            AuditAction::WorkflowAdvance => "WORKFLOW_ADVANCE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "WORKFLOW_START" => Ok(AuditAction::WorkflowStart),
            "WORKFLOW_ADVANCE" => Ok(AuditAction::WorkflowAdvance),
            other => Err(anyhow::anyhow!("unknown audit action: {other}")),
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: Uuid,
    pub actor_id: String,
    pub action: AuditAction,
    pub target_type: String,
    pub target_id: String,
    pub detail: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditLog {
    /// Build a record stamped now. A missing actor becomes [`SYSTEM_ACTOR`].
    pub fn new(
        actor_id: Option<&str>,
        action: AuditAction,
        target_type: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: actor_id.unwrap_or(SYSTEM_ACTOR).to_string(),
            action,
            target_type: target_type.into(),
            target_id: target_id.into(),
            detail: None,
            timestamp: Utc::now(),
        }
    }

    /// Record of an action on a workflow instance.
    pub fn for_instance(actor_id: Option<&str>, action: AuditAction, instance_id: Uuid) -> Self {
        Self::new(actor_id, action, INSTANCE_TARGET, instance_id.to_string())
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Persistence for audit records. Records are never updated or deleted.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: &AuditLog) -> Result<()>;

    /// All records for one target, oldest first.
    async fn list_for_target(&self, target_type: &str, target_id: &str) -> Result<Vec<AuditLog>>;
}
