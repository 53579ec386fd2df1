//! Workflow state machine runner.
//!
//! [`WorkflowEngine::start`] creates an instance at an entry state and
//! [`WorkflowEngine::advance`] moves it along the first transition leaving
//! its current state. Both write exactly one audit record per call that
//! changes state, in the same store transaction as the change.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLog, AuditStore, INSTANCE_TARGET};
use crate::error::WorkflowError;
use crate::model::WorkflowInstance;
use crate::store::{InstanceStore, WorkflowStore};

/// Arguments to [`WorkflowEngine::start`].
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    pub workflow_id: String,
    pub tenant_id: Option<String>,
    pub subject_schema: String,
    pub subject_model: String,
    pub subject_id: String,
    pub entry_state_key: String,
    pub actor_id: Option<String>,
}

impl StartRequest {
    pub fn new(
        workflow_id: impl Into<String>,
        subject_schema: impl Into<String>,
        subject_model: impl Into<String>,
        subject_id: impl Into<String>,
        entry_state_key: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            tenant_id: None,
            subject_schema: subject_schema.into(),
            subject_model: subject_model.into(),
            subject_id: subject_id.into(),
            entry_state_key: entry_state_key.into(),
            actor_id: None,
        }
    }

    pub fn tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }
}

/// Arguments to [`WorkflowEngine::advance`].
///
/// `event_payload` is carried for callers but does not influence which
/// transition is taken.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvanceRequest {
    pub instance_id: Uuid,
    pub actor_id: Option<String>,
    pub event_payload: Option<Value>,
}

impl AdvanceRequest {
    pub fn new(instance_id: Uuid) -> Self {
        Self {
            instance_id,
            actor_id: None,
            event_payload: None,
        }
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.event_payload = Some(payload);
        self
    }
}

/// Starts and advances workflow instances over injected stores.
#[derive(Clone)]
pub struct WorkflowEngine {
    workflows: Arc<dyn WorkflowStore>,
    instances: Arc<dyn InstanceStore>,
    audit: Arc<dyn AuditStore>,
}

impl WorkflowEngine {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        instances: Arc<dyn InstanceStore>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            workflows,
            instances,
            audit,
        }
    }

    /// Build an engine over a single store implementing every interface.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: WorkflowStore + InstanceStore + AuditStore + 'static,
    {
        Self::new(store.clone(), store.clone(), store)
    }

    /// Create an instance at `entry_state_key` and audit it.
    ///
    /// Multiple instances for the same subject and workflow are allowed.
    #[tracing::instrument(
        skip(self, request),
        fields(workflow_id = %request.workflow_id, subject_id = %request.subject_id)
    )]
    pub async fn start(&self, request: StartRequest) -> Result<WorkflowInstance, WorkflowError> {
        let now = Utc::now();
        let instance = WorkflowInstance {
            id: Uuid::new_v4(),
            workflow_id: request.workflow_id,
            tenant_id: request.tenant_id,
            subject_schema: request.subject_schema,
            subject_model: request.subject_model,
            subject_id: request.subject_id,
            state_key: request.entry_state_key,
            created_at: now,
            updated_at: now,
        };

        let audit = AuditLog::for_instance(
            request.actor_id.as_deref(),
            AuditAction::WorkflowStart,
            instance.id,
        )
        .with_detail(json!({
            "workflowId": instance.workflow_id,
            "stateKey": instance.state_key,
        }));

        self.instances.create_instance(&instance, &audit).await?;

        info!(
            instance_id = %instance.id,
            state = %instance.state_key,
            actor = %audit.actor_id,
            "workflow instance started"
        );
        Ok(instance)
    }

    /// Move the instance along the first transition leaving its state.
    ///
    /// With no such transition the instance is returned unchanged and
    /// nothing is audited.
    #[tracing::instrument(skip(self, request), fields(instance_id = %request.instance_id))]
    pub async fn advance(&self, request: AdvanceRequest) -> Result<WorkflowInstance, WorkflowError> {
        let mut instance = self.get_instance(request.instance_id).await?;

        let workflow = self
            .workflows
            .get_workflow(&instance.workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::WorkflowNotFound(instance.workflow_id.clone()))?;

        let Some(transition) = workflow.next_transition(&instance.state_key) else {
            debug!(state = %instance.state_key, "no outgoing transition, instance is terminal");
            return Ok(instance);
        };

        let from = std::mem::replace(&mut instance.state_key, transition.to_state_key.clone());
        instance.updated_at = Utc::now();

        let audit = AuditLog::for_instance(
            request.actor_id.as_deref(),
            AuditAction::WorkflowAdvance,
            instance.id,
        )
        .with_detail(json!({ "from": from, "to": instance.state_key }));

        self.instances.update_instance_state(&instance, &audit).await?;

        info!(
            from = %from,
            to = %instance.state_key,
            actor = %audit.actor_id,
            "workflow instance advanced"
        );
        Ok(instance)
    }

    pub async fn get_instance(&self, instance_id: Uuid) -> Result<WorkflowInstance, WorkflowError> {
        self.instances
            .get_instance(instance_id)
            .await?
            .ok_or(WorkflowError::InstanceNotFound(instance_id))
    }

    /// Audit records for an instance, oldest first.
    pub async fn audit_trail(&self, instance_id: Uuid) -> Result<Vec<AuditLog>, WorkflowError> {
        let entries = self
            .audit
            .list_for_target(INSTANCE_TARGET, &instance_id.to_string())
            .await?;
        Ok(entries)
    }
}
