//! Turns domain events into workflow starts.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::engine::{StartRequest, WorkflowEngine};
use crate::error::DispatchError;
use crate::model::{DomainEvent, WorkflowInstance};
use crate::store::{TenantScope, TriggerQuery, TriggerStore, WorkflowStore};

/// Consumer of outbox events.
///
/// The drain loop marks an event processed when `handle` returns `Ok`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> Result<(), DispatchError>;
}

/// Starts one workflow instance per active trigger matching an event.
#[derive(Clone)]
pub struct TriggerMatcher {
    triggers: Arc<dyn TriggerStore>,
    workflows: Arc<dyn WorkflowStore>,
    engine: WorkflowEngine,
    scope: TenantScope,
}

impl TriggerMatcher {
    pub fn new(
        triggers: Arc<dyn TriggerStore>,
        workflows: Arc<dyn WorkflowStore>,
        engine: WorkflowEngine,
    ) -> Self {
        Self {
            triggers,
            workflows,
            engine,
            scope: TenantScope::default(),
        }
    }

    pub fn with_tenant_scope(mut self, scope: TenantScope) -> Self {
        self.scope = scope;
        self
    }

    /// Start an instance for every matching trigger.
    ///
    /// Events without `subjectSchema`/`subjectModel` match nothing. Matches
    /// are not deduplicated. On error, instances already started for earlier
    /// matches remain, so a retried event may start them again.
    #[tracing::instrument(skip(self, event), fields(topic = %event.topic, tenant = ?event.tenant_id))]
    pub async fn handle_domain_event(
        &self,
        event: &DomainEvent,
    ) -> Result<Vec<WorkflowInstance>, DispatchError> {
        let subject = event.subject();
        let (Some(schema), Some(model)) = (subject.schema.as_deref(), subject.model.as_deref())
        else {
            debug!("event carries no subject, nothing to match");
            return Ok(Vec::new());
        };

        let query = TriggerQuery {
            tenant_id: event.tenant_id.as_deref(),
            subject_schema: schema,
            subject_model: model,
            event_key: &event.topic,
            scope: self.scope,
        };
        let triggers = self
            .triggers
            .find_active(&query)
            .await
            .map_err(DispatchError::TriggerLookup)?;

        debug!(matches = triggers.len(), "resolved triggers");

        let subject_id = subject.id.unwrap_or_default();
        let mut started = Vec::with_capacity(triggers.len());

        for trigger in triggers {
            let workflow = self
                .workflows
                .get_workflow(&trigger.workflow_id)
                .await
                .map_err(|source| DispatchError::WorkflowLookup {
                    workflow_id: trigger.workflow_id.clone(),
                    source,
                })?
                .ok_or_else(|| DispatchError::MissingWorkflow {
                    trigger_id: trigger.id.clone(),
                    workflow_id: trigger.workflow_id.clone(),
                })?;

            let request = StartRequest::new(
                trigger.workflow_id.clone(),
                schema,
                model,
                subject_id.clone(),
                workflow.entry_state(),
            )
            .tenant(event.tenant_id.clone());

            let instance = self
                .engine
                .start(request)
                .await
                .map_err(|source| DispatchError::Start {
                    trigger_id: trigger.id.clone(),
                    source,
                })?;

            info!(trigger_id = %trigger.id, instance_id = %instance.id, "trigger fired");
            started.push(instance);
        }

        Ok(started)
    }
}

#[async_trait]
impl EventHandler for TriggerMatcher {
    async fn handle(&self, event: &DomainEvent) -> Result<(), DispatchError> {
        self.handle_domain_event(event).await.map(|_| ())
    }
}
