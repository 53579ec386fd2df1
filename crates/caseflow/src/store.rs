//! Repository interfaces injected into the engine, matcher and drain loop.
//!
//! Implementations live in [`crate::memory`] and the `caseflow-postgres`
//! crate. Every method is an await point; no method holds a lock across
//! calls.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::model::{DomainEvent, OutboxEvent, Workflow, WorkflowInstance, WorkflowTrigger};

// ============================================================================
// Outbox
// ============================================================================

/// What to do with an event whose dispatch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Leave the event pending. `None` makes it eligible on the next drain.
    Retry { not_before: Option<DateTime<Utc>> },
    /// Stop selecting the event.
    DeadLetter,
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Append a new pending event.
    async fn enqueue(&self, event: DomainEvent) -> Result<OutboxEvent>;

    /// Up to `limit` due events, oldest `created_at` first.
    ///
    /// Excludes processed, dead-lettered and backed-off events.
    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<OutboxEvent>>;

    /// Set `processed_at` and count the attempt.
    async fn mark_processed(&self, id: Uuid) -> Result<()>;

    /// Count the attempt and record `error`. Never sets `processed_at`.
    async fn mark_failed(&self, id: Uuid, error: &str, disposition: FailureDisposition)
        -> Result<()>;
}

// ============================================================================
// Triggers
// ============================================================================

/// How a trigger's tenant is compared with an event's tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TenantScope {
    /// Tenant-less triggers apply to every tenant; scoped triggers only to their own.
    #[default]
    GlobalFallback,
    /// Strict equality; a tenant-less trigger only matches tenant-less events.
    Exact,
}

impl TenantScope {
    pub fn admits(&self, trigger_tenant: Option<&str>, event_tenant: Option<&str>) -> bool {
        match self {
            TenantScope::Exact => trigger_tenant == event_tenant,
            TenantScope::GlobalFallback => {
                trigger_tenant.is_none() || trigger_tenant == event_tenant
            }
        }
    }
}

/// Lookup key for active triggers.
#[derive(Debug, Clone, Copy)]
pub struct TriggerQuery<'a> {
    pub tenant_id: Option<&'a str>,
    pub subject_schema: &'a str,
    pub subject_model: &'a str,
    pub event_key: &'a str,
    pub scope: TenantScope,
}

impl TriggerQuery<'_> {
    /// The matching rule every [`TriggerStore`] must implement.
    pub fn matches(&self, trigger: &WorkflowTrigger) -> bool {
        trigger.active
            && trigger.subject_schema == self.subject_schema
            && trigger.subject_model == self.subject_model
            && trigger.event_key == self.event_key
            && self.scope.admits(trigger.tenant_id.as_deref(), self.tenant_id)
    }
}

#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn find_active(&self, query: &TriggerQuery<'_>) -> Result<Vec<WorkflowTrigger>>;
}

// ============================================================================
// Workflows and instances
// ============================================================================

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// The workflow with its states and transitions in stored order.
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>>;
}

/// Instance persistence.
///
/// Mutations carry the audit record describing them; implementations
/// persist both in one transaction so a state change is never unaudited.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn create_instance(&self, instance: &WorkflowInstance, audit: &AuditLog) -> Result<()>;

    async fn get_instance(&self, id: Uuid) -> Result<Option<WorkflowInstance>>;

    async fn update_instance_state(
        &self,
        instance: &WorkflowInstance,
        audit: &AuditLog,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(tenant: Option<&str>) -> WorkflowTrigger {
        WorkflowTrigger {
            id: "trg".into(),
            tenant_id: tenant.map(str::to_string),
            subject_schema: "service".into(),
            subject_model: "Case".into(),
            event_key: "case.created".into(),
            active: true,
            workflow_id: "wf1".into(),
        }
    }

    fn query(tenant: Option<&'static str>, scope: TenantScope) -> TriggerQuery<'static> {
        TriggerQuery {
            tenant_id: tenant,
            subject_schema: "service",
            subject_model: "Case",
            event_key: "case.created",
            scope,
        }
    }

    #[test]
    fn every_field_must_match() {
        let q = query(Some("t1"), TenantScope::Exact);
        assert!(q.matches(&trigger(Some("t1"))));

        let mut t = trigger(Some("t1"));
        t.active = false;
        assert!(!q.matches(&t));

        let mut t = trigger(Some("t1"));
        t.subject_schema = "billing".into();
        assert!(!q.matches(&t));

        let mut t = trigger(Some("t1"));
        t.subject_model = "Invoice".into();
        assert!(!q.matches(&t));

        let mut t = trigger(Some("t1"));
        t.event_key = "case.closed".into();
        assert!(!q.matches(&t));

        assert!(!q.matches(&trigger(Some("t2"))));
    }

    #[test]
    fn exact_scope_treats_null_as_a_value() {
        assert!(query(None, TenantScope::Exact).matches(&trigger(None)));
        assert!(!query(Some("t1"), TenantScope::Exact).matches(&trigger(None)));
        assert!(!query(None, TenantScope::Exact).matches(&trigger(Some("t1"))));
    }

    #[test]
    fn global_fallback_applies_tenantless_triggers_everywhere() {
        let scope = TenantScope::GlobalFallback;
        assert!(query(Some("t1"), scope).matches(&trigger(None)));
        assert!(query(None, scope).matches(&trigger(None)));
        assert!(query(Some("t1"), scope).matches(&trigger(Some("t1"))));
        assert!(!query(Some("t2"), scope).matches(&trigger(Some("t1"))));
        assert!(!query(None, scope).matches(&trigger(Some("t1"))));
    }
}
