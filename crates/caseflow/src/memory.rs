//! In-memory implementation of every store interface.
//!
//! Used by tests and local runs. Not durable.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::audit::{AuditLog, AuditStore};
use crate::model::{DomainEvent, OutboxEvent, Workflow, WorkflowInstance, WorkflowTrigger};
use crate::store::{
    FailureDisposition, InstanceStore, OutboxStore, TriggerQuery, TriggerStore, WorkflowStore,
};

/// Outbox rows keep their insertion sequence to order equal timestamps.
#[derive(Debug, Clone)]
struct OutboxRow {
    seq: u64,
    event: OutboxEvent,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    outbox: DashMap<Uuid, OutboxRow>,
    sequence: AtomicU64,
    triggers: DashMap<String, WorkflowTrigger>,
    workflows: DashMap<String, Workflow>,
    instances: DashMap<Uuid, WorkflowInstance>,
    // Held while an instance mutation is applied so the pair lands together.
    audit: Mutex<Vec<AuditLog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a trigger.
    pub fn insert_trigger(&self, trigger: WorkflowTrigger) {
        self.triggers.insert(trigger.id.clone(), trigger);
    }

    /// Insert or replace a workflow.
    pub fn insert_workflow(&self, workflow: Workflow) {
        self.workflows.insert(workflow.id.clone(), workflow);
    }

    /// Insert an outbox row as-is, e.g. with a chosen `created_at`.
    pub fn insert_outbox_event(&self, event: OutboxEvent) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.outbox.insert(event.id, OutboxRow { seq, event });
    }

    pub fn outbox_event(&self, id: Uuid) -> Option<OutboxEvent> {
        self.outbox.get(&id).map(|row| row.event.clone())
    }

    /// All outbox rows in creation order.
    pub fn outbox_events(&self) -> Vec<OutboxEvent> {
        let mut rows: Vec<OutboxRow> = self.outbox.iter().map(|r| r.value().clone()).collect();
        rows.sort_by_key(|row| (row.event.created_at, row.seq));
        rows.into_iter().map(|row| row.event).collect()
    }

    pub fn instances(&self) -> Vec<WorkflowInstance> {
        let mut instances: Vec<_> = self.instances.iter().map(|r| r.value().clone()).collect();
        instances.sort_by_key(|i| i.created_at);
        instances
    }

    pub fn audit_entries(&self) -> Vec<AuditLog> {
        self.audit_log().clone()
    }

    fn audit_log(&self) -> std::sync::MutexGuard<'_, Vec<AuditLog>> {
        // A poisoned lock only means a panicking test thread; the data is still valid.
        self.audit.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update_outbox<F>(&self, id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut OutboxEvent),
    {
        let mut row = self
            .outbox
            .get_mut(&id)
            .ok_or_else(|| anyhow!("outbox event not found: {id}"))?;
        apply(&mut row.event);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn enqueue(&self, event: DomainEvent) -> Result<OutboxEvent> {
        let event = OutboxEvent::pending(event, Utc::now());
        self.insert_outbox_event(event.clone());
        Ok(event)
    }

    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let now = Utc::now();
        let mut due: Vec<OutboxRow> = self
            .outbox
            .iter()
            .filter(|row| row.event.is_due(now))
            .map(|row| row.value().clone())
            .collect();
        due.sort_by_key(|row| (row.event.created_at, row.seq));
        Ok(due.into_iter().take(limit).map(|row| row.event).collect())
    }

    async fn mark_processed(&self, id: Uuid) -> Result<()> {
        self.update_outbox(id, |event| {
            event.processed_at = Some(Utc::now());
            event.attempts += 1;
            event.next_attempt_at = None;
        })
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        disposition: FailureDisposition,
    ) -> Result<()> {
        self.update_outbox(id, |event| {
            event.attempts += 1;
            event.last_error = Some(error.to_string());
            match disposition {
                FailureDisposition::Retry { not_before } => event.next_attempt_at = not_before,
                FailureDisposition::DeadLetter => {
                    event.next_attempt_at = None;
                    event.dead_lettered_at = Some(Utc::now());
                }
            }
        })
    }
}

#[async_trait]
impl TriggerStore for MemoryStore {
    async fn find_active(&self, query: &TriggerQuery<'_>) -> Result<Vec<WorkflowTrigger>> {
        let mut matches: Vec<_> = self
            .triggers
            .iter()
            .filter(|t| query.matches(t.value()))
            .map(|t| t.value().clone())
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.workflows.get(id).map(|w| w.value().clone()))
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn create_instance(&self, instance: &WorkflowInstance, audit: &AuditLog) -> Result<()> {
        let mut log = self.audit_log();
        if self.instances.contains_key(&instance.id) {
            return Err(anyhow!("workflow instance already exists: {}", instance.id));
        }
        self.instances.insert(instance.id, instance.clone());
        log.push(audit.clone());
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> Result<Option<WorkflowInstance>> {
        Ok(self.instances.get(&id).map(|i| i.value().clone()))
    }

    async fn update_instance_state(
        &self,
        instance: &WorkflowInstance,
        audit: &AuditLog,
    ) -> Result<()> {
        let mut log = self.audit_log();
        let mut stored = self
            .instances
            .get_mut(&instance.id)
            .ok_or_else(|| anyhow!("workflow instance not found: {}", instance.id))?;
        stored.state_key = instance.state_key.clone();
        stored.updated_at = instance.updated_at;
        log.push(audit.clone());
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append(&self, entry: &AuditLog) -> Result<()> {
        self.audit_log().push(entry.clone());
        Ok(())
    }

    async fn list_for_target(&self, target_type: &str, target_id: &str) -> Result<Vec<AuditLog>> {
        Ok(self
            .audit_log()
            .iter()
            .filter(|e| e.target_type == target_type && e.target_id == target_id)
            .cloned()
            .collect())
    }
}
