//! PostgreSQL implementation of caseflow stores.
//!
//! This crate provides a production-ready PostgreSQL implementation of every
//! repository trait from `caseflow-core`.
//!
//! # Features
//!
//! - Outbox claiming with `FOR UPDATE SKIP LOCKED` and a lease, so several
//!   workers can drain the same outbox without dispatching an event twice
//!   while its lease holds
//! - Retry scheduling (`next_attempt_at`) and dead-lettering
//! - Instance writes and their audit record committed in one transaction
//! - [`PgStore::enqueue_with`] for appending events inside a caller's transaction
//!
//! # Leases
//!
//! One lease covers a whole claimed batch, and the batch is dispatched one
//! event at a time. If dispatching the batch outlasts the lease, another
//! worker may claim its remaining events and deliver them a second time.
//! Delivery is at-least-once either way; keep the lease well above
//! `batch_size` times the slowest expected dispatch.
//!
//! # Database Schema
//!
//! Shipped as `migrations/0001_caseflow.sql`.
//!
//! ```sql
//! CREATE TABLE outbox_events (
//!     seq BIGSERIAL UNIQUE,
//!     id UUID PRIMARY KEY,
//!     tenant_id TEXT,
//!     topic TEXT NOT NULL,
//!     payload JSONB NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!
//!     -- Delivery
//!     processed_at TIMESTAMPTZ,
//!     attempts INTEGER NOT NULL DEFAULT 0,
//!     last_error TEXT,
//!     next_attempt_at TIMESTAMPTZ,
//!     dead_lettered_at TIMESTAMPTZ,
//!     locked_until TIMESTAMPTZ
//! );
//!
//! CREATE INDEX idx_outbox_pending ON outbox_events (created_at, seq)
//!     WHERE processed_at IS NULL AND dead_lettered_at IS NULL;
//!
//! CREATE TABLE workflows (
//!     id TEXT PRIMARY KEY,
//!     name TEXT NOT NULL,
//!     definition JSONB NOT NULL DEFAULT '{}'
//! );
//!
//! CREATE TABLE workflow_states (
//!     workflow_id TEXT NOT NULL REFERENCES workflows (id),
//!     key TEXT NOT NULL,
//!     name TEXT NOT NULL,
//!     terminal BOOLEAN NOT NULL DEFAULT FALSE,
//!     position INTEGER NOT NULL DEFAULT 0,
//!     PRIMARY KEY (workflow_id, key)
//! );
//!
//! CREATE TABLE workflow_transitions (
//!     id BIGSERIAL PRIMARY KEY,
//!     workflow_id TEXT NOT NULL REFERENCES workflows (id),
//!     from_state_key TEXT NOT NULL,
//!     to_state_key TEXT NOT NULL,
//!     position INTEGER NOT NULL DEFAULT 0
//! );
//!
//! CREATE TABLE workflow_triggers (
//!     id TEXT PRIMARY KEY,
//!     tenant_id TEXT,
//!     subject_schema TEXT NOT NULL,
//!     subject_model TEXT NOT NULL,
//!     event_key TEXT NOT NULL,
//!     active BOOLEAN NOT NULL DEFAULT TRUE,
//!     workflow_id TEXT NOT NULL REFERENCES workflows (id)
//! );
//!
//! CREATE INDEX idx_triggers_lookup ON workflow_triggers (subject_schema, subject_model, event_key)
//!     WHERE active;
//!
//! CREATE TABLE workflow_instances (
//!     id UUID PRIMARY KEY,
//!     workflow_id TEXT NOT NULL,
//!     tenant_id TEXT,
//!     subject_schema TEXT NOT NULL,
//!     subject_model TEXT NOT NULL,
//!     subject_id TEXT NOT NULL,
//!     state_key TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE audit_logs (
//!     id UUID PRIMARY KEY,
//!     actor_id TEXT NOT NULL,
//!     action TEXT NOT NULL,
//!     target_type TEXT NOT NULL,
//!     target_id TEXT NOT NULL,
//!     detail JSONB,
//!     created_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE INDEX idx_audit_target ON audit_logs (target_type, target_id, created_at);
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use caseflow_postgres::PgStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/mydb").await?;
//! let store = Arc::new(PgStore::new(pool));
//!
//! let engine = WorkflowEngine::from_store(store.clone());
//! let matcher = TriggerMatcher::new(store.clone(), store.clone(), engine);
//! let poller = OutboxPoller::new(store, Arc::new(matcher), DrainConfig::default());
//! ```

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use caseflow::{
    AuditLog, AuditStore, DomainEvent, FailureDisposition, InstanceStore, OutboxEvent,
    OutboxStore, TenantScope, TriggerQuery, TriggerStore, Workflow, WorkflowInstance,
    WorkflowState, WorkflowStore, WorkflowTransition, WorkflowTrigger,
};
use chrono::{Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use tracing::debug;
use uuid::Uuid;

/// PostgreSQL store implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lease_ms: i64,
}

impl PgStore {
    /// Create a new PostgreSQL store.
    ///
    /// # Default Settings
    ///
    /// - Claim lease: 60 seconds
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease_ms: 60_000,
        }
    }

    /// Create a store with a custom claim lease.
    ///
    /// The lease determines how long a claimed outbox event is hidden from
    /// other workers before it is considered abandoned.
    pub fn with_lease_timeout(pool: PgPool, lease_ms: i64) -> Self {
        Self { pool, lease_ms }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Append an outbox event using any executor, typically the caller's
    /// open transaction so the event commits with the business change.
    pub async fn enqueue_with<'e, E>(executor: E, event: &DomainEvent) -> Result<OutboxEvent>
    where
        E: PgExecutor<'e>,
    {
        let row = sqlx::query(
            r#"
            INSERT INTO outbox_events (id, tenant_id, topic, payload, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, tenant_id, topic, payload, created_at, processed_at,
                      attempts, last_error, next_attempt_at, dead_lettered_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.tenant_id.as_deref())
        .bind(&event.topic)
        .bind(&event.payload)
        .fetch_one(executor)
        .await?;

        Ok(outbox_event_from_row(&row)?)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn outbox_event_from_row(row: &PgRow) -> Result<OutboxEvent, sqlx::Error> {
    Ok(OutboxEvent {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        topic: row.try_get("topic")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        dead_lettered_at: row.try_get("dead_lettered_at")?,
    })
}

fn instance_from_row(row: &PgRow) -> Result<WorkflowInstance, sqlx::Error> {
    Ok(WorkflowInstance {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        tenant_id: row.try_get("tenant_id")?,
        subject_schema: row.try_get("subject_schema")?,
        subject_model: row.try_get("subject_model")?,
        subject_id: row.try_get("subject_id")?,
        state_key: row.try_get("state_key")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditLog> {
    let action: String = row.try_get("action")?;
    Ok(AuditLog {
        id: row.try_get("id")?,
        actor_id: row.try_get("actor_id")?,
        action: action.parse()?,
        target_type: row.try_get("target_type")?,
        target_id: row.try_get("target_id")?,
        detail: row.try_get("detail")?,
        timestamp: row.try_get("created_at")?,
    })
}

async fn insert_audit<'e, E>(executor: E, entry: &AuditLog) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, actor_id, action, target_type, target_id, detail, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.id)
    .bind(&entry.actor_id)
    .bind(entry.action.as_str())
    .bind(&entry.target_type)
    .bind(&entry.target_id)
    .bind(&entry.detail)
    .bind(entry.timestamp)
    .execute(executor)
    .await?;

    Ok(())
}

// ============================================================================
// Outbox
// ============================================================================

#[async_trait]
impl OutboxStore for PgStore {
    async fn enqueue(&self, event: DomainEvent) -> Result<OutboxEvent> {
        Self::enqueue_with(&self.pool, &event).await
    }

    /// Claim due events for this worker.
    ///
    /// Claimed rows get `locked_until = now + lease`, which hides them from
    /// other workers until marked or until the lease runs out.
    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let locked_until = Utc::now() + Duration::milliseconds(self.lease_ms);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM outbox_events
                WHERE processed_at IS NULL
                  AND dead_lettered_at IS NULL
                  AND (next_attempt_at IS NULL OR next_attempt_at <= NOW())
                  AND (locked_until IS NULL OR locked_until < NOW())
                ORDER BY created_at ASC, seq ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_events
            SET locked_until = $2
            WHERE id IN (SELECT id FROM claimable)
            RETURNING seq, id, tenant_id, topic, payload, created_at, processed_at,
                      attempts, last_error, next_attempt_at, dead_lettered_at
            "#,
        )
        .bind(limit)
        .bind(locked_until)
        .fetch_all(&self.pool)
        .await?;

        // RETURNING does not preserve the CTE's order.
        let mut claimed = rows
            .iter()
            .map(|row| Ok((row.try_get::<i64, _>("seq")?, outbox_event_from_row(row)?)))
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        claimed.sort_by_key(|(seq, event)| (event.created_at, *seq));

        debug!(claimed = claimed.len(), "claimed outbox events");
        Ok(claimed.into_iter().map(|(_, event)| event).collect())
    }

    async fn mark_processed(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed_at = NOW(),
                attempts = attempts + 1,
                next_attempt_at = NULL,
                locked_until = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("outbox event not found: {id}"));
        }
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// # Retry Logic
    ///
    /// - Retry: stays pending, eligible again from `not_before` (or at once)
    /// - Dead letter: `dead_lettered_at` is set and the row is never claimed again
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        disposition: FailureDisposition,
    ) -> Result<()> {
        let result = match disposition {
            FailureDisposition::Retry { not_before } => {
                sqlx::query(
                    r#"
                    UPDATE outbox_events
                    SET attempts = attempts + 1,
                        last_error = $2,
                        next_attempt_at = $3,
                        locked_until = NULL
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(error)
                .bind(not_before)
                .execute(&self.pool)
                .await?
            }
            FailureDisposition::DeadLetter => {
                sqlx::query(
                    r#"
                    UPDATE outbox_events
                    SET attempts = attempts + 1,
                        last_error = $2,
                        next_attempt_at = NULL,
                        dead_lettered_at = NOW(),
                        locked_until = NULL
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(error)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(anyhow!("outbox event not found: {id}"));
        }
        Ok(())
    }
}

// ============================================================================
// Triggers and workflows
// ============================================================================

#[async_trait]
impl TriggerStore for PgStore {
    async fn find_active(&self, query: &TriggerQuery<'_>) -> Result<Vec<WorkflowTrigger>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, subject_schema, subject_model, event_key, active, workflow_id
            FROM workflow_triggers
            WHERE active
              AND subject_schema = $1
              AND subject_model = $2
              AND event_key = $3
              AND (tenant_id IS NOT DISTINCT FROM $4 OR ($5 AND tenant_id IS NULL))
            ORDER BY id
            "#,
        )
        .bind(query.subject_schema)
        .bind(query.subject_model)
        .bind(query.event_key)
        .bind(query.tenant_id)
        .bind(query.scope == TenantScope::GlobalFallback)
        .fetch_all(&self.pool)
        .await?;

        let triggers = rows
            .iter()
            .map(|row| {
                Ok(WorkflowTrigger {
                    id: row.try_get("id")?,
                    tenant_id: row.try_get("tenant_id")?,
                    subject_schema: row.try_get("subject_schema")?,
                    subject_model: row.try_get("subject_model")?,
                    event_key: row.try_get("event_key")?,
                    active: row.try_get("active")?,
                    workflow_id: row.try_get("workflow_id")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(triggers)
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let Some(row) = sqlx::query("SELECT id, name, definition FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let states = sqlx::query(
            r#"
            SELECT key, name, terminal
            FROM workflow_states
            WHERE workflow_id = $1
            ORDER BY position, key
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(WorkflowState {
                key: row.try_get("key")?,
                name: row.try_get("name")?,
                terminal: row.try_get("terminal")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let transitions = sqlx::query(
            r#"
            SELECT from_state_key, to_state_key
            FROM workflow_transitions
            WHERE workflow_id = $1
            ORDER BY position, id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(WorkflowTransition {
                from_state_key: row.try_get("from_state_key")?,
                to_state_key: row.try_get("to_state_key")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(Some(Workflow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            definition: row.try_get("definition")?,
            states,
            transitions,
        }))
    }
}

// ============================================================================
// Instances and audit
// ============================================================================

#[async_trait]
impl InstanceStore for PgStore {
    async fn create_instance(&self, instance: &WorkflowInstance, audit: &AuditLog) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO workflow_instances (
                id, workflow_id, tenant_id, subject_schema, subject_model,
                subject_id, state_key, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(instance.id)
        .bind(&instance.workflow_id)
        .bind(instance.tenant_id.as_deref())
        .bind(&instance.subject_schema)
        .bind(&instance.subject_model)
        .bind(&instance.subject_id)
        .bind(&instance.state_key)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_audit(&mut *tx, audit).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> Result<Option<WorkflowInstance>> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, tenant_id, subject_schema, subject_model,
                   subject_id, state_key, created_at, updated_at
            FROM workflow_instances
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(instance_from_row).transpose()?)
    }

    async fn update_instance_state(
        &self,
        instance: &WorkflowInstance,
        audit: &AuditLog,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET state_key = $2,
                updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(instance.id)
        .bind(&instance.state_key)
        .bind(instance.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("workflow instance not found: {}", instance.id));
        }

        insert_audit(&mut *tx, audit).await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append(&self, entry: &AuditLog) -> Result<()> {
        insert_audit(&self.pool, entry).await?;
        Ok(())
    }

    async fn list_for_target(&self, target_type: &str, target_id: &str) -> Result<Vec<AuditLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, actor_id, action, target_type, target_id, detail, created_at
            FROM audit_logs
            WHERE target_type = $1 AND target_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(target_type)
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(audit_from_row).collect()
    }
}

/// Utility functions for outbox monitoring.
impl PgStore {
    /// Get statistics about outbox health.
    pub async fn stats(&self) -> Result<OutboxStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE processed_at IS NULL AND dead_lettered_at IS NULL) as pending,
                COUNT(*) FILTER (WHERE processed_at IS NULL AND dead_lettered_at IS NULL AND attempts > 0) as failing,
                COUNT(*) FILTER (WHERE processed_at IS NOT NULL) as processed,
                COUNT(*) FILTER (WHERE dead_lettered_at IS NOT NULL) as dead_letter
            FROM outbox_events
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OutboxStats {
            pending: row.try_get("pending")?,
            failing: row.try_get("failing")?,
            processed: row.try_get("processed")?,
            dead_letter: row.try_get("dead_letter")?,
        })
    }
}

/// Outbox statistics.
#[derive(Debug, Clone, Copy)]
pub struct OutboxStats {
    pub pending: i64,
    /// Pending events that have failed at least once.
    pub failing: i64,
    pub processed: i64,
    pub dead_letter: i64,
}
