//! # Caseflow
//!
//! Turns domain events into workflow instances and moves those instances
//! through named states, with an audit record for every move.
//!
//! ## Core Concepts
//!
//! - [`DomainEvent`] = a fact written to the outbox by a business module
//! - [`WorkflowTrigger`] = a standing rule: "when this kind of event happens
//!   to this kind of subject, start that workflow"
//! - [`Workflow`] = a graph of states and ordered transitions
//! - [`WorkflowInstance`] = one workflow running against one subject
//! - [`AuditLog`] = an immutable record of a start or advance
//!
//! ## Architecture
//!
//! ```text
//! Business transaction
//!     │
//!     ▼ enqueue()
//! OutboxStore ◄──────── OutboxPoller (caseflow-outbox)
//!                            │ every interval, oldest first
//!                            ▼
//!                      TriggerMatcher.handle_domain_event()
//!                            │ one start per matching trigger
//!                            ▼
//!                      WorkflowEngine.start() ──► InstanceStore + AuditLog
//!
//! API caller ──► WorkflowEngine.advance() ──► InstanceStore + AuditLog
//! ```
//!
//! ## Key Invariants
//!
//! 1. **At-least-once** - An event is marked processed only after its handler
//!    returned `Ok`; a retried event may start instances again
//! 2. **First match wins** - `advance` follows the first transition, in stored
//!    order, leaving the current state
//! 3. **No transition is terminal** - Advancing from a state without outgoing
//!    transitions returns the instance unchanged
//! 4. **Audited atomically** - Instance writes and their audit record are
//!    persisted together
//!
//! ## Example
//!
//! ```ignore
//! use caseflow::{MemoryStore, TriggerMatcher, WorkflowEngine, AdvanceRequest};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let engine = WorkflowEngine::from_store(store.clone());
//! let matcher = TriggerMatcher::new(store.clone(), store.clone(), engine.clone());
//!
//! let started = matcher.handle_domain_event(&event).await?;
//! let moved = engine.advance(AdvanceRequest::new(started[0].id)).await?;
//! ```

mod audit;
mod engine;
mod error;
mod matcher;
pub mod memory;
mod model;
pub mod store;

pub use crate::audit::{AuditAction, AuditLog, AuditStore, INSTANCE_TARGET, SYSTEM_ACTOR};
pub use crate::engine::{AdvanceRequest, StartRequest, WorkflowEngine};
pub use crate::error::{Categorizable, DispatchError, FailureKind, WorkflowError};
pub use crate::matcher::{EventHandler, TriggerMatcher};
pub use crate::memory::MemoryStore;
pub use crate::model::{
    DomainEvent, OutboxEvent, SubjectRef, Workflow, WorkflowInstance, WorkflowState,
    WorkflowTransition, WorkflowTrigger, DEFAULT_ENTRY_STATE,
};
pub use crate::store::{
    FailureDisposition, InstanceStore, OutboxStore, TenantScope, TriggerQuery, TriggerStore,
    WorkflowStore,
};

// Re-export commonly used external types
pub use async_trait::async_trait;
