//! Transactional outbox drain for caseflow.
//!
//! Business modules append [`caseflow::DomainEvent`]s to an
//! [`caseflow::OutboxStore`] inside their own transactions. An
//! [`OutboxPoller`] then delivers them, oldest first, to an
//! [`caseflow::EventHandler`] (normally the [`caseflow::TriggerMatcher`]).
//!
//! # Delivery
//!
//! - **At-least-once**: an event is marked processed only after its handler
//!   succeeded; a crash in between redelivers it
//! - **Isolated failures**: a failing event is recorded and the rest of the
//!   batch continues
//! - **One drain at a time**: the loop awaits each drain before the next
//!   tick, and concurrent [`OutboxPoller::drain_once`] calls are skipped
//!
//! Failed events are retried according to the [`RetryPolicy`]. Non-retryable
//! failures, and retryable ones past `max_attempts`, are dead-lettered.
//!
//! # Usage
//!
//! ```rust,ignore
//! use caseflow_outbox::{DrainConfig, OutboxPoller, RetryPolicy};
//!
//! let config = DrainConfig::default().with_retry(RetryPolicy::bounded(10));
//! let poller = OutboxPoller::new(store, Arc::new(matcher), config);
//! let handle = poller.start();
//!
//! // ... on shutdown
//! handle.shutdown().await;
//! ```

mod config;
mod poller;
mod report;

pub use config::{
    Backoff, DrainConfig, RetryPolicy, DEFAULT_BATCH_SIZE, DEFAULT_INTERVAL, MAX_BACKOFF,
};
pub use poller::{OutboxPoller, PollerHandle};
pub use report::{DispatchOutcome, DrainReport};
