//! Error types for workflow operations and event dispatch.

use thiserror::Error;
use uuid::Uuid;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient: the same input may succeed later.
    Retryable,
    /// Permanent: retrying the same input will fail the same way.
    NonRetryable,
}

/// Errors that know how they should be retried.
pub trait Categorizable {
    fn failure_kind(&self) -> FailureKind;

    fn is_retryable(&self) -> bool {
        self.failure_kind() == FailureKind::Retryable
    }
}

/// Failure of a `start` or `advance` call. Never retried by the engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl Categorizable for WorkflowError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            WorkflowError::InstanceNotFound(_) | WorkflowError::WorkflowNotFound(_) => {
                FailureKind::NonRetryable
            }
            WorkflowError::Store(_) => FailureKind::Retryable,
        }
    }
}

/// Failure to dispatch one domain event.
///
/// The drain loop records the display string as the event's `last_error`
/// and uses [`Categorizable`] to decide between retry and dead letter.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("trigger lookup failed: {0:#}")]
    TriggerLookup(#[source] anyhow::Error),

    #[error("workflow {workflow_id} lookup failed: {source:#}")]
    WorkflowLookup {
        workflow_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("trigger {trigger_id} references missing workflow {workflow_id}")]
    MissingWorkflow {
        trigger_id: String,
        workflow_id: String,
    },

    #[error("trigger {trigger_id} failed to start workflow: {source}")]
    Start {
        trigger_id: String,
        #[source]
        source: WorkflowError,
    },

    #[error("{message}")]
    Handler { message: String, kind: FailureKind },
}

impl DispatchError {
    /// A transient failure raised by a custom handler.
    pub fn retryable(message: impl Into<String>) -> Self {
        DispatchError::Handler {
            message: message.into(),
            kind: FailureKind::Retryable,
        }
    }

    /// A permanent failure raised by a custom handler.
    pub fn terminal(message: impl Into<String>) -> Self {
        DispatchError::Handler {
            message: message.into(),
            kind: FailureKind::NonRetryable,
        }
    }
}

impl Categorizable for DispatchError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            DispatchError::TriggerLookup(_) | DispatchError::WorkflowLookup { .. } => {
                FailureKind::Retryable
            }
            DispatchError::MissingWorkflow { .. } => FailureKind::NonRetryable,
            DispatchError::Start { source, .. } => source.failure_kind(),
            DispatchError::Handler { kind, .. } => *kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_are_retryable() {
        let err = WorkflowError::Store(anyhow::anyhow!("connection reset"));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "store error: connection reset");
    }

    #[test]
    fn start_failure_inherits_kind_from_source() {
        let transient = DispatchError::Start {
            trigger_id: "t1".into(),
            source: WorkflowError::Store(anyhow::anyhow!("timeout")),
        };
        let permanent = DispatchError::Start {
            trigger_id: "t1".into(),
            source: WorkflowError::WorkflowNotFound("wf1".into()),
        };

        assert_eq!(transient.failure_kind(), FailureKind::Retryable);
        assert_eq!(permanent.failure_kind(), FailureKind::NonRetryable);
    }

    #[test]
    fn workflow_lookup_failure_names_the_workflow() {
        let err = DispatchError::WorkflowLookup {
            workflow_id: "wf1".into(),
            source: anyhow::anyhow!("connection reset"),
        };
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "workflow wf1 lookup failed: connection reset");
    }

    #[test]
    fn missing_workflow_is_terminal() {
        let err = DispatchError::MissingWorkflow {
            trigger_id: "t1".into(),
            workflow_id: "wf9".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "trigger t1 references missing workflow wf9");
    }
}
