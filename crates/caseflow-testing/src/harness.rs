use caseflow::{
    DomainEvent, MemoryStore, OutboxEvent, OutboxStore, TenantScope, TriggerMatcher, Workflow,
    WorkflowEngine, WorkflowTrigger,
};
use std::sync::Arc;

/// An in-memory store with an engine and matcher over it.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub engine: WorkflowEngine,
    pub matcher: Arc<TriggerMatcher>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_tenant_scope(TenantScope::default())
    }

    pub fn with_tenant_scope(scope: TenantScope) -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = WorkflowEngine::from_store(store.clone());
        let matcher = TriggerMatcher::new(store.clone(), store.clone(), engine.clone())
            .with_tenant_scope(scope);
        Self {
            store,
            engine,
            matcher: Arc::new(matcher),
        }
    }

    pub fn workflow(self, workflow: Workflow) -> Self {
        self.store.insert_workflow(workflow);
        self
    }

    pub fn trigger(self, trigger: WorkflowTrigger) -> Self {
        self.store.insert_trigger(trigger);
        self
    }

    pub async fn enqueue(&self, event: DomainEvent) -> OutboxEvent {
        self.store
            .enqueue(event)
            .await
            .expect("in-memory enqueue cannot fail")
    }
}
