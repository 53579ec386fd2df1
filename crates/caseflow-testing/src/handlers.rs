use caseflow::{async_trait, DispatchError, DomainEvent, EventHandler};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Accepts every event and remembers it, optionally after a delay.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<DomainEvent>>,
    delay: Option<Duration>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every `handle` call.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub fn calls(&self) -> Vec<DomainEvent> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &DomainEvent) -> Result<(), DispatchError> {
        self.calls.lock().unwrap().push(event.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

/// Replies with queued results in call order, then `Ok` once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    script: Mutex<VecDeque<Result<(), DispatchError>>>,
    calls: Mutex<Vec<DomainEvent>>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self) -> &Self {
        self.script.lock().unwrap().push_back(Ok(()));
        self
    }

    pub fn push_err(&self, error: DispatchError) -> &Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn calls(&self) -> Vec<DomainEvent> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for ScriptedHandler {
    async fn handle(&self, event: &DomainEvent) -> Result<(), DispatchError> {
        self.calls.lock().unwrap().push(event.clone());
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}
