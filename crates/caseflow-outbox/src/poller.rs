//! The drain loop.

use caseflow::{Categorizable, EventHandler, FailureDisposition, OutboxEvent, OutboxStore};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::DrainConfig;
use crate::report::{DispatchOutcome, DrainReport};

struct Inner {
    store: Arc<dyn OutboxStore>,
    handler: Arc<dyn EventHandler>,
    config: DrainConfig,
    draining: AtomicBool,
}

/// Drains pending outbox events into an [`EventHandler`].
///
/// Cheap to clone; clones share the drain-in-progress flag, so at most one
/// drain runs at a time across all of them.
#[derive(Clone)]
pub struct OutboxPoller {
    inner: Arc<Inner>,
}

/// Resets the drain-in-progress flag when a drain ends, even by panic.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OutboxPoller {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        handler: Arc<dyn EventHandler>,
        config: DrainConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                handler,
                config,
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the periodic loop on the current tokio runtime.
    ///
    /// The first drain runs immediately. The loop stops when the returned
    /// handle is shut down or dropped.
    pub fn start(&self) -> PollerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.clone().run(shutdown_rx));
        PollerHandle {
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.inner.config.interval);
        // A slow drain delays the next one instead of triggering a burst.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            batch_size = self.inner.config.batch_size,
            interval_ms = self.inner.config.interval.as_millis() as u64,
            "outbox poller started"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let report = self.drain_once().await;
                    if report.selected > 0 {
                        debug!(
                            selected = report.selected,
                            processed = report.processed,
                            failed = report.failed(),
                            next_retry_at = ?report.next_retry_at,
                            "drained outbox batch"
                        );
                    }
                }
            }
        }

        info!("outbox poller stopped");
    }

    /// Run one drain cycle.
    ///
    /// Dispatches up to `batch_size` due events oldest first, recording each
    /// outcome on its row. Never fails: store errors are logged and counted.
    /// Returns a skipped report if another drain is already running.
    pub async fn drain_once(&self) -> DrainReport {
        if self.inner.draining.swap(true, Ordering::AcqRel) {
            debug!("drain already in progress, skipping");
            return DrainReport::skipped();
        }
        let _guard = DrainGuard(&self.inner.draining);

        let events = match self
            .inner
            .store
            .list_unprocessed(self.inner.config.batch_size)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "failed to list pending outbox events");
                return DrainReport::default();
            }
        };

        let mut report = DrainReport {
            selected: events.len(),
            ..DrainReport::default()
        };

        for event in &events {
            match self.dispatch(event).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    report.store_errors += 1;
                    error!(event_id = %event.id, error = %e, "failed to record dispatch outcome");
                }
            }
        }

        report
    }

    /// Dispatch one event and write the outcome back.
    ///
    /// `Err` means the outcome could not be stored; the row is unchanged and
    /// will be selected again.
    async fn dispatch(&self, event: &OutboxEvent) -> anyhow::Result<DispatchOutcome> {
        let store = &self.inner.store;

        match self.inner.handler.handle(&event.domain_event()).await {
            Ok(()) => {
                store.mark_processed(event.id).await?;
                debug!(event_id = %event.id, topic = %event.topic, "outbox event processed");
                Ok(DispatchOutcome::Processed)
            }
            Err(err) => {
                let attempts = u32::try_from(event.attempts).unwrap_or(0).saturating_add(1);
                let disposition =
                    self.inner
                        .config
                        .retry
                        .disposition(err.failure_kind(), attempts, Utc::now());
                let message = err.to_string();

                store.mark_failed(event.id, &message, disposition).await?;

                match disposition {
                    FailureDisposition::Retry { not_before } => {
                        warn!(
                            event_id = %event.id,
                            topic = %event.topic,
                            attempts,
                            error = %message,
                            "outbox event failed, will retry"
                        );
                        Ok(DispatchOutcome::Retry { not_before })
                    }
                    FailureDisposition::DeadLetter => {
                        error!(
                            event_id = %event.id,
                            topic = %event.topic,
                            attempts,
                            error = %message,
                            "outbox event dead-lettered"
                        );
                        Ok(DispatchOutcome::DeadLettered)
                    }
                }
            }
        }
    }
}

/// Owns a running poll loop.
///
/// Dropping the handle stops the loop after any in-flight drain; use
/// [`PollerHandle::shutdown`] to also wait for it.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Stop scheduling drains and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "outbox poller task failed");
            }
        }
    }

    /// Resolves once the loop task has exited. Before shutdown is requested
    /// that only happens if a drain panicked.
    pub async fn stopped(&mut self) {
        if let Some(task) = self.task.as_mut() {
            if let Err(e) = task.await {
                error!(error = %e, "outbox poller task failed");
            }
            self.task = None;
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
