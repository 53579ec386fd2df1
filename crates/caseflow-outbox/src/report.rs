use chrono::{DateTime, Utc};

/// What happened to one event during a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Processed,
    /// Failed; the event stays pending until `not_before` (or the next cycle).
    Retry { not_before: Option<DateTime<Utc>> },
    /// Failed permanently; the event will not be selected again.
    DeadLettered,
}

/// Tally of one [`crate::OutboxPoller::drain_once`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub selected: usize,
    pub processed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Outcomes that could not be written back to the outbox.
    pub store_errors: usize,
    /// The cycle did not run because another drain was in progress.
    pub skipped: bool,
    /// Earliest scheduled retry among this cycle's backed-off failures.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl DrainReport {
    pub(crate) fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Processed => self.processed += 1,
            DispatchOutcome::Retry { not_before } => {
                self.retried += 1;
                if let Some(at) = not_before {
                    self.next_retry_at = Some(self.next_retry_at.map_or(at, |cur| cur.min(at)));
                }
            }
            DispatchOutcome::DeadLettered => self.dead_lettered += 1,
        }
    }

    pub fn failed(&self) -> usize {
        self.retried + self.dead_lettered
    }
}
