//! Testing utilities for caseflow.
//!
//! - [`fixtures`]: ready-made workflows, triggers and events
//! - [`RecordingHandler`] / [`ScriptedHandler`]: [`caseflow::EventHandler`]
//!   fakes for driving the outbox poller
//! - [`TestHarness`]: an in-memory store wired to an engine and matcher

pub mod fixtures;
mod handlers;
mod harness;

pub use handlers::{RecordingHandler, ScriptedHandler};
pub use harness::TestHarness;
