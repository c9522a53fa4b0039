//! Durable ingestion pipeline for inbound messaging-provider events.
//!
//! Accepts webhook events without loss, including across process crashes,
//! and drives each one through a bounded-retry lifecycle:
//!
//! 1. **Capture**: the event is persisted as a `Pending` envelope before
//!    the caller gets an id back, then queued in process memory.
//! 2. **Drain**: a single drain pass at a time hands queued envelopes to
//!    the injected downstream handler and persists every state change.
//! 3. **Retry**: transient handler failures re-queue the envelope after a
//!    progressive delay, up to a fixed budget; exhausted envelopes are kept
//!    as `Failed` for operator inspection.
//! 4. **Recover**: on startup the queue is rebuilt from unfinished
//!    envelopes in the store, so a crash never loses accepted work.
//!
//! A periodic health monitor restarts draining if the queue ever stalls,
//! and a garbage collector prunes completed envelopes past their retention
//! window.
//!
//! The pipeline is deliberately single-process: there is no cross-process
//! claim mechanism, and running two pipelines over one store can
//! double-process envelopes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod gc;
pub mod handler;
pub mod health;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod recovery;
pub mod retry;
pub mod store;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use handler::{EventHandler, HandlerError, NoOpHandler};
pub use pipeline::{IngestPipeline, PipelineConfig, PipelineStatus};
pub use processor::PipelineStats;
pub use retry::{RetrySchedule, DEFAULT_MAX_RETRIES};
pub use store::{EnvelopeStore, SqliteEnvelopeStore};
