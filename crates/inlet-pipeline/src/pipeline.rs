//! Pipeline facade: the context value tying every component together.
//!
//! [`IngestPipeline`] is constructed once at startup from its collaborators
//! (store, handler, configuration, clock) and passed to whatever accepts
//! inbound events. There is no global state; tests build pipelines over the
//! mock store and a test clock.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use inlet_core::{Clock, Envelope, EnvelopeId};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::{PipelineError, Result},
    gc,
    handler::EventHandler,
    health::HealthMonitor,
    processor::{PipelineStats, Processor},
    queue::IngressQueue,
    recovery,
    retry::{self, RetrySchedule},
    store::EnvelopeStore,
};

/// Runtime configuration for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineConfig {
    /// Maximum retries per envelope after the initial attempt.
    pub max_retries: u32,

    /// Interval between stalled-queue health checks.
    pub health_interval: Duration,

    /// How long shutdown waits for an active drain pass.
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: retry::DEFAULT_MAX_RETRIES,
            health_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Operational snapshot for health-check endpoints.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PipelineStatus {
    /// Envelopes waiting in the in-memory queue.
    pub pending_count: usize,

    /// Envelopes currently with the downstream handler.
    pub processing_count: usize,

    /// Whether a drain pass is running.
    pub is_draining: bool,

    /// Time since the pipeline was constructed.
    pub uptime: Duration,
}

/// Durable ingestion pipeline for inbound provider events.
///
/// Owns the envelope store handle, the in-memory queue, and the processor;
/// the downstream handler is injected at construction. Typical startup:
///
/// ```no_run
/// use std::sync::Arc;
///
/// use inlet_core::RealClock;
/// use inlet_pipeline::{
///     config::Config, handler::NoOpHandler, pipeline::IngestPipeline,
///     store::SqliteEnvelopeStore,
/// };
///
/// # async fn example() -> inlet_pipeline::error::Result<()> {
/// let config = Config::load()?;
/// let store = SqliteEnvelopeStore::open(
///     &config.database_path,
///     config.database_max_connections,
/// )
/// .await?;
///
/// let pipeline = IngestPipeline::new(
///     Arc::new(store),
///     Arc::new(NoOpHandler::new()),
///     config.pipeline_config(),
///     Arc::new(RealClock::new()),
/// );
///
/// pipeline.recover().await?;
/// pipeline.start();
/// # Ok(())
/// # }
/// ```
pub struct IngestPipeline {
    processor: Processor,
    store: Arc<dyn EnvelopeStore>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    cancel: CancellationToken,
    started: Instant,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl IngestPipeline {
    /// Creates a pipeline from its collaborators.
    ///
    /// The handler reference supplied here is the only consumer of
    /// captured events; there is no listener registration.
    pub fn new(
        store: Arc<dyn EnvelopeStore>,
        handler: Arc<dyn EventHandler>,
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let processor = Processor::new(
            store.clone(),
            Arc::new(IngressQueue::new()),
            handler,
            clock.clone(),
            RetrySchedule::new(config.max_retries),
            cancel.clone(),
        );
        let started = clock.now();

        Self {
            processor,
            store,
            clock,
            config,
            cancel,
            started,
            health_task: Mutex::new(None),
        }
    }

    /// Captures one inbound event.
    ///
    /// Builds a `Pending` envelope, persists it, queues it, and returns its
    /// id; processing happens asynchronously. If the durable write fails,
    /// the event is rejected with [`PipelineError::Capture`] and nothing is
    /// queued; the caller should rely on provider-side retry.
    ///
    /// Safe to call from arbitrarily many concurrent contexts; it never
    /// blocks on processing.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Capture`] when the durable write fails.
    pub async fn capture_event(
        &self,
        source_id: impl Into<String>,
        category: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<EnvelopeId> {
        let envelope = Envelope::new(
            source_id.into(),
            category.into(),
            payload,
            self.clock.now_utc(),
        );
        let id = envelope.id;

        self.store
            .persist(envelope.clone())
            .await
            .map_err(|source| PipelineError::Capture { source })?;
        self.processor.enqueue_captured(envelope);

        debug!(envelope_id = %id, "captured inbound event");
        Ok(id)
    }

    /// Rebuilds the queue from unfinished envelopes in the store.
    ///
    /// Call once at startup, before accepting traffic. Envelopes found
    /// mid-attempt are reset to `Pending` and redelivered; a drain pass is
    /// triggered if anything was re-queued. Returns the number of
    /// re-queued envelopes.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read or updated.
    pub async fn recover(&self) -> Result<usize> {
        recovery::reload_unfinished(&self.processor).await
    }

    /// Starts the background health monitor.
    ///
    /// Idempotent; subsequent calls are no-ops.
    pub fn start(&self) {
        let mut guard =
            self.health_task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_some() {
            return;
        }

        info!(
            health_interval_secs = self.config.health_interval.as_secs(),
            max_retries = self.config.max_retries,
            "starting ingestion pipeline"
        );
        *guard = Some(HealthMonitor::new(self.config.health_interval).spawn(
            self.processor.clone(),
            self.clock.clone(),
            self.cancel.clone(),
        ));
    }

    /// Operational snapshot for health-check endpoints.
    pub fn get_status(&self) -> PipelineStatus {
        PipelineStatus {
            pending_count: self.processor.queue_depth(),
            processing_count: self.processor.in_flight(),
            is_draining: self.processor.is_draining(),
            uptime: self.clock.now().saturating_duration_since(self.started),
        }
    }

    /// Lifetime counters since construction.
    pub fn stats(&self) -> PipelineStats {
        self.processor.stats()
    }

    /// Deletes completed envelopes older than `retention_hours`.
    ///
    /// `Pending`, `Processing`, and `Failed` envelopes are never touched;
    /// failed work is retained indefinitely for operator inspection.
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns error if the store delete fails.
    pub async fn cleanup_completed(&self, retention_hours: u32) -> Result<u64> {
        gc::prune_completed(self.store.as_ref(), self.clock.as_ref(), retention_hours).await
    }

    /// Stops background tasks and waits for the active drain pass.
    ///
    /// Pending retry timers are cancelled; their envelopes remain
    /// `Pending` in the store and are re-queued by [`recover`] on the next
    /// start.
    ///
    /// [`recover`]: Self::recover
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShutdownTimeout`] if a drain pass is still
    /// running when the configured timeout elapses.
    pub async fn shutdown(&self) -> Result<()> {
        info!("shutting down ingestion pipeline");
        self.cancel.cancel();

        let health_task =
            self.health_task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(handle) = health_task {
            let _ = handle.await;
        }

        let step = Duration::from_millis(25);
        let mut waited = Duration::ZERO;
        while self.processor.is_draining() {
            if waited >= self.config.shutdown_timeout {
                return Err(PipelineError::ShutdownTimeout {
                    timeout: self.config.shutdown_timeout,
                });
            }
            self.clock.sleep(step).await;
            waited += step;
        }

        info!("ingestion pipeline stopped");
        Ok(())
    }
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("config", &self.config)
            .field("processor", &self.processor)
            .finish()
    }
}
