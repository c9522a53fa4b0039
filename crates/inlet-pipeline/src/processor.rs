//! Event processor: drains queued envelopes through the downstream handler.
//!
//! Exactly one drain pass runs at a time per process, guarded by an atomic
//! flag. Passes are spawned on demand (by capture, retry re-queue, the
//! recovery loader, and the health monitor) and end when the queue is
//! empty. Every state change is persisted before the next envelope is
//! dequeued.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use inlet_core::{Clock, Envelope, ProcessingState};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::Result,
    handler::EventHandler,
    queue::IngressQueue,
    retry::RetrySchedule,
    store::EnvelopeStore,
};

/// Counters accumulated since pipeline construction.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PipelineStats {
    /// Events accepted by `capture_event`.
    pub captured: u64,
    /// Envelopes that reached `Completed`.
    pub completed: u64,
    /// Retry attempts handed to the scheduler.
    pub retries_scheduled: u64,
    /// Envelopes that exhausted their retry budget.
    pub permanently_failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    captured: AtomicU64,
    completed: AtomicU64,
    retries_scheduled: AtomicU64,
    permanently_failed: AtomicU64,
}

struct Inner {
    store: Arc<dyn EnvelopeStore>,
    queue: Arc<IngressQueue>,
    handler: Arc<dyn EventHandler>,
    clock: Arc<dyn Clock>,
    schedule: RetrySchedule,
    cancel: CancellationToken,
    draining: AtomicBool,
    in_flight: AtomicUsize,
    counters: Counters,
}

/// Cheap-to-clone handle driving drain passes and retry scheduling.
#[derive(Clone)]
pub struct Processor {
    inner: Arc<Inner>,
}

impl Processor {
    /// Creates a processor over the given collaborators.
    pub fn new(
        store: Arc<dyn EnvelopeStore>,
        queue: Arc<IngressQueue>,
        handler: Arc<dyn EventHandler>,
        clock: Arc<dyn Clock>,
        schedule: RetrySchedule,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                queue,
                handler,
                clock,
                schedule,
                cancel,
                draining: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                counters: Counters::default(),
            }),
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn EnvelopeStore> {
        &self.inner.store
    }

    pub(crate) fn queue(&self) -> &Arc<IngressQueue> {
        &self.inner.queue
    }

    /// Queues a freshly captured envelope and starts draining.
    pub fn enqueue_captured(&self, envelope: Envelope) {
        self.inner.counters.captured.fetch_add(1, Ordering::Relaxed);
        self.inner.queue.push(envelope);
        self.trigger_drain();
    }

    /// Starts a drain pass unless one is already running.
    ///
    /// Safe to call from any context; extra calls while a pass is active
    /// are no-ops, which is what enforces the single-drain invariant.
    pub fn trigger_drain(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let this = self.clone();
            tokio::spawn(this.drain());
        }
    }

    /// Whether a drain pass is currently running.
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// Number of envelopes waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.len()
    }

    /// Number of envelopes currently with the handler.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Snapshot of the lifetime counters.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            captured: self.inner.counters.captured.load(Ordering::Relaxed),
            completed: self.inner.counters.completed.load(Ordering::Relaxed),
            retries_scheduled: self.inner.counters.retries_scheduled.load(Ordering::Relaxed),
            permanently_failed: self.inner.counters.permanently_failed.load(Ordering::Relaxed),
        }
    }

    /// One drain pass: consumes queued envelopes until the queue is empty.
    async fn drain(self) {
        debug!("drain pass started");

        loop {
            if self.inner.cancel.is_cancelled() {
                break;
            }
            let Some(envelope) = self.inner.queue.pop() else { break };
            let envelope_id = envelope.id;

            self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
            let outcome = self.process_envelope(envelope).await;
            self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Err(storage_error) = outcome {
                // The envelope stays in whatever state the store last saw;
                // the recovery loader picks it up on the next start.
                error!(
                    envelope_id = %envelope_id,
                    error = %storage_error,
                    "dropping envelope from queue after storage failure"
                );
            }
        }

        self.inner.draining.store(false, Ordering::Release);

        // A capture or retry re-queue can land between the final pop and
        // the flag clearing; restart rather than strand the envelope.
        if !self.inner.queue.is_empty() && !self.inner.cancel.is_cancelled() {
            self.trigger_drain();
        }

        debug!("drain pass finished");
    }

    /// Runs one processing attempt and drives the state transition.
    ///
    /// Handler failures are contained here: they are recorded on the
    /// envelope and either retried or marked permanent. Only storage
    /// failures propagate.
    async fn process_envelope(&self, mut envelope: Envelope) -> Result<()> {
        envelope.attempt_count = envelope.attempt_count.saturating_add(1);
        envelope.state = ProcessingState::Processing;
        self.inner.store.persist(envelope.clone()).await?;

        debug!(
            envelope_id = %envelope.id,
            source_id = %envelope.source_id,
            attempt = envelope.attempt_count,
            "dispatching envelope to handler"
        );

        match self.inner.handler.handle(&envelope).await {
            Ok(()) => {
                envelope.state = ProcessingState::Completed;
                envelope.next_attempt_at = None;
                self.inner.store.persist(envelope.clone()).await?;
                self.inner.counters.completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    envelope_id = %envelope.id,
                    attempt = envelope.attempt_count,
                    "envelope processed"
                );
            },
            Err(handler_error) => {
                envelope.last_error = Some(handler_error.to_string());
                let attempt = u32::try_from(envelope.attempt_count).unwrap_or(u32::MAX);

                if self.inner.schedule.allows_retry(attempt) {
                    let delay = self.inner.schedule.delay(attempt);
                    envelope.state = ProcessingState::Pending;
                    envelope.next_attempt_at = Some(
                        self.inner.clock.now_utc()
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::zero()),
                    );
                    self.inner.store.persist(envelope.clone()).await?;
                    warn!(
                        envelope_id = %envelope.id,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %handler_error,
                        "handler failed, retry scheduled"
                    );
                    self.schedule_retry(envelope, delay);
                } else {
                    envelope.state = ProcessingState::Failed;
                    envelope.next_attempt_at = None;
                    self.inner.store.persist(envelope.clone()).await?;
                    self.inner.counters.permanently_failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        envelope_id = %envelope.id,
                        attempt,
                        error = %handler_error,
                        "retries exhausted, envelope permanently failed"
                    );
                }
            },
        }

        Ok(())
    }

    /// Arranges deferred re-submission of a failed envelope.
    ///
    /// The wait runs in a detached task so neither the drain loop nor new
    /// captures are held up. Shutdown cancels pending waits; the envelope
    /// stays `Pending` on disk and is recovered on the next start.
    fn schedule_retry(&self, envelope: Envelope, delay: std::time::Duration) {
        self.inner.counters.retries_scheduled.fetch_add(1, Ordering::Relaxed);

        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = this.inner.clock.sleep(delay) => {
                    this.inner.queue.push(envelope);
                    this.trigger_drain();
                }
                () = this.inner.cancel.cancelled() => {}
            }
        });
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("queue_depth", &self.queue_depth())
            .field("in_flight", &self.in_flight())
            .field("is_draining", &self.is_draining())
            .finish()
    }
}
