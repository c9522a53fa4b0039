//! Periodic self-check for a stalled queue.
//!
//! Correct state management should never leave envelopes queued without an
//! active drain pass, but a lost wakeup would otherwise strand them until
//! the next restart. The monitor is the safety net: on a fixed interval it
//! checks queue depth against the drain flag and forcibly restarts
//! draining when they disagree.

use std::{sync::Arc, time::Duration};

use inlet_core::Clock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::processor::Processor;

/// Watchdog that restarts draining when the queue is populated but idle.
#[derive(Debug, Clone, Copy)]
pub struct HealthMonitor {
    interval: Duration,
}

impl HealthMonitor {
    /// Creates a monitor that checks every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Spawns the monitoring loop; it stops when `cancel` fires.
    pub fn spawn(
        self,
        processor: Processor,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = clock.sleep(self.interval) => {
                        let depth = processor.queue_depth();
                        if depth > 0 && !processor.is_draining() {
                            warn!(
                                queue_depth = depth,
                                "queue populated with no active drain pass, restarting"
                            );
                            processor.trigger_drain();
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use inlet_core::{Envelope, ProcessingState, RealClock, TestClock};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        handler::NoOpHandler,
        queue::IngressQueue,
        retry::RetrySchedule,
        store::{mock::MockEnvelopeStore, EnvelopeStore},
    };

    #[tokio::test]
    async fn restarts_draining_for_a_stalled_queue() {
        let mock = Arc::new(MockEnvelopeStore::new());
        let store: Arc<dyn EnvelopeStore> = mock.clone();
        let cancel = CancellationToken::new();
        let processor = Processor::new(
            store,
            Arc::new(IngressQueue::new()),
            Arc::new(NoOpHandler::new()),
            Arc::new(TestClock::new()),
            RetrySchedule::default(),
            cancel.clone(),
        );

        // Simulate the race the monitor guards against: an envelope lands
        // in the queue without anything starting a drain pass.
        let envelope = Envelope::new(
            "channel-1".to_string(),
            "message".to_string(),
            Vec::new(),
            Utc::now(),
        );
        let id = envelope.id;
        processor.queue().push(envelope);
        assert!(!processor.is_draining());

        let monitor = HealthMonitor::new(Duration::from_millis(10));
        let handle = monitor.spawn(processor.clone(), Arc::new(RealClock::new()), cancel.clone());

        for _ in 0..200 {
            if mock.state_of(id).await == Some(ProcessingState::Completed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(mock.state_of(id).await, Some(ProcessingState::Completed));
        assert!(processor.queue().is_empty());

        cancel.cancel();
        let _ = handle.await;
    }
}
