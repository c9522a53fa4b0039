//! Startup recovery: rebuilds the in-memory queue from the store.
//!
//! The queue does not survive a restart, but the store does. Before normal
//! traffic resumes, every unfinished envelope is re-queued in capture
//! order. Envelopes found mid-attempt are demoted back to `Pending` first:
//! handler side effects are not atomic, so a crash during handling must be
//! treated as "not done" and redelivered.

use inlet_core::ProcessingState;
use tracing::{info, warn};

use crate::{error::Result, processor::Processor};

/// Reloads unfinished envelopes into the queue and starts draining.
///
/// Returns the number of envelopes re-queued. Unreadable records are
/// skipped (with a warning) by the store and do not abort recovery.
pub(crate) async fn reload_unfinished(processor: &Processor) -> Result<usize> {
    let envelopes = processor.store().load_unfinished().await?;
    let count = envelopes.len();

    for mut envelope in envelopes {
        if envelope.state == ProcessingState::Processing {
            warn!(
                envelope_id = %envelope.id,
                attempt = envelope.attempt_count,
                "resetting envelope interrupted mid-attempt"
            );
            envelope.state = ProcessingState::Pending;
            processor.store().persist(envelope.clone()).await?;
        }
        processor.queue().push(envelope);
    }

    if count > 0 {
        info!(requeued = count, "recovered unfinished envelopes");
        processor.trigger_drain();
    }

    Ok(count)
}
