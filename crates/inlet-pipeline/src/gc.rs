//! Retention pruning for finished envelopes.
//!
//! Completed envelopes are kept for a retention window and then deleted to
//! reclaim disk space. `Pending`, `Processing`, and `Failed` envelopes are
//! never touched here; failed work is retained indefinitely so operators
//! can inspect it.

use inlet_core::Clock;
use tracing::info;

use crate::{error::Result, store::EnvelopeStore};

/// Deletes completed envelopes older than the retention window.
///
/// Returns the number of records removed.
pub(crate) async fn prune_completed(
    store: &dyn EnvelopeStore,
    clock: &dyn Clock,
    retention_hours: u32,
) -> Result<u64> {
    let cutoff = clock.now_utc() - chrono::Duration::hours(i64::from(retention_hours));
    let removed = store.delete_completed_before(cutoff).await?;

    if removed > 0 {
        info!(removed, retention_hours, "pruned completed envelopes");
    }

    Ok(removed)
}
