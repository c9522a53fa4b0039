//! In-process buffer of envelopes awaiting a drain pass.
//!
//! Ordering is FIFO within a process. The queue is only an accelerator: the
//! envelope store remains the authoritative source of truth, and the
//! recovery loader rebuilds this buffer from it after a restart.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};

use inlet_core::Envelope;

/// FIFO queue of envelopes waiting to be (re-)processed.
#[derive(Debug, Default)]
pub struct IngressQueue {
    inner: Mutex<VecDeque<Envelope>>,
}

impl IngressQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an envelope at the back of the queue.
    pub fn push(&self, envelope: Envelope) {
        self.lock().push_back(envelope);
    }

    /// Removes and returns the oldest queued envelope.
    pub fn pop(&self) -> Option<Envelope> {
        self.lock().pop_front()
    }

    /// Number of envelopes currently queued.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue holds no envelopes.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Envelope>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn envelope(source_id: &str) -> Envelope {
        Envelope::new(source_id.to_string(), "message".to_string(), Vec::new(), Utc::now())
    }

    #[test]
    fn pops_in_capture_order() {
        let queue = IngressQueue::new();
        queue.push(envelope("first"));
        queue.push(envelope("second"));
        queue.push(envelope("third"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().map(|e| e.source_id), Some("first".to_string()));
        assert_eq!(queue.pop().map(|e| e.source_id), Some("second".to_string()));
        assert_eq!(queue.pop().map(|e| e.source_id), Some("third".to_string()));
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }
}
