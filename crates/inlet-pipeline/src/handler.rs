//! Downstream handler contract.
//!
//! The pipeline hands every dequeued envelope to exactly one handler
//! supplied at construction. This replaces broadcast-style listener
//! registration with explicit dependency injection: the processor holds one
//! handler reference and nothing else observes envelope delivery.

use async_trait::async_trait;
use inlet_core::Envelope;
use thiserror::Error;
use tracing::debug;

/// Failure returned by the downstream handler for one attempt.
///
/// Recorded on the envelope as `last_error` and retried within the
/// pipeline's budget; never surfaced to whoever captured the event.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// The failure description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Consumer of captured events.
///
/// Implementations perform the domain-specific side effects for an event.
/// Crash recovery can redeliver an envelope that was already handed over,
/// so handlers must be safe to invoke more than once for the same
/// envelope id.
#[async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Processes one envelope.
    ///
    /// Returning `Err` schedules a retry until the envelope's attempt
    /// budget is exhausted.
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

/// Handler that acknowledges every envelope without side effects.
///
/// Useful as a wiring placeholder and in tests where delivery outcome is
/// the only thing under observation.
#[derive(Debug, Default)]
pub struct NoOpHandler;

impl NoOpHandler {
    /// Creates a new no-op handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventHandler for NoOpHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        debug!(
            envelope_id = %envelope.id,
            source_id = %envelope.source_id,
            category = %envelope.category,
            "acknowledging envelope without processing"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn no_op_handler_acknowledges() {
        let handler = NoOpHandler::new();
        let envelope = Envelope::new(
            "channel-1".to_string(),
            "message".to_string(),
            b"{}".to_vec(),
            Utc::now(),
        );

        assert!(handler.handle(&envelope).await.is_ok());
    }

    #[test]
    fn handler_error_preserves_message() {
        let error = HandlerError::new("contact sync rejected the payload");
        assert_eq!(error.message(), "contact sync rejected the payload");
        assert_eq!(error.to_string(), "contact sync rejected the payload");
    }
}
