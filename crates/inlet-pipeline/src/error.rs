//! Error types for pipeline operations.
//!
//! Capture-time failures are synchronous and visible to the original
//! caller; processing-time failures stay inside the pipeline and are
//! recorded on the envelope instead of propagating.

use std::time::Duration;

use inlet_core::CoreError;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The durable write during capture failed.
    ///
    /// The event was not recorded and was not queued; the caller should
    /// treat it as never captured and rely on provider-side retry.
    #[error("failed to record captured event: {source}")]
    Capture {
        /// Underlying storage failure.
        source: CoreError,
    },

    /// A storage operation failed outside of capture.
    #[error("storage error: {0}")]
    Storage(#[from] CoreError),

    /// Invalid configuration values.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// What was wrong with the configuration.
        message: String,
    },

    /// Shutdown gave up waiting for the active drain pass.
    #[error("shutdown timed out after {timeout:?} with a drain pass still running")]
    ShutdownTimeout {
        /// How long shutdown waited before giving up.
        timeout: Duration,
    },
}

impl PipelineError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}
