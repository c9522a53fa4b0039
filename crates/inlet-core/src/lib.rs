//! Core domain models and persistence for the Inlet ingestion pipeline.
//!
//! Provides strongly-typed envelope records, the processing state machine,
//! the clock abstraction, and the SQLite repository used as the durable
//! envelope store. The pipeline crate builds the runtime behavior on top of
//! these foundations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{Envelope, EnvelopeId, ProcessingState};
pub use time::{Clock, RealClock, TestClock};
