//! Shared helpers for pipeline integration tests.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use inlet_core::{Envelope, EnvelopeId};
use inlet_pipeline::handler::{EventHandler, HandlerError};

/// Installs a tracing subscriber once per test binary.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

/// Polls `check` until it returns true, for up to two seconds.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Handler that succeeds and counts invocations.
#[derive(Debug, Default)]
pub struct CountingHandler {
    invocations: AtomicUsize,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for CountingHandler {
    async fn handle(&self, _envelope: &Envelope) -> Result<(), HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler that fails every attempt.
#[derive(Debug, Default)]
pub struct FailingHandler {
    invocations: AtomicUsize,
}

impl FailingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for FailingHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::new(format!("refusing envelope {}", envelope.id)))
    }
}

/// Handler that fails the first `fail_times` attempts for one source and
/// succeeds for everything else.
#[derive(Debug)]
pub struct FlakyHandler {
    flaky_source: String,
    fail_times: usize,
    attempts: Mutex<HashMap<EnvelopeId, usize>>,
}

impl FlakyHandler {
    pub fn new(flaky_source: impl Into<String>, fail_times: usize) -> Self {
        Self {
            flaky_source: flaky_source.into(),
            fail_times,
            attempts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EventHandler for FlakyHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        if envelope.source_id != self.flaky_source {
            return Ok(());
        }

        let attempt = {
            let mut attempts =
                self.attempts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let entry = attempts.entry(envelope.id).or_insert(0);
            *entry += 1;
            *entry
        };

        if attempt <= self.fail_times {
            Err(HandlerError::new(format!("transient failure on attempt {attempt}")))
        } else {
            Ok(())
        }
    }
}

/// Handler that records the order envelopes arrive in, then succeeds.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(envelope.source_id.clone());
        Ok(())
    }
}

/// Handler that never returns, simulating a hung downstream or a crash
/// mid-attempt.
#[derive(Debug, Default)]
pub struct StuckHandler {
    entered: AtomicUsize,
}

impl StuckHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for StuckHandler {
    async fn handle(&self, _envelope: &Envelope) -> Result<(), HandlerError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}
