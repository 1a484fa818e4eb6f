//! Logging sink and tracing setup.
//!
//! The engine reports notable operations through an injected [`LogSink`]: a
//! single-method, fire-and-forget capability. Nothing in the engine ever waits
//! on a sink or branches on what it does. [`TracingLogSink`] forwards to
//! `tracing`, which is what the binary installs; tests typically use a closure
//! that collects messages.

use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Receiver of human-readable log lines.
pub trait LogSink: Send + Sync {
    /// Record one message.
    fn log(&self, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// Shared handle to a sink, as stored by sessions and channel models.
pub type SharedLogSink = Arc<dyn LogSink>;

/// Forwards every message to `tracing` at INFO level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, message: &str) {
        tracing::info!(target: "rust_siggen", "{}", message);
    }
}

/// Discards every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log(&self, _message: &str) {}
}

/// Collects messages in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryLogSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryLogSink {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the collected lines.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// True if any collected line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(message.to_string());
        }
    }
}

/// The default sink used when none is injected.
pub fn default_sink() -> SharedLogSink {
    Arc::new(TracingLogSink)
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `default_level` when set. Calling this twice is
/// harmless; the second installation is ignored.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
