//! Injected diagnostics for the fetch engine.
//!
//! Components never reach for a process-wide logger. Each one receives an
//! `Arc<dyn Diagnostics>` at construction; the binary passes
//! [`TracingDiagnostics`], tests pass [`NoopDiagnostics`] or
//! [`MemoryDiagnostics`].

use std::fmt::Arguments;
use std::sync::Mutex;
use tracing::Level;

/// Logging interface handed to every engine component.
pub trait Diagnostics: Send + Sync {
    /// Core hook; the level helpers delegate here.
    fn log(&self, level: Level, args: Arguments<'_>);

    fn debug(&self, args: Arguments<'_>) {
        self.log(Level::DEBUG, args);
    }

    fn info(&self, args: Arguments<'_>) {
        self.log(Level::INFO, args);
    }

    fn warn(&self, args: Arguments<'_>) {
        self.log(Level::WARN, args);
    }

    fn error(&self, args: Arguments<'_>) {
        self.log(Level::ERROR, args);
    }
}

/// Forwards to the `tracing` subscriber installed by the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn log(&self, level: Level, args: Arguments<'_>) {
        match level {
            Level::ERROR => tracing::error!("{}", args),
            Level::WARN => tracing::warn!("{}", args),
            Level::INFO => tracing::info!("{}", args),
            Level::DEBUG => tracing::debug!("{}", args),
            _ => tracing::trace!("{}", args),
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDiagnostics;

impl Diagnostics for NoopDiagnostics {
    fn log(&self, _level: Level, _args: Arguments<'_>) {}
}

/// Keeps every message in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    entries: Mutex<Vec<(Level, String)>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded `(level, message)` pairs in emission order.
    pub fn entries(&self) -> Vec<(Level, String)> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Messages recorded at exactly `level`.
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, msg)| msg)
            .collect()
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn log(&self, level: Level, args: Arguments<'_>) {
        let message = args.to_string();
        match self.entries.lock() {
            Ok(mut entries) => entries.push((level, message)),
            Err(poisoned) => poisoned.into_inner().push((level, message)),
        }
    }
}
