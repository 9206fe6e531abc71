//! Log sinks injected into stages.
//!
//! Stages that log take an `Arc<dyn Logger>` at construction instead of
//! writing to a process-wide target. [`TracingLogger`] is the default and
//! forwards to `tracing`; [`MemoryLogger`] keeps lines in memory so tests
//! can assert on them.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::Level;

/// Destination for the lines a stage logs.
pub trait Logger: Send + Sync + 'static {
    fn log(&self, level: Level, message: &str);
}

/// Forwards every line to the `tracing` subscriber installed by the
/// application, under the `relay` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "relay", "{message}"),
            Level::WARN  => tracing::warn!(target: "relay", "{message}"),
            Level::INFO  => tracing::info!(target: "relay", "{message}"),
            Level::DEBUG => tracing::debug!(target: "relay", "{message}"),
            _            => tracing::trace!(target: "relay", "{message}"),
        }
    }
}

/// Collects lines in memory, one per call.
#[derive(Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything logged so far, joined with newlines.
    pub fn contents(&self) -> String {
        let lines = self.lines.lock();
        let mut out = String::new();
        for (_, line) in lines.iter() {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|(_, line)| line.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: Level, message: &str) {
        self.lines.lock().push((level, message.to_owned()));
    }
}

impl fmt::Debug for MemoryLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLogger").field("lines", &self.lines.lock().len()).finish()
    }
}

pub(crate) fn default_logger() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}
