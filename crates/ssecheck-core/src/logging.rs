//! Per-test debug capture.
//!
//! Each test scope owns a [`DebugLogger`]. Clones share one buffer, so a handle can be
//! given to HTTP workers (a stream writer, a callback receiver) and everything they log
//! ends up in the scope's output. The buffer is only shown at the end of the test,
//! depending on the reporting policy. Every line is also emitted as a `tracing` event.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// One captured log line.
#[derive(Debug, Clone)]
pub struct CapturedMessage {
    pub time: DateTime<Local>,
    pub message: String,
}

/// Snapshot of everything a logger captured.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput(pub Vec<CapturedMessage>);

impl CapturedOutput {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|m| m.message.as_str())
    }

    /// Write every line as `<prefix>[timestamp] message`.
    pub fn dump(&self, dest: &mut dyn Write, prefix: &str) -> io::Result<()> {
        for m in &self.0 {
            writeln!(
                dest,
                "{}[{}] {}",
                prefix,
                m.time.format(TIMESTAMP_FORMAT),
                m.message
            )?;
        }
        Ok(())
    }
}

/// Cloneable capturing logger.
#[derive(Clone, Default)]
pub struct DebugLogger {
    output: Arc<Mutex<Vec<CapturedMessage>>>,
    prefix: Option<Arc<str>>,
}

impl DebugLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A view of the same buffer that prepends `prefix` to every line.
    pub fn with_prefix(&self, prefix: &str) -> Self {
        let prefix = match &self.prefix {
            Some(existing) => format!("{}{}", existing, prefix),
            None => prefix.to_string(),
        };
        Self {
            output: Arc::clone(&self.output),
            prefix: Some(prefix.into()),
        }
    }

    pub fn log(&self, message: impl fmt::Display) {
        let message = match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, message),
            None => message.to_string(),
        };
        tracing::debug!(target: "ssecheck::test", "{}", message);
        self.output.lock().push(CapturedMessage {
            time: Local::now(),
            message,
        });
    }

    pub fn output(&self) -> CapturedOutput {
        CapturedOutput(self.output.lock().clone())
    }
}

impl fmt::Debug for DebugLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugLogger")
            .field("prefix", &self.prefix)
            .field("lines", &self.output.lock().len())
            .finish()
    }
}
