//! Structured logging to the host through stderr.

use std::io::Write;
use std::sync::Arc;

use nexus_core::rpc::protocol::{LogLevel, LogMessage};
use parking_lot::Mutex;

/// Writes one `{logLevel, message}` JSON object per line.
///
/// The host forwards these records to its own log. Anything else written to
/// stderr is treated as a fault and ends the session, so extensions should
/// log only through this type.
#[derive(Clone)]
pub struct StderrLogger {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl StderrLogger {
    pub fn new() -> Self {
        Self::with_writer(std::io::stderr())
    }

    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let record = LogMessage::new(level, message);
        let Ok(mut line) = serde_json::to_vec(&record) else {
            return;
        };
        line.push(b'\n');

        let mut writer = self.writer.lock();
        // Nowhere left to report a broken stderr.
        let _ = writer.write_all(&line).and_then(|_| writer.flush());
    }

    pub fn trace(&self, message: impl Into<String>) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Information, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}

impl Default for StderrLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StderrLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StderrLogger").finish_non_exhaustive()
    }
}
