//! Diagnostic event reporting.
//!
//! Drivers report operator-relevant failures (SSL downgrade, charset and
//! database selection failures) through a [`DiagnosticSink`] in addition to
//! returning typed errors, so the events are visible even when callers only
//! check the outcome.

use std::fmt;
use std::sync::Mutex;

/// Severity of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of diagnostic events.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, severity: Severity, message: &str);
}

/// Forwards events to `tracing` at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Debug => tracing::debug!(target: "myconn::diagnostics", "{}", message),
            Severity::Info => tracing::info!(target: "myconn::diagnostics", "{}", message),
            Severity::Warning => tracing::warn!(target: "myconn::diagnostics", "{}", message),
            Severity::Error => tracing::error!(target: "myconn::diagnostics", "{}", message),
        }
    }
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub severity: Severity,
    pub message: String,
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of events recorded so far.
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Events at or above `severity`.
    pub fn at_least(&self, severity: Severity) -> Vec<DiagnosticEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.severity >= severity)
            .collect()
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, severity: Severity, message: &str) {
        let event = DiagnosticEvent {
            severity,
            message: message.to_string(),
        };
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.record(Severity::Info, "first");
        sink.record(Severity::Error, "second");

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "first");
        assert_eq!(events[1].severity, Severity::Error);
    }

    #[test]
    fn test_at_least_filters() {
        let sink = MemorySink::new();
        sink.record(Severity::Debug, "noise");
        sink.record(Severity::Warning, "careful");
        sink.record(Severity::Error, "broken");

        let serious = sink.at_least(Severity::Warning);
        assert_eq!(serious.len(), 2);
        assert!(serious.iter().all(|e| e.severity >= Severity::Warning));
    }

    #[test]
    fn test_tracing_sink_without_subscriber() {
        TracingSink.record(Severity::Error, "no subscriber installed");
        assert_eq!(Severity::Warning.to_string(), "warning");
    }
}
