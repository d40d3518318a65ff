//! Structured logging boundary contract.
//!
//! Event names are stable and dotted (`sync.probe.rpc_failed`); messages are
//! human-readable and must not carry file content.

use blob_sync_shared::ErrorEnvelope;
use std::collections::BTreeMap;

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug.
    Debug,
    /// Info.
    Info,
    /// Warn.
    Warn,
    /// Error.
    Error,
}

/// Additional event fields.
pub type LogFields = BTreeMap<Box<str>, serde_json::Value>;

/// Build a field map from key/value pairs.
#[must_use]
pub fn log_fields<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> LogFields {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_owned().into_boxed_str(), value))
        .collect()
}

/// JSON payload describing an error envelope.
#[must_use]
pub fn error_payload(error: &ErrorEnvelope) -> serde_json::Value {
    serde_json::json!({
        "code": error.code.to_string(),
        "kind": error.kind.to_string(),
        "class": error.class.to_string(),
        "message": error.message,
    })
}

/// Structured log event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Stable event name.
    pub event: Box<str>,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message (safe, redacted).
    pub message: Box<str>,
    /// Optional structured fields.
    pub fields: Option<LogFields>,
    /// Optional error payload.
    pub error: Option<serde_json::Value>,
}

impl LogEvent {
    /// Event without an error payload.
    #[must_use]
    pub fn new(level: LogLevel, event: &str, message: &str, fields: Option<LogFields>) -> Self {
        Self {
            event: event.into(),
            level,
            message: message.into(),
            fields,
            error: None,
        }
    }
}

/// Boundary contract for structured logging.
pub trait LoggerPort: Send + Sync {
    /// Emit a structured event.
    fn log(&self, event: LogEvent);

    /// Create a child logger with base fields applied to every event.
    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort>;

    /// Debug event.
    fn debug(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogEvent::new(LogLevel::Debug, event, message, fields));
    }

    /// Info event.
    fn info(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogEvent::new(LogLevel::Info, event, message, fields));
    }

    /// Warn event.
    fn warn(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogEvent::new(LogLevel::Warn, event, message, fields));
    }

    /// Error event.
    fn error(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogEvent::new(LogLevel::Error, event, message, fields));
    }

    /// Warn event carrying an error payload.
    fn warn_error(
        &self,
        event: &str,
        message: &str,
        fields: Option<LogFields>,
        error: &ErrorEnvelope,
    ) {
        let mut record = LogEvent::new(LogLevel::Warn, event, message, fields);
        record.error = Some(error_payload(error));
        self.log(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob_sync_shared::{ErrorClass, ErrorCode};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        events: Mutex<Vec<LogEvent>>,
    }

    impl LoggerPort for Capture {
        fn log(&self, event: LogEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
        }

        fn child(&self, _fields: LogFields) -> Box<dyn LoggerPort> {
            Box::new(Self::default())
        }
    }

    #[test]
    fn convenience_methods_set_level_and_error() {
        let capture = Capture::default();
        let error = ErrorEnvelope::unexpected(ErrorCode::timeout(), "slow", ErrorClass::Retriable);

        capture.debug("sync.a", "a", None);
        capture.warn_error(
            "sync.b",
            "b",
            Some(log_fields([("batch", serde_json::json!(3))])),
            &error,
        );

        let events = capture.events.lock().map(|events| events.clone()).unwrap_or_default();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].level, LogLevel::Debug);
        assert_eq!(events[1].level, LogLevel::Warn);
        assert_eq!(
            events[1].fields.as_ref().and_then(|fields| fields.get("batch")),
            Some(&serde_json::json!(3))
        );
        assert_eq!(
            events[1].error.as_ref().and_then(|error| error.get("code")),
            Some(&serde_json::json!("core:timeout"))
        );
    }
}
