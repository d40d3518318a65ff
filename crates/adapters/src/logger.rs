//! Structured JSON logger adapter.

use crate::log_sink::LogSink;
use blob_sync_ports::{ClockPort, LogEvent, LogFields, LogLevel, LoggerPort};
use blob_sync_shared::redaction::{REDACTED, is_secret_key};
use blob_sync_shared::{ErrorCode, ErrorEnvelope, Result};
use serde_json::Value;
use std::sync::Arc;

/// JSON logger emitting one line per event.
#[derive(Clone)]
pub struct JsonLogger {
    sink: Arc<dyn LogSink>,
    clock: Arc<dyn ClockPort>,
    base_fields: LogFields,
    min_level: LogLevel,
}

impl JsonLogger {
    /// Create a JSON logger backed by the provided sink. Defaults to `info`.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>, clock: Arc<dyn ClockPort>) -> Self {
        Self {
            sink,
            clock,
            base_fields: LogFields::new(),
            min_level: LogLevel::Info,
        }
    }

    /// Set base fields applied to every event.
    #[must_use]
    pub fn with_base_fields(mut self, fields: LogFields) -> Self {
        self.base_fields = fields;
        self
    }

    /// Set the minimum log level.
    #[must_use]
    pub const fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }
}

/// Parse `debug`, `info`, `warn` or `error` (case-insensitive).
pub fn parse_log_level(raw: &str) -> Result<LogLevel> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            format!("unknown log level: {other}"),
        )),
    }
}

impl LoggerPort for JsonLogger {
    fn log(&self, event: LogEvent) {
        if level_rank(event.level) < level_rank(self.min_level) {
            return;
        }

        let mut fields = self.base_fields.clone();
        if let Some(extra) = event.fields {
            fields.extend(extra);
        }

        let mut payload = serde_json::Map::new();
        payload.insert("timestampMs".to_owned(), Value::from(self.clock.now_ms()));
        payload.insert("level".to_owned(), Value::from(level_str(event.level)));
        payload.insert("event".to_owned(), Value::from(event.event.as_ref()));
        payload.insert("message".to_owned(), Value::from(event.message.as_ref()));
        if !fields.is_empty() {
            let mut object = serde_json::Map::new();
            for (key, value) in fields {
                object.insert(key.into_string(), value);
            }
            let mut object = Value::Object(object);
            redact_value(&mut object);
            payload.insert("fields".to_owned(), object);
        }
        if let Some(mut error) = event.error {
            redact_value(&mut error);
            payload.insert("error".to_owned(), error);
        }

        let line = serde_json::to_string(&Value::Object(payload)).map_or_else(
            |_| {
                "{\"level\":\"error\",\"event\":\"logger.serialize_failed\",\"message\":\"log serialization failed\"}\n"
                    .to_owned()
            },
            |mut encoded| {
                encoded.push('\n');
                encoded
            },
        );
        self.sink.write_line(&line);
    }

    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort> {
        let mut merged = self.base_fields.clone();
        merged.extend(fields);
        Box::new(Self {
            base_fields: merged,
            ..self.clone()
        })
    }
}

const fn level_rank(level: LogLevel) -> u8 {
    match level {
        LogLevel::Debug => 10,
        LogLevel::Info => 20,
        LogLevel::Warn => 30,
        LogLevel::Error => 40,
    }
}

const fn level_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map.iter_mut() {
                if is_secret_key(key) {
                    *nested = Value::from(REDACTED);
                } else {
                    redact_value(nested);
                }
            }
        },
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        _ => {},
    }
}
