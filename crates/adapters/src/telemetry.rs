//! JSON telemetry adapter (counters and timers).

use crate::log_sink::LogSink;
use blob_sync_ports::{ClockPort, TelemetryPort, TelemetryTags, TelemetryTimer};
use blob_sync_shared::redaction::{REDACTED, is_secret_key};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Telemetry adapter that emits one JSON line per metric.
#[derive(Clone)]
pub struct JsonTelemetry {
    sink: Arc<dyn LogSink>,
    clock: Arc<dyn ClockPort>,
    base_tags: TelemetryTags,
}

impl JsonTelemetry {
    /// Create a telemetry adapter backed by the provided sink.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>, clock: Arc<dyn ClockPort>) -> Self {
        Self {
            sink,
            clock,
            base_tags: TelemetryTags::new(),
        }
    }

    /// Set base tags applied to every metric.
    #[must_use]
    pub fn with_base_tags(mut self, tags: TelemetryTags) -> Self {
        self.base_tags = tags;
        self
    }

    fn emit(&self, metric: Metric<'_>, tags: Option<&TelemetryTags>) {
        let tags = merge_tags(&self.base_tags, tags);
        let line = metric_line(self.clock.now_ms(), &metric, &tags);
        self.sink.write_line(&line);
    }
}

impl TelemetryPort for JsonTelemetry {
    fn increment_counter(&self, name: &str, value: u64, tags: Option<&TelemetryTags>) {
        self.emit(
            Metric {
                kind: "counter",
                name,
                value,
                unit: None,
            },
            tags,
        );
    }

    fn record_timer_ms(&self, name: &str, duration_ms: u64, tags: Option<&TelemetryTags>) {
        self.emit(
            Metric {
                kind: "timer",
                name,
                value: duration_ms,
                unit: Some("ms"),
            },
            tags,
        );
    }

    fn start_timer(&self, name: &str, tags: Option<&TelemetryTags>) -> Box<dyn TelemetryTimer> {
        Box::new(JsonTelemetryTimer {
            telemetry: self.clone(),
            name: name.into(),
            tags: tags.cloned(),
            started_at: Instant::now(),
            stopped: AtomicBool::new(false),
        })
    }
}

struct JsonTelemetryTimer {
    telemetry: JsonTelemetry,
    name: Box<str>,
    tags: Option<TelemetryTags>,
    started_at: Instant,
    stopped: AtomicBool,
}

impl TelemetryTimer for JsonTelemetryTimer {
    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let duration_ms = u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or_default();
        self.telemetry
            .record_timer_ms(&self.name, duration_ms, self.tags.as_ref());
    }
}

struct Metric<'a> {
    kind: &'static str,
    name: &'a str,
    value: u64,
    unit: Option<&'static str>,
}

fn metric_line(timestamp_ms: u64, metric: &Metric<'_>, tags: &TelemetryTags) -> String {
    let mut payload = serde_json::Map::new();
    payload.insert("type".to_owned(), Value::from("metric"));
    payload.insert("timestampMs".to_owned(), Value::from(timestamp_ms));
    payload.insert("metricType".to_owned(), Value::from(metric.kind));
    payload.insert("name".to_owned(), Value::from(metric.name));
    payload.insert("value".to_owned(), Value::from(metric.value));
    if let Some(unit) = metric.unit {
        payload.insert("unit".to_owned(), Value::from(unit));
    }
    if !tags.is_empty() {
        let map = tags
            .iter()
            .map(|(key, value)| (key.to_string(), Value::from(value.as_ref())))
            .collect();
        payload.insert("tags".to_owned(), Value::Object(map));
    }
    serde_json::to_string(&Value::Object(payload)).map_or_else(
        |_| {
            "{\"type\":\"metric\",\"metricType\":\"error\",\"name\":\"telemetry.serialize_failed\",\"value\":1}\n"
                .to_owned()
        },
        |mut encoded| {
            encoded.push('\n');
            encoded
        },
    )
}

fn merge_tags(base: &TelemetryTags, extra: Option<&TelemetryTags>) -> TelemetryTags {
    let mut merged = base.clone();
    if let Some(extra) = extra {
        merged.extend(extra.iter().map(|(key, value)| (key.clone(), value.clone())));
    }
    for (key, value) in &mut merged {
        if is_secret_key(key) {
            *value = REDACTED.into();
        }
    }
    merged
}
