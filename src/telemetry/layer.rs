//! `tracing-subscriber` layer forwarding events into a [`LogSink`].

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::config::LogLevel;
use crate::telemetry::sink::{LogFields, LogSink};

const CORRELATION_FIELD: &str = "correlation_id";

/// Fields recorded on a span, kept in its extensions.
#[derive(Debug, Default)]
struct SpanFields(Map<String, Value>);

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }
}

/// Converts `tracing` events into sink records.
///
/// The correlation id is taken from the event's own `correlation_id` field, or
/// from the nearest enclosing span that recorded one. Other span fields are
/// merged into the record without overriding event fields.
#[derive(Debug, Clone)]
pub struct SinkLayer {
    sink: Arc<LogSink>,
}

impl SinkLayer {
    /// Layer writing into `sink`.
    #[must_use]
    pub const fn new(sink: Arc<LogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut collector = FieldCollector::default();
        attrs.record(&mut collector);
        span.extensions_mut().insert(SpanFields(collector.fields));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut collector = FieldCollector::default();
        values.record(&mut collector);
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            fields.0.extend(collector.fields);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = LogLevel::from(metadata.level());
        if !self.sink.enabled(level) {
            return;
        }

        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        let mut fields = collector.fields;

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                let extensions = span.extensions();
                let Some(span_fields) = extensions.get::<SpanFields>() else {
                    continue;
                };
                for (key, value) in &span_fields.0 {
                    fields.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }

        let correlation_id = fields.remove(CORRELATION_FIELD).map(|value| match value {
            Value::String(s) => s,
            other => other.to_string(),
        });

        let mut record = LogFields::new(collector.message.unwrap_or_default()).target(metadata.target());
        if let Some(id) = correlation_id {
            record = record.correlated(id);
        }
        for (key, value) in fields {
            record = record.with(key, value);
        }
        self.sink.emit(level, record);
    }
}
