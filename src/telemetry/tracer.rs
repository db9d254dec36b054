// SPDX-License-Identifier: MIT
//! Tracer capability handed to request handlers.
//!
//! [`Tracer`] has exactly two shapes: bound to the installed SDK provider, or a
//! no-op. Which one a handler receives is decided once by
//! [`Telemetry`](super::Telemetry); handlers use both through the same methods.
use std::fmt;

use opentelemetry::trace::{Span as _, Status, Tracer as _};
use opentelemetry::{Key, KeyValue, Value};
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Tracer type of the SDK provider.
pub type SdkTracer = <SdkTracerProvider as opentelemetry::trace::TracerProvider>::Tracer;
type SdkSpan = <SdkTracer as opentelemetry::trace::Tracer>::Span;

/// Opens spans, either against a live provider or as no-ops.
#[derive(Clone)]
pub struct Tracer(TracerKind);

#[derive(Clone)]
enum TracerKind {
    Active(SdkTracer),
    Noop,
}

impl Tracer {
    /// A tracer whose spans record nothing.
    pub fn noop() -> Self {
        Self(TracerKind::Noop)
    }

    pub(crate) fn active(tracer: SdkTracer) -> Self {
        Self(TracerKind::Active(tracer))
    }

    /// Start a span named `name`.
    ///
    /// Active spans are parented on the OpenTelemetry context of the current
    /// `tracing` span, so they nest under the HTTP request span when the
    /// tracing layer is installed. The span ends when the returned guard drops.
    pub fn start_span(&self, name: &'static str) -> Span {
        match &self.0 {
            TracerKind::Active(tracer) => {
                let parent = tracing::Span::current().context();
                Span(SpanKind::Active {
                    span: tracer.start_with_context(name, &parent),
                    attributes: Vec::new(),
                })
            }
            TracerKind::Noop => Span(SpanKind::Noop),
        }
    }

    /// Whether spans from this tracer are discarded.
    pub fn is_noop(&self) -> bool {
        matches!(self.0, TracerKind::Noop)
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            TracerKind::Active(_) => f.write_str("Tracer::Active"),
            TracerKind::Noop => f.write_str("Tracer::Noop"),
        }
    }
}

/// Scoped unit of traced work.
///
/// Attribute keys are unique; writing a key again replaces its value. The
/// attributes are flushed onto the underlying span when it ends, which happens
/// exactly once: on [`Span::end`] or on drop, whichever comes first.
pub struct Span(SpanKind);

enum SpanKind {
    Active {
        span: SdkSpan,
        attributes: Vec<KeyValue>,
    },
    Noop,
}

impl Span {
    /// Set `key` to `value`, replacing any earlier value. No-op spans ignore it.
    pub fn set_attribute<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        let SpanKind::Active { attributes, .. } = &mut self.0 else {
            return;
        };
        let key = key.into();
        let value = value.into();
        match attributes.iter_mut().find(|kv| kv.key == key) {
            Some(existing) => existing.value = value,
            None => attributes.push(KeyValue::new(key, value)),
        }
    }

    /// Mark the span as failed.
    pub fn set_error(&mut self, message: impl Into<String>) {
        if let SpanKind::Active { span, .. } = &mut self.0 {
            span.set_status(Status::error(message.into()));
        }
    }

    /// End the span now instead of at the end of the enclosing scope.
    pub fn end(self) {
        drop(self);
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if let SpanKind::Active { span, attributes } = &mut self.0 {
            span.set_attributes(std::mem::take(attributes));
            span.end();
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            SpanKind::Active { attributes, .. } => f
                .debug_struct("Span::Active")
                .field("attributes", attributes)
                .finish(),
            SpanKind::Noop => f.write_str("Span::Noop"),
        }
    }
}
