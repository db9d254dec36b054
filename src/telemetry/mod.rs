// SPDX-License-Identifier: MIT
//! Span export for the broker, degrading to no-op tracing.
//!
//! The public API is small:
//!
//! * [`Telemetry`] – lifecycle object owned by `main` and shared with handlers.
//! * [`Telemetry::initialize`] – one-shot, environment-driven exporter setup.
//! * [`Telemetry::tracer`] – the [`Tracer`] handlers open spans with.
//! * [`init_tracing`] – initialize telemetry and install the process subscriber.
//!
//! # States
//! ```text
//! Uninitialized ──initialize──▶ Active                    (exporter built)
//!               └─────────────▶ Disabled(SdkDisabled)        OTEL_SDK_DISABLED=true
//!                               Disabled(BackendUnavailable) built without `otlp`
//!                               Disabled(InitFailed)         exporter build error
//! ```
//! `Active` and `Disabled` are terminal. Only `Active` hands out a live tracer;
//! everything else gets [`Tracer::noop`].
//!
//! # Feature Flags
//! * `otlp` – compile in the OTLP/HTTP exporter. Without it the broker always
//!   ends up `Disabled(BackendUnavailable)`.
//!
//! # Threading Model
//! The batch span processor exports from its own worker thread using the
//! blocking HTTP client, so an unreachable collector never delays a request.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
#[cfg(feature = "otlp")]
use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

use crate::config::{self, EnvSource, ExporterConfig, ServiceMetadata};

mod subscriber;
mod tracer;

pub use subscriber::{console_dispatch, init_tracing};
pub use tracer::{SdkTracer, Span, Tracer};

/// Builds the SDK tracer provider once telemetry is enabled.
pub trait ProviderFactory: Send + Sync {
    /// # Errors
    /// Returns an error if the exporter cannot be constructed (e.g. invalid endpoint URL).
    fn build(&self, config: &ExporterConfig) -> Result<SdkTracerProvider>;
}

/// OTLP over HTTP/protobuf behind a batch span processor.
#[cfg(feature = "otlp")]
#[derive(Clone, Copy, Debug, Default)]
pub struct OtlpProviderFactory;

#[cfg(feature = "otlp")]
impl ProviderFactory for OtlpProviderFactory {
    fn build(&self, config: &ExporterConfig) -> Result<SdkTracerProvider> {
        let span_exporter = SpanExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(config.endpoint.clone())
            .with_headers(config.headers.clone())
            .with_timeout(std::time::Duration::from_secs(5))
            .build()?;

        Ok(SdkTracerProvider::builder()
            .with_batch_exporter(span_exporter)
            .with_resource(resource(&config.service))
            .build())
    }
}

/// Resource attributes attached to every exported span.
pub fn resource(service: &ServiceMetadata) -> Resource {
    Resource::builder()
        .with_service_name(service.name.clone())
        .with_attributes([
            KeyValue::new("service.version", service.version.clone()),
            KeyValue::new("deployment.environment", service.environment.clone()),
        ])
        .build()
}

/// Why tracing ended up disabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisabledReason {
    /// `OTEL_SDK_DISABLED=true`.
    SdkDisabled,
    /// The binary was built without an exporter.
    BackendUnavailable,
    /// The exporter could not be constructed.
    InitFailed,
}

/// Observable lifecycle state of [`Telemetry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TelemetryStatus {
    Uninitialized,
    Active,
    Disabled(DisabledReason),
}

enum TelemetryState {
    Active {
        provider: SdkTracerProvider,
        tracer: SdkTracer,
    },
    Disabled(DisabledReason),
}

/// Process telemetry state, created by the startup sequence.
///
/// Share it behind an `Arc`; [`Telemetry::initialize`] may race from several
/// threads and still builds at most one provider.
pub struct Telemetry {
    factory: Option<Box<dyn ProviderFactory>>,
    state: OnceLock<TelemetryState>,
    shut_down: AtomicBool,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::from_build()
    }
}

impl Telemetry {
    /// Telemetry backed by `factory`; `None` means no exporter is available.
    pub fn new(factory: Option<Box<dyn ProviderFactory>>) -> Self {
        Self {
            factory,
            state: OnceLock::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Telemetry using whichever exporter this binary was compiled with.
    pub fn from_build() -> Self {
        #[cfg(feature = "otlp")]
        return Self::new(Some(Box::new(OtlpProviderFactory)));

        #[cfg(not(feature = "otlp"))]
        return Self::new(None);
    }

    /// Initialize tracing from `env`. Only the first call has any effect.
    ///
    /// Never fails: a disabled flag, a missing exporter or an exporter build
    /// error all leave the broker running with no-op tracing.
    pub fn initialize<E: EnvSource + ?Sized>(&self, env: &E) -> TelemetryStatus {
        status_of(self.state.get_or_init(|| self.build_state(env)))
    }

    fn build_state<E: EnvSource + ?Sized>(&self, env: &E) -> TelemetryState {
        if config::sdk_disabled(env) {
            tracing::info!("OTEL_SDK_DISABLED=true; skipping telemetry init");
            return TelemetryState::Disabled(DisabledReason::SdkDisabled);
        }

        let Some(factory) = &self.factory else {
            tracing::warn!("OTLP exporter not compiled in; broker telemetry disabled");
            return TelemetryState::Disabled(DisabledReason::BackendUnavailable);
        };

        let exporter = ExporterConfig::from_env(env);
        match factory.build(&exporter) {
            Ok(provider) => {
                let tracer = provider.tracer(config::SERVICE_NAME);
                tracing::info!(
                    endpoint = %exporter.endpoint,
                    headers = exporter.headers.len(),
                    service.version = %exporter.service.version,
                    deployment.environment = %exporter.service.environment,
                    "telemetry initialized"
                );
                TelemetryState::Active { provider, tracer }
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = %exporter.endpoint,
                    error = %e,
                    "failed to build span exporter; falling back to no-op tracing"
                );
                TelemetryState::Disabled(DisabledReason::InitFailed)
            }
        }
    }

    /// Current state; `Uninitialized` until [`Telemetry::initialize`] has run.
    pub fn status(&self) -> TelemetryStatus {
        self.state
            .get()
            .map(status_of)
            .unwrap_or(TelemetryStatus::Uninitialized)
    }

    /// Tracer for request handlers: live when active, no-op otherwise.
    pub fn tracer(&self) -> Tracer {
        match self.state.get() {
            Some(TelemetryState::Active { tracer, .. }) => Tracer::active(tracer.clone()),
            _ => Tracer::noop(),
        }
    }

    /// `tracing` layer exporting framework spans (e.g. `tower-http` request spans)
    /// through the active provider. `None` unless telemetry is active.
    pub fn tracing_layer<S>(&self) -> Option<OpenTelemetryLayer<S, SdkTracer>>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        match self.state.get() {
            Some(TelemetryState::Active { tracer, .. }) => {
                Some(OpenTelemetryLayer::new(tracer.clone()))
            }
            _ => None,
        }
    }

    /// Flush and shut down the provider.
    ///
    /// Only the first call does any work; later calls, and calls while
    /// tracing is disabled, return `Ok(())`.
    ///
    /// # Errors
    /// Returns an error if the provider reports a shutdown failure.
    pub fn shutdown(&self) -> Result<()> {
        let Some(TelemetryState::Active { provider, .. }) = self.state.get() else {
            return Ok(());
        };
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = provider.shutdown() {
            anyhow::bail!("tracer: {e}");
        }
        Ok(())
    }
}

fn status_of(state: &TelemetryState) -> TelemetryStatus {
    match state {
        TelemetryState::Active { .. } => TelemetryStatus::Active,
        TelemetryState::Disabled(reason) => TelemetryStatus::Disabled(*reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::trace::InMemorySpanExporter;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use tokio_test::assert_ok;

    const NO_VARS: [(&str, &str); 0] = [];

    /// Counts provider constructions and records spans in memory.
    #[derive(Clone, Default)]
    struct CountingFactory {
        builds: Arc<AtomicUsize>,
        exporter: InMemorySpanExporter,
    }

    impl ProviderFactory for CountingFactory {
        fn build(&self, _config: &ExporterConfig) -> Result<SdkTracerProvider> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(SdkTracerProvider::builder()
                .with_simple_exporter(self.exporter.clone())
                .build())
        }
    }

    struct FailingFactory;

    impl ProviderFactory for FailingFactory {
        fn build(&self, config: &ExporterConfig) -> Result<SdkTracerProvider> {
            anyhow::bail!("invalid endpoint {}", config.endpoint)
        }
    }

    #[test]
    fn starts_uninitialized_with_noop_tracer() {
        let telemetry = Telemetry::new(Some(Box::new(CountingFactory::default())));
        assert_eq!(telemetry.status(), TelemetryStatus::Uninitialized);
        assert!(telemetry.tracer().is_noop());
    }

    #[test]
    fn initialize_is_idempotent() {
        let factory = CountingFactory::default();
        let builds = factory.builds.clone();
        let telemetry = Telemetry::new(Some(Box::new(factory)));

        assert_eq!(telemetry.initialize(&NO_VARS), TelemetryStatus::Active);
        assert_eq!(telemetry.initialize(&NO_VARS), TelemetryStatus::Active);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(!telemetry.tracer().is_noop());
    }

    #[test]
    fn concurrent_initialize_builds_one_provider() {
        const CALLERS: usize = 16;
        let factory = CountingFactory::default();
        let builds = factory.builds.clone();
        let telemetry = Arc::new(Telemetry::new(Some(Box::new(factory))));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let telemetry = telemetry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    telemetry.initialize(&NO_VARS)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().expect("init thread"), TelemetryStatus::Active);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disable_flag_yields_noop_tracer() {
        let factory = CountingFactory::default();
        let builds = factory.builds.clone();
        let exporter = factory.exporter.clone();
        let telemetry = Telemetry::new(Some(Box::new(factory)));

        let status = telemetry.initialize(&[("OTEL_SDK_DISABLED", "True")]);
        assert_eq!(status, TelemetryStatus::Disabled(DisabledReason::SdkDisabled));
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        let tracer = telemetry.tracer();
        assert!(tracer.is_noop());
        let mut span = tracer.start_span("broker.cluster");
        span.set_attribute("board.id", "b1");
        span.end();
        assert!(exporter.get_finished_spans().expect("spans").is_empty());
        assert!(telemetry.tracing_layer::<tracing_subscriber::Registry>().is_none());
    }

    #[test]
    fn disabled_state_is_terminal() {
        let factory = CountingFactory::default();
        let builds = factory.builds.clone();
        let telemetry = Telemetry::new(Some(Box::new(factory)));

        telemetry.initialize(&[("OTEL_SDK_DISABLED", "true")]);
        let status = telemetry.initialize(&NO_VARS);
        assert_eq!(status, TelemetryStatus::Disabled(DisabledReason::SdkDisabled));
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_backend_degrades() {
        let telemetry = Telemetry::new(None);
        let status = telemetry.initialize(&NO_VARS);
        assert_eq!(status, TelemetryStatus::Disabled(DisabledReason::BackendUnavailable));
        assert!(telemetry.tracer().is_noop());
    }

    #[test]
    fn factory_failure_degrades() {
        let telemetry = Telemetry::new(Some(Box::new(FailingFactory)));
        let status = telemetry.initialize(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "::nope")]);
        assert_eq!(status, TelemetryStatus::Disabled(DisabledReason::InitFailed));
        assert!(telemetry.tracer().is_noop());
        assert_ok!(telemetry.shutdown());
    }

    #[test]
    fn active_tracer_exports_spans() {
        let factory = CountingFactory::default();
        let exporter = factory.exporter.clone();
        let telemetry = Telemetry::new(Some(Box::new(factory)));
        telemetry.initialize(&NO_VARS);

        let mut span = telemetry.tracer().start_span("broker.outline");
        span.set_attribute("cluster.id", "cluster-1");
        drop(span);

        let spans = exporter.get_finished_spans().expect("spans");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "broker.outline");
        assert!(telemetry.tracing_layer::<tracing_subscriber::Registry>().is_some());
    }

    #[test]
    fn handler_spans_nest_under_request_span() {
        use tracing_subscriber::layer::SubscriberExt;

        let factory = CountingFactory::default();
        let exporter = factory.exporter.clone();
        let telemetry = Telemetry::new(Some(Box::new(factory)));
        telemetry.initialize(&NO_VARS);

        let subscriber = tracing_subscriber::Registry::default().with(telemetry.tracing_layer());
        tracing::subscriber::with_default(subscriber, || {
            let request = tracing::info_span!("request");
            let _entered = request.enter();
            telemetry.tracer().start_span("broker.cluster").end();
        });

        let spans = exporter.get_finished_spans().expect("spans");
        assert_eq!(spans.len(), 2);
        let request = spans.iter().find(|s| s.name == "request").expect("request span");
        let handler = spans
            .iter()
            .find(|s| s.name == "broker.cluster")
            .expect("handler span");
        assert_eq!(handler.parent_span_id, request.span_context.span_id());
        assert_eq!(
            handler.span_context.trace_id(),
            request.span_context.trace_id()
        );
    }

    #[test]
    fn shutdown_runs_once() {
        let telemetry = Telemetry::new(Some(Box::new(CountingFactory::default())));
        telemetry.initialize(&NO_VARS);
        assert_ok!(telemetry.shutdown());
        assert_ok!(telemetry.shutdown());
    }

    #[test]
    fn resource_carries_service_metadata() {
        let meta = ServiceMetadata::from_env(&[("SERVICE_VERSION", "9.9.9")]);
        let resource = resource(&meta);
        let version = resource
            .iter()
            .find(|(k, _)| k.as_str() == "service.version")
            .map(|(_, v)| v.to_string());
        assert_eq!(version.as_deref(), Some("9.9.9"));
    }

    #[cfg(feature = "otlp")]
    #[test]
    fn otlp_factory_builds_without_collector() {
        let provider = OtlpProviderFactory
            .build(&ExporterConfig::from_env(&NO_VARS))
            .expect("provider");
        assert_ok!(provider.shutdown());
    }
}
