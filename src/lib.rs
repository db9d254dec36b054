// SPDX-License-Identifier: MIT
//! CollabCanvas AI broker: board clustering and outlining over HTTP, traced
//! with OpenTelemetry when a backend is available.
//!
//! The clustering and outline logic in [`broker`] is a deterministic placeholder.
//! The tracing setup in [`telemetry`] is the interesting part:
//! * [`telemetry::Telemetry`] builds an OTLP exporter once, from the environment.
//! * Handlers always get a [`telemetry::Tracer`]; when tracing is disabled or no
//!   exporter is compiled in it is a no-op with the same interface.
//! * Every request also writes a synthetic [`trace_log::TraceRecord`].
//!
//! # Feature Flags
//! * `otlp` (default) – compile in the OTLP/HTTP span exporter.
//! * `console-log` (default) – compact console log formatting.
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use ai_broker::config::{ProcessEnv, ServerConfig};
//! use ai_broker::server::{self, AppState};
//! use ai_broker::telemetry::{init_tracing, Telemetry};
//! use ai_broker::trace_log::JsonLinesLogger;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env(&ProcessEnv);
//!     let telemetry = Arc::new(Telemetry::from_build());
//!     init_tracing(&telemetry, &ProcessEnv, &config.log_filter)?;
//!     let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
//!     let state = AppState::new(telemetry.clone(), Arc::new(JsonLinesLogger::stdout()));
//!     server::serve(listener, state).await?;
//!     telemetry.shutdown()?;
//!     Ok(())
//! }
//! ```
pub mod broker;
pub mod config;
pub mod models;
pub mod server;
pub mod telemetry;
pub mod trace_log;
