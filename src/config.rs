// SPDX-License-Identifier: MIT
//! Environment-driven configuration.
//!
//! Every value the broker reads from its environment is resolved here by pure
//! functions over an [`EnvSource`]. The running binary passes [`ProcessEnv`];
//! tests pass fixed maps or arrays of pairs so nothing mutates the process
//! environment.
//!
//! Variables consumed:
//! * `OTEL_SDK_DISABLED` – `"true"` (any case) disables tracing initialization.
//! * `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` – primary exporter endpoint.
//! * `OTEL_EXPORTER_OTLP_ENDPOINT` – fallback exporter base endpoint.
//! * `OTEL_EXPORTER_OTLP_HEADERS` – comma separated `key=value` export headers.
//! * `SERVICE_VERSION` – `service.version` resource attribute.
//! * `DEPLOYMENT_ENV` / `NODE_ENV` – `deployment.environment` resource attribute.
//! * `BROKER_ADDR` – listen address of the HTTP server.
//! * `RUST_LOG` – console log filter directives.
//!
//! A variable set to the empty string is treated as unset.
use std::collections::HashMap;

/// Service name reported in the `service.name` resource attribute.
pub const SERVICE_NAME: &str = "collabcanvas-ai-broker";

/// Path every trace export endpoint must end with.
pub const TRACES_PATH: &str = "/v1/traces";

const DEFAULT_OTLP_BASE: &str = "http://localhost:4318";
const DEFAULT_SERVICE_VERSION: &str = "0.3.0";
const DEFAULT_ENVIRONMENT: &str = "development";
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";
const DEFAULT_LOG_FILTER: &str = "ai_broker=info,tower_http=info";

/// Read-only view of environment variables.
pub trait EnvSource {
    /// Raw value of `key`, or `None` when the variable is not set.
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl EnvSource for [(&str, &str)] {
    fn var(&self, key: &str) -> Option<String> {
        // Last occurrence wins, like repeated `export` lines.
        self.iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| (*v).to_string())
    }
}

impl<const N: usize> EnvSource for [(&str, &str); N] {
    fn var(&self, key: &str) -> Option<String> {
        self.as_slice().var(key)
    }
}

fn non_empty<E: EnvSource + ?Sized>(env: &E, key: &str) -> Option<String> {
    env.var(key).filter(|v| !v.is_empty())
}

/// Whether tracing was switched off with `OTEL_SDK_DISABLED=true`.
pub fn sdk_disabled<E: EnvSource + ?Sized>(env: &E) -> bool {
    env.var("OTEL_SDK_DISABLED")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Resolve the OTLP/HTTP trace endpoint.
///
/// Prefers `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT`, then `OTEL_EXPORTER_OTLP_ENDPOINT`,
/// then `http://localhost:4318`; the result always ends with [`TRACES_PATH`].
pub fn exporter_endpoint<E: EnvSource + ?Sized>(env: &E) -> String {
    let raw = non_empty(env, "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT")
        .or_else(|| non_empty(env, "OTEL_EXPORTER_OTLP_ENDPOINT"))
        .unwrap_or_else(|| DEFAULT_OTLP_BASE.to_string());
    normalize_endpoint(&raw)
}

/// Strip trailing slashes and append [`TRACES_PATH`] unless already present.
///
/// Normalizing an already normalized endpoint returns it unchanged.
pub fn normalize_endpoint(raw: &str) -> String {
    let base = raw.trim_end_matches('/');
    if base.ends_with(TRACES_PATH) {
        base.to_string()
    } else {
        format!("{base}{TRACES_PATH}")
    }
}

/// Export headers from `OTEL_EXPORTER_OTLP_HEADERS`.
pub fn exporter_headers<E: EnvSource + ?Sized>(env: &E) -> HashMap<String, String> {
    env.var("OTEL_EXPORTER_OTLP_HEADERS")
        .map(|raw| parse_headers(&raw))
        .unwrap_or_default()
}

/// Parse a comma separated `key=value` list.
///
/// Blank entries, entries without `=` and entries whose key trims to nothing
/// are skipped. Keys and values are trimmed, the value keeps any further `=`,
/// and a later duplicate key replaces the earlier one.
pub fn parse_headers(raw: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for pair in raw.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        headers.insert(key.to_string(), value.trim().to_string());
    }
    headers
}

/// Resource metadata reported with every exported span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceMetadata {
    pub name: String,
    pub version: String,
    pub environment: String,
}

impl ServiceMetadata {
    /// Resolve version and environment label; the name is always [`SERVICE_NAME`].
    pub fn from_env<E: EnvSource + ?Sized>(env: &E) -> Self {
        Self {
            name: SERVICE_NAME.to_string(),
            version: non_empty(env, "SERVICE_VERSION")
                .unwrap_or_else(|| DEFAULT_SERVICE_VERSION.to_string()),
            environment: non_empty(env, "DEPLOYMENT_ENV")
                .or_else(|| non_empty(env, "NODE_ENV"))
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
        }
    }
}

/// Everything needed to build the OTLP span exporter.
///
/// Built fresh for each initialization attempt; never cached on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExporterConfig {
    /// Full trace endpoint, always ending in [`TRACES_PATH`].
    pub endpoint: String,
    pub headers: HashMap<String, String>,
    pub service: ServiceMetadata,
}

impl ExporterConfig {
    /// Resolve endpoint, headers and service metadata from `env`.
    pub fn from_env<E: EnvSource + ?Sized>(env: &E) -> Self {
        Self {
            endpoint: exporter_endpoint(env),
            headers: exporter_headers(env),
            service: ServiceMetadata::from_env(env),
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Console log filter directives, from `RUST_LOG`.
    pub log_filter: String,
}

impl ServerConfig {
    /// Resolve `BROKER_ADDR` and `RUST_LOG`, falling back to the defaults.
    pub fn from_env<E: EnvSource + ?Sized>(env: &E) -> Self {
        Self {
            bind_address: non_empty(env, "BROKER_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            log_filter: non_empty(env, "RUST_LOG")
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}
