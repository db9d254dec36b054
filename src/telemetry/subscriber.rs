// SPDX-License-Identifier: MIT
//! `tracing` subscriber setup: console logging plus the OpenTelemetry layer.
use anyhow::Result;
use tracing::Dispatch;
#[cfg(feature = "console-log")]
use tracing_subscriber::fmt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

use super::{Telemetry, TelemetryStatus};
use crate::config::EnvSource;

// Console formatting: plain compact single-line output.
#[cfg(feature = "console-log")]
macro_rules! console_layer {
    () => {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .compact()
    };
}

/// Filter from `directives`; malformed directives fall back to `info`.
fn env_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Console-only dispatcher, used while telemetry itself is being set up.
pub fn console_dispatch(log_filter: &str) -> Dispatch {
    let filter = env_filter(log_filter);

    #[cfg(feature = "console-log")]
    return Dispatch::new(Registry::default().with(filter).with(console_layer!()));

    #[cfg(not(feature = "console-log"))]
    return Dispatch::new(Registry::default().with(filter));
}

/// Initialize `telemetry` from `env`, then install the process-wide subscriber.
///
/// `log_filter` holds `EnvFilter` directives, normally
/// [`ServerConfig::log_filter`](crate::config::ServerConfig::log_filter).
///
/// Initialization runs under [`console_dispatch`] so its warnings reach the
/// console. The installed subscriber carries the OpenTelemetry layer when
/// telemetry came up active, which exports every `tracing` span (including the
/// `tower-http` request spans) and lets handler spans nest beneath them.
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing<E: EnvSource + ?Sized>(
    telemetry: &Telemetry,
    env: &E,
    log_filter: &str,
) -> Result<TelemetryStatus> {
    let status = tracing::dispatcher::with_default(&console_dispatch(log_filter), || {
        telemetry.initialize(env)
    });

    let filter = env_filter(log_filter);

    #[cfg(feature = "console-log")]
    Registry::default()
        .with(filter)
        .with(console_layer!())
        .with(telemetry.tracing_layer())
        .try_init()?;

    #[cfg(not(feature = "console-log"))]
    Registry::default()
        .with(filter)
        .with(telemetry.tracing_layer())
        .try_init()?;

    Ok(status)
}
