// SPDX-License-Identifier: MIT
use std::sync::Arc;

use ai_broker::config::{ProcessEnv, ServerConfig};
use ai_broker::server::{self, AppState};
use ai_broker::telemetry::{init_tracing, Telemetry};
use ai_broker::trace_log::JsonLinesLogger;
use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env(&ProcessEnv);
    let telemetry = Arc::new(Telemetry::from_build());
    let status = init_tracing(&telemetry, &ProcessEnv, &config.log_filter)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        telemetry = ?status,
        "ai broker starting"
    );

    let listener = TcpListener::bind(&config.bind_address).await?;
    let state = AppState::new(telemetry.clone(), Arc::new(JsonLinesLogger::stdout()));
    server::serve(listener, state).await?;

    info!("shutting down");
    telemetry.shutdown()?;
    Ok(())
}
