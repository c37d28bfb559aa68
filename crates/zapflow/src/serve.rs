// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `zapflow serve` command implementation.
//!
//! Opens the store, builds the provider client and the inbox subsystems,
//! and runs the gateway until the process is terminated.

use std::time::Duration;

use tracing::{info, warn};

use zapflow_config::ZapflowConfig;
use zapflow_core::ZapflowError;
use zapflow_gateway::{AuthConfig, GatewayState, ServerConfig};
use zapflow_inbox::{Reconciler, SessionLifecycle};
use zapflow_provider::EvolutionClient;
use zapflow_storage::Database;

/// Runs the `zapflow serve` command.
pub async fn run_serve(config: ZapflowConfig) -> Result<(), ZapflowError> {
    init_tracing(&config.agent.log_level);

    info!(name = %config.agent.name, "starting zapflow serve");

    let db = Database::open(&config.storage.database_path).await?;

    let base_url = match config.provider.base_url.as_deref() {
        Some(url) => url.to_string(),
        None => {
            warn!("provider.base_url not configured; provider commands will fail until it is set");
            String::new()
        }
    };
    let api_key = config.provider.api_key.clone().unwrap_or_default();
    let client = EvolutionClient::new(
        &base_url,
        &api_key,
        Duration::from_secs(config.provider.timeout_secs),
    )?;

    // The provider needs a publicly reachable ingress URL; default to the
    // local bind address for single-host setups.
    let webhook_url = config.provider.webhook_url.clone().unwrap_or_else(|| {
        format!(
            "http://{}:{}/webhooks/provider",
            config.gateway.host, config.gateway.port
        )
    });

    let state = GatewayState {
        db: db.clone(),
        reconciler: Reconciler::new(db.clone()),
        lifecycle: SessionLifecycle::new(db.clone(), client.clone(), webhook_url),
        client,
        auth: AuthConfig {
            bearer_token: config.gateway.bearer_token.clone(),
        },
        start_time: std::time::Instant::now(),
    };

    let server_config = ServerConfig {
        host: config.gateway.host.clone(),
        port: config.gateway.port,
    };

    tokio::select! {
        result = zapflow_gateway::start_server(&server_config, state) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            db.close().await?;
            Ok(())
        }
    }
}

/// Initialize the tracing subscriber from the configured log level, letting
/// `RUST_LOG` override when set.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("zapflow={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
