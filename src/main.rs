//! # API Management - Main Entry Point
//!
//! Loads configuration, wires the in-memory repositories and identity chain, and serves the
//! management admin API together with the Prometheus scrape endpoint.

use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::signal;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use api_management::admin::{ManagementRouter, ManagementState};
use api_management::auth::ExternalAuthenticator;
use api_management::core::config::IdentityProviderConfig;
use api_management::identity::IdentityService;
use api_management::observability::{init_logging, metrics::install_prometheus_recorder};
use api_management::repository::{InMemoryRepositories, RepositoryGateway};
use api_management::{ApiReconciler, ExportVersion, ManagementConfig, ManagementError, ManagementResult};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Management server failed: {}", e);
        eprintln!("Management server failed: {}", e);
        std::process::exit(1);
    }
}

async fn load_config() -> ManagementResult<ManagementConfig> {
    let config_path = std::env::var("MGMT_CONFIG_PATH")
        .unwrap_or_else(|_| "config/management.yaml".to_string());

    if tokio::fs::try_exists(&config_path).await.unwrap_or(false) {
        return ManagementConfig::load_from_file(&config_path).await;
    }

    let mut config = ManagementConfig::default();
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn build_authenticators(
    config: &ManagementConfig,
    identities: &IdentityService,
    gateway: &RepositoryGateway,
) -> ManagementResult<Vec<ExternalAuthenticator>> {
    let mut authenticators = Vec::new();
    for provider in &config.identity.providers {
        if let IdentityProviderConfig::OAuth2(oauth2) = provider {
            let lookup = identities.oauth2_lookup(&oauth2.source).ok_or_else(|| {
                ManagementError::internal(format!("no identity registry for source '{}'", oauth2.source))
            })?;
            authenticators.push(ExternalAuthenticator::new(oauth2, lookup, gateway.clone())?);
        }
    }
    Ok(authenticators)
}

async fn run() -> ManagementResult<()> {
    let config = load_config().await?;
    init_logging(&config.logging);

    info!("Starting API management server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let prometheus = install_prometheus_recorder()?;

    let gateway = RepositoryGateway::in_memory(Arc::new(InMemoryRepositories::new()));
    let identities = IdentityService::from_config(&config.identity);
    info!(providers = identities.resolvers().len(), "Identity providers configured");

    let authenticators = build_authenticators(&config, &identities, &gateway)?;
    let reconciler = Arc::new(ApiReconciler::new(gateway.clone(), Arc::new(identities)));
    let default_version: ExportVersion = config.export.default_version.parse()?;

    let state = ManagementState::new(reconciler, gateway, default_version)
        .with_authenticators(authenticators);

    let app = ManagementRouter::create_router(state)
        .merge(Router::new().route("/metrics", get(move || async move { prometheus.render() })))
        .layer(TimeoutLayer::new(config.server.request_timeout));

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Management API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("API management server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
    }
}
