use anyhow::{Context, Result};
use axum::{Router, extract::DefaultBodyLimit};
use std::{io::ErrorKind, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod sanitize;
mod services;
#[cfg(test)]
mod test_support;
mod validation;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting build-relay with config: {:?}", cfg);

    // --- Outbound HTTP client shared by the media and GitHub clients ---
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(300))
        .build()
        .context("building HTTP client")?;

    // --- Initialize core service ---
    let service = services::build_service::BuildService::from_config(&cfg, http);

    // --- Ensure staging area exists ---
    service
        .staging
        .ensure_ready()
        .await
        .with_context(|| format!("preparing staging directory {}", cfg.staging_dir.display()))?;
    tracing::info!("Staging uploads in {:?} mode", cfg.storage);

    // --- Build router ---
    let app: Router = routes::routes::routes()
        .layer(DefaultBodyLimit::max(cfg.body_limit()))
        .with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
