//! dsk - OpenAI-compatible bridge

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use dsk_auth::{CookieArtifact, CookieRefresher, CredentialStore};
use dsk_gateway::{GatewayConfig, GatewayServer};
use dsk_providers::DeepSeekClient;
use dsk_telemetry::TelemetryConfig;

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = GatewayConfig::from_env();

    let telemetry = TelemetryConfig::default().with_json_output(config.json_logs);
    if let Err(e) = dsk_telemetry::init_subscriber(&telemetry) {
        eprintln!("{}: failed to initialise logging: {}", "Warning".yellow().bold(), e);
    }

    let result = match cli.command {
        Commands::Serve { host, port } => run_serve(config, host, port).await,
        Commands::Refresh => run_refresh(&config).await,
    };

    if let Err(e) = result {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run_serve(
    config: GatewayConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let token = config
        .auth_token
        .clone()
        .context("DSK_AUTH_TOKEN must be set to serve")?;
    let refresher = config
        .refresher()
        .context("DSK_REFRESH_COMMAND must name a program")?;

    let mut credentials = CredentialStore::new(token);
    match CookieArtifact::load(&config.cookies_path) {
        Ok(artifact) => {
            tracing::info!(path = %config.cookies_path.display(), "loaded cookie artifact");
            credentials = credentials.with_cookies(artifact);
        }
        Err(e) => {
            tracing::warn!(
                path = %config.cookies_path.display(),
                error = %e,
                "no usable cookie artifact; the first request will trigger a refresh"
            );
        }
    }
    let credentials = Arc::new(credentials);

    let backend = DeepSeekClient::new(config.backend_config(), credentials.clone())
        .context("failed to build backend client")?;

    let host = host.unwrap_or_else(|| config.host.clone());
    let port = port.unwrap_or(config.port);
    let server = GatewayServer::new(config, Arc::new(backend), credentials, Arc::new(refresher));

    println!(
        "{} http://{}:{}",
        "Listening on".cyan().bold(),
        host,
        port
    );
    server.start(&host, port).await?;
    Ok(())
}

async fn run_refresh(config: &GatewayConfig) -> anyhow::Result<()> {
    let refresher = config
        .refresher()
        .context("DSK_REFRESH_COMMAND must name a program")?;

    println!(
        "{} {}",
        "Refreshing:".cyan().bold(),
        config.refresh_command.dimmed()
    );

    match refresher.refresh().await {
        Ok(artifact) => {
            println!(
                "  {} {} cookies written to {}",
                "✓".green(),
                artifact.cookies.len(),
                refresher.artifact_path().display()
            );
            Ok(())
        }
        Err(e) => {
            let (stdout, stderr) = e.output();
            for (label, output) in [("stdout", stdout), ("stderr", stderr)] {
                if let Some(output) = output.filter(|o| !o.trim().is_empty()) {
                    println!("{}", format!("--- {} ---", label).dimmed());
                    println!("{}", output.trim_end());
                }
            }
            Err(e.into())
        }
    }
}
