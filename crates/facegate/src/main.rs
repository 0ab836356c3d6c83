//! # facegate
//!
//! Gateway binary: loads settings, starts logging and metrics, and serves
//! the WebSocket gateway until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use facegate_server::GatewayServer;
use facegate_server::shutdown::Drain;
use facegate_settings::GatewaySettings;
use tracing::{info, warn};

/// Time allowed for in-flight work to wind down after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Real-time gateway between browser clients and the recognition and chat services.
#[derive(Parser, Debug)]
#[command(name = "facegate", about = "Face recognition and chat WebSocket gateway")]
struct Cli {
    /// Settings file (defaults to `~/.facegate/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter directive, e.g. `debug` or `facegate_server=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(facegate_settings::settings_path)
    }

    /// Command-line flags win over file and environment.
    fn apply(&self, settings: &mut GatewaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings_path();
    let mut settings = facegate_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    facegate_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    info!(path = %path.display(), "settings loaded");

    let metrics = facegate_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let recognition_url = settings.recognition.base_url.clone();
    let chat_url = settings.chat.base_url.clone();
    let server = GatewayServer::new(settings, metrics).context("Failed to build server")?;
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    info!(%addr, recognition = %recognition_url, chat = %chat_url, "facegate listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("shutting down");
    match server.shutdown().drain(handle, SHUTDOWN_GRACE).await {
        Drain::Complete => info!("shutdown complete"),
        Drain::Abandoned { remaining } => warn!(remaining, "exiting with sessions still open"),
    }
    Ok(())
}
