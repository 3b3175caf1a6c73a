use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use super::demo::demo_app;
use crate::config::{discover_config, load_config, Config};
use crate::logging;
use crate::runtime_config::RuntimeConfig;
use crate::server::{AppService, HttpServer};

/// Command-line interface for view-dispatch
#[derive(Parser)]
#[command(name = "view-dispatch")]
#[command(about = "Route dispatch and error handling demo server", long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the demo application
    Serve {
        /// Configuration file (TOML, JSON or YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address and port to bind, overriding the configuration
        #[arg(long)]
        addr: Option<String>,
    },
    /// Print the demo route table
    Routes,
}

/// Parse the command line and run the selected command.
///
/// # Errors
///
/// Configuration, logging setup, and server startup failures.
pub fn run_cli() -> Result<()> {
    run(Cli::parse())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { config, addr } => {
            let config = resolve_config(config, addr.as_deref())?;
            serve(&config)
        }
        Commands::Routes => {
            demo_app(Config::default().app)?.routes().dump_routes();
            Ok(())
        }
    }
}

/// Load the configuration and apply the `--addr` override.
pub(super) fn resolve_config(path: Option<PathBuf>, addr: Option<&str>) -> Result<Config> {
    let config = match path {
        Some(path) => load_config(&path).with_context(|| format!("loading {}", path.display()))?,
        None => discover_config(".").context("loading configuration")?,
    };
    let Some(addr) = addr else {
        return Ok(config);
    };
    let (host, port) = addr
        .rsplit_once(':')
        .with_context(|| format!("invalid --addr {addr:?}, expected HOST:PORT"))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in --addr {addr:?}"))?;
    Ok(config.with_overrides(json!({"network": {"host": host, "port": port}}))?)
}

fn serve(config: &Config) -> Result<()> {
    config.export_env();
    logging::init(&config.logging.clone().merge_env())?;
    RuntimeConfig::from_env().apply();

    let app = demo_app(config.app.clone())?;
    let handle = HttpServer(AppService::new(app))
        .start(config.network.addr())
        .with_context(|| format!("binding {}", config.network.addr()))?;
    handle.wait_ready()?;
    info!(addr = %handle.addr(), "view-dispatch ready");

    wait_for_shutdown()?;
    handle.stop();
    Ok(())
}

#[cfg(unix)]
fn wait_for_shutdown() -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("installing signal handlers")?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, "Shutdown signal received");
    }
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown() -> Result<()> {
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(())
}
