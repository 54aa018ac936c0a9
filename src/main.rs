// src/main.rs - Farm host entry point
use clap::Parser;
use printfarm::catalog::Catalog;
use printfarm::config::{self, Config};
use printfarm::registry::PrinterRegistry;
use printfarm::uploads::GcodeStore;
use printfarm::web::{self, AppStateInner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_CONFIG: &str = "printfarm.toml";

/// 3D print farm host
#[derive(Parser, Debug)]
#[command(name = "printfarm-host", version, about = "Serves the print farm dashboard API and drives its printers.")]
struct Cli {
    /// Path to a TOML config file (default: ./printfarm.toml when present)
    config: Option<PathBuf>,

    /// Listen address, overrides server.bind
    #[arg(long)]
    bind: Option<String>,

    /// Log level (error, warn, info, debug, trace), overrides server.log_level
    #[arg(long)]
    log_level: Option<String>,
}

fn load(cli: &Cli) -> Result<Config, config::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(&path.to_string_lossy())?,
        None if Path::new(DEFAULT_CONFIG).exists() => config::load_config(DEFAULT_CONFIG)?,
        None => Config::default(),
    };
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(level) = &cli.log_level {
        config.server.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();
    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("printfarm-host: {}", e);
            return Err(e.into());
        }
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(config.server.level()?)
        .init();

    tracing::info!("Starting print farm host {}", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(PrinterRegistry::new(
        config.session.clone(),
        config.virtual_printer.clone(),
    ));
    for descriptor in config.printers.iter().cloned() {
        if let Err(e) = registry.register(descriptor) {
            tracing::warn!("Skipping configured printer: {}", e);
        }
    }
    tracing::info!("{} printer(s) registered from configuration", registry.len());

    let catalog = match &config.storage.catalog_path {
        Some(path) => Catalog::open(path).await?,
        None => Catalog::in_memory(),
    };
    let uploads = GcodeStore::new(config.storage.uploads_dir.clone());
    tracing::info!("G-code uploads stored in {}", uploads.dir().display());

    let state = AppStateInner::new(registry.clone(), catalog, uploads, config.session.console_history);
    let app = web::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr()?).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown();
    tracing::info!("Print farm host stopped");
    Ok(())
}
