//! scored - Main Entry Point
//!
//! Loads every model in the models directory into each worker, serves
//! predictions over HTTP, and exits cleanly on SIGINT/SIGTERM.

use anyhow::Context;
use clap::Parser;
use scored_common::{EngineKind, MetricsRegistry, ServeConfig};
use scored_server::process::{self, PidFile};
use scored_server::{router, AppState, WorkerPool};
use scored_worker::engine;
use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Serve predictions from a directory of models
#[derive(Debug, Parser)]
#[command(name = "scored", version)]
struct Cli {
    /// the models directory
    #[arg(long = "models")]
    models: Option<PathBuf>,

    /// the number of replicated workers handling requests
    #[arg(long)]
    workers: Option<usize>,

    /// HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// HTTP bind address
    #[arg(long)]
    bind: Option<String>,

    /// the logfile location
    #[arg(long = "logfile")]
    logfile: Option<PathBuf>,

    /// pidfile path
    #[arg(long = "pidfile")]
    pidfile: Option<PathBuf>,

    /// engine adapter: linear or vw
    #[arg(long)]
    engine: Option<EngineKind>,

    /// configuration file (YAML or TOML)
    #[arg(long, env = "SCORED_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut ServeConfig) {
        if let Some(models) = self.models {
            config.models_dir = models;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(logfile) = self.logfile {
            config.log_file = Some(logfile);
        }
        if let Some(pidfile) = self.pidfile {
            config.pid_file = Some(pidfile);
        }
        if let Some(engine) = self.engine {
            config.engine = engine;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = ServeConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    // Initialize logging
    process::init_tracing(config.log_file.as_deref(), &config.observability.log_level)?;

    info!(
        "Starting scored: models={}, workers={}, engine={:?}",
        config.models_dir.display(),
        config.workers,
        config.engine
    );

    let _pid_file = config
        .pid_file
        .as_deref()
        .map(PidFile::create)
        .transpose()?;

    let metrics = MetricsRegistry::new()?;
    let engine = engine::from_kind(config.engine)?;
    let (pool, mut failures) = WorkerPool::launch(&config, engine, &metrics).await?;

    info!(
        "Worker pool ready: {} workers, {} models",
        pool.len(),
        pool.active_models().len()
    );

    let state = Arc::new(AppState { pool, metrics });

    let address = config.listen_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to listen on {}", address))?;

    info!("Listening on {}", address);

    let server = axum::serve(listener, router(state)).into_future();

    tokio::select! {
        result = server => {
            result.context("HTTP server stopped")?;
        }
        err = failures.fatal() => {
            error!("Exiting on fatal reconciliation error: {}", err);
            return Err(err.into());
        }
        signal = process::shutdown_signal() => {
            info!("exiting on {} signal", signal?);
        }
    }

    Ok(())
}
