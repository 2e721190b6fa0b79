//! Loom daemon entry point.

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use log::{error, info};
use tokio::signal;

use loom::cli::{Cli, Commands};
use loom::config::Config;
use loom::probe::Prober;
use loom::resolve::NameResolver;
use loom::runtime::{ContainerRuntime, DockerRuntime};
use loom::store::{self, StoreGateway};
use loom::{Context, Reconciler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut cfg = Config::load()?;
    cli.apply(&mut cfg);

    // Initialize logging
    let default_level = if cfg.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    info!("Starting Loom with config: {:?}", cfg);

    let hostname = cfg.resolve_hostname()?;
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        DockerRuntime::connect()
            .await
            .context("Failed to connect to Docker")?,
    );
    let running = runtime
        .list_containers()
        .await
        .context("Failed to list containers")?;
    info!("Docker reports {} running containers", running.len());

    let backend = store::connect(cfg.kv_type, &cfg.kv_urls)
        .await
        .with_context(|| format!("Failed to connect to {:?} at {:?}", cfg.kv_type, cfg.kv_urls))?;

    let gateway = StoreGateway::new(backend, cfg.base_key(&hostname));
    info!("Writing records under {}", gateway.base());

    let reconciler = Reconciler::new(Context {
        runtime: Arc::clone(&runtime),
        store: gateway,
        prober: Prober::new(Arc::clone(&runtime), cfg.probe.clone()),
        resolver: NameResolver::new(Arc::clone(&runtime)),
        retry: cfg.retry_policy(),
        self_image_marker: cfg.self_image_marker.clone(),
    });

    // Start by registering what weave already knows about
    reconciler
        .sync_once(cfg.reset)
        .await
        .context("Initial sync failed")?;

    if cli.command == Commands::Onetime {
        return Ok(());
    }

    tokio::select! {
        res = reconciler.run() => {
            if let Err(e) = res {
                error!("Event watch failed: {}", e);
                return Err(e.into());
            }
        }
        res = signal::ctrl_c() => {
            match res {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            }
        }
    }

    info!("Shutdown complete.");
    Ok(())
}
