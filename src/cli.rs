//! Command-line interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::{self, AppConfig};
use crate::context::AppContext;
use crate::demo;
use crate::lifecycle::{NoopHooks, ServerRuntime};
use crate::server::{AppService, HttpServer, ServerHandle};

#[derive(Parser)]
#[command(name = "banyan")]
#[command(about = "Banyan application server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the server with the built-in demo registry
    Serve {
        /// Path to the YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the listen address from the config file
        #[arg(long)]
        addr: Option<String>,
    },
    /// Print the demo route table and exit
    Routes,
}

pub fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config, addr } => serve(config, addr),
        Commands::Routes => {
            demo::demo_router().dump_routes();
            Ok(())
        }
    }
}

fn serve(config_path: Option<PathBuf>, addr: Option<String>) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::default(),
    };
    if let Some(addr) = addr {
        config.server.addr = addr;
    }

    may::config().set_stack_size(config::stack_size());

    let addr = config.server.addr.clone();
    let ctx = AppContext::new(config, demo::demo_router());
    let runtime = ServerRuntime::new(Arc::clone(&ctx), demo::demo_dispatcher(), Arc::new(NoopHooks));
    runtime.start()?;

    let service = AppService::new(Arc::clone(&runtime));
    let handle = HttpServer(service)
        .start(addr.as_str())
        .map_err(|err| anyhow::anyhow!("failed to bind {addr}: {err}"))?;
    info!(addr = %addr, "Server started");

    wait_for_shutdown(&runtime, handle)
}

#[cfg(unix)]
fn wait_for_shutdown(runtime: &Arc<ServerRuntime>, handle: ServerHandle) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, "Shutdown signal received");
    }
    runtime.shutdown();
    handle.stop();
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown(_runtime: &Arc<ServerRuntime>, handle: ServerHandle) -> anyhow::Result<()> {
    handle
        .join()
        .map_err(|err| anyhow::anyhow!("server failed: {err:?}"))
}
